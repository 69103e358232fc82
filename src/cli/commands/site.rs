use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use uuid::Uuid;

pub const ARG_INSTANCE_ID: &str = "instance-id";
pub const ARG_SITE_URL: &str = "site-url";
pub const ARG_URI_ALLOW_LIST: &str = "uri-allow-list";

#[derive(Debug)]
pub struct Options {
    pub instance_id: Uuid,
    pub site_url: String,
    pub uri_allow_list: Vec<String>,
}

impl Options {
    /// Parse site arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the site URL is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let site_url = matches
            .get_one::<String>(ARG_SITE_URL)
            .cloned()
            .filter(|value| !value.trim().is_empty())
            .with_context(|| format!("missing required argument: --{ARG_SITE_URL}"))?;

        Ok(Self {
            instance_id: matches
                .get_one::<Uuid>(ARG_INSTANCE_ID)
                .copied()
                .unwrap_or_default(),
            site_url,
            uri_allow_list: matches
                .get_many::<String>(ARG_URI_ALLOW_LIST)
                .map(|values| values.flat_map(|value| split_allow_list(value)).collect())
                .unwrap_or_default(),
        })
    }
}

/// Split on commas outside `{..}` so brace alternatives in glob entries
/// stay whole.
#[must_use]
pub fn split_allow_list(value: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut depth = 0_usize;

    for c in value.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    entries.push(current);

    entries
        .into_iter()
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_INSTANCE_ID)
                .long(ARG_INSTANCE_ID)
                .help("Tenant partition users and audit entries belong to")
                .env("WARDEN_INSTANCE_ID")
                .default_value("00000000-0000-0000-0000-000000000000")
                .value_parser(clap::value_parser!(Uuid)),
        )
        .arg(
            Arg::new(ARG_SITE_URL)
                .long(ARG_SITE_URL)
                .help("Public URL of the site, the fallback redirect target")
                .env("WARDEN_SITE_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_URI_ALLOW_LIST)
                .long(ARG_URI_ALLOW_LIST)
                .help("Comma-separated redirect allow list, http(s) entries may use globs")
                .env("WARDEN_URI_ALLOW_LIST")
                .action(ArgAction::Append),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_brace_alternatives() {
        assert_eq!(
            split_allow_list("https://{app,admin}.example/cb, myapp://cb,,"),
            ["https://{app,admin}.example/cb", "myapp://cb"]
        );
        assert_eq!(split_allow_list("a,{b,{c,d}},e"), ["a", "{b,{c,d}}", "e"]);
        assert!(split_allow_list(" ").is_empty());
    }
}
