use crate::{
    cli::{
        actions::{server::Args, Action},
        commands::{auth, egress, site, webhook},
    },
    config::SiteConfig,
};
use anyhow::{Context, Result};

/// Turn parsed arguments into the action to run.
///
/// # Errors
/// Returns an error if a value that clap accepted fails deeper validation.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let site = site::Options::parse(matches)?;
    let auth = auth::Options::parse(matches)?;

    let config = SiteConfig::new(site.site_url, auth.jwt_secret)
        .with_instance_id(site.instance_id)
        .with_uri_allow_list(site.uri_allow_list)
        .with_default_audience(auth.default_audience)
        .with_admin_role(auth.admin_role)
        .with_default_role(auth.default_role)
        .with_password_min_length(auth.password_min_length)
        .with_aud_header(auth.aud_header);

    Ok(Action::Server(Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one::<String>("dsn")
            .cloned()
            .context("missing required argument: --dsn")?,
        config,
        egress: egress::Options::parse(matches),
        webhook: webhook::Options::parse(matches)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;
    use std::time::Duration;
    use uuid::Uuid;

    fn action(extra: &[&str]) -> Result<Action> {
        let mut args = vec![
            "warden",
            "--dsn",
            "memory://",
            "--site-url",
            "https://example.com",
            "--jwt-secret",
            "secret",
        ];
        args.extend_from_slice(extra);
        handler(&commands::new().get_matches_from(args))
    }

    #[test]
    fn builds_site_config() {
        temp_env::with_vars_unset(
            ["WARDEN_PORT", "WARDEN_WEBHOOK_URL", "WARDEN_INSTANCE_ID"],
            || {
                let Ok(Action::Server(args)) = action(&[
                    "--uri-allow-list",
                    "https://a.example/cb, ,myapp://cb",
                    "--admin-role",
                    "owner",
                    "--egress-block-cidr",
                    "8.8.8.0/24",
                ]) else {
                    panic!("expected a server action");
                };

                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "memory://");
                assert_eq!(args.config.site_url(), "https://example.com");
                assert_eq!(args.config.jwt_secret().expose_secret(), "secret");
                assert_eq!(args.config.admin_role(), "owner");
                assert_eq!(args.config.uri_allow_list().len(), 2);
                assert_eq!(args.config.instance_id(), Uuid::nil());
                assert_eq!(args.egress.block_cidrs.len(), 1);
                assert!(!args.egress.allow_loopback);
                assert!(args.webhook.is_none());
            },
        );
    }

    #[test]
    fn webhook_options() {
        let result = action(&[
            "--webhook-url",
            "https://hooks.example/warden",
            "--webhook-secret",
            "hook",
            "--webhook-timeout",
            "3s",
        ]);
        let Ok(Action::Server(Args {
            webhook: Some(webhook),
            ..
        })) = result
        else {
            panic!("expected webhook options");
        };
        assert_eq!(webhook.url.as_str(), "https://hooks.example/warden");
        assert_eq!(
            webhook
                .secret
                .as_ref()
                .map(|secret| secret.expose_secret().to_string()),
            Some("hook".to_string())
        );
        assert_eq!(webhook.timeout, Duration::from_secs(3));
    }

    #[test]
    fn invalid_values_fail() {
        assert!(action(&["--webhook-url", "not a url"]).is_err());
        assert!(action(&["--aud-header", "bad header"]).is_err());
    }
}
