use anyhow::Context;
use clap::{builder::ValueParser, Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

pub const ARG_WEBHOOK_URL: &str = "webhook-url";
pub const ARG_WEBHOOK_SECRET: &str = "webhook-secret";
pub const ARG_WEBHOOK_TIMEOUT: &str = "webhook-timeout";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Options {
    pub url: Url,
    pub secret: Option<SecretString>,
    pub timeout: Duration,
}

impl Options {
    /// `None` when no webhook URL is configured.
    ///
    /// # Errors
    /// Returns an error if the URL does not parse.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Option<Self>> {
        let Some(url) = matches
            .get_one::<String>(ARG_WEBHOOK_URL)
            .filter(|value| !value.trim().is_empty())
        else {
            return Ok(None);
        };

        Ok(Some(Self {
            url: Url::parse(url).with_context(|| format!("invalid webhook URL: {url}"))?,
            secret: matches
                .get_one::<String>(ARG_WEBHOOK_SECRET)
                .filter(|value| !value.is_empty())
                .cloned()
                .map(SecretString::from),
            timeout: matches
                .get_one::<Duration>(ARG_WEBHOOK_TIMEOUT)
                .copied()
                .unwrap_or(DEFAULT_TIMEOUT),
        }))
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_WEBHOOK_URL)
                .long(ARG_WEBHOOK_URL)
                .help("Receives admin events, only public addresses are reachable")
                .env("WARDEN_WEBHOOK_URL"),
        )
        .arg(
            Arg::new(ARG_WEBHOOK_SECRET)
                .long(ARG_WEBHOOK_SECRET)
                .help("HS256 secret signing the x-webhook-signature header")
                .env("WARDEN_WEBHOOK_SECRET")
                .hide_env_values(true)
                .requires(ARG_WEBHOOK_URL),
        )
        .arg(
            Arg::new(ARG_WEBHOOK_TIMEOUT)
                .long(ARG_WEBHOOK_TIMEOUT)
                .help("Timeout for one delivery attempt, example: 10s, 1m")
                .env("WARDEN_WEBHOOK_TIMEOUT")
                .default_value("10s")
                .value_parser(ValueParser::from(
                    |value: &str| -> std::result::Result<Duration, String> {
                        humantime::parse_duration(value).map_err(|err| err.to_string())
                    },
                )),
        )
}
