use anyhow::Context;
use axum::http::HeaderName;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_AUD: &str = "jwt-aud";
pub const ARG_ADMIN_ROLE: &str = "admin-role";
pub const ARG_DEFAULT_ROLE: &str = "default-role";
pub const ARG_PASSWORD_MIN_LENGTH: &str = "password-min-length";
pub const ARG_AUD_HEADER: &str = "aud-header";

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub default_audience: String,
    pub admin_role: String,
    pub default_role: String,
    pub password_min_length: usize,
    pub aud_header: HeaderName,
}

impl Options {
    /// Parse token and admin arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the secret is missing or the header name is invalid.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("missing required argument: --{id}"))
        };

        let aud_header = get(ARG_AUD_HEADER)?;

        Ok(Self {
            jwt_secret: SecretString::from(get(ARG_JWT_SECRET)?),
            default_audience: get(ARG_JWT_AUD)?,
            admin_role: get(ARG_ADMIN_ROLE)?,
            default_role: get(ARG_DEFAULT_ROLE)?,
            password_min_length: matches
                .get_one::<usize>(ARG_PASSWORD_MIN_LENGTH)
                .copied()
                .unwrap_or(6),
            aud_header: HeaderName::try_from(aud_header.as_str())
                .with_context(|| format!("invalid audience header name: {aud_header}"))?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HS256 secret used to verify bearer tokens")
                .env("WARDEN_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_AUD)
                .long(ARG_JWT_AUD)
                .help("Default audience")
                .env("WARDEN_JWT_AUD")
                .default_value("authenticated"),
        )
        .arg(
            Arg::new(ARG_ADMIN_ROLE)
                .long(ARG_ADMIN_ROLE)
                .help("Role that administers its own audience")
                .env("WARDEN_ADMIN_ROLE")
                .default_value("admin"),
        )
        .arg(
            Arg::new(ARG_DEFAULT_ROLE)
                .long(ARG_DEFAULT_ROLE)
                .help("Role assigned to users created without one")
                .env("WARDEN_DEFAULT_ROLE")
                .default_value("authenticated"),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MIN_LENGTH)
                .long(ARG_PASSWORD_MIN_LENGTH)
                .help("Minimum password length in characters")
                .env("WARDEN_PASSWORD_MIN_LENGTH")
                .default_value("6")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_AUD_HEADER)
                .long(ARG_AUD_HEADER)
                .help("Request header that overrides the token audience")
                .env("WARDEN_AUD_HEADER")
                .default_value("x-jwt-aud"),
        )
}
