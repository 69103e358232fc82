//! Admin request body and input validation.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use utoipa::ToSchema;

use crate::{
    error::{Error, Result},
    models::Metadata,
};

/// Ban value that lifts an existing ban.
pub const BAN_NONE: &str = "none";

/// Body of admin create/update requests. Every field is optional; absent
/// fields leave the stored value untouched.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AdminUserParams {
    pub aud: Option<String>,
    pub role: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "deserialize_secret")]
    #[schema(value_type = Option<String>, format = Password)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub email_confirm: bool,
    #[serde(default)]
    pub phone_confirm: bool,
    #[schema(value_type = Option<Object>)]
    pub user_metadata: Option<Metadata>,
    #[schema(value_type = Option<Object>)]
    pub app_metadata: Option<Metadata>,
    /// Human duration such as `1h`, `30m` or `2days`; `none` lifts the ban.
    pub ban_duration: Option<String>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Translate a ban duration into the new `banned_until` value.
///
/// `"none"` yields `None` (no ban). Anything else is parsed as a positive human
/// duration and added to `now`.
///
/// # Errors
/// `Client` when the value cannot be parsed.
pub fn parse_ban_duration(value: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let value = value.trim();
    if value == BAN_NONE {
        return Ok(None);
    }

    let invalid = || Error::client(format!("Invalid format for ban_duration: {value}"));
    let duration = humantime::parse_duration(value).map_err(|_| invalid())?;
    let duration = Duration::from_std(duration).map_err(|_| invalid())?;
    now.checked_add_signed(duration).map(Some).ok_or_else(invalid)
}

/// Lightweight email sanity check.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// # Errors
/// `Validation` when the address is not `local@domain.tld` shaped.
pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim();
    if valid_email(email) {
        Ok(email.to_string())
    } else {
        Err(Error::validation(
            "Unable to validate email address: invalid format",
        ))
    }
}

/// Strip formatting (`+`, spaces, dashes, parentheses) and check the result
/// looks like an E.164 number.
///
/// # Errors
/// `Validation` when the digits do not form a plausible number.
pub fn validate_phone(phone: &str) -> Result<String> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    let only_formatting = phone
        .chars()
        .all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | ' ' | '-' | '(' | ')' | '.'));
    if only_formatting && Regex::new(r"^[1-9]\d{1,14}$").is_ok_and(|re| re.is_match(&digits)) {
        Ok(digits)
    } else {
        Err(Error::validation("Invalid phone number format"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn ban_none_lifts_the_ban() {
        assert_eq!(parse_ban_duration("none", Utc::now()).unwrap(), None);
    }

    #[test]
    fn ban_duration_adds_to_now() {
        let now = Utc::now();
        let until = parse_ban_duration("1h", now).unwrap();
        assert_eq!(until, Some(now + Duration::hours(1)));

        let until = parse_ban_duration("1h30m", now).unwrap();
        assert_eq!(until, Some(now + Duration::minutes(90)));

        let until = parse_ban_duration("2days", now).unwrap();
        assert_eq!(until, Some(now + Duration::days(2)));
    }

    #[test]
    fn ban_duration_rejects_garbage() {
        for value in ["", "forever", "1 fortnight", "-1h"] {
            let err = parse_ban_duration(value, Utc::now()).err();
            assert!(
                matches!(err, Some(Error::Client(ref msg)) if msg.starts_with("Invalid format for ban_duration")),
                "{value:?} should be rejected"
            );
        }
    }

    #[test]
    fn email_shape() {
        assert_eq!(validate_email(" a@example.com ").unwrap(), "a@example.com");
        assert!(matches!(validate_email("nope"), Err(Error::Validation(_))));
        assert!(matches!(validate_email("a@b"), Err(Error::Validation(_))));
    }

    #[test]
    fn phone_is_normalized_to_digits() {
        assert_eq!(validate_phone("+1 (555) 123-4567").unwrap(), "15551234567");
        assert!(validate_phone("0123").is_err());
        assert!(validate_phone("call me").is_err());
        assert!(validate_phone("+1234567890123456").is_err());
    }

    #[test]
    fn params_deserialize_with_secret_password() {
        let params: AdminUserParams = serde_json::from_str(
            r#"{"email": "a@example.com", "password": "hunter22", "email_confirm": true}"#,
        )
        .unwrap();
        assert_eq!(params.email.as_deref(), Some("a@example.com"));
        assert!(params.email_confirm);
        assert!(!params.phone_confirm);
        assert_eq!(
            params.password.as_ref().map(|p| p.expose_secret()),
            Some("hunter22")
        );
        assert!(!format!("{params:?}").contains("hunter22"));
    }
}
