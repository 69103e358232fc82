use serde::{Deserialize, Serialize};

use crate::models::{SYSTEM_USER_ID, SYSTEM_USER_UUID};

/// Verified token claims. Built once per request by the bearer middleware and
/// handed explicitly to whatever needs them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    #[must_use]
    pub fn new(sub: impl Into<String>, aud: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            aud: aud.into(),
            scope: None,
            exp: None,
        }
    }

    /// Whether the subject is the reserved service identity.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.sub == SYSTEM_USER_ID || self.sub == SYSTEM_USER_UUID.to_string()
    }
}
