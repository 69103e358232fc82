//! Persisted multi-factor records.
//!
//! Only the ownership rules live here; challenge and verification flows are
//! handled elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorType {
    Totp,
    Webauthn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorStatus {
    Unverified,
    Verified,
}

/// A second factor. Belongs to exactly one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub id: Uuid,
    pub user_id: Uuid,
    pub friendly_name: Option<String>,
    pub factor_type: FactorType,
    pub status: FactorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Factor {
    #[must_use]
    pub fn new(user_id: Uuid, factor_type: FactorType, friendly_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            friendly_name,
            factor_type,
            status: FactorStatus::Unverified,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A challenge issued against exactly one factor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub factor_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl Challenge {
    #[must_use]
    pub fn new(factor: &Factor) -> Self {
        Self {
            id: Uuid::new_v4(),
            factor_id: factor.id,
            created_at: Utc::now(),
            verified_at: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("recovery code already used")]
pub struct RecoveryCodeUsed;

/// Single-use backup code. `valid` and `time_used` move together exactly once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryCode {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub valid: bool,
    pub time_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RecoveryCode {
    #[must_use]
    pub fn new(user_id: Uuid, code_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            code_hash,
            valid: true,
            time_used: None,
            created_at: Utc::now(),
        }
    }

    /// Mark the code as spent.
    ///
    /// # Errors
    /// Returns [`RecoveryCodeUsed`] if the code was consumed before.
    pub fn consume(&mut self, now: DateTime<Utc>) -> Result<(), RecoveryCodeUsed> {
        if !self.valid || self.time_used.is_some() {
            return Err(RecoveryCodeUsed);
        }
        self.valid = false;
        self.time_used = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_points_at_factor() {
        let user_id = Uuid::new_v4();
        let factor = Factor::new(user_id, FactorType::Totp, Some("phone".into()));
        let challenge = Challenge::new(&factor);
        assert_eq!(factor.user_id, user_id);
        assert_eq!(factor.status, FactorStatus::Unverified);
        assert_eq!(challenge.factor_id, factor.id);
        assert!(challenge.verified_at.is_none());
    }

    #[test]
    fn recovery_code_is_single_use() {
        let mut code = RecoveryCode::new(Uuid::new_v4(), "hash".into());
        let now = Utc::now();
        assert_eq!(code.consume(now), Ok(()));
        assert!(!code.valid);
        assert_eq!(code.time_used, Some(now));
        assert_eq!(code.consume(Utc::now()), Err(RecoveryCodeUsed));
        assert_eq!(code.time_used, Some(now));
    }
}
