use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use super::user::{Metadata, User};

/// Kind of administrative or account action recorded in the audit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "user_signedup")]
    UserSignedUp,
    #[serde(rename = "user_modified")]
    UserModified,
    #[serde(rename = "user_deleted")]
    UserDeleted,
    #[serde(rename = "user_invited")]
    UserInvited,
    #[serde(rename = "invite_accepted")]
    InviteAccepted,
    #[serde(rename = "user_recovery_requested")]
    UserRecoveryRequested,
    #[serde(rename = "login")]
    Login,
    #[serde(rename = "logout")]
    Logout,
    #[serde(rename = "token_revoked")]
    TokenRevoked,
    #[serde(rename = "token_refreshed")]
    TokenRefreshed,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserSignedUp => "user_signedup",
            Self::UserModified => "user_modified",
            Self::UserDeleted => "user_deleted",
            Self::UserInvited => "user_invited",
            Self::InviteAccepted => "invite_accepted",
            Self::UserRecoveryRequested => "user_recovery_requested",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::TokenRevoked => "token_revoked",
            Self::TokenRefreshed => "token_refreshed",
        }
    }

    /// Coarse grouping used when filtering the log.
    #[must_use]
    pub const fn log_type(self) -> &'static str {
        match self {
            Self::UserSignedUp | Self::UserModified | Self::UserDeleted | Self::UserInvited => {
                "team"
            }
            Self::InviteAccepted | Self::Login | Self::Logout => "account",
            Self::UserRecoveryRequested => "user",
            Self::TokenRevoked | Self::TokenRefreshed => "token",
        }
    }
}

/// Immutable record of an action. Inserted once, never updated.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub actor_id: Uuid,
    pub actor_email: Option<String>,
    pub action: AuditAction,
    pub traits: Metadata,
    pub ip_address: Option<IpAddr>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    #[must_use]
    pub fn new(
        instance_id: Uuid,
        actor: &User,
        action: AuditAction,
        traits: Metadata,
        ip_address: Option<IpAddr>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            actor_id: actor.id,
            actor_email: actor.email.clone(),
            action,
            traits,
            ip_address,
            created_at: Utc::now(),
        }
    }

    /// Entry describing `action` taken by `actor` on `target`.
    #[must_use]
    pub fn for_target(
        instance_id: Uuid,
        actor: &User,
        action: AuditAction,
        target: &User,
        ip_address: Option<IpAddr>,
    ) -> Self {
        Self::new(instance_id, actor, action, target.audit_traits(), ip_address)
    }

    /// JSON payload persisted with the entry.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "actor_id": self.actor_id,
            "actor_username": self.actor_email.clone().unwrap_or_default(),
            "action": self.action.as_str(),
            "log_type": self.action.log_type(),
            "traits": self.traits,
        })
    }
}
