//! Transactional storage collaborator for users and audit entries.
//!
//! The admin executor only talks to [`UserStore`] and [`UserTx`]. Two backends
//! exist: Postgres for real deployments and an in-process store for local
//! development (`memory://`) and tests.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::future::Future;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::UserLookup,
    error::Error,
    models::{merge_metadata, AuditLogEntry, Metadata, User},
};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, MemoryTx};
pub use postgres::{PgStore, PgTx};

const DEFAULT_PER_PAGE: u64 = 50;
const MAX_PER_PAGE: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::internal("Database error", err)
    }
}

/// A single persisted column change on a user row.
#[derive(Clone, Debug, PartialEq)]
pub enum UserChange {
    Role(String),
    EmailConfirmedAt(DateTime<Utc>),
    PhoneConfirmedAt(DateTime<Utc>),
    EncryptedPassword(String),
    Email(String),
    Phone(String),
    AppMetadata(Metadata),
    UserMetadata(Metadata),
    BannedUntil(Option<DateTime<Utc>>),
}

impl UserChange {
    /// Mirror the change on an in-memory copy of the row. Metadata variants
    /// carry the already-merged map.
    pub fn apply_to(&self, user: &mut User) {
        match self {
            Self::Role(role) => user.role.clone_from(role),
            Self::EmailConfirmedAt(at) => user.email_confirmed_at = Some(*at),
            Self::PhoneConfirmedAt(at) => user.phone_confirmed_at = Some(*at),
            Self::EncryptedPassword(hash) => user.encrypted_password.clone_from(hash),
            Self::Email(email) => user.email = Some(email.clone()),
            Self::Phone(phone) => user.phone = Some(phone.clone()),
            Self::AppMetadata(metadata) => user.app_metadata.clone_from(metadata),
            Self::UserMetadata(metadata) => user.user_metadata.clone_from(metadata),
            Self::BannedUntil(until) => user.banned_until = *until,
        }
        user.updated_at = Utc::now();
    }

    /// Merge `updates` into the current app metadata of `user`.
    #[must_use]
    pub fn merged_app_metadata(user: &User, updates: Metadata) -> Self {
        let mut merged = user.app_metadata.clone();
        merge_metadata(&mut merged, updates);
        Self::AppMetadata(merged)
    }

    /// Merge `updates` into the current user metadata of `user`.
    #[must_use]
    pub fn merged_user_metadata(user: &User, updates: Metadata) -> Self {
        let mut merged = user.user_metadata.clone();
        merge_metadata(&mut merged, updates);
        Self::UserMetadata(merged)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Page/sort/filter parameters for listing users.
#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// 1-based page number.
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// `created_at` direction: `asc` or `desc` (default).
    #[param(value_type = Option<String>)]
    pub sort: Option<SortDirection>,
    /// Case-insensitive match on email or `full_name` metadata.
    pub filter: Option<String>,
}

impl ListQuery {
    #[must_use]
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    #[must_use]
    pub fn per_page(&self) -> u64 {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        (self.page() - 1).saturating_mul(self.per_page())
    }

    #[must_use]
    pub fn sort(&self) -> SortDirection {
        self.sort.unwrap_or_default()
    }

    #[must_use]
    pub fn filter(&self) -> Option<&str> {
        self.filter
            .as_deref()
            .map(str::trim)
            .filter(|filter| !filter.is_empty())
    }
}

#[derive(Clone, Debug, Default)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: u64,
}

/// Storage engine exposing reads plus a transaction primitive.
pub trait UserStore: UserLookup + 'static {
    type Tx: UserTx;

    fn list_users(
        &self,
        instance_id: Uuid,
        aud: &str,
        query: &ListQuery,
    ) -> impl Future<Output = Result<UserPage, StoreError>> + Send;

    fn is_duplicated_email(
        &self,
        instance_id: Uuid,
        email: &str,
        aud: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn is_duplicated_phone(
        &self,
        instance_id: Uuid,
        phone: &str,
        aud: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;
}

/// One open transaction. Dropping it without `commit` discards every write.
pub trait UserTx: Send {
    fn insert_audit_entry(
        &mut self,
        entry: &AuditLogEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn insert_user(&mut self, user: &User) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_user(
        &mut self,
        user_id: Uuid,
        change: &UserChange,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_user(&mut self, user_id: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Storage selected at startup from the DSN scheme.
#[derive(Clone, Debug)]
pub enum Backend {
    Postgres(PgStore),
    Memory(MemoryStore),
}

impl Backend {
    /// Connect to `postgres://` / `postgresql://` DSNs or open an in-process
    /// store for `memory://`.
    ///
    /// # Errors
    /// Returns an error for unsupported schemes or failed connections.
    pub async fn connect(dsn: &str) -> anyhow::Result<Self> {
        let scheme = dsn.split_once("://").map(|(scheme, _)| scheme);
        match scheme {
            Some("postgres" | "postgresql") => Ok(Self::Postgres(
                PgStore::connect(dsn)
                    .await
                    .context("Failed to connect to database")?,
            )),
            Some("memory") => Ok(Self::Memory(MemoryStore::new())),
            _ => Err(anyhow!("unsupported DSN scheme, expected postgres:// or memory://")),
        }
    }
}

pub enum BackendTx {
    Postgres(PgTx),
    Memory(MemoryTx),
}

impl UserLookup for Backend {
    async fn find_user(&self, instance_id: Uuid, user_id: Uuid) -> Result<Option<User>, StoreError> {
        match self {
            Self::Postgres(store) => store.find_user(instance_id, user_id).await,
            Self::Memory(store) => store.find_user(instance_id, user_id).await,
        }
    }
}

impl UserStore for Backend {
    type Tx = BackendTx;

    async fn list_users(
        &self,
        instance_id: Uuid,
        aud: &str,
        query: &ListQuery,
    ) -> Result<UserPage, StoreError> {
        match self {
            Self::Postgres(store) => store.list_users(instance_id, aud, query).await,
            Self::Memory(store) => store.list_users(instance_id, aud, query).await,
        }
    }

    async fn is_duplicated_email(
        &self,
        instance_id: Uuid,
        email: &str,
        aud: &str,
    ) -> Result<bool, StoreError> {
        match self {
            Self::Postgres(store) => store.is_duplicated_email(instance_id, email, aud).await,
            Self::Memory(store) => store.is_duplicated_email(instance_id, email, aud).await,
        }
    }

    async fn is_duplicated_phone(
        &self,
        instance_id: Uuid,
        phone: &str,
        aud: &str,
    ) -> Result<bool, StoreError> {
        match self {
            Self::Postgres(store) => store.is_duplicated_phone(instance_id, phone, aud).await,
            Self::Memory(store) => store.is_duplicated_phone(instance_id, phone, aud).await,
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::Postgres(store) => store.ping().await,
            Self::Memory(store) => store.ping().await,
        }
    }

    async fn begin(&self) -> Result<BackendTx, StoreError> {
        match self {
            Self::Postgres(store) => Ok(BackendTx::Postgres(store.begin().await?)),
            Self::Memory(store) => Ok(BackendTx::Memory(store.begin().await?)),
        }
    }
}

impl UserTx for BackendTx {
    async fn insert_audit_entry(&mut self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => tx.insert_audit_entry(entry).await,
            Self::Memory(tx) => tx.insert_audit_entry(entry).await,
        }
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => tx.insert_user(user).await,
            Self::Memory(tx) => tx.insert_user(user).await,
        }
    }

    async fn update_user(&mut self, user_id: Uuid, change: &UserChange) -> Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => tx.update_user(user_id, change).await,
            Self::Memory(tx) => tx.update_user(user_id, change).await,
        }
    }

    async fn delete_user(&mut self, user_id: Uuid) -> Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => tx.delete_user(user_id).await,
            Self::Memory(tx) => tx.delete_user(user_id).await,
        }
    }

    async fn commit(self) -> Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => tx.commit().await,
            Self::Memory(tx) => tx.commit().await,
        }
    }

    async fn rollback(self) -> Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => tx.rollback().await,
            Self::Memory(tx) => tx.rollback().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_query_defaults_and_bounds() {
        let query = ListQuery::default();
        assert_eq!(query.page(), 1);
        assert_eq!(query.per_page(), DEFAULT_PER_PAGE);
        assert_eq!(query.offset(), 0);
        assert_eq!(query.sort(), SortDirection::Desc);
        assert_eq!(query.filter(), None);

        let query = ListQuery {
            page: Some(0),
            per_page: Some(100_000),
            sort: Some(SortDirection::Asc),
            filter: Some("  ".into()),
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.per_page(), MAX_PER_PAGE);
        assert_eq!(query.filter(), None);

        let query = ListQuery {
            page: Some(3),
            per_page: Some(20),
            ..ListQuery::default()
        };
        assert_eq!(query.offset(), 40);
    }

    #[test]
    fn metadata_changes_merge_into_current_values() {
        let mut user = User::new(Uuid::nil(), "aud", "a@example.com", "", String::new(), None);
        user.app_metadata.insert("provider".into(), json!("email"));
        let updates = json!({"plan": "pro"}).as_object().cloned().unwrap_or_default();

        let change = UserChange::merged_app_metadata(&user, updates);
        change.apply_to(&mut user);
        assert_eq!(user.app_metadata.get("provider"), Some(&json!("email")));
        assert_eq!(user.app_metadata.get("plan"), Some(&json!("pro")));
    }

    #[test]
    fn store_errors_become_internal() {
        let err: Error = StoreError::Conflict("users_email_key".into()).into();
        assert!(!err.is_caller_error());
        assert_eq!(err.to_string(), "Database error");
    }

    #[tokio::test]
    async fn connect_rejects_unknown_scheme() {
        assert!(Backend::connect("mysql://localhost/db").await.is_err());
        assert!(matches!(
            Backend::connect("memory://").await,
            Ok(Backend::Memory(_))
        ));
    }
}
