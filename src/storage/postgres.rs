//! Postgres backend.
//!
//! Every statement runs inside a `db.query` span. Unique-index violations are
//! surfaced as [`StoreError::Conflict`] so callers can tell them apart from
//! other failures.

use anyhow::Context;
use ipnetwork::IpNetwork;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    Connection, PgPool, Postgres, Row, Transaction,
};
use std::time::Duration;
use tracing::{Instrument, Span};
use uuid::Uuid;

use super::{ListQuery, SortDirection, StoreError, UserChange, UserPage, UserStore, UserTx};
use crate::{
    auth::UserLookup,
    models::{AuditLogEntry, Metadata, User},
};

const USER_COLUMNS: &str = r"
    id, instance_id, aud, role, email, phone, encrypted_password,
    email_confirmed_at, phone_confirmed_at, last_sign_in_at,
    raw_app_meta_data, raw_user_meta_data, is_super_admin, banned_until,
    created_at, updated_at
";

/// Substring pattern for `ILIKE .. ESCAPE '\'` with the filter taken literally.
fn like_pattern(filter: &str) -> String {
    let mut pattern = String::with_capacity(filter.len() + 2);
    pattern.push('%');
    for c in filter.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn write_error(err: sqlx::Error, context: &'static str) -> StoreError {
    if is_unique_violation(&err) {
        let constraint = match &err {
            sqlx::Error::Database(db_err) => db_err.constraint().unwrap_or("unknown").to_string(),
            _ => String::from("unknown"),
        };
        return StoreError::Conflict(constraint);
    }
    StoreError::Backend(anyhow::Error::new(err).context(context))
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let app_metadata: Option<Json<Metadata>> = row.try_get("raw_app_meta_data")?;
    let user_metadata: Option<Json<Metadata>> = row.try_get("raw_user_meta_data")?;
    Ok(User {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        aud: row.try_get("aud")?,
        role: row.try_get("role")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        encrypted_password: row.try_get("encrypted_password")?,
        email_confirmed_at: row.try_get("email_confirmed_at")?,
        phone_confirmed_at: row.try_get("phone_confirmed_at")?,
        last_sign_in_at: row.try_get("last_sign_in_at")?,
        app_metadata: app_metadata.map(|json| json.0).unwrap_or_default(),
        user_metadata: user_metadata.map(|json| json.0).unwrap_or_default(),
        is_super_admin: row.try_get("is_super_admin")?,
        banned_until: row.try_get("banned_until")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    /// Returns an error if the pool cannot be created.
    pub async fn connect(dsn: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    async fn exists(&self, query: &str, instance_id: Uuid, value: &str, aud: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(query)
            .bind(instance_id)
            .bind(value)
            .bind(aud)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to check for duplicate user")?;
        Ok(row.is_some())
    }
}

impl UserLookup for PgStore {
    async fn find_user(&self, instance_id: Uuid, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE instance_id = $1 AND id = $2 LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(instance_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to load user")?;
        row.as_ref()
            .map(user_from_row)
            .transpose()
            .context("failed to decode user row")
            .map_err(StoreError::from)
    }
}

impl UserStore for PgStore {
    type Tx = PgTx;

    async fn list_users(
        &self,
        instance_id: Uuid,
        aud: &str,
        query: &ListQuery,
    ) -> Result<UserPage, StoreError> {
        let order = match query.sort() {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let pattern = query.filter().map(like_pattern);
        let filter_clause = r"
            instance_id = $1 AND aud = $2
            AND ($3::text IS NULL OR email ILIKE $3 ESCAPE '\' OR raw_user_meta_data->>'full_name' ILIKE $3 ESCAPE '\')
        ";

        let count_query = format!("SELECT COUNT(*) AS count FROM users WHERE {filter_clause}");
        let total: i64 = sqlx::query(&count_query)
            .bind(instance_id)
            .bind(aud)
            .bind(pattern.as_deref())
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", &count_query))
            .await
            .context("failed to count users")?
            .get("count");

        let list_query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {filter_clause} ORDER BY created_at {order} LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(&list_query)
            .bind(instance_id)
            .bind(aud)
            .bind(pattern.as_deref())
            .bind(i64::try_from(query.per_page()).unwrap_or(i64::MAX))
            .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &list_query))
            .await
            .context("failed to list users")?;

        let users = rows
            .iter()
            .map(user_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("failed to decode user row")?;

        Ok(UserPage {
            users,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn is_duplicated_email(
        &self,
        instance_id: Uuid,
        email: &str,
        aud: &str,
    ) -> Result<bool, StoreError> {
        let query = r"
            SELECT 1 FROM users
            WHERE instance_id = $1 AND LOWER(email) = LOWER($2) AND aud = $3
            LIMIT 1
        ";
        self.exists(query, instance_id, email, aud).await
    }

    async fn is_duplicated_phone(
        &self,
        instance_id: Uuid,
        phone: &str,
        aud: &str,
    ) -> Result<bool, StoreError> {
        let query = r"
            SELECT 1 FROM users
            WHERE instance_id = $1 AND phone = $2 AND aud = $3
            LIMIT 1
        ";
        self.exists(query, instance_id, phone, aud).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(tracing::info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            ))
            .await
            .context("failed to acquire database connection")?;
        conn.ping()
            .instrument(tracing::info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await
            .context("failed to ping database")?;
        Ok(())
    }

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;
        Ok(PgTx { tx })
    }
}

/// Open Postgres transaction. sqlx rolls back on drop if never committed.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl UserTx for PgTx {
    async fn insert_audit_entry(&mut self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO audit_log_entries (id, instance_id, actor_id, action, payload, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        sqlx::query(query)
            .bind(entry.id)
            .bind(entry.instance_id)
            .bind(entry.actor_id)
            .bind(entry.action.as_str())
            .bind(Json(entry.payload()))
            .bind(entry.ip_address.map(IpNetwork::from))
            .bind(entry.created_at)
            .execute(&mut *self.tx)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| write_error(err, "failed to insert audit log entry"))?;
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO users (
                id, instance_id, aud, role, email, phone, encrypted_password,
                email_confirmed_at, phone_confirmed_at, last_sign_in_at,
                raw_app_meta_data, raw_user_meta_data, is_super_admin, banned_until,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ";
        sqlx::query(query)
            .bind(user.id)
            .bind(user.instance_id)
            .bind(&user.aud)
            .bind(&user.role)
            .bind(user.email.as_deref())
            .bind(user.phone.as_deref())
            .bind(&user.encrypted_password)
            .bind(user.email_confirmed_at)
            .bind(user.phone_confirmed_at)
            .bind(user.last_sign_in_at)
            .bind(Json(&user.app_metadata))
            .bind(Json(&user.user_metadata))
            .bind(user.is_super_admin)
            .bind(user.banned_until)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&mut *self.tx)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| write_error(err, "failed to insert user"))?;
        Ok(())
    }

    async fn update_user(&mut self, user_id: Uuid, change: &UserChange) -> Result<(), StoreError> {
        let query = match change {
            UserChange::Role(_) => "UPDATE users SET role = $1, updated_at = NOW() WHERE id = $2",
            UserChange::EmailConfirmedAt(_) => {
                "UPDATE users SET email_confirmed_at = $1, updated_at = NOW() WHERE id = $2"
            }
            UserChange::PhoneConfirmedAt(_) => {
                "UPDATE users SET phone_confirmed_at = $1, updated_at = NOW() WHERE id = $2"
            }
            UserChange::EncryptedPassword(_) => {
                "UPDATE users SET encrypted_password = $1, updated_at = NOW() WHERE id = $2"
            }
            UserChange::Email(_) => "UPDATE users SET email = $1, updated_at = NOW() WHERE id = $2",
            UserChange::Phone(_) => "UPDATE users SET phone = $1, updated_at = NOW() WHERE id = $2",
            UserChange::AppMetadata(_) => {
                "UPDATE users SET raw_app_meta_data = $1, updated_at = NOW() WHERE id = $2"
            }
            UserChange::UserMetadata(_) => {
                "UPDATE users SET raw_user_meta_data = $1, updated_at = NOW() WHERE id = $2"
            }
            UserChange::BannedUntil(_) => {
                "UPDATE users SET banned_until = $1, updated_at = NOW() WHERE id = $2"
            }
        };

        let statement = sqlx::query(query);
        let statement = match change {
            UserChange::Role(value)
            | UserChange::EncryptedPassword(value)
            | UserChange::Email(value)
            | UserChange::Phone(value) => statement.bind(value),
            UserChange::EmailConfirmedAt(at) | UserChange::PhoneConfirmedAt(at) => statement.bind(*at),
            UserChange::AppMetadata(metadata) | UserChange::UserMetadata(metadata) => {
                statement.bind(Json(metadata))
            }
            UserChange::BannedUntil(until) => statement.bind(*until),
        };

        let result = statement
            .bind(user_id)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(|err| write_error(err, "failed to update user"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_user(&mut self, user_id: Uuid) -> Result<(), StoreError> {
        let query = "DELETE FROM users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&mut *self.tx)
            .instrument(db_span("DELETE", query))
            .await
            .map_err(|err| write_error(err, "failed to delete user"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .context("failed to commit transaction")?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .context("failed to rollback transaction")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("example"), "%example%");
        assert_eq!(like_pattern("100%_off"), "%100\\%\\_off%");
        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }
}
