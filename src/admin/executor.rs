//! Audit-logged administrative user mutations.
//!
//! Flow Overview:
//! 1) Load and validate everything that can be checked outside a transaction.
//! 2) Open one storage transaction and apply the field mutations plus exactly
//!    one audit entry.
//! 3) Settle: commit on success, roll back on any error, then classify the
//!    error for the caller.

use std::{net::IpAddr, sync::Arc};

use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    mutation::{hash_blocking, hash_password, MutationContext, MutationPlan, UserMutation},
    params::{parse_ban_duration, validate_email, validate_phone, AdminUserParams},
    password::{generate_password, Argon2Hasher, PasswordHasher},
};
use crate::{
    config::SiteConfig,
    error::{Error, Result},
    models::{merge_metadata, AuditAction, AuditLogEntry, User},
    storage::{ListQuery, UserPage, UserStore, UserTx},
};

const EMAIL_PROVIDER: &str = "email";

/// Runs admin create/update/delete against a [`UserStore`].
pub struct AdminExecutor<S> {
    store: S,
    config: Arc<SiteConfig>,
    hasher: Arc<dyn PasswordHasher>,
}

impl<S: Clone> Clone for AdminExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: Arc::clone(&self.config),
            hasher: Arc::clone(&self.hasher),
        }
    }
}

impl<S: UserStore> AdminExecutor<S> {
    #[must_use]
    pub fn new(store: S, config: Arc<SiteConfig>) -> Self {
        Self {
            store,
            config,
            hasher: Arc::new(Argon2Hasher),
        }
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn context(&self) -> MutationContext {
        MutationContext {
            hasher: Arc::clone(&self.hasher),
            password_min_length: self.config.password_min_length(),
            now: Utc::now(),
        }
    }

    /// Load the target of an admin operation by its path parameter.
    ///
    /// # Errors
    /// `Client` for a malformed id, `NotFound` for an unknown user.
    pub async fn load_user(&self, user_id: &str) -> Result<User> {
        let user_id =
            Uuid::parse_str(user_id.trim()).map_err(|_| Error::client("user_id must be an UUID"))?;
        self.store
            .find_user(self.config.instance_id(), user_id)
            .await
            .map_err(|err| Error::internal("Database error loading user", err))?
            .ok_or_else(|| Error::not_found("User not found"))
    }

    /// # Errors
    /// `Internal` on storage failure.
    pub async fn list(&self, aud: &str, query: &ListQuery) -> Result<UserPage> {
        self.store
            .list_users(self.config.instance_id(), aud, query)
            .await
            .map_err(|err| Error::internal("Database error finding users", err))
    }

    /// Apply the requested changes and record one `user_modified` entry.
    ///
    /// # Errors
    /// Caller errors pass through unchanged; anything else becomes
    /// `Internal` "Error updating user". Nothing is persisted on error.
    pub async fn update(
        &self,
        actor: &User,
        user_id: &str,
        params: AdminUserParams,
        ip_address: Option<IpAddr>,
    ) -> Result<User> {
        let mut user = self.load_user(user_id).await?;
        self.check_identifier_change(&user, &params).await?;

        let instance_id = self.config.instance_id();
        let plan = MutationPlan::for_update(params);
        let ctx = self.context();

        let mut tx = self.begin().await?;
        let result = async {
            plan.apply(&mut tx, &mut user, &ctx).await?;
            let entry = AuditLogEntry::for_target(
                instance_id,
                actor,
                AuditAction::UserModified,
                &user,
                ip_address,
            );
            tx.insert_audit_entry(&entry)
                .await
                .map_err(|err| Error::internal("Error recording audit log entry", err))
        }
        .await;

        settle(tx, result)
            .await
            .map_err(|err| err.classify("Error updating user"))?;

        info!(actor_id = %actor.id, user_id = %user.id, "user updated");
        Ok(user)
    }

    /// Create a user and record one `user_signedup` entry.
    ///
    /// `aud` is the request audience; a non-empty `params.aud` overrides it.
    ///
    /// # Errors
    /// `Client` without email and phone or with a bad ban duration,
    /// `Validation` for malformed or already registered identifiers and short
    /// passwords, `Internal` "Database error creating new user" otherwise.
    pub async fn create(
        &self,
        actor: &User,
        aud: &str,
        params: AdminUserParams,
        ip_address: Option<IpAddr>,
    ) -> Result<User> {
        let instance_id = self.config.instance_id();
        let aud = params
            .aud
            .as_deref()
            .filter(|aud| !aud.is_empty())
            .unwrap_or(aud)
            .to_string();

        let email = params.email.as_deref().map(str::trim).unwrap_or_default();
        let phone = params.phone.as_deref().map(str::trim).unwrap_or_default();
        if email.is_empty() && phone.is_empty() {
            return Err(Error::client(
                "Cannot create a user without either an email or phone",
            ));
        }

        let email = if email.is_empty() {
            String::new()
        } else {
            let email = validate_email(email)?;
            if self.is_duplicated_email(&email, &aud).await? {
                return Err(Error::validation(
                    "Email address already registered by another user",
                ));
            }
            email
        };

        let phone = if phone.is_empty() {
            String::new()
        } else {
            let phone = validate_phone(phone)?;
            if self.is_duplicated_phone(&phone, &aud).await? {
                return Err(Error::validation(
                    "Phone number already registered by another user",
                ));
            }
            phone
        };

        let ctx = self.context();
        let banned_until = match params.ban_duration.as_deref() {
            Some(duration) => parse_ban_duration(duration, ctx.now)?,
            None => None,
        };

        let supplied = params
            .password
            .filter(|password| !password.expose_secret().is_empty());
        let encrypted_password = match supplied {
            Some(password) => hash_password(password, &ctx).await?,
            None => {
                let generated = generate_password()
                    .map_err(|err| Error::internal("Error generating password", err))?;
                hash_blocking(&self.hasher, generated).await?
            }
        };

        let mut user = User::new(
            instance_id,
            &aud,
            &email,
            &phone,
            encrypted_password,
            params.user_metadata,
        );
        user.banned_until = banned_until;
        user.app_metadata
            .insert("provider".into(), Value::String(EMAIL_PROVIDER.into()));
        user.app_metadata
            .insert("providers".into(), json!([EMAIL_PROVIDER]));
        if let Some(app_metadata) = params.app_metadata {
            merge_metadata(&mut user.app_metadata, app_metadata);
        }

        let role = params
            .role
            .filter(|role| !role.is_empty())
            .unwrap_or_else(|| self.config.default_role().to_string());
        let plan = MutationPlan::new()
            .with(UserMutation::SetRole(role))
            .with_if(params.email_confirm, UserMutation::ConfirmEmail)
            .with_if(params.phone_confirm, UserMutation::ConfirmPhone);

        let mut tx = self.begin().await?;
        let result = async {
            let entry = AuditLogEntry::for_target(
                instance_id,
                actor,
                AuditAction::UserSignedUp,
                &user,
                ip_address,
            );
            tx.insert_audit_entry(&entry)
                .await
                .map_err(|err| Error::internal("Error recording audit log entry", err))?;
            tx.insert_user(&user)
                .await
                .map_err(|err| Error::internal("Database error saving new user", err))?;
            plan.apply(&mut tx, &mut user, &ctx).await
        }
        .await;

        settle(tx, result)
            .await
            .map_err(|err| err.classify("Database error creating new user"))?;

        info!(actor_id = %actor.id, user_id = %user.id, aud = %user.aud, "user created");
        Ok(user)
    }

    /// Record one `user_deleted` entry, then delete the row. The deleted user
    /// is returned as it was before removal.
    ///
    /// # Errors
    /// `Internal` "Error recording audit log entry" if the audit insert fails
    /// (the user is kept), `Internal` "Database error deleting user" if the
    /// delete itself fails.
    pub async fn delete(
        &self,
        actor: &User,
        user_id: &str,
        ip_address: Option<IpAddr>,
    ) -> Result<User> {
        let user = self.load_user(user_id).await?;
        let entry = AuditLogEntry::for_target(
            self.config.instance_id(),
            actor,
            AuditAction::UserDeleted,
            &user,
            ip_address,
        );

        let mut tx = self.begin().await?;
        let result = async {
            tx.insert_audit_entry(&entry)
                .await
                .map_err(|err| Error::internal("Error recording audit log entry", err))?;
            tx.delete_user(user.id)
                .await
                .map_err(|err| Error::internal("Database error deleting user", err))
        }
        .await;

        settle(tx, result).await?;

        info!(actor_id = %actor.id, user_id = %user.id, "user deleted");
        Ok(user)
    }

    /// Reject an email or phone change that collides with another user.
    async fn check_identifier_change(&self, user: &User, params: &AdminUserParams) -> Result<()> {
        if let Some(email) = params.email.as_deref().filter(|email| !email.is_empty()) {
            let email = validate_email(email)?;
            let unchanged = user
                .email
                .as_deref()
                .is_some_and(|current| current.eq_ignore_ascii_case(&email));
            if !unchanged && self.is_duplicated_email(&email, &user.aud).await? {
                return Err(Error::validation(
                    "Email address already registered by another user",
                ));
            }
        }

        if let Some(phone) = params.phone.as_deref().filter(|phone| !phone.is_empty()) {
            let phone = validate_phone(phone)?;
            let unchanged = user.phone.as_deref() == Some(phone.as_str());
            if !unchanged && self.is_duplicated_phone(&phone, &user.aud).await? {
                return Err(Error::validation(
                    "Phone number already registered by another user",
                ));
            }
        }

        Ok(())
    }

    async fn is_duplicated_email(&self, email: &str, aud: &str) -> Result<bool> {
        self.store
            .is_duplicated_email(self.config.instance_id(), email, aud)
            .await
            .map_err(|err| Error::internal("Database error checking email", err))
    }

    async fn is_duplicated_phone(&self, phone: &str, aud: &str) -> Result<bool> {
        self.store
            .is_duplicated_phone(self.config.instance_id(), phone, aud)
            .await
            .map_err(|err| Error::internal("Database error checking phone", err))
    }

    async fn begin(&self) -> Result<S::Tx> {
        self.store
            .begin()
            .await
            .map_err(|err| Error::internal("Database error starting transaction", err))
    }
}

/// Commit when `result` is `Ok`, roll back otherwise. A failed rollback is
/// logged; the original error is what the caller sees.
///
/// # Errors
/// Returns the original error, or `Internal` if the commit fails.
pub async fn settle<T: UserTx, R>(tx: T, result: Result<R>) -> Result<R> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|err| Error::internal("Database error committing transaction", err))?;
            Ok(value)
        }
        Err(err) => {
            debug!(error = %err, "rolling back transaction");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = ?rollback_err, "failed to roll back transaction");
            }
            Err(err)
        }
    }
}
