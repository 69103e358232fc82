//! Ordered field mutations applied to a user inside an open transaction.
//!
//! A [`MutationPlan`] is built from the request up front and then replayed
//! against the storage transaction one command at a time. The first failing
//! command stops the plan; the caller is expected to roll back.

use anyhow::Context;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use super::{
    params::{parse_ban_duration, validate_email, validate_phone, AdminUserParams},
    password::PasswordHasher,
};
use crate::{
    error::{Error, Result},
    models::{Metadata, User},
    storage::{UserChange, UserTx},
};

/// One field-level change requested by an administrator.
#[derive(Debug)]
pub enum UserMutation {
    SetRole(String),
    ConfirmEmail,
    ConfirmPhone,
    SetPassword(SecretString),
    SetEmail(String),
    SetPhone(String),
    UpdateAppMetadata(Metadata),
    UpdateUserMetadata(Metadata),
    SetBan(String),
}

/// What a mutation needs besides the current row.
#[derive(Clone)]
pub struct MutationContext {
    pub hasher: Arc<dyn PasswordHasher>,
    pub password_min_length: usize,
    pub now: DateTime<Utc>,
}

impl UserMutation {
    /// Resolve into the concrete column change for `user`.
    async fn resolve(self, user: &User, ctx: &MutationContext) -> Result<UserChange> {
        let change = match self {
            Self::SetRole(role) => UserChange::Role(role),
            Self::ConfirmEmail => UserChange::EmailConfirmedAt(ctx.now),
            Self::ConfirmPhone => UserChange::PhoneConfirmedAt(ctx.now),
            Self::SetPassword(password) => {
                UserChange::EncryptedPassword(hash_password(password, ctx).await?)
            }
            Self::SetEmail(email) => UserChange::Email(validate_email(&email)?),
            Self::SetPhone(phone) => UserChange::Phone(validate_phone(&phone)?),
            Self::UpdateAppMetadata(updates) => UserChange::merged_app_metadata(user, updates),
            Self::UpdateUserMetadata(updates) => UserChange::merged_user_metadata(user, updates),
            Self::SetBan(duration) => UserChange::BannedUntil(parse_ban_duration(&duration, ctx.now)?),
        };
        Ok(change)
    }
}

/// Check the minimum length (in characters) and hash off the async runtime.
///
/// # Errors
/// `Validation` for short passwords, `Internal` when hashing fails.
pub async fn hash_password(password: SecretString, ctx: &MutationContext) -> Result<String> {
    let min = ctx.password_min_length;
    if password.expose_secret().chars().count() < min {
        return Err(Error::validation(format!(
            "Password should be at least {min} characters"
        )));
    }

    hash_blocking(&ctx.hasher, password).await
}

/// Hash without the length policy, on the blocking pool.
///
/// # Errors
/// `Internal` when hashing fails.
pub async fn hash_blocking(hasher: &Arc<dyn PasswordHasher>, password: SecretString) -> Result<String> {
    let hasher = Arc::clone(hasher);
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .context("password hashing task failed")
        .and_then(|result| result)
        .map_err(|err| Error::internal("Error hashing password", err))
}

#[derive(Debug, Default)]
pub struct MutationPlan {
    mutations: Vec<UserMutation>,
}

impl MutationPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, mutation: UserMutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    #[must_use]
    pub fn with_if(self, condition: bool, mutation: UserMutation) -> Self {
        if condition {
            self.with(mutation)
        } else {
            self
        }
    }

    /// Commands for an admin update, in their fixed order: role, email
    /// confirmation, phone confirmation, password, email, phone, app metadata,
    /// user metadata, ban.
    #[must_use]
    pub fn for_update(params: AdminUserParams) -> Self {
        let mut plan = Self::new();
        if let Some(role) = params.role.filter(|role| !role.is_empty()) {
            plan = plan.with(UserMutation::SetRole(role));
        }
        plan = plan
            .with_if(params.email_confirm, UserMutation::ConfirmEmail)
            .with_if(params.phone_confirm, UserMutation::ConfirmPhone);
        if let Some(password) = params.password {
            plan = plan.with(UserMutation::SetPassword(password));
        }
        if let Some(email) = params.email.filter(|email| !email.is_empty()) {
            plan = plan.with(UserMutation::SetEmail(email));
        }
        if let Some(phone) = params.phone.filter(|phone| !phone.is_empty()) {
            plan = plan.with(UserMutation::SetPhone(phone));
        }
        if let Some(metadata) = params.app_metadata {
            plan = plan.with(UserMutation::UpdateAppMetadata(metadata));
        }
        if let Some(metadata) = params.user_metadata {
            plan = plan.with(UserMutation::UpdateUserMetadata(metadata));
        }
        if let Some(duration) = params.ban_duration {
            plan = plan.with(UserMutation::SetBan(duration));
        }
        plan
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Apply every command in order, keeping `user` in sync with the row.
    ///
    /// # Errors
    /// Stops at the first failing command. Caller errors pass through; storage
    /// failures are `Internal`.
    pub async fn apply<T: UserTx>(
        self,
        tx: &mut T,
        user: &mut User,
        ctx: &MutationContext,
    ) -> Result<()> {
        for mutation in self.mutations {
            let change = mutation.resolve(user, ctx).await?;
            tx.update_user(user.id, &change)
                .await
                .map_err(|err| Error::internal("Database error updating user", err))?;
            change.apply_to(user);
        }
        Ok(())
    }
}
