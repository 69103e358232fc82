//! Actor resolution and admin checks.
//!
//! Flow Overview:
//! 1) Take the verified claims as an explicit value (never from ambient state).
//! 2) Map the subject to a user: the system sentinel or a stored user.
//! 3) Decide the request audience and whether the actor administers it.

use axum::http::HeaderMap;
use std::future::Future;
use tracing::debug;
use uuid::Uuid;

use super::claims::Claims;
use crate::{
    config::SiteConfig,
    error::{Error, Result},
    models::User,
    storage::StoreError,
};

/// Narrow lookup used to turn a subject into a stored user.
pub trait UserLookup: Send + Sync {
    fn find_user(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;
}

/// Resolve the acting user from verified claims.
///
/// # Errors
/// `Auth` for missing claims, an empty subject or a non-UUID subject,
/// `NotFound` when the subject has no user, `Internal` on storage failure.
pub async fn resolve_actor<L: UserLookup>(
    claims: Option<&Claims>,
    instance_id: Uuid,
    lookup: &L,
) -> Result<User> {
    let claims = claims.ok_or_else(|| Error::auth("Invalid token"))?;

    if claims.sub.is_empty() {
        return Err(Error::auth("Invalid claim: id"));
    }

    if claims.is_system() {
        return Ok(User::system(instance_id, &claims.aud));
    }

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| Error::auth("Invalid user ID"))?;

    lookup
        .find_user(instance_id, user_id)
        .await
        .map_err(|err| Error::internal("Database error finding user", err))?
        .ok_or_else(|| Error::not_found("User not found"))
}

/// `aud` falls back to the configured default when absent or empty.
#[must_use]
pub fn is_admin(user: &User, aud: Option<&str>, config: &SiteConfig) -> bool {
    let aud = aud
        .filter(|aud| !aud.is_empty())
        .unwrap_or_else(|| config.default_audience());
    user.is_super_admin || (aud == user.aud && user.has_role(config.admin_role()))
}

/// Audience for this request: explicit header, then token claim, then the
/// configured default.
#[must_use]
pub fn request_audience(headers: &HeaderMap, claims: Option<&Claims>, config: &SiteConfig) -> String {
    if let Some(aud) = headers
        .get(config.aud_header())
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
    {
        return aud.to_string();
    }

    if let Some(claims) = claims.filter(|claims| !claims.aud.is_empty()) {
        return claims.aud.clone();
    }

    config.default_audience().to_string()
}

/// Resolve the actor and require admin rights over the request audience.
///
/// Returns the actor together with the audience it was checked against.
///
/// # Errors
/// Propagates [`resolve_actor`] failures and returns `Auth` for non-admins.
pub async fn require_admin<L: UserLookup>(
    claims: Option<&Claims>,
    headers: &HeaderMap,
    config: &SiteConfig,
    lookup: &L,
) -> Result<(User, String)> {
    let actor = resolve_actor(claims, config.instance_id(), lookup).await?;
    let aud = request_audience(headers, claims, config);

    if !is_admin(&actor, Some(&aud), config) {
        debug!(actor_id = %actor.id, aud = %aud, "admin access denied");
        return Err(Error::auth("User not allowed"));
    }

    Ok((actor, aud))
}
