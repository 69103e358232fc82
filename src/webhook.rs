//! Outbound admin-event notifications.
//!
//! The target URL is operator supplied, so every delivery goes through
//! [`SafeTransport`]. Delivery happens after the admin transaction committed
//! and never affects the admin response.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::{
    header::{HeaderValue, CONTENT_TYPE, USER_AGENT},
    Method, Request,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    egress::{SafeTransport, Transport},
    models::{AuditAction, User},
    APP_USER_AGENT,
};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
const SIGNATURE_ISSUER: &str = "warden";
const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("failed to encode webhook payload")]
    Encode(#[from] serde_json::Error),

    #[error("failed to sign webhook payload")]
    Sign(#[from] jsonwebtoken::errors::Error),

    #[error("invalid webhook header value")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("webhook delivery failed after {0} attempts")]
    Exhausted(u32),
}

/// Payload posted for every committed admin mutation.
#[derive(Clone, Debug, Serialize)]
pub struct AdminEvent {
    #[serde(rename = "type")]
    pub kind: AuditAction,
    pub instance_id: Uuid,
    pub actor_id: Uuid,
    pub user: User,
    pub occurred_at: DateTime<Utc>,
}

impl AdminEvent {
    #[must_use]
    pub fn new(kind: AuditAction, actor: &User, user: &User) -> Self {
        Self {
            kind,
            instance_id: user.instance_id,
            actor_id: actor.id,
            user: user.clone(),
            occurred_at: Utc::now(),
        }
    }
}

/// Claims carried by the signature header.
#[derive(Debug, Serialize, Deserialize)]
pub struct SignatureClaims {
    pub iss: String,
    pub iat: i64,
    /// URL-safe base64 SHA-256 of the request body.
    pub sha256: String,
}

#[must_use]
pub fn body_digest(body: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(body))
}

pub struct WebhookNotifier<T = reqwest::Client> {
    url: Url,
    secret: Option<SecretString>,
    transport: SafeTransport<T>,
    max_attempts: u32,
    backoff: Duration,
}

impl<T: Transport + 'static> WebhookNotifier<T> {
    #[must_use]
    pub fn new(url: Url, transport: SafeTransport<T>) -> Self {
        Self {
            url,
            secret: None,
            transport,
            max_attempts: MAX_ATTEMPTS,
            backoff: BASE_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: Option<SecretString>) -> Self {
        self.secret = secret;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn sign(&self, body: &[u8]) -> Result<Option<String>, WebhookError> {
        let Some(secret) = &self.secret else {
            return Ok(None);
        };
        let claims = SignatureClaims {
            iss: SIGNATURE_ISSUER.to_string(),
            iat: Utc::now().timestamp(),
            sha256: body_digest(body),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
        )?;
        Ok(Some(token))
    }

    fn request(&self, body: &[u8], signature: Option<&str>) -> Result<Request, WebhookError> {
        let mut request = Request::new(Method::POST, self.url.clone());
        let headers = request.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(APP_USER_AGENT));
        if let Some(signature) = signature {
            headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(signature)?);
        }
        *request.body_mut() = Some(body.to_vec().into());
        Ok(request)
    }

    /// Deliver one event, retrying with exponential backoff.
    ///
    /// # Errors
    /// Returns an error if the event cannot be encoded or every attempt fails.
    pub async fn send(&self, event: &AdminEvent) -> Result<(), WebhookError> {
        let body = serde_json::to_vec(event)?;
        let signature = self.sign(&body)?;

        let mut delay = self.backoff;
        for attempt in 1..=self.max_attempts {
            let request = self.request(&body, signature.as_deref())?;
            match self.transport.execute(request).await {
                Ok(response) if response.status().is_success() => {
                    debug!(attempt, "webhook delivered");
                    return Ok(());
                }
                Ok(response) => {
                    debug!(attempt, status = %response.status(), "webhook rejected");
                }
                Err(err) => {
                    debug!(attempt, error = %err, "webhook attempt failed");
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(WebhookError::Exhausted(self.max_attempts))
    }

    /// Fire-and-forget delivery on a background task.
    pub fn dispatch(self: &Arc<Self>, event: AdminEvent) {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            let kind = event.kind.as_str();
            match notifier.send(&event).await {
                Ok(()) => info!(event = kind, user_id = %event.user.id, "webhook sent"),
                Err(err) => warn!(event = kind, user_id = %event.user.id, error = %err, "webhook failed"),
            }
        });
    }
}
