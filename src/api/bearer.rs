//! Bearer-token adapter: verifies HS256 tokens and attaches [`Claims`] to the
//! request. Requests without a token pass through untouched; handlers decide
//! whether claims are required.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::debug;

use crate::{auth::Claims, config::SiteConfig, error::Error};

/// # Errors
/// Returns an error for a bad signature, an expired token or a missing `exp`.
pub fn verify(token: &str, secret: &SecretString) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    // audience is checked against the user record, not the token
    validation.validate_aud = false;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
}

pub async fn attach_claims(
    State(config): State<Arc<SiteConfig>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(request.headers()) {
        match verify(&token, config.jwt_secret()) {
            Ok(claims) => {
                request.extensions_mut().insert(claims);
            }
            Err(err) => {
                debug!(error = %err, "rejected bearer token");
                return Error::auth("Invalid token").into_response();
            }
        }
    }

    next.run(request).await
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(exp: Option<i64>) -> Claims {
        let mut claims = Claims::new("0", "authenticated");
        claims.exp = exp;
        claims
    }

    #[test]
    fn valid_token_yields_claims() {
        let secret = SecretString::from("secret");
        let exp = Utc::now().timestamp() + 600;
        let verified = verify(&token(&claims(Some(exp)), "secret"), &secret).unwrap();
        assert_eq!(verified.sub, "0");
        assert_eq!(verified.aud, "authenticated");
    }

    #[test]
    fn wrong_secret_expired_or_missing_exp_fail() {
        let secret = SecretString::from("secret");
        let exp = Utc::now().timestamp() + 600;
        assert!(verify(&token(&claims(Some(exp)), "other"), &secret).is_err());
        assert!(verify(&token(&claims(Some(1_000)), "secret"), &secret).is_err());
        assert!(verify(&token(&claims(None), "secret"), &secret).is_err());
    }

    #[test]
    fn bearer_prefix_required() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }
}
