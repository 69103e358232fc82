//! Per-instance site configuration consumed by the resolvers and the admin
//! executor.
//!
//! Built once at startup from CLI/env arguments and shared read-only.

use axum::http::HeaderName;
use secrecy::SecretString;
use uuid::Uuid;

const DEFAULT_AUDIENCE: &str = "authenticated";
const DEFAULT_ADMIN_ROLE: &str = "admin";
const DEFAULT_ROLE: &str = "authenticated";
const DEFAULT_PASSWORD_MIN_LENGTH: usize = 6;
const DEFAULT_AUD_HEADER: &str = "x-jwt-aud";

#[derive(Clone, Debug)]
pub struct SiteConfig {
    instance_id: Uuid,
    site_url: String,
    uri_allow_list: Vec<String>,
    jwt_secret: SecretString,
    default_audience: String,
    admin_role: String,
    default_role: String,
    password_min_length: usize,
    aud_header: HeaderName,
}

impl SiteConfig {
    #[must_use]
    pub fn new(site_url: String, jwt_secret: SecretString) -> Self {
        Self {
            instance_id: Uuid::nil(),
            site_url,
            uri_allow_list: Vec::new(),
            jwt_secret,
            default_audience: DEFAULT_AUDIENCE.to_string(),
            admin_role: DEFAULT_ADMIN_ROLE.to_string(),
            default_role: DEFAULT_ROLE.to_string(),
            password_min_length: DEFAULT_PASSWORD_MIN_LENGTH,
            aud_header: HeaderName::from_static(DEFAULT_AUD_HEADER),
        }
    }

    #[must_use]
    pub fn with_instance_id(mut self, instance_id: Uuid) -> Self {
        self.instance_id = instance_id;
        self
    }

    #[must_use]
    pub fn with_uri_allow_list(mut self, uris: Vec<String>) -> Self {
        self.uri_allow_list = uris
            .into_iter()
            .map(|uri| uri.trim().to_string())
            .filter(|uri| !uri.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn with_default_audience(mut self, aud: String) -> Self {
        self.default_audience = aud;
        self
    }

    #[must_use]
    pub fn with_admin_role(mut self, role: String) -> Self {
        self.admin_role = role;
        self
    }

    #[must_use]
    pub fn with_default_role(mut self, role: String) -> Self {
        self.default_role = role;
        self
    }

    #[must_use]
    pub fn with_password_min_length(mut self, length: usize) -> Self {
        self.password_min_length = length;
        self
    }

    #[must_use]
    pub fn with_aud_header(mut self, header: HeaderName) -> Self {
        self.aud_header = header;
        self
    }

    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    #[must_use]
    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    #[must_use]
    pub fn uri_allow_list(&self) -> &[String] {
        &self.uri_allow_list
    }

    #[must_use]
    pub fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub fn default_audience(&self) -> &str {
        &self.default_audience
    }

    #[must_use]
    pub fn admin_role(&self) -> &str {
        &self.admin_role
    }

    #[must_use]
    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    #[must_use]
    pub fn password_min_length(&self) -> usize {
        self.password_min_length
    }

    #[must_use]
    pub fn aud_header(&self) -> &HeaderName {
        &self.aud_header
    }
}
