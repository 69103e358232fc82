use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

/// Free-form JSON object stored alongside a user.
pub type Metadata = Map<String, Value>;

/// Literal subject accepted for the service's own identity.
pub const SYSTEM_USER_ID: &str = "0";

/// UUID form of the system identity.
pub const SYSTEM_USER_UUID: Uuid = Uuid::nil();

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    #[serde(skip)]
    pub instance_id: Uuid,
    pub aud: String,
    pub role: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(skip)]
    pub encrypted_password: String,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    pub phone_confirmed_at: Option<DateTime<Utc>>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    #[schema(value_type = Object)]
    pub app_metadata: Metadata,
    #[schema(value_type = Object)]
    pub user_metadata: Metadata,
    #[serde(skip)]
    pub is_super_admin: bool,
    pub banned_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build a not-yet-persisted user. Empty identifiers are stored as `None`.
    #[must_use]
    pub fn new(
        instance_id: Uuid,
        aud: &str,
        email: &str,
        phone: &str,
        encrypted_password: String,
        user_metadata: Option<Metadata>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            instance_id,
            aud: aud.to_string(),
            role: String::new(),
            email: non_empty(email),
            phone: non_empty(phone),
            encrypted_password,
            email_confirmed_at: None,
            phone_confirmed_at: None,
            last_sign_in_at: None,
            app_metadata: Metadata::new(),
            user_metadata: user_metadata.unwrap_or_default(),
            is_super_admin: false,
            banned_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Synthetic identity for the service itself. Never stored.
    #[must_use]
    pub fn system(instance_id: Uuid, aud: &str) -> Self {
        let mut user = Self::new(instance_id, aud, "", "", String::new(), None);
        user.id = SYSTEM_USER_UUID;
        user.is_super_admin = true;
        user
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        !role.is_empty() && self.role == role
    }

    #[must_use]
    pub fn is_banned(&self, now: DateTime<Utc>) -> bool {
        self.banned_until.is_some_and(|until| until > now)
    }

    /// `{user_id, user_email, user_phone}` snapshot recorded in audit traits.
    #[must_use]
    pub fn audit_traits(&self) -> Metadata {
        let mut traits = Metadata::new();
        traits.insert("user_id".into(), Value::String(self.id.to_string()));
        traits.insert(
            "user_email".into(),
            Value::String(self.email.clone().unwrap_or_default()),
        );
        traits.insert(
            "user_phone".into(),
            Value::String(self.phone.clone().unwrap_or_default()),
        );
        traits
    }
}

/// Merge `updates` into `target`; a JSON `null` removes the key.
pub fn merge_metadata(target: &mut Metadata, updates: Metadata) {
    for (key, value) in updates {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn new_user_drops_empty_identifiers() {
        let user = User::new(Uuid::nil(), "authenticated", "a@example.com", "", String::new(), None);
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
        assert_eq!(user.phone, None);
        assert!(!user.is_super_admin);
    }

    #[test]
    fn system_user_is_super_admin() {
        let instance = Uuid::new_v4();
        let user = User::system(instance, "service");
        assert_eq!(user.id, SYSTEM_USER_UUID);
        assert_eq!(user.instance_id, instance);
        assert_eq!(user.aud, "service");
        assert!(user.is_super_admin);
    }

    #[test]
    fn has_role_ignores_empty_role() {
        let mut user = User::new(Uuid::nil(), "aud", "", "", String::new(), None);
        assert!(!user.has_role(""));
        user.role = "admin".into();
        assert!(user.has_role("admin"));
        assert!(!user.has_role("editor"));
    }

    #[test]
    fn ban_is_time_bounded() {
        let mut user = User::new(Uuid::nil(), "aud", "", "", String::new(), None);
        let now = Utc::now();
        assert!(!user.is_banned(now));
        user.banned_until = Some(now + Duration::hours(1));
        assert!(user.is_banned(now));
        assert!(!user.is_banned(now + Duration::hours(2)));
    }

    #[test]
    fn merge_metadata_sets_and_removes() {
        let mut target = json!({"plan": "free", "beta": true})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let updates = json!({"plan": "pro", "beta": null, "seats": 3})
            .as_object()
            .cloned()
            .unwrap_or_default();
        merge_metadata(&mut target, updates);
        assert_eq!(Value::Object(target), json!({"plan": "pro", "seats": 3}));
    }

    #[test]
    fn serialized_user_hides_secrets() {
        let user = User::new(Uuid::nil(), "aud", "a@example.com", "", "$argon2id$x".into(), None);
        let value = serde_json::to_value(&user).unwrap_or_default();
        assert!(value.get("encrypted_password").is_none());
        assert!(value.get("is_super_admin").is_none());
        assert_eq!(value["email"], json!("a@example.com"));
    }
}
