//! In-process store for `memory://` DSNs and tests.
//!
//! A transaction works on a private copy of the rows and records every write.
//! Commit replays the writes against the shared state under one lock, so a
//! row that appeared after `begin` still trips the uniqueness checks.

use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ListQuery, SortDirection, StoreError, UserChange, UserPage, UserStore, UserTx};
use crate::{
    auth::UserLookup,
    models::{AuditLogEntry, User},
};

#[derive(Clone, Debug, Default)]
struct MemoryState {
    users: Vec<User>,
    audit: Vec<AuditLogEntry>,
    #[cfg(test)]
    faults: Faults,
}

#[cfg(test)]
#[derive(Clone, Debug, Default)]
struct Faults {
    fail_audit: bool,
    fail_update: bool,
    insert_on_begin: Option<User>,
}

#[derive(Clone, Debug)]
enum Write {
    Audit(AuditLogEntry),
    Insert(User),
    Update(Uuid, UserChange),
    Delete(Uuid),
}

impl MemoryState {
    fn apply(&mut self, write: &Write) -> Result<(), StoreError> {
        match write {
            Write::Audit(entry) => self.audit.push(entry.clone()),
            Write::Insert(user) => {
                if self.users.iter().any(|existing| existing.id == user.id) {
                    return Err(StoreError::Conflict("users_pkey".into()));
                }
                self.check_unique(user.id, user)?;
                self.users.push(user.clone());
            }
            Write::Update(user_id, change) => {
                let index = self
                    .users
                    .iter()
                    .position(|user| user.id == *user_id)
                    .ok_or(StoreError::NotFound)?;
                let mut updated = self.users[index].clone();
                change.apply_to(&mut updated);
                self.check_unique(*user_id, &updated)?;
                self.users[index] = updated;
            }
            Write::Delete(user_id) => {
                let before = self.users.len();
                self.users.retain(|user| user.id != *user_id);
                if self.users.len() == before {
                    return Err(StoreError::NotFound);
                }
            }
        }
        Ok(())
    }

    fn check_unique(&self, user_id: Uuid, candidate: &User) -> Result<(), StoreError> {
        let peers = self.users.iter().filter(|user| {
            user.id != user_id && user.instance_id == candidate.instance_id && user.aud == candidate.aud
        });
        for peer in peers {
            if let (Some(a), Some(b)) = (&peer.email, &candidate.email) {
                if a.eq_ignore_ascii_case(b) {
                    return Err(StoreError::Conflict("users_email_key".into()));
                }
            }
            if peer.phone.is_some() && peer.phone == candidate.phone {
                return Err(StoreError::Conflict("users_phone_key".into()));
            }
        }
        Ok(())
    }
}

fn matches_filter(user: &User, filter: &str) -> bool {
    let needle = filter.to_lowercase();
    let email = user
        .email
        .as_deref()
        .is_some_and(|email| email.to_lowercase().contains(&needle));
    let full_name = user
        .user_metadata
        .get("full_name")
        .and_then(|value| value.as_str())
        .is_some_and(|name| name.to_lowercase().contains(&needle));
    email || full_name
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserLookup for MemoryStore {
    async fn find_user(&self, instance_id: Uuid, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .find(|user| user.instance_id == instance_id && user.id == user_id)
            .cloned())
    }
}

impl UserStore for MemoryStore {
    type Tx = MemoryTx;

    async fn list_users(
        &self,
        instance_id: Uuid,
        aud: &str,
        query: &ListQuery,
    ) -> Result<UserPage, StoreError> {
        let state = self.state.lock().await;
        let mut users: Vec<User> = state
            .users
            .iter()
            .filter(|user| user.instance_id == instance_id && user.aud == aud)
            .filter(|user| query.filter().map_or(true, |filter| matches_filter(user, filter)))
            .cloned()
            .collect();
        drop(state);

        match query.sort() {
            SortDirection::Asc => users.sort_by_key(|user| user.created_at),
            SortDirection::Desc => users.sort_by_key(|user| std::cmp::Reverse(user.created_at)),
        }

        let total = users.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let per_page = usize::try_from(query.per_page()).unwrap_or(usize::MAX);
        let users = users.into_iter().skip(offset).take(per_page).collect();
        Ok(UserPage { users, total })
    }

    async fn is_duplicated_email(
        &self,
        instance_id: Uuid,
        email: &str,
        aud: &str,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.iter().any(|user| {
            user.instance_id == instance_id
                && user.aud == aud
                && user
                    .email
                    .as_deref()
                    .is_some_and(|existing| existing.eq_ignore_ascii_case(email))
        }))
    }

    async fn is_duplicated_phone(
        &self,
        instance_id: Uuid,
        phone: &str,
        aud: &str,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.iter().any(|user| {
            user.instance_id == instance_id && user.aud == aud && user.phone.as_deref() == Some(phone)
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        #[allow(unused_mut)]
        let mut state = self.state.lock().await;
        #[cfg(test)]
        if let Some(user) = state.faults.insert_on_begin.take() {
            state.users.push(user);
        }
        let working = MemoryState {
            users: state.users.clone(),
            ..MemoryState::default()
        };
        Ok(MemoryTx {
            shared: Arc::clone(&self.state),
            working,
            writes: Vec::new(),
        })
    }
}

pub struct MemoryTx {
    shared: Arc<Mutex<MemoryState>>,
    working: MemoryState,
    writes: Vec<Write>,
}

impl MemoryTx {
    async fn stage(&mut self, write: Write) -> Result<(), StoreError> {
        #[cfg(test)]
        {
            let state = self.shared.lock().await;
            match &write {
                Write::Audit(_) if state.faults.fail_audit => {
                    return Err(StoreError::Backend(anyhow::anyhow!("audit insert failed")));
                }
                Write::Update(..) if state.faults.fail_update => {
                    return Err(StoreError::Backend(anyhow::anyhow!("update failed")));
                }
                _ => {}
            }
        }
        self.working.apply(&write)?;
        self.writes.push(write);
        Ok(())
    }
}

impl UserTx for MemoryTx {
    async fn insert_audit_entry(&mut self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.stage(Write::Audit(entry.clone())).await
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        self.stage(Write::Insert(user.clone())).await
    }

    async fn update_user(&mut self, user_id: Uuid, change: &UserChange) -> Result<(), StoreError> {
        self.stage(Write::Update(user_id, change.clone())).await
    }

    async fn delete_user(&mut self, user_id: Uuid) -> Result<(), StoreError> {
        self.stage(Write::Delete(user_id)).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut state = self.shared.lock().await;
        let mut next = MemoryState {
            users: state.users.clone(),
            audit: state.audit.clone(),
            ..MemoryState::default()
        };
        for write in &self.writes {
            next.apply(write)?;
        }
        state.users = next.users;
        state.audit = next.audit;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    pub(crate) async fn seed(&self, user: User) {
        self.state.lock().await.users.push(user);
    }

    pub(crate) async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.state.lock().await.audit.clone()
    }

    pub(crate) async fn users(&self) -> Vec<User> {
        self.state.lock().await.users.clone()
    }

    pub(crate) async fn fail_audit_inserts(&self) {
        self.state.lock().await.faults.fail_audit = true;
    }

    pub(crate) async fn fail_updates(&self) {
        self.state.lock().await.faults.fail_update = true;
    }

    /// Insert `user` as if another request committed it right after the
    /// next caller finished its pre-transaction checks.
    pub(crate) async fn insert_on_next_begin(&self, user: User) {
        self.state.lock().await.faults.insert_on_begin = Some(user);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{AuditAction, AuditLogEntry};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn user(email: &str) -> User {
        User::new(Uuid::nil(), "authenticated", email, "", String::new(), None)
    }

    fn audit_for(target: &User) -> AuditLogEntry {
        let actor = User::system(Uuid::nil(), "authenticated");
        AuditLogEntry::for_target(Uuid::nil(), &actor, AuditAction::UserModified, target, None)
    }

    #[tokio::test]
    async fn commit_publishes_writes() {
        let store = MemoryStore::new();
        let created = user("a@example.com");

        let mut tx = store.begin().await.unwrap();
        tx.insert_audit_entry(&audit_for(&created)).await.unwrap();
        tx.insert_user(&created).await.unwrap();
        tx.update_user(created.id, &UserChange::Role("admin".into()))
            .await
            .unwrap();

        assert!(store.find_user(Uuid::nil(), created.id).await.unwrap().is_none());
        tx.commit().await.unwrap();

        let found = store.find_user(Uuid::nil(), created.id).await.unwrap().unwrap();
        assert_eq!(found.role, "admin");
        assert_eq!(store.audit_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let created = user("a@example.com");

        let mut tx = store.begin().await.unwrap();
        tx.insert_audit_entry(&audit_for(&created)).await.unwrap();
        tx.insert_user(&created).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.users().await.is_empty());
        assert!(store.audit_entries().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_case_insensitively() {
        let store = MemoryStore::new();
        store.seed(user("a@example.com")).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_user(&user("A@Example.com")).await.err();
        assert!(matches!(err, Some(StoreError::Conflict(_))));
        assert!(store
            .is_duplicated_email(Uuid::nil(), "A@EXAMPLE.COM", "authenticated")
            .await
            .unwrap());
        assert!(!store
            .is_duplicated_email(Uuid::nil(), "a@example.com", "other-aud")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn commit_rechecks_rows_inserted_after_begin() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&user("a@example.com")).await.unwrap();

        store.seed(user("a@example.com")).await;

        assert!(matches!(tx.commit().await, Err(StoreError::Conflict(_))));
        assert_eq!(store.users().await.len(), 1);
    }

    #[tokio::test]
    async fn update_and_delete_unknown_user() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let missing = Uuid::new_v4();
        assert!(matches!(
            tx.update_user(missing, &UserChange::Role("x".into())).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(tx.delete_user(missing).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn list_filters_sorts_and_pages() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (offset, email) in ["a@example.com", "b@example.com", "c@other.org"]
            .iter()
            .enumerate()
        {
            let mut user = user(email);
            user.created_at = now + Duration::seconds(offset as i64);
            store.seed(user).await;
        }
        let mut named = user("d@other.org");
        named.user_metadata.insert("full_name".into(), json!("Example Person"));
        named.created_at = now + Duration::seconds(10);
        store.seed(named).await;

        let page = store
            .list_users(Uuid::nil(), "authenticated", &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.users[0].email.as_deref(), Some("d@other.org"));

        let query = ListQuery {
            filter: Some("EXAMPLE".into()),
            sort: Some(SortDirection::Asc),
            per_page: Some(2),
            page: Some(2),
        };
        let page = store
            .list_users(Uuid::nil(), "authenticated", &query)
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.users.len(), 1);
        assert_eq!(page.users[0].email.as_deref(), Some("d@other.org"));
    }
}
