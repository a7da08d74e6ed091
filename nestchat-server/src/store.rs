//! Chat persistence seam
//!
//! The document database lives outside this crate; the hub only talks to it
//! through [`ChatStore`]. [`MemoryStore`] backs the standalone binary and
//! the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use nestchat_protocol::{ChatMessage, GroupId, GroupRecord, Timestamp};
use nestchat_utils::{NestChatError, Result};

/// Storage operations the fan-out core depends on
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist one chat message
    async fn save_message(&self, message: &ChatMessage) -> Result<()>;

    /// Fetch a group; [`NestChatError::GroupNotFound`] if it does not exist
    async fn get_group(&self, id: GroupId) -> Result<GroupRecord>;

    /// Record the time of the latest message in a group
    async fn set_last_activity(&self, id: GroupId, at: Timestamp) -> Result<()>;

    /// Record when a member last saw the group
    async fn set_read_status(&self, id: GroupId, identity: &str, at: Timestamp) -> Result<()>;

    /// Insert a newly created group
    async fn insert_group(&self, group: GroupRecord) -> Result<()>;

    /// Every group opened for a product listing
    async fn find_groups_by_product(&self, product_id: &str) -> Result<Vec<GroupRecord>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    groups: HashMap<GroupId, GroupRecord>,
    messages: Vec<ChatMessage>,
}

/// In-process [`ChatStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    read_status_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a storage error until switched back
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Messages stored for a group, oldest first
    pub fn messages(&self, group: GroupId) -> Vec<ChatMessage> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.group_id == group)
            .cloned()
            .collect()
    }

    pub fn group(&self, id: GroupId) -> Option<GroupRecord> {
        self.state.lock().groups.get(&id).cloned()
    }

    /// Total `set_read_status` calls that succeeded
    pub fn read_status_writes(&self) -> u64 {
        self.read_status_writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(NestChatError::storage("store is rejecting writes"));
        }
        Ok(())
    }

    fn update_group(&self, id: GroupId, f: impl FnOnce(&mut GroupRecord)) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let group = state
            .groups
            .get_mut(&id)
            .ok_or_else(|| NestChatError::GroupNotFound(id.to_string()))?;
        f(group);
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn save_message(&self, message: &ChatMessage) -> Result<()> {
        self.check_writable()?;
        self.state.lock().messages.push(message.clone());
        Ok(())
    }

    async fn get_group(&self, id: GroupId) -> Result<GroupRecord> {
        self.group(id)
            .ok_or_else(|| NestChatError::GroupNotFound(id.to_string()))
    }

    async fn set_last_activity(&self, id: GroupId, at: Timestamp) -> Result<()> {
        self.update_group(id, |group| group.last_message_at = Some(at))
    }

    async fn set_read_status(&self, id: GroupId, identity: &str, at: Timestamp) -> Result<()> {
        self.update_group(id, |group| {
            group.read_status.insert(identity.to_string(), at);
        })?;
        self.read_status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_group(&self, group: GroupRecord) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        if state.groups.contains_key(&group.id) {
            return Err(NestChatError::GroupExists {
                id: group.id.to_string(),
                name: group.name,
            });
        }
        state.groups.insert(group.id, group);
        Ok(())
    }

    async fn find_groups_by_product(&self, product_id: &str) -> Result<Vec<GroupRecord>> {
        Ok(self
            .state
            .lock()
            .groups
            .values()
            .filter(|g| g.product_id == product_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(product: &str) -> GroupRecord {
        GroupRecord {
            id: GroupId::generate(),
            name: "Road bike".into(),
            members: vec!["a@x.com".into(), "b@x.com".into()],
            product_id: product.into(),
            cover_image: String::new(),
            created_at: Utc::now(),
            last_message_at: None,
            read_status: BTreeMap::new(),
            buyer: "a@x.com".into(),
            seller: "b@x.com".into(),
            buyer_confirmed: false,
            seller_confirmed: false,
        }
    }

    #[tokio::test]
    async fn test_get_missing_group() {
        let store = MemoryStore::new();
        let err = store.get_group(GroupId::generate()).await.unwrap_err();
        assert!(matches!(err, NestChatError::GroupNotFound(_)));
    }

    #[tokio::test]
    async fn test_metadata_updates() {
        let store = MemoryStore::new();
        let group = record("p1");
        let id = group.id;
        store.insert_group(group).await.unwrap();

        let now = Utc::now();
        store.set_last_activity(id, now).await.unwrap();
        store.set_read_status(id, "b@x.com", now).await.unwrap();

        let stored = store.get_group(id).await.unwrap();
        assert_eq!(stored.last_message_at, Some(now));
        assert_eq!(stored.read_status.get("b@x.com"), Some(&now));
        assert_eq!(store.read_status_writes(), 1);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryStore::new();
        let group = record("p1");
        let id = group.id;
        store.insert_group(group).await.unwrap();
        store.set_fail_writes(true);

        let msg = ChatMessage {
            group_id: id,
            sender_email: "a@x.com".into(),
            content: "hi".into(),
            timestamp: Utc::now(),
        };
        assert!(matches!(
            store.save_message(&msg).await,
            Err(NestChatError::Storage(_))
        ));
        assert!(store.set_last_activity(id, Utc::now()).await.is_err());
        assert!(store.messages(id).is_empty());

        store.set_fail_writes(false);
        store.save_message(&msg).await.unwrap();
        assert_eq!(store.messages(id), vec![msg]);
    }

    #[tokio::test]
    async fn test_find_groups_by_product() {
        let store = MemoryStore::new();
        store.insert_group(record("p1")).await.unwrap();
        store.insert_group(record("p1")).await.unwrap();
        store.insert_group(record("p2")).await.unwrap();

        assert_eq!(store.find_groups_by_product("p1").await.unwrap().len(), 2);
        assert!(store.find_groups_by_product("p3").await.unwrap().is_empty());
    }
}
