//! Process-local channel store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use sockgate_core::ConnectionId;

use super::{ChannelStore, ChannelStoreError};

#[derive(Default)]
struct Indexes {
    members: HashMap<String, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

impl Indexes {
    fn link(&mut self, id: &ConnectionId, channel: &str) {
        let _ = self
            .members
            .entry(channel.to_owned())
            .or_default()
            .insert(id.clone());
        let _ = self
            .memberships
            .entry(id.clone())
            .or_default()
            .insert(channel.to_owned());
    }

    fn unlink(&mut self, id: &ConnectionId, channel: &str) {
        if let Some(set) = self.members.get_mut(channel) {
            let _ = set.remove(id);
            if set.is_empty() {
                let _ = self.members.remove(channel);
            }
        }
        if let Some(set) = self.memberships.get_mut(id) {
            let _ = set.remove(channel);
            if set.is_empty() {
                let _ = self.memberships.remove(id);
            }
        }
    }

    fn unlink_all(&mut self, id: &ConnectionId) {
        let channels = self.memberships.remove(id).unwrap_or_default();
        for channel in channels {
            if let Some(set) = self.members.get_mut(&channel) {
                let _ = set.remove(id);
                if set.is_empty() {
                    let _ = self.members.remove(&channel);
                }
            }
        }
    }
}

/// Channel store holding both indexes behind one mutex.
#[derive(Default)]
pub struct InMemoryChannelStore {
    indexes: Mutex<Indexes>,
}

impl InMemoryChannelStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels with at least one member.
    pub fn channel_count(&self) -> usize {
        self.indexes.lock().members.len()
    }

    /// Number of connections with at least one membership.
    pub fn member_count(&self) -> usize {
        self.indexes.lock().memberships.len()
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn subscribe(
        &self,
        connection_id: &ConnectionId,
        channel: &str,
    ) -> Result<(), ChannelStoreError> {
        self.indexes.lock().link(connection_id, channel);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        connection_id: &ConnectionId,
        channel: &str,
    ) -> Result<(), ChannelStoreError> {
        self.indexes.lock().unlink(connection_id, channel);
        Ok(())
    }

    async fn get_subscribers(&self, channel: &str) -> Result<Vec<ConnectionId>, ChannelStoreError> {
        Ok(self
            .indexes
            .lock()
            .members
            .get(channel)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_channels(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Vec<String>, ChannelStoreError> {
        Ok(self
            .indexes
            .lock()
            .memberships
            .get(connection_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_all(&self, connection_id: &ConnectionId) -> Result<(), ChannelStoreError> {
        self.indexes.lock().unlink_all(connection_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let store = InMemoryChannelStore::new();
        store.subscribe(&id("a"), "news").await.unwrap();
        store.subscribe(&id("a"), "news").await.unwrap();
        assert_eq!(store.get_subscribers("news").await.unwrap(), vec![id("a")]);
        assert_eq!(store.get_channels(&id("a")).await.unwrap(), vec!["news".to_string()]);
    }

    #[tokio::test]
    async fn unsubscribe_absent_pair_is_noop() {
        let store = InMemoryChannelStore::new();
        store.unsubscribe(&id("a"), "news").await.unwrap();
        store.subscribe(&id("b"), "news").await.unwrap();
        store.unsubscribe(&id("a"), "news").await.unwrap();
        assert_eq!(store.get_subscribers("news").await.unwrap(), vec![id("b")]);
    }

    #[tokio::test]
    async fn unknown_channel_is_empty() {
        let store = InMemoryChannelStore::new();
        assert!(store.get_subscribers("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_member_leaving_removes_channel() {
        let store = InMemoryChannelStore::new();
        store.subscribe(&id("a"), "news").await.unwrap();
        store.subscribe(&id("b"), "news").await.unwrap();
        store.unsubscribe(&id("a"), "news").await.unwrap();
        assert_eq!(store.channel_count(), 1);
        store.unsubscribe(&id("b"), "news").await.unwrap();
        assert_eq!(store.channel_count(), 0);
        assert_eq!(store.member_count(), 0);
    }

    #[tokio::test]
    async fn remove_all_clears_both_indexes() {
        let store = InMemoryChannelStore::new();
        for channel in ["a", "b", "c"] {
            store.subscribe(&id("x"), channel).await.unwrap();
        }
        store.subscribe(&id("y"), "b").await.unwrap();

        store.remove_all(&id("x")).await.unwrap();

        for channel in ["a", "b", "c"] {
            assert!(!store.get_subscribers(channel).await.unwrap().contains(&id("x")));
        }
        assert!(store.get_channels(&id("x")).await.unwrap().is_empty());
        assert_eq!(store.get_subscribers("b").await.unwrap(), vec![id("y")]);
        assert_eq!(store.channel_count(), 1);
    }

    #[tokio::test]
    async fn remove_all_without_memberships_is_safe() {
        let store = InMemoryChannelStore::new();
        store.remove_all(&id("nobody")).await.unwrap();
        store.remove_all(&id("nobody")).await.unwrap();
        assert_eq!(store.channel_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribe_and_remove_all_stay_consistent() {
        let store = std::sync::Arc::new(InMemoryChannelStore::new());
        let mut tasks = Vec::new();
        for n in 0..32 {
            let store = std::sync::Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let conn = id(&format!("c{}", n % 4));
                store.subscribe(&conn, &format!("ch{}", n % 3)).await.unwrap();
                if n % 5 == 0 {
                    store.remove_all(&conn).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        for n in 0..4 {
            let conn = id(&format!("c{n}"));
            let channels = store.get_channels(&conn).await.unwrap();
            for channel in &channels {
                assert!(store.get_subscribers(channel).await.unwrap().contains(&conn));
            }
        }
        for c in 0..3 {
            let channel = format!("ch{c}");
            for member in store.get_subscribers(&channel).await.unwrap() {
                assert!(store.get_channels(&member).await.unwrap().contains(&channel));
            }
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::{BTreeMap, BTreeSet};

        #[derive(Debug, Clone)]
        enum Op {
            Subscribe(u8, u8),
            Unsubscribe(u8, u8),
            RemoveAll(u8),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..5, 0u8..4).prop_map(|(c, ch)| Op::Subscribe(c, ch)),
                (0u8..5, 0u8..4).prop_map(|(c, ch)| Op::Unsubscribe(c, ch)),
                (0u8..5).prop_map(Op::RemoveAll),
            ]
        }

        proptest! {
            #[test]
            fn indexes_match_model(ops in proptest::collection::vec(op(), 0..64)) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                rt.block_on(async {
                    let store = InMemoryChannelStore::new();
                    let mut model: BTreeMap<u8, BTreeSet<u8>> = BTreeMap::new();
                    for op in &ops {
                        match *op {
                            Op::Subscribe(c, ch) => {
                                store.subscribe(&id(&c.to_string()), &ch.to_string()).await.unwrap();
                                let _ = model.entry(c).or_default().insert(ch);
                            }
                            Op::Unsubscribe(c, ch) => {
                                store.unsubscribe(&id(&c.to_string()), &ch.to_string()).await.unwrap();
                                if let Some(set) = model.get_mut(&c) {
                                    let _ = set.remove(&ch);
                                }
                            }
                            Op::RemoveAll(c) => {
                                store.remove_all(&id(&c.to_string())).await.unwrap();
                                let _ = model.remove(&c);
                            }
                        }
                    }
                    for c in 0u8..5 {
                        let conn = id(&c.to_string());
                        let expected = model.get(&c).cloned().unwrap_or_default();
                        let actual: BTreeSet<u8> = store
                            .get_channels(&conn)
                            .await
                            .unwrap()
                            .iter()
                            .map(|s| s.parse().unwrap())
                            .collect();
                        assert_eq!(actual, expected);
                        for ch in 0u8..4 {
                            let subscribed = store
                                .get_subscribers(&ch.to_string())
                                .await
                                .unwrap()
                                .contains(&conn);
                            assert_eq!(subscribed, expected.contains(&ch));
                        }
                    }
                    let non_empty = (0u8..4)
                        .filter(|ch| model.values().any(|set| set.contains(ch)))
                        .count();
                    assert_eq!(store.channel_count(), non_empty);
                });
            }
        }
    }
}
