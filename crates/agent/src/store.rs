//! Shared ephemeral key-value store.
//!
//! Pause-state cache entries and outbound rate windows live here, shared by
//! every worker process. The trait models the two shapes this core needs: a
//! TTL'd string value, and a per-key time-scored set whose record, purge,
//! count and TTL refresh happen as one atomic operation. Splitting the window
//! operation into separate round-trips would let a concurrent writer race the
//! purge-then-count sequence and undercount.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ephemeral store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically: add `member` to the window at time `at` (a no-op if it is
    /// already present), purge entries older than `at - lookback`, refresh
    /// the key's TTL, and return the remaining cardinality.
    async fn window_record(
        &self,
        key: &str,
        member: &str,
        at: DateTime<Utc>,
        lookback: Duration,
        ttl: Duration,
    ) -> Result<u64, StoreError>;
}

enum Entry {
    Value(String),
    Window(BTreeMap<String, DateTime<Utc>>),
}

struct Expiring {
    expires_at: DateTime<Utc>,
    entry: Entry,
}

/// Single-process substitute for the shared store: a map behind a lock, with
/// expiry enforced on access rather than by a background sweeper. Every read
/// path purges, so an expired entry is never observable.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Expiring>>,
}

impl InMemoryStore {
    fn is_live(expiring: &Expiring, now: DateTime<Utc>) -> bool {
        expiring.expires_at > now
    }
}

#[async_trait]
impl EphemeralStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();

        match entries.get(key) {
            Some(expiring) if Self::is_live(expiring, now) => match &expiring.entry {
                Entry::Value(value) => Ok(Some(value.clone())),
                Entry::Window(_) => Ok(None),
            },
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Expiring { expires_at: Utc::now() + ttl, entry: Entry::Value(value.to_string()) },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn window_record(
        &self,
        key: &str,
        member: &str,
        at: DateTime<Utc>,
        lookback: Duration,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().await;

        // An expired entry or a plain value under this key starts a fresh window.
        let stale = match entries.get(key) {
            Some(expiring) if Self::is_live(expiring, at) => {
                !matches!(expiring.entry, Entry::Window(_))
            }
            _ => true,
        };
        if stale {
            entries.insert(
                key.to_string(),
                Expiring { expires_at: at + ttl, entry: Entry::Window(BTreeMap::new()) },
            );
        }

        let expiring = entries.entry(key.to_string()).or_insert_with(|| Expiring {
            expires_at: at + ttl,
            entry: Entry::Window(BTreeMap::new()),
        });
        expiring.expires_at = at + ttl;
        let Entry::Window(window) = &mut expiring.entry else {
            unreachable!("stale entries were replaced with a window above");
        };

        // Idempotent add: a member already in the window keeps its original score.
        window.entry(member.to_string()).or_insert(at);

        let horizon = at - lookback;
        window.retain(|_, score| *score > horizon);

        Ok(window.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{EphemeralStore, InMemoryStore};

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let store = InMemoryStore::default();

        store.set("k", "v", Duration::seconds(60)).await.expect("set");
        assert_eq!(store.get("k").await.expect("get"), Some("v".to_string()));

        store.delete("k").await.expect("delete");
        assert_eq!(store.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn expired_value_is_not_observable() {
        let store = InMemoryStore::default();

        store.set("k", "v", Duration::milliseconds(20)).await.expect("set");
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;

        assert_eq!(store.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn window_counts_members_inside_the_lookback() {
        let store = InMemoryStore::default();
        let base = Utc::now();
        let lookback = Duration::seconds(60);
        let ttl = Duration::seconds(120);

        let count =
            store.window_record("w", "m1", base, lookback, ttl).await.expect("record m1");
        assert_eq!(count, 1);

        let count = store
            .window_record("w", "m2", base + Duration::seconds(1), lookback, ttl)
            .await
            .expect("record m2");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn window_add_is_idempotent() {
        let store = InMemoryStore::default();
        let base = Utc::now();
        let lookback = Duration::seconds(60);
        let ttl = Duration::seconds(120);

        store.window_record("w", "m1", base, lookback, ttl).await.expect("first record");
        let count = store
            .window_record("w", "m1", base + Duration::seconds(5), lookback, ttl)
            .await
            .expect("duplicate record");

        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn window_purges_entries_older_than_the_lookback() {
        let store = InMemoryStore::default();
        let base = Utc::now();
        let lookback = Duration::seconds(60);
        let ttl = Duration::seconds(120);

        store.window_record("w", "old", base, lookback, ttl).await.expect("record old");
        let count = store
            .window_record("w", "new", base + Duration::seconds(90), lookback, ttl)
            .await
            .expect("record new");

        assert_eq!(count, 1, "the entry outside the lookback should be purged");
    }

    #[tokio::test]
    async fn expired_window_starts_fresh() {
        let store = InMemoryStore::default();
        let base = Utc::now();
        let lookback = Duration::seconds(60);
        let ttl = Duration::seconds(120);

        store.window_record("w", "m1", base, lookback, ttl).await.expect("record m1");

        // Next record lands after the window TTL has elapsed.
        let count = store
            .window_record("w", "m2", base + Duration::seconds(200), lookback, ttl)
            .await
            .expect("record m2");

        assert_eq!(count, 1);
    }
}
