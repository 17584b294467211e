//! Unique-id counting with bitmaps.
//!
//! Arbitrary ids are mapped to dense integer offsets once per namespace;
//! each `(event, bucket)` pair is a bitmap with the bits of the ids that
//! triggered it. Counting over a span ORs the bucket bitmaps into a
//! short-lived compound key.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use time::PrimitiveDateTime;
use tracing::{debug, instrument};

use crate::domain::granularity::{Granularity, iso_timestamp};
use crate::store::{BitmapStore, KeyspaceStore, StoreError};

pub const BASE_NAMESPACE: &str = "redis_gadgets";
pub const DEFAULT_NAMESPACE: &str = "global";
pub const DEFAULT_BITOP_TTL: u64 = 60 * 10;

const TO_OFFSET_KEY: &str = "id_to_offset";
const TO_ID_KEY: &str = "offset_to_id";
const CURRENT_OFFSET_KEY: &str = "current_offset";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueCountOptions {
    pub delimiter: String,
    /// Lifetime of compound OR results, in seconds.
    pub bitop_ttl: u64,
    pub granularity: Granularity,
}

impl Default for UniqueCountOptions {
    fn default() -> Self {
        Self {
            delimiter: ":".to_string(),
            bitop_ttl: DEFAULT_BITOP_TTL,
            granularity: Granularity::Daily,
        }
    }
}

impl From<&crate::config::UniqueCountSettings> for UniqueCountOptions {
    fn from(settings: &crate::config::UniqueCountSettings) -> Self {
        Self {
            delimiter: settings.namespace_delimiter.clone(),
            bitop_ttl: settings.bitop_ttl_seconds,
            granularity: settings.granularity,
        }
    }
}

pub struct UniqueCounter {
    store: Arc<dyn BitmapStore>,
    options: UniqueCountOptions,
}

impl UniqueCounter {
    pub fn new(store: Arc<dyn BitmapStore>, options: UniqueCountOptions) -> Self {
        Self { store, options }
    }

    pub fn namespaced(&self, namespace: &str, key: &str) -> String {
        [BASE_NAMESPACE, namespace, key].join(self.options.delimiter.as_str())
    }

    fn bucket_key(&self, event: &str, bucket: PrimitiveDateTime, namespace: &str) -> String {
        let key = [event, iso_timestamp(bucket).as_str()].join(self.options.delimiter.as_str());
        self.namespaced(namespace, &key)
    }

    /// Dense offset for `id`, allocated on first sight.
    pub async fn map_id_to_offset(&self, id: &str, namespace: &str) -> Result<u64, StoreError> {
        let offset = self
            .store
            .assign_offset(
                &self.namespaced(namespace, TO_OFFSET_KEY),
                &self.namespaced(namespace, TO_ID_KEY),
                &self.namespaced(namespace, CURRENT_OFFSET_KEY),
                id,
            )
            .await?;
        debug!(offset, id, "Mapped id to offset");
        Ok(offset)
    }

    pub async fn map_offset_to_id(
        &self,
        offset: u64,
        namespace: &str,
    ) -> Result<Option<String>, StoreError> {
        self.store
            .hash_get(&self.namespaced(namespace, TO_ID_KEY), &offset.to_string())
            .await
    }

    /// Number of offsets handed out so far.
    pub async fn current_offset(&self, namespace: &str) -> Result<u64, StoreError> {
        Ok(self
            .store
            .counter(&self.namespaced(namespace, CURRENT_OFFSET_KEY))
            .await?
            .unwrap_or(0))
    }

    /// Record that `event` happened to `id` in the bucket containing `at`.
    #[instrument(skip(self))]
    pub async fn track_event(
        &self,
        event: &str,
        id: &str,
        namespace: &str,
        at: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        let bucket = self.options.granularity.truncate(at);
        let key = self.bucket_key(event, bucket, namespace);
        let offset = self.map_id_to_offset(id, namespace).await?;
        self.store.set_bit(&key, offset, true).await?;
        Ok(())
    }

    /// Distinct ids that triggered `event` in any bucket from `start` to
    /// `end`, inclusive. The bounds may come in either order.
    #[instrument(skip(self))]
    pub async fn count(
        &self,
        start: PrimitiveDateTime,
        end: PrimitiveDateTime,
        event: &str,
        namespace: &str,
    ) -> Result<u64, StoreError> {
        let granularity = self.options.granularity;
        let mut start = granularity.truncate(start);
        let mut end = granularity.truncate(end);

        if start == end {
            debug!("Single bucket count");
            return self
                .store
                .bit_count(&self.bucket_key(event, start, namespace))
                .await;
        }
        if end < start {
            std::mem::swap(&mut start, &mut end);
        }

        let mut keys = Vec::new();
        let mut bucket = start;
        while bucket <= end {
            keys.push(self.bucket_key(event, bucket, namespace));
            bucket += granularity.step();
        }

        let compound_key = [
            self.namespaced(namespace, event),
            "or".to_string(),
            iso_timestamp(start),
            iso_timestamp(end),
        ]
        .join(self.options.delimiter.as_str());

        if self.store.exists(&compound_key).await? {
            return self.store.bit_count(&compound_key).await;
        }
        debug!(compound_key = %compound_key, buckets = keys.len(), "ORing bucket bitmaps");
        self.store.bit_or(&compound_key, &keys).await?;
        // Read before expiring so a zero ttl still yields the count.
        let result = self.store.bit_count(&compound_key).await?;
        self.store.expire(&compound_key, self.options.bitop_ttl).await?;
        Ok(result)
    }

    /// Ids whose bit is set in the bucket containing `at`, in offset order.
    #[instrument(skip(self))]
    pub async fn ids_for_event(
        &self,
        event: &str,
        namespace: &str,
        at: PrimitiveDateTime,
    ) -> Result<Vec<String>, StoreError> {
        let bucket = self.options.granularity.truncate(at);
        let key = self.bucket_key(event, bucket, namespace);
        let current = self.current_offset(namespace).await?;

        let bits: Vec<bool> = stream::iter(0..current)
            .then(|offset| self.store.get_bit(&key, offset))
            .try_collect()
            .await?;
        let set_offsets = bits
            .into_iter()
            .zip(0..current)
            .filter_map(|(set, offset)| set.then_some(offset));
        let ids: Vec<Option<String>> = stream::iter(set_offsets)
            .then(|offset| self.map_offset_to_id(offset, namespace))
            .try_collect()
            .await?;
        Ok(ids.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::infra::memory::MemoryStore;

    fn counter(store: Arc<MemoryStore>) -> UniqueCounter {
        UniqueCounter::new(store, UniqueCountOptions::default())
    }

    #[test]
    fn keys_are_namespaced() {
        let counter = counter(Arc::new(MemoryStore::new()));
        assert_eq!(
            counter.namespaced("global", "id_to_offset"),
            "redis_gadgets:global:id_to_offset"
        );
        assert_eq!(
            counter.bucket_key("login", datetime!(2024-03-09 00:00), "users"),
            "redis_gadgets:users:login:2024-03-09T00:00:00"
        );
    }

    #[tokio::test]
    async fn offsets_start_at_zero_and_are_stable() {
        let counter = counter(Arc::new(MemoryStore::new()));
        assert_eq!(counter.current_offset(DEFAULT_NAMESPACE).await.expect("offset"), 0);
        assert_eq!(counter.map_id_to_offset("a", DEFAULT_NAMESPACE).await.expect("map"), 0);
        assert_eq!(counter.map_id_to_offset("b", DEFAULT_NAMESPACE).await.expect("map"), 1);
        assert_eq!(counter.map_id_to_offset("a", DEFAULT_NAMESPACE).await.expect("map"), 0);
        assert_eq!(counter.current_offset(DEFAULT_NAMESPACE).await.expect("offset"), 2);
        assert_eq!(
            counter.map_offset_to_id(1, DEFAULT_NAMESPACE).await.expect("lookup"),
            Some("b".to_string())
        );
    }

    #[tokio::test]
    async fn namespaces_have_separate_offsets() {
        let counter = counter(Arc::new(MemoryStore::new()));
        counter.map_id_to_offset("a", "users").await.expect("map");
        assert_eq!(counter.map_id_to_offset("x", "orders").await.expect("map"), 0);
    }

    #[tokio::test]
    async fn compound_result_expires_after_bitop_ttl() {
        let store = Arc::new(MemoryStore::new());
        let counter = counter(store.clone());
        counter
            .track_event("login", "a", DEFAULT_NAMESPACE, datetime!(2024-03-09 10:00))
            .await
            .expect("track");
        let count = counter
            .count(
                datetime!(2024-03-09 00:00),
                datetime!(2024-03-10 00:00),
                "login",
                DEFAULT_NAMESPACE,
            )
            .await
            .expect("count");
        assert_eq!(count, 1);
        let compound = "redis_gadgets:global:login:or:2024-03-09T00:00:00:2024-03-10T00:00:00";
        let ttl = store.ttl(compound).await.expect("ttl").expect("expiry");
        assert!(ttl <= DEFAULT_BITOP_TTL);
    }
}
