//! Global Deduplicator
//!
//! One identity set shared by every ingestion worker. An event is identified
//! by its `(message id, request id)` pair; the first admission of a key wins
//! and every later one is rejected, regardless of which file or worker saw it.
//!
//! The set is an explicit value rather than a global so each pipeline, live
//! monitor or test owns an isolated instance. Wrap it in an [`Arc`] to share.
//!
//! [`Arc`]: std::sync::Arc

use crate::models::{DedupKey, UsageEvent};
use dashmap::DashSet;

#[derive(Debug, Default)]
pub struct DedupSet {
    seen: DashSet<DedupKey>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once per distinct key.
    ///
    /// `DashSet::insert` holds the shard lock across check-and-insert, so two
    /// workers racing on the same key can never both be admitted.
    pub fn admit(&self, key: DedupKey) -> bool {
        self.seen.insert(key)
    }

    /// Admit an event by its identifiers. Events without a complete key
    /// bypass deduplication and are always admitted.
    pub fn admit_event(&self, event: &UsageEvent) -> bool {
        match event.dedup_key() {
            Some(key) => self.admit(key),
            None => true,
        }
    }

    /// Number of distinct keys admitted so far
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
