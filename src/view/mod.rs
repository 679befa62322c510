//! Network View Module
//!
//! In-memory registry of Lightning nodes, partitioned by realm.
//! Pollers write into it, the DNS server samples from it, and a periodic
//! sweep evicts nodes the upstream stopped reporting.
//!
//! ## Locking
//!
//! Each realm is its own shard behind its own `RwLock`. The outer map is only
//! locked long enough to fetch a shard handle, so a burst of DNS sampling on
//! one realm never stalls the poller of another, and readers of the same realm
//! proceed in parallel.

mod realm;

pub use realm::UpsertOutcome;

use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::types::{NodeRecord, Realm, Timestamp};
use realm::RealmNodes;

/// Counts for one realm
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RealmStats {
    pub realm: Realm,

    /// Records held, including stale ones awaiting the sweep
    pub total_nodes: usize,

    /// Records inside the freshness window
    pub fresh_nodes: usize,
}

/// Shared view of known nodes
pub struct NetworkView {
    realms: RwLock<HashMap<Realm, Arc<RwLock<RealmNodes>>>>,

    /// Maximum age for a node to be handed out
    freshness_window_secs: u64,

    clock: Arc<dyn Clock>,
}

impl NetworkView {
    pub fn new(freshness_window_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            realms: RwLock::new(HashMap::new()),
            freshness_window_secs,
            clock,
        }
    }

    /// Make a realm known so it shows up in stats before its first poll
    pub async fn register_realm(&self, realm: Realm) {
        self.shard_or_create(realm).await;
    }

    /// Insert a node or refresh the addresses and `last_seen` of a known one.
    /// Records without addresses are ignored.
    pub async fn upsert(&self, record: NodeRecord) -> UpsertOutcome {
        if record.addresses.is_empty() {
            return UpsertOutcome::Dropped;
        }

        let shard = self.shard_or_create(record.realm).await;
        let mut nodes = shard.write().await;
        nodes.upsert(record)
    }

    /// Remove every record with `now - last_seen > window_secs`
    pub async fn evict_stale(&self, now: Timestamp, window_secs: u64) -> usize {
        let shards: Vec<_> = self.realms.read().await.values().cloned().collect();

        let mut removed = 0;
        for shard in shards {
            removed += shard.write().await.evict_stale(now, window_secs);
        }
        removed
    }

    /// Up to `n` fresh records from `realm`, uniformly without replacement.
    /// Serving goes through [`sample_matching`](Self::sample_matching) with
    /// the handler's own randomness.
    #[cfg(test)]
    pub async fn sample(&self, realm: Realm, n: usize) -> Vec<NodeRecord> {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(rand::random());
        self.sample_matching(realm, n, |_| true, &mut rng).await
    }

    /// Like [`sample`](Self::sample) but only draws from records accepted by
    /// `filter`, with an explicit randomness source.
    pub async fn sample_matching<R, F>(
        &self,
        realm: Realm,
        n: usize,
        filter: F,
        rng: &mut R,
    ) -> Vec<NodeRecord>
    where
        R: Rng + ?Sized,
        F: Fn(&NodeRecord) -> bool,
    {
        let Some(shard) = self.shard(realm).await else {
            return Vec::new();
        };

        let now = self.clock.now();
        let nodes = shard.read().await;
        nodes.sample(n, now, self.freshness_window_secs, filter, rng)
    }

    /// Per-realm counts, ordered by realm
    pub async fn stats(&self) -> Vec<RealmStats> {
        let shards: Vec<_> = self
            .realms
            .read()
            .await
            .iter()
            .map(|(realm, shard)| (*realm, shard.clone()))
            .collect();

        let now = self.clock.now();
        let mut stats = Vec::with_capacity(shards.len());
        for (realm, shard) in shards {
            let nodes = shard.read().await;
            stats.push(RealmStats {
                realm,
                total_nodes: nodes.len(),
                fresh_nodes: nodes.fresh_count(now, self.freshness_window_secs),
            });
        }
        stats.sort_by_key(|s| s.realm);
        stats
    }

    pub fn freshness_window_secs(&self) -> u64 {
        self.freshness_window_secs
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    async fn shard(&self, realm: Realm) -> Option<Arc<RwLock<RealmNodes>>> {
        self.realms.read().await.get(&realm).cloned()
    }

    async fn shard_or_create(&self, realm: Realm) -> Arc<RwLock<RealmNodes>> {
        if let Some(shard) = self.shard(realm).await {
            return shard;
        }

        self.realms
            .write()
            .await
            .entry(realm)
            .or_insert_with(|| Arc::new(RwLock::new(RealmNodes::new())))
            .clone()
    }
}
