//! Poller Module
//!
//! One poller per realm asks its lightningd for the full node list every
//! `poll_interval_secs` and writes every node with an IP address into the
//! network view, stamped with the time of the poll.
//!
//! ## Failure handling
//!
//! A failed cycle changes nothing in the view. Nodes seen before keep their
//! `last_seen` and age out through the sweep if the upstream stays down.

mod protocol;
mod rpc;

pub use rpc::{LightningRpc, NodeSource, RpcError};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::Metrics;
use crate::types::{NodeRecord, Realm};
use crate::view::{NetworkView, UpsertOutcome};

/// What one poll cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Nodes returned by the upstream
    pub listed: usize,

    /// Nodes new to the view
    pub inserted: usize,

    /// Known nodes refreshed
    pub updated: usize,

    /// Nodes without a usable address
    pub skipped: usize,
}

/// Feeds one realm of the network view from one node source
pub struct Poller {
    realm: Realm,
    source: Box<dyn NodeSource>,
    view: Arc<NetworkView>,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl Poller {
    pub fn new(
        realm: Realm,
        source: Box<dyn NodeSource>,
        view: Arc<NetworkView>,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        Self {
            realm,
            source,
            view,
            metrics,
            interval,
        }
    }

    /// Fetch the node list once and merge it into the view
    pub async fn poll_once(&mut self) -> Result<PollSummary, RpcError> {
        let nodes = self.source.list_nodes().await?;
        let now = self.view.now();

        let mut summary = PollSummary {
            listed: nodes.len(),
            ..Default::default()
        };

        for node in nodes {
            let record = NodeRecord::new(node.node_id, node.addresses, self.realm, now);
            match self.view.upsert(record).await {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Dropped => summary.skipped += 1,
            }
        }

        self.metrics
            .add_nodes_upserted((summary.inserted + summary.updated) as u64);
        Ok(summary)
    }

    /// Poll until `shutdown` flips. The first cycle runs immediately.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            "🔄 Polling realm {} from {} every {:?}",
            self.realm,
            self.source.describe(),
            self.interval
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }

            match self.poll_once().await {
                Ok(summary) => {
                    self.metrics.inc_poll_cycles();
                    debug!(
                        "Realm {}: {} listed, {} new, {} refreshed, {} without address",
                        self.realm, summary.listed, summary.inserted, summary.updated, summary.skipped
                    );
                }
                Err(e) => {
                    self.metrics.inc_poll_failures();
                    warn!("Realm {} poll failed: {}", self.realm, e);
                }
            }
        }

        info!("Poller for realm {} stopped", self.realm);
        Ok(())
    }
}
