//! Drives periodic template refresh against the node on two cadences: a
//! fast, cheap `getbestblockhash` poll that only triggers a full refresh
//! on a chain tip change, and a slower unconditional poll that refreshes
//! the template anyway to pick up new mempool transactions.

use {super::*, tokio::time::{interval, Duration}};

pub struct BlockUpdater<N: node::NodeClient> {
    registry: registry::TemplateRegistry<N>,
    prevhash_refresh: Duration,
    merkle_refresh: Duration,
    jobs_tx: tokio::sync::watch::Sender<Option<block_template::Notify>>,
}

impl<N: node::NodeClient> BlockUpdater<N> {
    pub fn new(
        registry: registry::TemplateRegistry<N>,
        prevhash_refresh: Duration,
        merkle_refresh: Duration,
    ) -> (Self, tokio::sync::watch::Receiver<Option<block_template::Notify>>) {
        let (jobs_tx, jobs_rx) = tokio::sync::watch::channel(None);
        (
            BlockUpdater {
                registry,
                prevhash_refresh,
                merkle_refresh,
                jobs_tx,
            },
            jobs_rx,
        )
    }

    pub fn registry(&self) -> &registry::TemplateRegistry<N> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut registry::TemplateRegistry<N> {
        &mut self.registry
    }

    /// Runs until `shutdown` is cancelled, polling the node on both
    /// cadences and broadcasting any new job to `jobs_rx`. The fast cadence
    /// only checks `getbestblockhash`, a cheap call, and falls through to a
    /// full refresh just on a hash change; the slow cadence always does the
    /// full refresh, as a backstop against a missed prevhash change. Both
    /// paths drive the same `update_block`, which is single-flight-guarded,
    /// so a tick that lands while the other's refresh is still in-flight is
    /// just a harmless no-op rather than a double fetch. Node errors are
    /// logged and swallowed: a missed refresh just means the next tick
    /// tries again.
    pub async fn run(mut self, shutdown: tokio_util::sync::CancellationToken) {
        let mut prevhash_ticker = interval(self.prevhash_refresh);
        let mut merkle_ticker = interval(self.merkle_refresh);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("block updater shutting down");
                    return;
                }
                _ = prevhash_ticker.tick() => self.poll_best_block_hash().await,
                _ = merkle_ticker.tick() => self.refresh().await,
            }
        }
    }

    async fn poll_best_block_hash(&mut self) {
        match self.registry.best_block_hash_changed().await {
            Ok(true) => self.refresh().await,
            Ok(false) => {}
            Err(error) => warn!("best block hash poll failed: {error}"),
        }
    }

    async fn refresh(&mut self) {
        match self.registry.update_block().await {
            Ok(Some(notify)) => {
                let _ = self.jobs_tx.send(Some(notify));
            }
            Ok(None) => {}
            Err(error) => warn!("template refresh failed: {error}"),
        }
    }
}
