use crate::aggregator::Aggregator;
use crate::error::Result;
use crate::snapshot::GpuSnapshot;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, info};

/// Drives an aggregator on a fixed interval. Polling stays strictly
/// sequential; the lock exists only so readers can take snapshots
/// between ticks.
pub struct Sampler {
    aggregator: Arc<RwLock<Aggregator>>,
    poll_interval: Duration,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl Sampler {
    pub fn new(aggregator: Aggregator, poll_interval_secs: u64) -> Self {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        Self {
            aggregator: Arc::new(RwLock::new(aggregator)),
            poll_interval: Duration::from_secs(poll_interval_secs),
            shutdown_tx,
        }
    }

    /// Shared handle for consumers that want to read snapshots while
    /// the sampler runs.
    pub fn aggregator(&self) -> Arc<RwLock<Aggregator>> {
        Arc::clone(&self.aggregator)
    }

    pub async fn latest_snapshot(&self) -> GpuSnapshot {
        self.aggregator.read().await.snapshot().clone()
    }

    /// Poll until shutdown. Each tick is one `poll_current`; a slow
    /// backend stalls that tick and nothing else.
    pub async fn run(&self) -> Result<()> {
        info!("Sampler starting, interval {:?}", self.poll_interval);

        let mut ticker = interval(self.poll_interval);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut aggregator = self.aggregator.write().await;
                    aggregator.poll_current();
                    debug!("Polled snapshot: {:?}", aggregator.snapshot());
                }
                _ = shutdown_rx.recv() => {
                    info!("Sampler shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SensorSource;

    struct FixedSource;

    impl SensorSource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn poll(&mut self, snapshot: &mut GpuSnapshot) {
            snapshot.load = 33;
        }
    }

    #[tokio::test]
    async fn test_sampler_polls_until_shutdown() {
        let aggregator = Aggregator::with_source(Some(Box::new(FixedSource)));
        let sampler = Arc::new(Sampler::new(aggregator, 1));

        let runner = {
            let sampler = Arc::clone(&sampler);
            tokio::spawn(async move { sampler.run().await })
        };

        // First tick of `interval` fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        sampler.shutdown();
        runner.await.unwrap().unwrap();

        assert_eq!(sampler.latest_snapshot().await.load, 33);
    }
}
