use crate::config::GputelemConfig;
use crate::gpu::{BackendSelector, GpuVendor, SensorSource};
use crate::snapshot::GpuSnapshot;
use tracing::{debug, info};

/// Owns the snapshot for one GPU and the backend resolved for it.
/// Resolution happens once, here; polling afterwards always delegates
/// to the same source. Callers read metrics through `snapshot()`.
pub struct Aggregator {
    snapshot: GpuSnapshot,
    source: Option<Box<dyn SensorSource>>,
}

impl Aggregator {
    /// Resolve the vendor's backend chain and build an aggregator
    /// around whatever it committed to. An exhausted chain still
    /// yields a working aggregator whose snapshot stays at defaults.
    pub fn resolve(vendor: GpuVendor, config: &GputelemConfig) -> Self {
        let source = BackendSelector::resolve(vendor, config);
        match &source {
            Some(s) => info!("Aggregator polling via {} backend", s.name()),
            None => info!("Aggregator has no backend for {:?}, snapshot stays zeroed", vendor),
        }
        Self {
            snapshot: GpuSnapshot::default(),
            source,
        }
    }

    /// Build around an already-resolved source. Also the seam tests
    /// use to poll against an isolated snapshot.
    pub fn with_source(source: Option<Box<dyn SensorSource>>) -> Self {
        Self {
            snapshot: GpuSnapshot::default(),
            source,
        }
    }

    /// Single entry point for external schedulers. Delegates to the
    /// resolved source; normalization already happened inside it.
    pub fn poll_current(&mut self) {
        match self.source.as_mut() {
            Some(source) => source.poll(&mut self.snapshot),
            None => debug!("poll_current with no resolved backend, skipping"),
        }
    }

    pub fn snapshot(&self) -> &GpuSnapshot {
        &self.snapshot
    }

    /// Name of the committed backend, if any. Diagnostic only.
    pub fn active_backend(&self) -> Option<&'static str> {
        self.source.as_deref().map(|s| s.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Source {}

        impl SensorSource for Source {
            fn name(&self) -> &'static str;
            fn poll(&mut self, snapshot: &mut GpuSnapshot);
        }
    }

    #[test]
    fn test_poll_delegates_to_source() {
        let mut source = MockSource::new();
        source.expect_poll().times(2).returning(|snapshot| {
            snapshot.load = 88;
            snapshot.temperature = 70;
        });

        let mut aggregator = Aggregator::with_source(Some(Box::new(source)));
        aggregator.poll_current();
        aggregator.poll_current();

        assert_eq!(aggregator.snapshot().load, 88);
        assert_eq!(aggregator.snapshot().temperature, 70);
    }

    #[test]
    fn test_no_backend_means_no_polls_and_default_snapshot() {
        let mut aggregator = Aggregator::with_source(None);
        aggregator.poll_current();
        aggregator.poll_current();

        assert_eq!(*aggregator.snapshot(), GpuSnapshot::default());
        assert!(aggregator.active_backend().is_none());
    }

    #[test]
    fn test_active_backend_reports_source_name() {
        let mut source = MockSource::new();
        source.expect_name().return_const("nvml");

        let aggregator = Aggregator::with_source(Some(Box::new(source)));
        assert_eq!(aggregator.active_backend(), Some("nvml"));
    }
}
