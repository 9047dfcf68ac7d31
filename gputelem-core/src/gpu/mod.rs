#[cfg(target_os = "linux")]
pub mod amd_ioctl;
pub mod amd_sysfs;
pub mod nvidia;

#[cfg(target_os = "linux")]
pub use amd_ioctl::AmdIoctlSource;
pub use amd_sysfs::AmdSysfsSource;
pub use nvidia::{NvidiaLegacyControlSource, NvidiaManagementSource, NvidiaPlatformSource};

use crate::config::GputelemConfig;
use crate::error::Result;
use crate::snapshot::GpuSnapshot;
use tracing::{info, warn};

/// One concrete backend capable of filling a snapshot. `poll` never
/// fails outward; read errors degrade individual fields and are logged.
pub trait SensorSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn poll(&mut self, snapshot: &mut GpuSnapshot);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Amd,
    Nvidia,
}

/// A backend that may or may not be usable on this machine. The probe
/// opens the backend's handles and issues a trial query; it is consumed
/// on use, so a candidate can only ever be probed once.
pub struct BackendCandidate {
    pub name: &'static str,
    pub probe: Box<dyn FnOnce() -> Result<Box<dyn SensorSource>> + Send>,
}

pub struct BackendSelector;

impl BackendSelector {
    /// Probe the vendor's candidates in priority order and commit to
    /// the first that succeeds. Returns `None` when the whole chain is
    /// exhausted; the vendor is then absent for the process lifetime.
    pub fn resolve(vendor: GpuVendor, config: &GputelemConfig) -> Option<Box<dyn SensorSource>> {
        Self::resolve_candidates(Self::candidates(vendor, config))
    }

    pub fn resolve_candidates(
        candidates: Vec<BackendCandidate>,
    ) -> Option<Box<dyn SensorSource>> {
        for candidate in candidates {
            match (candidate.probe)() {
                Ok(source) => {
                    info!("Using {} backend", candidate.name);
                    return Some(source);
                }
                Err(e) => {
                    warn!("{} backend unavailable: {}", candidate.name, e);
                }
            }
        }

        warn!("No GPU backend available, vendor will report no metrics");
        None
    }

    /// Candidate chains, highest priority first, filtered by the
    /// config's enable flags and by platform availability.
    fn candidates(vendor: GpuVendor, config: &GputelemConfig) -> Vec<BackendCandidate> {
        let mut candidates = Vec::new();

        match vendor {
            GpuVendor::Amd => {
                if !config.amd.enabled {
                    return candidates;
                }

                #[cfg(target_os = "linux")]
                {
                    let device_node = config.amd.device_node.clone();
                    candidates.push(BackendCandidate {
                        name: "amdgpu-ioctl",
                        probe: Box::new(move || {
                            AmdIoctlSource::open(&device_node)
                                .map(|s| Box::new(s) as Box<dyn SensorSource>)
                        }),
                    });
                }

                let device_dir = config.amd.sysfs_device_dir.clone();
                candidates.push(BackendCandidate {
                    name: "amdgpu-sysfs",
                    probe: Box::new(move || {
                        AmdSysfsSource::open(&device_dir)
                            .map(|s| Box::new(s) as Box<dyn SensorSource>)
                    }),
                });
            }
            GpuVendor::Nvidia => {
                if !config.nvidia.enabled {
                    return candidates;
                }

                if config.nvidia.enable_nvml {
                    candidates.push(BackendCandidate {
                        name: "nvml",
                        probe: Box::new(|| {
                            NvidiaManagementSource::probe()
                                .map(|s| Box::new(s) as Box<dyn SensorSource>)
                        }),
                    });
                }

                if config.nvidia.fallback_to_nvidia_settings {
                    candidates.push(BackendCandidate {
                        name: "nvidia-settings",
                        probe: Box::new(|| {
                            NvidiaLegacyControlSource::probe()
                                .map(|s| Box::new(s) as Box<dyn SensorSource>)
                        }),
                    });
                }

                if config.nvidia.fallback_to_nvidia_smi {
                    candidates.push(BackendCandidate {
                        name: "nvidia-smi",
                        probe: Box::new(|| {
                            NvidiaPlatformSource::probe()
                                .map(|s| Box::new(s) as Box<dyn SensorSource>)
                        }),
                    });
                }
            }
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NullSource(&'static str);

    impl SensorSource for NullSource {
        fn name(&self) -> &'static str {
            self.0
        }
        fn poll(&mut self, _snapshot: &mut GpuSnapshot) {}
    }

    fn counting_candidate(
        name: &'static str,
        counter: Arc<AtomicUsize>,
        succeeds: bool,
    ) -> BackendCandidate {
        BackendCandidate {
            name,
            probe: Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                if succeeds {
                    Ok(Box::new(NullSource(name)) as Box<dyn SensorSource>)
                } else {
                    Err(TelemetryError::BackendUnavailable(name.to_string()))
                }
            }),
        }
    }

    #[test]
    fn test_first_successful_probe_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let source = BackendSelector::resolve_candidates(vec![
            counting_candidate("first", Arc::clone(&first), true),
            counting_candidate("second", Arc::clone(&second), true),
        ])
        .expect("first candidate should resolve");

        assert_eq!(source.name(), "first");
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_probe_advances_chain() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let source = BackendSelector::resolve_candidates(vec![
            counting_candidate("first", Arc::clone(&first), false),
            counting_candidate("second", Arc::clone(&second), true),
        ])
        .expect("fallback candidate should resolve");

        assert_eq!(source.name(), "second");
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exhausted_chain_yields_none() {
        let count = Arc::new(AtomicUsize::new(0));

        let resolved = BackendSelector::resolve_candidates(vec![
            counting_candidate("a", Arc::clone(&count), false),
            counting_candidate("b", Arc::clone(&count), false),
            counting_candidate("c", Arc::clone(&count), false),
        ]);

        assert!(resolved.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_disabled_vendor_has_no_candidates() {
        let mut config = GputelemConfig::default();
        config.amd.enabled = false;
        config.nvidia.enabled = false;

        assert!(BackendSelector::candidates(GpuVendor::Amd, &config).is_empty());
        assert!(BackendSelector::candidates(GpuVendor::Nvidia, &config).is_empty());
    }

    #[test]
    fn test_nvidia_chain_priority_order() {
        let config = GputelemConfig::default();
        let names: Vec<_> = BackendSelector::candidates(GpuVendor::Nvidia, &config)
            .iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["nvml", "nvidia-settings", "nvidia-smi"]);
    }

    #[test]
    fn test_amd_chain_falls_back_to_sysfs() {
        use crate::aggregator::Aggregator;
        use std::path::PathBuf;

        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("gpu_busy_percent"), "73").unwrap();
        std::fs::write(dir.path().join("temp1_input"), "52000").unwrap();

        let mut config = GputelemConfig::default();
        config.amd.device_node = PathBuf::from("/nonexistent/renderD999");
        config.amd.sysfs_device_dir = dir.path().to_path_buf();

        let mut aggregator = Aggregator::resolve(GpuVendor::Amd, &config);
        assert_eq!(aggregator.active_backend(), Some("amdgpu-sysfs"));

        aggregator.poll_current();
        assert_eq!(aggregator.snapshot().load, 73);
        assert_eq!(aggregator.snapshot().temperature, 52);
    }
}
