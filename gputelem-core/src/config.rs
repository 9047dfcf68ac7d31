use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GputelemConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub amd: AmdConfig,

    #[serde(default)]
    pub nvidia: NvidiaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmdConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// DRM render node carrying the amdgpu info ioctl.
    #[serde(default = "default_device_node")]
    pub device_node: PathBuf,

    /// sysfs device directory of the card (holds gpu_busy_percent,
    /// mem_info_vram_* and the hwmon subdirectory).
    #[serde(default = "default_sysfs_device_dir")]
    pub sysfs_device_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvidiaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub enable_nvml: bool,

    #[serde(default = "default_true")]
    pub fallback_to_nvidia_settings: bool,

    #[serde(default = "default_true")]
    pub fallback_to_nvidia_smi: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for AmdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_node: default_device_node(),
            sysfs_device_dir: default_sysfs_device_dir(),
        }
    }
}

impl Default for NvidiaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_nvml: true,
            fallback_to_nvidia_settings: true,
            fallback_to_nvidia_smi: true,
        }
    }
}

impl GputelemConfig {
    pub fn load() -> crate::error::Result<Self> {
        let config_path = Self::config_path();

        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&GputelemConfig::default())?)
            .add_source(
                config::File::from(config_path)
                    .required(false)
            )
            .add_source(
                config::Environment::with_prefix("GPUTELEM")
                    .separator("_")
            );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gputelem")
            .join("config.toml")
    }
}

fn default_poll_interval() -> u64 { 2 }
fn default_true() -> bool { true }

fn default_device_node() -> PathBuf {
    PathBuf::from("/dev/dri/renderD128")
}

fn default_sysfs_device_dir() -> PathBuf {
    PathBuf::from("/sys/class/drm/card0/device")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GputelemConfig::default();
        assert_eq!(config.service.poll_interval_secs, 2);
        assert!(config.amd.enabled);
        assert!(config.nvidia.enable_nvml);
        assert_eq!(
            config.amd.device_node,
            PathBuf::from("/dev/dri/renderD128")
        );
    }
}
