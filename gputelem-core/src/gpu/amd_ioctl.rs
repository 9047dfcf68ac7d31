use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, TelemetryError};
use crate::gpu::SensorSource;
use crate::snapshot::{millidegrees_to_celsius, milliwatts_to_watts, GpuSnapshot};

// From the kernel's amdgpu uapi: DRM_IOW(DRM_COMMAND_BASE + 0x05,
// struct drm_amdgpu_info).
const DRM_IOCTL_AMDGPU_INFO: libc::c_ulong = 0x4020_6445;

const AMDGPU_INFO_SENSOR: u32 = 0x1d;
const AMDGPU_INFO_SENSOR_GFX_SCLK: u32 = 0x1;
const AMDGPU_INFO_SENSOR_GFX_MCLK: u32 = 0x2;
const AMDGPU_INFO_SENSOR_GPU_TEMP: u32 = 0x3;
const AMDGPU_INFO_SENSOR_GPU_LOAD: u32 = 0x4;
const AMDGPU_INFO_SENSOR_GPU_AVG_POWER: u32 = 0x5;

/// Mirror of `struct drm_amdgpu_info` for sensor queries. The union at
/// the tail is represented by its sensor_info member plus padding out
/// to the kernel's 32-byte layout. Built fresh for every exchange.
#[repr(C)]
struct AmdgpuInfoRequest {
    return_pointer: u64,
    return_size: u32,
    query: u32,
    sensor_type: u32,
    _pad: [u32; 3],
}

/// Sensor queries against an open amdgpu render node, one ioctl
/// exchange per metric. The descriptor is opened once at resolution
/// and kept for the process lifetime.
pub struct AmdIoctlSource {
    device: File,
}

impl AmdIoctlSource {
    /// Open the device node and issue a trial load query. Either step
    /// failing means the ioctl backend is unavailable and the selector
    /// should fall back to sysfs.
    pub fn open(device_node: &Path) -> Result<Self> {
        let device = File::open(device_node).map_err(|e| {
            TelemetryError::BackendUnavailable(format!(
                "cannot open {}: {}",
                device_node.display(),
                e
            ))
        })?;

        let source = Self { device };
        source.query_sensor(AMDGPU_INFO_SENSOR_GPU_LOAD).map_err(|e| {
            TelemetryError::BackendUnavailable(format!(
                "trial sensor query on {} failed: {}",
                device_node.display(),
                e
            ))
        })?;

        info!("amdgpu ioctl channel open on {}", device_node.display());
        Ok(source)
    }

    fn query_sensor(&self, sensor: u32) -> io::Result<u32> {
        let mut value: u32 = 0;
        let mut request = AmdgpuInfoRequest {
            return_pointer: &mut value as *mut u32 as u64,
            return_size: std::mem::size_of::<u32>() as u32,
            query: AMDGPU_INFO_SENSOR,
            sensor_type: sensor,
            _pad: [0; 3],
        };

        let rc = unsafe {
            libc::ioctl(
                self.device.as_raw_fd(),
                DRM_IOCTL_AMDGPU_INFO,
                &mut request as *mut AmdgpuInfoRequest,
            )
        };

        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(value)
        }
    }

    /// Apply one exchange to a snapshot field. A failed exchange keeps
    /// the field's previous value; the remaining exchanges still run.
    fn apply_sensor(&self, sensor: u32, label: &str, assign: impl FnOnce(u32)) -> bool {
        match self.query_sensor(sensor) {
            Ok(raw) => {
                assign(raw);
                true
            }
            Err(e) => {
                debug!("amdgpu sensor {} read failed: {}", label, e);
                false
            }
        }
    }
}

impl SensorSource for AmdIoctlSource {
    fn name(&self) -> &'static str {
        "amdgpu-ioctl"
    }

    fn poll(&mut self, snapshot: &mut GpuSnapshot) {
        let mut updated = false;

        updated |= self.apply_sensor(AMDGPU_INFO_SENSOR_GPU_LOAD, "load", |raw| {
            snapshot.load = raw;
        });
        updated |= self.apply_sensor(AMDGPU_INFO_SENSOR_GPU_TEMP, "temp", |raw| {
            snapshot.temperature = millidegrees_to_celsius(raw as i32);
        });
        updated |= self.apply_sensor(AMDGPU_INFO_SENSOR_GFX_SCLK, "sclk", |raw| {
            snapshot.core_clock_mhz = raw;
        });
        updated |= self.apply_sensor(AMDGPU_INFO_SENSOR_GPU_AVG_POWER, "power", |raw| {
            snapshot.power_usage_watts = milliwatts_to_watts(raw);
        });
        updated |= self.apply_sensor(AMDGPU_INFO_SENSOR_GFX_MCLK, "mclk", |raw| {
            snapshot.mem_clock_mhz = raw;
        });

        if updated {
            snapshot.mark_polled();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_request_matches_kernel_layout() {
        assert_eq!(std::mem::size_of::<AmdgpuInfoRequest>(), 32);
    }

    #[test]
    fn test_failed_exchanges_retain_previous_values() {
        // A regular file rejects the DRM ioctl, so every exchange
        // fails and the snapshot must keep its pre-failure values.
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"not a device").unwrap();
        let device = File::open(tmp.path()).unwrap();
        let mut source = AmdIoctlSource { device };

        let mut snapshot = GpuSnapshot {
            load: 42,
            temperature: 61,
            core_clock_mhz: 1500,
            mem_clock_mhz: 900,
            power_usage_watts: 120,
            ..Default::default()
        };

        source.poll(&mut snapshot);

        assert_eq!(snapshot.load, 42);
        assert_eq!(snapshot.temperature, 61);
        assert_eq!(snapshot.core_clock_mhz, 1500);
        assert_eq!(snapshot.mem_clock_mhz, 900);
        assert_eq!(snapshot.power_usage_watts, 120);
        assert!(snapshot.last_polled.is_none());
    }

    #[test]
    fn test_open_rejects_missing_node() {
        let err = AmdIoctlSource::open(Path::new("/nonexistent/renderD999"));
        assert!(err.is_err());
    }
}
