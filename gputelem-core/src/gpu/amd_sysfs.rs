use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::{Result, TelemetryError};
use crate::gpu::SensorSource;
use crate::snapshot::{
    bytes_to_gib, hertz_to_megahertz, microwatts_to_watts, millidegrees_to_celsius, GpuSnapshot,
};

/// Cached handles to the amdgpu sysfs pseudo-files. The kernel keeps
/// each file's identity fixed, so the handles are opened once at
/// resolution and rewound before every read instead of reopened.
/// A file missing at open time just means that metric is unsupported.
pub struct AmdSysfsSource {
    busy: Option<File>,
    temp: Option<File>,
    vram_total: Option<File>,
    vram_used: Option<File>,
    core_clock: Option<File>,
    memory_clock: Option<File>,
    power_usage: Option<File>,
}

impl AmdSysfsSource {
    /// Open the expected pseudo-files under the card's device
    /// directory. Individually-missing files are skipped; only a
    /// directory with none of them makes the backend unavailable.
    pub fn open(device_dir: &Path) -> Result<Self> {
        let hwmon_dir = locate_hwmon(device_dir);

        let source = Self {
            busy: open_metric(&device_dir.join("gpu_busy_percent")),
            temp: open_metric(&hwmon_dir.join("temp1_input")),
            vram_total: open_metric(&device_dir.join("mem_info_vram_total")),
            vram_used: open_metric(&device_dir.join("mem_info_vram_used")),
            core_clock: open_metric(&hwmon_dir.join("freq1_input")),
            memory_clock: open_metric(&hwmon_dir.join("freq2_input")),
            power_usage: open_metric(&hwmon_dir.join("power1_average")),
        };

        if source.open_count() == 0 {
            return Err(TelemetryError::BackendUnavailable(format!(
                "no amdgpu sysfs metrics under {}",
                device_dir.display()
            )));
        }

        info!(
            "amdgpu sysfs backend open, {}/7 metrics available under {}",
            source.open_count(),
            device_dir.display()
        );
        Ok(source)
    }

    fn open_count(&self) -> usize {
        [
            self.busy.is_some(),
            self.temp.is_some(),
            self.vram_total.is_some(),
            self.vram_used.is_some(),
            self.core_clock.is_some(),
            self.memory_clock.is_some(),
            self.power_usage.is_some(),
        ]
        .iter()
        .filter(|open| **open)
        .count()
    }
}

impl SensorSource for AmdSysfsSource {
    fn name(&self) -> &'static str {
        "amdgpu-sysfs"
    }

    fn poll(&mut self, snapshot: &mut GpuSnapshot) {
        let mut updated = false;

        if let Some(file) = self.busy.as_mut() {
            snapshot.load = read_or_zero::<u32>(file, "gpu_busy_percent");
            updated = true;
        }

        if let Some(file) = self.temp.as_mut() {
            let raw = read_or_zero::<i32>(file, "temp1_input");
            snapshot.temperature = millidegrees_to_celsius(raw);
            updated = true;
        }

        if let Some(file) = self.vram_total.as_mut() {
            let raw = read_or_zero::<u64>(file, "mem_info_vram_total");
            snapshot.memory_total_gib = bytes_to_gib(raw);
            updated = true;
        }

        if let Some(file) = self.vram_used.as_mut() {
            let raw = read_or_zero::<u64>(file, "mem_info_vram_used");
            snapshot.memory_used_gib = bytes_to_gib(raw);
            updated = true;
        }

        if let Some(file) = self.core_clock.as_mut() {
            let raw = read_or_zero::<u64>(file, "freq1_input");
            snapshot.core_clock_mhz = hertz_to_megahertz(raw) as u32;
            updated = true;
        }

        if let Some(file) = self.memory_clock.as_mut() {
            let raw = read_or_zero::<u64>(file, "freq2_input");
            snapshot.mem_clock_mhz = hertz_to_megahertz(raw) as u32;
            updated = true;
        }

        if let Some(file) = self.power_usage.as_mut() {
            let raw = read_or_zero::<u64>(file, "power1_average");
            snapshot.power_usage_watts = microwatts_to_watts(raw) as u32;
            updated = true;
        }

        if updated {
            snapshot.mark_polled();
        }
    }
}

fn open_metric(path: &Path) -> Option<File> {
    match File::open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            debug!("sysfs metric {} unavailable: {}", path.display(), e);
            None
        }
    }
}

/// The hwmon files live one level down, under a kernel-numbered
/// subdirectory. If none exists, fall back to the device directory
/// itself so flat layouts (and test fixtures) still work.
fn locate_hwmon(device_dir: &Path) -> PathBuf {
    let hwmon_root = device_dir.join("hwmon");
    if let Ok(entries) = std::fs::read_dir(&hwmon_root) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                return entry.path();
            }
        }
    }
    device_dir.to_path_buf()
}

/// Rewind, re-read and parse one decimal integer. Unlike the ioctl
/// path, any failure here substitutes zero: a pseudo-file that exists
/// either yields a value or a well-defined zero, never a stale one.
fn read_value<T: FromStr>(file: &mut File) -> Result<T> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    contents
        .trim()
        .parse::<T>()
        .map_err(|_| TelemetryError::InvalidData(format!("unparseable sysfs value {contents:?}")))
}

fn read_or_zero<T: FromStr + Default>(file: &mut File, label: &str) -> T {
    match read_value::<T>(file) {
        Ok(value) => value,
        Err(e) => {
            debug!("sysfs read of {} failed, substituting zero: {}", label, e);
            T::default()
        }
    }
}
