use serde::{Deserialize, Serialize};

/// Normalized GPU health record. One instance per monitored GPU; every
/// field starts at zero and is overwritten by whichever backend can
/// produce it. Fields a backend cannot produce keep their last value,
/// so consumers must tolerate metrics that stop updating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuSnapshot {
    /// Utilization percentage, 0-100.
    pub load: u32,
    /// Degrees Celsius.
    pub temperature: i32,
    pub memory_used_gib: f64,
    pub memory_total_gib: f64,
    pub core_clock_mhz: u32,
    pub mem_clock_mhz: u32,
    pub power_usage_watts: u32,
    /// Wall-clock time of the last successful poll, if any.
    pub last_polled: Option<chrono::DateTime<chrono::Utc>>,
}

impl GpuSnapshot {
    pub fn mark_polled(&mut self) {
        self.last_polled = Some(chrono::Utc::now());
    }
}

// Unit conversions shared by the sensor sources. Raw units follow the
// interfaces they come from: the kernel reports temperature in
// milli-degrees and sysfs power in microwatts, NVML reports power in
// milliwatts and memory in bytes, the legacy control path reports
// memory in mebibytes.

pub fn millidegrees_to_celsius(raw: i32) -> i32 {
    raw / 1000
}

pub fn milliwatts_to_watts(raw: u32) -> u32 {
    raw / 1000
}

pub fn microwatts_to_watts(raw: u64) -> u64 {
    raw / 1_000_000
}

pub fn hertz_to_megahertz(raw: u64) -> u64 {
    raw / 1_000_000
}

pub fn bytes_to_gib(raw: u64) -> f64 {
    raw as f64 / (1u64 << 30) as f64
}

pub fn mebibytes_to_gib(raw: u64) -> f64 {
    raw as f64 / 1024.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot_is_zeroed() {
        let snapshot = GpuSnapshot::default();
        assert_eq!(snapshot.load, 0);
        assert_eq!(snapshot.temperature, 0);
        assert_eq!(snapshot.memory_used_gib, 0.0);
        assert_eq!(snapshot.memory_total_gib, 0.0);
        assert_eq!(snapshot.core_clock_mhz, 0);
        assert_eq!(snapshot.mem_clock_mhz, 0);
        assert_eq!(snapshot.power_usage_watts, 0);
        assert!(snapshot.last_polled.is_none());
    }

    #[test]
    fn test_temperature_conversion() {
        assert_eq!(millidegrees_to_celsius(45000), 45);
        assert_eq!(millidegrees_to_celsius(52000), 52);
        assert_eq!(millidegrees_to_celsius(999), 0);
    }

    #[test]
    fn test_power_conversions() {
        assert_eq!(milliwatts_to_watts(250_000), 250);
        assert_eq!(microwatts_to_watts(180_000_000), 180);
    }

    #[test]
    fn test_clock_conversion() {
        assert_eq!(hertz_to_megahertz(1_850_000_000), 1850);
    }

    #[test]
    fn test_memory_conversions() {
        assert_eq!(bytes_to_gib(4_294_967_296), 4.0);
        assert_eq!(bytes_to_gib(0), 0.0);
        assert_eq!(mebibytes_to_gib(2048), 2.0);
    }
}
