use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor};
use nvml_wrapper::Nvml;
use once_cell::sync::OnceCell;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TelemetryError};
use crate::gpu::SensorSource;
use crate::snapshot::{bytes_to_gib, mebibytes_to_gib, milliwatts_to_watts, GpuSnapshot};

static NVML_INSTANCE: OnceCell<Arc<Nvml>> = OnceCell::new();

/// One aggregated device reading from the management library.
#[derive(Debug, Clone, Copy)]
struct DeviceSample {
    load: u32,
    temperature: u32,
    memory_used: u64,
    memory_total: u64,
    core_clock_mhz: u32,
    mem_clock_mhz: u32,
    power_milliwatts: u32,
}

/// Primary NVIDIA backend: the NVML management library, queried once
/// per poll for a full device sample. The library context is
/// initialized once per process and shared.
pub struct NvidiaManagementSource {
    nvml: Arc<Nvml>,
    device_index: u32,
}

impl NvidiaManagementSource {
    pub fn probe() -> Result<Self> {
        let nvml = NVML_INSTANCE.get_or_try_init(|| {
            info!("Initializing NVML");
            Nvml::init()
                .map(Arc::new)
                .map_err(|e| {
                    error!("Failed to initialize NVML: {:?}", e);
                    TelemetryError::NvmlInitError(format!("{e:?}"))
                })
        })?;

        let device_count = nvml.device_count()
            .map_err(|e| TelemetryError::NvmlError(format!("Failed to get device count: {e:?}")))?;
        if device_count == 0 {
            return Err(TelemetryError::BackendUnavailable(
                "NVML reports no devices".to_string()
            ));
        }

        let source = Self {
            nvml: Arc::clone(nvml),
            device_index: 0,
        };

        // A full trial sample decides availability, not just init.
        source.sample()?;

        info!("NVML backend ready with {} device(s)", device_count);
        Ok(source)
    }

    fn sample(&self) -> Result<DeviceSample> {
        let device = self.nvml.device_by_index(self.device_index)
            .map_err(|e| TelemetryError::NvmlError(format!("Failed to get device {}: {e:?}", self.device_index)))?;

        let utilization = device.utilization_rates()
            .map_err(|e| TelemetryError::NvmlError(format!("Failed to get utilization: {e:?}")))?;

        let memory = device.memory_info()
            .map_err(|e| TelemetryError::NvmlError(format!("Failed to get memory info: {e:?}")))?;

        let temperature = device.temperature(TemperatureSensor::Gpu)
            .map_err(|e| TelemetryError::NvmlError(format!("Failed to get temperature: {e:?}")))?;

        let core_clock_mhz = device.clock_info(Clock::Graphics)
            .map_err(|e| TelemetryError::NvmlError(format!("Failed to get graphics clock: {e:?}")))?;

        let mem_clock_mhz = device.clock_info(Clock::Memory)
            .map_err(|e| TelemetryError::NvmlError(format!("Failed to get memory clock: {e:?}")))?;

        let power_milliwatts = device.power_usage()
            .map_err(|e| TelemetryError::NvmlError(format!("Failed to get power usage: {e:?}")))?;

        Ok(DeviceSample {
            load: utilization.gpu,
            temperature,
            memory_used: memory.used,
            memory_total: memory.total,
            core_clock_mhz,
            mem_clock_mhz,
            power_milliwatts,
        })
    }
}

impl SensorSource for NvidiaManagementSource {
    fn name(&self) -> &'static str {
        "nvml"
    }

    fn poll(&mut self, snapshot: &mut GpuSnapshot) {
        match self.sample() {
            Ok(sample) => {
                snapshot.load = sample.load;
                snapshot.temperature = sample.temperature as i32;
                snapshot.memory_used_gib = bytes_to_gib(sample.memory_used);
                snapshot.memory_total_gib = bytes_to_gib(sample.memory_total);
                snapshot.core_clock_mhz = sample.core_clock_mhz;
                snapshot.mem_clock_mhz = sample.mem_clock_mhz;
                snapshot.power_usage_watts = milliwatts_to_watts(sample.power_milliwatts);
                snapshot.mark_polled();
            }
            Err(e) => {
                warn!("NVML sample failed, snapshot left unchanged: {}", e);
            }
        }
    }
}

/// Legacy control-panel fallback, reached through per-attribute
/// `nvidia-settings` queries. Memory arrives in mebibytes and there is
/// no power figure; that field keeps its default.
pub struct NvidiaLegacyControlSource;

impl NvidiaLegacyControlSource {
    pub fn probe() -> Result<Self> {
        query_attribute("GPUUtilization")?;
        info!("nvidia-settings control backend ready");
        Ok(Self)
    }
}

impl SensorSource for NvidiaLegacyControlSource {
    fn name(&self) -> &'static str {
        "nvidia-settings"
    }

    fn poll(&mut self, snapshot: &mut GpuSnapshot) {
        let mut updated = false;

        match query_attribute("GPUUtilization").map(|s| parse_utilization(&s)) {
            Ok(Some(load)) => {
                snapshot.load = load;
                updated = true;
            }
            Ok(None) => debug!("GPUUtilization output unparseable"),
            Err(e) => debug!("GPUUtilization query failed: {}", e),
        }

        match query_attribute("GPUCoreTemp").map(|s| s.parse::<i32>()) {
            Ok(Ok(temp)) => {
                snapshot.temperature = temp;
                updated = true;
            }
            Ok(Err(_)) => debug!("GPUCoreTemp output unparseable"),
            Err(e) => debug!("GPUCoreTemp query failed: {}", e),
        }

        match query_attribute("UsedDedicatedGPUMemory").map(|s| s.parse::<u64>()) {
            Ok(Ok(mib)) => {
                snapshot.memory_used_gib = mebibytes_to_gib(mib);
                updated = true;
            }
            Ok(Err(_)) => debug!("UsedDedicatedGPUMemory output unparseable"),
            Err(e) => debug!("UsedDedicatedGPUMemory query failed: {}", e),
        }

        match query_attribute("TotalDedicatedGPUMemory").map(|s| s.parse::<u64>()) {
            Ok(Ok(mib)) => {
                snapshot.memory_total_gib = mebibytes_to_gib(mib);
                updated = true;
            }
            Ok(Err(_)) => debug!("TotalDedicatedGPUMemory output unparseable"),
            Err(e) => debug!("TotalDedicatedGPUMemory query failed: {}", e),
        }

        match query_attribute("GPUCurrentClockFreqs").map(|s| parse_clock_pair(&s)) {
            Ok(Some((core, mem))) => {
                snapshot.core_clock_mhz = core;
                snapshot.mem_clock_mhz = mem;
                updated = true;
            }
            Ok(None) => debug!("GPUCurrentClockFreqs output unparseable"),
            Err(e) => debug!("GPUCurrentClockFreqs query failed: {}", e),
        }

        if updated {
            snapshot.mark_polled();
        }
    }
}

/// Platform management tool fallback: one `nvidia-smi` CSV query per
/// poll. Same unit shape as the legacy path: mebibyte memory, no
/// power figure.
pub struct NvidiaPlatformSource;

impl NvidiaPlatformSource {
    pub fn probe() -> Result<Self> {
        let line = Self::query_csv()?;
        parse_smi_line(&line).ok_or_else(|| {
            TelemetryError::BackendUnavailable("nvidia-smi output unparseable".to_string())
        })?;
        info!("nvidia-smi platform backend ready");
        Ok(Self)
    }

    fn query_csv() -> Result<String> {
        let output = Command::new("nvidia-smi")
            .args([
                "--query-gpu=utilization.gpu,temperature.gpu,memory.used,memory.total,clocks.gr,clocks.mem",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .map_err(|e| TelemetryError::BackendUnavailable(format!("Failed to run nvidia-smi: {e}")))?;

        if !output.status.success() {
            return Err(TelemetryError::BackendUnavailable(
                "nvidia-smi command failed".to_string()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .next()
            .map(|l| l.to_string())
            .ok_or_else(|| TelemetryError::InvalidData("nvidia-smi produced no output".to_string()))
    }
}

impl SensorSource for NvidiaPlatformSource {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    fn poll(&mut self, snapshot: &mut GpuSnapshot) {
        let line = match Self::query_csv() {
            Ok(line) => line,
            Err(e) => {
                warn!("nvidia-smi query failed, snapshot left unchanged: {}", e);
                return;
            }
        };

        match parse_smi_line(&line) {
            Some(reading) => {
                snapshot.load = reading.load;
                snapshot.temperature = reading.temperature;
                snapshot.memory_used_gib = mebibytes_to_gib(reading.memory_used_mib);
                snapshot.memory_total_gib = mebibytes_to_gib(reading.memory_total_mib);
                snapshot.core_clock_mhz = reading.core_clock_mhz;
                snapshot.mem_clock_mhz = reading.mem_clock_mhz;
                snapshot.mark_polled();
            }
            None => {
                warn!("nvidia-smi line unparseable: {:?}", line);
            }
        }
    }
}

fn query_attribute(attribute: &str) -> Result<String> {
    let output = Command::new("nvidia-settings")
        .args(["-t", "-q"])
        .arg(format!("[gpu:0]/{attribute}"))
        .output()
        .map_err(|e| TelemetryError::BackendUnavailable(format!("Failed to run nvidia-settings: {e}")))?;

    if !output.status.success() {
        return Err(TelemetryError::SensorError(format!(
            "nvidia-settings query for {attribute} failed"
        )));
    }

    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() {
        return Err(TelemetryError::InvalidData(format!(
            "nvidia-settings returned nothing for {attribute}"
        )));
    }
    Ok(value)
}

/// "graphics=37, memory=22, video=0, PCIe=5" -> 37
fn parse_utilization(raw: &str) -> Option<u32> {
    raw.split(',')
        .find_map(|part| part.trim().strip_prefix("graphics="))
        .and_then(|v| v.trim().parse().ok())
}

/// "1850,7000" -> (1850, 7000)
fn parse_clock_pair(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.split(',').map(str::trim);
    let core = parts.next()?.parse().ok()?;
    let mem = parts.next()?.parse().ok()?;
    Some((core, mem))
}

#[derive(Debug, PartialEq)]
struct SmiReading {
    load: u32,
    temperature: i32,
    memory_used_mib: u64,
    memory_total_mib: u64,
    core_clock_mhz: u32,
    mem_clock_mhz: u32,
}

fn parse_smi_line(line: &str) -> Option<SmiReading> {
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();

    if parts.len() < 6 {
        return None;
    }

    Some(SmiReading {
        load: parts[0].parse().ok()?,
        temperature: parts[1].parse().ok()?,
        memory_used_mib: parts[2].parse().ok()?,
        memory_total_mib: parts[3].parse().ok()?,
        core_clock_mhz: parts[4].parse().ok()?,
        mem_clock_mhz: parts[5].parse().ok()?,
    })
}
