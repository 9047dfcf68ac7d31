use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("NVML initialization failed: {0}")]
    NvmlInitError(String),

    #[error("NVML operation failed: {0}")]
    NvmlError(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Sensor query failed: {0}")]
    SensorError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
