pub mod aggregator;
pub mod config;
pub mod error;
pub mod gpu;
pub mod sampler;
pub mod snapshot;

pub use aggregator::Aggregator;
pub use config::GputelemConfig;
pub use error::{Result, TelemetryError};
pub use gpu::{BackendSelector, GpuVendor, SensorSource};
pub use sampler::Sampler;
pub use snapshot::GpuSnapshot;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,gputelem_core=debug"))
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
