use gputelem_core::{init_logging, Aggregator, GputelemConfig, GpuVendor, Sampler};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    init_logging();

    info!("gputelem - GPU telemetry aggregator");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match GputelemConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            info!("Using default configuration");
            GputelemConfig::default()
        }
    };

    info!("Poll interval: {}s", config.service.poll_interval_secs);

    // Vendor discovery is out of scope here; try AMD first, then
    // NVIDIA, and run with whichever chain committed to a backend.
    let mut aggregator = Aggregator::resolve(GpuVendor::Amd, &config);
    if aggregator.active_backend().is_none() {
        aggregator = Aggregator::resolve(GpuVendor::Nvidia, &config);
    }

    match aggregator.active_backend() {
        Some(name) => info!("Active backend: {}", name),
        None => error!("No GPU backend available, snapshot will stay zeroed"),
    }

    let sampler = Sampler::new(aggregator, config.service.poll_interval_secs);

    tokio::select! {
        result = sampler.run() => {
            if let Err(e) = result {
                error!("Sampler error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
            sampler.shutdown();
        }
    }

    info!("gputelem terminated gracefully");
}
