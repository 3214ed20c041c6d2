use anyhow::Result;
use tracing::info;

mod bench;
mod config;
mod probe;
mod signal;

use config::{HostConfig, Mode};

fn init_tracing() {
    // Default INFO; allow override via RUST_LOG
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // try_init also routes `log` records from the commutation core
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .compact()
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = HostConfig::load_default()?;
    info!(
        "Oxihall Host - {:?} mode, max {} RPM, PWM range {}",
        cfg.mode, cfg.motor.max_rpm, cfg.motor.pwm_range
    );

    match cfg.mode {
        Mode::Bench => bench::run(&cfg).await,
        Mode::Probe => probe::run(&cfg).await,
    }
}
