//! CLI entry point for scope-adapters
//!
//! ```bash
//! scope-adapters devices
//! scope-adapters snap
//! scope-adapters --config lab.toml sequence --count 20 --interval-ms 100
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scope_adapters::config::{AppConfig, DEFAULT_CONFIG_PATH};
use scope_adapters::logging;
use scope_adapters::registry::DeviceRegistry;
use scope_driver_acquire::{DualCamera, DualCameraConfig, SimulatedProvider};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const CAMERA_DRIVER: &str = "acquire_dual_camera";
const DEMO_CAMERA_ID: &str = "demo_camera";

#[derive(Parser)]
#[command(name = "scope-adapters")]
#[command(about = "Dual camera acquisition and ASI Tiger device adapters", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List driver types and configured devices
    Devices,

    /// Snap one image pair and print per-channel statistics
    Snap {
        /// Device id (default: first configured camera, else a demo camera)
        #[arg(long)]
        device: Option<String>,
    },

    /// Acquire a sequence of image pairs
    Sequence {
        /// Number of pairs
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        count: u64,

        /// Minimum time between delivered pairs
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config)?;
    tracing::debug!(config = %cli.config.display(), devices = config.devices.len(), "configuration loaded");

    match cli.command {
        Commands::Devices => list_devices(&config).await,
        Commands::Snap { device } => snap(&config, device).await,
        Commands::Sequence { count, interval_ms } => {
            sequence(&config, count, Duration::from_millis(interval_ms)).await
        }
    }
}

async fn list_devices(config: &AppConfig) -> Result<()> {
    let registry = DeviceRegistry::with_default_factories();

    println!("Driver types:");
    for driver_type in registry.list_factories() {
        if let Some(info) = registry.factory_info(&driver_type) {
            let caps: Vec<&str> = info.capabilities.iter().map(|c| c.name()).collect();
            println!("  {:<22} {} [{}]", info.driver_type, info.name, caps.join(", "));
        }
    }

    println!();
    println!("Configured devices:");
    if config.devices.is_empty() {
        println!("  (none)");
    }
    for device in &config.devices {
        let state = if !device.enabled {
            "disabled"
        } else if registry.has_factory(&device.r#type) {
            "enabled"
        } else {
            "no driver"
        };
        println!("  {:<16} {:<22} {}", device.id, device.r#type, state);
    }
    Ok(())
}

async fn snap(config: &AppConfig, device: Option<String>) -> Result<()> {
    let registry = DeviceRegistry::with_default_factories();
    let summary = registry.build_from_config(config).await;
    for (id, error) in &summary.failed {
        eprintln!("{}: {}", id, error);
    }

    let cameras = registry.snap_cameras();
    let camera = match device {
        Some(id) => cameras
            .into_iter()
            .find(|(camera_id, _)| *camera_id == id)
            .with_context(|| format!("no camera with id '{}'", id))?,
        None => match cameras.into_iter().next() {
            Some(found) => found,
            None => {
                let demo = toml::Value::Table(toml::map::Map::new());
                registry
                    .register_from_toml(DEMO_CAMERA_ID, CAMERA_DRIVER, demo)
                    .await?;
                registry
                    .snap_cameras()
                    .into_iter()
                    .next()
                    .context("demo camera has no snap capability")?
            }
        },
    };

    let (id, camera) = camera;
    let result = camera.snap().await;
    if result.is_ok() {
        let geometry = camera.geometry();
        println!(
            "{}: {}x{} px, {} byte(s)/px, {} channel(s)",
            id,
            geometry.width,
            geometry.height,
            geometry.bytes_per_pixel,
            camera.channel_count()
        );
        for channel in 0..camera.channel_count() {
            let name = camera.channel_name(channel)?;
            if let Some(frame) = camera.frame(channel) {
                println!("  {:<10} mean {:.2}", name, frame.mean());
            }
        }
    }

    registry.shutdown_all().await;
    result
}

async fn sequence(config: &AppConfig, count: u64, interval: Duration) -> Result<()> {
    let camera_config: DualCameraConfig = match config.first_of_type(CAMERA_DRIVER) {
        Some(definition) => definition
            .config
            .clone()
            .try_into()
            .with_context(|| format!("camera '{}' config", definition.id))?,
        None => DualCameraConfig::default(),
    };
    camera_config.validate()?;

    let provider = Arc::new(SimulatedProvider::new(camera_config.engine.clone()));
    let camera = DualCamera::new(camera_config, provider);
    camera.initialize().await?;

    let outcome = run_sequence(&camera, count, interval).await;
    camera.shutdown().await?;

    let delivered = outcome?;
    println!("{} of {} pair(s) delivered", delivered, count);
    Ok(())
}

async fn run_sequence(camera: &DualCamera, count: u64, interval: Duration) -> Result<u64> {
    let mut pairs = camera.start_sequence(count, interval).await?;
    while let Some(pair) = pairs.recv().await {
        println!(
            "pair {:>4}: camera-0 mean {:.2}, camera-1 mean {:.2}",
            pair.index,
            pair.frames[0].mean(),
            pair.frames[1].mean()
        );
    }
    Ok(camera.wait_sequence().await?)
}
