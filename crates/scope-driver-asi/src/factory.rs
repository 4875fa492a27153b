//! Driver factories for ASI Tiger devices.
//!
//! Devices configured with the same `port` share one [`AsiHub`], kept in a
//! module-local registry:
//!
//! ```toml
//! [[devices]]
//! id = "stage"
//! type = "asi_xy_stage"
//! [devices.config]
//! port = "/dev/ttyUSB0"
//! axis_x = "X"
//! axis_y = "Y"
//!
//! [[devices]]
//! id = "emission"
//! type = "asi_filter_wheel"
//! [devices.config]
//! port = "/dev/ttyUSB0"
//! wheel = 0
//! ```

use crate::filter_wheel::{AsiFilterWheel, DEFAULT_POSITION_COUNT};
use crate::hub::{AsiHub, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT};
use crate::xy_stage::{validate_address, AsiXyStage, XyStageSettings};
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use scope_core::capabilities::DeviceCategory;
use scope_core::driver::{Capability, DeviceComponents, DriverFactory};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

// =============================================================================
// Shared hubs
// =============================================================================

static SHARED_HUBS: OnceLock<RwLock<HashMap<String, Arc<AsiHub>>>> = OnceLock::new();

fn hub_registry() -> &'static RwLock<HashMap<String, Arc<AsiHub>>> {
    SHARED_HUBS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Hub already open on `port_path`, if any.
pub fn existing_hub(port_path: &str) -> Option<Arc<AsiHub>> {
    hub_registry().read().get(port_path).cloned()
}

/// Register a hub for `port_path`, replacing any earlier one.
pub fn register_hub(port_path: &str, hub: Arc<AsiHub>) {
    hub_registry().write().insert(port_path.to_string(), hub);
    tracing::info!(port = port_path, "registered ASI hub");
}

/// Forget the hub on `port_path` so the next build reopens the port.
pub fn remove_hub(port_path: &str) -> bool {
    hub_registry().write().remove(port_path).is_some()
}

/// Serial connection settings shared by every ASI device config.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply timeout in milliseconds (default: 500)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl HubConfig {
    fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// Existing hub for the configured port, or a freshly opened one.
pub async fn get_or_open_hub(config: &HubConfig) -> Result<Arc<AsiHub>> {
    if let Some(hub) = existing_hub(&config.port) {
        tracing::debug!(port = %config.port, "reusing ASI hub");
        return Ok(hub);
    }

    let hub = AsiHub::open(
        format!("ASI Tiger {}", config.port),
        &config.port,
        config.baud_rate,
        config.timeout(),
    )
    .await?;
    let hub = Arc::new(hub);
    register_hub(&config.port, hub.clone());
    Ok(hub)
}

// =============================================================================
// XY stage
// =============================================================================

/// `asi_xy_stage` device configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AsiXyStageConfig {
    /// Controller connection
    #[serde(flatten)]
    pub hub: HubConfig,
    /// Device label
    #[serde(default = "default_stage_label")]
    pub label: String,
    /// Axes, card address and settle timing
    #[serde(flatten)]
    pub stage: XyStageSettings,
}

fn default_stage_label() -> String {
    "XYStage".to_string()
}

/// Factory for [`AsiXyStage`] instances.
pub struct AsiXyStageFactory;

static XY_STAGE_CAPABILITIES: &[Capability] = &[
    Capability::Device,
    Capability::Properties,
    Capability::ErrorText,
    Capability::XyMovable,
];

impl DriverFactory for AsiXyStageFactory {
    fn driver_type(&self) -> &'static str {
        "asi_xy_stage"
    }

    fn name(&self) -> &'static str {
        "ASI Tiger XY Stage"
    }

    fn capabilities(&self) -> &'static [Capability] {
        XY_STAGE_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: AsiXyStageConfig = config.clone().try_into()?;
        cfg.stage.validate()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: AsiXyStageConfig = config.try_into().context("Invalid ASI XY stage config")?;
            let hub = get_or_open_hub(&cfg.hub).await?;

            let stage = Arc::new(AsiXyStage::new(cfg.label, hub, cfg.stage)?);
            stage.initialize().await?;

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Stage)
                .with_device(stage.clone())
                .with_properties(stage.clone())
                .with_error_text(stage.clone())
                .with_xy_movable(stage))
        })
    }
}

// =============================================================================
// Filter wheel
// =============================================================================

/// `asi_filter_wheel` device configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AsiFilterWheelConfig {
    /// Controller connection
    #[serde(flatten)]
    pub hub: HubConfig,
    /// Device label
    #[serde(default = "default_wheel_label")]
    pub label: String,
    /// Card address prefix, empty for none
    #[serde(default)]
    pub address: String,
    /// Wheel number on the card (0 or 1)
    #[serde(default)]
    pub wheel: u8,
    /// Number of slots (default: 8)
    #[serde(default = "default_position_count")]
    pub position_count: u32,
}

fn default_wheel_label() -> String {
    "FilterWheel".to_string()
}

fn default_position_count() -> u32 {
    DEFAULT_POSITION_COUNT
}

impl AsiFilterWheelConfig {
    /// Reject a bad address, wheel number or slot count.
    pub fn validate(&self) -> Result<()> {
        validate_address(&self.address)?;
        if self.wheel > 1 {
            return Err(anyhow!("filter wheel number must be 0 or 1, got {}", self.wheel));
        }
        if self.position_count == 0 {
            return Err(anyhow!("position_count must be positive"));
        }
        Ok(())
    }
}

/// Factory for [`AsiFilterWheel`] instances.
pub struct AsiFilterWheelFactory;

static FILTER_WHEEL_CAPABILITIES: &[Capability] = &[
    Capability::Device,
    Capability::Properties,
    Capability::ErrorText,
    Capability::DiscretePositioner,
];

impl DriverFactory for AsiFilterWheelFactory {
    fn driver_type(&self) -> &'static str {
        "asi_filter_wheel"
    }

    fn name(&self) -> &'static str {
        "ASI Filter Wheel"
    }

    fn capabilities(&self) -> &'static [Capability] {
        FILTER_WHEEL_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: AsiFilterWheelConfig = config.clone().try_into()?;
        cfg.validate()
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: AsiFilterWheelConfig =
                config.try_into().context("Invalid ASI filter wheel config")?;
            cfg.validate()?;
            let hub = get_or_open_hub(&cfg.hub).await?;

            let wheel = Arc::new(AsiFilterWheel::new(
                cfg.label,
                hub,
                cfg.address,
                cfg.wheel,
                cfg.position_count,
            )?);
            wheel.initialize().await?;

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::FilterWheel)
                .with_device(wheel.clone())
                .with_properties(wheel.clone())
                .with_error_text(wheel.clone())
                .with_discrete_positioner(wheel))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_identity() {
        assert_eq!(AsiXyStageFactory.driver_type(), "asi_xy_stage");
        assert_eq!(AsiFilterWheelFactory.driver_type(), "asi_filter_wheel");
        assert!(AsiXyStageFactory
            .capabilities()
            .contains(&Capability::XyMovable));
        assert!(AsiFilterWheelFactory
            .capabilities()
            .contains(&Capability::DiscretePositioner));
    }

    #[test]
    fn stage_config_validation() {
        let factory = AsiXyStageFactory;

        let valid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB0"
            axis_x = "X"
            axis_y = "Y"
        });
        assert!(factory.validate(&valid).is_ok());

        let same_axes = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB0"
            axis_x = "Z"
            axis_y = "Z"
        });
        assert!(factory.validate(&same_axes).is_err());

        let missing_port = toml::Value::Table(toml::toml! {
            axis_x = "X"
        });
        assert!(factory.validate(&missing_port).is_err());
    }

    #[test]
    fn wheel_config_validation() {
        let factory = AsiFilterWheelFactory;

        let valid = toml::Value::Table(toml::toml! {
            port = "COM3"
            wheel = 1
            position_count = 6
        });
        assert!(factory.validate(&valid).is_ok());

        let bad_wheel = toml::Value::Table(toml::toml! {
            port = "COM3"
            wheel = 2
        });
        assert!(factory.validate(&bad_wheel).is_err());

        let bad_address = toml::Value::Table(toml::toml! {
            port = "COM3"
            address = "Q"
        });
        assert!(factory.validate(&bad_address).is_err());
    }

    #[test]
    fn hubs_are_shared_by_port() {
        let (host, _device) = tokio::io::duplex(64);
        let port = scope_core::serial::wrap_shared(Box::new(host));
        let hub = Arc::new(AsiHub::new("Tiger", port, DEFAULT_TIMEOUT));

        register_hub("test-port-shared", hub.clone());
        let found = existing_hub("test-port-shared").unwrap();
        assert!(Arc::ptr_eq(&found, &hub));

        assert!(remove_hub("test-port-shared"));
        assert!(existing_hub("test-port-shared").is_none());
        assert!(!remove_hub("test-port-shared"));
    }

    #[test]
    fn hub_timeout_default() {
        let cfg: HubConfig = toml::Value::Table(toml::toml! { port = "COM1" })
            .try_into()
            .unwrap();
        assert_eq!(cfg.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(cfg.baud_rate, 115_200);
    }
}
