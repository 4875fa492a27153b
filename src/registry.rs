//! Device registry
//!
//! Holds the driver factories by driver type and the devices built from
//! configuration by id.
//!
//! ```rust,ignore
//! let registry = DeviceRegistry::with_default_factories();
//! let summary = registry.build_from_config(&config).await;
//!
//! if let Some((id, camera)) = registry.snap_cameras().into_iter().next() {
//!     camera.snap().await?;
//! }
//! registry.shutdown_all().await;
//! ```

use crate::config::AppConfig;
use dashmap::DashMap;
use scope_core::capabilities::{DiscretePositioner, SnapCamera, XyMovable};
use scope_core::driver::{Capability, DeviceComponents, DriverFactory};
use scope_core::error::{DriverError, DriverErrorKind, ScopeError, ScopeResult};
use std::sync::Arc;

/// A device built by a factory.
pub struct RegisteredDevice {
    /// Configured device id
    pub id: String,
    /// Factory that built it
    pub driver_type: String,
    /// Capabilities the factory attached
    pub components: DeviceComponents,
}

/// Factory description for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct FactoryInfo {
    /// Key used in device definitions
    pub driver_type: String,
    /// Human-readable driver name
    pub name: String,
    /// Capabilities built devices expose
    pub capabilities: Vec<Capability>,
}

/// Outcome of [`DeviceRegistry::build_from_config`].
#[derive(Debug, Default)]
pub struct BuildSummary {
    /// Ids built and registered, in config order
    pub registered: Vec<String>,
    /// Ids that failed, with the reason
    pub failed: Vec<(String, ScopeError)>,
}

/// Driver factories and the devices built through them.
#[derive(Default)]
pub struct DeviceRegistry {
    factories: DashMap<String, Box<dyn DriverFactory>>,
    devices: DashMap<String, Arc<RegisteredDevice>>,
}

impl DeviceRegistry {
    /// Registry with no factories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every driver compiled into this build.
    pub fn with_default_factories() -> Self {
        let registry = Self::new();
        registry.register_factory(Box::new(scope_driver_acquire::DualCameraFactory));
        #[cfg(feature = "instrument_asi")]
        {
            registry.register_factory(Box::new(scope_driver_asi::AsiXyStageFactory));
            registry.register_factory(Box::new(scope_driver_asi::AsiFilterWheelFactory));
        }
        registry
    }

    /// Register a factory, returning the one it replaces.
    pub fn register_factory(
        &self,
        factory: Box<dyn DriverFactory>,
    ) -> Option<Box<dyn DriverFactory>> {
        let driver_type = factory.driver_type().to_string();
        tracing::info!(
            driver_type = %driver_type,
            name = %factory.name(),
            capabilities = ?factory.capabilities(),
            "Registering driver factory"
        );
        self.factories.insert(driver_type, factory)
    }

    /// Whether a factory handles `driver_type`.
    pub fn has_factory(&self, driver_type: &str) -> bool {
        self.factories.contains_key(driver_type)
    }

    /// Registered driver types, sorted.
    pub fn list_factories(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .factories
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        types.sort();
        types
    }

    /// Listing entry for one factory.
    pub fn factory_info(&self, driver_type: &str) -> Option<FactoryInfo> {
        self.factories.get(driver_type).map(|entry| {
            let factory = entry.value();
            FactoryInfo {
                driver_type: factory.driver_type().to_string(),
                name: factory.name().to_string(),
                capabilities: factory.capabilities().to_vec(),
            }
        })
    }

    /// Validate `config` with the factory for `driver_type`, build the device
    /// and register it under `device_id`.
    pub async fn register_from_toml(
        &self,
        device_id: &str,
        driver_type: &str,
        config: toml::Value,
    ) -> ScopeResult<()> {
        if self.devices.contains_key(device_id) {
            return Err(ScopeError::Configuration(format!(
                "Device '{}' is already registered",
                device_id
            )));
        }

        let build = {
            let factory = self.factories.get(driver_type).ok_or_else(|| {
                ScopeError::Configuration(format!(
                    "No factory registered for driver_type '{}'. Available factories: {:?}",
                    driver_type,
                    self.list_factories()
                ))
            })?;

            factory.validate(&config).map_err(|e| {
                DriverError::new(
                    driver_type,
                    DriverErrorKind::Configuration,
                    format!(
                        "Configuration validation failed for device '{}': {}",
                        device_id, e
                    ),
                )
            })?;
            factory.build(config)
        };

        tracing::info!(device_id, driver_type, "Building device from factory");
        let components = build.await.map_err(|e| {
            DriverError::new(
                driver_type,
                DriverErrorKind::Initialization,
                format!("Factory build failed for device '{}': {:#}", device_id, e),
            )
        })?;

        self.devices.insert(
            device_id.to_string(),
            Arc::new(RegisteredDevice {
                id: device_id.to_string(),
                driver_type: driver_type.to_string(),
                components,
            }),
        );
        tracing::info!(device_id, "Device registered successfully");
        Ok(())
    }

    /// Build every enabled device in `config`.
    ///
    /// A device that fails to build is logged and skipped.
    pub async fn build_from_config(&self, config: &AppConfig) -> BuildSummary {
        let mut summary = BuildSummary::default();
        for definition in config.enabled_devices() {
            match self
                .register_from_toml(&definition.id, &definition.r#type, definition.config.clone())
                .await
            {
                Ok(()) => summary.registered.push(definition.id.clone()),
                Err(e) => {
                    tracing::warn!(device_id = %definition.id, error = %e, "Device not built");
                    summary.failed.push((definition.id.clone(), e));
                }
            }
        }
        summary
    }

    /// Registered device by id.
    pub fn device(&self, device_id: &str) -> ScopeResult<Arc<RegisteredDevice>> {
        self.devices
            .get(device_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ScopeError::DeviceNotFound(device_id.to_string()))
    }

    /// Registered device ids, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Every device with single-shot acquisition.
    pub fn snap_cameras(&self) -> Vec<(String, Arc<dyn SnapCamera>)> {
        self.collect(|c| c.snap_camera.clone())
    }

    /// Every device with two-axis motion.
    pub fn xy_stages(&self) -> Vec<(String, Arc<dyn XyMovable>)> {
        self.collect(|c| c.xy_movable.clone())
    }

    /// Every device with indexed positions.
    pub fn discrete_positioners(&self) -> Vec<(String, Arc<dyn DiscretePositioner>)> {
        self.collect(|c| c.discrete_positioner.clone())
    }

    fn collect<T: ?Sized>(
        &self,
        pick: impl Fn(&DeviceComponents) -> Option<Arc<T>>,
    ) -> Vec<(String, Arc<T>)> {
        let mut found: Vec<(String, Arc<T>)> = self
            .devices
            .iter()
            .filter_map(|entry| pick(&entry.value().components).map(|c| (entry.key().clone(), c)))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    /// Shut down and remove every device. Failures are logged.
    pub async fn shutdown_all(&self) {
        let devices: Vec<Arc<RegisteredDevice>> =
            self.devices.iter().map(|e| e.value().clone()).collect();
        self.devices.clear();

        for registered in devices {
            let Some(device) = registered.components.device.as_ref() else {
                continue;
            };
            match device.shutdown().await {
                Ok(()) => tracing::info!(device_id = %registered.id, "Device shut down"),
                Err(e) => {
                    tracing::warn!(device_id = %registered.id, error = %e, "Device shutdown failed")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceDefinition;
    use tracing_test::traced_test;

    fn demo_camera() -> toml::Value {
        toml::Value::Table(toml::toml! {
            demo_width = 16
            demo_height = 8
            poll_interval_ms = 1
        })
    }

    #[test]
    fn default_factories() {
        let registry = DeviceRegistry::with_default_factories();
        assert!(registry.has_factory("acquire_dual_camera"));
        #[cfg(feature = "instrument_asi")]
        assert_eq!(
            registry.list_factories(),
            vec!["acquire_dual_camera", "asi_filter_wheel", "asi_xy_stage"]
        );

        let info = registry.factory_info("acquire_dual_camera").unwrap();
        assert!(info.capabilities.contains(&Capability::SnapCamera));
        assert!(registry.factory_info("nope").is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn builds_and_snaps_demo_camera() {
        let registry = DeviceRegistry::with_default_factories();
        registry
            .register_from_toml("camera", "acquire_dual_camera", demo_camera())
            .await
            .unwrap();
        assert!(logs_contain("Device registered successfully"));

        let cameras = registry.snap_cameras();
        assert_eq!(cameras.len(), 1);
        let (id, camera) = &cameras[0];
        assert_eq!(id, "camera");

        camera.snap().await.unwrap();
        assert_eq!(camera.channel_count(), 2);
        assert_eq!(camera.frame(0).unwrap().data.len(), 16 * 8);
        assert!(registry.xy_stages().is_empty());

        registry.shutdown_all().await;
        assert!(registry.device_ids().is_empty());
    }

    #[tokio::test]
    async fn rejects_duplicates_and_unknown_types() {
        let registry = DeviceRegistry::with_default_factories();
        registry
            .register_from_toml("camera", "acquire_dual_camera", demo_camera())
            .await
            .unwrap();

        let duplicate = registry
            .register_from_toml("camera", "acquire_dual_camera", demo_camera())
            .await;
        assert!(matches!(duplicate, Err(ScopeError::Configuration(_))));

        let unknown = registry
            .register_from_toml("laser", "maitai", demo_camera())
            .await;
        assert!(matches!(unknown, Err(ScopeError::Configuration(_))));

        assert!(matches!(
            registry.device("laser"),
            Err(ScopeError::DeviceNotFound(_))
        ));
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn invalid_config_is_a_driver_error() {
        let registry = DeviceRegistry::with_default_factories();
        let config = toml::Value::Table(toml::toml! { demo_bytes_per_pixel = 3 });

        let err = registry
            .register_from_toml("camera", "acquire_dual_camera", config)
            .await
            .unwrap_err();
        match err {
            ScopeError::Driver(e) => assert_eq!(e.kind, DriverErrorKind::Configuration),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn build_from_config_skips_disabled_and_reports_failures() {
        let config = AppConfig {
            devices: vec![
                DeviceDefinition {
                    id: "camera".to_string(),
                    r#type: "acquire_dual_camera".to_string(),
                    enabled: true,
                    config: demo_camera(),
                },
                DeviceDefinition {
                    id: "spare".to_string(),
                    r#type: "acquire_dual_camera".to_string(),
                    enabled: false,
                    config: demo_camera(),
                },
                DeviceDefinition {
                    id: "mystery".to_string(),
                    r#type: "unknown_driver".to_string(),
                    enabled: true,
                    config: demo_camera(),
                },
            ],
            ..Default::default()
        };

        let registry = DeviceRegistry::with_default_factories();
        let summary = registry.build_from_config(&config).await;

        assert_eq!(summary.registered, vec!["camera"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "mystery");
        assert_eq!(registry.device_ids(), vec!["camera"]);
        registry.shutdown_all().await;
    }
}
