//! Configuration loading and building devices from it.

use scope_adapters::config::{AppConfig, ConfigError, LogFormat};
use scope_adapters::registry::DeviceRegistry;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn shipped_config_is_valid() {
    let config = AppConfig::load_from("config/scope.toml").unwrap();
    assert_eq!(config.application.log_format, LogFormat::Compact);

    let ids: Vec<&str> = config.devices.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["camera", "stage", "emission_wheel"]);
    assert_eq!(config.enabled_devices().count(), 1);

    let registry = DeviceRegistry::with_default_factories();
    for device in &config.devices {
        if let Some(info) = registry.factory_info(&device.r#type) {
            assert_eq!(info.driver_type, device.r#type);
        }
    }
}

#[test]
fn missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.application.name, "scope-adapters");
    assert!(config.devices.is_empty());
}

#[test]
fn duplicate_ids_fail_validation() {
    let file = write_config(
        r#"
        [[devices]]
        id = "camera"
        type = "acquire_dual_camera"

        [[devices]]
        id = "camera"
        type = "asi_xy_stage"
        [devices.config]
        port = "COM3"
        "#,
    );

    let err = AppConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn malformed_file_is_a_load_error() {
    let file = write_config("[application\nname = ");
    assert!(matches!(
        AppConfig::load_from(file.path()),
        Err(ConfigError::Load(_))
    ));
}

#[tokio::test]
async fn builds_enabled_devices_from_file() {
    let file = write_config(
        r#"
        [application]
        log_level = "debug"

        [[devices]]
        id = "left_right"
        type = "acquire_dual_camera"
        [devices.config]
        mode = "combined"
        demo_width = 32
        demo_height = 16
        poll_interval_ms = 1

        [[devices]]
        id = "stage"
        type = "asi_xy_stage"
        enabled = false
        [devices.config]
        port = "/dev/does-not-exist"
        "#,
    );
    let config = AppConfig::load_from(file.path()).unwrap();

    let registry = DeviceRegistry::with_default_factories();
    let summary = registry.build_from_config(&config).await;
    assert_eq!(summary.registered, vec!["left_right"]);
    assert!(summary.failed.is_empty());

    let (_, camera) = registry.snap_cameras().into_iter().next().unwrap();
    camera.snap().await.unwrap();
    assert_eq!(camera.channel_count(), 1);
    let geometry = camera.geometry();
    assert_eq!((geometry.width, geometry.height), (32, 32));

    registry.shutdown_all().await;
}
