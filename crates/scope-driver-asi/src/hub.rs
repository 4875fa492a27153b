//! ASI Tiger Hub
//!
//! Owns the serial link to one Tiger controller. Every device on the
//! controller (stages, filter wheels) sends its commands through the hub.
//!
//! Protocol: ASCII, commands terminated by `\r`, replies by `\r\n`.
//!
//! | reply          | meaning                                   |
//! |----------------|-------------------------------------------|
//! | `:A [payload]` | command accepted, optional payload        |
//! | `:N-<code>`    | controller rejected the command           |
//! | `B` / `N`      | answer to the busy query `/`              |
//!
//! Filter wheel commands answer with bare values instead of `:A`, so the hub
//! exposes both [`AsiHub::command`] (parsed) and [`AsiHub::exchange`] (raw).

use crate::error::{error_text, AsiError};
use async_trait::async_trait;
use parking_lot::RwLock;
use scope_core::capabilities::{Device, HasErrorText, HasProperties};
use scope_core::properties::{Property, PropertyTable};
use scope_core::serial::{discard_pending, DynSerial, SharedPort};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::instrument;

/// Tiger controllers ship at 115200 baud.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Reply deadline per command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Hub label.
pub const PROP_NAME: &str = "Name";
/// Firmware version, set at initialize.
pub const PROP_FIRMWARE_VERSION: &str = "FirmwareVersion";
/// Firmware build name, set at initialize.
pub const PROP_FIRMWARE_BUILD: &str = "FirmwareBuild";

/// Stale input is discarded until the line is quiet this long.
const DRAIN_QUIET: Duration = Duration::from_millis(20);

/// Firmware identification read at initialize.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FirmwareInfo {
    /// Numeric version from `V`
    pub version: f64,
    /// Build name from `BU`
    pub build: String,
}

/// Parse one reply line.
///
/// `:A` yields the trimmed payload, `:N<code>` a controller error.
pub fn parse_reply(line: &str) -> Result<String, AsiError> {
    let line = line.trim();
    if let Some(payload) = line.strip_prefix(":A") {
        return Ok(payload.trim().to_string());
    }
    if let Some(code) = line.strip_prefix(":N") {
        return match code.trim().parse::<i32>() {
            Ok(code) => Err(AsiError::Controller { code }),
            Err(_) => Err(AsiError::UnrecognizedAnswer(line.to_string())),
        };
    }
    Err(AsiError::UnrecognizedAnswer(line.to_string()))
}

/// First decimal number in a version string such as `Version: USB-9.2n`.
pub fn parse_firmware_version(reply: &str) -> Option<f64> {
    let start = reply.find(|c: char| c.is_ascii_digit())?;
    let number: String = reply[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.trim_end_matches('.').parse().ok()
}

/// Owner of a Tiger controller's serial link.
///
/// Every device on the controller talks through one hub; each exchange
/// holds the port lock from command to reply.
pub struct AsiHub {
    label: String,
    port: SharedPort,
    timeout: Duration,
    firmware: RwLock<FirmwareInfo>,
    properties: RwLock<PropertyTable>,
    initialized: AtomicBool,
}

impl AsiHub {
    /// Hub over an already opened port.
    pub fn new(label: impl Into<String>, port: SharedPort, timeout: Duration) -> Self {
        let label = label.into();
        let mut properties = PropertyTable::new();
        properties.insert(Property::new(PROP_NAME, label.clone()).read_only());

        Self {
            label,
            port,
            timeout,
            firmware: RwLock::new(FirmwareInfo::default()),
            properties: RwLock::new(properties),
            initialized: AtomicBool::new(false),
        }
    }

    /// Open `port_path` at `baud_rate` (8N1) and wrap it in a hub.
    pub async fn open(
        label: impl Into<String>,
        port_path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let port = scope_core::serial::open_shared(port_path, baud_rate).await?;
        tracing::info!(port = port_path, baud_rate, "ASI hub port opened");
        Ok(Self::new(label, port, timeout))
    }

    /// Label the hub was created with.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether firmware identification succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Firmware read at initialize.
    pub fn firmware(&self) -> FirmwareInfo {
        self.firmware.read().clone()
    }

    /// Read firmware version and build name. No-op when already initialized.
    #[instrument(skip(self), fields(hub = %self.label), err)]
    pub async fn initialize(&self) -> Result<(), AsiError> {
        if self.is_initialized() {
            return Ok(());
        }

        {
            let mut port = self.port.lock().await;
            let discarded = discard_pending(&mut *port, DRAIN_QUIET).await;
            if discarded > 0 {
                tracing::debug!(discarded, "discarded stale controller output");
            }
        }

        let version_reply = self.command("V").await?;
        let version = parse_firmware_version(&version_reply)
            .ok_or_else(|| AsiError::UnrecognizedAnswer(version_reply.clone()))?;
        let build = self.command("BU").await?;

        {
            let mut properties = self.properties.write();
            properties.insert(Property::float(PROP_FIRMWARE_VERSION, version).read_only());
            properties.insert(Property::new(PROP_FIRMWARE_BUILD, build.clone()).read_only());
        }
        *self.firmware.write() = FirmwareInfo {
            version,
            build: build.clone(),
        };
        self.initialized.store(true, Ordering::Release);
        tracing::info!(version, build = %build, "ASI hub initialized");
        Ok(())
    }

    /// Send `command` and parse the `:A` / `:N` reply.
    pub async fn command(&self, command: &str) -> Result<String, AsiError> {
        let line = self.exchange(command).await?;
        parse_reply(&line)
    }

    /// Send `command` and return the raw reply line, trimmed.
    pub async fn exchange(&self, command: &str) -> Result<String, AsiError> {
        let mut port = self.port.lock().await;
        self.exchange_locked(&mut port, command).await
    }

    /// Send several commands back to back without releasing the port.
    ///
    /// Used for sequences whose later commands depend on controller state
    /// set by the earlier ones (filter wheel selection).
    pub async fn exchange_all(&self, commands: &[String]) -> Result<Vec<String>, AsiError> {
        let mut port = self.port.lock().await;
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            replies.push(self.exchange_locked(&mut port, command).await?);
        }
        Ok(replies)
    }

    async fn exchange_locked(
        &self,
        port: &mut BufReader<DynSerial>,
        command: &str,
    ) -> Result<String, AsiError> {
        tracing::trace!(command, "ASI send");
        let writer = port.get_mut();
        writer.write_all(format!("{}\r", command).as_bytes()).await?;
        writer.flush().await?;

        let mut line = String::new();
        let read = tokio::time::timeout(self.timeout, port.read_line(&mut line))
            .await
            .map_err(|_| AsiError::Timeout {
                command: command.to_string(),
                timeout: self.timeout,
            })??;
        if read == 0 {
            return Err(AsiError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "controller closed the connection",
            )));
        }

        let reply = line.trim().to_string();
        tracing::trace!(command, reply = %reply, "ASI reply");
        Ok(reply)
    }

    /// Whether any axis on the controller is moving (`/` answers `B` or `N`).
    pub async fn is_busy(&self) -> Result<bool, AsiError> {
        let reply = self.exchange("/").await?;
        match reply.as_str() {
            "B" => Ok(true),
            "N" => Ok(false),
            _ => Err(AsiError::UnrecognizedAnswer(reply)),
        }
    }
}

#[async_trait]
impl Device for AsiHub {
    fn name(&self) -> &str {
        &self.label
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(AsiHub::initialize(self).await?)
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }

    async fn busy(&self) -> anyhow::Result<bool> {
        Ok(self.is_busy().await?)
    }
}

#[async_trait]
impl HasProperties for AsiHub {
    fn property_names(&self) -> Vec<String> {
        self.properties.read().names()
    }

    fn get_property(&self, name: &str) -> anyhow::Result<String> {
        Ok(self.properties.read().get(name)?.to_string())
    }

    async fn set_property(&self, name: &str, value: &str) -> anyhow::Result<()> {
        self.properties.write().set(name, value)?;
        Ok(())
    }
}

impl HasErrorText for AsiHub {
    fn error_text(&self, code: i32) -> Option<&'static str> {
        error_text(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies() {
        assert_eq!(parse_reply(":A\r\n").unwrap(), "");
        assert_eq!(parse_reply(":A 12.5 -3").unwrap(), "12.5 -3");
        assert!(matches!(
            parse_reply(":N-3"),
            Err(AsiError::Controller { code: -3 })
        ));
        assert!(matches!(
            parse_reply("garbage"),
            Err(AsiError::UnrecognizedAnswer(_))
        ));
        assert!(matches!(
            parse_reply(":Nx"),
            Err(AsiError::UnrecognizedAnswer(_))
        ));
    }

    #[test]
    fn firmware_versions() {
        assert_eq!(parse_firmware_version("Version: USB-9.2n"), Some(9.2));
        assert_eq!(parse_firmware_version("3.30"), Some(3.3));
        assert_eq!(parse_firmware_version("TIGER_COMM"), None);
    }
}
