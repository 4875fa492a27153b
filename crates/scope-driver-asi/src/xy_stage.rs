//! ASI Tiger XY Stage
//!
//! Two axes of a Tiger controller driven as one stage. Positions are given in
//! micrometres; the controller works in tenths of a micrometre.
//!
//! | operation    | command                    |
//! |--------------|----------------------------|
//! | move_abs     | `<addr>M X=<x> Y=<y>`      |
//! | move_rel     | `<addr>R X=<dx> Y=<dy>`    |
//! | position     | `<addr>W X Y`              |
//! | home         | `<addr>! X Y`              |
//! | stop         | `<addr>\`                  |
//! | set_origin   | `<addr>H X=0 Y=0`          |

use crate::error::{error_text, AsiError};
use crate::hub::AsiHub;
use async_trait::async_trait;
use parking_lot::RwLock;
use scope_core::capabilities::{Device, HasErrorText, HasProperties, XyMovable};
use scope_core::properties::{Property, PropertyTable};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Controller units per micrometre.
pub const UNITS_PER_UM: f64 = 10.0;

/// Device label.
pub const PROP_NAME: &str = "Name";
/// Letter of the X axis.
pub const PROP_AXIS_X: &str = "AxisLetterX";
/// Letter of the Y axis.
pub const PROP_AXIS_Y: &str = "AxisLetterY";
/// Card address prefix.
pub const PROP_CARD_ADDRESS: &str = "CardAddress";

/// Axis and card settings of one XY stage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct XyStageSettings {
    /// Controller letter of the X axis
    #[serde(default = "default_axis_x")]
    pub axis_x: char,
    /// Controller letter of the Y axis
    #[serde(default = "default_axis_y")]
    pub axis_y: char,
    /// Card address prefix (hex digit), empty for controller-wide commands
    #[serde(default)]
    pub address: String,
    /// Busy poll interval while settling
    #[serde(default = "default_settle_poll_ms")]
    pub settle_poll_ms: u64,
    /// Give up settling after this long
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
}

fn default_axis_x() -> char {
    'X'
}
fn default_axis_y() -> char {
    'Y'
}
fn default_settle_poll_ms() -> u64 {
    50
}
fn default_settle_timeout_ms() -> u64 {
    30_000
}

impl Default for XyStageSettings {
    fn default() -> Self {
        Self {
            axis_x: default_axis_x(),
            axis_y: default_axis_y(),
            address: String::new(),
            settle_poll_ms: default_settle_poll_ms(),
            settle_timeout_ms: default_settle_timeout_ms(),
        }
    }
}

impl XyStageSettings {
    /// Reject bad axis letters and addresses.
    pub fn validate(&self) -> Result<(), AsiError> {
        validate_address(&self.address)?;
        for axis in [self.axis_x, self.axis_y] {
            if !axis.is_ascii_uppercase() {
                return Err(AsiError::NotEnoughAxes(format!(
                    "'{}' is not an axis letter",
                    axis
                )));
            }
        }
        if self.axis_x == self.axis_y {
            return Err(AsiError::NotEnoughAxes(format!(
                "both axes are '{}'",
                self.axis_x
            )));
        }
        Ok(())
    }
}

/// Card addresses are a single hex digit 1-F (or empty).
pub fn validate_address(address: &str) -> Result<(), AsiError> {
    if address.is_empty() {
        return Ok(());
    }
    let mut chars = address.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_hexdigit() && c != '0' && !c.is_ascii_lowercase() => Ok(()),
        _ => Err(AsiError::TooLargeAddresses(address.to_string())),
    }
}

fn to_units(um: f64) -> String {
    format!("{:.1}", um * UNITS_PER_UM)
}

/// XY stage on a Tiger controller.
pub struct AsiXyStage {
    label: String,
    hub: Arc<AsiHub>,
    settings: XyStageSettings,
    properties: RwLock<PropertyTable>,
    initialized: AtomicBool,
}

impl AsiXyStage {
    /// Stage on `hub`; fails on invalid settings.
    pub fn new(
        label: impl Into<String>,
        hub: Arc<AsiHub>,
        settings: XyStageSettings,
    ) -> Result<Self, AsiError> {
        settings.validate()?;
        let label = label.into();

        let mut properties = PropertyTable::new();
        properties.insert(Property::new(PROP_NAME, label.clone()).read_only());
        properties.insert(Property::new(PROP_AXIS_X, settings.axis_x.to_string()).read_only());
        properties.insert(Property::new(PROP_AXIS_Y, settings.axis_y.to_string()).read_only());
        properties.insert(Property::new(PROP_CARD_ADDRESS, settings.address.clone()).read_only());

        Ok(Self {
            label,
            hub,
            settings,
            properties: RwLock::new(properties),
            initialized: AtomicBool::new(false),
        })
    }

    fn cmd(&self, body: String) -> String {
        format!("{}{}", self.settings.address, body)
    }

    async fn send(&self, body: String) -> Result<String, AsiError> {
        self.hub.command(&self.cmd(body)).await
    }

    /// Initialize the hub and confirm both axes answer a position query.
    #[instrument(skip(self), fields(stage = %self.label), err)]
    pub async fn initialize(&self) -> Result<(), AsiError> {
        self.hub.initialize().await?;
        let (x, y) = self.read_position().await?;
        self.initialized.store(true, Ordering::Release);
        tracing::info!(x_um = x, y_um = y, "ASI XY stage initialized");
        Ok(())
    }

    /// `M`: absolute move in micrometres.
    pub async fn move_to(&self, x_um: f64, y_um: f64) -> Result<(), AsiError> {
        let (ax, ay) = (self.settings.axis_x, self.settings.axis_y);
        self.send(format!("M {}={} {}={}", ax, to_units(x_um), ay, to_units(y_um)))
            .await?;
        Ok(())
    }

    /// `R`: relative move in micrometres.
    pub async fn move_by(&self, dx_um: f64, dy_um: f64) -> Result<(), AsiError> {
        let (ax, ay) = (self.settings.axis_x, self.settings.axis_y);
        self.send(format!("R {}={} {}={}", ax, to_units(dx_um), ay, to_units(dy_um)))
            .await?;
        Ok(())
    }

    /// `W`: both positions in micrometres.
    pub async fn read_position(&self) -> Result<(f64, f64), AsiError> {
        let (ax, ay) = (self.settings.axis_x, self.settings.axis_y);
        let reply = self.send(format!("W {} {}", ax, ay)).await?;

        let values: Vec<f64> = reply
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| AsiError::UnrecognizedAnswer(reply.clone()))?;
        match values.as_slice() {
            [x, y] => Ok((x / UNITS_PER_UM, y / UNITS_PER_UM)),
            _ => Err(AsiError::NotEnoughAxes(format!(
                "expected 2 positions, got '{}'",
                reply
            ))),
        }
    }

    /// `\`: halt all motion.
    pub async fn halt(&self) -> Result<(), AsiError> {
        self.send("\\".to_string()).await?;
        Ok(())
    }

    /// `!`: move both axes home.
    pub async fn home_axes(&self) -> Result<(), AsiError> {
        let (ax, ay) = (self.settings.axis_x, self.settings.axis_y);
        self.send(format!("! {} {}", ax, ay)).await?;
        Ok(())
    }

    /// `H`: make the current position the origin.
    pub async fn zero_here(&self) -> Result<(), AsiError> {
        let (ax, ay) = (self.settings.axis_x, self.settings.axis_y);
        self.send(format!("H {}=0 {}=0", ax, ay)).await?;
        Ok(())
    }

    /// Poll the controller until it reports idle.
    pub async fn wait_until_idle(&self) -> Result<(), AsiError> {
        let poll = Duration::from_millis(self.settings.settle_poll_ms);
        let timeout = Duration::from_millis(self.settings.settle_timeout_ms);
        let started = tokio::time::Instant::now();

        while self.hub.is_busy().await? {
            if started.elapsed() >= timeout {
                return Err(AsiError::Timeout {
                    command: "/".to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(poll).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Device for AsiXyStage {
    fn name(&self) -> &str {
        &self.label
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(AsiXyStage::initialize(self).await?)
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }

    async fn busy(&self) -> anyhow::Result<bool> {
        Ok(self.hub.is_busy().await?)
    }
}

#[async_trait]
impl XyMovable for AsiXyStage {
    #[instrument(skip(self), fields(stage = %self.label), err)]
    async fn move_abs(&self, x_um: f64, y_um: f64) -> anyhow::Result<()> {
        Ok(self.move_to(x_um, y_um).await?)
    }

    #[instrument(skip(self), fields(stage = %self.label), err)]
    async fn move_rel(&self, dx_um: f64, dy_um: f64) -> anyhow::Result<()> {
        Ok(self.move_by(dx_um, dy_um).await?)
    }

    async fn position(&self) -> anyhow::Result<(f64, f64)> {
        Ok(self.read_position().await?)
    }

    async fn wait_settled(&self) -> anyhow::Result<()> {
        Ok(self.wait_until_idle().await?)
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(self.halt().await?)
    }

    async fn home(&self) -> anyhow::Result<()> {
        Ok(self.home_axes().await?)
    }

    async fn set_origin(&self) -> anyhow::Result<()> {
        Ok(self.zero_here().await?)
    }
}

#[async_trait]
impl HasProperties for AsiXyStage {
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

impl HasErrorText for AsiXyStage {
    fn error_text(&self, code: i32) -> Option<&'static str> {
        error_text(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_validation() {
        XyStageSettings::default().validate().unwrap();

        let same = XyStageSettings {
            axis_y: 'X',
            ..Default::default()
        };
        assert!(matches!(same.validate(), Err(AsiError::NotEnoughAxes(_))));

        for bad in ["0", "G", "12", "a"] {
            assert!(
                matches!(validate_address(bad), Err(AsiError::TooLargeAddresses(_))),
                "{bad}"
            );
        }
        validate_address("F").unwrap();
    }

    #[test]
    fn micrometres_to_controller_units() {
        assert_eq!(to_units(12.5), "125.0");
        assert_eq!(to_units(-0.05), "-0.5");
    }
}
