//! ASI Filter Wheel
//!
//! Filter wheel cards answer with bare values rather than `:A` replies. Each
//! operation first selects the wheel (`FW <n>`, answered with `n`) and runs in
//! one port transaction so another wheel on the same card cannot interleave.
//!
//! | operation  | command    | answer                  |
//! |------------|------------|-------------------------|
//! | select     | `FW <n>`   | `<n>`                   |
//! | move       | `MP <pos>` | `<pos>`                 |
//! | position   | `MP`       | current position        |
//! | busy       | `?`        | `0` idle, else moving   |

use crate::error::{error_text, AsiError};
use crate::hub::{parse_reply, AsiHub};
use async_trait::async_trait;
use parking_lot::RwLock;
use scope_core::capabilities::{Device, DiscretePositioner, HasErrorText, HasProperties};
use scope_core::properties::{Property, PropertyTable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::instrument;

/// Device label.
pub const PROP_NAME: &str = "Name";
/// Wheel number on the card, 0 or 1.
pub const PROP_WHEEL: &str = "WheelNumber";
/// Number of slots.
pub const PROP_POSITIONS: &str = "NumPositions";
/// Current slot, zero-based.
pub const PROP_POSITION: &str = "Position";

/// Wheel slots on ASI filter wheels.
pub const DEFAULT_POSITION_COUNT: u32 = 8;

/// Filter wheel on a Tiger controller card.
pub struct AsiFilterWheel {
    label: String,
    hub: Arc<AsiHub>,
    address: String,
    wheel: u8,
    position_count: u32,
    properties: RwLock<PropertyTable>,
    initialized: AtomicBool,
}

impl AsiFilterWheel {
    /// Wheel `wheel` on the card at `address`.
    pub fn new(
        label: impl Into<String>,
        hub: Arc<AsiHub>,
        address: impl Into<String>,
        wheel: u8,
        position_count: u32,
    ) -> Result<Self, AsiError> {
        let address = address.into();
        crate::xy_stage::validate_address(&address)?;
        if position_count == 0 {
            return Err(AsiError::InvalidPosition {
                position: 0,
                count: 0,
            });
        }
        let label = label.into();

        let mut properties = PropertyTable::new();
        properties.insert(Property::new(PROP_NAME, label.clone()).read_only());
        properties.insert(Property::integer(PROP_WHEEL, i64::from(wheel)).read_only());
        properties
            .insert(Property::integer(PROP_POSITIONS, i64::from(position_count)).read_only());

        Ok(Self {
            label,
            hub,
            address,
            wheel,
            position_count,
            properties: RwLock::new(properties),
            initialized: AtomicBool::new(false),
        })
    }

    /// Whether `initialize` has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Run `command` on this wheel and return its answer.
    async fn on_wheel(&self, command: &str) -> Result<String, AsiError> {
        let select = format!("{}FW {}", self.address, self.wheel);
        let command = format!("{}{}", self.address, command);
        let replies = self.hub.exchange_all(&[select, command]).await?;

        let [selected, answer] = <[String; 2]>::try_from(replies)
            .map_err(|r| AsiError::UnrecognizedAnswer(r.join(" | ")))?;
        if selected.trim().parse::<u8>().ok() != Some(self.wheel) {
            return Err(AsiError::FilterWheelNotReady);
        }
        if answer.starts_with(":N") {
            return match parse_reply(&answer) {
                Err(e) => Err(e),
                Ok(_) => Err(AsiError::UnrecognizedAnswer(answer)),
            };
        }
        Ok(answer)
    }

    /// Select the wheel, read its position and register `Position`.
    #[instrument(skip(self), fields(wheel = %self.label), err)]
    pub async fn initialize(&self) -> Result<(), AsiError> {
        self.hub.initialize().await?;
        let position = self.read_position_raw().await?;

        let choices: Vec<String> = (0..self.position_count).map(|p| p.to_string()).collect();
        self.properties.write().insert(
            Property::integer(PROP_POSITION, i64::from(position)).with_choices(choices),
        );
        self.initialized.store(true, Ordering::Release);
        tracing::info!(position, "ASI filter wheel initialized");
        Ok(())
    }

    async fn read_position_raw(&self) -> Result<u32, AsiError> {
        let answer = self.on_wheel("MP").await?;
        answer
            .trim()
            .parse()
            .map_err(|_| AsiError::UnrecognizedAnswer(answer))
    }

    /// Slot the wheel reports.
    pub async fn current_position(&self) -> Result<u32, AsiError> {
        if !self.is_initialized() {
            return Err(AsiError::FilterWheelNotReady);
        }
        self.read_position_raw().await
    }

    /// Whether the wheel is still moving.
    pub async fn is_spinning(&self) -> Result<bool, AsiError> {
        let answer = self.on_wheel("?").await?;
        Ok(answer.trim() != "0")
    }

    /// Move to `position`, checked against the slot count first.
    pub async fn select(&self, position: u32) -> Result<(), AsiError> {
        if !self.is_initialized() {
            return Err(AsiError::FilterWheelNotReady);
        }
        if position >= self.position_count {
            return Err(AsiError::InvalidPosition {
                position,
                count: self.position_count,
            });
        }
        if self.is_spinning().await? {
            return Err(AsiError::FilterWheelSpinning);
        }

        let answer = self.on_wheel(&format!("MP {}", position)).await?;
        if answer.trim().parse::<u32>().ok() != Some(position) {
            return Err(AsiError::UnrecognizedAnswer(answer));
        }
        self.properties
            .write()
            .update(PROP_POSITION, position.to_string())?;
        tracing::debug!(position, "filter wheel moved");
        Ok(())
    }
}

#[async_trait]
impl Device for AsiFilterWheel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(AsiFilterWheel::initialize(self).await?)
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }

    async fn busy(&self) -> anyhow::Result<bool> {
        Ok(self.is_spinning().await?)
    }
}

#[async_trait]
impl DiscretePositioner for AsiFilterWheel {
    async fn move_to(&self, position: u32) -> anyhow::Result<()> {
        Ok(self.select(position).await?)
    }

    async fn position(&self) -> anyhow::Result<u32> {
        Ok(self.current_position().await?)
    }

    fn position_count(&self) -> u32 {
        self.position_count
    }
}

#[async_trait]
impl HasProperties for AsiFilterWheel {
    fn property_names(&self) -> Vec<String> {
        self.properties.read().names()
    }

    fn get_property(&self, name: &str) -> anyhow::Result<String> {
        Ok(self.properties.read().get(name)?.to_string())
    }

    async fn set_property(&self, name: &str, value: &str) -> anyhow::Result<()> {
        if name == PROP_POSITION {
            if let Some(property) = self.properties.read().property(name) {
                property.check(value)?;
            }
            let position: u32 = value.parse()?;
            return Ok(self.select(position).await?);
        }
        self.properties.write().set(name, value)?;
        Ok(())
    }
}

impl HasErrorText for AsiFilterWheel {
    fn error_text(&self, code: i32) -> Option<&'static str> {
        error_text(code)
    }
}
