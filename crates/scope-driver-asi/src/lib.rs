//! ASI Tiger Controller Drivers
//!
//! Devices behind one Tiger controller share a serial link through an
//! [`AsiHub`]:
//!
//! - [`hub`]: command/reply framing, firmware identification, busy query
//! - [`xy_stage`]: two axes driven as an [`XyMovable`](scope_core::capabilities::XyMovable) stage
//! - [`filter_wheel`]: filter wheel card as a [`DiscretePositioner`](scope_core::capabilities::DiscretePositioner)
//!
//! # Example
//!
//! ```rust,ignore
//! use scope_driver_asi::{AsiHub, AsiXyStage, XyStageSettings};
//!
//! let hub = Arc::new(AsiHub::open("Tiger", "/dev/ttyUSB0", 115_200, timeout).await?);
//! let stage = AsiXyStage::new("XYStage", hub, XyStageSettings::default())?;
//! stage.initialize().await?;
//! stage.move_to(100.0, -50.0).await?;
//! stage.wait_until_idle().await?;
//! ```

pub mod error;
pub mod factory;
pub mod filter_wheel;
pub mod hub;
pub mod xy_stage;

pub use error::AsiError;
pub use factory::{AsiFilterWheelFactory, AsiXyStageFactory};
pub use filter_wheel::AsiFilterWheel;
pub use hub::{AsiHub, FirmwareInfo};
pub use xy_stage::{AsiXyStage, XyStageSettings};

/// Force the linker to keep this crate's factories.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<AsiXyStageFactory>());
    std::hint::black_box(std::any::TypeId::of::<AsiFilterWheelFactory>());
}
