//! Dual Camera Acquisition Adapter
//!
//! Drives two video streams of an external acquisition engine and presents
//! them to the host as one camera:
//!
//! - [`frame_source`]: the engine interface ([`FrameSource`]) and its reporter
//! - [`record`]: header-prefixed frame records in mapped read ranges
//! - [`collector`]: bounded, cancellable per-stream frame collection
//! - [`buffer`]: host image buffers in split or combined layout
//! - [`session`]: configure / start / collect / stop lifecycle
//! - [`camera`]: the [`DualCamera`] facade
//! - [`sim`]: in-process engine for demo mode and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use scope_driver_acquire::{DualCamera, DualCameraConfig, SimulatedProvider};
//!
//! let config = DualCameraConfig::default();
//! let provider = Arc::new(SimulatedProvider::new(config.engine.clone()));
//! let camera = DualCamera::new(config, provider);
//!
//! camera.initialize().await?;
//! camera.snap_image().await?;
//! let pixels = camera.image_buffer(1).expect("two channels in split mode");
//! ```

pub mod buffer;
pub mod camera;
pub mod collector;
pub mod config;
pub mod error;
mod factory;
pub mod frame_source;
pub mod record;
pub mod session;
pub mod sim;

pub use buffer::{AcquisitionMode, ImageBuffer, ImageBufferSet, ImageView};
pub use camera::{DualCamera, FramePair, Roi};
pub use collector::{cancel_pair, CancelHandle, CancelToken, CollectStats, FrameCollector};
pub use config::DualCameraConfig;
pub use error::AcquireError;
pub use factory::DualCameraFactory;
pub use frame_source::{FrameSource, FrameSourceProvider, SourceError};
pub use sim::{SimulatedEngineConfig, SimulatedFrameSource, SimulatedProvider};

/// Force the linker to keep this crate's factory.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<DualCameraFactory>());
}
