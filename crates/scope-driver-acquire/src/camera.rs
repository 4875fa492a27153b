//! Dual Camera Adapter
//!
//! [`DualCamera`] presents two engine streams to the host as one camera with
//! one or two channels. It owns:
//!
//! - the engine, opened at `initialize` through a [`FrameSourceProvider`]
//! - the host property table
//! - the image buffer set the host reads pixels from
//!
//! # Locking
//!
//! The engine sits in an async mutex. Snaps and sequences hold it for their
//! whole duration; anything that finds it locked fails with
//! [`AcquireError::Busy`] instead of queueing behind an acquisition. The
//! buffer set and property table use `parking_lot` locks that are never held
//! across an `.await`.

use crate::buffer::{
    AcquisitionMode, ImageBuffer, ImageBufferSet, ImageView, MODE_MULTI_CHANNEL, MODE_SINGLE,
};
use crate::collector::{cancel_pair, CancelHandle, CancelToken, CollectStats, FrameCollector};
use crate::config::DualCameraConfig;
use crate::error::{error_text, AcquireError};
use crate::frame_source::{
    tracing_reporter, DeviceKind, FrameSource, FrameSourceProvider, SampleType, SourceProperties,
    STREAM_COUNT,
};
use crate::session::{run_snap, AcquisitionSession, DeviceSelection};
use async_trait::async_trait;
use parking_lot::RwLock;
use scope_core::capabilities::{Device, ExposureControl, HasErrorText, HasProperties, SnapCamera};
use scope_core::data::{Frame, ImageGeometry};
use scope_core::error::PropertyError;
use scope_core::properties::{Property, PropertyKind, PropertyTable};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::instrument;

/// Device label.
pub const PROP_NAME: &str = "Name";
/// Fixed description.
pub const PROP_DESCRIPTION: &str = "Description";
/// Camera model name.
pub const PROP_CAMERA_NAME: &str = "CameraName";
/// Camera version string.
pub const PROP_CAMERA_ID: &str = "CameraID";
/// 1 when frames use the demo geometry.
pub const PROP_DEMO: &str = "Demo";
/// Binning factor, fixed at 1.
pub const PROP_BINNING: &str = "Binning";
/// Buffer layout, `Multi-Channel` or `Single`.
pub const PROP_MODE: &str = "Mode";
/// Line readout interval pushed to both streams.
pub const PROP_LINE_INTERVAL: &str = "LineIntervalUs";
/// Name reported when an exposure value is refused.
pub const PROP_EXPOSURE: &str = "Exposure";

const CAMERA_NAME: &str = "AcquireCamera";
const CAMERA_ID: &str = "V1.0";
const DESCRIPTION: &str = "Dual camera driven by the acquisition engine";

/// Pairs buffered between the sequence task and its consumer.
const SEQUENCE_QUEUE_DEPTH: usize = 16;

type EngineSlot = Arc<Mutex<Option<Box<dyn FrameSource>>>>;

/// One frame from each stream, delivered by a running sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePair {
    /// Position in the sequence, starting at 0
    pub index: u64,
    /// Stream 0 frame, then stream 1
    pub frames: [Frame; STREAM_COUNT],
}

/// Region of interest in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

struct SequenceRun {
    cancel: CancelHandle,
    task: JoinHandle<Result<u64, AcquireError>>,
}

/// Two engine streams presented as one camera.
///
/// See the module docs for the locking rules.
pub struct DualCamera {
    config: DualCameraConfig,
    provider: Arc<dyn FrameSourceProvider>,
    properties: RwLock<PropertyTable>,
    buffers: Arc<RwLock<ImageBufferSet>>,
    engine: EngineSlot,
    initialized: AtomicBool,
    collector: FrameCollector,
    sequence: Mutex<Option<SequenceRun>>,
}

impl DualCamera {
    /// Create an uninitialized camera with its pre-init properties.
    pub fn new(config: DualCameraConfig, provider: Arc<dyn FrameSourceProvider>) -> Self {
        let mut properties = PropertyTable::new();
        properties.insert(Property::new(PROP_NAME, config.label.clone()).read_only());
        properties.insert(Property::new(PROP_DESCRIPTION, DESCRIPTION).read_only());
        properties.insert(Property::new(PROP_CAMERA_NAME, CAMERA_NAME).read_only());
        properties.insert(Property::new(PROP_CAMERA_ID, CAMERA_ID).read_only());
        properties.insert(Property::integer(PROP_DEMO, i64::from(config.demo)).read_only());

        Self {
            collector: config.collector(),
            config,
            provider,
            properties: RwLock::new(properties),
            buffers: Arc::new(RwLock::new(ImageBufferSet::empty())),
            engine: Arc::new(Mutex::new(None)),
            initialized: AtomicBool::new(false),
            sequence: Mutex::new(None),
        }
    }

    /// Settings the camera was built with.
    pub fn config(&self) -> &DualCameraConfig {
        &self.config
    }

    /// Whether `initialize` has completed without a later shutdown.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Open the engine, select both cameras and allocate the image buffers.
    ///
    /// Calling this on an initialized camera does nothing.
    #[instrument(skip(self), fields(label = %self.config.label), err)]
    pub async fn initialize(&self) -> Result<(), AcquireError> {
        let mut engine = self.engine.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        {
            let mut properties = self.properties.write();
            properties.insert(Property::integer(PROP_BINNING, 1).with_choices(["1"]));
            properties.insert(
                Property::new(PROP_MODE, self.config.mode.as_str())
                    .with_choices([MODE_MULTI_CHANNEL, MODE_SINGLE]),
            );
        }

        let mut source = self
            .provider
            .open(tracing_reporter(self.config.label.clone()))
            .map_err(AcquireError::EngineInit)?;

        let current = match self.select_cameras(source.as_mut()).await {
            Ok(current) => current,
            Err(e) => {
                if let Err(shutdown) = source.shutdown().await {
                    tracing::warn!(error = %shutdown, "engine shutdown after failed initialize");
                }
                return Err(e);
            }
        };

        let geometry = self.initial_geometry(&current);
        let mut current = current;
        for descriptor in current.video.iter_mut() {
            descriptor.shape = (geometry.width, geometry.height);
            descriptor.sample_type = SampleType::from_bytes_per_pixel(geometry.bytes_per_pixel);
        }
        if let Err(e) = source.configure(&current).await {
            tracing::warn!(error = %e, "applying camera selection failed");
        }

        self.properties.write().insert(Property::float(
            PROP_LINE_INTERVAL,
            f64::from(current.video[0].line_interval_us),
        ));
        *self.buffers.write() = ImageBufferSet::new(geometry, self.config.mode);

        *engine = Some(source);
        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            width = geometry.width,
            height = geometry.height,
            bytes_per_pixel = geometry.bytes_per_pixel,
            mode = %self.config.mode,
            "dual camera initialized"
        );
        Ok(())
    }

    async fn select_cameras(
        &self,
        source: &mut dyn FrameSource,
    ) -> Result<SourceProperties, AcquireError> {
        let mut current = source
            .get_configuration()
            .await
            .map_err(AcquireError::Configure)?;

        for (stream, pattern) in self.config.selection.cameras.iter().enumerate() {
            let id = source
                .select_device(DeviceKind::Camera, pattern)
                .await
                .map_err(|e| AcquireError::DeviceSelection {
                    kind: DeviceKind::Camera,
                    pattern: pattern.clone(),
                    source: e,
                })?;
            tracing::debug!(stream, camera = %id.name, "camera selected");
            current.video[stream].camera = Some(id);
        }
        Ok(current)
    }

    fn initial_geometry(&self, current: &SourceProperties) -> ImageGeometry {
        if self.config.demo {
            return self.config.demo_geometry();
        }
        let stream = &current.video[0];
        if stream.shape.0 == 0 || stream.shape.1 == 0 {
            tracing::warn!("engine reports no frame shape, using demo geometry");
            return self.config.demo_geometry();
        }
        ImageGeometry::new(
            stream.shape.0,
            stream.shape.1,
            stream.sample_type.bytes_per_pixel(),
        )
    }

    /// Stop any sequence, shut the engine down and drop the buffers.
    ///
    /// Engine failures are logged. Calling this twice is harmless.
    #[instrument(skip(self), fields(label = %self.config.label))]
    pub async fn shutdown(&self) -> Result<(), AcquireError> {
        if let Err(e) = self.stop_sequence().await {
            tracing::warn!(error = %e, "sequence ended with an error during shutdown");
        }

        let mut engine = self.engine.lock().await;
        if let Some(mut source) = engine.take() {
            if let Err(e) = source.shutdown().await {
                tracing::warn!(error = %e, "engine shutdown failed");
            }
        }
        self.buffers.write().clear();
        if self.initialized.swap(false, Ordering::AcqRel) {
            tracing::info!("dual camera shut down");
        }
        Ok(())
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Acquire one frame per stream into the image buffers.
    pub async fn snap_image(&self) -> Result<[CollectStats; STREAM_COUNT], AcquireError> {
        self.snap_image_with_cancel(CancelToken::never()).await
    }

    /// [`snap_image`](Self::snap_image) that stops waiting when `cancel` fires.
    pub async fn snap_image_with_cancel(
        &self,
        mut cancel: CancelToken,
    ) -> Result<[CollectStats; STREAM_COUNT], AcquireError> {
        let mut engine = self.engine.try_lock().map_err(|_| AcquireError::Busy)?;
        let source = engine.as_mut().ok_or(AcquireError::NotInitialized)?;
        run_snap(
            source.as_mut(),
            &self.config.selection,
            &self.collector,
            &self.buffers,
            &mut cancel,
        )
        .await
    }

    /// Start continuous acquisition of `num_images` pairs (0 = until stopped).
    ///
    /// Pairs arrive on the returned channel at most once per `interval`. The
    /// last pair also stays in the image buffers. Returns once the engine is
    /// running.
    #[instrument(skip(self), fields(label = %self.config.label), err)]
    pub async fn start_sequence(
        &self,
        num_images: u64,
        interval: Duration,
    ) -> Result<mpsc::Receiver<FramePair>, AcquireError> {
        let mut slot = self.sequence.lock().await;
        if let Some(run) = slot.as_ref() {
            if !run.task.is_finished() {
                return Err(AcquireError::Busy);
            }
        }
        if let Some(previous) = slot.take() {
            log_sequence_end(previous.task.await);
        }

        let engine = self
            .engine
            .clone()
            .try_lock_owned()
            .map_err(|_| AcquireError::Busy)?;
        if engine.is_none() {
            return Err(AcquireError::NotInitialized);
        }

        let (tx, rx) = mpsc::channel(SEQUENCE_QUEUE_DEPTH);
        let (cancel, token) = cancel_pair();
        let (started_tx, started_rx) = oneshot::channel();
        let job = SequenceJob {
            engine,
            selection: self.config.selection.clone(),
            collector: self.collector,
            buffers: self.buffers.clone(),
            num_images,
            interval,
            cancel: token,
            frames: tx,
            started: started_tx,
        };
        let task = tokio::spawn(job.run());

        match started_rx.await {
            Ok(Ok(())) => {
                *slot = Some(SequenceRun { cancel, task });
                Ok(rx)
            }
            Ok(Err(e)) => {
                let _ = task.await;
                Err(e)
            }
            Err(_) => Err(match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(_)) => AcquireError::SequenceAborted("ended before start".to_string()),
                Err(join) => AcquireError::SequenceAborted(join.to_string()),
            }),
        }
    }

    /// Cancel the running sequence and wait for the engine to stop.
    ///
    /// Returns the number of pairs delivered, 0 when no sequence ran.
    pub async fn stop_sequence(&self) -> Result<u64, AcquireError> {
        let Some(run) = self.sequence.lock().await.take() else {
            return Ok(0);
        };
        run.cancel.cancel();
        join_sequence(run.task).await
    }

    /// Wait for the running sequence to deliver all its pairs.
    pub async fn wait_sequence(&self) -> Result<u64, AcquireError> {
        let Some(run) = self.sequence.lock().await.take() else {
            return Ok(0);
        };
        join_sequence(run.task).await
    }

    /// Whether a sequence task is still running.
    pub fn is_sequence_running(&self) -> bool {
        match self.sequence.try_lock() {
            Ok(slot) => slot.as_ref().is_some_and(|run| !run.task.is_finished()),
            Err(_) => true,
        }
    }

    // =========================================================================
    // Exposure
    // =========================================================================

    /// Write `ms` as the exposure of both streams.
    ///
    /// Negative, non-finite and out-of-range values are refused. Engine
    /// failures are logged, not returned.
    pub async fn set_exposure(&self, ms: f64) -> Result<(), AcquireError> {
        let exposure_us = (ms * 1000.0) as f32;
        if !ms.is_finite() || ms < 0.0 || !exposure_us.is_finite() {
            return Err(PropertyError::InvalidValue {
                name: PROP_EXPOSURE.to_string(),
                value: ms.to_string(),
            }
            .into());
        }
        let mut engine = self.engine.try_lock().map_err(|_| AcquireError::Busy)?;
        let source = engine.as_mut().ok_or(AcquireError::NotInitialized)?;
        update_streams(source.as_mut(), "exposure", |descriptor| {
            descriptor.exposure_time_us = exposure_us;
        })
        .await;
        Ok(())
    }

    /// Stream 0 exposure in milliseconds, 0 when it cannot be read.
    pub async fn exposure(&self) -> f64 {
        let Ok(mut engine) = self.engine.try_lock() else {
            tracing::warn!("exposure unavailable while acquiring");
            return 0.0;
        };
        let Some(source) = engine.as_mut() else {
            return 0.0;
        };
        match source.get_configuration().await {
            Ok(current) => f64::from(current.video[0].exposure_time_us) / 1000.0,
            Err(e) => {
                tracing::warn!(error = %e, "reading exposure failed");
                0.0
            }
        }
    }

    /// Always false: exposure cannot change inside a sequence.
    pub fn is_exposure_sequenceable(&self) -> bool {
        false
    }

    // =========================================================================
    // Image buffers
    // =========================================================================

    /// Pixels of `channel`, `None` for a nonexistent channel.
    ///
    /// The view keeps the pixels of the acquisition it was taken after;
    /// holding it does not delay the next snap.
    pub fn image_buffer(&self, channel: u32) -> Option<ImageView> {
        self.buffers
            .read()
            .buffer(channel as usize)
            .map(ImageBuffer::view)
    }

    /// Byte length of channel 0.
    pub fn image_buffer_size(&self) -> usize {
        self.buffers.read().primary_geometry().byte_len()
    }

    /// Width of channel 0.
    pub fn image_width(&self) -> u32 {
        self.buffers.read().primary_geometry().width
    }

    /// Height of channel 0; doubled in combined mode.
    pub fn image_height(&self) -> u32 {
        self.buffers.read().primary_geometry().height
    }

    /// Pixel depth in bytes.
    pub fn image_bytes_per_pixel(&self) -> u32 {
        self.buffers.read().primary_geometry().bytes_per_pixel
    }

    /// Pixel depth in bits.
    pub fn bit_depth(&self) -> u32 {
        self.buffers.read().primary_geometry().bit_depth()
    }

    /// 2 in split mode, 1 in combined mode, 0 before initialize.
    pub fn number_of_channels(&self) -> u32 {
        self.buffers.read().len() as u32
    }

    /// Always 1 (monochrome).
    pub fn number_of_components(&self) -> u32 {
        1
    }

    /// `Camera-1`, `Camera-2`, ...
    pub fn channel_name(&self, channel: u32) -> Result<String, AcquireError> {
        if channel < self.number_of_channels() {
            Ok(format!("Camera-{}", channel + 1))
        } else {
            Err(AcquireError::NonexistentChannel(channel))
        }
    }

    /// Current buffer layout.
    pub fn mode(&self) -> AcquisitionMode {
        self.buffers.read().mode()
    }

    // Binning and ROI are fixed; the setters are accepted and ignored.

    /// Always 1.
    pub fn binning(&self) -> u32 {
        1
    }

    /// Accepted and ignored.
    pub fn set_binning(&self, binning: u32) -> Result<(), AcquireError> {
        tracing::debug!(binning, "binning is fixed at 1");
        Ok(())
    }

    /// Accepted and ignored.
    pub fn set_roi(&self, roi: Roi) -> Result<(), AcquireError> {
        tracing::debug!(?roi, "ROI is not supported");
        Ok(())
    }

    /// Full frame of channel 0.
    pub fn roi(&self) -> Roi {
        let geometry = self.buffers.read().primary_geometry();
        Roi {
            x: 0,
            y: 0,
            width: geometry.width,
            height: geometry.height,
        }
    }

    /// No-op; the ROI is always the full frame.
    pub fn clear_roi(&self) -> Result<(), AcquireError> {
        Ok(())
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Current value of a property.
    pub fn property(&self, name: &str) -> Result<String, AcquireError> {
        Ok(self.properties.read().get(name)?.to_string())
    }

    /// Host-side property write.
    ///
    /// `Mode` reallocates the image buffers and is refused while an
    /// acquisition holds the engine. `LineIntervalUs` is pushed to both
    /// streams.
    pub async fn set_property(&self, name: &str, value: &str) -> Result<(), AcquireError> {
        match name {
            PROP_MODE => {
                let _engine = self.engine.try_lock().map_err(|_| AcquireError::Busy)?;
                self.properties.write().set(name, value)?;
                let mode: AcquisitionMode = value.parse()?;
                self.buffers.write().apply_mode(mode);
                tracing::info!(mode = %mode, "acquisition mode changed");
            }
            PROP_LINE_INTERVAL => {
                self.properties.write().set(name, value)?;
                let line_interval_us: f32 = value.parse().map_err(|_| PropertyError::Parse {
                    name: name.to_string(),
                    value: value.to_string(),
                    kind: PropertyKind::Float.label(),
                })?;
                self.push_line_interval(line_interval_us).await;
            }
            _ => self.properties.write().set(name, value)?,
        }
        Ok(())
    }

    async fn push_line_interval(&self, line_interval_us: f32) {
        let Ok(mut engine) = self.engine.try_lock() else {
            tracing::warn!("line interval not applied while acquiring");
            return;
        };
        if let Some(source) = engine.as_mut() {
            update_streams(source.as_mut(), "line interval", |descriptor| {
                descriptor.line_interval_us = line_interval_us;
            })
            .await;
        }
    }
}

impl Drop for DualCamera {
    fn drop(&mut self) {
        if self.is_initialized() {
            tracing::warn!(label = %self.config.label, "dual camera dropped without shutdown");
        }
    }
}

/// Read the engine configuration, edit both streams and write it back.
/// Failures are logged.
async fn update_streams<F>(source: &mut dyn FrameSource, what: &str, mut edit: F)
where
    F: FnMut(&mut crate::frame_source::StreamDescriptor) + Send,
{
    let mut current = match source.get_configuration().await {
        Ok(current) => current,
        Err(e) => {
            tracing::warn!(error = %e, setting = what, "reading engine configuration failed");
            return;
        }
    };
    for descriptor in current.video.iter_mut() {
        edit(descriptor);
    }
    if let Err(e) = source.configure(&current).await {
        tracing::warn!(error = %e, setting = what, "engine rejected setting");
    }
}

async fn join_sequence(task: JoinHandle<Result<u64, AcquireError>>) -> Result<u64, AcquireError> {
    match task.await {
        Ok(result) => result,
        Err(join) => Err(AcquireError::SequenceAborted(join.to_string())),
    }
}

fn log_sequence_end(result: Result<Result<u64, AcquireError>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(delivered)) => tracing::debug!(delivered, "previous sequence finished"),
        Ok(Err(e)) => tracing::warn!(error = %e, "previous sequence failed"),
        Err(e) => tracing::warn!(error = %e, "previous sequence aborted"),
    }
}

// =============================================================================
// Sequence task
// =============================================================================

struct SequenceJob {
    engine: OwnedMutexGuard<Option<Box<dyn FrameSource>>>,
    selection: DeviceSelection,
    collector: FrameCollector,
    buffers: Arc<RwLock<ImageBufferSet>>,
    num_images: u64,
    interval: Duration,
    cancel: CancelToken,
    frames: mpsc::Sender<FramePair>,
    started: oneshot::Sender<Result<(), AcquireError>>,
}

impl SequenceJob {
    async fn run(self) -> Result<u64, AcquireError> {
        let SequenceJob {
            mut engine,
            selection,
            collector,
            buffers,
            num_images,
            interval,
            mut cancel,
            frames,
            started,
        } = self;

        let Some(source) = engine.as_mut() else {
            let _ = started.send(Err(AcquireError::NotInitialized));
            return Err(AcquireError::NotInitialized);
        };

        let frame = buffers.read().frame_geometry();
        let mut session = AcquisitionSession::new(source.as_mut());
        let properties = session.prepare(&selection, frame, num_images).await;
        if let Err(e) = session.start(&properties).await {
            let _ = started.send(Err(e.clone()));
            return Err(e);
        }
        let _ = started.send(Ok(()));
        tracing::info!(num_images, ?interval, "sequence started");

        session.begin_collecting();
        let outcome = deliver_pairs(
            session.source(),
            &collector,
            &buffers,
            num_images,
            interval,
            &mut cancel,
            &frames,
        )
        .await;
        let result = session.finish(outcome).await;

        match &result {
            Ok(delivered) => tracing::info!(delivered, "sequence finished"),
            Err(e) => tracing::warn!(error = %e, "sequence failed"),
        }
        result
    }
}

/// Pair records of both streams in arrival order and send them on.
///
/// Cancellation and a dropped receiver end the sequence normally.
async fn deliver_pairs(
    source: &mut dyn FrameSource,
    collector: &FrameCollector,
    buffers: &RwLock<ImageBufferSet>,
    num_images: u64,
    interval: Duration,
    cancel: &mut CancelToken,
    frames: &mpsc::Sender<FramePair>,
) -> Result<u64, AcquireError> {
    let mut queues: [VecDeque<Frame>; STREAM_COUNT] = Default::default();
    let mut ticker = (!interval.is_zero()).then(|| {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let mut delivered = 0u64;

    while num_images == 0 || delivered < num_images {
        if let Some(ticker) = ticker.as_mut() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => return Ok(delivered),
            }
        }

        for (stream, queue) in queues.iter_mut().enumerate() {
            while queue.is_empty() {
                match collector.collect_all(source, stream, cancel).await {
                    Ok(batch) => queue.extend(batch),
                    Err(AcquireError::Cancelled { .. }) => return Ok(delivered),
                    Err(e) => return Err(e),
                }
            }
        }

        let (Some(first), Some(second)) = (queues[0].pop_front(), queues[1].pop_front()) else {
            continue;
        };

        {
            let mut set = buffers.write();
            for (stream, frame) in [&first, &second].into_iter().enumerate() {
                if !set.store(stream, &frame.data) {
                    tracing::debug!(stream, bytes = frame.data.len(), "frame does not fit image buffer");
                }
            }
        }

        let pair = FramePair {
            index: delivered,
            frames: [first, second],
        };
        tokio::select! {
            sent = frames.send(pair) => {
                if sent.is_err() {
                    tracing::debug!(delivered, "sequence receiver dropped");
                    return Ok(delivered);
                }
            }
            _ = cancel.cancelled() => return Ok(delivered),
        }
        delivered += 1;
    }

    Ok(delivered)
}

// =============================================================================
// Capability implementations
// =============================================================================

#[async_trait]
impl Device for DualCamera {
    fn name(&self) -> &str {
        &self.config.label
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(DualCamera::initialize(self).await?)
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(DualCamera::shutdown(self).await?)
    }

    async fn busy(&self) -> anyhow::Result<bool> {
        Ok(self.engine.try_lock().is_err())
    }
}

#[async_trait]
impl HasProperties for DualCamera {
    fn property_names(&self) -> Vec<String> {
        self.properties.read().names()
    }

    fn get_property(&self, name: &str) -> anyhow::Result<String> {
        Ok(self.property(name)?)
    }

    async fn set_property(&self, name: &str, value: &str) -> anyhow::Result<()> {
        Ok(DualCamera::set_property(self, name, value).await?)
    }
}

impl HasErrorText for DualCamera {
    fn error_text(&self, code: i32) -> Option<&'static str> {
        error_text(code)
    }
}

#[async_trait]
impl ExposureControl for DualCamera {
    async fn set_exposure(&self, seconds: f64) -> anyhow::Result<()> {
        Ok(DualCamera::set_exposure(self, seconds * 1000.0).await?)
    }

    async fn get_exposure(&self) -> anyhow::Result<f64> {
        Ok(self.exposure().await / 1000.0)
    }
}

#[async_trait]
impl SnapCamera for DualCamera {
    async fn snap(&self) -> anyhow::Result<()> {
        self.snap_image().await?;
        Ok(())
    }

    fn channel_count(&self) -> u32 {
        self.number_of_channels()
    }

    fn channel_name(&self, channel: u32) -> anyhow::Result<String> {
        Ok(DualCamera::channel_name(self, channel)?)
    }

    fn geometry(&self) -> ImageGeometry {
        self.buffers.read().primary_geometry()
    }

    fn frame(&self, channel: u32) -> Option<Frame> {
        let set = self.buffers.read();
        let buffer = set.buffer(channel as usize)?;
        Some(Frame::from_bytes(
            buffer.width(),
            buffer.height(),
            buffer.bytes_per_pixel() * 8,
            buffer.pixels().to_vec(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedEngineConfig, SimulatedProvider};

    fn camera(mode: AcquisitionMode) -> DualCamera {
        let config = DualCameraConfig {
            mode,
            demo_width: 16,
            demo_height: 8,
            engine: SimulatedEngineConfig {
                seed: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let provider = Arc::new(SimulatedProvider::new(config.engine.clone()));
        DualCamera::new(config, provider)
    }

    #[tokio::test]
    async fn pre_init_properties() {
        let camera = camera(AcquisitionMode::Split);
        assert_eq!(camera.property(PROP_NAME).unwrap(), "AcquireCamera");
        assert_eq!(camera.property(PROP_CAMERA_ID).unwrap(), "V1.0");
        assert_eq!(camera.property(PROP_DEMO).unwrap(), "1");
        assert!(camera.property(PROP_MODE).is_err());
        assert!(matches!(
            camera.set_property(PROP_DEMO, "0").await,
            Err(AcquireError::Property(PropertyError::ReadOnly(_)))
        ));
        assert_eq!(camera.number_of_channels(), 0);
        assert!(matches!(
            camera.snap_image().await,
            Err(AcquireError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_allocates_buffers() {
        let camera = camera(AcquisitionMode::Split);
        camera.initialize().await.unwrap();
        camera.initialize().await.unwrap();

        assert_eq!(camera.number_of_channels(), 2);
        assert_eq!(camera.image_buffer_size(), 16 * 8);
        assert_eq!(camera.bit_depth(), 8);
        assert_eq!(camera.property(PROP_MODE).unwrap(), "Multi-Channel");
        assert_eq!(camera.property(PROP_BINNING).unwrap(), "1");
        assert!(camera.property(PROP_LINE_INTERVAL).is_ok());

        camera.shutdown().await.unwrap();
        camera.shutdown().await.unwrap();
        assert!(!camera.is_initialized());
        assert!(camera.image_buffer(0).is_none());
    }

    #[tokio::test]
    async fn snap_fills_both_channels() {
        let camera = camera(AcquisitionMode::Split);
        camera.initialize().await.unwrap();
        let stats = camera.snap_image().await.unwrap();
        assert_eq!(stats[0].consumed, 48 + 16 * 8);

        // The sine stream is never all zero.
        let second = camera.image_buffer(1).unwrap();
        assert_eq!(second.len(), 16 * 8);
        assert!(second.iter().any(|&p| p != 0));
        drop(second);

        assert!(camera.image_buffer(2).is_none());
        camera.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn combined_mode_stitches_streams() {
        let camera = camera(AcquisitionMode::Combined);
        camera.initialize().await.unwrap();
        assert_eq!(camera.number_of_channels(), 1);
        assert_eq!(camera.image_height(), 16);

        camera.snap_image().await.unwrap();
        let frame = SnapCamera::frame(&camera, 0).unwrap();
        assert_eq!(frame.data.len(), 16 * 16);
        assert!(frame.data[16 * 8..].iter().any(|&p| p != 0));
        camera.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn mode_property_reallocates() {
        let camera = camera(AcquisitionMode::Split);
        camera.initialize().await.unwrap();

        camera.set_property(PROP_MODE, "Single").await.unwrap();
        assert_eq!(camera.mode(), AcquisitionMode::Combined);
        assert_eq!(camera.number_of_channels(), 1);
        assert_eq!(camera.image_buffer_size(), 16 * 16);

        let err = camera.set_property(PROP_MODE, "Stitched").await.unwrap_err();
        assert!(matches!(
            err,
            AcquireError::Property(PropertyError::InvalidValue { .. })
        ));
        assert_eq!(camera.property(PROP_MODE).unwrap(), "Single");
        camera.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn exposure_round_trips_through_engine() {
        let camera = camera(AcquisitionMode::Split);
        camera.initialize().await.unwrap();
        camera.set_exposure(25.0).await.unwrap();
        assert!((camera.exposure().await - 25.0).abs() < 1e-6);
        assert!(!camera.is_exposure_sequenceable());
        camera.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unusable_exposure_is_refused() {
        let camera = camera(AcquisitionMode::Split);
        camera.initialize().await.unwrap();
        camera.set_exposure(5.0).await.unwrap();

        for ms in [f64::NAN, f64::INFINITY, -1.0, 1e40] {
            let err = camera.set_exposure(ms).await.unwrap_err();
            assert!(matches!(
                err,
                AcquireError::Property(PropertyError::InvalidValue { .. })
            ));
        }

        assert!((camera.exposure().await - 5.0).abs() < 1e-6);
        camera.snap_image().await.unwrap();
        camera.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn channel_names_and_fixed_settings() {
        let camera = camera(AcquisitionMode::Split);
        camera.initialize().await.unwrap();
        assert_eq!(camera.channel_name(0).unwrap(), "Camera-1");
        assert_eq!(camera.channel_name(1).unwrap(), "Camera-2");
        let err = camera.channel_name(2).unwrap_err();
        assert_eq!(err.code(), 23);

        camera.set_binning(4).unwrap();
        assert_eq!(camera.binning(), 1);
        camera
            .set_roi(Roi {
                x: 2,
                y: 2,
                width: 4,
                height: 4,
            })
            .unwrap();
        assert_eq!(camera.roi().width, 16);
        camera.clear_roi().unwrap();
        assert_eq!((camera.image_width(), camera.image_height()), (16, 8));
        assert_eq!(camera.image_bytes_per_pixel(), 1);
        assert_eq!(camera.number_of_components(), 1);
        camera.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn sequence_delivers_requested_pairs() {
        let camera = camera(AcquisitionMode::Split);
        camera.initialize().await.unwrap();

        let mut pairs = camera.start_sequence(3, Duration::ZERO).await.unwrap();
        assert!(matches!(camera.snap_image().await, Err(AcquireError::Busy)));

        let mut indices = Vec::new();
        while let Some(pair) = pairs.recv().await {
            assert_eq!(pair.frames[0].data.len(), 16 * 8);
            assert_eq!(pair.frames[0].frame_id, pair.index);
            indices.push(pair.index);
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(camera.wait_sequence().await.unwrap(), 3);

        camera.snap_image().await.unwrap();
        camera.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stop_sequence_cancels_unbounded_run() {
        let camera = camera(AcquisitionMode::Split);
        camera.initialize().await.unwrap();

        let mut pairs = camera.start_sequence(0, Duration::from_millis(1)).await.unwrap();
        assert!(pairs.recv().await.is_some());
        assert!(camera.is_sequence_running());

        let delivered = camera.stop_sequence().await.unwrap();
        assert!(delivered >= 1);
        assert!(!camera.is_sequence_running());
        camera.shutdown().await.unwrap();
    }
}
