//! Simulated Frame Source
//!
//! In-process engine used in demo mode and tests. It exposes the same device
//! registry names as the real engine's simulated cameras:
//!
//! - cameras: `simulated: random` (noise), `simulated: sin` (moving sine
//!   pattern), `simulated: empty` (never produces)
//! - storage: `Trash`, `Tiff`
//!
//! Frames are produced lazily. Each `map_read` appends every frame that is
//! due since `start` (one per exposure period, first one immediately), up to
//! the stream's `max_frame_count` and a bounded backlog.

use crate::frame_source::{
    DeviceIdentifier, DeviceKind, FrameSource, FrameSourceProvider, Report, Reporter,
    SampleType, SourceError, SourceProperties, SourceResult, StreamDescriptor, STREAM_COUNT,
};
use crate::record::{write_record, FrameHeader, HEADER_LEN};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

const DEVICES: &[(DeviceKind, &str)] = &[
    (DeviceKind::Camera, "simulated: random"),
    (DeviceKind::Camera, "simulated: sin"),
    (DeviceKind::Camera, "simulated: empty"),
    (DeviceKind::Storage, "Trash"),
    (DeviceKind::Storage, "Tiff"),
];

/// Frames a stream may hold unread before production pauses.
const MAX_BACKLOG_FRAMES: usize = 16;

/// Shortest frame period, used when the exposure is zero.
const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

/// Settings of the simulated engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedEngineConfig {
    /// Seed for the noise generator (entropy when absent)
    pub seed: Option<u64>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel depth in bytes (1 or 2)
    pub bytes_per_pixel: u32,
    /// Initial exposure; also the frame period
    pub exposure_time_us: f32,
    /// Reported line interval
    pub line_interval_us: f32,
}

impl Default for SimulatedEngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            width: 640,
            height: 480,
            bytes_per_pixel: 1,
            exposure_time_us: 10_000.0,
            line_interval_us: 18.5,
        }
    }
}

#[derive(Debug, Default)]
struct StreamState {
    produced: u64,
    pending: Vec<u8>,
    pending_frames: usize,
}

/// In-process engine producing synthetic frames.
pub struct SimulatedFrameSource {
    reporter: Reporter,
    properties: SourceProperties,
    configured: bool,
    running: bool,
    shut_down: bool,
    started_at: Option<Instant>,
    streams: [StreamState; STREAM_COUNT],
    rng: ChaCha8Rng,
}

impl SimulatedFrameSource {
    /// Engine with no devices selected, reporting through `reporter`.
    pub fn new(config: &SimulatedEngineConfig, reporter: Reporter) -> Self {
        let descriptor = StreamDescriptor {
            sample_type: SampleType::from_bytes_per_pixel(config.bytes_per_pixel),
            shape: (config.width, config.height),
            exposure_time_us: config.exposure_time_us,
            line_interval_us: config.line_interval_us,
            ..Default::default()
        };
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            reporter,
            properties: SourceProperties {
                video: [descriptor.clone(), descriptor],
            },
            configured: false,
            running: false,
            shut_down: false,
            started_at: None,
            streams: Default::default(),
            rng,
        }
    }

    /// Whether `start` has run without a matching `stop`.
    pub fn is_running(&self) -> bool {
        self.running
    }

    fn report(&self, is_error: bool, line: u32, function: &str, message: &str) {
        (self.reporter)(&Report {
            is_error,
            file: file!(),
            line,
            function,
            message,
        });
    }

    fn fail(&self, call: &'static str, line: u32, message: &str) -> SourceError {
        self.report(true, line, call, message);
        SourceError::failed(call)
    }

    fn check_open(&self, call: &'static str) -> SourceResult<()> {
        if self.shut_down {
            return Err(self.fail(call, line!(), "engine has been shut down"));
        }
        Ok(())
    }

    fn check_stream(&self, call: &'static str, stream: usize) -> SourceResult<()> {
        if stream >= STREAM_COUNT {
            return Err(self.fail(call, line!(), &format!("no stream {}", stream)));
        }
        Ok(())
    }

    fn validate(&self, properties: &SourceProperties) -> Result<(), String> {
        for (stream, v) in properties.video.iter().enumerate() {
            match &v.camera {
                Some(id) if id.kind == DeviceKind::Camera && known(id) => {}
                Some(id) => return Err(format!("stream {}: unknown camera '{}'", stream, id.name)),
                None => return Err(format!("stream {}: no camera selected", stream)),
            }
            if let Some(id) = &v.storage {
                if id.kind != DeviceKind::Storage || !known(id) {
                    return Err(format!("stream {}: unknown storage '{}'", stream, id.name));
                }
            }
            if v.shape.0 == 0 || v.shape.1 == 0 {
                return Err(format!("stream {}: empty frame shape", stream));
            }
            if Self::frame_period(v).is_none() {
                return Err(format!(
                    "stream {}: invalid exposure {} us",
                    stream, v.exposure_time_us
                ));
            }
        }
        Ok(())
    }

    /// `None` for a negative, non-finite or out-of-range exposure.
    fn frame_period(descriptor: &StreamDescriptor) -> Option<Duration> {
        let exposure = Duration::try_from_secs_f64(f64::from(descriptor.exposure_time_us) / 1e6).ok()?;
        Some(exposure.max(MIN_FRAME_PERIOD))
    }

    /// Append every frame of `stream` that is due by now.
    fn produce(&mut self, stream: usize) {
        let Some(started_at) = self.started_at else {
            return;
        };
        let descriptor = self.properties.video[stream].clone();
        let camera = descriptor
            .camera
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or_default();
        if camera.contains("empty") {
            return;
        }

        let Some(period) = Self::frame_period(&descriptor) else {
            self.report(true, line!(), "map_read", "invalid exposure, no frames produced");
            return;
        };
        let elapsed = started_at.elapsed();
        let mut due = (elapsed.as_nanos() / period.as_nanos()) as u64 + 1;
        if descriptor.max_frame_count > 0 {
            due = due.min(descriptor.max_frame_count);
        }

        while self.streams[stream].produced < due
            && self.streams[stream].pending_frames < MAX_BACKLOG_FRAMES
        {
            let frame_id = self.streams[stream].produced;
            let payload = self.render(&descriptor, camera.contains("sin"), frame_id);
            let header = FrameHeader::for_payload(
                frame_id,
                period.as_nanos() as u64 * frame_id,
                descriptor.shape.0,
                descriptor.shape.1,
                descriptor.sample_type,
                payload.len(),
            );

            let state = &mut self.streams[stream];
            write_record(&mut state.pending, &header, &payload);
            state.pending_frames += 1;
            state.produced += 1;
        }
    }

    fn render(&mut self, descriptor: &StreamDescriptor, sine: bool, frame_id: u64) -> Vec<u8> {
        let (width, height) = descriptor.shape;
        let pixels = width as usize * height as usize;
        let max_value = match descriptor.sample_type {
            SampleType::U8 => u8::MAX as f64,
            SampleType::U16 => 4095.0,
        };

        let value_at = |index: usize, rng: &mut ChaCha8Rng| -> u16 {
            if sine {
                let x = (index % width as usize) as f64 / width as f64;
                let phase = frame_id as f64 / 16.0;
                let s = (std::f64::consts::TAU * (x + phase)).sin();
                ((0.5 + 0.5 * s) * max_value).round() as u16
            } else {
                rng.gen_range(0..=max_value as u16)
            }
        };

        match descriptor.sample_type {
            SampleType::U8 => (0..pixels)
                .map(|i| value_at(i, &mut self.rng) as u8)
                .collect(),
            SampleType::U16 => {
                let mut out = Vec::with_capacity(pixels * 2);
                for i in 0..pixels {
                    out.extend_from_slice(&value_at(i, &mut self.rng).to_le_bytes());
                }
                out
            }
        }
    }
}

fn known(id: &DeviceIdentifier) -> bool {
    DEVICES
        .get(id.index as usize)
        .is_some_and(|(kind, name)| *kind == id.kind && *name == id.name)
}

#[async_trait]
impl FrameSource for SimulatedFrameSource {
    async fn get_configuration(&mut self) -> SourceResult<SourceProperties> {
        self.check_open("get_configuration")?;
        Ok(self.properties.clone())
    }

    async fn configure(&mut self, properties: &SourceProperties) -> SourceResult<()> {
        self.check_open("configure")?;
        if self.running {
            return Err(self.fail("configure", line!(), "cannot configure while running"));
        }
        if let Err(reason) = self.validate(properties) {
            return Err(self.fail("configure", line!(), &reason));
        }
        self.properties = properties.clone();
        self.configured = true;
        self.report(false, line!(), "configure", "configured");
        Ok(())
    }

    async fn start(&mut self) -> SourceResult<()> {
        self.check_open("start")?;
        if self.running {
            return Err(self.fail("start", line!(), "already running"));
        }
        if !self.configured {
            return Err(self.fail("start", line!(), "not configured"));
        }
        self.streams = Default::default();
        self.started_at = Some(Instant::now());
        self.running = true;
        self.report(false, line!(), "start", "started");
        Ok(())
    }

    async fn stop(&mut self) -> SourceResult<()> {
        self.check_open("stop")?;
        self.running = false;
        self.started_at = None;
        self.report(false, line!(), "stop", "stopped");
        Ok(())
    }

    async fn map_read(&mut self, stream: usize) -> SourceResult<&[u8]> {
        self.check_open("map_read")?;
        self.check_stream("map_read", stream)?;
        if self.running {
            self.produce(stream);
        }
        Ok(&self.streams[stream].pending)
    }

    async fn unmap_read(&mut self, stream: usize, consumed: usize) -> SourceResult<()> {
        self.check_open("unmap_read")?;
        self.check_stream("unmap_read", stream)?;

        let mapped = self.streams[stream].pending.len();
        if consumed > mapped {
            let message = format!("unmap of {} bytes exceeds {} mapped", consumed, mapped);
            return Err(self.fail("unmap_read", line!(), &message));
        }

        let state = &mut self.streams[stream];
        let mut released = 0;
        let mut at = 0;
        while at + HEADER_LEN <= consumed {
            match FrameHeader::parse(&state.pending[at..]) {
                Ok(header) if at as u64 + header.bytes_of_frame <= consumed as u64 => {
                    at += header.bytes_of_frame as usize;
                    released += 1;
                }
                _ => break,
            }
        }
        state.pending.drain(..consumed);
        state.pending_frames = state.pending_frames.saturating_sub(released);
        Ok(())
    }

    async fn select_device(
        &mut self,
        kind: DeviceKind,
        pattern: &str,
    ) -> SourceResult<DeviceIdentifier> {
        self.check_open("select_device")?;
        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                return Err(self.fail("select_device", line!(), &format!("bad pattern: {}", e)))
            }
        };

        let found = DEVICES
            .iter()
            .enumerate()
            .find(|(_, (k, name))| *k == kind && regex.is_match(name));
        match found {
            Some((index, (kind, name))) => Ok(DeviceIdentifier {
                kind: *kind,
                index: index as u32,
                name: (*name).to_string(),
            }),
            None => {
                let message = format!("no {} matches '{}'", kind, pattern);
                Err(self.fail("select_device", line!(), &message))
            }
        }
    }

    async fn shutdown(&mut self) -> SourceResult<()> {
        if !self.shut_down {
            self.running = false;
            self.shut_down = true;
            self.streams = Default::default();
            self.report(false, line!(), "shutdown", "shut down");
        }
        Ok(())
    }
}

/// Opens [`SimulatedFrameSource`] engines.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider {
    config: SimulatedEngineConfig,
}

impl SimulatedProvider {
    /// Provider whose engines all use `config`.
    pub fn new(config: SimulatedEngineConfig) -> Self {
        Self { config }
    }
}

impl FrameSourceProvider for SimulatedProvider {
    fn open(&self, reporter: Reporter) -> SourceResult<Box<dyn FrameSource>> {
        Ok(Box::new(SimulatedFrameSource::new(&self.config, reporter)))
    }
}
