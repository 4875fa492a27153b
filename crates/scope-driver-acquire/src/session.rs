//! Acquisition session lifecycle.
//!
//! ```text
//! Idle ──prepare──▶ Configuring ──start──▶ Started ──▶ Collecting ──finish──▶ Stopped
//!   ▲                   │                     │
//!   └── configure/start failure ◀─────────────┘
//! ```
//!
//! Once `start` succeeded, [`AcquisitionSession::finish`] issues exactly one
//! `stop`, whatever the collection outcome was. A failed `start` is not
//! followed by a `stop`.

use crate::buffer::ImageBufferSet;
use crate::collector::{CancelToken, CollectStats, FrameCollector};
use crate::error::AcquireError;
use crate::frame_source::{
    DeviceKind, FrameSource, SampleType, SourceProperties, STREAM_COUNT,
};
use parking_lot::RwLock;
use scope_core::data::ImageGeometry;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Name patterns used to pick engine devices for each stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelection {
    /// Camera pattern per stream
    pub cameras: [String; STREAM_COUNT],
    /// Storage pattern, shared by both streams
    pub storage: String,
}

impl Default for DeviceSelection {
    fn default() -> Self {
        Self {
            cameras: [
                "simulated.*random.*".to_string(),
                "simulated.*sin.*".to_string(),
            ],
            storage: "Trash".to_string(),
        }
    }
}

/// Where an acquisition is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent to the engine yet
    Idle,
    /// Configuration sent
    Configuring,
    /// Engine running
    Started,
    /// Waiting for frames
    Collecting,
    /// Stop issued
    Stopped,
}

/// One configure → start → collect → stop cycle on an engine.
pub struct AcquisitionSession<'a> {
    source: &'a mut dyn FrameSource,
    state: SessionState,
}

impl<'a> AcquisitionSession<'a> {
    /// Session over `source`, in `Idle`.
    pub fn new(source: &'a mut dyn FrameSource) -> Self {
        Self {
            source,
            state: SessionState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The engine, for collection while the session is running.
    pub fn source(&mut self) -> &mut dyn FrameSource {
        &mut *self.source
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Build both stream descriptors from the engine's current configuration.
    ///
    /// Device selection failures are logged; `configure` decides whether the
    /// resulting descriptors are usable.
    pub async fn prepare(
        &mut self,
        selection: &DeviceSelection,
        frame: ImageGeometry,
        max_frame_count: u64,
    ) -> SourceProperties {
        self.transition(SessionState::Configuring);

        let mut properties = match self.source.get_configuration().await {
            Ok(properties) => properties,
            Err(e) => {
                tracing::warn!(error = %e, "reading engine configuration failed");
                SourceProperties::default()
            }
        };

        for (stream, descriptor) in properties.video.iter_mut().enumerate() {
            match self
                .source
                .select_device(DeviceKind::Camera, &selection.cameras[stream])
                .await
            {
                Ok(id) => descriptor.camera = Some(id),
                Err(e) => tracing::warn!(
                    stream,
                    pattern = %selection.cameras[stream],
                    error = %e,
                    "camera selection failed"
                ),
            }
            match self
                .source
                .select_device(DeviceKind::Storage, &selection.storage)
                .await
            {
                Ok(id) => descriptor.storage = Some(id),
                Err(e) => tracing::warn!(
                    stream,
                    pattern = %selection.storage,
                    error = %e,
                    "storage selection failed"
                ),
            }

            descriptor.binning = 1;
            descriptor.sample_type = SampleType::from_bytes_per_pixel(frame.bytes_per_pixel);
            descriptor.shape = (frame.width, frame.height);
            descriptor.max_frame_count = max_frame_count;
        }

        properties
    }

    /// Configure the engine and start it.
    pub async fn start(&mut self, properties: &SourceProperties) -> Result<(), AcquireError> {
        if let Err(e) = self.source.configure(properties).await {
            tracing::warn!(error = %e, "engine configure failed");
            self.transition(SessionState::Idle);
            return Err(AcquireError::Configure(e));
        }

        if let Err(e) = self.source.start().await {
            tracing::error!(error = %e, "engine start failed");
            self.transition(SessionState::Idle);
            return Err(AcquireError::Start(e));
        }

        self.transition(SessionState::Started);
        Ok(())
    }

    /// Mark the start of frame collection.
    pub fn begin_collecting(&mut self) {
        self.transition(SessionState::Collecting);
    }

    /// Stop the engine and merge the stop result into the collection outcome.
    ///
    /// A stop failure is reported only when collection succeeded; otherwise
    /// the collection error wins and the stop failure is logged.
    pub async fn finish<T>(
        &mut self,
        outcome: Result<T, AcquireError>,
    ) -> Result<T, AcquireError> {
        if !matches!(self.state, SessionState::Started | SessionState::Collecting) {
            return outcome;
        }

        let stopped = self.source.stop().await;
        self.transition(SessionState::Stopped);

        match (outcome, stopped) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(AcquireError::Stop(e)),
            (Err(collect), Ok(())) => Err(collect),
            (Err(collect), Err(stop)) => {
                tracing::warn!(error = %stop, "engine stop failed after collection error");
                Err(collect)
            }
        }
    }
}

impl Drop for AcquisitionSession<'_> {
    fn drop(&mut self) {
        if matches!(self.state, SessionState::Started | SessionState::Collecting) {
            tracing::warn!("acquisition session dropped while the engine was running");
        }
    }
}

/// Single-shot acquisition: one frame per stream into the buffer set.
#[instrument(skip_all, err)]
pub async fn run_snap(
    source: &mut dyn FrameSource,
    selection: &DeviceSelection,
    collector: &FrameCollector,
    buffers: &RwLock<ImageBufferSet>,
    cancel: &mut CancelToken,
) -> Result<[CollectStats; STREAM_COUNT], AcquireError> {
    let frame = buffers.read().frame_geometry();

    let mut session = AcquisitionSession::new(source);
    let properties = session.prepare(selection, frame, 1).await;
    session.start(&properties).await?;

    session.begin_collecting();
    let outcome = collector
        .collect_pair(session.source(), buffers, cancel)
        .await;
    session.finish(outcome).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::{DeviceIdentifier, SourceError, SourceResult};
    use async_trait::async_trait;

    #[derive(Default)]
    struct Lifecycle {
        calls: Vec<&'static str>,
        fail_configure: bool,
        fail_start: bool,
        fail_stop: bool,
    }

    #[async_trait]
    impl FrameSource for Lifecycle {
        async fn get_configuration(&mut self) -> SourceResult<SourceProperties> {
            self.calls.push("get_configuration");
            Ok(SourceProperties::default())
        }
        async fn configure(&mut self, _: &SourceProperties) -> SourceResult<()> {
            self.calls.push("configure");
            if self.fail_configure {
                return Err(SourceError::failed("configure"));
            }
            Ok(())
        }
        async fn start(&mut self) -> SourceResult<()> {
            self.calls.push("start");
            if self.fail_start {
                return Err(SourceError::failed("start"));
            }
            Ok(())
        }
        async fn stop(&mut self) -> SourceResult<()> {
            self.calls.push("stop");
            if self.fail_stop {
                return Err(SourceError::failed("stop"));
            }
            Ok(())
        }
        async fn map_read(&mut self, _: usize) -> SourceResult<&[u8]> {
            Ok(&[])
        }
        async fn unmap_read(&mut self, _: usize, _: usize) -> SourceResult<()> {
            Ok(())
        }
        async fn select_device(
            &mut self,
            kind: DeviceKind,
            pattern: &str,
        ) -> SourceResult<DeviceIdentifier> {
            if pattern == "missing" {
                return Err(SourceError::failed("select_device"));
            }
            Ok(DeviceIdentifier {
                kind,
                index: 0,
                name: pattern.to_string(),
            })
        }
        async fn shutdown(&mut self) -> SourceResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn prepare_fills_descriptors() {
        let mut source = Lifecycle::default();
        let mut session = AcquisitionSession::new(&mut source);
        let props = session
            .prepare(&DeviceSelection::default(), ImageGeometry::new(640, 480, 2), 1)
            .await;

        assert_eq!(session.state(), SessionState::Configuring);
        for (stream, v) in props.video.iter().enumerate() {
            assert_eq!(v.shape, (640, 480));
            assert_eq!(v.sample_type, SampleType::U16);
            assert_eq!(v.max_frame_count, 1);
            assert_eq!(v.binning, 1);
            assert_eq!(
                v.camera.as_ref().map(|c| c.name.as_str()),
                Some(DeviceSelection::default().cameras[stream].as_str())
            );
            assert_eq!(v.storage.as_ref().map(|s| s.name.as_str()), Some("Trash"));
        }
    }

    #[tokio::test]
    async fn selection_failure_is_tolerated() {
        let mut source = Lifecycle::default();
        let selection = DeviceSelection {
            cameras: ["missing".into(), "simulated.*sin.*".into()],
            storage: "Trash".into(),
        };
        let mut session = AcquisitionSession::new(&mut source);
        let props = session.prepare(&selection, ImageGeometry::new(4, 4, 1), 1).await;
        assert!(props.video[0].camera.is_none());
        assert!(props.video[1].camera.is_some());
    }

    #[tokio::test]
    async fn configure_failure_skips_start() {
        let mut source = Lifecycle {
            fail_configure: true,
            ..Default::default()
        };
        let mut session = AcquisitionSession::new(&mut source);
        let err = session.start(&SourceProperties::default()).await.unwrap_err();
        assert!(matches!(err, AcquireError::Configure(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.finish(Ok(())).await.is_ok());
        drop(session);
        assert_eq!(source.calls, vec!["configure"]);
    }

    #[tokio::test]
    async fn start_failure_is_an_error_without_stop() {
        let mut source = Lifecycle {
            fail_start: true,
            ..Default::default()
        };
        let mut session = AcquisitionSession::new(&mut source);
        let err = session.start(&SourceProperties::default()).await.unwrap_err();
        assert!(matches!(err, AcquireError::Start(_)));
        drop(session);
        assert_eq!(source.calls, vec!["configure", "start"]);
    }

    #[tokio::test]
    async fn stop_failure_surfaces_only_after_success() {
        let mut source = Lifecycle {
            fail_stop: true,
            ..Default::default()
        };
        let mut session = AcquisitionSession::new(&mut source);
        session.start(&SourceProperties::default()).await.unwrap();
        let err = session.finish(Ok(())).await.unwrap_err();
        assert!(matches!(err, AcquireError::Stop(_)));
        assert_eq!(session.state(), SessionState::Stopped);
        drop(session);

        let mut session = AcquisitionSession::new(&mut source);
        session.start(&SourceProperties::default()).await.unwrap();
        let err = session
            .finish::<()>(Err(AcquireError::Cancelled { stream: 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::Cancelled { stream: 1 }));
        drop(session);

        let stops = source.calls.iter().filter(|c| **c == "stop").count();
        assert_eq!(stops, 2);
    }
}
