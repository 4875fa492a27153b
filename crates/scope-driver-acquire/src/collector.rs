//! Dual-Stream Frame Collector
//!
//! Waits for each stream's mapped read range to become non-empty, copies the
//! record payload out and releases the whole range back to the engine.
//!
//! The wait polls `map_read` every `poll_interval`, is bounded by `timeout`
//! and can be cancelled through a [`CancelToken`]. A timeout or cancellation
//! never calls `unmap_read`, because nothing was mapped. Once a range was
//! mapped it is always released in full, including when the record turns out
//! malformed or the wrong size.
//!
//! Streams are collected one after the other: stream 0 completely, then
//! stream 1.

use crate::buffer::ImageBufferSet;
use crate::error::AcquireError;
use crate::frame_source::{FrameSource, STREAM_COUNT};
use crate::record::{FrameHeader, RecordError, Records};
use parking_lot::RwLock;
use scope_core::data::Frame;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::instrument;

/// Delay between empty polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Upper bound on waiting for one frame.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Cancellation
// =============================================================================

/// Receiving side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

/// Sending side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// New linked handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx: Some(rx) })
}

impl CancelHandle {
    /// Cancel every token of this pair.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Another token observing this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
        }
    }
}

impl CancelToken {
    /// Token that is never cancelled.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Whether the paired handle has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancelled. Pending forever if the handle is gone.
    pub async fn cancelled(&mut self) {
        match self.rx.as_mut() {
            Some(rx) => {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }
}

// =============================================================================
// Collector
// =============================================================================

/// Outcome of one successful collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectStats {
    /// `map_read` calls made, including the one that returned data.
    pub polls: u32,
    /// Bytes released through `unmap_read`.
    pub consumed: usize,
    /// Records in the range after the first, released without being copied.
    pub discarded: usize,
    /// Engine id of the copied frame.
    pub frame_id: u64,
}

/// Polls engine streams and copies frames out of mapped ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCollector {
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for FrameCollector {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT)
    }
}

impl FrameCollector {
    /// Collector polling every `poll_interval`, giving up after `timeout`.
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Delay between empty polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Upper bound on one wait.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Collect one frame from `stream` into `dest[offset..offset + expected_len]`.
    pub async fn collect_one(
        &self,
        source: &mut dyn FrameSource,
        stream: usize,
        dest: &mut [u8],
        offset: usize,
        expected_len: usize,
        cancel: &mut CancelToken,
    ) -> Result<CollectStats, AcquireError> {
        let available = dest.len().saturating_sub(offset);
        if available < expected_len {
            return Err(AcquireError::PayloadSizeMismatch {
                stream,
                expected: available,
                actual: expected_len,
            });
        }
        let region = &mut dest[offset..offset + expected_len];
        self.collect_with(source, stream, expected_len, cancel, |payload| {
            region.copy_from_slice(payload);
            Ok(())
        })
        .await
    }

    /// Collect one frame from each stream into the buffer set.
    ///
    /// Stream 0 goes to buffer 0. Stream 1 goes to buffer 1 in split mode or
    /// to the second half of buffer 0 in combined mode.
    #[instrument(skip_all, err)]
    pub async fn collect_pair(
        &self,
        source: &mut dyn FrameSource,
        buffers: &RwLock<ImageBufferSet>,
        cancel: &mut CancelToken,
    ) -> Result<[CollectStats; STREAM_COUNT], AcquireError> {
        let mut stats = [CollectStats {
            polls: 0,
            consumed: 0,
            discarded: 0,
            frame_id: 0,
        }; STREAM_COUNT];

        for (stream, slot) in stats.iter_mut().enumerate() {
            let dest = buffers
                .read()
                .destination(stream)
                .ok_or(AcquireError::NotInitialized)?;

            *slot = self
                .collect_with(source, stream, dest.len, cancel, |payload| {
                    let mut set = buffers.write();
                    let buffer = set
                        .buffer_mut(dest.buffer)
                        .ok_or(AcquireError::NotInitialized)?;
                    buffer.pixels_mut()[dest.offset..dest.offset + dest.len]
                        .copy_from_slice(payload);
                    Ok(())
                })
                .await?;
        }

        Ok(stats)
    }

    /// Wait for `stream`'s range and hand the first record's payload to `sink`.
    ///
    /// `sink` only runs when the payload is exactly `expected_len` bytes. An
    /// error from `sink` fails the collection after the range is released.
    pub async fn collect_with<F>(
        &self,
        source: &mut dyn FrameSource,
        stream: usize,
        expected_len: usize,
        cancel: &mut CancelToken,
        sink: F,
    ) -> Result<CollectStats, AcquireError>
    where
        F: FnOnce(&[u8]) -> Result<(), AcquireError> + Send,
    {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled { stream });
            }

            polls += 1;
            let range = source
                .map_read(stream)
                .await
                .map_err(|source| AcquireError::Read { stream, source })?;

            if !range.is_empty() {
                let consumed = range.len();
                let copied = copy_first(range, stream, expected_len, sink);
                release(source, stream, consumed).await?;

                let (header, discarded) = copied?;
                if discarded > 0 {
                    tracing::debug!(stream, discarded, "extra frame records released unread");
                }
                return Ok(CollectStats {
                    polls,
                    consumed,
                    discarded,
                    frame_id: header.frame_id,
                });
            }

            self.pause(stream, started, cancel).await?;
        }
    }

    /// Wait for `stream`'s range and copy out every record in it.
    pub async fn collect_all(
        &self,
        source: &mut dyn FrameSource,
        stream: usize,
        cancel: &mut CancelToken,
    ) -> Result<Vec<Frame>, AcquireError> {
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled { stream });
            }

            let range = source
                .map_read(stream)
                .await
                .map_err(|source| AcquireError::Read { stream, source })?;

            if !range.is_empty() {
                let consumed = range.len();
                let frames: Result<Vec<Frame>, RecordError> = Records::new(range)
                    .map(|record| record.map(|r| r.to_frame()))
                    .collect();
                release(source, stream, consumed).await?;

                return frames.map_err(|reason| AcquireError::MalformedRecord { stream, reason });
            }

            self.pause(stream, started, cancel).await?;
        }
    }

    /// Sleep one poll interval unless the deadline passed or the wait is cancelled.
    async fn pause(
        &self,
        stream: usize,
        started: Instant,
        cancel: &mut CancelToken,
    ) -> Result<(), AcquireError> {
        let waited = started.elapsed();
        if waited >= self.timeout {
            tracing::warn!(stream, ?waited, "no frame before timeout");
            return Err(AcquireError::Timeout { stream, waited });
        }

        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => Ok(()),
            _ = cancel.cancelled() => Err(AcquireError::Cancelled { stream }),
        }
    }
}

fn copy_first<F>(
    range: &[u8],
    stream: usize,
    expected_len: usize,
    sink: F,
) -> Result<(FrameHeader, usize), AcquireError>
where
    F: FnOnce(&[u8]) -> Result<(), AcquireError>,
{
    let mut records = Records::new(range);
    let first = match records.next() {
        Some(Ok(record)) => record,
        Some(Err(reason)) => return Err(AcquireError::MalformedRecord { stream, reason }),
        None => {
            return Err(AcquireError::MalformedRecord {
                stream,
                reason: RecordError::TruncatedHeader { available: 0 },
            })
        }
    };

    if first.payload.len() != expected_len {
        return Err(AcquireError::PayloadSizeMismatch {
            stream,
            expected: expected_len,
            actual: first.payload.len(),
        });
    }

    sink(first.payload)?;
    Ok((first.header, records.count()))
}

async fn release(
    source: &mut dyn FrameSource,
    stream: usize,
    consumed: usize,
) -> Result<(), AcquireError> {
    source
        .unmap_read(stream, consumed)
        .await
        .map_err(|source| AcquireError::Read { stream, source })
}
