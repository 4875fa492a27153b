//! Serial transport shared by controller drivers
//!
//! Requires the `serial` feature:
//!
//! ```toml
//! [dependencies]
//! scope-core = { path = "../scope-core", features = ["serial"] }
//! ```
//!
//! Drivers talk to a [`SharedPort`]: a buffered, mutex-guarded byte stream.
//! Real hardware comes from [`open_shared`]; tests wrap one half of a
//! `tokio::io::duplex` pair with [`wrap_shared`].

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Byte stream a driver can use as its serial link.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Boxed serial stream.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Port shared by every device on one controller.
///
/// Hold the lock for a whole command/reply exchange so replies cannot be
/// read by another device.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Wrap an opened stream for sharing between devices.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open `port_path` at `baud_rate`, 8N1 without flow control.
///
/// Opening blocks, so it runs on the blocking pool.
pub async fn open_shared(port_path: &str, baud_rate: u32) -> anyhow::Result<SharedPort> {
    use tokio_serial::SerialPortBuilderExt;

    let path = port_path.to_string();
    let stream = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("cannot open serial port {}", path))
    })
    .await
    .context("serial open task failed")??;

    tracing::debug!(port = port_path, baud_rate, "serial port opened");
    Ok(wrap_shared(Box::new(stream)))
}

/// Read and discard input until the line stays quiet for `quiet`.
///
/// Returns the number of bytes discarded.
pub async fn discard_pending<R: AsyncRead + Unpin>(port: &mut R, quiet: Duration) -> usize {
    let mut scratch = [0u8; 256];
    let mut discarded = 0;
    while let Ok(Ok(n)) = tokio::time::timeout(quiet, port.read(&mut scratch)).await {
        if n == 0 {
            break;
        }
        discarded += n;
    }
    discarded
}
