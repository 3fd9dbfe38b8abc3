//! Coupling between an async byte source and the driver.
//!
//! The driver never reads sockets itself: a transport appends bytes to the
//! driver's read buffer and signals the pump, and reports failures through
//! the error state. [`TransportFeed`] is that coupling for anything
//! implementing [`tokio::io::AsyncRead`]: a TCP stream, an in-memory pipe
//! in tests, or a simulated network.
//!
//! The feed holds only a [`WeakDriver`]: the transport must never extend
//! the driver's lifetime, so a released driver stops the feed on its next
//! read completion.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    driver::{ActionVisitor, WeakDriver},
    error::DriverError,
    machine::Machine,
};

/// Transport feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Bytes requested per read. One TLS record is the natural unit.
    pub read_chunk_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { read_chunk_size: 16 * 1024 }
    }
}

/// Pumps bytes from an `AsyncRead` into a driver until EOF, a read error,
/// driver release, or a terminal driver state.
///
/// EOF and read errors both become [`DriverError::Transport`]: at this
/// layer an end-of-stream without a close from the state machine is
/// truncation, and distinguishing the two is the machine's job once it has
/// seen (or not seen) the peer's closing records.
pub struct TransportFeed<R, M: Machine, V: ActionVisitor<M>> {
    driver: WeakDriver<M, V>,
    reader: R,
    config: FeedConfig,
}

impl<R, M, V> TransportFeed<R, M, V>
where
    R: AsyncRead + Unpin,
    M: Machine + 'static,
    V: ActionVisitor<M> + 'static,
{
    /// Feed `reader` into `driver` with the default configuration.
    pub fn new(driver: WeakDriver<M, V>, reader: R) -> Self {
        Self::with_config(driver, reader, FeedConfig::default())
    }

    /// Feed `reader` into `driver` with an explicit configuration.
    pub fn with_config(driver: WeakDriver<M, V>, reader: R, config: FeedConfig) -> Self {
        Self { driver, reader, config }
    }

    /// Run the feed to completion.
    pub async fn run(mut self) {
        let mut chunk = vec![0u8; self.config.read_chunk_size];
        loop {
            let read = self.reader.read(&mut chunk).await;
            let Some(driver) = self.driver.upgrade() else {
                tracing::debug!("transport feed stopping: driver released");
                return;
            };
            match read {
                Ok(0) => {
                    driver.move_to_error_state(DriverError::transport(
                        "connection closed by peer",
                    ));
                    return;
                },
                Ok(n) => driver.deliver(&chunk[..n]),
                Err(error) => {
                    driver.move_to_error_state(DriverError::transport(error.to_string()));
                    return;
                },
            }
            if driver.in_terminal_state() {
                tracing::debug!("transport feed stopping: driver is terminal");
                return;
            }
        }
    }
}
