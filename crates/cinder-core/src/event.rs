//! Application-originated events submitted to the driver.
//!
//! Transport data is not represented here: incoming bytes accumulate in the
//! driver's read buffer and `new_transport_data` is a pure signal. Only
//! application requests are queued as discrete events, in submission order.

use bytes::Bytes;

use crate::error::DriverError;

/// Completion callback attached to an application write.
///
/// The driver itself only ever invokes the error terminal, during a
/// terminal-state queue drain or a post-terminal rejection, always with
/// `bytes_written = 0`. Success is signaled by the endpoint layer once the
/// action produced by the write has been applied to the transport.
pub trait WriteCallback {
    /// The write was fully handed to the transport.
    fn write_success(&mut self);

    /// The write failed after `bytes_written` bytes reached the transport.
    fn write_err(&mut self, bytes_written: usize, error: &DriverError);
}

/// Application bytes to encrypt and emit.
pub struct AppWrite {
    /// Plaintext payload.
    pub data: Bytes,
    /// Optional completion callback.
    pub callback: Option<Box<dyn WriteCallback>>,
}

impl AppWrite {
    /// Write without a completion callback.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), callback: None }
    }

    /// Attach a completion callback.
    #[must_use]
    pub fn with_callback(mut self, callback: Box<dyn WriteCallback>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// 0-RTT payload, submitted before the handshake completes.
///
/// Whether early data is actually sent is the state machine's decision;
/// the driver queues and sequences this exactly like [`AppWrite`].
pub struct EarlyAppWrite {
    /// Plaintext payload.
    pub data: Bytes,
    /// Optional completion callback.
    pub callback: Option<Box<dyn WriteCallback>>,
}

impl EarlyAppWrite {
    /// Early write without a completion callback.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), callback: None }
    }

    /// Attach a completion callback.
    #[must_use]
    pub fn with_callback(mut self, callback: Box<dyn WriteCallback>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Server-side request to mint a resumption ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket {
    /// Opaque application token embedded in the ticket.
    pub app_token: Bytes,
}

impl NewSessionTicket {
    /// Ticket request carrying the given application token.
    pub fn new(app_token: impl Into<Bytes>) -> Self {
        Self { app_token: app_token.into() }
    }
}

/// A queued application event awaiting the pump.
pub(crate) enum PendingEvent {
    AppWrite(AppWrite),
    EarlyAppWrite(EarlyAppWrite),
    NewSessionTicket(NewSessionTicket),
    AppClose,
    AppCloseImmediate,
}

impl PendingEvent {
    /// Fail this event without processing it.
    ///
    /// Writes report `write_err(0, error)`; events without a completion
    /// callback are dropped silently.
    pub(crate) fn fail(self, error: &DriverError) {
        match self {
            PendingEvent::AppWrite(mut write) => {
                if let Some(callback) = write.callback.as_deref_mut() {
                    callback.write_err(0, error);
                }
            },
            PendingEvent::EarlyAppWrite(mut write) => {
                if let Some(callback) = write.callback.as_deref_mut() {
                    callback.write_err(0, error);
                }
            },
            PendingEvent::NewSessionTicket(_)
            | PendingEvent::AppClose
            | PendingEvent::AppCloseImmediate => {},
        }
    }
}
