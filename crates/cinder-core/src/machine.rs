//! Contract between the driver and the TLS 1.3 state machine it drives.
//!
//! The machine is pure with respect to I/O: each `process_*` method maps
//! (state, event) to a future list of actions, and the driver's visitor
//! executes those actions against the real world. This keeps the machine
//! deterministic and testable while the driver owns sequencing, reentrancy,
//! and lifetime concerns.

use std::{future::Future, pin::Pin};

use bytes::BytesMut;

use crate::{
    error::DriverError,
    event::{AppWrite, EarlyAppWrite, NewSessionTicket},
};

/// Coarse classification of the machine state, read by the pump.
///
/// The substantive TLS state (handshake phase, key schedule, negotiated
/// parameters) is opaque to the driver; this tag is the only part the pump
/// inspects, to decide whether events may still enter the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTag {
    /// Handshaking or established; events are accepted.
    Active,
    /// The connection closed cleanly.
    Closed,
    /// The machine hit a fatal protocol condition.
    Error,
}

/// Read surface the pump needs from the machine's state value.
pub trait MachineState {
    /// Current coarse state.
    fn tag(&self) -> StateTag;
}

/// Outcome of one state-machine invocation.
///
/// `Ok` carries the finite, ordered action list for the event; empty is
/// legal and means "nothing to do; invoke me again when warranted". `Err`
/// is the machine's fatal channel (internal logic error, unimplemented
/// capability); the driver reifies it into the terminal state without
/// touching the state tag.
pub type ProcessOutcome<A> = Result<Vec<A>, DriverError>;

/// Boxed process future, for machines that mix inline and deferred
/// completions behind a single associated type.
pub type ProcessFuture<A> = Pin<Box<dyn Future<Output = ProcessOutcome<A>>>>;

/// Pure TLS 1.3 state machine consumed by the driver.
///
/// Each method receives the driver-owned state value and the event, and
/// returns an owned future of the resulting action list. The future may
/// resolve inline (the common case) or later; the driver treats both
/// uniformly and guarantees at most one invocation is in flight.
///
/// Implementations transition `state` directly during processing; the
/// endpoint layer may additionally transition it from visitor context.
pub trait Machine: Sized {
    /// State value owned by the driver, updated by `process_*` calls.
    type State: MachineState;

    /// Opaque effect descriptor dispatched to the visitor.
    type Action;

    /// Future returned by every `process_*` method.
    type Future: Future<Output = ProcessOutcome<Self::Action>> + 'static;

    /// Ciphertext or handshake bytes are available in `buf`.
    ///
    /// The machine may consume some, all, or none of the buffer. Returning
    /// an empty action list means "I consumed what I could"; the driver
    /// will invoke this again until an action's visitor signals
    /// wait-for-data or the queue takes over.
    fn process_socket_data(&mut self, state: &mut Self::State, buf: &mut BytesMut) -> Self::Future;

    /// Application bytes to encrypt and emit.
    fn process_app_write(&mut self, state: &mut Self::State, write: AppWrite) -> Self::Future;

    /// 0-RTT application bytes.
    fn process_early_app_write(
        &mut self,
        state: &mut Self::State,
        write: EarlyAppWrite,
    ) -> Self::Future;

    /// Server-side resumption ticket request.
    fn process_new_session_ticket(
        &mut self,
        state: &mut Self::State,
        ticket: NewSessionTicket,
    ) -> Self::Future;

    /// Graceful close request.
    fn process_app_close(&mut self, state: &mut Self::State) -> Self::Future;

    /// Abortive close request.
    fn process_app_close_immediate(&mut self, state: &mut Self::State) -> Self::Future;
}
