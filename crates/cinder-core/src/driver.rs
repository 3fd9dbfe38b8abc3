//! The action pump: event sequencing, dispatch, and lifetime management.
//!
//! This module implements the driver layer: the loop that turns transport
//! signals and application requests into state-machine invocations and
//! feeds the resulting actions through the effect visitor.
//!
//! # Architecture: Action-Based Pump
//!
//! The state machine never performs I/O. The pump:
//! - serializes all inputs into a single stream of `process_*` invocations,
//! - awaits each invocation's action list (inline or deferred),
//! - dispatches every action to the visitor, in order,
//! - repeats until nothing is runnable or the driver is terminal.
//!
//! # Pump State Machine
//!
//! ```text
//! ┌──────┐  event   ┌─────────────────┐  resolve  ┌──────────┐
//! │ Idle │─────────>│ AwaitingActions │──────────>│ Visiting │──┐
//! └──────┘          └─────────────────┘           └──────────┘  │ next
//!     ↑                      ↑                      │   ↑───────┘ action
//!     │    list exhausted,   │  list exhausted,     │
//!     │    queue empty       │  queue non-empty     │
//!     └──────────────────────┴──────────────────────┘
//!
//! any state ──move to error / tag becomes Closed or Error──> Terminal
//! ```
//!
//! `Terminal` is absorbing: the pending queue drains to write-error
//! callbacks and no further events enter the state machine. Actions already
//! produced are still dispatched.
//!
//! # Reentrancy
//!
//! Visitor calls receive `&mut DriverCore` and may enqueue further events,
//! signal wait-for-data, move the driver to the error state, mutate the
//! machine state, or drop the last external [`Driver`] handle. The pump is
//! an explicit loop guarded by flags, so arbitrarily long chains of
//! synchronously-completing events run at constant stack depth.
//!
//! # Lifetime
//!
//! The core lives behind an `Rc`. Every activation (a public operation or
//! a deferred-future continuation) holds a strong count for its duration,
//! so releasing all external handles mid-dispatch defers teardown until the
//! activation unwinds. Resources release exactly once, when the last count
//! drops.

use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll, Waker},
};

use bytes::BytesMut;

use crate::{
    error::DriverError,
    event::{AppWrite, EarlyAppWrite, NewSessionTicket, PendingEvent},
    machine::{Machine, MachineState, StateTag},
};

/// Effect handler applying one action to the endpoint surrounding the
/// driver: socket writes, user callbacks, state transitions.
///
/// Each call runs synchronously on the pump's thread, with the driver core
/// borrowed mutably for reentrant use. Within a callback, interact with the
/// driver only through the `driver` argument; calling into a cloned
/// [`Driver`] handle from visitor context is a contract violation and will
/// panic.
pub trait ActionVisitor<M: Machine>: Sized {
    /// Apply `action` to the endpoint.
    fn visit(&mut self, driver: &mut DriverCore<M, Self>, action: M::Action);
}

/// External handle to a driver.
///
/// Cheap to clone; all clones refer to the same core. Dropping the last
/// handle releases the driver, except while a deferred state-machine future
/// is outstanding or an activation is on the stack, in which case release happens
/// when that activation completes (see [`WeakDriver`] to observe it).
///
/// The driver is single-threaded. When the state machine completes
/// asynchronously, continuations are delivered via
/// `tokio::task::spawn_local`, so the handle must live on a
/// [`tokio::task::LocalSet`]. Machines that always complete inline need no
/// runtime at all.
pub struct Driver<M: Machine, V: ActionVisitor<M>> {
    core: Rc<RefCell<DriverCore<M, V>>>,
}

impl<M: Machine, V: ActionVisitor<M>> Clone for Driver<M, V> {
    fn clone(&self) -> Self {
        Self { core: Rc::clone(&self.core) }
    }
}

/// Non-owning handle to a driver.
///
/// For collaborators that must not extend the driver's lifetime, such as
/// the transport feed.
pub struct WeakDriver<M: Machine, V: ActionVisitor<M>> {
    core: Weak<RefCell<DriverCore<M, V>>>,
}

impl<M: Machine, V: ActionVisitor<M>> Clone for WeakDriver<M, V> {
    fn clone(&self) -> Self {
        Self { core: Weak::clone(&self.core) }
    }
}

impl<M: Machine, V: ActionVisitor<M>> WeakDriver<M, V> {
    /// Attempt to recover a strong handle.
    ///
    /// Returns `None` once the driver has been released.
    pub fn upgrade(&self) -> Option<Driver<M, V>> {
        self.core.upgrade().map(|core| Driver { core })
    }
}

impl<M: Machine + 'static, V: ActionVisitor<M> + 'static> Driver<M, V> {
    /// Create an idle driver owning `machine`, `state`, and `visitor`.
    pub fn new(machine: M, state: M::State, visitor: V) -> Self {
        let core = Rc::new_cyclic(|weak| {
            RefCell::new(DriverCore {
                machine,
                state,
                visitor: Some(visitor),
                read_buf: BytesMut::new(),
                pending: VecDeque::new(),
                waiting_for_data: true,
                action_processing: false,
                in_pump: false,
                external_error: None,
                self_ref: weak.clone(),
            })
        });
        Self { core }
    }

    /// Downgrade to a non-owning handle.
    pub fn downgrade(&self) -> WeakDriver<M, V> {
        WeakDriver { core: Rc::downgrade(&self.core) }
    }

    /// Append transport bytes to the read buffer and signal the pump.
    pub fn deliver(&self, data: &[u8]) {
        self.enter(|core| core.deliver(data));
    }

    /// Signal that the read buffer has new bytes.
    pub fn new_transport_data(&self) {
        self.enter(DriverCore::new_transport_data);
    }

    /// Submit application bytes to encrypt and emit.
    pub fn app_write(&self, write: AppWrite) {
        self.enter(|core| core.app_write(write));
    }

    /// Submit a 0-RTT write.
    pub fn early_app_write(&self, write: EarlyAppWrite) {
        self.enter(|core| core.early_app_write(write));
    }

    /// Request a resumption ticket.
    pub fn write_new_session_ticket(&self, ticket: NewSessionTicket) {
        self.enter(|core| core.write_new_session_ticket(ticket));
    }

    /// Request a graceful close.
    pub fn app_close(&self) {
        self.enter(DriverCore::app_close);
    }

    /// Request an abortive close.
    pub fn app_close_immediate(&self) {
        self.enter(DriverCore::app_close_immediate);
    }

    /// Move the driver to the error state (transport failures).
    pub fn move_to_error_state(&self, error: DriverError) {
        self.enter(|core| core.move_to_error_state(error));
    }

    /// True iff the machine state tag is `Error` and no action is
    /// currently being dispatched.
    pub fn in_error_state(&self) -> bool {
        self.core.borrow().in_error_state()
    }

    /// True iff no further events will enter the state machine.
    pub fn in_terminal_state(&self) -> bool {
        self.core.borrow().in_terminal_state()
    }

    /// True while a state-machine future is outstanding or an action is
    /// being visited.
    pub fn action_processing(&self) -> bool {
        self.core.borrow().action_processing()
    }

    /// Run `f` against the core while holding an activation guard.
    ///
    /// The extra strong count is what keeps the core alive if a visitor
    /// callback drops every external handle while this activation is still
    /// on the stack.
    fn enter<R>(&self, f: impl FnOnce(&mut DriverCore<M, V>) -> R) -> R {
        let core = Rc::clone(&self.core);
        let mut guard = core.borrow_mut();
        f(&mut *guard)
    }
}

/// The driver's internals: queue, flags, machine, state, and visitor.
///
/// Public methods on this type form the reentrant surface handed to
/// [`ActionVisitor::visit`]; external callers go through [`Driver`], which
/// forwards to the same methods under an activation guard.
pub struct DriverCore<M: Machine, V: ActionVisitor<M>> {
    machine: M,
    state: M::State,
    /// Taken while an action is being visited, so the visitor can receive
    /// `&mut DriverCore` without aliasing itself.
    visitor: Option<V>,
    read_buf: BytesMut,
    pending: VecDeque<PendingEvent>,
    waiting_for_data: bool,
    action_processing: bool,
    in_pump: bool,
    external_error: Option<DriverError>,
    self_ref: Weak<RefCell<Self>>,
}

impl<M: Machine + 'static, V: ActionVisitor<M> + 'static> DriverCore<M, V> {
    /// Append transport bytes to the read buffer and signal the pump.
    pub fn deliver(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
        self.new_transport_data();
    }

    /// Signal that the read buffer has new bytes.
    ///
    /// Clears wait-for-data and re-enters the pump. Transport data is
    /// buffer-driven: this carries no payload of its own and is never
    /// queued as a discrete event.
    pub fn new_transport_data(&mut self) {
        self.waiting_for_data = false;
        self.pump();
    }

    /// Submit application bytes to encrypt and emit.
    pub fn app_write(&mut self, write: AppWrite) {
        self.submit(PendingEvent::AppWrite(write));
    }

    /// Submit a 0-RTT write.
    pub fn early_app_write(&mut self, write: EarlyAppWrite) {
        self.submit(PendingEvent::EarlyAppWrite(write));
    }

    /// Request a resumption ticket.
    pub fn write_new_session_ticket(&mut self, ticket: NewSessionTicket) {
        self.submit(PendingEvent::NewSessionTicket(ticket));
    }

    /// Request a graceful close.
    pub fn app_close(&mut self) {
        self.submit(PendingEvent::AppClose);
    }

    /// Request an abortive close.
    pub fn app_close_immediate(&mut self) {
        self.submit(PendingEvent::AppCloseImmediate);
    }

    /// Stop invoking `process_socket_data` until the next transport signal.
    ///
    /// Valid from a visitor handling an action produced by transport data;
    /// the endpoint calls this when the machine has consumed everything it
    /// can from the read buffer.
    pub fn wait_for_data(&mut self) {
        self.waiting_for_data = true;
    }

    /// Move the driver to the error state.
    ///
    /// Stamps the driver as externally errored rather than touching the
    /// state tag: the batch that triggered this may still have actions in
    /// hand, and those are dispatched. Pending events drain to their
    /// failure callbacks immediately, in submission order, and no further
    /// events enter the state machine.
    pub fn move_to_error_state(&mut self, error: DriverError) {
        tracing::debug!(%error, "driver moved to error state");
        if self.external_error.is_none() {
            self.external_error = Some(error);
        }
        self.drain_pending();
    }

    /// True iff the machine state tag is `Error` and no action is
    /// currently being dispatched.
    ///
    /// A tag that flips to `Error` mid-batch is not reported here until
    /// the batch's last visitor call has returned; the remaining actions
    /// of that batch still dispatch.
    pub fn in_error_state(&self) -> bool {
        self.state.tag() == StateTag::Error && !self.action_processing
    }

    /// True iff no further events will enter the state machine.
    pub fn in_terminal_state(&self) -> bool {
        self.external_error.is_some()
            || matches!(self.state.tag(), StateTag::Error | StateTag::Closed)
    }

    /// True while a state-machine future is outstanding or an action is
    /// being visited.
    pub fn action_processing(&self) -> bool {
        self.action_processing
    }

    /// Read access to the machine state.
    pub fn state(&self) -> &M::State {
        &self.state
    }

    /// Mutable access to the machine state.
    ///
    /// This is the endpoint layer's transition channel: actions that change
    /// the connection state apply themselves here from visitor context.
    pub fn state_mut(&mut self) -> &mut M::State {
        &mut self.state
    }

    fn submit(&mut self, event: PendingEvent) {
        if self.in_terminal_state() {
            tracing::debug!("event rejected: driver is terminal");
            event.fail(&self.terminal_error());
            return;
        }
        self.pending.push_back(event);
        self.pump();
    }

    fn terminal_error(&self) -> DriverError {
        self.external_error.clone().unwrap_or(DriverError::Closed)
    }

    fn drain_pending(&mut self) {
        let error = self.terminal_error();
        while let Some(event) = self.pending.pop_front() {
            event.fail(&error);
        }
    }

    /// The pump loop.
    ///
    /// Runs while nothing is in flight and the driver is live: transport
    /// data first when unblocked, then the oldest queued event. Reentrant
    /// entries (from visitor callbacks or inline completions) return
    /// immediately; the outermost activation observes any state they
    /// changed on its next iteration, which keeps stack depth constant for
    /// unbounded synchronous chains.
    fn pump(&mut self) {
        if self.in_pump {
            return;
        }
        self.in_pump = true;
        while !self.action_processing && !self.in_terminal_state() {
            let future = if !self.waiting_for_data {
                tracing::trace!(buffered = self.read_buf.len(), "processing transport data");
                self.machine.process_socket_data(&mut self.state, &mut self.read_buf)
            } else if let Some(event) = self.pending.pop_front() {
                self.invoke(event)
            } else {
                break;
            };
            self.action_processing = true;
            self.start_actions(Box::pin(future));
        }
        if self.in_terminal_state() {
            self.drain_pending();
        }
        self.in_pump = false;
    }

    fn invoke(&mut self, event: PendingEvent) -> M::Future {
        match event {
            PendingEvent::AppWrite(write) => {
                tracing::trace!(len = write.data.len(), "processing app write");
                self.machine.process_app_write(&mut self.state, write)
            },
            PendingEvent::EarlyAppWrite(write) => {
                tracing::trace!(len = write.data.len(), "processing early app write");
                self.machine.process_early_app_write(&mut self.state, write)
            },
            PendingEvent::NewSessionTicket(ticket) => {
                self.machine.process_new_session_ticket(&mut self.state, ticket)
            },
            PendingEvent::AppClose => self.machine.process_app_close(&mut self.state),
            PendingEvent::AppCloseImmediate => {
                self.machine.process_app_close_immediate(&mut self.state)
            },
        }
    }

    /// Drive one state-machine future to its action dispatch.
    ///
    /// Polled inline first: most events complete synchronously and their
    /// actions must dispatch on this stack. A pending future is handed to a
    /// local task that holds a strong count on the core, the lifetime
    /// token that defers teardown until the continuation has run.
    fn start_actions(&mut self, mut future: Pin<Box<M::Future>>) {
        let mut cx = Context::from_waker(Waker::noop());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(outcome) => self.finish_actions(outcome),
            Poll::Pending => {
                let Some(core) = self.self_ref.upgrade() else {
                    return;
                };
                tokio::task::spawn_local(async move {
                    let outcome = future.await;
                    core.borrow_mut().finish_actions(outcome);
                });
            },
        }
    }

    fn finish_actions(&mut self, outcome: Result<Vec<M::Action>, DriverError>) {
        match outcome {
            Ok(actions) => {
                if let Some(mut visitor) = self.visitor.take() {
                    for action in actions {
                        visitor.visit(self, action);
                    }
                    self.visitor = Some(visitor);
                }
            },
            Err(error) => {
                tracing::error!(%error, "state machine failed");
                self.move_to_error_state(error);
            },
        }
        self.action_processing = false;
        self.pump();
    }
}
