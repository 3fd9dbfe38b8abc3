//! Scripted state machine for driving the pump deterministically.
//!
//! A script is an ordered list of [`Step`]s, one consumed per `process_*`
//! invocation regardless of event kind. Each step may transition the state
//! tag before responding, and responds inline, with a failure, or by
//! suspending on a oneshot channel the test resolves later. Every
//! invocation is appended to a shared [`CallLog`] so tests can assert the
//! exact sequence the pump produced.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use bytes::BytesMut;
use cinder_core::{
    error::DriverError,
    event::{AppWrite, EarlyAppWrite, NewSessionTicket},
    machine::{Machine, MachineState, ProcessFuture, ProcessOutcome, StateTag},
};
use tokio::sync::oneshot;

/// Opaque actions dispatched by the scripted machine.
///
/// The pump never inspects these; two variants are enough to assert
/// ordering and batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestAction {
    /// First flavor of action.
    Alpha,
    /// Second flavor of action.
    Beta,
}

/// State value with a directly settable tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestState {
    /// Coarse machine state read by the pump.
    pub tag: StateTag,
}

impl TestState {
    /// Fresh state in the `Active` tag.
    pub fn new() -> Self {
        Self { tag: StateTag::Active }
    }
}

impl Default for TestState {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineState for TestState {
    fn tag(&self) -> StateTag {
        self.tag
    }
}

/// One observed `process_*` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// `process_socket_data`, with the read-buffer size at entry.
    SocketData {
        /// Bytes buffered when the machine was invoked.
        buffered: usize,
    },
    /// `process_app_write` with the write payload.
    AppWrite(Vec<u8>),
    /// `process_early_app_write` with the write payload.
    EarlyAppWrite(Vec<u8>),
    /// `process_new_session_ticket` with the application token.
    NewSessionTicket(Vec<u8>),
    /// `process_app_close`.
    AppClose,
    /// `process_app_close_immediate`.
    AppCloseImmediate,
}

/// Shared invocation log.
pub type CallLog = Rc<RefCell<Vec<Invocation>>>;

enum Respond {
    Actions(Vec<TestAction>),
    Fail(DriverError),
    Defer(oneshot::Receiver<ProcessOutcome<TestAction>>),
}

/// One step of a script: an optional state transition, then a response.
pub struct Step {
    set_tag: Option<StateTag>,
    respond: Respond,
}

impl Step {
    /// Resolve inline with these actions.
    pub fn actions(actions: Vec<TestAction>) -> Self {
        Self { set_tag: None, respond: Respond::Actions(actions) }
    }

    /// Resolve inline with no actions.
    pub fn empty() -> Self {
        Self::actions(Vec::new())
    }

    /// Resolve inline with a machine failure.
    pub fn fail(error: DriverError) -> Self {
        Self { set_tag: None, respond: Respond::Fail(error) }
    }

    /// Suspend until the paired sender resolves the invocation.
    pub fn defer(receiver: oneshot::Receiver<ProcessOutcome<TestAction>>) -> Self {
        Self { set_tag: None, respond: Respond::Defer(receiver) }
    }

    /// Transition the state tag before responding.
    #[must_use]
    pub fn with_tag(mut self, tag: StateTag) -> Self {
        self.set_tag = Some(tag);
        self
    }
}

/// State machine that replays one scripted [`Step`] per invocation.
///
/// An invocation past the end of the script panics, unless a fallback was
/// installed with [`ScriptedMachine::with_fallback`]. A strayed invocation
/// failing the test is the intended behavior.
pub struct ScriptedMachine {
    script: VecDeque<Step>,
    fallback: Option<Box<dyn FnMut(&Invocation) -> Step>>,
    calls: CallLog,
}

impl ScriptedMachine {
    /// Machine replaying `script`, plus the shared invocation log.
    pub fn new(script: Vec<Step>) -> (Self, CallLog) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let machine = Self { script: script.into(), fallback: None, calls: Rc::clone(&calls) };
        (machine, calls)
    }

    /// Produce steps on demand once the script is exhausted.
    ///
    /// Needed when the number of invocations is not known up front, e.g.
    /// when transport chunking decides how many reads occur.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl FnMut(&Invocation) -> Step + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    fn respond(&mut self, state: &mut TestState, call: Invocation) -> ProcessFuture<TestAction> {
        let step = match self.script.pop_front() {
            Some(step) => step,
            None => match self.fallback.as_mut() {
                Some(fallback) => fallback(&call),
                None => panic!("invocation past the end of the script: {call:?}"),
            },
        };
        self.calls.borrow_mut().push(call);
        if let Some(tag) = step.set_tag {
            state.tag = tag;
        }
        match step.respond {
            Respond::Actions(actions) => Box::pin(std::future::ready(Ok(actions))),
            Respond::Fail(error) => Box::pin(std::future::ready(Err(error))),
            Respond::Defer(receiver) => {
                Box::pin(async move { receiver.await.unwrap_or_else(|_| Ok(Vec::new())) })
            },
        }
    }
}

impl Machine for ScriptedMachine {
    type State = TestState;
    type Action = TestAction;
    type Future = ProcessFuture<TestAction>;

    fn process_socket_data(&mut self, state: &mut TestState, buf: &mut BytesMut) -> Self::Future {
        let buffered = buf.len();
        buf.clear();
        self.respond(state, Invocation::SocketData { buffered })
    }

    fn process_app_write(&mut self, state: &mut TestState, write: AppWrite) -> Self::Future {
        self.respond(state, Invocation::AppWrite(write.data.to_vec()))
    }

    fn process_early_app_write(
        &mut self,
        state: &mut TestState,
        write: EarlyAppWrite,
    ) -> Self::Future {
        self.respond(state, Invocation::EarlyAppWrite(write.data.to_vec()))
    }

    fn process_new_session_ticket(
        &mut self,
        state: &mut TestState,
        ticket: NewSessionTicket,
    ) -> Self::Future {
        self.respond(state, Invocation::NewSessionTicket(ticket.app_token.to_vec()))
    }

    fn process_app_close(&mut self, state: &mut TestState) -> Self::Future {
        self.respond(state, Invocation::AppClose)
    }

    fn process_app_close_immediate(&mut self, state: &mut TestState) -> Self::Future {
        self.respond(state, Invocation::AppCloseImmediate)
    }
}
