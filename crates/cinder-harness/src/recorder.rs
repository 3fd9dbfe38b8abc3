//! Recording visitor with programmable per-visit reactions.
//!
//! The visitor logs every dispatched action into a shared [`VisitLog`] and
//! optionally runs one queued reaction per visit, in visit order, the way
//! a real endpoint responds to specific actions. Reactions receive the
//! driver's reentrant
//! surface, so they can enqueue events, signal wait-for-data, flip the
//! state tag, or drop handles mid-dispatch.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use cinder_core::{
    driver::{ActionVisitor, DriverCore},
    error::DriverError,
    event::WriteCallback,
};

use crate::script::{ScriptedMachine, TestAction};

/// Reentrant driver surface a reaction operates on.
pub type TestDriver = DriverCore<ScriptedMachine, RecordingVisitor>;

/// Shared visit log.
pub type VisitLog = Rc<RefCell<Vec<TestAction>>>;

type Reaction = Box<dyn FnMut(&mut TestDriver)>;

/// Visitor that logs every action and optionally reacts to it.
pub struct RecordingVisitor {
    visits: VisitLog,
    reactions: VecDeque<Option<Reaction>>,
    fallback: Option<Reaction>,
}

impl RecordingVisitor {
    /// Log-only visitor, plus the shared visit log.
    pub fn new() -> (Self, VisitLog) {
        let visits = Rc::new(RefCell::new(Vec::new()));
        let visitor =
            Self { visits: Rc::clone(&visits), reactions: VecDeque::new(), fallback: None };
        (visitor, visits)
    }

    /// Queue a reaction for the next unclaimed visit.
    #[must_use]
    pub fn react(mut self, reaction: impl FnMut(&mut TestDriver) + 'static) -> Self {
        self.reactions.push_back(Some(Box::new(reaction)));
        self
    }

    /// Let the next visit pass without a reaction.
    #[must_use]
    pub fn skip(mut self) -> Self {
        self.reactions.push_back(None);
        self
    }

    /// Reaction applied to every visit not claimed by [`react`](Self::react).
    #[must_use]
    pub fn otherwise(mut self, reaction: impl FnMut(&mut TestDriver) + 'static) -> Self {
        self.fallback = Some(Box::new(reaction));
        self
    }
}

impl ActionVisitor<ScriptedMachine> for RecordingVisitor {
    fn visit(&mut self, driver: &mut TestDriver, action: TestAction) {
        self.visits.borrow_mut().push(action);
        match self.reactions.pop_front() {
            Some(Some(mut reaction)) => reaction(driver),
            Some(None) => {},
            None => {
                if let Some(fallback) = self.fallback.as_mut() {
                    fallback(driver);
                }
            },
        }
    }
}

/// Entries recorded by [`FailureProbe`]: probe id, `bytes_written`, reason.
pub type FailureLog = Rc<RefCell<Vec<(usize, usize, DriverError)>>>;

/// Write callback that records its error-terminal firings.
///
/// Shared between the test and the submitted write so the test can assert
/// order, count, and the exact failure reason.
pub struct FailureProbe {
    id: usize,
    log: FailureLog,
}

impl FailureProbe {
    /// A probe identified by `id` reporting into `log`.
    pub fn new(id: usize, log: &FailureLog) -> Box<Self> {
        Box::new(Self { id, log: Rc::clone(log) })
    }

    /// Fresh shared failure log.
    pub fn log() -> FailureLog {
        Rc::new(RefCell::new(Vec::new()))
    }
}

impl WriteCallback for FailureProbe {
    fn write_success(&mut self) {
        panic!("driver must never invoke the success terminal");
    }

    fn write_err(&mut self, bytes_written: usize, error: &DriverError) {
        self.log.borrow_mut().push((self.id, bytes_written, error.clone()));
    }
}
