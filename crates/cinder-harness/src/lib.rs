//! Deterministic test harness for the cinder driver core.
//!
//! This crate provides a scripted state machine and a recording visitor,
//! enabling precise, reproducible testing of the pump's sequencing,
//! reentrancy, and lifetime guarantees without any real cryptography or
//! network I/O. The integration, property, and simulation suites live in
//! this crate's `tests/` directory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod recorder;
pub mod script;

pub use recorder::{FailureLog, FailureProbe, RecordingVisitor, TestDriver, VisitLog};
pub use script::{CallLog, Invocation, ScriptedMachine, Step, TestAction, TestState};

/// Let spawned driver continuations run to quiescence.
///
/// Deferred state-machine futures resume on the current `LocalSet`; a few
/// cooperative yields are enough for every chained continuation to run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
