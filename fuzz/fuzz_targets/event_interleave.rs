//! Fuzzes arbitrary interleavings of the driver's public operations.
//!
//! Each input byte selects one operation: transport signals, writes with
//! and without callbacks, closes, external errors. The machine responds
//! with a rotating action pattern so read loops always terminate, and the
//! visitor stands the read path down after every visit.
//!
//! Invariants checked on every schedule:
//! - the pump never panics and never leaves an action in flight
//! - no write callback fires more than once
//! - the success terminal never fires (FailureProbe panics on it)
//! - a terminal driver stays terminal

#![no_main]

use std::collections::HashSet;

use cinder_core::{
    driver::Driver,
    error::DriverError,
    event::{AppWrite, EarlyAppWrite, NewSessionTicket},
};
use cinder_harness::{FailureProbe, RecordingVisitor, ScriptedMachine, Step, TestAction, TestState};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let failures = FailureProbe::log();

    let (machine, _calls) = ScriptedMachine::new(Vec::new());
    let mut round = 0usize;
    let machine = machine.with_fallback(move |_call| {
        round += 1;
        // At most one consecutive empty response, so socket-data runs end
        // at the next visit's wait-for-data.
        match round % 3 {
            0 => Step::empty(),
            1 => Step::actions(vec![TestAction::Alpha]),
            _ => Step::actions(vec![TestAction::Alpha, TestAction::Beta]),
        }
    });
    let (visitor, _visits) = RecordingVisitor::new();
    let visitor = visitor.otherwise(|driver| driver.wait_for_data());
    let driver = Driver::new(machine, TestState::new(), visitor);

    let mut was_terminal = false;
    for (i, byte) in data.iter().enumerate() {
        match *byte % 9 {
            0 => driver.deliver(b"rec"),
            1 => driver.new_transport_data(),
            2 => driver.app_write(AppWrite::new(vec![*byte])),
            3 => driver.app_write(
                AppWrite::new(vec![*byte]).with_callback(FailureProbe::new(i, &failures)),
            ),
            4 => driver.early_app_write(
                EarlyAppWrite::new(vec![*byte]).with_callback(FailureProbe::new(i, &failures)),
            ),
            5 => driver.write_new_session_ticket(NewSessionTicket::new(vec![*byte])),
            6 => driver.app_close(),
            7 => driver.app_close_immediate(),
            _ => driver.move_to_error_state(DriverError::transport("fuzzed transport failure")),
        }

        assert!(!driver.action_processing());
        if was_terminal {
            assert!(driver.in_terminal_state());
        }
        was_terminal = driver.in_terminal_state();
    }

    // A callback id may appear at most once in the failure log.
    let mut seen = HashSet::new();
    for (id, bytes_written, _error) in failures.borrow().iter() {
        assert_eq!(*bytes_written, 0);
        assert!(seen.insert(*id), "callback {id} fired twice");
    }
});
