//! End-to-end scenarios for the driver pump.
//!
//! Each test scripts the state machine's responses, programs the visitor's
//! reactions, and asserts the exact invocation and visit sequences the
//! pump produced, including reentrant submissions, deferred completions,
//! mid-dispatch handle drops, and error transitions.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use cinder_core::{
    driver::Driver,
    error::DriverError,
    event::{AppWrite, EarlyAppWrite, NewSessionTicket},
    machine::StateTag,
};
use cinder_harness::{
    settle, FailureProbe, Invocation, RecordingVisitor, ScriptedMachine, Step,
    TestAction::{Alpha, Beta},
    TestState,
};

fn run_local<F: std::future::Future>(future: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
    tokio::task::LocalSet::new().block_on(&rt, future)
}

#[test]
fn read_single_batch() {
    let (machine, calls) = ScriptedMachine::new(vec![Step::actions(vec![Alpha])]);
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor.react(|driver| driver.wait_for_data());
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.deliver(b"hs");

    assert_eq!(calls.borrow().as_slice(), &[Invocation::SocketData { buffered: 2 }]);
    assert_eq!(visits.borrow().as_slice(), &[Alpha]);
    assert!(!driver.action_processing());
}

#[test]
fn read_multiple_batches() {
    let (machine, calls) = ScriptedMachine::new(vec![
        Step::actions(vec![Alpha, Beta, Alpha]),
        Step::actions(vec![Beta]),
        Step::actions(vec![Alpha]),
    ]);
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor.skip().skip().skip().skip().react(|driver| driver.wait_for_data());
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.deliver(b"x");

    assert_eq!(calls.borrow().len(), 3);
    assert_eq!(visits.borrow().as_slice(), &[Alpha, Beta, Alpha, Beta, Alpha]);
}

#[test]
fn read_resumes_after_empty_actions() {
    let (machine, calls) =
        ScriptedMachine::new(vec![Step::empty(), Step::actions(vec![Alpha])]);
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor.react(|driver| driver.wait_for_data());
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.deliver(b"x");

    assert_eq!(calls.borrow().len(), 2);
    assert_eq!(visits.borrow().as_slice(), &[Alpha]);
}

#[test]
fn session_ticket_write() {
    let (machine, calls) = ScriptedMachine::new(vec![Step::actions(vec![Alpha])]);
    let (visitor, visits) = RecordingVisitor::new();
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.write_new_session_ticket(NewSessionTicket::new(&b"appToken"[..]));

    assert_eq!(calls.borrow().as_slice(), &[Invocation::NewSessionTicket(b"appToken".to_vec())]);
    assert_eq!(visits.borrow().as_slice(), &[Alpha]);
}

#[test]
fn app_write_dispatches_actions() {
    let (machine, calls) = ScriptedMachine::new(vec![Step::actions(vec![Alpha])]);
    let (visitor, visits) = RecordingVisitor::new();
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.app_write(AppWrite::new(&b"write1"[..]));

    assert_eq!(calls.borrow().as_slice(), &[Invocation::AppWrite(b"write1".to_vec())]);
    assert_eq!(visits.borrow().as_slice(), &[Alpha]);
}

#[test]
fn early_app_write_dispatches_actions() {
    let (machine, calls) = ScriptedMachine::new(vec![Step::actions(vec![Beta])]);
    let (visitor, visits) = RecordingVisitor::new();
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.early_app_write(EarlyAppWrite::new(&b"zero-rtt"[..]));

    assert_eq!(calls.borrow().as_slice(), &[Invocation::EarlyAppWrite(b"zero-rtt".to_vec())]);
    assert_eq!(visits.borrow().as_slice(), &[Beta]);
}

#[test]
fn sequential_writes_process_in_order() {
    let (machine, calls) =
        ScriptedMachine::new(vec![Step::actions(vec![Alpha]), Step::actions(vec![Beta])]);
    let (visitor, visits) = RecordingVisitor::new();
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.app_write(AppWrite::new(&b"write1"[..]));
    driver.app_write(AppWrite::new(&b"write2"[..]));

    assert_eq!(
        calls.borrow().as_slice(),
        &[
            Invocation::AppWrite(b"write1".to_vec()),
            Invocation::AppWrite(b"write2".to_vec()),
        ]
    );
    assert_eq!(visits.borrow().as_slice(), &[Alpha, Beta]);
}

#[test]
fn app_close_reaches_machine() {
    let (machine, calls) = ScriptedMachine::new(vec![Step::actions(vec![Alpha])]);
    let (visitor, visits) = RecordingVisitor::new();
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.app_close();

    assert_eq!(calls.borrow().as_slice(), &[Invocation::AppClose]);
    assert_eq!(visits.borrow().as_slice(), &[Alpha]);
}

#[test]
fn app_close_immediate_reaches_machine() {
    let (machine, calls) = ScriptedMachine::new(vec![Step::actions(vec![Beta])]);
    let (visitor, _visits) = RecordingVisitor::new();
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.app_close_immediate();

    assert_eq!(calls.borrow().as_slice(), &[Invocation::AppCloseImmediate]);
}

#[test]
fn ticket_then_write_from_callbacks() {
    let (machine, calls) = ScriptedMachine::new(vec![
        Step::actions(vec![Alpha]),
        Step::actions(vec![Beta]),
        Step::empty(),
    ]);
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor
        .react(|driver| {
            driver.wait_for_data();
            driver.write_new_session_ticket(NewSessionTicket::new(&b"appToken"[..]));
        })
        .react(|driver| driver.app_write(AppWrite::new(&b"write"[..])));
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.deliver(b"x");

    assert_eq!(
        calls.borrow().as_slice(),
        &[
            Invocation::SocketData { buffered: 1 },
            Invocation::NewSessionTicket(b"appToken".to_vec()),
            Invocation::AppWrite(b"write".to_vec()),
        ]
    );
    assert_eq!(visits.borrow().as_slice(), &[Alpha, Beta]);
}

#[test]
fn writes_enqueued_from_visitors_run_in_program_order() {
    let (machine, calls) = ScriptedMachine::new(vec![
        Step::actions(vec![Alpha]),
        Step::actions(vec![Beta]),
        Step::empty(),
        Step::empty(),
    ]);
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor
        .react(|driver| {
            driver.app_write(AppWrite::new(&b"write2"[..]));
            driver.app_write(AppWrite::new(&b"write3"[..]));
        })
        .react(|driver| driver.app_write(AppWrite::new(&b"write4"[..])));
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.app_write(AppWrite::new(&b"write1"[..]));

    assert_eq!(
        calls.borrow().as_slice(),
        &[
            Invocation::AppWrite(b"write1".to_vec()),
            Invocation::AppWrite(b"write2".to_vec()),
            Invocation::AppWrite(b"write3".to_vec()),
            Invocation::AppWrite(b"write4".to_vec()),
        ]
    );
    assert_eq!(visits.borrow().as_slice(), &[Alpha, Beta]);
}

#[test]
fn close_from_callback_yields_to_available_transport_data() {
    let (machine, calls) = ScriptedMachine::new(vec![
        Step::actions(vec![Alpha]),
        Step::actions(vec![Beta]),
        Step::empty(),
    ]);
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor
        .react(|driver| driver.app_close())
        .react(|driver| driver.wait_for_data());
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.deliver(b"x");

    // Buffered transport data outranks the queued close; the close is
    // processed once the read path stands down.
    assert_eq!(
        calls.borrow().as_slice(),
        &[
            Invocation::SocketData { buffered: 1 },
            Invocation::SocketData { buffered: 0 },
            Invocation::AppClose,
        ]
    );
    assert_eq!(visits.borrow().as_slice(), &[Alpha, Beta]);
}

#[test]
fn write_then_close_from_one_callback() {
    let (machine, calls) = ScriptedMachine::new(vec![
        Step::actions(vec![Alpha]),
        Step::empty(),
        Step::empty(),
    ]);
    let (visitor, _visits) = RecordingVisitor::new();
    let visitor = visitor.react(|driver| {
        driver.app_write(AppWrite::new(&b"write2"[..]));
        driver.app_close();
    });
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.app_write(AppWrite::new(&b"write1"[..]));

    assert_eq!(
        calls.borrow().as_slice(),
        &[
            Invocation::AppWrite(b"write1".to_vec()),
            Invocation::AppWrite(b"write2".to_vec()),
            Invocation::AppClose,
        ]
    );
}

#[test]
fn handle_dropped_during_visit_finishes_the_batch() {
    let (machine, calls) =
        ScriptedMachine::new(vec![Step::actions(vec![Alpha, Beta])]);
    let slot: Rc<RefCell<Option<Driver<ScriptedMachine, RecordingVisitor>>>> =
        Rc::new(RefCell::new(None));
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor
        .react({
            let slot = Rc::clone(&slot);
            move |_driver| {
                slot.borrow_mut().take();
            }
        })
        .react(|driver| driver.wait_for_data());
    let driver = Driver::new(machine, TestState::new(), visitor);
    let weak = driver.downgrade();
    *slot.borrow_mut() = Some(driver);

    let entry = slot.borrow().clone().expect("driver installed");
    entry.deliver(b"x");

    // The batch ran to completion despite the handle drop mid-visit.
    assert_eq!(calls.borrow().len(), 1);
    assert_eq!(visits.borrow().as_slice(), &[Alpha, Beta]);
    assert!(weak.upgrade().is_some());

    drop(entry);
    assert!(weak.upgrade().is_none());
}

#[test]
fn error_tag_from_visitor_stops_the_pump() {
    let (machine, calls) = ScriptedMachine::new(vec![Step::actions(vec![Alpha])]);
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor.react(|driver| driver.state_mut().tag = StateTag::Error);
    let driver = Driver::new(machine, TestState::new(), visitor);

    assert!(!driver.in_error_state());
    driver.deliver(b"x");

    assert!(driver.in_error_state());
    assert!(driver.in_terminal_state());
    assert_eq!(calls.borrow().len(), 1);
    assert_eq!(visits.borrow().as_slice(), &[Alpha]);
}

#[test]
fn deferred_actions_resume_the_queue() {
    run_local(async {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let (machine, calls) = ScriptedMachine::new(vec![Step::defer(rx), Step::empty()]);
        let (visitor, _visits) = RecordingVisitor::new();
        let driver = Driver::new(machine, TestState::new(), visitor);

        driver.app_write(AppWrite::new(&b"write1"[..]));
        driver.app_write(AppWrite::new(&b"write2"[..]));

        // write1 is suspended; write2 waits behind it.
        assert!(driver.action_processing());
        assert_eq!(calls.borrow().len(), 1);

        tx.send(Ok(Vec::new())).expect("driver is listening");
        settle().await;

        assert_eq!(
            calls.borrow().as_slice(),
            &[
                Invocation::AppWrite(b"write1".to_vec()),
                Invocation::AppWrite(b"write2".to_vec()),
            ]
        );
        assert!(!driver.action_processing());
    });
}

#[test]
fn handle_dropped_while_deferred_releases_after_continuation() {
    run_local(async {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let (machine, calls) = ScriptedMachine::new(vec![Step::defer(rx), Step::empty()]);
        let (visitor, _visits) = RecordingVisitor::new();
        let driver = Driver::new(machine, TestState::new(), visitor);
        let weak = driver.downgrade();

        driver.app_write(AppWrite::new(&b"write1"[..]));
        driver.app_write(AppWrite::new(&b"write2"[..]));
        drop(driver);

        // The outstanding future keeps the core alive.
        assert!(weak.upgrade().is_some());

        tx.send(Ok(Vec::new())).expect("driver is listening");
        settle().await;

        // The continuation processed write2, then released the core.
        assert_eq!(calls.borrow().len(), 2);
        assert!(weak.upgrade().is_none());
    });
}

#[test]
fn action_processing_visible_during_visit() {
    let (machine, _calls) = ScriptedMachine::new(vec![Step::actions(vec![Alpha])]);
    let seen = Rc::new(Cell::new(false));
    let (visitor, _visits) = RecordingVisitor::new();
    let visitor = visitor.react({
        let seen = Rc::clone(&seen);
        move |driver| seen.set(driver.action_processing())
    });
    let driver = Driver::new(machine, TestState::new(), visitor);

    assert!(!driver.action_processing());
    driver.app_close();
    assert!(!driver.action_processing());
    assert!(seen.get());
}

#[test]
fn machine_failure_drains_pending_writes() {
    let failures = FailureProbe::log();
    let (machine, calls) = ScriptedMachine::new(vec![
        Step::actions(vec![Alpha]),
        Step::fail(DriverError::protocol("unit test")),
    ]);
    let (visitor, _visits) = RecordingVisitor::new();
    let visitor = visitor.react({
        let failures = failures.clone();
        move |driver| {
            driver.app_write(AppWrite::new(&b"write2"[..]));
            driver.early_app_write(
                EarlyAppWrite::new(&b"early"[..]).with_callback(FailureProbe::new(1, &failures)),
            );
            driver.app_write(
                AppWrite::new(&b"write3"[..]).with_callback(FailureProbe::new(2, &failures)),
            );
            driver.app_write(AppWrite::new(&b"write4"[..]));
            driver.app_close();
        }
    });
    let driver = Driver::new(machine, TestState::new(), visitor);

    assert!(!driver.in_error_state());
    assert!(!driver.in_terminal_state());
    driver.app_write(AppWrite::new(&b"write1"[..]));

    // write2's processing failed; everything still queued behind it fails
    // in submission order, and the machine is never invoked again.
    assert_eq!(
        calls.borrow().as_slice(),
        &[
            Invocation::AppWrite(b"write1".to_vec()),
            Invocation::AppWrite(b"write2".to_vec()),
        ]
    );
    assert_eq!(
        failures.borrow().as_slice(),
        &[
            (1, 0, DriverError::protocol("unit test")),
            (2, 0, DriverError::protocol("unit test")),
        ]
    );
    assert!(!driver.in_error_state());
    assert!(driver.in_terminal_state());
}

#[test]
fn machine_failure_is_terminal_not_error() {
    let failures = FailureProbe::log();
    let (machine, calls) =
        ScriptedMachine::new(vec![Step::fail(DriverError::transport("unit test"))]);
    let (visitor, _visits) = RecordingVisitor::new();
    let driver = Driver::new(machine, TestState::new(), visitor);

    assert!(!driver.in_terminal_state());
    driver.deliver(b"x");

    assert!(!driver.in_error_state());
    assert!(driver.in_terminal_state());
    assert_eq!(calls.borrow().len(), 1);

    // Later submissions are rejected with the stored reason.
    driver
        .app_write(AppWrite::new(&b"late"[..]).with_callback(FailureProbe::new(7, &failures)));
    assert_eq!(
        failures.borrow().as_slice(),
        &[(7, 0, DriverError::transport("unit test"))]
    );
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn many_empty_batches_run_at_constant_depth() {
    let mut script: Vec<Step> = (0..9_999).map(|_| Step::empty()).collect();
    script.push(Step::actions(vec![Alpha]));
    let (machine, calls) = ScriptedMachine::new(script);
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor.react(|driver| driver.wait_for_data());
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.deliver(b"x");

    assert_eq!(calls.borrow().len(), 10_000);
    assert_eq!(visits.borrow().as_slice(), &[Alpha]);
    assert!(!driver.action_processing());
}

#[test]
fn error_from_visitor_still_dispatches_rest_of_batch() {
    let (machine, calls) = ScriptedMachine::new(vec![Step::actions(vec![Alpha, Beta])]);
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor
        .react(|driver| {
            driver.move_to_error_state(DriverError::transport("transport is not good"));
        })
        .skip();
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.deliver(b"x");

    assert_eq!(visits.borrow().as_slice(), &[Alpha, Beta]);
    assert_eq!(calls.borrow().len(), 1);
    assert!(driver.in_terminal_state());
    assert!(!driver.in_error_state());
}

#[test]
fn actions_alongside_error_transition_still_dispatch() {
    let (machine, calls) =
        ScriptedMachine::new(vec![Step::actions(vec![Alpha, Beta]).with_tag(StateTag::Error)]);
    let (visitor, visits) = RecordingVisitor::new();
    let driver = Driver::new(machine, TestState::new(), visitor);

    assert!(!driver.in_error_state());
    driver.deliver(b"x");

    assert_eq!(visits.borrow().as_slice(), &[Alpha, Beta]);
    assert_eq!(calls.borrow().len(), 1);
    assert!(driver.in_error_state());
}

#[test]
fn error_state_hidden_while_batch_still_dispatching() {
    let (machine, _calls) =
        ScriptedMachine::new(vec![Step::actions(vec![Alpha, Beta]).with_tag(StateTag::Error)]);
    let samples = Rc::new(RefCell::new(Vec::new()));
    let (visitor, visits) = RecordingVisitor::new();
    let visitor = visitor
        .react({
            let samples = Rc::clone(&samples);
            move |driver| samples.borrow_mut().push(driver.in_error_state())
        })
        .react({
            let samples = Rc::clone(&samples);
            move |driver| samples.borrow_mut().push(driver.in_error_state())
        });
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.deliver(b"x");

    // The tag flipped before the batch dispatched, but the error state is
    // only reported once the last visit has returned.
    assert_eq!(samples.borrow().as_slice(), &[false, false]);
    assert_eq!(visits.borrow().as_slice(), &[Alpha, Beta]);
    assert!(driver.in_error_state());
}

#[test]
fn actions_alongside_closed_transition_still_dispatch() {
    let (machine, calls) =
        ScriptedMachine::new(vec![Step::actions(vec![Alpha, Beta]).with_tag(StateTag::Closed)]);
    let (visitor, visits) = RecordingVisitor::new();
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.deliver(b"x");

    assert_eq!(visits.borrow().as_slice(), &[Alpha, Beta]);
    assert_eq!(calls.borrow().len(), 1);
    assert!(driver.in_terminal_state());
    assert!(!driver.in_error_state());
}

#[test]
fn visitor_error_drains_reentrant_submissions_in_order() {
    let failures = FailureProbe::log();
    let (machine, calls) = ScriptedMachine::new(vec![Step::actions(vec![Alpha])]);
    let (visitor, _visits) = RecordingVisitor::new();
    let visitor = visitor.react({
        let failures = failures.clone();
        move |driver| {
            driver.app_write(
                AppWrite::new(&b"a"[..]).with_callback(FailureProbe::new(1, &failures)),
            );
            driver.app_write(
                AppWrite::new(&b"b"[..]).with_callback(FailureProbe::new(2, &failures)),
            );
            driver.app_write(
                AppWrite::new(&b"c"[..]).with_callback(FailureProbe::new(3, &failures)),
            );
            driver.move_to_error_state(DriverError::transport("boom"));
        }
    });
    let driver = Driver::new(machine, TestState::new(), visitor);

    driver.app_write(AppWrite::new(&b"seed"[..]));

    assert_eq!(calls.borrow().len(), 1);
    assert_eq!(
        failures.borrow().as_slice(),
        &[
            (1, 0, DriverError::transport("boom")),
            (2, 0, DriverError::transport("boom")),
            (3, 0, DriverError::transport("boom")),
        ]
    );
}
