//! End-to-end lifecycle scenarios for the async test harness
//!
//! Runs on simulated time so timing assertions are exact.

mod common;

use common::{assert_eq, journal, spawn_collect, virtual_harness};
use rstest::rstest;
use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use vigil_runtime::{
    Environment, Expectation, Harness, HarnessError, MemorySink, Outcome, Status, SystemClock,
};

// ============================================================================
// Named scenarios
// ============================================================================

#[test]
fn test_scenario_ready_payload_arrives() {
    let (h, sink) = virtual_harness();
    let test = h.begin("A").unwrap();
    let wait = h.await_topic(&test, "ready", Duration::from_millis(1000));
    h.publish_after(Duration::from_millis(10), "ready", json!(42));

    let result = spawn_collect(&h, wait);
    let probe = Rc::clone(&result);
    assert!(h.pump_until(move || probe.borrow().is_some(), Duration::from_secs(2)));

    assert_eq!(result.borrow_mut().take(), Some(Ok(json!(42))));
    assert!(h.now() <= Duration::from_millis(1000));
    assert_eq!(h.now(), Duration::from_millis(10));

    h.finish(&test, Outcome::Passed);
    assert_eq!(sink.reports_for("A")[0].status, Status::Passed);
}

#[test]
fn test_scenario_cleanups_reverse_on_failure() {
    let (h, _) = virtual_harness();
    let test = h.begin("B").unwrap();
    let order = journal();
    for label in ["c1", "c2", "c3"] {
        let order = Rc::clone(&order);
        h.register_cleanup(&test, move || {
            order.borrow_mut().push(label.to_string());
            Ok(())
        });
    }

    h.finish(
        &test,
        Outcome::Failed(HarnessError::AssertionFailed("boom".into())),
    );
    assert_eq!(*order.borrow(), vec!["c3", "c2", "c1"]);
    assert_eq!(test.status(), Status::Failed);
}

#[test]
fn test_scenario_never_times_out() {
    let (h, _) = virtual_harness();
    let test = h.begin("C").unwrap();
    let result = spawn_collect(&h, h.await_topic(&test, "never", Duration::from_millis(50)));
    let probe = Rc::clone(&result);
    assert!(h.pump_until(move || probe.borrow().is_some(), Duration::from_secs(2)));

    let err = result.borrow_mut().take().unwrap().unwrap_err();
    assert!(matches!(err, HarnessError::TimedOut { after, .. } if after == Duration::from_millis(50)));
    assert!(h.now() >= Duration::from_millis(50));
    // no later than one quantum past the budget
    assert_eq!(h.now(), Duration::from_millis(50));
}

#[test]
fn test_scenario_never_times_out_on_real_clock() {
    let env = Environment::new(Rc::new(SystemClock::new()));
    let h = Harness::with_options(&env, Rc::new(MemorySink::new()), Duration::from_secs(5));
    let started = std::time::Instant::now();

    let report = h
        .run("C (real time)", |h, test| async move {
            h.await_topic(&test, "never", Duration::from_millis(50)).await?;
            Ok(())
        })
        .unwrap();

    assert_eq!(report.status, Status::TimedOut);
    assert!(started.elapsed() >= Duration::from_millis(50));
}

// ============================================================================
// Ordering and teardown guarantees
// ============================================================================

#[test]
fn test_events_after_finish_are_not_delivered() {
    let (h, _) = virtual_harness();
    let test = h.begin("late delivery").unwrap();
    let result = spawn_collect(&h, h.await_topic(&test, "late", Duration::from_secs(1)));
    h.event_loop().run_until_idle();

    h.finish(&test, Outcome::Passed);
    assert_eq!(h.registry().subscriber_count("late"), 0);

    h.publish("late", json!("too late"));
    h.event_loop().run_until_idle();
    assert_eq!(result.borrow_mut().take(), Some(Err(HarnessError::Cancelled)));
    assert_eq!(test.pending_operations(), 0);
}

#[test]
fn test_two_tests_on_same_topic_resolve_in_subscription_order() {
    let (h, _) = virtual_harness();
    let first = h.begin("first").unwrap();
    let second = h.begin("second").unwrap();
    let order = journal();

    for test in [&first, &second] {
        let wait = h.await_topic(test, "shared", Duration::from_secs(1));
        let order = Rc::clone(&order);
        let name = test.name().to_string();
        h.event_loop().spawn_local(None, async move {
            if let Ok(payload) = wait.await {
                order.borrow_mut().push(format!("{}={}", name, payload));
            }
        });
    }

    h.publish_after(Duration::from_millis(5), "shared", json!(7));
    let probe = Rc::clone(&order);
    assert!(h.pump_until(move || probe.borrow().len() == 2, Duration::from_secs(1)));
    assert_eq!(*order.borrow(), vec!["first=7", "second=7"]);
}

#[test]
fn test_concurrent_waits_resolve_independently() {
    let (h, _) = virtual_harness();
    let report = h
        .run("fan-in", |h, test| async move {
            let alpha = h.await_topic(&test, "alpha", Duration::from_millis(100));
            let beta = h.await_topic(&test, "beta", Duration::from_millis(100));
            h.publish_after(Duration::from_millis(30), "beta", json!("b"));
            h.publish_after(Duration::from_millis(20), "alpha", json!("a"));
            h.publish_after(Duration::from_millis(40), "alpha", json!("duplicate"));

            vigil_runtime::check_eq!(alpha.await?, json!("a"));
            vigil_runtime::check_eq!(beta.await?, json!("b"));
            Ok(())
        })
        .unwrap();

    assert_eq!(report.status, Status::Passed);
    assert_eq!(report.duration, Duration::from_millis(30));
}

#[test]
fn test_double_finish_keeps_first_outcome() {
    let (h, sink) = virtual_harness();
    let test = h.begin("double").unwrap();
    let cleanups = Rc::new(Cell::new(0));
    let counter = Rc::clone(&cleanups);
    h.register_cleanup(&test, move || {
        counter.set(counter.get() + 1);
        Ok(())
    });

    h.finish(&test, Outcome::Failed(HarnessError::AssertionFailed("first".into())));
    h.finish(&test, Outcome::Passed);

    assert_eq!(test.status(), Status::Failed);
    assert_eq!(cleanups.get(), 1);
    assert_eq!(sink.reports_for("double").len(), 1);
    assert_eq!(
        test.warnings(),
        vec![HarnessError::AlreadyFinished {
            name: "double".to_string()
        }]
    );
}

#[test]
fn test_condition_expectation_in_run() {
    let (h, _) = virtual_harness();
    let counter = Rc::new(Cell::new(0));
    let report = h
        .run("condition", move |h, test| async move {
            for ms in [5, 10, 15] {
                let counter = Rc::clone(&counter);
                h.event_loop()
                    .set_timeout(Duration::from_millis(ms), move || counter.set(counter.get() + 1));
            }
            let watched = Rc::clone(&counter);
            let expectation = Expectation::condition("three ticks", move || {
                (watched.get() == 3).then(|| json!(watched.get()))
            });
            let value = h.await_operation(&test, expectation, Duration::from_millis(50)).await?;
            vigil_runtime::check_eq!(value, json!(3));
            Ok(())
        })
        .unwrap();
    assert_eq!(report.status, Status::Passed);
    assert_eq!(report.duration, Duration::from_millis(15));
}

#[test]
fn test_body_error_does_not_affect_other_tests() {
    let (h, sink) = virtual_harness();
    let failed = h
        .run("fails", |_, _| async move {
            vigil_runtime::assert::ensure(false, "host returned wrong engine")
        })
        .unwrap();
    let passed = h.run("passes", |_, _| async move { Ok(()) }).unwrap();

    assert_eq!(failed.status, Status::Failed);
    assert!(failed
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("host returned wrong engine"));
    assert_eq!(passed.status, Status::Passed);
    assert_eq!(sink.len(), 2);
}

#[test]
fn test_run_rejects_duplicate_name() {
    let (h, sink) = virtual_harness();
    h.run("same", |_, _| async move { Ok(()) }).unwrap();
    let err = h.run("same", |_, _| async move { Ok(()) }).unwrap_err();
    assert_eq!(
        err,
        HarnessError::DuplicateTest {
            name: "same".to_string()
        }
    );
    assert_eq!(sink.len(), 1);
}

// ============================================================================
// Cleanup runs exactly once for every terminal status
// ============================================================================

#[rstest]
#[case::passed(Outcome::Passed, Status::Passed)]
#[case::failed(Outcome::Failed(HarnessError::AssertionFailed("x".into())), Status::Failed)]
#[case::timed_out(
    Outcome::Failed(HarnessError::TimedOut { what: "topic 'x'".into(), after: Duration::from_millis(1) }),
    Status::TimedOut
)]
fn test_teardown_identical_for_every_status(#[case] outcome: Outcome, #[case] expected: Status) {
    let (h, sink) = virtual_harness();
    let test = h.begin("teardown").unwrap();
    let ran = Rc::new(Cell::new(0));
    for _ in 0..3 {
        let ran = Rc::clone(&ran);
        h.register_cleanup(&test, move || {
            ran.set(ran.get() + 1);
            Ok(())
        });
    }
    let id = h.subscribe(&test, "topic", |_, _| {}).unwrap();
    let _wait = h.await_topic(&test, "other", Duration::from_secs(1));

    h.finish(&test, outcome);
    assert_eq!(test.status(), expected);
    assert_eq!(ran.get(), 3);
    assert!(!h.registry().is_subscribed(id));
    assert_eq!(h.registry().subscriber_count("other"), 0);
    assert_eq!(h.event_loop().pending_timers(), 0);
    assert_eq!(sink.len(), 1);
}
