//! The bundled conformance suite
//!
//! Each case drives the harness the way a real asynchronous test would and
//! checks the lifecycle guarantees it relies on. Cases that need to observe a
//! failing or timed-out test run it on an inner harness with a memory sink,
//! then assert on the inner report from the outer test.

use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use vigil_runtime::assert::{ensure, ensure_contains, ensure_len};
use vigil_runtime::crash::deliver_from_thread;
use vigil_runtime::{
    await_crash, check, check_eq, next_tick, spin_until_complete, CrashArtifact, DualPathProbe,
    Expectation, Harness, HarnessError, HarnessResult, MemorySink, Outcome, Status,
    SubscriptionId, TestReport,
};

/// Entry point of one case: runs itself on the given harness under `name`
pub type CaseFn = fn(&Harness, &str) -> HarnessResult<TestReport>;

/// A named conformance case
#[derive(Debug, Clone, Copy)]
pub struct SuiteCase {
    pub name: &'static str,
    pub summary: &'static str,
    pub run: CaseFn,
}

/// An ordered set of cases
#[derive(Debug, Default, Clone)]
pub struct TestSuite {
    pub cases: Vec<SuiteCase>,
}

impl TestSuite {
    /// Every bundled case, in a stable order
    pub fn builtin() -> Self {
        Self {
            cases: vec![
                SuiteCase {
                    name: "observer/payload-before-timeout",
                    summary: "a notification published before the deadline resolves the wait",
                    run: payload_before_timeout,
                },
                SuiteCase {
                    name: "timeout/single-timed-out-report",
                    summary: "an event that never arrives yields exactly one timed-out report",
                    run: single_timed_out_report,
                },
                SuiteCase {
                    name: "teardown/cleanups-reverse-order",
                    summary: "cleanups run once, last registered first, and failures become warnings",
                    run: cleanups_reverse_order,
                },
                SuiteCase {
                    name: "teardown/no-delivery-after-finish",
                    summary: "subscriptions are released so later events reach nobody",
                    run: no_delivery_after_finish,
                },
                SuiteCase {
                    name: "observer/subscription-order",
                    summary: "observers of one event run in subscription order",
                    run: subscription_order,
                },
                SuiteCase {
                    name: "observer/deferred-unsubscribe",
                    summary: "an observer removed during dispatch is skipped for that event",
                    run: deferred_unsubscribe,
                },
                SuiteCase {
                    name: "harness/duplicate-name-rejected",
                    summary: "a test name can be registered only once",
                    run: duplicate_name_rejected,
                },
                SuiteCase {
                    name: "harness/double-finish-warns",
                    summary: "finishing twice keeps the first outcome and records a warning",
                    run: double_finish_warns,
                },
                SuiteCase {
                    name: "harness/hold-keeps-pending",
                    summary: "a returned body passes only after its holds are released",
                    run: hold_keeps_pending,
                },
                SuiteCase {
                    name: "harness/panic-isolated",
                    summary: "a panicking body fails its own test and nothing else",
                    run: panic_isolated,
                },
                SuiteCase {
                    name: "condition/poll-until-ready",
                    summary: "a condition wait resolves once its probe yields a value",
                    run: poll_until_ready,
                },
                SuiteCase {
                    name: "crash/memory-report-annotation",
                    summary: "a crash artifact delivered from another thread carries its annotations",
                    run: memory_report_annotation,
                },
                SuiteCase {
                    name: "spinning/query-callback",
                    summary: "spinning on a callback-style query returns its rows",
                    run: query_callback,
                },
                SuiteCase {
                    name: "dual-path/sync-fallback",
                    summary: "synchronous and callback results of an init call agree",
                    run: sync_fallback,
                },
            ],
        }
    }

    /// Keep only cases whose name contains `pattern`
    pub fn filter(&self, pattern: &str) -> Self {
        Self {
            cases: self
                .cases
                .iter()
                .filter(|case| case.name.contains(pattern))
                .copied()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }
}

const WAIT: Duration = Duration::from_secs(2);

/// A harness sharing `h`'s environment whose reports land in the returned sink
fn inner_harness(h: &Harness, timeout: Duration) -> (Harness, MemorySink) {
    let sink = MemorySink::new();
    let inner = Harness::with_options(h.environment(), Rc::new(sink.clone()), timeout);
    (inner, sink)
}

fn payload_before_timeout(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    h.run(name, |h, test| async move {
        let wait = h.await_topic(&test, "search-engines-initialized", Duration::from_secs(1));
        h.publish_after(
            Duration::from_millis(10),
            "search-engines-initialized",
            json!({ "engines": 3 }),
        );
        let payload = wait.await?;
        check_eq!(payload["engines"], json!(3));
        Ok(())
    })
}

fn single_timed_out_report(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    let (inner, sink) = inner_harness(h, Duration::from_secs(5));
    let cleanups = Rc::new(Cell::new(0usize));

    let counter = Rc::clone(&cleanups);
    inner.run("never-published", move |h, test| async move {
        h.register_cleanup(&test, move || {
            counter.set(counter.get() + 1);
            Ok(())
        });
        h.await_topic(&test, "never-published", Duration::from_millis(30))
            .await?;
        Ok(())
    })?;

    h.run(name, move |_, _| async move {
        let reports = sink.reports();
        ensure_len(&reports, 1)?;
        check_eq!(reports[0].status, Status::TimedOut);
        check!(
            reports[0]
                .message
                .as_deref()
                .is_some_and(|m| m.contains("never-published")),
            "timeout message should name the topic: {:?}",
            reports[0].message
        );
        check_eq!(cleanups.get(), 1);
        Ok(())
    })
}

fn cleanups_reverse_order(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    let (inner, sink) = inner_harness(h, WAIT);
    let order = Rc::new(RefCell::new(Vec::new()));

    let journal = Rc::clone(&order);
    inner.run("three-cleanups", move |h, test| async move {
        for step in 1..=3 {
            let journal = Rc::clone(&journal);
            h.register_cleanup(&test, move || {
                journal.borrow_mut().push(step);
                if step == 2 {
                    Err("database still open".to_string())
                } else {
                    Ok(())
                }
            });
        }
        Ok(())
    })?;

    h.run(name, move |_, _| async move {
        check_eq!(*order.borrow(), vec![3, 2, 1]);
        let report = sink
            .reports()
            .pop()
            .ok_or_else(|| HarnessError::AssertionFailed("no inner report".to_string()))?;
        check_eq!(report.status, Status::Passed);
        ensure_len(&report.warnings, 1)?;
        ensure(
            report.warnings[0].contains("Cleanup #1"),
            format!("unexpected warning {:?}", report.warnings[0]),
        )?;
        Ok(())
    })
}

fn no_delivery_after_finish(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    let (inner, _sink) = inner_harness(h, WAIT);
    let deliveries = Rc::new(Cell::new(0usize));

    let seen = Rc::clone(&deliveries);
    inner.run("short-lived-observer", move |h, test| async move {
        h.subscribe(&test, "idle-daily", move |_, _| seen.set(seen.get() + 1))?;
        Ok(())
    })?;

    h.publish("idle-daily", json!(null));
    h.event_loop().run_until_idle();

    h.run(name, move |h, _| async move {
        check_eq!(deliveries.get(), 0);
        check_eq!(h.registry().subscriber_count("idle-daily"), 0);
        Ok(())
    })
}

fn subscription_order(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    h.run(name, |h, test| async move {
        let order = Rc::new(RefCell::new(Vec::new()));
        for label in ["first", "second"] {
            let order = Rc::clone(&order);
            h.subscribe(&test, "engine-added", move |_, _| {
                order.borrow_mut().push(label)
            })?;
        }
        let wait = h.await_topic(&test, "engine-added", WAIT);
        h.publish("engine-added", json!("example-engine"));
        check_eq!(wait.await?, json!("example-engine"));
        check_eq!(*order.borrow(), vec!["first", "second"]);
        Ok(())
    })
}

fn deferred_unsubscribe(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    h.run(name, |h, _| async move {
        let registry = h.registry().clone();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let victim: Rc<Cell<Option<SubscriptionId>>> = Rc::new(Cell::new(None));

        let first = {
            let calls = Rc::clone(&calls);
            let victim = Rc::clone(&victim);
            let remover = registry.clone();
            registry.subscribe("engine-changed", move |_, _| {
                calls.borrow_mut().push("first");
                if let Some(id) = victim.take() {
                    let _ = remover.unsubscribe(id);
                }
            })
        };
        let second = {
            let calls = Rc::clone(&calls);
            registry.subscribe("engine-changed", move |_, _| calls.borrow_mut().push("second"))
        };
        victim.set(Some(second));

        let delivered = registry.notify("engine-changed", &json!(null));
        registry.unsubscribe(first)?;

        check_eq!(delivered, 1);
        check_eq!(*calls.borrow(), vec!["first"]);
        check!(!registry.is_subscribed(second));
        Ok(())
    })
}

fn duplicate_name_rejected(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    let (inner, sink) = inner_harness(h, WAIT);
    inner.run("only-once", |_, _| async { Ok(()) })?;
    let again = inner.run("only-once", |_, _| async { Ok(()) });

    h.run(name, move |_, _| async move {
        check_eq!(
            again,
            Err(HarnessError::DuplicateTest {
                name: "only-once".to_string()
            })
        );
        check_eq!(sink.len(), 1);
        Ok(())
    })
}

fn double_finish_warns(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    let (inner, sink) = inner_harness(h, WAIT);
    let test = inner.begin("finished-twice")?;
    inner.finish(&test, Outcome::Passed);
    inner.finish(
        &test,
        Outcome::Failed(HarnessError::AssertionFailed("late failure".to_string())),
    );

    h.run(name, move |_, _| async move {
        check_eq!(test.status(), Status::Passed);
        check_eq!(sink.len(), 1);
        ensure_contains(
            &test.warnings(),
            &HarnessError::AlreadyFinished {
                name: "finished-twice".to_string(),
            },
        )?;
        Ok(())
    })
}

fn hold_keeps_pending(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    let (inner, _sink) = inner_harness(h, WAIT);
    let held = inner.run("held-body", |h, test| async move {
        let guard = h.hold(&test);
        h.event_loop()
            .set_timeout(Duration::from_millis(20), move || guard.release());
        Ok(())
    })?;

    h.run(name, move |_, _| async move {
        check_eq!(held.status, Status::Passed);
        check!(
            held.duration >= Duration::from_millis(20),
            "test settled after {:?}, before its hold was released",
            held.duration
        );
        Ok(())
    })
}

fn explode() -> HarnessResult<()> {
    panic!("observer callback blew up")
}

fn panic_isolated(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    let (inner, _sink) = inner_harness(h, WAIT);
    let crashed = inner.run("panicking-body", |_, _| async { explode() })?;
    let neighbour = inner.run("neighbour", |_, _| async { Ok(()) })?;

    h.run(name, move |_, _| async move {
        check_eq!(crashed.status, Status::Failed);
        check!(
            crashed
                .message
                .as_deref()
                .is_some_and(|m| m.contains("observer callback blew up")),
            "panic message lost: {:?}",
            crashed.message
        );
        check_eq!(neighbour.status, Status::Passed);
        Ok(())
    })
}

fn poll_until_ready(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    h.run(name, |h, test| async move {
        let loaded = Rc::new(Cell::new(0u32));
        for delay in [5u64, 10, 15] {
            let loaded = Rc::clone(&loaded);
            h.event_loop()
                .set_timeout(Duration::from_millis(delay), move || {
                    loaded.set(loaded.get() + 1)
                });
        }
        let probe = Rc::clone(&loaded);
        let ready = Expectation::condition("all plugins loaded", move || {
            (probe.get() == 3).then(|| json!(probe.get()))
        });
        check_eq!(h.await_operation(&test, ready, WAIT).await?, json!(3));
        Ok(())
    })
}

fn memory_report_annotation(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    let remote = h.registry().remote();
    h.run(name, move |h, test| async move {
        let artifact = CrashArtifact::from_extra(
            "crash-0001",
            "ProductName=Vigil\nContainsMemoryReport=1\n",
        )?;
        let delivery = deliver_from_thread(&remote, artifact, Duration::from_millis(10));
        let arrived = await_crash(&h, &test, Duration::from_secs(5)).await?;
        check!(delivery.join().unwrap_or(false), "delivery thread failed");
        check_eq!(arrived.dump_id.as_str(), "crash-0001");
        arrived.expect_annotation("ContainsMemoryReport", "1")
    })
}

fn query_callback(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    h.run(name, |h, _| async move {
        let ev = h.event_loop().clone();
        let rows = spin_until_complete(h.event_loop(), WAIT, move |done| {
            next_tick(&ev, move || done.succeed(json!([{ "id": 1 }, { "id": 2 }])));
        })?;
        check_eq!(rows.as_array().map(Vec::len), Some(2));
        Ok(())
    })
}

fn sync_fallback(h: &Harness, name: &str) -> HarnessResult<TestReport> {
    h.run(name, |h, test| async move {
        let probe = DualPathProbe::new("search service init");
        let deliver = probe.callback();
        h.event_loop()
            .set_timeout(Duration::from_millis(10), move || deliver(json!("initialized")));
        probe.record_sync(json!("initialized"));

        let agreed = probe.await_agreement(&h, &test, WAIT).await?;
        check_eq!(agreed, json!("initialized"));
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_runtime::Environment;

    #[test]
    fn test_builtin_names_unique() {
        let suite = TestSuite::builtin();
        let mut names: Vec<_> = suite.cases.iter().map(|c| c.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), suite.len());
    }

    #[test]
    fn test_filter() {
        let suite = TestSuite::builtin().filter("teardown/");
        assert_eq!(suite.len(), 2);
        assert!(TestSuite::builtin().filter("no-such-case").is_empty());
    }

    #[test]
    fn test_every_case_passes_on_virtual_time() {
        for case in TestSuite::builtin().cases {
            let env = Environment::virtual_time();
            let harness = Harness::new(&env);
            let report = (case.run)(&harness, case.name).unwrap();
            assert_eq!(report.status, Status::Passed, "{}: {:?}", case.name, report.message);
            env.shutdown();
        }
    }
}
