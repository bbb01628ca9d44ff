//! Property tests for teardown ordering

mod common;

use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use vigil_runtime::{HarnessError, Outcome, Status};

fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::Passed),
        Just(Outcome::Failed(HarnessError::AssertionFailed("failed".into()))),
        Just(Outcome::Failed(HarnessError::TimedOut {
            what: "topic 'x'".into(),
            after: std::time::Duration::from_millis(1),
        })),
    ]
}

proptest! {
    #[test]
    fn cleanups_run_once_in_reverse_order(
        failing in prop::collection::vec(any::<bool>(), 0..24),
        outcome in outcome_strategy(),
        finishes in 1usize..4,
    ) {
        let (h, sink) = common::virtual_harness();
        let test = h.begin("prop").unwrap();
        let ran = Rc::new(RefCell::new(Vec::new()));

        for (index, fails) in failing.iter().copied().enumerate() {
            let ran = Rc::clone(&ran);
            h.register_cleanup(&test, move || {
                ran.borrow_mut().push(index);
                if fails { Err(format!("cleanup {} failed", index)) } else { Ok(()) }
            });
        }

        let expected_status = match &outcome {
            Outcome::Passed => Status::Passed,
            Outcome::Failed(err) if err.is_timeout() => Status::TimedOut,
            Outcome::Failed(_) => Status::Failed,
        };
        for _ in 0..finishes {
            h.finish(&test, outcome.clone());
        }

        let expected: Vec<usize> = (0..failing.len()).rev().collect();
        prop_assert_eq!(&*ran.borrow(), &expected);
        prop_assert_eq!(test.status(), expected_status);
        prop_assert_eq!(sink.len(), 1);

        let cleanup_warnings = test
            .warnings()
            .iter()
            .filter(|w| matches!(w, HarnessError::CleanupError { .. }))
            .count();
        prop_assert_eq!(cleanup_warnings, failing.iter().filter(|f| **f).count());
        let double_finishes = test
            .warnings()
            .iter()
            .filter(|w| matches!(w, HarnessError::AlreadyFinished { .. }))
            .count();
        prop_assert_eq!(double_finishes, finishes - 1);
    }
}
