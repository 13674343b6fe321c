//! Property-based tests for proxy futures and the retry policy.
//!
//! Uses proptest to verify:
//! 1. A proxy future keeps the first outcome it is given.
//! 2. `join_all` reports values in input order whatever the resolution order.
//! 3. `join_all` fails with the error of the first failing input by position.
//! 4. Retrying makes exactly as many attempts as the failures require.
//! 5. Backoff delays never shrink and never exceed the cap.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use pulplib::{ProxyFuture, PulpError, RetryPolicy, TransportError};

// --- Strategies ---

/// Outcomes to feed a single future: `Some(v)` succeeds, `None` fails.
fn arb_outcomes() -> impl Strategy<Value = Vec<Option<i32>>> {
    prop::collection::vec(prop::option::of(any::<i32>()), 1..6)
}

/// Per-input outcomes plus the order the inputs resolve in.
fn arb_join() -> impl Strategy<Value = (Vec<Result<u16, u16>>, Vec<usize>)> {
    prop::collection::vec(
        prop_oneof![
            4 => any::<u16>().prop_map(Ok),
            1 => any::<u16>().prop_map(Err),
        ],
        1..10,
    )
    .prop_flat_map(|outcomes| {
        let order: Vec<usize> = (0..outcomes.len()).collect();
        (Just(outcomes), Just(order).prop_shuffle())
    })
}

fn arb_policy() -> impl Strategy<Value = RetryPolicy> {
    (1_u64..2_000, 1.0_f64..4.0, 1_u64..60_000).prop_map(|(sleep, multiplier, max_sleep)| {
        RetryPolicy::new()
            .with_sleep(Duration::from_millis(sleep))
            .with_multiplier(multiplier)
            .with_max_sleep(Duration::from_millis(max_sleep))
            .with_jitter(0.0)
    })
}

fn outcome_of(raw: Option<i32>) -> Result<i32, PulpError> {
    raw.ok_or_else(|| PulpError::Invalid("boom".into()))
}

fn describe(outcome: &Result<i32, PulpError>) -> Result<i32, String> {
    outcome.as_ref().copied().map_err(ToString::to_string)
}

// --- Proxy futures ---

proptest! {
    #[test]
    fn first_outcome_wins(outcomes in arb_outcomes()) {
        let (future, resolver) = ProxyFuture::<i32>::pending();
        let observer = future.clone();
        for (index, raw) in outcomes.iter().enumerate() {
            prop_assert_eq!(resolver.resolve(outcome_of(*raw)), index == 0);
        }
        let expected = describe(&outcome_of(outcomes[0]));
        prop_assert_eq!(describe(&future.result()), expected.clone());
        prop_assert_eq!(describe(&observer.result()), expected);
    }

    #[test]
    fn map_composes(value in any::<i32>(), add in any::<i32>(), mul in any::<i32>()) {
        let chained = ProxyFuture::ready(value)
            .map(move |v| v.wrapping_add(add))
            .map(move |v| v.wrapping_mul(mul));
        prop_assert_eq!(chained.result().unwrap(), value.wrapping_add(add).wrapping_mul(mul));
    }

    #[test]
    fn join_all_keeps_input_order((outcomes, order) in arb_join()) {
        let (futures, resolvers): (Vec<_>, Vec<_>) =
            outcomes.iter().map(|_| ProxyFuture::<u16>::pending()).unzip();
        let joined = ProxyFuture::join_all(futures);

        for (step, &index) in order.iter().enumerate() {
            prop_assert!(!joined.is_done() || outcomes.iter().any(Result::is_err));
            let outcome = outcomes[index]
                .map_err(|code| PulpError::Invalid(format!("input {index} failed with {code}")));
            resolvers[index].resolve(outcome);
            if step + 1 < order.len() && outcomes.iter().all(Result::is_ok) {
                prop_assert!(!joined.is_done());
            }
        }

        match outcomes.iter().position(Result::is_err) {
            None => {
                let expected: Vec<u16> = outcomes.iter().map(|o| o.unwrap()).collect();
                prop_assert_eq!(joined.result().unwrap(), expected);
            }
            Some(first) => {
                let code = outcomes[first].unwrap_err();
                prop_assert_eq!(
                    joined.result().unwrap_err().to_string(),
                    format!("invalid request: input {first} failed with {code}")
                );
            }
        }
    }
}

// --- Retry policy ---

proptest! {
    #[test]
    fn attempts_match_failures(failures in 0_u32..8, max_attempts in 1_u32..6) {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&delays);
        let policy = RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_jitter(0.0)
            .with_sleeper(move |d| recorded.lock().push(d));

        let mut calls = 0_u32;
        let outcome = policy.call("flaky", || {
            calls += 1;
            if calls <= failures {
                Err(TransportError::Timeout.into())
            } else {
                Ok(calls)
            }
        });

        if failures < max_attempts {
            prop_assert_eq!(outcome.unwrap(), failures + 1);
            prop_assert_eq!(calls, failures + 1);
        } else {
            let err = outcome.unwrap_err();
            prop_assert!(
                matches!(err, PulpError::RetriesExhausted { attempts, .. } if attempts == max_attempts),
                "unexpected error: {:?}",
                err
            );
            prop_assert_eq!(calls, max_attempts);
        }

        let expected: Vec<Duration> = (1..calls).map(|retry| policy.delay_for(retry)).collect();
        prop_assert_eq!(delays.lock().clone(), expected);
    }

    #[test]
    fn final_errors_are_not_retried(max_attempts in 1_u32..6) {
        let policy = RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_sleeper(|_| {});
        let mut calls = 0_u32;
        let err = policy
            .call("lookup", || -> Result<(), PulpError> {
                calls += 1;
                Err(PulpError::Invalid("bad criteria".into()))
            })
            .unwrap_err();
        prop_assert!(matches!(err, PulpError::Invalid(_)));
        prop_assert_eq!(calls, 1);
    }

    #[test]
    fn delays_grow_up_to_the_cap(policy in arb_policy()) {
        let mut previous = Duration::ZERO;
        for retry in 1..=30 {
            let delay = policy.delay_for(retry);
            prop_assert!(delay >= previous, "retry {} shrank: {:?} < {:?}", retry, delay, previous);
            prop_assert!(delay <= policy.max_sleep);
            previous = delay;
        }
        let first = policy.delay_for(1);
        let expected = policy.sleep.min(policy.max_sleep);
        prop_assert!(first.abs_diff(expected) <= Duration::from_micros(1));
    }
}
