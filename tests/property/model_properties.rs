//! Property-based tests for the data model.
//!
//! Uses proptest to verify:
//! 1. Any task survives export → load through Pulp's JSON layout.
//! 2. Arbitrary JSON never makes task loading panic.
//! 3. Task states only move forward and completion is stamped once.
//! 4. Repository memberships are always sorted and free of duplicates.
//! 5. Maintenance report edits keep one entry per repository.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use pulplib_proto::{Criteria, ErratumUnit, MaintenanceReport, Task, TaskId, TaskState, Unit};
use serde_json::{Value, json};

// --- Strategies ---

fn arb_state() -> impl Strategy<Value = TaskState> {
    prop_oneof![
        Just(TaskState::Accepted),
        Just(TaskState::Waiting),
        Just(TaskState::Running),
        Just(TaskState::Finished),
        Just(TaskState::Error),
        Just(TaskState::Canceled),
        Just(TaskState::Skipped),
    ]
}

/// Whole-second timestamps, the precision Pulp reports.
fn arb_time() -> impl Strategy<Value = DateTime<Utc>> {
    (0_i64..4_000_000_000).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    })
}

fn arb_result() -> impl Strategy<Value = Option<Value>> {
    prop::option::of(prop_oneof![
        any::<i64>().prop_map(|n| json!({"count": n})),
        "[a-z]{0,12}".prop_map(|s| json!({"message": s})),
    ])
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        "[a-f0-9-]{1,36}",
        arb_state(),
        prop::collection::vec("[a-z:._-]{1,24}", 0..5),
        "[ -~]{1,40}",
        prop::option::of("[ -~]{0,80}"),
        arb_result(),
        prop::option::of(arb_time()),
    )
        .prop_map(|(id, state, tags, summary, details, result, completed_at)| {
            let mut task = Task::new(TaskId::new(id), state).with_tags(tags);
            if state == TaskState::Error {
                task.error_summary = Some(summary);
                task.error_details = details;
            }
            task.result = result;
            task.completed_at = completed_at;
            task
        })
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z_]{0,10}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(
                prop_oneof![
                    Just("task_id".to_string()),
                    Just("state".to_string()),
                    Just("tags".to_string()),
                    Just("finish_time".to_string()),
                    "[a-z]{1,6}",
                ],
                inner,
                0..5
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn arb_repo_ids() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("repo-[a-d]{1,2}", 0..8)
}

// --- Tasks ---

proptest! {
    #[test]
    fn task_survives_pulp_layout(task in arb_task()) {
        let loaded = Task::from_data(&task.to_data()).expect("exported task loads");
        prop_assert_eq!(&loaded, &task);
        let strict = Task::from_data_strict(&task.to_data()).expect("error tasks carry a summary");
        prop_assert_eq!(strict, task);
    }

    #[test]
    fn arbitrary_json_never_panics(data in arb_json()) {
        let _ = Task::from_data(&data);
        let _ = Task::from_data_strict(&data);
        let _ = Unit::from_data(&data);
        let _ = MaintenanceReport::from_data(&data);
    }

    #[test]
    fn transitions_only_move_forward(
        steps in prop::collection::vec(arb_state(), 1..12),
        times in prop::collection::vec(arb_time(), 12),
    ) {
        let mut task = Task::new("t", TaskState::Accepted);
        let mut stamped: Option<DateTime<Utc>> = None;
        for (next, now) in steps.into_iter().zip(times) {
            let before = task.state;
            match task.transition(next, now) {
                Ok(()) => {
                    prop_assert!(before.can_transition_to(next));
                    prop_assert!(!before.is_terminal() || before == next);
                    if next.is_terminal() && stamped.is_none() {
                        stamped = Some(now);
                    }
                }
                Err(_) => {
                    prop_assert!(!before.can_transition_to(next));
                    prop_assert_eq!(task.state, before);
                }
            }
            prop_assert_eq!(task.completed_at, stamped);
            prop_assert_eq!(task.is_completed(), stamped.is_some());
        }
    }

    #[test]
    fn exactly_one_state_succeeds(state in arb_state()) {
        let task = Task::new("t", state);
        prop_assert_eq!(task.succeeded(), state == TaskState::Finished);
        prop_assert_eq!(task.failed(), state.is_terminal() && state != TaskState::Finished);
    }
}

// --- Units and criteria ---

proptest! {
    #[test]
    fn memberships_are_sorted_and_unique(first in arb_repo_ids(), second in arb_repo_ids()) {
        let mut unit: Unit = ErratumUnit::new("RHSA-1").into();
        unit.set_repository_memberships(first.clone());
        unit.add_memberships(second.clone());

        let mut expected: Vec<String> = first.into_iter().chain(second).collect();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(unit.repository_memberships(), expected.as_slice());

        let reloaded = Unit::from_data(&unit.to_data()).expect("exported unit loads");
        prop_assert_eq!(reloaded.repository_memberships(), expected.as_slice());
    }

    #[test]
    fn content_types_are_recovered_from_criteria(
        types in prop::collection::vec("[a-z_]{1,12}", 1..5),
        id in "[A-Z]{4}-[0-9]{1,4}",
    ) {
        let plain = Criteria::with_content_types(types.clone());
        prop_assert_eq!(plain.type_ids(), Some(types.clone()));
        let narrowed = Criteria::and([plain, Criteria::with_id(id)]);
        prop_assert_eq!(narrowed.type_ids(), Some(types));
    }
}

// --- Maintenance ---

proptest! {
    #[test]
    fn maintenance_edits_keep_one_entry_per_repo(
        added in arb_repo_ids(),
        again in arb_repo_ids(),
        removed in arb_repo_ids(),
    ) {
        let report = MaintenanceReport::default()
            .add(added.clone(), "alice", Some("first"))
            .add(again.clone(), "bob", None);
        let mut ids: Vec<&str> = report.repo_ids().collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), total);
        for id in added.iter().chain(&again) {
            prop_assert!(report.contains(id));
        }

        let trimmed = report.remove(removed.clone(), "carol");
        for id in &removed {
            prop_assert!(!trimmed.contains(id));
        }
        for id in added.iter().chain(&again).filter(|id| !removed.contains(id)) {
            prop_assert!(trimmed.contains(id));
        }

        let reloaded = MaintenanceReport::from_data(&trimmed.to_data()).expect("report loads");
        let mut expected: Vec<&str> = trimmed.repo_ids().collect();
        expected.sort_unstable();
        prop_assert_eq!(reloaded.repo_ids().collect::<Vec<_>>(), expected);
    }
}
