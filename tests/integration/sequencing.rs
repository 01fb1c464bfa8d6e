//! Step ordering and failure propagation through sequences.

use std::sync::{Arc, Mutex};

use conduit::core::{FailurePolicy, Sequence, Task, TaskGraph, TaskStatus};
use conduit::orchestration::{Orchestrator, RunEvent};
use conduit::Error;

use crate::fixtures::{drain, orchestrator_with_events};

/// Tasks `names`, each appending its name to `log`; `failing` errors.
fn recording_graph(names: &[&str], failing: Option<&str>, log: &Arc<Mutex<Vec<String>>>) -> TaskGraph {
    let mut graph = TaskGraph::new();
    for name in names {
        let log = Arc::clone(log);
        let owned = name.to_string();
        let fails = failing == Some(*name);
        graph
            .register(Task::new(name).body(move || {
                let log = Arc::clone(&log);
                let name = owned.clone();
                async move {
                    log.lock().unwrap().push(name.clone());
                    if fails {
                        return Err(Error::Validation(format!("{} broke", name)));
                    }
                    Ok(())
                }
            }))
            .unwrap();
    }
    graph
}

/// Test: A failure at any position stops the sequence there
/// Given a five-step linear sequence
/// When step N fails
/// Then steps 1..=N ran, nothing after N ran, and N is reported
#[tokio::test]
async fn test_failure_at_each_position_stops_sequence() {
    let names = ["one", "two", "three", "four", "five"];
    for (position, failing) in names.iter().enumerate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = recording_graph(&names, Some(failing), &log);
        let (orchestrator, mut rx) = orchestrator_with_events(graph);

        let report = orchestrator.run_sequence(&Sequence::linear(names)).await;

        assert!(!report.success);
        assert_eq!(report.failed_task.as_deref(), Some(*failing));
        assert_eq!(*log.lock().unwrap(), names[..=position].to_vec());

        let aborted = drain(&mut rx).into_iter().find_map(|e| match e {
            RunEvent::SequenceAborted {
                failed_step,
                skipped,
            } => Some((failed_step, skipped)),
            _ => None,
        });
        let (failed_step, skipped) = aborted.expect("sequence should abort");
        assert_eq!(failed_step, position);
        assert_eq!(skipped, names[position + 1..].to_vec());
    }
}

/// Test: Group is a barrier and does not cancel siblings
/// Given `first -> [a, b, c] -> last` with `b` failing
/// When the sequence runs
/// Then a and c still run, last never runs
#[tokio::test]
async fn test_group_failure_blocks_next_step_only() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let graph = recording_graph(&["first", "a", "b", "c", "last"], Some("b"), &log);
    let orchestrator = Orchestrator::new(graph);

    let sequence = Sequence::new()
        .then("first")
        .then_group(["a", "b", "c"])
        .then("last");
    let report = orchestrator.run_sequence(&sequence).await;

    assert!(!report.success);
    let mut ran = log.lock().unwrap().clone();
    ran.sort();
    assert_eq!(ran, vec!["a", "b", "c", "first"]);
    assert_eq!(report.status_of("last"), None);
    assert!(matches!(report.status_of("b"), Some(TaskStatus::Failed { .. })));
}

/// Test: Tolerated failures do not stop the sequence
/// Given a sequence whose middle task fails under the continue policy
/// When the sequence runs
/// Then the next step still runs and the run succeeds
#[tokio::test]
async fn test_continue_policy_keeps_sequence_going() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut graph = TaskGraph::new();
    for (name, fails, policy) in [
        ("copy", false, FailurePolicy::Abort),
        ("styles", true, FailurePolicy::Continue),
        ("after", false, FailurePolicy::Abort),
    ] {
        let log = Arc::clone(&log);
        graph
            .register(Task::new(name).policy(policy).body(move || {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(name.to_string());
                    if fails {
                        return Err(Error::Validation("sass error".to_string()));
                    }
                    Ok(())
                }
            }))
            .unwrap();
    }

    let report = Orchestrator::new(graph)
        .run_sequence(&Sequence::linear(["copy", "styles", "after"]))
        .await;

    assert!(report.success);
    assert_eq!(*log.lock().unwrap(), vec!["copy", "styles", "after"]);
    assert!(matches!(
        report.status_of("styles"),
        Some(TaskStatus::Tolerated { .. })
    ));
}

/// Test: A cycle is rejected before anything runs
/// Given a -> b -> a through prerequisites
/// When a runs
/// Then the run fails with a cycle error and no body executes
#[tokio::test]
async fn test_cycle_rejected_before_running() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut graph = TaskGraph::new();
    for (name, dep) in [("a", "b"), ("b", "a")] {
        let log = Arc::clone(&log);
        graph
            .register(Task::new(name).depends_on([dep]).body(move || {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(name.to_string());
                    Ok(())
                }
            }))
            .unwrap();
    }

    let report = Orchestrator::new(graph).execute(&["a".to_string()]).await;
    assert!(!report.success);
    assert!(report.error.unwrap_or_default().contains("cycle"));
    assert!(log.lock().unwrap().is_empty());
}
