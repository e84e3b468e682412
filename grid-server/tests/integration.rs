//! Integration tests: exercise the coordinator lifecycle the gRPC handlers
//! delegate to — AddJob -> GetNextJob -> UpdateJobStates /
//! UpdateGridTaskStateAndGetNext -> GetSimpleJobStates / GetGridTaskStates.
//!
//! The gRPC handlers in `grid_server::grpc` are thin proto<->core
//! conversions around `grid_core::coordinator::Coordinator`, so exercising
//! the coordinator directly validates the full stack the server exposes.

use grid_core::coordinator::{AddJobOutcome, Coordinator};
use grid_core::job::{Job, JobSpec, ProcessState, ProcessStateKind, TaskSubmission};

fn simple_job(job_id: &str, priority: i64) -> Job {
    Job {
        job_id: job_id.to_string(),
        job_friendly_name: format!("{job_id}-friendly"),
        priority,
        spec: JobSpec::PyCommand {
            command_line: vec!["echo".to_string(), "hi".to_string()],
        },
    }
}

fn grid_job(job_id: &str, priority: i64, task_ids: &[i64]) -> Job {
    Job {
        job_id: job_id.to_string(),
        job_friendly_name: format!("{job_id}-friendly"),
        priority,
        spec: JobSpec::PyGrid {
            tasks: task_ids
                .iter()
                .map(|&id| TaskSubmission {
                    task_id: id,
                    pickled_function_arguments: Vec::new(),
                })
                .collect(),
            all_tasks_added: true,
        },
    }
}

/// A simple job runs through RUN_REQUESTED -> picked up by GetNextJob ->
/// worker reports SUCCEEDED -> visible via GetSimpleJobStates.
#[test]
fn test_simple_job_lifecycle() {
    let coordinator = Coordinator::with_seed(1);

    let outcome = coordinator.add_job(simple_job("job-1", 10)).unwrap();
    assert_eq!(outcome, AddJobOutcome::Added);

    let picked = coordinator.get_next_job();
    assert_eq!(picked.job_id, "job-1");

    let states = coordinator.get_simple_job_states(&["job-1".to_string()]);
    assert_eq!(states[0].kind, ProcessStateKind::Assigned);

    coordinator.update_job_states(vec![(
        "job-1".to_string(),
        ProcessState {
            kind: ProcessStateKind::Succeeded,
            pid: Some(123),
            return_code: Some(0),
            pickled_result: vec![1, 2, 3],
            log_paths: vec!["stdout.log".to_string()],
            last_updated_at: 1,
        },
    )]);

    let states = coordinator.get_simple_job_states(&["job-1".to_string()]);
    assert_eq!(states[0].kind, ProcessStateKind::Succeeded);
    assert_eq!(states[0].pickled_result, vec![1, 2, 3]);

    // A job that has already completed should not be handed out again.
    let next = coordinator.get_next_job();
    assert!(next.is_empty());
}

/// Re-adding the same job_id is reported as a duplicate, not an error, and
/// does not disturb the existing job's state.
#[test]
fn test_duplicate_add_job_is_reported_not_rejected() {
    let coordinator = Coordinator::with_seed(2);

    assert_eq!(
        coordinator.add_job(simple_job("job-dup", 5)).unwrap(),
        AddJobOutcome::Added
    );
    assert_eq!(
        coordinator.add_job(simple_job("job-dup", 5)).unwrap(),
        AddJobOutcome::IsDuplicate
    );

    let states = coordinator.get_simple_job_states(&["job-dup".to_string()]);
    assert_eq!(states[0].kind, ProcessStateKind::RunRequested);
}

/// A grid job's tasks are handed out one at a time, in the order they were
/// submitted, across multiple "workers" polling
/// UpdateGridTaskStateAndGetNext with task_id = -1 (no prior task to report
/// on), and GetGridTaskStates reflects progress.
#[test]
fn test_grid_job_tasks_distributed_across_workers() {
    let coordinator = Coordinator::with_seed(3);

    coordinator
        .add_job(grid_job("grid-1", 1, &[0, 1, 2]))
        .unwrap();

    let picked = coordinator.get_next_job();
    assert_eq!(picked.job_id, "grid-1");

    let first_task = coordinator.update_grid_task_state_and_get_next("grid-1", -1, None);
    assert_eq!(first_task.task_id, 0);

    let second_task = coordinator.update_grid_task_state_and_get_next("grid-1", -1, None);
    assert_eq!(second_task.task_id, 1);

    let completed = ProcessState {
        kind: ProcessStateKind::Succeeded,
        pid: None,
        return_code: Some(0),
        pickled_result: Vec::new(),
        log_paths: Vec::new(),
        last_updated_at: 1,
    };
    let third_task = coordinator.update_grid_task_state_and_get_next(
        "grid-1",
        first_task.task_id,
        Some(completed),
    );
    assert_eq!(third_task.task_id, 2);

    let states = coordinator.get_grid_task_states("grid-1", &[]).unwrap();
    let first_state = states
        .iter()
        .find(|(id, _)| *id == first_task.task_id)
        .unwrap();
    assert_eq!(first_state.1.kind, ProcessStateKind::Succeeded);
}

/// `GetNextJob` is priority-weighted: with a fixed seed and a large
/// priority gap, the heavier job should be selected far more often than
/// the lighter one over many draws.
#[test]
fn test_get_next_job_is_priority_weighted() {
    let coordinator = Coordinator::with_seed(42);
    // Each job carries far more unassigned tasks than draws below, so every
    // GetNextJob call still sees both jobs as live candidates
    // (unassigned_queue.len() > num_current_workers throughout the loop).
    let many_tasks: Vec<i64> = (0..1000).collect();
    coordinator.add_job(grid_job("heavy", 90, &many_tasks)).unwrap();
    coordinator.add_job(grid_job("light", 10, &many_tasks)).unwrap();

    let heavy_wins = (0..200)
        .filter(|_| coordinator.get_next_job().job_id == "heavy")
        .count();

    // With a 90/10 priority split this should skew heavily towards "heavy";
    // allow a wide tolerance band since this is a single fixed-seed draw.
    assert!(
        heavy_wins > 120,
        "expected heavy job to dominate selection, got {heavy_wins}/200"
    );
}

/// A job's full lifecycle state round-trips through JSON intact — exercised
/// the way a client-side tool that persists job state as a fixture would.
#[test]
fn test_job_and_process_state_round_trip_through_json() {
    let job = grid_job("grid-json", 3, &[0, 1]);
    let json = serde_json::to_string(&job).expect("job must serialize to JSON");
    assert!(!json.is_empty());
    let restored: Job = serde_json::from_str(&json).expect("job must deserialize from JSON");
    assert_eq!(restored.job_id, job.job_id);

    let state = ProcessState {
        kind: ProcessStateKind::Succeeded,
        pid: Some(42),
        return_code: Some(0),
        pickled_result: vec![9, 9, 9],
        log_paths: vec!["run.log".to_string()],
        last_updated_at: 123,
    };
    let state_json = serde_json::to_string(&state).expect("process state must serialize to JSON");
    let restored_state: ProcessState =
        serde_json::from_str(&state_json).expect("process state must deserialize from JSON");
    assert_eq!(restored_state.kind, ProcessStateKind::Succeeded);
    assert_eq!(restored_state.pickled_result, vec![9, 9, 9]);
}

/// gRPC over-the-wire smoke test against a running server.
///
/// Set GRID_COORDINATOR_URL to run (e.g. `GRID_COORDINATOR_URL=http://127.0.0.1:50151`).
/// Skipped by default. Run with:
///   cargo test --test integration test_grpc_smoke -- --ignored
#[tokio::test]
#[ignore]
async fn test_grpc_smoke() {
    use grid_server::grpc::proto::coordinator_client::CoordinatorClient;
    use grid_server::grpc::proto::*;

    let url = std::env::var("GRID_COORDINATOR_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:50151".to_string());

    let mut client = CoordinatorClient::connect(url.clone())
        .await
        .unwrap_or_else(|e| panic!("Cannot connect to {url}: {e}"));

    let add_resp = client
        .add_job(Job {
            job_id: "smoke-job".to_string(),
            job_friendly_name: "smoke-job".to_string(),
            priority: 1,
            job_spec: Some(job::JobSpec::PyCommand(PyCommand {
                command_line: vec!["true".to_string()],
            })),
        })
        .await
        .expect("AddJob RPC failed")
        .into_inner();

    assert_eq!(add_resp.state, add_job_response::AddJobState::Added as i32);

    let next = client
        .get_next_job(NextJobRequest {})
        .await
        .expect("GetNextJob RPC failed")
        .into_inner();
    assert_eq!(next.job_id, "smoke-job");
}
