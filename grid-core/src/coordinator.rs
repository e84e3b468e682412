//! The grid coordinator — an in-memory, priority-weighted job queue.
//!
//! Ported in spirit from `MeadowGridCoordinatorHandler` in the original
//! Python coordinator: clients add jobs with `add_job`/`add_tasks_to_grid_job`
//! and read results with `get_simple_job_states`/`get_grid_task_states`,
//! while workers pull work with `get_next_job`/
//! `update_grid_task_state_and_get_next` and report simple-job results with
//! `update_job_states`.
//!
//! Every method here runs to completion without an internal suspension
//! point, so a single `std::sync::Mutex` is sufficient — there is
//! deliberately no `tokio::sync` lock in this module, since an async lock
//! would invite holding it across an `.await` by convention.

use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{GridError, Result};
use crate::job::{
    GridJobState, GridTask, Job, JobSpec, ProcessState, ProcessStateKind, SimpleJobState,
    TaskSubmission,
};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct Inner {
    grid_jobs: HashMap<String, GridJobState>,
    simple_jobs: HashMap<String, SimpleJobState>,
    rng: StdRng,
}

/// Outcome of `AddJob`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddJobOutcome {
    Added,
    IsDuplicate,
}

pub struct Coordinator {
    inner: Mutex<Inner>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Coordinator {
            inner: Mutex::new(Inner {
                grid_jobs: HashMap::new(),
                simple_jobs: HashMap::new(),
                rng: StdRng::from_entropy(),
            }),
        }
    }

    /// Constructs a coordinator with a fixed-seed RNG, for reproducible
    /// weighted-selection tests.
    pub fn with_seed(seed: u64) -> Self {
        Coordinator {
            inner: Mutex::new(Inner {
                grid_jobs: HashMap::new(),
                simple_jobs: HashMap::new(),
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    /// Adds a new job. Returns `IsDuplicate` rather than an error when
    /// `job_id` already exists.
    pub fn add_job(&self, job: Job) -> Result<AddJobOutcome> {
        job.validate()?;

        let mut inner = self.inner.lock().expect("coordinator mutex poisoned");

        if inner.grid_jobs.contains_key(&job.job_id) || inner.simple_jobs.contains_key(&job.job_id)
        {
            tracing::info!(job_id = %job.job_id, "add_job: ignoring duplicate job_id");
            return Ok(AddJobOutcome::IsDuplicate);
        }

        match &job.spec {
            JobSpec::PyCommand { .. } | JobSpec::PyFunction { .. } => {
                let state = ProcessState::run_requested(now_ms());
                inner
                    .simple_jobs
                    .insert(job.job_id.clone(), SimpleJobState { job, state });
            }
            JobSpec::PyGrid {
                tasks,
                all_tasks_added,
            } => {
                let tasks = tasks.clone();
                let all_tasks_added = *all_tasks_added;

                // Strip the tasks off the retained Job — workers fetch them
                // one by one via update_grid_task_state_and_get_next.
                let mut stripped = job;
                stripped.spec = JobSpec::PyGrid {
                    tasks: Vec::new(),
                    all_tasks_added,
                };

                let mut grid_job = GridJobState::new(stripped);
                // all_tasks_added must start false regardless of what the
                // caller asked for, so add_tasks validates correctly, then
                // gets sealed afterwards (mirrors coordinator.py add_job).
                add_tasks_to_grid_job_inner(&mut grid_job, &tasks)?;
                grid_job.all_tasks_added = all_tasks_added;

                inner
                    .grid_jobs
                    .insert(grid_job.job.job_id.clone(), grid_job);
            }
        }

        Ok(AddJobOutcome::Added)
    }

    /// Imports a batch of tasks into an existing grid job.
    pub fn add_tasks_to_grid_job(
        &self,
        job_id: &str,
        tasks: &[TaskSubmission],
        all_tasks_added: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("coordinator mutex poisoned");
        let grid_job = inner.grid_jobs.get_mut(job_id).ok_or_else(|| {
            GridError::validation(format!(
                "job_id {job_id} does not exist, so cannot add tasks to it"
            ))
        })?;

        add_tasks_to_grid_job_inner(grid_job, tasks)?;

        if all_tasks_added {
            grid_job.all_tasks_added = true;
        }

        Ok(())
    }

    /// Priority-weighted dispatcher: samples one candidate job (grid jobs
    /// with queued-but-unassigned tasks, or run-requested simple jobs) with
    /// probability proportional to its priority.
    pub fn get_next_job(&self) -> Job {
        let mut inner = self.inner.lock().expect("coordinator mutex poisoned");

        #[derive(Clone, Copy)]
        enum Candidate<'a> {
            Grid(&'a str),
            Simple(&'a str),
        }

        let grid_candidates: Vec<Candidate> = inner
            .grid_jobs
            .iter()
            .filter(|(_, g)| g.unassigned_queue.len() as u32 > g.num_current_workers)
            .map(|(id, _)| Candidate::Grid(id.as_str()))
            .collect();
        let simple_candidates: Vec<Candidate> = inner
            .simple_jobs
            .iter()
            .filter(|(_, s)| s.state.kind == ProcessStateKind::RunRequested)
            .map(|(id, _)| Candidate::Simple(id.as_str()))
            .collect();

        // Collect owned ids + priorities before mutating, since we can't
        // hold borrows into `inner` across the later get_mut calls.
        let mut ids: Vec<(bool, String)> = Vec::new();
        let mut weights: Vec<i64> = Vec::new();
        for c in grid_candidates.into_iter().chain(simple_candidates) {
            match c {
                Candidate::Grid(id) => {
                    let job = &inner.grid_jobs[id].job;
                    ids.push((true, id.to_string()));
                    weights.push(job.priority);
                }
                Candidate::Simple(id) => {
                    let job = &inner.simple_jobs[id].job;
                    ids.push((false, id.to_string()));
                    weights.push(job.priority);
                }
            }
        }

        if ids.is_empty() {
            return Job::empty();
        }

        let dist = match WeightedIndex::new(&weights) {
            Ok(d) => d,
            Err(_) => return Job::empty(),
        };
        let chosen = dist.sample(&mut inner.rng);
        let (is_grid, id) = ids[chosen].clone();

        if is_grid {
            let g = inner.grid_jobs.get_mut(&id).expect("candidate vanished");
            g.num_current_workers += 1;
            g.job.clone()
        } else {
            let s = inner.simple_jobs.get_mut(&id).expect("candidate vanished");
            s.state = ProcessState::assigned(now_ms());
            s.job.clone()
        }
    }

    /// Records a worker's report on the task it just ran (if any) and hands
    /// back the next unassigned task, or a `task_id=-1` stop signal if none
    /// is available.
    pub fn update_grid_task_state_and_get_next(
        &self,
        job_id: &str,
        task_id: i64,
        state: Option<ProcessState>,
    ) -> GridTask {
        let mut inner = self.inner.lock().expect("coordinator mutex poisoned");

        let Some(grid_job) = inner.grid_jobs.get_mut(job_id) else {
            tracing::warn!(job_id, task_id, "update_grid_task_state_and_get_next: unknown job_id");
            return no_task();
        };

        if task_id != -1 {
            if let Some(task) = grid_job.tasks_by_id.get_mut(&task_id) {
                if let Some(incoming) = state {
                    task.state.apply_update(incoming);
                }
            } else {
                tracing::warn!(
                    job_id,
                    task_id,
                    "update_grid_task_state_and_get_next: unknown task_id"
                );
                return no_task();
            }
        }

        if let Some(next_id) = grid_job.unassigned_queue.pop_front() {
            let task = &grid_job.tasks_by_id[&next_id];
            GridTask {
                task_id: task.task_id,
                pickled_args: task.pickled_args.clone(),
                state: task.state.clone(),
            }
        } else {
            grid_job.num_current_workers = grid_job.num_current_workers.saturating_sub(1);
            no_task()
        }
    }

    /// Applies a batch of simple-job state updates; unknown ids are logged
    /// and dropped, grid-job ids are logged and ignored (the per-task RPC
    /// is authoritative for those).
    pub fn update_job_states(&self, updates: Vec<(String, ProcessState)>) {
        let mut inner = self.inner.lock().expect("coordinator mutex poisoned");
        for (job_id, state) in updates {
            if let Some(simple) = inner.simple_jobs.get_mut(&job_id) {
                simple.state.apply_update(state);
            } else if inner.grid_jobs.contains_key(&job_id) {
                // Grid-job updates are ignored here; the per-task RPC
                // (update_grid_task_state_and_get_next) is authoritative.
                tracing::info!(job_id, "update_job_states: ignoring grid job update");
            } else {
                tracing::warn!(job_id, "update_job_states: unknown job_id, dropping update");
            }
        }
    }

    /// Returns each requested simple job's current state, in request order;
    /// unknown ids come back as `Unknown`.
    pub fn get_simple_job_states(&self, job_ids: &[String]) -> Vec<ProcessState> {
        let inner = self.inner.lock().expect("coordinator mutex poisoned");
        job_ids
            .iter()
            .map(|id| {
                inner
                    .simple_jobs
                    .get(id)
                    .map(|s| s.state.clone())
                    .unwrap_or_else(|| ProcessState::unknown(now_ms()))
            })
            .collect()
    }

    /// Returns the states of a grid job's tasks, excluding the ids in
    /// `ignore`.
    pub fn get_grid_task_states(
        &self,
        job_id: &str,
        ignore: &[i64],
    ) -> Result<Vec<(i64, ProcessState)>> {
        let inner = self.inner.lock().expect("coordinator mutex poisoned");
        let grid_job = inner
            .grid_jobs
            .get(job_id)
            .ok_or_else(|| GridError::not_found(format!("grid job_id {job_id} does not exist")))?;

        let ignore: std::collections::HashSet<i64> = ignore.iter().copied().collect();
        Ok(grid_job
            .tasks_by_id
            .values()
            .filter(|t| !ignore.contains(&t.task_id))
            .map(|t| (t.task_id, t.state.clone()))
            .collect())
    }
}

fn no_task() -> GridTask {
    GridTask {
        task_id: -1,
        pickled_args: Vec::new(),
        state: ProcessState::unknown(now_ms()),
    }
}

/// Shared helper behind `add_job`'s `py_grid` branch and
/// `add_tasks_to_grid_job`.
fn add_tasks_to_grid_job_inner(
    grid_job: &mut GridJobState,
    tasks: &[TaskSubmission],
) -> Result<()> {
    for t in tasks {
        if grid_job.tasks_by_id.contains_key(&t.task_id) {
            tracing::info!(
                job_id = %grid_job.job.job_id,
                task_id = t.task_id,
                "ignoring duplicate task"
            );
            continue;
        }

        if grid_job.all_tasks_added {
            return Err(GridError::validation(format!(
                "tried to add tasks to job {} after it had already been marked as all_tasks_added",
                grid_job.job.job_id
            )));
        }

        if t.task_id < 0 {
            return Err(GridError::validation("task_ids cannot be negative"));
        }

        let task = GridTask {
            task_id: t.task_id,
            pickled_args: t.pickled_function_arguments.clone(),
            state: ProcessState::run_requested(now_ms()),
        };
        grid_job.unassigned_queue.push_back(task.task_id);
        grid_job.tasks_by_id.insert(task.task_id, task);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;

    fn simple_job(job_id: &str, priority: i64) -> Job {
        Job {
            job_id: job_id.to_string(),
            job_friendly_name: job_id.to_string(),
            priority,
            spec: JobSpec::PyCommand {
                command_line: vec!["true".to_string()],
            },
        }
    }

    fn grid_job(job_id: &str, priority: i64, num_tasks: i64) -> Job {
        Job {
            job_id: job_id.to_string(),
            job_friendly_name: job_id.to_string(),
            priority,
            spec: JobSpec::PyGrid {
                tasks: (0..num_tasks)
                    .map(|task_id| TaskSubmission {
                        task_id,
                        pickled_function_arguments: Vec::new(),
                    })
                    .collect(),
                all_tasks_added: true,
            },
        }
    }

    #[test]
    fn rejects_priority_not_greater_than_zero() {
        let coordinator = Coordinator::with_seed(0);
        let err = coordinator.add_job(simple_job("j", 0)).unwrap_err();
        assert!(matches!(err, GridError::Validation(_)));
    }

    #[test]
    fn rejects_negative_task_ids() {
        let coordinator = Coordinator::with_seed(0);
        let job = Job {
            job_id: "j".into(),
            job_friendly_name: "j".into(),
            priority: 1,
            spec: JobSpec::PyGrid {
                tasks: vec![TaskSubmission {
                    task_id: -1,
                    pickled_function_arguments: Vec::new(),
                }],
                all_tasks_added: true,
            },
        };
        assert!(coordinator.add_job(job).is_err());
    }

    #[test]
    fn duplicate_job_id_is_reported_not_an_error() {
        let coordinator = Coordinator::with_seed(0);
        assert_eq!(
            coordinator.add_job(simple_job("dup", 1)).unwrap(),
            AddJobOutcome::Added
        );
        assert_eq!(
            coordinator.add_job(simple_job("dup", 1)).unwrap(),
            AddJobOutcome::IsDuplicate
        );
    }

    #[test]
    fn adding_tasks_after_all_tasks_added_is_rejected() {
        let coordinator = Coordinator::with_seed(0);
        coordinator.add_job(grid_job("g", 1, 1)).unwrap();
        let err = coordinator
            .add_tasks_to_grid_job(
                "g",
                &[TaskSubmission {
                    task_id: 99,
                    pickled_function_arguments: Vec::new(),
                }],
                false,
            )
            .unwrap_err();
        assert!(matches!(err, GridError::Validation(_)));
    }

    #[test]
    fn get_next_job_empty_when_nothing_queued() {
        let coordinator = Coordinator::with_seed(0);
        assert!(coordinator.get_next_job().is_empty());
    }

    /// `get_next_job` selects among candidates in proportion to priority,
    /// within a wide statistical tolerance, across a large number of draws
    /// with a fixed seed.
    #[test]
    fn get_next_job_is_priority_weighted_within_tolerance() {
        let coordinator = Coordinator::with_seed(7);
        // enough unassigned tasks that num_current_workers never catches up
        // to unassigned_queue.len() across all 10_000 draws below.
        coordinator.add_job(grid_job("heavy", 90, 20_000)).unwrap();
        coordinator.add_job(grid_job("light", 10, 20_000)).unwrap();

        const N: u32 = 10_000;
        let heavy_wins = (0..N)
            .filter(|_| coordinator.get_next_job().job_id == "heavy")
            .count() as f64;

        let observed_fraction = heavy_wins / N as f64;
        let expected_fraction = 0.9;
        assert!(
            (observed_fraction - expected_fraction).abs() < 0.05,
            "observed {observed_fraction}, expected ~{expected_fraction}"
        );
    }

    #[test]
    fn simple_job_state_regression_out_of_terminal_is_rejected() {
        let coordinator = Coordinator::with_seed(0);
        coordinator.add_job(simple_job("j", 1)).unwrap();
        coordinator.update_job_states(vec![(
            "j".to_string(),
            ProcessState::new(ProcessStateKind::Succeeded, 5),
        )]);
        // A stale RUN_REQUESTED arriving after SUCCEEDED must not regress it.
        coordinator.update_job_states(vec![(
            "j".to_string(),
            ProcessState::new(ProcessStateKind::Running, 1),
        )]);
        let states = coordinator.get_simple_job_states(&["j".to_string()]);
        assert_eq!(states[0].kind, ProcessStateKind::Succeeded);
    }

    #[test]
    fn get_grid_task_states_respects_ignore_list() {
        let coordinator = Coordinator::with_seed(0);
        coordinator.add_job(grid_job("g", 1, 3)).unwrap();
        let states = coordinator.get_grid_task_states("g", &[1]).unwrap();
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|(id, _)| *id != 1));
    }

    #[test]
    fn get_grid_task_states_unknown_job_is_not_found() {
        let coordinator = Coordinator::with_seed(0);
        let err = coordinator.get_grid_task_states("nope", &[]).unwrap_err();
        assert!(matches!(err, GridError::NotFound(_)));
    }
}
