//! Job model.
//!
//! Jobs come in two shapes: simple jobs (run once) and grid jobs (many
//! independently-scheduled tasks run by the same function). Both are keyed
//! by `job_id`, globally unique across the two sets.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::error::{GridError, Result};

/// Letters, digits, `.`, `-`, `_`. Enforced on job_id, friendly_name, and
/// worker-side request_id. An empty string is accepted here (it vacuously
/// matches the alphabet) — callers that must reject an empty identifier
/// (job_id) check that separately.
pub fn validate_identifier(s: &str) -> Result<()> {
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(GridError::validation(format!(
            "identifier {s:?} contains invalid characters; only letters, digits, '.', '-' and '_' are permitted"
        )));
    }
    Ok(())
}

/// The body of a job. `PyGrid` carries its initial task batch inline on
/// submission; the coordinator strips the tasks off after ingesting them
/// (see `Coordinator::add_job`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum JobSpec {
    PyCommand { command_line: Vec<String> },
    PyFunction {
        module_name: String,
        function_name: String,
        pickled_function_arguments: Vec<u8>,
    },
    PyGrid {
        tasks: Vec<TaskSubmission>,
        all_tasks_added: bool,
    },
}

/// A task as submitted by a client, before the coordinator assigns it a
/// `ProcessState`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub task_id: i64,
    pub pickled_function_arguments: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub job_friendly_name: String,
    pub priority: i64,
    pub spec: JobSpec,
}

impl Job {
    /// Validates job_id/friendly_name alphabet and priority. job_id must
    /// additionally be non-empty; an empty friendly_name is accepted, since
    /// the original coordinator only rejects an empty job_id. Does not check
    /// for duplicates — that is the coordinator's job since it requires the
    /// global job map.
    pub fn validate(&self) -> Result<()> {
        if self.job_id.is_empty() {
            return Err(GridError::validation("job_id must not be empty"));
        }
        validate_identifier(&self.job_id)?;
        validate_identifier(&self.job_friendly_name)?;
        if self.priority <= 0 {
            return Err(GridError::validation("priority must be greater than 0"));
        }
        Ok(())
    }

    /// The sentinel "no work" job returned by `GetNextJob` when nothing is
    /// available.
    pub fn empty() -> Self {
        Job {
            job_id: String::new(),
            job_friendly_name: String::new(),
            priority: 0,
            spec: JobSpec::PyCommand {
                command_line: Vec::new(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.job_id.is_empty()
    }
}

/// Tagged union over process lifecycle states. The side table (pid,
/// return_code, pickled_result, log_paths) is folded
/// directly into the variants that carry it, since Rust enums don't need a
/// separate side table to stay compact.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProcessStateKind {
    RunRequested,
    Assigned,
    Running,
    Succeeded,
    PythonException,
    NonZeroReturnCode,
    Cancelled,
    RunRequestFailed,
    Unknown,
    ErrorGettingState,
    RequestIsDuplicate,
}

impl ProcessStateKind {
    /// Terminal states cannot be overwritten by a later
    /// RUN_REQUESTED/ASSIGNED/RUNNING update.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStateKind::Succeeded
                | ProcessStateKind::PythonException
                | ProcessStateKind::NonZeroReturnCode
                | ProcessStateKind::Cancelled
                | ProcessStateKind::RunRequestFailed
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessState {
    pub kind: ProcessStateKind,
    pub pid: Option<i64>,
    pub return_code: Option<i32>,
    pub pickled_result: Vec<u8>,
    pub log_paths: Vec<String>,
    /// Epoch-ms of the last write to this state.
    pub last_updated_at: i64,
}

impl ProcessState {
    pub fn new(kind: ProcessStateKind, at: i64) -> Self {
        ProcessState {
            kind,
            pid: None,
            return_code: None,
            pickled_result: Vec::new(),
            log_paths: Vec::new(),
            last_updated_at: at,
        }
    }

    pub fn run_requested(at: i64) -> Self {
        Self::new(ProcessStateKind::RunRequested, at)
    }

    pub fn assigned(at: i64) -> Self {
        Self::new(ProcessStateKind::Assigned, at)
    }

    pub fn unknown(at: i64) -> Self {
        Self::new(ProcessStateKind::Unknown, at)
    }

    /// Applies an incoming state update in place, rejecting regressions out
    /// of a terminal state (a fast-completing job can otherwise have its
    /// SUCCEEDED overwritten by a stale RUNNING report that arrives after
    /// it). Returns whether the update was applied.
    pub fn apply_update(&mut self, incoming: ProcessState) -> bool {
        if self.kind.is_terminal() && !incoming.kind.is_terminal() {
            return false;
        }
        *self = incoming;
        true
    }
}

/// A task within a grid job. Not to be confused with the wire `GridTask`
/// message — this is the in-memory representation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridTask {
    pub task_id: i64,
    pub pickled_args: Vec<u8>,
    pub state: ProcessState,
}

#[derive(Debug)]
pub struct SimpleJobState {
    pub job: Job,
    pub state: ProcessState,
}

/// In-memory tracking of a grid job's tasks. `unassigned_queue` holds
/// `task_id`s (not full copies) so that an update through `tasks_by_id`
/// stays authoritative — the queue is a pure index.
#[derive(Debug)]
pub struct GridJobState {
    pub job: Job,
    pub tasks_by_id: HashMap<i64, GridTask>,
    pub unassigned_queue: VecDeque<i64>,
    pub all_tasks_added: bool,
    pub num_current_workers: u32,
}

impl GridJobState {
    pub fn new(job: Job) -> Self {
        GridJobState {
            job,
            tasks_by_id: HashMap::new(),
            unassigned_queue: VecDeque::new(),
            all_tasks_added: false,
            num_current_workers: 0,
        }
    }
}
