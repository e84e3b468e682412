//! Worker-facing job-runner contract.
//!
//! The coordinator hands a `Job`'s pickled arguments to a worker process
//! without ever deserializing them itself. The one piece of that contract
//! the coordinator does need to reason
//! about is which pickle protocol version a worker's interpreter can
//! produce, so that a result it sends back is guaranteed readable by
//! whoever asked for the job to run. Ported from the protocol-selection
//! logic in the original `nextrun` client, plus the `meadowflow`
//! job-runner's translation of a raw `ProcessState` into a higher-level
//! lifecycle event.

use crate::job::ProcessStateKind;

/// Shares the `job_id` identifier alphabet (`[A-Za-z0-9._-]`); kept as a
/// plain alias rather than a wrapper struct since nothing here needs to
/// distinguish it from a `String` at the type level beyond documentation.
pub type RequestId = String;

/// `(major, minor, micro)`.
pub type PyVersion = (u32, u32, u32);

/// The highest pickle protocol version this build of grid-core can read.
/// Mirrors `pickle.HIGHEST_PROTOCOL` in the reference Python runtime.
pub const LOCAL_HIGHEST_PICKLE_PROTOCOL: u32 = 5;

/// Picks the pickle protocol a worker running `interpreter_version` should
/// use to serialize its result, capped at the protocol this process can
/// read. See https://docs.python.org/3/library/pickle.html#data-stream-format
/// for the version thresholds this follows.
pub fn pickle_protocol_for(interpreter_version: PyVersion) -> Option<u32> {
    let protocol = if interpreter_version >= (3, 8, 0) {
        5
    } else if interpreter_version >= (3, 4, 0) {
        4
    } else if interpreter_version >= (3, 0, 0) {
        3
    } else {
        return None;
    };

    Some(protocol.min(LOCAL_HIGHEST_PICKLE_PROTOCOL))
}

/// Given `request_id`s of interest, validates the alphabet and short-circuits
/// empty input without a round-trip to the coordinator, mirroring
/// `nextrun/client.py::get_process_states`' guard against being called with
/// a bare string where a list was expected (modeled here at the type level
/// by taking `&[String]` rather than a single `&str`).
pub fn validate_request_ids(request_ids: &[RequestId]) -> crate::error::Result<()> {
    for id in request_ids {
        crate::job::validate_identifier(id)?;
    }
    Ok(())
}

/// How the `meadowflow`-side job runner should react to a `ProcessState` it
/// just polled off the coordinator, distinct from the raw state itself.
/// `REQUEST_IS_DUPLICATE` and the simple-command `RUN_REQUEST_FAILED` path
/// are explicit `Unsupported` outcomes, not silently folded into
/// `Recorded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Recorded,
    DuplicateRequest,
    RequestFailed,
    Unsupported,
}

/// Ported from `meadowflow/meadowrun_job_runner.py`'s `classify_transition`:
/// maps a polled `ProcessStateEnum` to the lifecycle event the job-runner
/// layer should record against its own higher-level job state.
pub fn classify_transition(kind: &ProcessStateKind) -> Transition {
    match kind {
        ProcessStateKind::RequestIsDuplicate => Transition::DuplicateRequest,
        ProcessStateKind::RunRequestFailed => Transition::RequestFailed,
        ProcessStateKind::ErrorGettingState => Transition::Unsupported,
        ProcessStateKind::RunRequested
        | ProcessStateKind::Assigned
        | ProcessStateKind::Running
        | ProcessStateKind::Succeeded
        | ProcessStateKind::PythonException
        | ProcessStateKind::NonZeroReturnCode
        | ProcessStateKind::Cancelled
        | ProcessStateKind::Unknown => Transition::Recorded,
    }
}
