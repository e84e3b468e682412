use std::sync::Arc;

use tonic::{Request, Response, Status};

use grid_core::coordinator::{AddJobOutcome, Coordinator};
use grid_core::job::{Job, JobSpec, ProcessState, ProcessStateKind, TaskSubmission};

#[allow(clippy::enum_variant_names)]
pub mod proto {
    tonic::include_proto!("grid.v1");
}

use proto::coordinator_server::Coordinator as CoordinatorRpc;
use proto::job as proto_job;
use proto::{
    add_job_response, process_state, AddJobResponse, AddTasksToGridJobRequest, GridTask,
    GridTaskStates, GridTaskStatesRequest, GridTaskUpdateAndGetNextRequest,
    Job as ProtoJob, JobStateUpdates, JobStatesRequest, NextJobRequest,
    ProcessState as ProtoProcessState, ProcessStates, PyCommand, PyFunction, PyGrid,
    UpdateStateResponse,
};

pub struct GridService {
    pub coordinator: Arc<Coordinator>,
}

// --- Proto <-> core conversions ---

fn kind_to_proto(kind: &ProcessStateKind) -> i32 {
    let e = match kind {
        ProcessStateKind::RunRequested => process_state::ProcessStateEnum::RunRequested,
        ProcessStateKind::Assigned => process_state::ProcessStateEnum::Assigned,
        ProcessStateKind::Running => process_state::ProcessStateEnum::Running,
        ProcessStateKind::Succeeded => process_state::ProcessStateEnum::Succeeded,
        ProcessStateKind::PythonException => process_state::ProcessStateEnum::PythonException,
        ProcessStateKind::NonZeroReturnCode => process_state::ProcessStateEnum::NonZeroReturnCode,
        ProcessStateKind::Cancelled => process_state::ProcessStateEnum::Cancelled,
        ProcessStateKind::RunRequestFailed => process_state::ProcessStateEnum::RunRequestFailed,
        ProcessStateKind::Unknown => process_state::ProcessStateEnum::Unknown,
        ProcessStateKind::ErrorGettingState => process_state::ProcessStateEnum::ErrorGettingState,
        ProcessStateKind::RequestIsDuplicate => process_state::ProcessStateEnum::RequestIsDuplicate,
    };
    e as i32
}

fn kind_from_proto(value: i32) -> ProcessStateKind {
    match process_state::ProcessStateEnum::try_from(value).unwrap_or(process_state::ProcessStateEnum::Default) {
        process_state::ProcessStateEnum::RunRequested => ProcessStateKind::RunRequested,
        process_state::ProcessStateEnum::Assigned => ProcessStateKind::Assigned,
        process_state::ProcessStateEnum::Running => ProcessStateKind::Running,
        process_state::ProcessStateEnum::Succeeded => ProcessStateKind::Succeeded,
        process_state::ProcessStateEnum::PythonException => ProcessStateKind::PythonException,
        process_state::ProcessStateEnum::NonZeroReturnCode => ProcessStateKind::NonZeroReturnCode,
        process_state::ProcessStateEnum::Cancelled => ProcessStateKind::Cancelled,
        process_state::ProcessStateEnum::RunRequestFailed => ProcessStateKind::RunRequestFailed,
        process_state::ProcessStateEnum::ErrorGettingState => ProcessStateKind::ErrorGettingState,
        process_state::ProcessStateEnum::RequestIsDuplicate => ProcessStateKind::RequestIsDuplicate,
        process_state::ProcessStateEnum::Unknown | process_state::ProcessStateEnum::Default => {
            ProcessStateKind::Unknown
        }
    }
}

fn state_to_proto(s: &ProcessState) -> ProtoProcessState {
    ProtoProcessState {
        state: kind_to_proto(&s.kind),
        pid: s.pid.unwrap_or(0) as i32,
        return_code: s.return_code.unwrap_or(0),
        pickled_result: s.pickled_result.clone(),
        log_paths: s.log_paths.clone(),
        last_updated_at: s.last_updated_at,
    }
}

fn state_from_proto(p: &ProtoProcessState) -> ProcessState {
    ProcessState {
        kind: kind_from_proto(p.state),
        pid: if p.pid == 0 { None } else { Some(p.pid as i64) },
        return_code: if p.return_code == 0 {
            None
        } else {
            Some(p.return_code)
        },
        pickled_result: p.pickled_result.clone(),
        log_paths: p.log_paths.clone(),
        last_updated_at: p.last_updated_at,
    }
}

fn job_to_proto(job: &Job) -> ProtoJob {
    let job_spec = match &job.spec {
        JobSpec::PyCommand { command_line } => Some(proto_job::JobSpec::PyCommand(PyCommand {
            command_line: command_line.clone(),
        })),
        JobSpec::PyFunction {
            module_name,
            function_name,
            pickled_function_arguments,
        } => Some(proto_job::JobSpec::PyFunction(PyFunction {
            module_name: module_name.clone(),
            function_name: function_name.clone(),
            pickled_function_arguments: pickled_function_arguments.clone(),
        })),
        JobSpec::PyGrid {
            tasks,
            all_tasks_added,
        } => Some(proto_job::JobSpec::PyGrid(PyGrid {
            tasks: tasks
                .iter()
                .map(|t| GridTask {
                    task_id: t.task_id,
                    pickled_function_arguments: t.pickled_function_arguments.clone(),
                })
                .collect(),
            all_tasks_added: *all_tasks_added,
        })),
    };

    ProtoJob {
        job_id: job.job_id.clone(),
        job_friendly_name: job.job_friendly_name.clone(),
        priority: job.priority as i32,
        job_spec,
    }
}

fn job_from_proto(p: ProtoJob) -> Result<Job, Status> {
    let spec = match p.job_spec {
        Some(proto_job::JobSpec::PyCommand(c)) => JobSpec::PyCommand {
            command_line: c.command_line,
        },
        Some(proto_job::JobSpec::PyFunction(f)) => JobSpec::PyFunction {
            module_name: f.module_name,
            function_name: f.function_name,
            pickled_function_arguments: f.pickled_function_arguments,
        },
        Some(proto_job::JobSpec::PyGrid(g)) => JobSpec::PyGrid {
            tasks: g
                .tasks
                .into_iter()
                .map(|t| TaskSubmission {
                    task_id: t.task_id,
                    pickled_function_arguments: t.pickled_function_arguments,
                })
                .collect(),
            all_tasks_added: g.all_tasks_added,
        },
        None => return Err(Status::invalid_argument("job_spec is required")),
    };

    Ok(Job {
        job_id: p.job_id,
        job_friendly_name: p.job_friendly_name,
        priority: p.priority as i64,
        spec,
    })
}

fn coordinator_err(e: grid_core::GridError) -> Status {
    match e {
        grid_core::GridError::Validation(msg) => Status::invalid_argument(msg),
        grid_core::GridError::NotFound(msg) => Status::not_found(msg),
        grid_core::GridError::Unsupported(msg) => Status::unimplemented(msg),
        grid_core::GridError::Internal(err) => Status::internal(format!("{err:#}")),
    }
}

#[tonic::async_trait]
impl CoordinatorRpc for GridService {
    async fn add_job(
        &self,
        request: Request<ProtoJob>,
    ) -> Result<Response<AddJobResponse>, Status> {
        let job = job_from_proto(request.into_inner())?;
        let outcome = self.coordinator.add_job(job).map_err(coordinator_err)?;
        Ok(Response::new(AddJobResponse {
            state: match outcome {
                AddJobOutcome::Added => add_job_response::AddJobState::Added as i32,
                AddJobOutcome::IsDuplicate => add_job_response::AddJobState::IsDuplicate as i32,
            },
        }))
    }

    async fn add_tasks_to_grid_job(
        &self,
        request: Request<AddTasksToGridJobRequest>,
    ) -> Result<Response<AddJobResponse>, Status> {
        let req = request.into_inner();
        let tasks: Vec<TaskSubmission> = req
            .tasks
            .into_iter()
            .map(|t| TaskSubmission {
                task_id: t.task_id,
                pickled_function_arguments: t.pickled_function_arguments,
            })
            .collect();

        self.coordinator
            .add_tasks_to_grid_job(&req.job_id, &tasks, req.all_tasks_added)
            .map_err(coordinator_err)?;

        Ok(Response::new(AddJobResponse {
            state: add_job_response::AddJobState::Added as i32,
        }))
    }

    async fn update_job_states(
        &self,
        request: Request<JobStateUpdates>,
    ) -> Result<Response<UpdateStateResponse>, Status> {
        let req = request.into_inner();
        let updates = req
            .job_states
            .into_iter()
            .filter_map(|u| {
                u.process_state
                    .as_ref()
                    .map(|ps| (u.job_id.clone(), state_from_proto(ps)))
            })
            .collect();

        self.coordinator.update_job_states(updates);

        Ok(Response::new(UpdateStateResponse {}))
    }

    async fn get_next_job(
        &self,
        _request: Request<NextJobRequest>,
    ) -> Result<Response<ProtoJob>, Status> {
        let job = self.coordinator.get_next_job();
        Ok(Response::new(job_to_proto(&job)))
    }

    async fn update_grid_task_state_and_get_next(
        &self,
        request: Request<GridTaskUpdateAndGetNextRequest>,
    ) -> Result<Response<GridTask>, Status> {
        let req = request.into_inner();
        let state = req.process_state.as_ref().map(state_from_proto);

        let task = self
            .coordinator
            .update_grid_task_state_and_get_next(&req.job_id, req.task_id, state);

        Ok(Response::new(GridTask {
            task_id: task.task_id,
            pickled_function_arguments: task.pickled_args,
        }))
    }

    async fn get_simple_job_states(
        &self,
        request: Request<JobStatesRequest>,
    ) -> Result<Response<ProcessStates>, Status> {
        let req = request.into_inner();
        let states = self.coordinator.get_simple_job_states(&req.job_ids);
        Ok(Response::new(ProcessStates {
            process_states: states.iter().map(state_to_proto).collect(),
        }))
    }

    async fn get_grid_task_states(
        &self,
        request: Request<GridTaskStatesRequest>,
    ) -> Result<Response<GridTaskStates>, Status> {
        let req = request.into_inner();
        let states = self
            .coordinator
            .get_grid_task_states(&req.job_id, &req.task_ids_to_ignore)
            .map_err(coordinator_err)?;

        Ok(Response::new(GridTaskStates {
            task_states: states
                .into_iter()
                .map(|(task_id, state)| proto::GridTaskState {
                    task_id,
                    process_state: Some(state_to_proto(&state)),
                })
                .collect(),
        }))
    }
}
