//! `ProcessRunnerService` gRPC implementation.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::{wrappers::ReceiverStream, Stream};
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument};

use prn_proto::v1 as pb;
use prn_proto::v1::process_runner_service_server::ProcessRunnerService;

use super::auth;
use crate::supervisor::{
    CommandSpec, ProcessState, ProcessStatus, Supervisor, SupervisorError,
};

/// Buffer for the `GetOutput` response stream.
const OUTPUT_STREAM_BUFFER: usize = 32;

/// `ProcessRunnerService` backed by the [`Supervisor`].
///
/// Tracks which peer identity started each process; `Status` and `Stop` are
/// restricted to that identity. `GetOutput` is open to any authenticated
/// peer.
pub struct ProcessRunnerServiceImpl {
    supervisor: Arc<Supervisor>,
    owners: RwLock<HashMap<String, String>>,
}

impl ProcessRunnerServiceImpl {
    /// Creates the service around an existing supervisor.
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Rejects callers other than the identity recorded at `Start` time.
    ///
    /// Runs before any process state is inspected, so an unknown id looks
    /// the same as somebody else's id.
    async fn check_ownership<T>(&self, request: &Request<T>, process_id: &str) -> Result<(), Status> {
        let identity = auth::peer_identity(request)?;
        let owners = self.owners.read().await;
        if owners
            .get(process_id)
            .is_some_and(|owner| *owner == identity.0)
        {
            Ok(())
        } else {
            Err(Status::permission_denied(
                "only the original owner can access the resource",
            ))
        }
    }
}

type OutputStream = Pin<Box<dyn Stream<Item = Result<pb::GetOutputResponse, Status>> + Send>>;

#[tonic::async_trait]
impl ProcessRunnerService for ProcessRunnerServiceImpl {
    type GetOutputStream = OutputStream;

    #[instrument(skip(self, request), fields(rpc = "Start"))]
    async fn start(
        &self,
        request: Request<pb::StartRequest>,
    ) -> Result<Response<pb::StartResponse>, Status> {
        let identity = auth::peer_identity(&request)?.clone();
        let req = request.into_inner();

        let started = self
            .supervisor
            .start(&req.command, &req.args)
            .await
            .map_err(start_error_status)?;

        self.owners
            .write()
            .await
            .insert(started.id.clone(), identity.0);

        info!(id = %started.id, command = %req.command, "Started process");
        Ok(Response::new(pb::StartResponse {
            process_identifier: started.id,
            status: Some(to_proto_status(&started.status)),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "Status"))]
    async fn status(
        &self,
        request: Request<pb::StatusRequest>,
    ) -> Result<Response<pb::StatusResponse>, Status> {
        let process_id = request.get_ref().process_identifier.clone();
        self.check_ownership(&request, &process_id).await?;

        let result = self
            .supervisor
            .status(&process_id)
            .await
            .map_err(lookup_error_status)?;

        Ok(Response::new(pb::StatusResponse {
            process: Some(to_proto_process(&result.command)),
            status: Some(to_proto_status(&result.status)),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "Stop"))]
    async fn stop(
        &self,
        request: Request<pb::StopRequest>,
    ) -> Result<Response<pb::StopResponse>, Status> {
        let process_id = request.get_ref().process_identifier.clone();
        self.check_ownership(&request, &process_id).await?;

        let result = self
            .supervisor
            .stop(&process_id)
            .await
            .map_err(lookup_error_status)?;

        info!(id = %process_id, "Stopped process");
        Ok(Response::new(pb::StopResponse {
            process: Some(to_proto_process(&result.command)),
            status: Some(to_proto_status(&result.status)),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "GetOutput"))]
    async fn get_output(
        &self,
        request: Request<pb::GetOutputRequest>,
    ) -> Result<Response<Self::GetOutputStream>, Status> {
        let req = request.into_inner();
        let (stdout, stderr) = self
            .supervisor
            .output(&req.process_identifier)
            .await
            .map_err(lookup_error_status)?;

        let (tx, rx) = mpsc::channel::<Result<pb::GetOutputResponse, Status>>(OUTPUT_STREAM_BUFFER);
        tokio::spawn(forward_output(stdout, stderr, tx));

        debug!(id = %req.process_identifier, "Output stream opened");
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

/// Interleaves both subscriber channels into one response stream until both
/// close. A dropped response channel (client went away) ends forwarding; the
/// subscriber channels themselves close when their stores stop.
async fn forward_output(
    mut stdout: mpsc::Receiver<Bytes>,
    mut stderr: mpsc::Receiver<Bytes>,
    tx: mpsc::Sender<Result<pb::GetOutputResponse, Status>>,
) {
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        let frame = tokio::select! {
            chunk = stdout.recv(), if stdout_open => match chunk {
                Some(data) => output_frame(pb::get_output_response::Type::Stdout, &data),
                None => {
                    stdout_open = false;
                    continue;
                }
            },
            chunk = stderr.recv(), if stderr_open => match chunk {
                Some(data) => output_frame(pb::get_output_response::Type::Stderr, &data),
                None => {
                    stderr_open = false;
                    continue;
                }
            },
        };

        if tx.send(Ok(frame)).await.is_err() {
            return;
        }
    }
}

fn output_frame(kind: pb::get_output_response::Type, data: &Bytes) -> pb::GetOutputResponse {
    pb::GetOutputResponse {
        r#type: kind.into(),
        data: data.to_vec(),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn start_error_status(err: SupervisorError) -> Status {
    match err {
        SupervisorError::EmptyCommand => Status::invalid_argument(err.to_string()),
        other => Status::aborted(format!("Error starting process: {other}")),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn lookup_error_status(err: SupervisorError) -> Status {
    match err {
        SupervisorError::NotFound { ref id } => Status::not_found(format!("process not found: {id}")),
        other => Status::internal(other.to_string()),
    }
}

fn to_proto_process(command: &CommandSpec) -> pb::Process {
    pb::Process {
        command: command.program.clone(),
        args: command.args.clone(),
    }
}

fn to_proto_status(status: &ProcessStatus) -> pb::ProcessStatus {
    pb::ProcessStatus {
        state: to_proto_state(status.state).into(),
        exit_code: status.exit_code,
        start_time: Some(prost_types::Timestamp::from(status.start_time)),
        end_time: status.end_time.map(prost_types::Timestamp::from),
    }
}

fn to_proto_state(state: ProcessState) -> pb::ProcessState {
    match state {
        ProcessState::Running => pb::ProcessState::Running,
        ProcessState::Stopped => pb::ProcessState::Stopped,
    }
}
