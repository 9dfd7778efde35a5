//! CLI subcommand implementations.

use std::io::Write;

use anyhow::Context;
use tonic::Code;

use prn_proto::v1::process_runner_service_client::ProcessRunnerServiceClient;
use prn_proto::v1::{
    get_output_response, GetOutputRequest, StartRequest, StatusRequest, StopRequest,
};

use crate::connection;
use crate::print::print_status_table;

/// `prn start -- <command> [args...]`
pub async fn start(command: &[String]) -> anyhow::Result<()> {
    let (program, args) = command
        .split_first()
        .context("command to execute is required; use -- to separate CLI flags from the command")?;

    let channel = connection::dial().await?;
    let mut client = ProcessRunnerServiceClient::new(channel);

    let response = client
        .start(StartRequest {
            command: program.clone(),
            args: args.to_vec(),
        })
        .await?;

    // Print only the process id so scripts can capture it.
    println!("{}", response.into_inner().process_identifier);
    Ok(())
}

/// `prn status <process_id>`
pub async fn status(process_id: &str) -> anyhow::Result<()> {
    let channel = connection::dial().await?;
    let mut client = ProcessRunnerServiceClient::new(channel);

    match client
        .status(StatusRequest {
            process_identifier: process_id.to_string(),
        })
        .await
    {
        Ok(response) => {
            let response = response.into_inner();
            print_status_table(process_id, response.status.as_ref(), response.process.as_ref());
            Ok(())
        }
        Err(status) if status.code() == Code::PermissionDenied => {
            eprintln!("Forbidden. Only the creator of the process can get its status.");
            Ok(())
        }
        Err(status) => Err(status.into()),
    }
}

/// `prn stop <process_id>`
pub async fn stop(process_id: &str) -> anyhow::Result<()> {
    let channel = connection::dial().await?;
    let mut client = ProcessRunnerServiceClient::new(channel);

    match client
        .stop(StopRequest {
            process_identifier: process_id.to_string(),
        })
        .await
    {
        Ok(response) => {
            let response = response.into_inner();
            print_status_table(process_id, response.status.as_ref(), response.process.as_ref());
            Ok(())
        }
        Err(status) if status.code() == Code::PermissionDenied => {
            eprintln!("Forbidden. Only the creator of the process can stop it.");
            Ok(())
        }
        Err(status) => Err(status.into()),
    }
}

/// `prn logs <process_id>`
///
/// Streams the full captured output from the beginning; stdout chunks go to
/// stdout, stderr chunks to stderr, until the process terminates and the
/// backlog is drained.
pub async fn logs(process_id: &str) -> anyhow::Result<()> {
    let channel = connection::dial_streaming().await?;
    let mut client = ProcessRunnerServiceClient::new(channel);

    let mut stream = client
        .get_output(GetOutputRequest {
            process_identifier: process_id.to_string(),
        })
        .await?
        .into_inner();

    while let Some(message) = stream.message().await? {
        match message.r#type() {
            get_output_response::Type::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(&message.data)?;
                out.flush()?;
            }
            get_output_response::Type::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(&message.data)?;
                err.flush()?;
            }
            get_output_response::Type::Unspecified => {}
        }
    }
    Ok(())
}
