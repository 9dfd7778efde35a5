//! prn Daemon
//!
//! Long-lived process-runner daemon: starts child processes on behalf of
//! authenticated remote clients, isolates them under cgroup v2, captures
//! their output for replay, and serves the gRPC API over mTLS.

use clap::Parser;
use tracing::info;

use prn_core::config::TlsMaterial;
use prn_daemon::server::GrpcServer;

#[derive(Parser, Debug)]
#[command(name = "prn-daemon")]
#[command(version, about = "prn daemon - remote process runner")]
struct Args {
    /// Listen address
    #[arg(long, default_value = prn_core::config::DEFAULT_ADDRESS, env = "PRN_ADDRESS")]
    address: String,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "PRN_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "PRN_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("prn_daemon={}", args.log_level);
    prn_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.address,
        "Starting prn-daemon"
    );

    // TLS material arrives as inline PEM in the environment; refusing to
    // start without it keeps the daemon mTLS-only.
    let tls_material = TlsMaterial::from_env()?;
    let server = GrpcServer::new(&tls_material)?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        result = server.serve(&args.address) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    info!("Daemon stopped");
    Ok(())
}
