//! The conversion server daemon.
//!
//! Boots one engine process, waits for it to come up, populates the
//! filter registry, then serves `convert`/`compare`/`get_version` until
//! a shutdown signal arrives, the engine dies, or a conversion timeout
//! fires.

use anyhow::{bail, Context};
use clap::Parser;
use scriba_core::config::EngineConfig;
use scriba_core::engine::{EngineSupervisor, RemoteEngine};
use scriba_core::rpc::RpcServer;
use scriba_core::service::ConversionService;
use scriba_core::watchdog::TimeoutGuard;
use scriba_core::ScribaError;
use scriba_rpc::cli::{detached_child_args, engine_launch_spec, find_engine_executable, DaemonArgs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let args = DaemonArgs::parse();

    if args.daemon {
        match relaunch_detached() {
            Ok(pid) => {
                println!("{}", pid);
                return;
            }
            Err(e) => {
                eprintln!("scribad: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        let code = e
            .downcast_ref::<ScribaError>()
            .map(ScribaError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

/// Start a copy of this server in the background and report its pid.
fn relaunch_detached() -> anyhow::Result<u32> {
    let exe = std::env::current_exe().context("Failed to locate own executable")?;
    let child = std::process::Command::new(exe)
        .args(detached_child_args(std::env::args_os().skip(1)))
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("Failed to relaunch in the background")?;
    Ok(child.id())
}

async fn run(args: DaemonArgs) -> anyhow::Result<()> {
    info!("Starting scribad {}", scriba_core::SERVICE_VERSION);

    if args.port != 0 && args.port == args.engine_port {
        bail!(
            "Listener port and engine port are both {}; they must differ",
            args.port
        );
    }

    let executable = match args.executable.clone() {
        Some(path) => path,
        None => find_engine_executable(EngineConfig::EXECUTABLE_CANDIDATES)
            .with_context(|| {
                format!(
                    "No engine executable found on PATH (tried: {})",
                    EngineConfig::EXECUTABLE_CANDIDATES.join(", ")
                )
            })?,
    };

    // The profile temp dir must outlive the engine process
    let (_profile_guard, profile_dir): (Option<tempfile::TempDir>, PathBuf) =
        match args.user_profile_dir.clone() {
            Some(dir) => (None, dir),
            None => {
                let tmp = tempfile::TempDir::new().context("Failed to create profile dir")?;
                let path = tmp.path().to_path_buf();
                (Some(tmp), path)
            }
        };

    let spec = engine_launch_spec(&args, &executable, &profile_dir);

    let (supervisor, engine_handle) = EngineSupervisor::spawn(&spec).await?;
    let supervisor = Arc::new(supervisor);
    supervisor
        .wait_until_ready(&engine_handle, spec.startup_timeout)
        .await?;

    let engine = Arc::new(RemoteEngine::connect(&args.engine_interface, args.engine_port).await?);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let guard = TimeoutGuard::new(
        supervisor.clone(),
        engine_handle.clone(),
        args.conversion_timeout.map(Duration::from_secs),
        shutdown_tx,
    );

    let service = ConversionService::new(engine, engine_handle.clone(), guard).await?;
    let mut server = RpcServer::start(&args.interface, args.port, Arc::new(service)).await?;

    info!("Serving conversions on {}", server.addr());

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
        status = supervisor.wait() => {
            match status {
                Some(status) => Err(anyhow::anyhow!("Engine process exited unexpectedly: {}", status)),
                None => Err(anyhow::anyhow!("Engine process exited unexpectedly")),
            }
        }
        _ = shutdown_rx.changed() => {
            Err(anyhow::Error::new(ScribaError::ConversionTimeout(
                Duration::from_secs(args.conversion_timeout.unwrap_or(0)),
            )))
        }
    };

    server.shutdown().await;
    supervisor.terminate(&engine_handle).await;
    // A detached start leaves the pid-file behind for the operator
    if !args.daemonized {
        if let Some(ref pid_file) = args.pid_file {
            let _ = std::fs::remove_file(pid_file);
        }
    }

    info!("Shut down");
    outcome
}
