//! Command-line entry point for the hub daemon.
//!
//! ```bash
//! # Foreground, default address
//! huddled start
//!
//! # Background, custom address and config
//! huddled start -d --bind 127.0.0.1:9000 --config ./huddled.toml
//!
//! # Environment works too
//! HUDDLE_BIND=127.0.0.1:9000 RUST_LOG=huddled=debug huddled start
//!
//! huddled status
//! huddled stop
//! ```
//!
//! SIGTERM and SIGINT trigger a graceful shutdown: every open socket gets a
//! 1001 close frame before the process exits.

use std::fs::{self, File};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::HubConfig;
use crate::hub::spawn_hub_with_liveness;
use crate::monitor::spawn_monitor_task;
use crate::server::HubServer;

/// huddle daemon - real-time session synchronization hub
#[derive(Parser, Debug)]
#[command(name = "huddled", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the hub
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Address to listen on
        #[arg(long, env = "HUDDLE_BIND")]
        bind: Option<SocketAddr>,

        /// TOML config file
        #[arg(long, env = "HUDDLE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Stop the running hub
    Stop,
    /// Show whether the hub is running
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("huddle")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("huddled.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("huddled.log")
}

fn read_pid() -> Option<i32> {
    fs::read_to_string(pid_file_path()).ok()?.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Signal 0 probes for existence without delivering anything.
fn is_process_running(pid: i32) -> bool {
    // SAFETY: kill with signal 0 has no side effects
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Returns the PID of a running hub, clearing a stale PID file.
fn running_pid() -> Option<i32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

fn stop_daemon(pid: i32) -> Result<()> {
    // SAFETY: plain syscall on a pid we read from our own PID file
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {}", pid);
    }
    Ok(())
}

/// Parses arguments and runs the selected command.
pub fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        bind: None,
        config: None,
    });

    match command {
        Command::Start {
            daemon,
            bind,
            config,
        } => {
            if let Some(pid) = running_pid() {
                eprintln!("Hub is already running (PID {})", pid);
                eprintln!("Use 'huddled stop' to stop it first.");
                process::exit(1);
            }

            // Resolve config before forking so errors reach the terminal
            let mut hub_config =
                HubConfig::load(config.as_deref()).context("Failed to load configuration")?;
            if let Some(bind) = bind {
                hub_config.bind = bind;
            }

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(hub_config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(pid) = running_pid() else {
                println!("Hub is not running.");
                return Ok(());
            };

            println!("Stopping hub (PID {})...", pid);
            stop_daemon(pid)?;

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Hub stopped.");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(100));
            }

            eprintln!("Hub did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => match running_pid() {
            Some(pid) => {
                println!("Hub is running (PID {})", pid);
                println!("PID file: {}", pid_file_path().display());
                Ok(())
            }
            None => {
                println!("Hub is not running.");
                process::exit(1);
            }
        },
    }
}

/// Forks to the background with stdout/stderr going to the log file.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to share log file with stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: HubConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("huddled=info".parse()?)
                .add_directive("huddle_core=info".parse()?)
                .add_directive("huddle_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        bind = %config.bind,
        "huddle hub starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let hub = spawn_hub_with_liveness(&config, cancel_token.clone());
    info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        heartbeat_timeout_secs = config.heartbeat_timeout.as_secs(),
        "Hub started"
    );

    let _monitor = spawn_monitor_task(hub.clone(), config.metrics_interval, cancel_token.clone());

    let server = HubServer::new(config, hub, cancel_token);
    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("huddle hub stopped");
    Ok(())
}

/// Waits for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_flags() {
        let args = Args::try_parse_from([
            "huddled",
            "start",
            "-d",
            "--bind",
            "127.0.0.1:9000",
            "--config",
            "/etc/huddle.toml",
        ])
        .unwrap();

        match args.command {
            Some(Command::Start {
                daemon,
                bind,
                config,
            }) => {
                assert!(daemon);
                assert_eq!(bind, Some("127.0.0.1:9000".parse().unwrap()));
                assert_eq!(config, Some(PathBuf::from("/etc/huddle.toml")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_no_subcommand_parses() {
        let args = Args::try_parse_from(["huddled"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn test_paths_live_under_state_dir() {
        assert!(pid_file_path().ends_with("huddle/huddled.pid"));
        assert!(log_file_path().ends_with("huddle/huddled.log"));
    }
}
