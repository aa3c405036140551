//! Foreman daemon: a line-oriented JSON front end over the worker manager.
//!
//! Commands arrive as one JSON object per line on stdin and responses leave
//! as one JSON object per line on stdout; logs go to stderr so the stdout
//! stream stays machine-readable. The background poller runs until EOF or
//! Ctrl-C, then shuts down cleanly.
//!
//! ```text
//! $ echo '{"op":"list_workers"}' | foreman-daemon
//! {"status":"success","message":"0 workers tracked","data":{"count":0,"workers":[]}}
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use foreman_core::ops::{self, Command, OpResponse};
use foreman_core::{AgentApiClient, Config, RequestRunner, WorkerManager};

#[derive(Parser, Debug)]
#[command(
    name = "foreman-daemon",
    about = "Supervises remote coding-agent worker sessions"
)]
struct Args {
    /// Poll interval override in seconds.
    #[arg(long, env = "FOREMAN_POLL_INTERVAL_SECS")]
    poll_interval: Option<u64>,

    /// Log filter when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .target(env_logger::Target::Stderr)
        .init();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(secs) = args.poll_interval {
        config.poll_interval = Duration::from_secs(secs);
    }

    let runner = RequestRunner::from_config(&config);
    let client = AgentApiClient::new(&config, runner);
    let manager = Arc::new(WorkerManager::new(&config, client));

    let notifications = manager.notifications();
    notifications.on_activity(|session_id, activity| {
        log::info!(
            "worker {session_id}: {} {}",
            activity.kind,
            activity.title.as_deref().unwrap_or("")
        );
    });
    notifications.on_state_change(|session_id, state| {
        log::info!("worker {session_id} reached {state}");
    });

    manager.start();
    log::info!("foreman daemon started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupt received, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let response = run_command(&manager, &line).await;
                        match serde_json::to_string(&response) {
                            Ok(json) => println!("{json}"),
                            Err(e) => log::error!("failed to serialize response: {e}"),
                        }
                    }
                    Ok(None) => {
                        log::info!("stdin closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        log::error!("stdin error: {e}");
                        break;
                    }
                }
            }
        }
    }

    manager.stop();
    log::info!("foreman daemon stopped");
}

/// Parse and execute one command line. The core is blocking (it talks HTTP
/// synchronously), so execution moves off the async runtime.
async fn run_command(manager: &Arc<WorkerManager>, line: &str) -> OpResponse {
    let command = match serde_json::from_str::<Command>(line) {
        Ok(command) => command,
        Err(e) => return OpResponse::error(format!("invalid command: {e}")),
    };

    let manager = Arc::clone(manager);
    tokio::task::spawn_blocking(move || ops::dispatch(&manager, command))
        .await
        .unwrap_or_else(|e| OpResponse::error(format!("command task failed: {e}")))
}
