//! Worker process entry point.
//!
//! Spawned by the frontend per spec §4.9/§6: reads one newline-delimited
//! JSON [`shadowcheck_proto::WorkerRequest`] per line on stdin, dispatches it
//! to a [`shadowcheck_core::WorkerSession`], and writes one newline-delimited
//! JSON [`shadowcheck_proto::WorkerResponse`] per line on stdout. Because
//! stdout *is* the wire, tracing is routed to stderr — the same reasoning
//! the teacher gives for skipping tracing init entirely in LSP mode ("LSP
//! uses stdio so tracing would break it").

use clap::Parser;
use shadowcheck_core::session::WorkerSession;
use shadowcheck_proto::{WorkerRequest, WorkerResponse};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Validate embedded SQL against a shadow PostgreSQL schema.
#[derive(Parser, Debug)]
#[command(name = "shadowcheck", version, about)]
struct Args {
    /// Project directory the frontend will reference in its first
    /// INITIALIZE request. Used only to fail fast on a malformed config
    /// file before the worker loop starts.
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Config file path, relative to `--project-dir` unless absolute.
    #[arg(long, default_value = "shadowcheck.json")]
    config: PathBuf,
}

fn init_tracing() {
    let debug = std::env::var("DEBUG_SQL_CHECKER")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
    };

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    // Best-effort: pick up DEBUG_SQL_CHECKER / RUST_LOG from a .env file in
    // the working directory, same as the teacher's CLI does for DATABASE_URL.
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing();

    let config_path = if args.config.is_absolute() {
        args.config.clone()
    } else {
        args.project_dir.join(&args.config)
    };
    if config_path.exists()
        && let Err(err) = shadowcheck_config::Config::load(&config_path)
    {
        eprintln!("invalid config file {}: {err}", config_path.display());
        std::process::exit(1);
    }

    tracing::info!(project_dir = %args.project_dir.display(), "shadowcheck worker starting");

    if let Err(err) = run_worker_loop().await {
        tracing::error!(error = %err, "worker loop exited with an I/O error");
        std::process::exit(1);
    }
}

/// Single-writer request/response loop over stdin/stdout, per §5
/// ("single-threaded cooperative"). One [`WorkerSession`] lives for the
/// whole process; the frontend owns the process's lifetime and is expected
/// to close stdin when it's done, at which point the loop exits.
async fn run_worker_loop() -> std::io::Result<()> {
    let mut session = WorkerSession::new();
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response: WorkerResponse = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => session.dispatch(request).await,
            Err(err) => Err(shadowcheck_proto::WorkerError::RunnerError {
                message: format!("malformed request: {err}"),
            }),
        };

        let mut encoded = serde_json::to_string(&response)
            .unwrap_or_else(|err| format!(r#"{{"Err":{{"_tag":"RunnerError","message":"failed to encode response: {err}"}}}}"#));
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_config_file_with_an_unknown_key_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("shadowcheck.json");
        std::fs::write(&config_path, r#"{"notARealKey": true}"#).unwrap();

        let err = shadowcheck_config::Config::load(&config_path).unwrap_err();
        assert!(matches!(err, shadowcheck_config::ConfigError::Parse { .. }));
    }

    #[test]
    fn a_well_formed_config_file_loads_with_project_relative_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("shadowcheck.json");
        std::fs::write(&config_path, "{}").unwrap();

        let cfg = shadowcheck_config::Config::load(&config_path).unwrap();
        assert_eq!(cfg.migrations_dir, "migrations");
    }
}
