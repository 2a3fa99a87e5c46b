use clap::Parser;
use garmin_sync::cli::{Cli, Report, log_filter_with, run};
use secrecy::ExposeSecret;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // Configure logging from `GARMIN_SYNC_LOG_LEVEL` (or fallback to `RUST_LOG`, default `info`).
    // Logs go to stderr; stdout carries only the status line.
    let log_env = log_filter_with(|k| std::env::var(k).ok());
    let env_filter = tracing_subscriber::EnvFilter::try_new(&log_env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
    tracing::debug!("garmin-sync: log filter: {}", log_env);

    let cli = Cli::parse();

    let outcome = run(cli.command, |k| std::env::var(k).ok()).await;

    match outcome {
        Ok(Report::Upload(result)) => {
            println!("{result}");
            Ok(ExitCode::SUCCESS)
        }
        Ok(Report::SessionToken(token)) => {
            println!("{}", token.expose_secret());
            eprintln!("Store this value as GARMIN_SESSION.");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            println!("FAILED ({}): {err}", err.category());
            Ok(ExitCode::from(err.exit_code()))
        }
    }
}
