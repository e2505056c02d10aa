//! Core engine for the `rmv` tools: concurrency-bounded recursive move/copy.
//!
//! The [`transfer`] module walks source trees and mirrors them into a
//! destination directory, dispatching every leaf transfer through a
//! [`limiter::Limiter`] so that at most a configured number of transfer
//! workers run at once. The [`rm`] module removes the emptied source trees
//! after a move. [`run`] is the shared binary harness: it installs the
//! tracing subscriber, builds the tokio runtime and reports the outcome.

pub mod config;
pub mod rm;
pub mod testutils;
pub mod transfer;

pub use config::{OutputConfig, RuntimeConfig};

fn init_tracing(output: &OutputConfig) {
    let level = match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run an async entry point on a fresh tokio runtime and report the result.
///
/// Returns `None` if the entry point failed; the caller decides the process
/// exit code. Errors are printed to stderr unless `quiet` is set, the
/// summary is printed to stdout when `print_summary` is set.
pub fn run<Summary, Fut>(
    output: &OutputConfig,
    runtime: &RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    init_tracing(output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let tokio_runtime = match builder.build() {
        Ok(tokio_runtime) => tokio_runtime,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed starting the runtime: {error}");
            }
            return None;
        }
    };
    match tokio_runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary {
                println!("{}", &summary);
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
