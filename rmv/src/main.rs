use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rmv",
    version,
    about = "Move or copy file trees with a bounded number of concurrent transfers",
    long_about = "`rmv` recursively relocates or duplicates one or more source trees into a
destination directory, mirroring each tree's internal hierarchy. At most
--threads file transfers are in flight at any time; with --threads 1 (the
default) every transfer runs synchronously in traversal order.

EXAMPLE:
    # Copy two trees into /backup with up to 8 concurrent transfers
    rmv --operation copy --FROM /data/a /data/b --TO /backup --threads 8 --summary

Note: with `--operation move` the source trees are removed afterward."
)]
struct Args {
    // Transfer options
    /// Whether source trees are moved or copied
    #[arg(
        short = 'o',
        long = "operation",
        value_name = "OPERATION",
        help_heading = "Transfer options"
    )]
    operation: common::transfer::Mode,

    /// Source tree root(s)
    #[arg(
        short = 'f',
        long = "FROM",
        value_name = "PATH",
        num_args = 1..,
        required = true,
        help_heading = "Transfer options"
    )]
    from: Vec<std::path::PathBuf>,

    /// Destination directory, created if absent
    #[arg(
        short = 't',
        long = "TO",
        value_name = "PATH",
        help_heading = "Transfer options"
    )]
    to: std::path::PathBuf,

    /// Maximum number of concurrent file transfers, values <= 1 (or leaving
    /// unspecified) mean fully synchronous transfers
    #[arg(
        long,
        value_name = "N",
        allow_negative_numbers = true,
        help_heading = "Transfer options"
    )]
    threads: Option<i64>,

    /// Exit on first error
    #[arg(short = 'e', long = "fail-early", help_heading = "Transfer options")]
    fail_early: bool,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of runtime worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

fn threads_amount(arg_threads: Option<i64>) -> usize {
    // values <= 0 or absent normalize to a single synchronous transfer
    arg_threads
        .and_then(|threads| usize::try_from(threads).ok())
        .map_or(1, |threads| threads.max(1))
}

#[instrument]
async fn async_main(args: Args) -> Result<common::transfer::Summary> {
    let limiter = limiter::Limiter::new(threads_amount(args.threads));
    let settings = common::transfer::Settings {
        mode: args.operation,
        fail_early: args.fail_early,
    };
    match common::transfer::run_roots(&args.from, &args.to, &settings, &limiter).await {
        Ok(summary) => Ok(summary),
        Err(error) => {
            if args.summary {
                return Err(anyhow!("{}\n\n{}", &error, &error.summary));
            }
            Err(anyhow!("{}", &error))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary || args.verbose > 0,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(&output, &runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threads_amount_normalizes_to_one() {
        assert_eq!(threads_amount(None), 1);
        assert_eq!(threads_amount(Some(0)), 1);
        assert_eq!(threads_amount(Some(-4)), 1);
        assert_eq!(threads_amount(Some(1)), 1);
        assert_eq!(threads_amount(Some(8)), 8);
    }
}
