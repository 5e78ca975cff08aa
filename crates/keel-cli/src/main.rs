mod commands;
mod opts;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::journal_tail::JournalTailArgs;
use commands::replay::ReplayArgs;
use commands::verify::VerifyArgs;
use opts::GlobalOpts;

#[derive(Parser, Debug)]
#[command(name = "keel", version, about = "Deployment journal and snapshot tools")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect and replay a persisted journal
    #[command(subcommand)]
    Journal(JournalCommand),

    /// Work with snapshot files
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
}

#[derive(Subcommand, Debug)]
enum JournalCommand {
    /// List journal entries
    Tail(JournalTailArgs),

    /// Rebuild the snapshot a journal describes
    Replay(ReplayArgs),
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    /// Check a snapshot file's structural integrity
    Verify(VerifyArgs),
}

fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();
    let opts = &cli.opts;

    match cli.command {
        Command::Journal(cmd) => match cmd {
            JournalCommand::Tail(args) => commands::journal_tail::cmd_journal_tail(opts, &args),
            JournalCommand::Replay(args) => commands::replay::cmd_replay(opts, &args),
        },
        Command::Snapshot(cmd) => match cmd {
            SnapshotCommand::Verify(args) => commands::verify::cmd_verify(opts, &args),
        },
    }
}

/// Logs go to stderr so command output stays machine-readable. `RUST_LOG` overrides
/// the default `info` filter; library `log` records are forwarded.
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}
