//! `keel journal replay` command.
//!
//! Rebuilds the snapshot described by a journal directory, verifies it, and reports a
//! summary; optionally writes the result as a versioned deployment.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use keel_journal::{FileSnapshotPersister, SnapshotPersister, recover_dir};
use keel_state::VersionedDeployment;

use crate::opts::GlobalOpts;
use crate::output::print_success;

use super::{deployment_summary, render_summary_human};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Base snapshot to replay onto when the journal has no rebase checkpoint
    #[arg(long)]
    pub base: Option<PathBuf>,

    /// Write the recovered snapshot to this file
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn cmd_replay(opts: &GlobalOpts, args: &ReplayArgs) -> Result<()> {
    let config = opts.journal_config();
    let fallback = match &args.base {
        Some(path) => {
            let bytes =
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            Some(
                VersionedDeployment::from_json(&bytes)
                    .with_context(|| format!("parsing {}", path.display()))?,
            )
        }
        None => None,
    };

    let deployment = recover_dir(&config.dir, fallback)
        .with_context(|| format!("replaying journal in {}", config.dir.display()))?;
    tracing::info!(
        resources = deployment.resources.len(),
        "replayed journal in {}",
        config.dir.display()
    );

    if let Some(path) = &args.out {
        FileSnapshotPersister::new(path)
            .save(&deployment)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    let summary = deployment_summary(&deployment)?;
    let warnings = if deployment.pending_operations.is_empty() {
        vec![]
    } else {
        vec![format!(
            "{} operation(s) were interrupted and need attention",
            deployment.pending_operations.len()
        )]
    };

    if opts.wants_json() {
        return print_success(opts, summary, warnings);
    }
    render_summary_human("replay ok", &summary);
    if !opts.quiet {
        for w in warnings {
            eprintln!("notice: {w}");
        }
    }
    Ok(())
}
