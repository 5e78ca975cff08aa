//! `keel snapshot verify` command.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use keel_state::{IntegrityError, VersionedDeployment, verify_integrity};

use crate::opts::GlobalOpts;
use crate::output::print_success;

use super::{deployment_summary, render_summary_human};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Versioned deployment file to check
    pub file: PathBuf,
}

pub fn cmd_verify(opts: &GlobalOpts, args: &VerifyArgs) -> Result<()> {
    let bytes =
        std::fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let deployment = VersionedDeployment::from_json(&bytes)
        .with_context(|| format!("parsing {}", args.file.display()))?;

    if let Err(err) = verify_integrity(Some(&deployment)) {
        bail!(
            "{}: {err}\n{}",
            args.file.display(),
            IntegrityError::RECOVERY_HINT
        );
    }

    let summary = deployment_summary(&deployment)?;
    if opts.wants_json() {
        return print_success(opts, summary, vec![]);
    }
    render_summary_human(&format!("{}: ok", args.file.display()), &summary);
    Ok(())
}
