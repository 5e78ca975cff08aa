//! Global CLI options.

use std::path::PathBuf;

use clap::Args;
use keel_journal::JournalConfig;

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Journal directory (env: KEEL_JOURNAL_DIR, default: .keel/journal)
    #[arg(short = 'd', long, global = true, env = "KEEL_JOURNAL_DIR")]
    pub dir: Option<PathBuf>,

    /// JSON output envelope
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output (implies --json)
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Suppress notices
    #[arg(long, global = true)]
    pub quiet: bool,
}

impl GlobalOpts {
    /// Journal settings from the environment, with `--dir` taking precedence.
    pub fn journal_config(&self) -> JournalConfig {
        let config = JournalConfig::from_env();
        match &self.dir {
            Some(dir) => config.with_dir(dir),
            None => config,
        }
    }

    pub fn wants_json(&self) -> bool {
        self.json || self.pretty
    }
}
