//! `keel journal tail` command.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use keel_journal::persist::fs::load_dir;
use keel_state::JournalEntry;
use serde_json::{Value, json};

use crate::opts::GlobalOpts;
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct JournalTailArgs {
    /// Sequence to start from (inclusive)
    #[arg(long, default_value_t = 1)]
    pub from: i64,

    /// Maximum number of entries to return
    #[arg(long, default_value_t = 200)]
    pub limit: usize,

    /// Comma-separated or repeated list of entry kinds to include
    #[arg(long, value_delimiter = ',')]
    pub kinds: Vec<String>,

    /// Write full JSON result to file
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn cmd_journal_tail(opts: &GlobalOpts, args: &JournalTailArgs) -> Result<()> {
    let config = opts.journal_config();
    let persisted = load_dir(&config.dir)
        .with_context(|| format!("loading journal from {}", config.dir.display()))?;
    let total = persisted.entries.len();

    let mut entries = persisted.entries;
    entries.sort_by_key(|e| e.sequence_number);
    let rows: Vec<Value> = entries
        .iter()
        .filter(|e| e.sequence_number >= args.from)
        .filter(|e| args.kinds.is_empty() || args.kinds.iter().any(|k| *k == e.kind.to_string()))
        .take(args.limit)
        .map(entry_row)
        .collect();
    tracing::debug!(total, shown = rows.len(), "journal tail");

    let result = json!({
        "dir": config.dir.display().to_string(),
        "rebased": persisted.base.is_some(),
        "total": total,
        "entries": rows,
    });

    if let Some(path) = &args.out {
        fs::write(path, serde_json::to_vec_pretty(&result)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    if opts.wants_json() {
        return print_success(opts, result, vec![]);
    }

    render_journal_tail_human(&result);
    Ok(())
}

fn entry_row(entry: &JournalEntry) -> Value {
    json!({
        "seq": entry.sequence_number,
        "kind": entry.kind,
        "op": entry.op,
        "old": entry.old,
        "new": entry.new,
        "urn": entry.state.as_ref().map(|s| s.urn.as_str()),
    })
}

fn render_journal_tail_human(result: &Value) {
    let total = result["total"].as_u64().unwrap_or(0);
    let rebased = result["rebased"].as_bool().unwrap_or(false);
    println!(
        "journal: {} entries{}",
        total,
        if rebased { " (rebased)" } else { "" }
    );

    let entries = result["entries"].as_array().cloned().unwrap_or_default();
    if entries.is_empty() {
        println!("(no entries)");
        return;
    }

    for entry in entries {
        let seq = entry["seq"].as_i64().unwrap_or(0);
        let kind = entry["kind"].as_str().unwrap_or("unknown");
        let op = entry["op"].as_str().unwrap_or("-");
        let old = entry["old"].as_i64().unwrap_or(0);
        let new = entry["new"].as_i64().unwrap_or(0);
        let urn = entry["urn"].as_str().unwrap_or("");
        println!("#{seq} {kind} op={op} old={old} new={new} {urn}");
    }
}
