use std::path::PathBuf;

pub const DIR_ENV: &str = "KEEL_JOURNAL_DIR";
pub const SYNC_WRITES_ENV: &str = "KEEL_SYNC_WRITES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalConfig {
    /// Directory holding `base.json` and `journal.log`.
    pub dir: PathBuf,
    /// Fsync after every append. Turning this off trades crash safety for speed.
    pub sync_writes: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".keel/journal"),
            sync_writes: true,
        }
    }
}

impl JournalConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source; unset or unparsable values
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup(DIR_ENV).filter(|d| !d.trim().is_empty()) {
            config.dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(SYNC_WRITES_ENV) {
            match parse_flag(&raw) {
                Some(flag) => config.sync_writes = flag,
                None => log::warn!("ignoring {SYNC_WRITES_ENV}={raw:?}: expected a boolean"),
            }
        }
        config
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
