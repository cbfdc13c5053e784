use std::{
    fs,
    path::{Path, PathBuf},
};

use time::Duration;

use crate::error::Result;

pub const DEFAULT_STATE_FILE: &str = "opic.db";
pub const DEFAULT_INTERVAL: Duration = Duration::hours(24);
pub const DEFAULT_INITIAL_CASH: f64 = 1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Treat a missing state file as an empty ledger instead of an error.
    pub ignore_missing: bool,
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub state_path: PathBuf,
    /// Target revisit interval used when estimating.
    pub interval: Duration,
    pub initial_cash: f64,
    pub ignore_missing: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE)
    }
}

impl LedgerConfig {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            interval: DEFAULT_INTERVAL,
            initial_cash: DEFAULT_INITIAL_CASH,
            ignore_missing: true,
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Directory holding the state file; temp files are created here so the
    /// final rename stays on one filesystem.
    pub fn state_dir(&self) -> &Path {
        match self.state_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            ignore_missing: self.ignore_missing,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
