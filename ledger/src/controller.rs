use std::{
    fs,
    io::{self, BufWriter, Write},
    sync::Arc,
};

use tempfile::NamedTempFile;

use crate::{
    config::{LedgerConfig, LoadOptions},
    error::Result,
    ledger::CashLedger,
};

/// Owns the state file and moves the whole ledger to and from it.
///
/// Saves may overlap: each writes its own temp file and the last rename wins.
/// Other processes sharing the path are not coordinated.
pub struct LedgerController {
    config: LedgerConfig,
    ledger: Arc<CashLedger>,
}

/// A fully written and synced temp file that has not replaced the state file yet.
struct PendingSave {
    file: NamedTempFile,
    written: u64,
    generation: u64,
}

impl LedgerController {
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_ledger(config, Arc::new(CashLedger::new()))
    }

    pub fn with_ledger(config: LedgerConfig, ledger: Arc<CashLedger>) -> Self {
        Self { config, ledger }
    }

    /// Builds a controller and loads its state using the configured options.
    pub fn bootstrap(config: LedgerConfig) -> Result<Self> {
        config.ensure_dirs()?;
        let controller = Self::new(config);
        controller.load(controller.config.load_options())?;
        Ok(controller)
    }

    pub fn ledger(&self) -> Arc<CashLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn dirty(&self) -> bool {
        self.ledger.dirty()
    }

    /// Replaces the ledger with the file's contents. All-or-nothing: on any
    /// error the in-memory state is left as it was.
    pub fn load(&self, options: LoadOptions) -> Result<()> {
        let path = self.config.state_path();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound && options.ignore_missing => {
                log::debug!("no state file at {}; starting empty", path.display());
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        self.ledger.load_bytes(&bytes)?;
        log::debug!("loaded {} bytes of state from {}", bytes.len(), path.display());
        Ok(())
    }

    /// Writes the ledger to a fresh temp file beside the state file and renames
    /// it into place. Returns the number of bytes written.
    ///
    /// The ledger stays dirty if it changed while the save was in flight.
    pub fn save(&self) -> Result<u64> {
        let pending = self.write_temp()?;
        let written = pending.written;
        let generation = pending.generation;
        self.commit(pending)?;
        if !self.ledger.mark_clean_if(generation) {
            log::debug!("ledger changed during save; leaving it dirty");
        }
        log::debug!(
            "saved {} bytes of state to {}",
            written,
            self.config.state_path().display()
        );
        Ok(written)
    }

    fn write_temp(&self) -> Result<PendingSave> {
        let file = NamedTempFile::new_in(self.config.state_dir())?;
        let mut writer = BufWriter::new(file.as_file());
        let (written, generation) = self.ledger.write_versioned(&mut writer)?;
        writer.flush()?;
        drop(writer);
        file.as_file().sync_all()?;
        Ok(PendingSave {
            file,
            written,
            generation,
        })
    }

    fn commit(&self, pending: PendingSave) -> Result<()> {
        pending
            .file
            .persist(self.config.state_path())
            .map_err(|err| err.error)?;
        Ok(())
    }
}
