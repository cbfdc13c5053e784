use std::collections::HashMap;

use parking_lot::RwLock;
use time::{Duration, OffsetDateTime};

use crate::{
    error::{LedgerError, Result},
    hash::{IdentifierKey, VIRTUAL_KEY, key_for},
};

/// Point-in-time view of one key.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CashEntry {
    pub history: f64,
    pub current: f64,
    pub cleared: OffsetDateTime,
}

impl CashEntry {
    /// Decays the history baseline linearly over `interval`; past the interval only
    /// current cash counts, scaled down by how far past it the entry is.
    fn estimate(&self, interval: Duration, observed: OffsetDateTime) -> f64 {
        let interval = interval.as_seconds_f64();
        let elapsed = (observed - self.cleared).as_seconds_f64();
        if elapsed < interval {
            self.history * (interval - elapsed) / interval + self.current
        } else {
            self.current * (interval / elapsed)
        }
    }
}

/// A history/current pair of cash amounts.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CashBalance {
    pub history: f64,
    pub current: f64,
}

impl CashBalance {
    /// History plus current cash.
    pub fn total(&self) -> f64 {
        self.history + self.current
    }
}

/// Entry counts and totals taken under one read lock.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LedgerStats {
    pub current_entries: usize,
    pub history_entries: usize,
    pub cleared_entries: usize,
    pub sums: CashBalance,
    pub virtual_reserve: CashBalance,
}

/// The three mappings that make up the persisted ledger.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct LedgerState {
    pub(crate) current: HashMap<IdentifierKey, f64>,
    pub(crate) history: HashMap<IdentifierKey, f64>,
    pub(crate) cleared: HashMap<IdentifierKey, OffsetDateTime>,
}

impl LedgerState {
    // Absent keys read as zero cash and an epoch clearing time.
    fn entry(&self, key: IdentifierKey) -> CashEntry {
        CashEntry {
            history: self.history.get(&key).copied().unwrap_or_default(),
            current: self.current.get(&key).copied().unwrap_or_default(),
            cleared: self
                .cleared
                .get(&key)
                .copied()
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        }
    }

    fn current_mut(&mut self, key: IdentifierKey) -> &mut f64 {
        self.current.entry(key).or_insert(0.0)
    }

    fn sums(&self) -> CashBalance {
        CashBalance {
            history: self.history.values().sum(),
            current: self.current.values().sum(),
        }
    }

    fn virtual_reserve(&self) -> CashBalance {
        let entry = self.entry(VIRTUAL_KEY);
        CashBalance {
            history: entry.history,
            current: entry.current,
        }
    }
}

struct Inner {
    state: LedgerState,
    dirty: bool,
    /// Bumped by every mutation and every state swap.
    generation: u64,
}

impl Inner {
    fn touch(&mut self) {
        self.dirty = true;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Process-wide OPIC cash ledger guarded by one read/write lock.
pub struct CashLedger {
    inner: RwLock<Inner>,
}

impl Default for CashLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CashLedger {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: LedgerState::default(),
                dirty: false,
                generation: 0,
            }),
        }
    }

    /// Resets the current cash of every identifier to an even share of `cash`.
    pub fn initialise<S: AsRef<[u8]>>(&self, cash: f64, identifiers: &[S]) -> Result<()> {
        if identifiers.is_empty() {
            return Err(LedgerError::invalid(
                "cannot initialise an empty identifier set",
            ));
        }
        if !cash.is_finite() || cash < 0.0 {
            return Err(LedgerError::invalid(format!(
                "initial cash must be finite and non-negative, got {cash}"
            )));
        }

        let share = cash / identifiers.len() as f64;
        let mut guard = self.inner.write();
        for identifier in identifiers {
            guard.state.current.insert(key_for(identifier), share);
        }
        guard.touch();
        Ok(())
    }

    /// Clears `source` at `observed`, splitting its current cash between `outputs`
    /// and the virtual reserve. Returns the amount distributed.
    pub fn distribute<S: AsRef<[u8]>>(
        &self,
        source: impl AsRef<[u8]>,
        outputs: &[S],
        observed: OffsetDateTime,
    ) -> f64 {
        let source = key_for(source);
        let mut guard = self.inner.write();
        let state = &mut guard.state;

        let cash = state.current.get(&source).copied().unwrap_or_default();
        let share = cash / (outputs.len() + 1) as f64;

        *state.current_mut(VIRTUAL_KEY) += share;
        for output in outputs {
            let key = key_for(output);
            if !state.current.contains_key(&key) {
                state.cleared.entry(key).or_insert(observed);
            }
            *state.current_mut(key) += share;
        }

        // The population count includes the reserve itself.
        let skim = state.current[&VIRTUAL_KEY] / (state.current.len() + 1) as f64;
        *state.current_mut(VIRTUAL_KEY) -= skim;

        state.current.insert(source, skim);
        state.cleared.insert(source, observed);
        state.history.insert(source, cash);

        guard.touch();
        cash
    }

    /// Retires identifiers: current cash becomes the history baseline and is zeroed.
    pub fn finalise<S: AsRef<[u8]>>(&self, identifiers: &[S]) {
        let mut guard = self.inner.write();
        for identifier in identifiers {
            let key = key_for(identifier);
            let current = guard.state.current.get(&key).copied().unwrap_or_default();
            guard.state.history.insert(key, current);
            guard.state.current.insert(key, 0.0);
        }
        if !identifiers.is_empty() {
            guard.touch();
        }
    }

    pub fn get(&self, identifier: impl AsRef<[u8]>) -> CashEntry {
        self.get_key(key_for(identifier))
    }

    pub fn get_key(&self, key: IdentifierKey) -> CashEntry {
        self.inner.read().state.entry(key)
    }

    pub fn get_many<S: AsRef<[u8]>>(&self, identifiers: &[S]) -> Vec<CashEntry> {
        let guard = self.inner.read();
        identifiers
            .iter()
            .map(|identifier| guard.state.entry(key_for(identifier)))
            .collect()
    }

    pub fn estimate(
        &self,
        identifier: impl AsRef<[u8]>,
        interval: Duration,
        observed: OffsetDateTime,
    ) -> Result<f64> {
        self.estimate_key(key_for(identifier), interval, observed)
    }

    pub fn estimate_key(
        &self,
        key: IdentifierKey,
        interval: Duration,
        observed: OffsetDateTime,
    ) -> Result<f64> {
        validate_interval(interval)?;
        Ok(self.get_key(key).estimate(interval, observed))
    }

    pub fn estimate_many<S: AsRef<[u8]>>(
        &self,
        identifiers: &[S],
        interval: Duration,
        observed: OffsetDateTime,
    ) -> Result<Vec<f64>> {
        let keys: Vec<IdentifierKey> = identifiers.iter().map(key_for).collect();
        self.estimate_keys(&keys, interval, observed)
    }

    pub fn estimate_keys(
        &self,
        keys: &[IdentifierKey],
        interval: Duration,
        observed: OffsetDateTime,
    ) -> Result<Vec<f64>> {
        validate_interval(interval)?;
        let guard = self.inner.read();
        Ok(keys
            .iter()
            .map(|key| guard.state.entry(*key).estimate(interval, observed))
            .collect())
    }

    /// Tops the virtual reserve up to `target` total cash. Never lowers it.
    pub fn ensure_balance(&self, target: f64) -> Result<()> {
        if !target.is_finite() {
            return Err(LedgerError::invalid(format!(
                "balance target must be finite, got {target}"
            )));
        }
        let mut guard = self.inner.write();
        let total = guard.state.sums().total();
        if total < target {
            *guard.state.current_mut(VIRTUAL_KEY) += target - total;
            guard.touch();
        }
        Ok(())
    }

    /// (history sum, current sum). Ideally equal; they drift apart over time.
    pub fn sums(&self) -> CashBalance {
        self.inner.read().state.sums()
    }

    pub fn virtual_reserve(&self) -> CashBalance {
        self.inner.read().state.virtual_reserve()
    }

    pub fn stats(&self) -> LedgerStats {
        let guard = self.inner.read();
        LedgerStats {
            current_entries: guard.state.current.len(),
            history_entries: guard.state.history.len(),
            cleared_entries: guard.state.cleared.len(),
            sums: guard.state.sums(),
            virtual_reserve: guard.state.virtual_reserve(),
        }
    }

    /// True if anything changed since the last load or save.
    pub fn dirty(&self) -> bool {
        self.inner.read().dirty
    }

    /// Runs `f` against the state under the shared lock.
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> T {
        f(&self.inner.read().state)
    }

    /// Like [`Self::with_state`], also returning the generation `f` saw.
    pub(crate) fn with_state_at<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> (T, u64) {
        let guard = self.inner.read();
        (f(&guard.state), guard.generation)
    }

    /// Swaps in a fully decoded state and marks it in sync with its source.
    pub(crate) fn replace_state(&self, state: LedgerState) {
        let mut guard = self.inner.write();
        guard.state = state;
        guard.generation = guard.generation.wrapping_add(1);
        guard.dirty = false;
    }

    /// Clears the dirty flag unless the ledger changed after `generation`.
    /// Returns whether it was cleared.
    pub(crate) fn mark_clean_if(&self, generation: u64) -> bool {
        let mut guard = self.inner.write();
        if guard.generation != generation {
            return false;
        }
        guard.dirty = false;
        true
    }
}

fn validate_interval(interval: Duration) -> Result<()> {
    if !interval.is_positive() {
        return Err(LedgerError::invalid(format!(
            "estimate interval must be positive, got {interval}"
        )));
    }
    Ok(())
}
