//! On-line Page Importance Computation (OPIC) cash ledger.
//!
//! Cash is conserved and flows from a source identifier to the identifiers it
//! references each time the source is visited; the running amount approximates
//! how often an identifier deserves a visit.
//!
//! The crate exposes:
//! - [`CashLedger`]: the in-memory ledger (initialise, distribute, finalise, estimate).
//! - [`LedgerController`]: loads and atomically saves the ledger to a binary state file.
//! - [`LedgerConfig`] / [`LoadOptions`]: state path and estimation defaults.
//! - [`codec`]: constants of the `#opicdb#` binary format.

pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod hash;
pub mod ledger;

pub use config::{LedgerConfig, LoadOptions};
pub use controller::LedgerController;
pub use error::{CodecError, LedgerError, Result};
pub use hash::{IdentifierKey, VIRTUAL_KEY, key_for};
pub use ledger::{CashBalance, CashEntry, CashLedger, LedgerStats};
