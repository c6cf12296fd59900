//! Liveness Ledger
//!
//! Tracks when each monitored program last sent a heartbeat and whether the
//! current silence has already been alerted on, plus the append-only record log
//! shared by the ingest and alerting paths.

mod ledger;
mod records;

pub use ledger::{Ledger, LedgerEntry, StaleProgram};
pub use records::{AccessRecord, AlertRecord, RecordLog};

use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Record log error: {0}")]
    RecordLog(#[from] std::io::Error),
}
