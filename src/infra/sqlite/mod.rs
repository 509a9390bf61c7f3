//! SQLite implementations
//!
//! The durable ledger. Entries are stored as their JSON document alongside
//! the columns needed for ordering and duplicate checks.

mod ledger;

pub use ledger::*;
