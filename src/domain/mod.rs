//! Domain models for the VCA ledger
//!
//! VCA records, consent, proof attestations, ledger entries and batch
//! rollups. Nothing here performs I/O.

mod attestation;
mod consent;
mod ledger;
mod rollup;
mod types;
mod vca;

pub use attestation::*;
pub use consent::*;
pub use ledger::*;
pub use rollup::*;
pub use types::*;
pub use vca::*;
