//! Cryptographic utilities for the VCA ledger
//!
//! Canonical JSON hashing used to fingerprint proofs.

mod hash;

pub use hash::*;
