//! Infrastructure layer for the VCA ledger
//!
//! Contains trait definitions and implementations for:
//! - Ledger storage (SQLite, in-memory)
//! - VCA and rollup documents (filesystem, in-memory)
//! - Proving toolchain (snarkjs)
//! - Consent prompt (terminal)

mod error;
mod fs;
mod memory;
mod snarkjs;
pub mod sqlite;
mod terminal;
mod traits;

pub use error::*;
pub use fs::FsDocumentStore;
pub use memory::{InMemoryDocumentStore, InMemoryLedger};
pub use snarkjs::{SnarkjsConfig, SnarkjsToolchain, DEFAULT_PROVER_TIMEOUT};
pub use sqlite::SqliteLedger;
pub use terminal::{parse_answer, render_request, TerminalPrompt};
pub use traits::*;
