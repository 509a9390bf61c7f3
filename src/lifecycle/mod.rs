//! VCA lifecycle services
//!
//! generate -> confirm -> post, plus batch minting and rollup posting. Each
//! service works against the storage and collaborator traits in `infra`.

mod batch;
mod confirmation;
mod generate;
mod posting;

pub use batch::*;
pub use confirmation::*;
pub use generate::*;
pub use posting::*;
