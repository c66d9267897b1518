//! Built-in module passes.
//!
//! - [`PruneUnreachableBlocks`] cleans up blocks the lowering left behind
//!   after a `return`.
//! - [`VerifyControlFlow`] and [`VerifyProfileConformance`] check the
//!   final module before it is printed.

mod prune;
mod verify;

pub use prune::PruneUnreachableBlocks;
pub use verify::{VerifyControlFlow, VerifyProfileConformance};
