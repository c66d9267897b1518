//! CLI command implementations.

pub mod compile;
pub mod profiles;
pub mod version;
pub mod worker;
