//! Command implementations.

pub mod replay;
pub mod status;
