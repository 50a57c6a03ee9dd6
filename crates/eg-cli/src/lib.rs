//! Engagement engine CLI library.
//!
//! This crate provides the CLI interface for replaying signal traces and
//! inspecting stored identity.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, ReplayArgs};
pub use config::Config;
