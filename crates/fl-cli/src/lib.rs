//! FocusLens CLI library.
//!
//! This crate provides the `fl` command-line interface: usage reports and
//! due-date alerts against the FocusLens backend.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::Config;
