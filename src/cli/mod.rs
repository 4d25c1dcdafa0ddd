//! Command-line interface for the ID photo service
//!
//! Only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli, Command, CreateArgs};
