//! CLI module for the dualmatte library
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use config::ReferenceSpec;
pub use main_impl::{main, Cli, Command, GenerateArgs, RecoverArgs};
