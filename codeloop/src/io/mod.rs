//! I/O helpers: processes, storage, provider calls and the console.

pub mod classifier;
pub mod config;
pub mod gateway;
pub mod memory;
pub mod operator;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod transcript;
