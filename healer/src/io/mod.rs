//! I/O helpers: processes, sandboxing, model backends, prompts and config.

pub mod config;
pub mod limits;
pub mod model;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod transcript;
