//! Deterministic, pure logic shared by the healing engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod context;
pub mod extract;
pub mod language;
pub mod session;
pub mod trail;
pub mod types;
