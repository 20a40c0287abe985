//! Self-healing code execution engine.
//!
//! A natural-language request is turned into a program by a language model,
//! run in a subprocess sandbox, and repaired from its own error output until it
//! succeeds or a bound is hit. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, result markers, fix
//!   trail, session state). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (process execution, model backends,
//!   prompt rendering, configuration, transcripts). Isolated behind traits to
//!   enable scripted doubles in tests.
//! - **[`agents`]**: Model-backed components (synthesis, decomposition,
//!   merging, intent classification).
//!
//! [`repair`] runs the bounded execute-and-fix loop and [`orchestrator`]
//! coordinates everything for one request.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod repair;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
