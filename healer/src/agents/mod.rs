//! Model-backed agents: synthesis, decomposition, merging and classification.

pub mod decomposer;
pub mod intent;
pub mod merger;
pub mod synthesizer;
