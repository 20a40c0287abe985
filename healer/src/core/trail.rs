//! Bounded history of repair attempts and the set of code variants tried.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::types::FixAttempt;

pub const DEFAULT_TRAIL_CAPACITY: usize = 10;

/// Retention window over the most recent [`FixAttempt`]s; oldest entries are evicted.
#[derive(Debug, Clone)]
pub struct FixTrail {
    attempts: VecDeque<FixAttempt>,
    capacity: usize,
}

impl Default for FixTrail {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRAIL_CAPACITY)
    }
}

impl FixTrail {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            attempts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, attempt: FixAttempt) {
        if self.attempts.len() == self.capacity {
            self.attempts.pop_front();
        }
        self.attempts.push_back(attempt);
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FixAttempt> {
        self.attempts.iter()
    }

    pub fn to_vec(&self) -> Vec<FixAttempt> {
        self.attempts.iter().cloned().collect()
    }

    /// Summaries of the `last` most recent attempts, oldest first.
    pub fn digest(&self, last: usize, preview_chars: usize) -> Vec<AttemptDigest> {
        summarize(&self.attempts, last, preview_chars)
    }
}

/// Summaries of the `last` entries of `attempts`, oldest first.
pub fn summarize<'a, I>(attempts: I, last: usize, preview_chars: usize) -> Vec<AttemptDigest>
where
    I: IntoIterator<Item = &'a FixAttempt>,
    I::IntoIter: ExactSizeIterator,
{
    let attempts = attempts.into_iter();
    let skip = attempts.len().saturating_sub(last);
    attempts
        .skip(skip)
        .map(|attempt| AttemptDigest {
            depth: attempt.depth,
            error_preview: preview(&attempt.error_text, preview_chars),
        })
        .collect()
}

/// Compact view of one attempt for repair prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptDigest {
    pub depth: u32,
    pub error_preview: String,
}

fn preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// SHA-256 content hash of a code variant.
///
/// Line endings are normalised and surrounding whitespace trimmed first, so
/// cosmetic differences do not count as a new variant.
pub fn code_hash(code: &str) -> String {
    let normalized = code.replace("\r\n", "\n");
    let digest = Sha256::digest(normalized.trim().as_bytes());
    hex::encode(digest)
}

/// Hashes of every code variant executed within one session.
#[derive(Debug, Clone, Default)]
pub struct TriedVariants {
    hashes: HashSet<String>,
}

impl TriedVariants {
    /// Record `code`; returns `false` when it was already tried.
    pub fn insert(&mut self, code: &str) -> bool {
        self.hashes.insert(code_hash(code))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.hashes.contains(&code_hash(code))
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(depth: u32, error: &str) -> FixAttempt {
        FixAttempt {
            depth,
            prior_code: format!("v{depth}"),
            revised_code: format!("v{}", depth + 1),
            error_text: error.to_string(),
        }
    }

    #[test]
    fn trail_evicts_oldest_past_capacity() {
        let mut trail = FixTrail::with_capacity(2);
        trail.push(attempt(0, "a"));
        trail.push(attempt(1, "b"));
        trail.push(attempt(2, "c"));
        let depths: Vec<u32> = trail.iter().map(|a| a.depth).collect();
        assert_eq!(depths, vec![1, 2]);
    }

    #[test]
    fn digest_keeps_most_recent_and_truncates_errors() {
        let mut trail = FixTrail::default();
        trail.push(attempt(0, "first"));
        trail.push(attempt(1, "second error is long"));
        trail.push(attempt(2, "third"));

        let digest = trail.digest(2, 6);
        assert_eq!(digest.len(), 2);
        assert_eq!(digest[0].depth, 1);
        assert_eq!(digest[0].error_preview, "second...");
        assert_eq!(digest[1].error_preview, "third");
    }

    #[test]
    fn hash_ignores_line_endings_and_outer_whitespace() {
        assert_eq!(code_hash("print(1)\r\nprint(2)\n"), code_hash("print(1)\nprint(2)"));
        assert_ne!(code_hash("print(1)"), code_hash("print(2)"));
    }

    #[test]
    fn tried_variants_detect_repeats() {
        let mut tried = TriedVariants::default();
        assert!(tried.insert("x = 1"));
        assert!(!tried.insert("x = 1\n"));
        assert!(tried.contains("x = 1"));
        assert_eq!(tried.len(), 1);
    }
}
