//! Per-request state: context store, fix trail and tried variants.

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::core::context::ContextStore;
use crate::core::trail::{FixTrail, TriedVariants};

/// State owned by exactly one top-level request.
///
/// Created when the request starts and dropped when it ends; nothing in it is
/// shared across requests.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub context: ContextStore,
    pub trail: FixTrail,
    pub tried: TriedVariants,
}

impl Session {
    pub fn new(request: &str, trail_capacity: usize) -> Self {
        Self::with_id(session_id(request), trail_capacity)
    }

    pub fn with_id(id: impl Into<String>, trail_capacity: usize) -> Self {
        Self {
            id: id.into(),
            context: ContextStore::new(),
            trail: FixTrail::with_capacity(trail_capacity),
            tried: TriedVariants::default(),
        }
    }
}

fn session_id(request: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(request.as_bytes());
    hasher.update(nanos.to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("session-{}", &digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_empty() {
        let session = Session::new("print hello", 4);
        assert!(session.id.starts_with("session-"));
        assert_eq!(session.id.len(), "session-".len() + 8);
        assert!(session.context.is_empty());
        assert!(session.trail.is_empty());
        assert!(session.tried.is_empty());
    }
}
