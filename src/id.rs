//! Identity types: process identifiers and remote-reference identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Small non-negative integer assigned at cluster formation. Process `0` is
/// always the initiating client.
pub type ProcessId = u32;

/// The client / initiator is always process 0.
pub const CLIENT_ID: ProcessId = 0;

/// A remote-reference identifier: `(where, whence, id)`.
///
/// `where` is the process that owns the computation (executes and stores the
/// result). `whence` is the process that created the handle. `id` is a
/// monotone per-process counter minted by `whence`. Equality and hashing only
/// ever consider `(whence, id)`: `where` is a transport artifact and can be
/// recovered from the registry once the handle reaches its owner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rid {
    pub owner: ProcessId,
    pub whence: ProcessId,
    pub id: u64,
}

impl Rid {
    pub fn new(owner: ProcessId, whence: ProcessId, id: u64) -> Self {
        Self { owner, whence, id }
    }

    /// The key used for equality, hashing and uniquing: `(whence, id)`.
    pub fn key(&self) -> (ProcessId, u64) {
        (self.whence, self.id)
    }
}

impl PartialEq for Rid {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Rid {}

impl std::hash::Hash for Rid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rid({}, {}, {})", self.owner, self.whence, self.id)
    }
}

/// Monotone per-process counter used to mint fresh `Rid`s.
#[derive(Debug, Default)]
pub struct IdGen {
    next: u64,
}

impl IdGen {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Mints a fresh id for a computation owned by `owner`, created by `me`.
    pub fn fresh(&mut self, owner: ProcessId, me: ProcessId) -> Rid {
        let id = self.next;
        self.next += 1;
        Rid::new(owner, me, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_owner() {
        let a = Rid::new(1, 2, 7);
        let b = Rid::new(99, 2, 7);
        assert_eq!(a, b);

        let c = Rid::new(1, 3, 7);
        assert_ne!(a, c);
    }

    #[test]
    fn id_gen_is_monotone() {
        let mut gen = IdGen::new();
        let a = gen.fresh(2, 1);
        let b = gen.fresh(2, 1);
        assert_ne!(a, b);
        assert_eq!(a.id + 1, b.id);
    }
}
