//! Hierarchical identifiers used across the engine.
//!
//! An [`Identifier`] is a sequence of integers. Children are derived with
//! [`Identifier::append`], so a deployment id reads as `<unit id>.<n>` and a
//! unit id as `<plan id>.<n>`. Downstream crates use the typed wrappers and
//! never raw integer vectors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque hierarchical key. Equality and ordering are structural.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(Vec<u64>);

impl Identifier {
    pub fn new(parts: Vec<u64>) -> Self {
        Self(parts)
    }

    pub fn from_parts(parts: &[u64]) -> Self {
        Self(parts.to_vec())
    }

    pub fn parts(&self) -> &[u64] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Child key `self.n`; `self` is left untouched.
    pub fn append(&self, n: u64) -> Self {
        let mut parts = Vec::with_capacity(self.0.len() + 1);
        parts.extend_from_slice(&self.0);
        parts.push(n);
        Self(parts)
    }

    /// In-place variant of [`Identifier::append`].
    pub fn push(&mut self, n: u64) {
        self.0.push(n);
    }

    /// Parent key, or `None` for a single-component identifier.
    pub fn parent(&self) -> Option<Self> {
        match self.0.len() {
            0 | 1 => None,
            n => Some(Self(self.0[..n - 1].to_vec())),
        }
    }

    /// Rendering usable inside SQL table names (`1_4_2`).
    pub fn to_table_suffix(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        parts.join("_")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

macro_rules! new_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
        #[serde(transparent)]
        pub struct $name(Identifier);

        impl $name {
            pub fn new(id: Identifier) -> Self {
                Self(id)
            }
            pub fn from_parts(parts: &[u64]) -> Self {
                Self(Identifier::from_parts(parts))
            }
            pub fn identifier(&self) -> &Identifier {
                &self.0
            }
            pub fn append(&self, n: u64) -> Self {
                Self(self.0.append(n))
            }
            pub fn to_table_suffix(&self) -> String {
                self.0.to_table_suffix()
            }
        }

        impl From<Identifier> for $name {
            fn from(id: Identifier) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

new_id!(OperatorId);
new_id!(PlanId);
new_id!(UnitId);
new_id!(DeploymentId);

/// Explicit counter handing out children of a fixed prefix.
///
/// Owned by whoever mints ids (compile plan, tracker plan, tracker node) so
/// identifier generation stays reentrant and testable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdSequence {
    prefix: Identifier,
    next: u64,
}

impl IdSequence {
    /// Sequence yielding `prefix.1`, `prefix.2`, ...
    pub fn new(prefix: Identifier) -> Self {
        Self { prefix, next: 1 }
    }

    /// Sequence over top-level identifiers `1`, `2`, ...
    pub fn root() -> Self {
        Self::new(Identifier::default())
    }

    pub fn next_id(&mut self) -> Identifier {
        let id = self.prefix.append(self.next);
        self.next += 1;
        id
    }

    pub fn next_typed<T: From<Identifier>>(&mut self) -> T {
        T::from(self.next_id())
    }

    /// Make sure future ids are strictly greater than `n` (used when ids
    /// were assigned externally, e.g. by a plan file).
    pub fn skip_past(&mut self, n: u64) {
        if self.next <= n {
            self.next = n + 1;
        }
    }

    pub fn prefix(&self) -> &Identifier {
        &self.prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_leaves_original_untouched() {
        let base = Identifier::from_parts(&[3]);
        let child = base.append(7);
        assert_eq!(base.parts(), &[3]);
        assert_eq!(child.parts(), &[3, 7]);
        assert_eq!(child.parent(), Some(base));
        assert_eq!(child.to_string(), "3.7");
        assert_eq!(child.to_table_suffix(), "3_7");
    }

    #[test]
    fn sequence_is_monotonic_and_prefixed() {
        let mut seq = IdSequence::new(Identifier::from_parts(&[9]));
        let a: UnitId = seq.next_typed();
        let b: UnitId = seq.next_typed();
        assert_eq!(a, UnitId::from_parts(&[9, 1]));
        assert_eq!(b, UnitId::from_parts(&[9, 2]));
        seq.skip_past(10);
        assert_eq!(seq.next_id(), Identifier::from_parts(&[9, 11]));
    }

    #[test]
    fn typed_ids_compare_structurally() {
        let a = OperatorId::from_parts(&[1, 2]);
        let b = OperatorId::from_parts(&[1]).append(2);
        assert_eq!(a, b);
        assert!(OperatorId::from_parts(&[1]) < a);
    }
}
