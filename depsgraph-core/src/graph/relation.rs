//! Relations
//!
//! A relation is a directed edge between two operations. Every relation
//! orders its endpoints; its flags only decide whether dirtiness may travel
//! along it.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::node::OperationId;

/// Named capabilities of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationFlag {
    /// Dirtiness propagates. Implied when no other flag is set.
    Flush,
    /// Ordering only, dirtiness never propagates.
    NoFlush,
    /// Dirtiness propagates only for changes made by direct user edits.
    FlushUserEditOnly,
}

impl RelationFlag {
    const ALL: [RelationFlag; 3] = [
        RelationFlag::Flush,
        RelationFlag::NoFlush,
        RelationFlag::FlushUserEditOnly,
    ];

    fn bit(self) -> u8 {
        match self {
            RelationFlag::Flush => 1 << 0,
            RelationFlag::NoFlush => 1 << 1,
            RelationFlag::FlushUserEditOnly => 1 << 2,
        }
    }
}

/// How a relation treats dirtiness, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    Always,
    Never,
    UserEditOnly,
}

/// Set of [`RelationFlag`]s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RelationFlags(u8);

impl RelationFlags {
    /// No flag set. Behaves as [`RelationFlag::Flush`].
    pub fn empty() -> Self {
        Self(0)
    }

    /// Add a flag in place.
    pub fn insert(&mut self, flag: RelationFlag) {
        self.0 |= flag.bit();
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, flag: RelationFlag) -> Self {
        self.insert(flag);
        self
    }

    /// Whether `flag` is set.
    pub fn contains(&self, flag: RelationFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Union of two sets, used when the same relation is declared twice.
    pub fn union(self, other: RelationFlags) -> Self {
        Self(self.0 | other.0)
    }

    /// The set flags in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = RelationFlag> + '_ {
        RelationFlag::ALL.into_iter().filter(|flag| self.contains(*flag))
    }

    /// `NoFlush` wins over everything, `FlushUserEditOnly` over plain flush.
    pub fn flush_policy(&self) -> FlushPolicy {
        if self.contains(RelationFlag::NoFlush) {
            FlushPolicy::Never
        } else if self.contains(RelationFlag::FlushUserEditOnly) {
            FlushPolicy::UserEditOnly
        } else {
            FlushPolicy::Always
        }
    }
}

impl From<RelationFlag> for RelationFlags {
    fn from(flag: RelationFlag) -> Self {
        Self::empty().with(flag)
    }
}

impl fmt::Debug for RelationFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Stable index of a relation inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub(crate) u32);

impl RelationId {
    /// Position in the relation arena.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Directed edge: `from` is evaluated before `to`.
#[derive(Debug, Clone)]
pub struct Relation {
    pub from: OperationId,
    pub to: OperationId,
    /// Diagnostics only.
    pub name: String,
    pub flags: RelationFlags,
}
