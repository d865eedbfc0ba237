//! Graph Builders
//!
//! A rebuild runs in two passes over the datablocks of a scope:
//!
//! 1. The [`NodeBuilder`] walks the store starting from the scope's roots,
//!    following every reference, and creates the id, component and
//!    operation nodes of each datablock it reaches.
//!
//! 2. The [`RelationBuilder`] visits every datablock now present in the
//!    graph and declares the relations between operations.
//!
//! Operation kinds that live outside this crate (host modifiers and
//! constraints) take part in the second pass through [`RelationProvider`],
//! which receives a [`DepsNodeHandle`] for the operation being built.

mod handle;
mod nodes;
mod providers;
mod relations;

use std::fmt::Debug;

use crate::store::DatablockId;

pub use handle::DepsNodeHandle;
pub use nodes::NodeBuilder;
pub use relations::RelationBuilder;

/// Declares the dependencies of one modifier or constraint.
///
/// Implementations are shared between threads through `Arc`, so they must
/// be `Send + Sync`.
pub trait RelationProvider: Send + Sync + Debug {
    /// Add the relations the operation behind `handle` depends on.
    fn update_depsgraph(&self, handle: &mut DepsNodeHandle<'_, '_>);

    /// Datablocks the node builder must pull into the graph so that the
    /// relations declared above can be resolved.
    fn referenced_ids(&self) -> Vec<DatablockId> {
        Vec::new()
    }
}
