//! Depsgraph Core
//!
//! This crate builds and maintains the dependency graph of a 3D scene: which
//! piece of work (an operation) has to run before which other, and which
//! operations must run again after an edit.
//!
//! It implements:
//!
//! - An in-memory datablock store (objects, meshes, cameras, armatures,
//!   collections, scenes, node trees, cache files)
//! - A two pass graph builder with pluggable relation providers
//! - Builder pipelines selecting what a graph evaluates
//! - Dirty propagation honoring per-relation flush policies
//! - A deterministic scheduler and a parallel evaluator
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `store`: datablocks and their typed payloads
//! - `graph`: node arenas, keys, relations and recalc masks
//! - `builder`: node and relation builders, construction handles
//! - `pipeline`: root selection per evaluation scope, lazy rebuilds
//! - `tag`: "this changed" events and propagation
//! - `eval`: scheduling and evaluation of dirty operations
//! - `registry`: one graph per evaluation scope
//!
//! # Example
//!
//! ```rust,ignore
//! use depsgraph_core::{pipeline, tag, Depsgraph, EvaluationScope, GraphConfig, Recalc, UpdateSource};
//! use depsgraph_core::store::{DatablockStore, ObjectType};
//!
//! let mut store = DatablockStore::new();
//! let parent = store.add_object("Empty", ObjectType::Empty);
//! let child = store.add_object("Cube", ObjectType::Mesh);
//! store.set_parent(child, Some(parent))?;
//!
//! let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
//! pipeline::relations_update(&mut graph, &store)?;
//! tag::clear_tags(&mut graph);
//!
//! // Moving the parent dirties the child's transform too.
//! tag::id_tag_update(&mut graph, parent, Recalc::TRANSFORM, UpdateSource::UserEdit);
//! let plan = depsgraph_core::eval::schedule(&graph);
//! plan.check()?;
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod eval;
pub mod graph;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod tag;

pub use builder::{DepsNodeHandle, RelationProvider};
pub use config::{GraphConfig, MissingTargetPolicy};
pub use error::{DepsgraphError, Result};
pub use eval::{CancellationToken, EvalReport, Evaluator, OperationBody, OperationContext, Schedule};
pub use graph::{
    ComponentKey, Depsgraph, NodeType, OperationCode, OperationKey, Recalc, RelationFlag, RelationFlags,
};
pub use pipeline::{BuilderPipeline, EvaluationScope};
pub use registry::{GraphRegistry, SharedGraph};
pub use tag::UpdateSource;
