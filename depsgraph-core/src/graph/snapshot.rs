//! Diagnostic snapshot of a graph's relations.
//!
//! Relations are rendered with their operation keys rather than indices, and
//! sorted, so two builds of the same scene compare equal no matter in which
//! order builder entry points ran.

use serde::{Deserialize, Serialize};

use super::relation::RelationFlag;
use super::Depsgraph;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationRecord {
    pub from: String,
    pub to: String,
    pub name: String,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub id_nodes: usize,
    pub operations: usize,
    pub relations: Vec<RelationRecord>,
}

impl GraphSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn flag_name(flag: RelationFlag) -> String {
    format!("{flag:?}")
}

impl Depsgraph {
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut relations: Vec<RelationRecord> = self
            .relations
            .iter()
            .map(|rel| RelationRecord {
                from: self.operation_label(rel.from),
                to: self.operation_label(rel.to),
                name: rel.name.clone(),
                flags: rel.flags.iter().map(flag_name).collect(),
            })
            .collect();
        relations.sort();

        GraphSnapshot {
            id_nodes: self.id_nodes.len(),
            operations: self.operations.len(),
            relations,
        }
    }
}
