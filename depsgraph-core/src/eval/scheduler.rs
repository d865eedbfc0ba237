//! Evaluation Order
//!
//! The scheduler decides in which order dirty operations run. Operations of
//! clean components are skipped entirely.
//!
//! # Algorithm
//!
//! 1. Collect the dirty operations: those flagged for update whose component
//!    carries recalc flags.
//! 2. Sort them topologically over the relations connecting two dirty
//!    operations. Both flushing and non-flushing relations order evaluation.
//! 3. Ties are broken by the smallest operation index, so a given graph
//!    always yields the same order.
//! 4. Group the dirty operations into independent subgraphs: sets that no
//!    relation path connects in either direction.
//!
//! # Cycles
//!
//! Ordering-only relations may close a loop. When the sort stalls, the
//! non-flushing relations between stalled operations are relaxed one target
//! at a time, smallest operation first, and the sort resumes. Relaxed
//! relations are listed in [`Schedule::relaxed`] and impose no order.
//!
//! A loop made of flushing relations cannot be relaxed. Its operations, and
//! everything that depends on them, end up in [`Schedule::blocked`] and are
//! left out of the order. The rest of the graph is scheduled normally.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use tracing::{debug, warn};

use crate::error::{DepsgraphError, Result};
use crate::graph::{Depsgraph, FlushPolicy, OperationId, RelationId};

/// Execution plan of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    order: Vec<OperationId>,
    subgraphs: Vec<Vec<OperationId>>,
    relaxed: Vec<RelationId>,
    blocked: Vec<OperationId>,
}

impl Schedule {
    /// Dirty operations in a valid execution order.
    pub fn order(&self) -> &[OperationId] {
        &self.order
    }

    /// Independent groups of operations, each in execution order. Groups
    /// are sorted by their smallest operation.
    pub fn subgraphs(&self) -> &[Vec<OperationId>] {
        &self.subgraphs
    }

    /// Ordering-only relations dropped to break loops, sorted.
    pub fn relaxed(&self) -> &[RelationId] {
        &self.relaxed
    }

    /// Whether `relation` was dropped to break a loop.
    pub fn is_relaxed(&self, relation: RelationId) -> bool {
        self.relaxed.binary_search(&relation).is_ok()
    }

    /// Dirty operations on or behind a flushing cycle, sorted. They are not
    /// part of [`order`](Self::order).
    pub fn blocked(&self) -> &[OperationId] {
        &self.blocked
    }

    /// Fail with [`DepsgraphError::DependencyCycle`] if any operation is
    /// blocked.
    pub fn check(&self) -> Result<()> {
        if self.blocked.is_empty() {
            Ok(())
        } else {
            Err(DepsgraphError::DependencyCycle(self.blocked.clone()))
        }
    }

    /// Number of operations in the order.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Operations that must run in the next evaluation pass.
pub fn dirty_operations(graph: &Depsgraph) -> Vec<OperationId> {
    graph
        .operations()
        .filter(|(_, op)| op.needs_update() && !graph.component(op.component()).is_clean())
        .map(|(id, _)| id)
        .collect()
}

/// Dependencies of `operation` that are part of `set`, skipping the
/// `relaxed` relations.
pub(crate) fn dependencies_in<'g>(
    graph: &'g Depsgraph,
    operation: OperationId,
    set: &'g HashMap<OperationId, usize>,
    relaxed: &'g [RelationId],
) -> impl Iterator<Item = OperationId> + 'g {
    graph
        .operation(operation)
        .inlinks()
        .iter()
        .filter(move |&&relation| relaxed.binary_search(&relation).is_err())
        .map(move |&relation| graph.relation(relation).from)
        .filter(move |from| set.contains_key(from))
}

/// Dependents of `operation` that are part of `set`, skipping the `relaxed`
/// relations.
pub(crate) fn dependents_in<'g>(
    graph: &'g Depsgraph,
    operation: OperationId,
    set: &'g HashMap<OperationId, usize>,
    relaxed: &'g [RelationId],
) -> impl Iterator<Item = OperationId> + 'g {
    graph
        .operation(operation)
        .outlinks()
        .iter()
        .filter(move |&&relation| relaxed.binary_search(&relation).is_err())
        .map(move |&relation| graph.relation(relation).to)
        .filter(move |to| set.contains_key(to))
}

/// Build the execution plan for the dirty part of `graph`.
pub fn schedule(graph: &Depsgraph) -> Schedule {
    let dirty = dirty_operations(graph);
    // Position of each dirty operation, doubles as set membership.
    let index: HashMap<OperationId, usize> = dirty.iter().enumerate().map(|(i, &op)| (op, i)).collect();

    let mut in_degree: HashMap<OperationId, usize> = HashMap::with_capacity(dirty.len());
    let mut ready = BinaryHeap::new();
    for &op in &dirty {
        let degree = dependencies_in(graph, op, &index, &[]).count();
        in_degree.insert(op, degree);
        if degree == 0 {
            ready.push(Reverse(op));
        }
    }

    // Kahn's algorithm, smallest ready operation first.
    let mut order = Vec::with_capacity(dirty.len());
    let mut relaxed: Vec<RelationId> = Vec::new();
    loop {
        while let Some(Reverse(op)) = ready.pop() {
            order.push(op);
            for dependent in dependents_in(graph, op, &index, &relaxed) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }
        if order.len() == dirty.len() {
            break;
        }
        match relax_next(graph, &mut in_degree, &mut relaxed) {
            Some(unblocked) => ready.extend(unblocked.into_iter().map(Reverse)),
            None => break,
        }
    }

    let mut blocked: Vec<OperationId> = in_degree
        .into_iter()
        .filter(|(_, degree)| *degree > 0)
        .map(|(op, _)| op)
        .collect();
    blocked.sort();
    if !relaxed.is_empty() {
        debug!(relations = relaxed.len(), "ordering loop relaxed");
    }
    if !blocked.is_empty() {
        warn!(operations = blocked.len(), "dependency cycle among dirty operations");
    }

    let subgraphs = partition(graph, &order, &index);
    debug!(operations = order.len(), subgraphs = subgraphs.len(), "evaluation scheduled");
    Schedule {
        order,
        subgraphs,
        relaxed,
        blocked,
    }
}

/// Drop the non-flushing relations into the smallest stalled operation that
/// has any coming from another stalled operation. Returns the operations
/// that became ready, or `None` when nothing can be relaxed.
fn relax_next(
    graph: &Depsgraph,
    in_degree: &mut HashMap<OperationId, usize>,
    relaxed: &mut Vec<RelationId>,
) -> Option<Vec<OperationId>> {
    let mut stalled: Vec<OperationId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree > 0)
        .map(|(&op, _)| op)
        .collect();
    stalled.sort();

    for op in stalled {
        let loose: Vec<RelationId> = graph
            .operation(op)
            .inlinks()
            .iter()
            .copied()
            .filter(|&relation| {
                let relation_node = graph.relation(relation);
                relation_node.flags.flush_policy() == FlushPolicy::Never
                    && in_degree.get(&relation_node.from).is_some_and(|degree| *degree > 0)
                    && relaxed.binary_search(&relation).is_err()
            })
            .collect();
        if loose.is_empty() {
            continue;
        }

        for relation in loose {
            if let Err(position) = relaxed.binary_search(&relation) {
                relaxed.insert(position, relation);
            }
            if let Some(degree) = in_degree.get_mut(&op) {
                *degree = degree.saturating_sub(1);
            }
        }
        let unblocked = in_degree.get(&op).is_some_and(|degree| *degree == 0);
        return Some(if unblocked { vec![op] } else { Vec::new() });
    }
    None
}

/// Weakly connected components of the dirty subgraph, by union-find.
fn partition(graph: &Depsgraph, order: &[OperationId], index: &HashMap<OperationId, usize>) -> Vec<Vec<OperationId>> {
    let mut parent: Vec<usize> = (0..index.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for (&op, &i) in index {
        for dependent in dependents_in(graph, op, index, &[]) {
            let (a, b) = (find(&mut parent, i), find(&mut parent, index[&dependent]));
            if a != b {
                parent[a.max(b)] = a.min(b);
            }
        }
    }

    // Keyed by the smallest operation of each group. Blocked operations
    // are not part of any group.
    let mut groups: BTreeMap<usize, (OperationId, Vec<OperationId>)> = BTreeMap::new();
    for &op in order {
        let root = find(&mut parent, index[&op]);
        let group = groups.entry(root).or_insert((op, Vec::new()));
        group.0 = group.0.min(op);
        group.1.push(op);
    }
    let mut subgraphs: Vec<(OperationId, Vec<OperationId>)> = groups.into_values().collect();
    subgraphs.sort_by_key(|(first, _)| *first);
    subgraphs.into_iter().map(|(_, ops)| ops).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::{ComponentKey, NodeType, OperationCode, OperationKey, Recalc, RelationFlag, RelationFlags};
    use crate::pipeline::{self, EvaluationScope};
    use crate::store::{DatablockStore, ObjectType};
    use crate::tag::{clear_tags, tag_component, UpdateSource};

    fn position(schedule: &Schedule, op: OperationId) -> usize {
        schedule.order().iter().position(|&o| o == op).unwrap()
    }

    #[test]
    fn respects_relations() {
        let mut store = DatablockStore::new();
        let parent = store.add_object("Parent", ObjectType::Empty);
        let child = store.add_object("Child", ObjectType::Mesh);
        store.set_parent(child, Some(parent)).unwrap();
        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        pipeline::build(&mut graph, &store).unwrap();

        let schedule = schedule(&graph);
        assert_eq!(schedule.len(), graph.operation_count());
        for relation in graph.relations() {
            assert!(position(&schedule, relation.from) < position(&schedule, relation.to));
        }
    }

    #[test]
    fn order_is_deterministic() {
        let mut store = DatablockStore::new();
        for i in 0..8 {
            store.add_object(format!("Empty{i}"), ObjectType::Empty);
        }
        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        pipeline::build(&mut graph, &store).unwrap();

        let first = schedule(&graph);
        let second = schedule(&graph);
        assert_eq!(first, second);
        assert_eq!(first.subgraphs().len(), 8);
    }

    #[test]
    fn clean_components_are_skipped() {
        let mut store = DatablockStore::new();
        let a = store.add_object("A", ObjectType::Mesh);
        store.add_object("B", ObjectType::Mesh);
        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        pipeline::build(&mut graph, &store).unwrap();
        clear_tags(&mut graph);
        assert!(schedule(&graph).is_empty());

        tag_component(
            &mut graph,
            &ComponentKey::new(a, NodeType::Geometry),
            Recalc::GEOMETRY,
            UpdateSource::UserEdit,
        );
        let schedule = schedule(&graph);
        assert!(!schedule.is_empty());
        assert!(schedule
            .order()
            .iter()
            .all(|&op| graph.operation(op).owner() == a));
        assert_eq!(schedule.subgraphs().len(), 1);
    }

    #[test]
    fn no_flush_still_orders() {
        let mut store = DatablockStore::new();
        let a = store.add_object("A", ObjectType::Mesh);
        let b = store.add_object("B", ObjectType::Mesh);
        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        pipeline::build(&mut graph, &store).unwrap();

        let from = graph
            .find_operation(&OperationKey::new(b, NodeType::Geometry, OperationCode::GeometryEvalDone))
            .unwrap();
        let to = graph
            .find_operation(&OperationKey::new(a, NodeType::Geometry, OperationCode::GeometryEvalInit))
            .unwrap();
        graph.add_relation(from, to, "Ordering", RelationFlag::NoFlush.into());

        let schedule = schedule(&graph);
        assert!(position(&schedule, from) < position(&schedule, to));
        let joined = schedule
            .subgraphs()
            .iter()
            .find(|group| group.contains(&from))
            .unwrap();
        assert!(joined.contains(&to));
    }

    #[test]
    fn flushing_cycle_blocks_only_its_operations() {
        let mut store = DatablockStore::new();
        let a = store.add_object("A", ObjectType::Empty);
        let b = store.add_object("B", ObjectType::Empty);
        let other = store.add_object("Other", ObjectType::Empty);
        store.set_parent(a, Some(b)).unwrap();
        store.set_parent(b, Some(a)).unwrap();
        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        pipeline::build(&mut graph, &store).unwrap();

        let schedule = schedule(&graph);
        let blocked = schedule.blocked();
        assert!(!blocked.is_empty());
        assert!(blocked.windows(2).all(|w| w[0] < w[1]));
        assert!(schedule.relaxed().is_empty());
        assert!(blocked.iter().all(|op| !schedule.order().contains(op)));
        assert!(schedule
            .order()
            .iter()
            .any(|&op| graph.operation(op).owner() == other));
        match schedule.check() {
            Err(DepsgraphError::DependencyCycle(ops)) => assert_eq!(ops, blocked),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn ordering_only_loop_is_relaxed() {
        let mut store = DatablockStore::new();
        let c = store.add_object("C", ObjectType::Empty);
        store.add_object("Other", ObjectType::Empty);
        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        pipeline::build(&mut graph, &store).unwrap();
        let local = graph
            .find_operation(&OperationKey::new(c, NodeType::Transform, OperationCode::TransformLocal))
            .unwrap();
        let last = graph
            .find_operation(&OperationKey::new(c, NodeType::Transform, OperationCode::TransformFinal))
            .unwrap();
        let loop_back = graph.add_relation(last, local, "Loop", RelationFlags::empty().with(RelationFlag::NoFlush));

        let schedule = schedule(&graph);
        assert!(schedule.check().is_ok());
        assert!(schedule.blocked().is_empty());
        assert_eq!(schedule.len(), graph.operation_count());
        assert_eq!(schedule.relaxed(), &[loop_back]);
        assert!(position(&schedule, local) < position(&schedule, last));
        for (id, relation) in graph.relations().iter().enumerate() {
            if schedule.is_relaxed(RelationId(id as u32)) {
                continue;
            }
            assert!(position(&schedule, relation.from) < position(&schedule, relation.to));
        }
    }
}
