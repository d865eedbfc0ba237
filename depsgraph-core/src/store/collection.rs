//! Collection Walker
//!
//! Gathers every object reachable from a collection, through nested child
//! collections and (optionally) through empties that instance another
//! collection.
//!
//! The walk is an explicit depth-first worklist rather than recursion, so
//! deeply nested scenes cannot exhaust the call stack. Each collection is
//! entered at most once. A collection reached again while it is still on the
//! worklist means the scene instances a collection inside itself; that edge
//! is logged, recorded in [`CollectionWalk::cycles`] and not followed.
//! A collection reached again after it was finished (two paths to the same
//! collection) is simply skipped.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use super::{DatablockId, DatablockStore};

/// Result of walking a collection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectionWalk {
    /// Every object reached, in first-visit order, without duplicates.
    pub objects: Vec<DatablockId>,
    /// Every collection entered, in first-visit order. Starts with the root.
    pub collections: Vec<DatablockId>,
    /// `(from, to)` edges that were skipped because they close a cycle.
    pub cycles: Vec<(DatablockId, DatablockId)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Active,
    Done,
}

struct Frame {
    collection: DatablockId,
    edges: Vec<DatablockId>,
    next: usize,
}

/// Configurable walk over a collection hierarchy.
pub struct CollectionWalker<'a> {
    store: &'a DatablockStore,
    follow_instances: bool,
    excluded: HashSet<DatablockId>,
}

impl<'a> CollectionWalker<'a> {
    /// Walker over child collections only.
    pub fn new(store: &'a DatablockStore) -> Self {
        Self {
            store,
            follow_instances: false,
            excluded: HashSet::new(),
        }
    }

    /// Also descend into collections instanced by empties.
    pub fn follow_instances(mut self, follow: bool) -> Self {
        self.follow_instances = follow;
        self
    }

    /// Skip these collections and everything only reachable through them.
    pub fn exclude(mut self, collections: impl IntoIterator<Item = DatablockId>) -> Self {
        self.excluded.extend(collections);
        self
    }

    pub fn walk(&self, root: DatablockId) -> CollectionWalk {
        let mut walk = CollectionWalk::default();
        let mut state: HashMap<DatablockId, Visit> = HashMap::new();
        let mut seen_objects: HashSet<DatablockId> = HashSet::new();
        let mut stack: Vec<Frame> = Vec::new();

        if let Some(frame) = self.enter(root, &mut walk, &mut seen_objects, &mut state) {
            stack.push(frame);
        }

        while let Some(frame) = stack.last_mut() {
            if frame.next == frame.edges.len() {
                state.insert(frame.collection, Visit::Done);
                stack.pop();
                continue;
            }

            let from = frame.collection;
            let to = frame.edges[frame.next];
            frame.next += 1;

            match state.get(&to) {
                Some(Visit::Active) => {
                    warn!(
                        from = %self.store.display_name(from),
                        to = %self.store.display_name(to),
                        "collection instancing cycle, edge skipped"
                    );
                    walk.cycles.push((from, to));
                }
                Some(Visit::Done) => {}
                None => {
                    if let Some(frame) = self.enter(to, &mut walk, &mut seen_objects, &mut state) {
                        stack.push(frame);
                    }
                }
            }
        }

        walk
    }

    fn enter(
        &self,
        collection: DatablockId,
        walk: &mut CollectionWalk,
        seen_objects: &mut HashSet<DatablockId>,
        state: &mut HashMap<DatablockId, Visit>,
    ) -> Option<Frame> {
        if self.excluded.contains(&collection) {
            state.insert(collection, Visit::Done);
            return None;
        }
        let Some(data) = self.store.collection(collection) else {
            warn!(id = %collection, "reference to a missing or non-collection datablock skipped");
            state.insert(collection, Visit::Done);
            return None;
        };

        state.insert(collection, Visit::Active);
        walk.collections.push(collection);

        let mut edges = data.children.clone();
        for &object_id in &data.objects {
            let Some(object) = self.store.object(object_id) else {
                warn!(
                    collection = %self.store.display_name(collection),
                    id = %object_id,
                    "collection links a missing or non-object datablock"
                );
                continue;
            };
            if seen_objects.insert(object_id) {
                walk.objects.push(object_id);
            }
            if self.follow_instances {
                if let Some(instanced) = object.instances_collection() {
                    edges.push(instanced);
                }
            }
        }

        Some(Frame {
            collection,
            edges,
            next: 0,
        })
    }
}
