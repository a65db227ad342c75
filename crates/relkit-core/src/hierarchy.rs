//! Arena of hierarchy nodes keyed by id.
//!
//! Parent/child links are stored as ids and resolved through the arena.
//! New ids come from an explicit [`IdSequence`] owned by the caller's
//! session rather than from any process-wide counter.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{RelkitError, RelkitResult};
use crate::models::{AttributeValue, HierarchyNode, Level, NodeId};

/// Monotonic id generator scoped to one editing session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdSequence {
    last: u64,
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after the highest id already in use.
    pub fn starting_after(max_id: u64) -> Self {
        Self { last: max_id }
    }

    pub fn next_id(&mut self) -> NodeId {
        self.last += 1;
        NodeId(self.last)
    }

    /// Make sure future ids never collide with `id`.
    pub fn observe(&mut self, id: NodeId) {
        self.last = self.last.max(id.0);
    }
}

#[derive(Clone, Debug, Default)]
pub struct Hierarchy {
    nodes: IndexMap<NodeId, HierarchyNode>,
    children: HashMap<NodeId, Vec<NodeId>>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a hierarchy from nodes the collaborator loaded. Parents must
    /// precede their children.
    pub fn from_nodes(nodes: Vec<HierarchyNode>, ids: &mut IdSequence) -> RelkitResult<Self> {
        let mut tree = Self::new();
        for node in nodes {
            tree.insert_with_id(node.id, node.parent_id, node.level, node.attributes)?;
            ids.observe(node.id);
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Create a node under `parent` (`None` = synthetic root).
    pub fn insert(
        &mut self,
        parent: Option<NodeId>,
        level: Level,
        attributes: IndexMap<String, AttributeValue>,
        ids: &mut IdSequence,
    ) -> RelkitResult<NodeId> {
        self.check_parent(parent, level)?;
        let id = ids.next_id();
        if self.nodes.contains_key(&id) {
            return Err(RelkitError::DuplicateKey(format!(
                "node {id} already exists; id sequence is behind the arena"
            )));
        }
        self.attach(id, parent, level, attributes);
        Ok(id)
    }

    /// Insert a node with a caller-chosen id (reloading persisted records).
    pub fn insert_with_id(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        level: Level,
        attributes: IndexMap<String, AttributeValue>,
    ) -> RelkitResult<()> {
        if self.nodes.contains_key(&id) {
            return Err(RelkitError::DuplicateKey(format!("node {id} already exists")));
        }
        self.check_parent(parent, level)?;
        self.attach(id, parent, level, attributes);
        Ok(())
    }

    fn check_parent(&self, parent: Option<NodeId>, level: Level) -> RelkitResult<()> {
        let Some(parent_id) = parent else {
            return Ok(());
        };
        let parent_node = self.get(parent_id)?;
        if !parent_node.level.accepts_child(level) {
            return Err(RelkitError::OutOfRange(format!(
                "a {} cannot be placed under {} {}",
                level.as_str(),
                parent_node.level.as_str(),
                parent_id
            )));
        }
        Ok(())
    }

    fn attach(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        level: Level,
        attributes: IndexMap<String, AttributeValue>,
    ) {
        if let Some(parent_id) = parent {
            self.children.entry(parent_id).or_default().push(id);
        }
        self.nodes.insert(id, HierarchyNode { id, parent_id: parent, level, attributes });
    }

    pub fn get(&self, id: NodeId) -> RelkitResult<&HierarchyNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| RelkitError::NotFound(format!("hierarchy node {id}")))
    }

    pub fn get_mut(&mut self, id: NodeId) -> RelkitResult<&mut HierarchyNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| RelkitError::NotFound(format!("hierarchy node {id}")))
    }

    pub fn set_attribute(
        &mut self,
        id: NodeId,
        key: &str,
        value: impl Into<AttributeValue>,
    ) -> RelkitResult<()> {
        self.get_mut(id)?.set(key, value);
        Ok(())
    }

    /// Direct children in insertion order.
    pub fn children(&self, id: NodeId) -> RelkitResult<Vec<&HierarchyNode>> {
        self.get(id)?;
        Ok(self
            .children
            .get(&id)
            .map(|kids| kids.iter().filter_map(|k| self.nodes.get(k)).collect())
            .unwrap_or_default())
    }

    /// All nodes below `id`, depth-first pre-order.
    pub fn descendants(&self, id: NodeId) -> RelkitResult<Vec<NodeId>> {
        self.get(id)?;
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.child_ids(id).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.child_ids(next).into_iter().rev());
        }
        Ok(out)
    }

    /// Parent chain from the immediate parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> RelkitResult<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut cursor = self.get(id)?.parent_id;
        while let Some(parent) = cursor {
            out.push(parent);
            cursor = self.get(parent)?.parent_id;
        }
        Ok(out)
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.parent_id.is_none())
            .map(|n| n.id)
            .collect()
    }

    /// Remove `id` and its whole subtree; returns the removed ids.
    pub fn remove(&mut self, id: NodeId) -> RelkitResult<Vec<NodeId>> {
        let parent = self.get(id)?.parent_id;
        let mut removed = vec![id];
        removed.extend(self.descendants(id)?);
        for node_id in &removed {
            self.nodes.shift_remove(node_id);
            self.children.remove(node_id);
        }
        if let Some(parent_id) = parent {
            if let Some(siblings) = self.children.get_mut(&parent_id) {
                siblings.retain(|s| *s != id);
            }
        }
        debug!("removed {} hierarchy node(s) rooted at {}", removed.len(), id);
        Ok(removed)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &HierarchyNode> {
        self.nodes.values()
    }

    fn child_ids(&self, id: NodeId) -> Vec<NodeId> {
        self.children.get(&id).cloned().unwrap_or_default()
    }
}
