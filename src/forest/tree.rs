//! Single-rooted Abstract hierarchy over one partition.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use super::node::{AbstractNode, PairId};

/// Max ancestors / children rendered by [`AbstractTree::context_line`].
pub const CONTEXT_FANOUT: usize = 3;

/// How a tree's parent links were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyStrategy {
    Oracle,
    Fallback,
}

impl HierarchyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyStrategy::Oracle => "oracle",
            HierarchyStrategy::Fallback => "fallback",
        }
    }
}

/// A broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeViolation {
    Empty,
    UnknownNode(PairId),
    RootHasParent(PairId),
    ExtraRoot(PairId),
    AlreadyParented { child: PairId, parent: PairId },
    DanglingParent { child: PairId, parent: PairId },
    NotListedByParent { child: PairId, parent: PairId },
    ChildMismatch { parent: PairId, child: PairId },
    Cycle(PairId),
    Unreachable(PairId),
}

impl fmt::Display for TreeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeViolation::Empty => write!(f, "tree has no nodes"),
            TreeViolation::UnknownNode(id) => write!(f, "Abstract{} is not in the tree", id),
            TreeViolation::RootHasParent(id) => write!(f, "root Abstract{} has a parent", id),
            TreeViolation::ExtraRoot(id) => write!(f, "Abstract{} has no parent but is not the root", id),
            TreeViolation::AlreadyParented { child, parent } => {
                write!(f, "Abstract{} already has parent Abstract{}", child, parent)
            }
            TreeViolation::DanglingParent { child, parent } => {
                write!(f, "Abstract{} points at missing parent Abstract{}", child, parent)
            }
            TreeViolation::NotListedByParent { child, parent } => {
                write!(f, "Abstract{} is not listed as a child of Abstract{}", child, parent)
            }
            TreeViolation::ChildMismatch { parent, child } => {
                write!(f, "Abstract{} lists Abstract{} whose parent differs", parent, child)
            }
            TreeViolation::Cycle(id) => write!(f, "Abstract{} is its own ancestor", id),
            TreeViolation::Unreachable(id) => write!(f, "Abstract{} is unreachable from the root", id),
        }
    }
}

impl std::error::Error for TreeViolation {}

/// Arena-backed hierarchy. Parent/children are `pair_id`s into `nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractTree {
    label: String,
    root: PairId,
    strategy: HierarchyStrategy,
    nodes: BTreeMap<PairId, AbstractNode>,
}

impl AbstractTree {
    /// Build a tree from unlinked nodes and a `child -> parent` map.
    ///
    /// Links are added in ascending child order, so children lists are sorted.
    /// Returns the first violation if the result is not a valid tree.
    pub fn assemble(
        label: impl Into<String>,
        nodes: impl IntoIterator<Item = AbstractNode>,
        root: PairId,
        parents: &BTreeMap<PairId, PairId>,
        strategy: HierarchyStrategy,
    ) -> Result<Self, TreeViolation> {
        let nodes: BTreeMap<PairId, AbstractNode> = nodes
            .into_iter()
            .map(|mut node| {
                node.parent = None;
                node.children.clear();
                (node.pair_id, node)
            })
            .collect();

        let mut tree = Self {
            label: label.into(),
            root,
            strategy,
            nodes,
        };

        for (&child, &parent) in parents {
            tree.add_child(parent, child)?;
        }

        tree.validate()?;
        Ok(tree)
    }

    /// Set `child`'s parent and append it to `parent`'s children.
    pub fn add_child(&mut self, parent: PairId, child: PairId) -> Result<(), TreeViolation> {
        if parent == child {
            return Err(TreeViolation::Cycle(child));
        }
        if !self.nodes.contains_key(&parent) {
            return Err(TreeViolation::DanglingParent { child, parent });
        }
        let child_node = self
            .nodes
            .get_mut(&child)
            .ok_or(TreeViolation::UnknownNode(child))?;
        if let Some(existing) = child_node.parent {
            return Err(TreeViolation::AlreadyParented {
                child,
                parent: existing,
            });
        }
        child_node.parent = Some(parent);

        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(child);
        }
        Ok(())
    }

    /// Check every structural invariant; returns the first violation found.
    pub fn validate(&self) -> Result<(), TreeViolation> {
        if self.nodes.is_empty() {
            return Err(TreeViolation::Empty);
        }
        let root = self
            .nodes
            .get(&self.root)
            .ok_or(TreeViolation::UnknownNode(self.root))?;
        if root.parent.is_some() {
            return Err(TreeViolation::RootHasParent(self.root));
        }

        for (&id, node) in &self.nodes {
            if id == self.root {
                continue;
            }
            let parent = node.parent.ok_or(TreeViolation::ExtraRoot(id))?;
            let parent_node = self
                .nodes
                .get(&parent)
                .ok_or(TreeViolation::DanglingParent { child: id, parent })?;
            if !parent_node.children.contains(&id) {
                return Err(TreeViolation::NotListedByParent { child: id, parent });
            }
        }

        for (&id, node) in &self.nodes {
            for &child in &node.children {
                match self.nodes.get(&child) {
                    Some(child_node) if child_node.parent == Some(id) => {}
                    _ => return Err(TreeViolation::ChildMismatch { parent: id, child }),
                }
            }
        }

        let reachable = self.reachable_from(self.root);
        if reachable.len() != self.nodes.len() {
            let unreachable: Vec<PairId> = self
                .nodes
                .keys()
                .copied()
                .filter(|id| !reachable.contains(id))
                .collect();
            if let Some(&on_cycle) = unreachable.iter().find(|&&id| self.is_on_cycle(id)) {
                return Err(TreeViolation::Cycle(on_cycle));
            }
            return Err(TreeViolation::Unreachable(unreachable[0]));
        }

        Ok(())
    }

    fn reachable_from(&self, start: PairId) -> HashSet<PairId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for &child in self.children(id) {
                queue.push_back(child);
            }
        }
        seen
    }

    fn is_on_cycle(&self, id: PairId) -> bool {
        let mut current = self.parent(id);
        for _ in 0..self.nodes.len() {
            match current {
                Some(p) if p == id => return true,
                Some(p) => current = self.parent(p),
                None => return false,
            }
        }
        false
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root(&self) -> PairId {
        self.root
    }

    pub fn root_node(&self) -> Option<&AbstractNode> {
        self.nodes.get(&self.root)
    }

    pub fn strategy(&self) -> HierarchyStrategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, pair_id: PairId) -> bool {
        self.nodes.contains_key(&pair_id)
    }

    /// Direct map lookup.
    pub fn get(&self, pair_id: PairId) -> Option<&AbstractNode> {
        self.nodes.get(&pair_id)
    }

    pub(crate) fn get_mut(&mut self, pair_id: PairId) -> Option<&mut AbstractNode> {
        self.nodes.get_mut(&pair_id)
    }

    /// Nodes in ascending `pair_id` order.
    pub fn nodes(&self) -> impl Iterator<Item = &AbstractNode> {
        self.nodes.values()
    }

    pub fn pair_ids(&self) -> impl Iterator<Item = PairId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn parent(&self, pair_id: PairId) -> Option<PairId> {
        self.nodes.get(&pair_id).and_then(|n| n.parent)
    }

    /// Direct children; empty for unknown ids.
    pub fn children(&self, pair_id: PairId) -> &[PairId] {
        self.nodes
            .get(&pair_id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Path to the root, nearest ancestor first.
    pub fn ancestors(&self, pair_id: PairId) -> Vec<PairId> {
        let mut path = Vec::new();
        let mut current = self.parent(pair_id);
        while let Some(id) = current {
            if path.len() >= self.nodes.len() {
                break;
            }
            path.push(id);
            current = self.parent(id);
        }
        path
    }

    /// Breadth-first search from the root, visiting at most `len()` nodes.
    pub fn find_by_pair_id(&self, pair_id: PairId) -> Option<&AbstractNode> {
        let mut queue = VecDeque::from([self.root]);
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            if visited >= self.nodes.len() {
                break;
            }
            visited += 1;
            let node = self.nodes.get(&id)?;
            if id == pair_id {
                return Some(node);
            }
            queue.extend(node.children.iter().copied());
        }
        None
    }

    /// All nodes below `pair_id` in breadth-first order.
    pub fn descendants(&self, pair_id: PairId) -> Vec<PairId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<PairId> = self.children(pair_id).iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if out.len() >= self.nodes.len() {
                break;
            }
            out.push(id);
            queue.extend(self.children(id).iter().copied());
        }
        out
    }

    /// Number of edges on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut queue = VecDeque::from([(self.root, 0usize)]);
        let mut visited = 0usize;
        while let Some((id, depth)) = queue.pop_front() {
            if visited >= self.nodes.len() {
                break;
            }
            visited += 1;
            max_depth = max_depth.max(depth);
            for &child in self.children(id) {
                queue.push_back((child, depth + 1));
            }
        }
        max_depth
    }

    /// Short hierarchy description, e.g.
    /// `Abstract7 ancestors: Abstract3, Abstract0; children: Abstract12, Abstract13.`
    pub fn context_line(&self, pair_id: PairId) -> Option<String> {
        if !self.contains(pair_id) {
            return None;
        }

        let render = |ids: &[PairId]| {
            ids.iter()
                .take(CONTEXT_FANOUT)
                .map(|id| format!("Abstract{}", id))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut parts = Vec::new();
        let ancestors = self.ancestors(pair_id);
        if !ancestors.is_empty() {
            parts.push(format!("ancestors: {}", render(&ancestors)));
        }
        let children = self.children(pair_id);
        if !children.is_empty() {
            parts.push(format!("children: {}", render(children)));
        }

        if parts.is_empty() {
            Some(format!("Abstract{}.", pair_id))
        } else {
            Some(format!("Abstract{} {}.", pair_id, parts.join("; ")))
        }
    }
}
