//! # Category Tree Module
//!
//! ## Purpose
//! Queries over the hierarchical geographic category tree
//! (district → upazila → union → voter area) and descendant scope resolution
//! used to restrict search and suggestion candidates.
//!
//! ## Input/Output Specification
//! - **Input**: Category identifiers, parent identifiers, hierarchy levels
//! - **Output**: Ordered node lists, transitive descendant scopes
//! - **Traversal**: Single batch fetch + BFS, never per-node store queries
//!
//! ## Key Features
//! - Name-ordered child and level listings
//! - `resolve_scope`: node plus all transitive descendants in one traversal
//! - Visited-set guard so traversal terminates on corrupt parent links

use crate::errors::Result;
use crate::storage::RecordStore;
use crate::{CategoryId, CategoryNode};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Query surface over the stored category hierarchy
pub struct CategoryTree {
    store: Arc<RecordStore>,
}

impl CategoryTree {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Stored attributes of a single node
    pub fn node(&self, id: &CategoryId) -> Result<Option<CategoryNode>> {
        self.store.get_category(id)
    }

    /// Direct children of a node, ordered by name
    pub fn children_of(&self, parent_id: CategoryId) -> Result<Vec<CategoryNode>> {
        self.store.categories_by_parent(Some(parent_id))
    }

    /// Root nodes (level 0), ordered by name
    pub fn roots(&self) -> Result<Vec<CategoryNode>> {
        self.store.categories_by_parent(None)
    }

    /// All nodes at a hierarchy level, ordered by name
    pub fn at_level(&self, level: u32) -> Result<Vec<CategoryNode>> {
        self.store.categories_at_level(level)
    }

    /// Whether a node has at least one child
    pub fn has_children(&self, id: CategoryId) -> Result<bool> {
        Ok(!self.children_of(id)?.is_empty())
    }

    /// Resolve the full filter scope of a node: the node itself plus every
    /// node reachable by following child links.
    ///
    /// Returns `None` when the identifier does not name a stored node; the
    /// caller drops the scope filter in that case rather than failing.
    ///
    /// The whole tree is fetched once and traversed breadth-first in memory,
    /// so resolution costs one store scan regardless of depth. The visited
    /// set makes the traversal terminate even on corrupt parent links.
    pub fn resolve_scope(&self, id: CategoryId) -> Result<Option<HashSet<CategoryId>>> {
        if self.store.get_category(&id)?.is_none() {
            return Ok(None);
        }

        let mut children_by_parent: HashMap<CategoryId, Vec<CategoryId>> = HashMap::new();
        for node in self.store.all_categories()? {
            if let Some(parent_id) = node.parent_id {
                children_by_parent.entry(parent_id).or_default().push(node.id);
            }
        }

        let mut scope = HashSet::new();
        let mut queue = VecDeque::new();
        scope.insert(id);
        queue.push_back(id);

        while let Some(current) = queue.pop_front() {
            if let Some(children) = children_by_parent.get(&current) {
                for &child in children {
                    if scope.insert(child) {
                        queue.push_back(child);
                    }
                }
            }
        }

        Ok(Some(scope))
    }
}
