//! Processing order: a topological sequence of node ids with O(1) relocation.

use std::collections::{HashMap, HashSet};

use crate::error::CompileError;
use crate::primitives::PrimitiveId;
use crate::program::Program;

#[derive(Debug, Clone, Default)]
struct Link {
    prev: Option<PrimitiveId>,
    next: Option<PrimitiveId>,
}

/// Doubly linked sequence keyed by node id.
///
/// Insertion, removal and relocation are constant time. Positions are only
/// comparable after [`update_processing_numbers`](Self::update_processing_numbers).
#[derive(Debug, Clone, Default)]
pub struct ProcessingOrder {
    links: HashMap<PrimitiveId, Link>,
    head: Option<PrimitiveId>,
    tail: Option<PrimitiveId>,
    numbers: HashMap<PrimitiveId, usize>,
}

pub struct Iter<'a> {
    order: &'a ProcessingOrder,
    cursor: Option<&'a str>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let current = self.cursor?;
        self.cursor = self
            .order
            .links
            .get(current)
            .and_then(|link| link.next.as_deref());
        Some(current)
    }
}

impl ProcessingOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.links.contains_key(id)
    }

    pub fn first(&self) -> Option<&str> {
        self.head.as_deref()
    }

    pub fn last(&self) -> Option<&str> {
        self.tail.as_deref()
    }

    pub fn next(&self, id: &str) -> Option<&str> {
        self.links.get(id).and_then(|link| link.next.as_deref())
    }

    pub fn prev(&self, id: &str) -> Option<&str> {
        self.links.get(id).and_then(|link| link.prev.as_deref())
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            order: self,
            cursor: self.head.as_deref(),
        }
    }

    /// Snapshot of the current sequence, safe to hold across edits.
    pub fn ids(&self) -> Vec<PrimitiveId> {
        self.iter().map(str::to_string).collect()
    }

    pub fn clear(&mut self) {
        self.links.clear();
        self.head = None;
        self.tail = None;
        self.numbers.clear();
    }

    fn set_next(&mut self, id: Option<&str>, next: Option<PrimitiveId>) {
        match id {
            Some(id) => {
                if let Some(link) = self.links.get_mut(id) {
                    link.next = next;
                }
            }
            None => self.head = next,
        }
    }

    fn set_prev(&mut self, id: Option<&str>, prev: Option<PrimitiveId>) {
        match id {
            Some(id) => {
                if let Some(link) = self.links.get_mut(id) {
                    link.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    /// Unlinks `id`. Returns false if it was not in the sequence.
    pub fn erase(&mut self, id: &str) -> bool {
        let Some(link) = self.links.remove(id) else {
            return false;
        };
        self.numbers.remove(id);
        self.set_next(link.prev.as_deref(), link.next.clone());
        self.set_prev(link.next.as_deref(), link.prev);
        true
    }

    fn link_between(&mut self, id: PrimitiveId, prev: Option<PrimitiveId>, next: Option<PrimitiveId>) {
        self.set_next(prev.as_deref(), Some(id.clone()));
        self.set_prev(next.as_deref(), Some(id.clone()));
        self.links.insert(id, Link { prev, next });
    }

    /// Moves `id` to the front, inserting it if absent.
    pub fn push_front(&mut self, id: impl Into<PrimitiveId>) {
        let id = id.into();
        self.erase(&id);
        let next = self.head.clone();
        self.link_between(id, None, next);
    }

    /// Moves `id` to the back, inserting it if absent.
    pub fn push_back(&mut self, id: impl Into<PrimitiveId>) {
        let id = id.into();
        self.erase(&id);
        let prev = self.tail.clone();
        self.link_between(id, prev, None);
    }

    /// Moves `id` right after `anchor`, inserting it if absent.
    pub fn insert_after(&mut self, anchor: &str, id: impl Into<PrimitiveId>) -> bool {
        let id = id.into();
        if id == anchor || !self.contains(anchor) {
            return false;
        }
        self.erase(&id);
        let next = self.links.get(anchor).and_then(|link| link.next.clone());
        self.link_between(id, Some(anchor.to_string()), next);
        true
    }

    /// Moves `id` right before `anchor`, inserting it if absent.
    pub fn insert_before(&mut self, anchor: &str, id: impl Into<PrimitiveId>) -> bool {
        let id = id.into();
        if id == anchor || !self.contains(anchor) {
            return false;
        }
        self.erase(&id);
        let prev = self.links.get(anchor).and_then(|link| link.prev.clone());
        self.link_between(id, prev, Some(anchor.to_string()));
        true
    }

    /// Gives the entry of `old` the name `new`, keeping its position.
    pub(crate) fn rename(&mut self, old: &str, new: &str) {
        let Some(link) = self.links.remove(old) else {
            return;
        };
        let number = self.numbers.remove(old);
        self.set_next(link.prev.as_deref(), Some(new.to_string()));
        self.set_prev(link.next.as_deref(), Some(new.to_string()));
        self.links.insert(new.to_string(), link);
        if let Some(number) = number {
            self.numbers.insert(new.to_string(), number);
        }
    }

    pub fn update_processing_numbers(&mut self) {
        let numbers: HashMap<PrimitiveId, usize> = self
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.to_string(), idx))
            .collect();
        self.numbers = numbers;
    }

    /// Position recorded by the last [`update_processing_numbers`](Self::update_processing_numbers).
    pub fn processing_number(&self, id: &str) -> Option<usize> {
        self.numbers.get(id).copied()
    }
}

/// Reverse postorder of a depth-first walk over user edges, started from
/// every node without dependencies.
pub(crate) fn dfs_order(program: &Program) -> Result<ProcessingOrder, CompileError> {
    let mut order = ProcessingOrder::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    for input in program.inputs() {
        if !visited.insert(input.as_str()) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(input.as_str(), 0)];
        on_stack.insert(input.as_str());

        while let Some(top) = stack.last_mut() {
            let (id, cursor) = *top;
            top.1 += 1;
            let node = program.node(id)?;
            match node.users().get(cursor) {
                Some(user) => {
                    if on_stack.contains(user.as_str()) {
                        return Err(CompileError::invalid_graph(format!(
                            "cycle through '{id}' and '{user}'"
                        )));
                    }
                    if !program.contains(user) {
                        return Err(CompileError::MissingNode(user.clone()));
                    }
                    if visited.insert(user.as_str()) {
                        on_stack.insert(user.as_str());
                        stack.push((user.as_str(), 0));
                    }
                }
                None => {
                    order.push_front(id);
                    on_stack.remove(id);
                    stack.pop();
                }
            }
        }
    }

    if order.len() != program.len() {
        return Err(CompileError::invalid_graph(format!(
            "{} of {} nodes are not reachable from a node without dependencies",
            program.len() - order.len(),
            program.len()
        )));
    }
    Ok(order)
}

/// Stable reordering by depth: every node lands after its deepest dependency.
pub(crate) fn bfs_order(program: &Program) -> Result<ProcessingOrder, CompileError> {
    let mut levels: HashMap<&str, usize> = HashMap::new();
    let mut ranked: Vec<(usize, &str)> = Vec::with_capacity(program.len());

    for id in program.processing_order().iter() {
        let node = program.node(id)?;
        let mut level = 0;
        for dep in node.dependencies() {
            let dep_level = levels.get(dep.as_str()).copied().ok_or_else(|| {
                CompileError::invalid_graph(format!(
                    "'{dep}' does not precede its user '{id}' in processing order"
                ))
            })?;
            level = level.max(dep_level + 1);
        }
        levels.insert(id, level);
        ranked.push((level, id));
    }

    ranked.sort_by_key(|(level, _)| *level);
    let mut order = ProcessingOrder::new();
    for (_, id) in ranked {
        order.push_back(id);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_of(ids: &[&str]) -> ProcessingOrder {
        let mut order = ProcessingOrder::new();
        for id in ids {
            order.push_back(*id);
        }
        order
    }

    #[test]
    fn relocation_keeps_links_consistent() {
        let mut order = order_of(&["a", "b", "c", "d"]);
        assert!(order.insert_after("c", "a"));
        assert_eq!(order.ids(), ["b", "c", "a", "d"]);
        assert!(order.insert_before("b", "d"));
        assert_eq!(order.ids(), ["d", "b", "c", "a"]);
        assert_eq!(order.first(), Some("d"));
        assert_eq!(order.last(), Some("a"));
        assert_eq!(order.prev("c"), Some("b"));
    }

    #[test]
    fn erase_and_rename() {
        let mut order = order_of(&["a", "b", "c"]);
        assert!(order.erase("b"));
        assert!(!order.erase("b"));
        order.rename("c", "z");
        assert_eq!(order.ids(), ["a", "z"]);
        assert_eq!(order.next("a"), Some("z"));
        order.update_processing_numbers();
        assert_eq!(order.processing_number("z"), Some(1));
    }
}
