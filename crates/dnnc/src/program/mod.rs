//! Program graph: an id-keyed arena of nodes plus their processing order.
//!
//! The [`Program`] owns every [`ProgramNode`]. Edges are stored on both ends
//! as ids and validated against the arena when followed. All structural
//! edits go through the methods here so the two directions, the descriptor
//! argument slots and the processing order stay consistent.

mod node;
mod order;
pub mod primitive_type;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::{json, Value};

pub use node::{NodeIds, ProgramNode};
pub use order::{Iter as OrderIter, ProcessingOrder};
pub use primitive_type::{PrimitiveTypeOps, PrimitiveTypeRegistry};

use crate::error::CompileError;
use crate::layout::{Layout, Padding};
use crate::primitives::{PrimitiveDesc, PrimitiveId, PrimitiveKind, PrimitiveType};
use crate::topology::Topology;

#[derive(Debug, Clone)]
pub struct Program {
    nodes: BTreeMap<PrimitiveId, ProgramNode>,
    /// Nodes without dependencies, in creation order.
    inputs: Vec<PrimitiveId>,
    outputs: Vec<PrimitiveId>,
    order: ProcessingOrder,
    optimized_out: Vec<PrimitiveId>,
    registry: Arc<PrimitiveTypeRegistry>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new(Arc::new(PrimitiveTypeRegistry::builtin()))
    }
}

impl Program {
    pub fn new(registry: Arc<PrimitiveTypeRegistry>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            order: ProcessingOrder::new(),
            optimized_out: Vec::new(),
            registry,
        }
    }

    /// Builds the graph of `topology` and computes an initial processing order.
    pub fn from_topology(
        topology: &Topology,
        registry: Arc<PrimitiveTypeRegistry>,
    ) -> Result<Self, CompileError> {
        let mut program = Program::new(registry);
        for desc in topology.primitives() {
            program.create_or_get(desc.clone());
        }
        for desc in topology.primitives() {
            for dep in desc.dependencies() {
                if !program.contains(dep) {
                    return Err(CompileError::MissingDependency {
                        user: desc.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                program.connect(dep, &desc.id)?;
            }
        }
        program.calc_processing_order()?;
        tracing::debug!(nodes = program.len(), "program graph built");
        Ok(program)
    }

    pub fn registry(&self) -> &Arc<PrimitiveTypeRegistry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&ProgramNode> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: &str) -> Result<&ProgramNode, CompileError> {
        self.nodes
            .get(id)
            .ok_or_else(|| CompileError::MissingNode(id.to_string()))
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Result<&mut ProgramNode, CompileError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| CompileError::MissingNode(id.to_string()))
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &ProgramNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn inputs(&self) -> &[PrimitiveId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PrimitiveId] {
        &self.outputs
    }

    /// Ids removed by optimization, in removal order.
    pub fn optimized_out(&self) -> &[PrimitiveId] {
        &self.optimized_out
    }

    pub fn processing_order(&self) -> &ProcessingOrder {
        &self.order
    }

    pub(crate) fn order_mut(&mut self) -> &mut ProcessingOrder {
        &mut self.order
    }

    /// Returns the node with `desc.id`, creating it from `desc` if absent.
    ///
    /// A new node has no edges; [`connect`](Self::connect) adds them.
    pub fn create_or_get(&mut self, desc: PrimitiveDesc) -> &mut ProgramNode {
        let id = desc.id.clone();
        if !self.nodes.contains_key(&id) {
            self.inputs.push(id.clone());
        }
        self.nodes
            .entry(id)
            .or_insert_with(|| ProgramNode::new(desc))
    }

    /// Appends `dep` to `user`'s dependencies and `user` to `dep`'s users.
    pub fn connect(&mut self, dep: &str, user: &str) -> Result<(), CompileError> {
        if dep == user {
            return Err(CompileError::invalid_graph(format!("'{dep}' cannot depend on itself")));
        }
        self.node(dep)?;
        let user_node = self.node_mut(user)?;
        user_node.dependencies.push(dep.to_string());
        self.inputs.retain(|id| id != user);

        let dep_node = self.node_mut(dep)?;
        if !dep_node.has_user(user) {
            dep_node.users.push(user.to_string());
        }
        self.invalidate_layout(user);
        Ok(())
    }

    /// Drops every edge between `dep` and `user`, in both directions.
    pub fn disconnect(&mut self, dep: &str, user: &str) -> Result<(), CompileError> {
        let user_node = self.node_mut(user)?;
        user_node.dependencies.retain(|id| id != dep);
        let now_input = user_node.dependencies.is_empty();
        if let Some(dep_node) = self.nodes.get_mut(dep) {
            dep_node.users.retain(|id| id != user);
        }
        if now_input && !self.inputs.iter().any(|id| id == user) {
            self.inputs.push(user.to_string());
        }
        self.invalidate_layout(user);
        Ok(())
    }

    /// Points `user`'s `idx`-th dependency, and the matching descriptor
    /// argument, at `new_dep`.
    pub fn replace_dependency(
        &mut self,
        user: &str,
        idx: usize,
        new_dep: &str,
    ) -> Result<(), CompileError> {
        self.node(new_dep)?;
        let user_node = self.node_mut(user)?;
        let old_dep = user_node.dependencies.get(idx).cloned().ok_or_else(|| {
            CompileError::invalid_graph(format!("'{user}' has no dependency #{idx}"))
        })?;
        if old_dep == new_dep {
            return Ok(());
        }
        user_node.dependencies[idx] = new_dep.to_string();
        if let Some(slot) = user_node.desc.kind.dependencies_mut().into_iter().nth(idx) {
            *slot = new_dep.to_string();
        }
        let still_used = user_node.dependencies.iter().any(|id| *id == old_dep);

        if !still_used {
            if let Some(old_node) = self.nodes.get_mut(&old_dep) {
                old_node.users.retain(|id| id != user);
            }
        }
        let new_node = self.node_mut(new_dep)?;
        if !new_node.has_user(user) {
            new_node.users.push(user.to_string());
        }
        self.invalidate_layout(user);
        Ok(())
    }

    /// Replaces every occurrence of `old_dep` among `user`'s dependencies.
    pub fn replace_dependency_of(
        &mut self,
        user: &str,
        old_dep: &str,
        new_dep: &str,
    ) -> Result<(), CompileError> {
        let slots: Vec<usize> = self
            .node(user)?
            .dependencies
            .iter()
            .enumerate()
            .filter(|(_, id)| id.as_str() == old_dep)
            .map(|(idx, _)| idx)
            .collect();
        for idx in slots {
            self.replace_dependency(user, idx, new_dep)?;
        }
        Ok(())
    }

    /// Removes `id` if it has no edges and is not an output.
    pub fn remove_if_dangling(&mut self, id: &str) -> Result<bool, CompileError> {
        let node = self.node(id)?;
        if !node.users.is_empty() || !node.dependencies.is_empty() || node.output {
            return Ok(false);
        }
        self.remove_node(id)?;
        Ok(true)
    }

    /// Unlinks `id` from all neighbours.
    pub fn remove_all_connections(&mut self, id: &str) -> Result<(), CompileError> {
        let node = self.node(id)?;
        let deps: Vec<PrimitiveId> = node.dependencies.to_vec();
        let users: Vec<PrimitiveId> = node.users.to_vec();
        for dep in deps {
            self.disconnect(&dep, id)?;
        }
        for user in users {
            self.disconnect(id, &user)?;
        }
        Ok(())
    }

    /// Turns the edge `dep -> user` into `user -> dep`.
    pub fn reverse_connection(&mut self, dep: &str, user: &str) -> Result<(), CompileError> {
        if !self.node(dep)?.has_user(user) {
            return Err(CompileError::invalid_graph(format!(
                "no edge from '{dep}' to '{user}'"
            )));
        }
        self.disconnect(dep, user)?;
        self.connect(user, dep)
    }

    /// Erases `id` from the arena and the processing order and logs it as
    /// optimized out. Edges are unlinked first.
    pub(crate) fn remove_node(&mut self, id: &str) -> Result<ProgramNode, CompileError> {
        self.remove_all_connections(id)?;
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| CompileError::MissingNode(id.to_string()))?;
        self.order.erase(id);
        self.inputs.retain(|input| input != id);
        self.outputs.retain(|output| output != id);
        self.optimized_out.push(id.to_string());
        tracing::trace!(node = id, "node removed");
        Ok(node)
    }

    /// Inserts `desc` between `next` and its `dep_idx`-th dependency.
    ///
    /// The new node's own arguments must already name that dependency. If a
    /// node with the same id exists it must be a reorder of that dependency
    /// (a shared reorder); only the edge of `next` is redirected to it.
    pub fn add_intermediate(
        &mut self,
        desc: PrimitiveDesc,
        next: &str,
        dep_idx: usize,
    ) -> Result<(), CompileError> {
        let prev = self
            .node(next)?
            .dependency(dep_idx)
            .map(str::to_string)
            .ok_or_else(|| {
                CompileError::invalid_graph(format!("'{next}' has no dependency #{dep_idx}"))
            })?;
        let id = desc.id.clone();

        if let Some(existing) = self.get(&id) {
            let shares_input = existing.is_type(PrimitiveType::Reorder)
                && existing.dependency(0) == Some(prev.as_str());
            if !shares_input {
                return Err(CompileError::invalid_graph(format!(
                    "'{id}' already exists and is not a reorder of '{prev}'"
                )));
            }
        } else {
            if !desc.dependencies().iter().any(|dep| **dep == prev) {
                return Err(CompileError::invalid_graph(format!(
                    "intermediate '{id}' does not consume '{prev}'"
                )));
            }
            let deps: Vec<PrimitiveId> = desc.dependencies().into_iter().cloned().collect();
            self.create_or_get(desc);
            for dep in &deps {
                self.connect(dep, &id)?;
            }
            self.order.insert_after(&prev, id.clone());
        }
        self.replace_dependency(next, dep_idx, &id)?;

        let prev_node = self.node(&prev)?;
        let (constant, data_flow, frontier) =
            (prev_node.constant, prev_node.data_flow, prev_node.constant_frontier);
        let node = self.node_mut(&id)?;
        node.constant = constant;
        node.data_flow = data_flow;
        if frontier {
            node.constant_frontier = true;
            let still_frontier = self
                .node(&prev)?
                .users
                .iter()
                .any(|user| self.nodes.get(user).is_some_and(|u| !u.constant));
            self.node_mut(&prev)?.constant_frontier = still_frontier;
        }
        Ok(())
    }

    /// Swaps `old` for a node built from `desc`, which then takes `old`'s id.
    ///
    /// Users, output and constant flags and the processing position move to
    /// the new node. With `keep_dependencies` the new node also inherits
    /// `old`'s dependencies; otherwise it is connected to its own arguments.
    pub fn replace(
        &mut self,
        old: &str,
        mut desc: PrimitiveDesc,
        keep_dependencies: bool,
    ) -> Result<(), CompileError> {
        let old_node = self.node(old)?.clone();
        let temp_id = self.unused_id(&format!("{old}__replacement"));
        desc.id = temp_id.clone();

        let deps: Vec<PrimitiveId> = if keep_dependencies {
            old_node.dependencies.to_vec()
        } else {
            desc.dependencies().into_iter().cloned().collect()
        };
        self.create_or_get(desc);
        for dep in &deps {
            self.connect(dep, &temp_id)?;
        }
        for user in &old_node.users {
            self.replace_dependency_of(user, old, &temp_id)?;
        }
        {
            let new_node = self.node_mut(&temp_id)?;
            new_node.output = old_node.output;
            new_node.constant = old_node.constant;
            new_node.constant_frontier = old_node.constant_frontier;
            new_node.data_flow = old_node.data_flow;
        }
        self.order.insert_after(old, temp_id.clone());
        let was_output = old_node.output;

        self.remove_all_connections(old)?;
        self.nodes.remove(old);
        self.order.erase(old);
        self.inputs.retain(|id| id != old);
        self.outputs.retain(|id| id != old);
        if was_output {
            self.outputs.push(temp_id.clone());
        }
        self.rename(&temp_id, old)
    }

    /// Removes a single-input node, redirecting its users to its input.
    ///
    /// An output node hands its output flag and its id to the input. Returns
    /// false, leaving the graph untouched, when the node has more than one
    /// dependency or when both it and its input are outputs.
    pub fn extract_and_remove(&mut self, id: &str) -> Result<bool, CompileError> {
        let node = self.node(id)?;
        let [input] = node.dependencies.as_slice() else {
            return Ok(false);
        };
        let input = input.clone();
        let input_node = self.node(&input)?;
        if node.output && input_node.output {
            return Ok(false);
        }
        let users: Vec<PrimitiveId> = node.users.to_vec();
        let was_output = node.output;
        let frontier = node.constant_frontier;

        for user in &users {
            self.replace_dependency_of(user, id, &input)?;
        }
        self.remove_node(id)?;
        if frontier {
            self.node_mut(&input)?.constant_frontier = true;
        }
        if was_output {
            self.mark_output(&input)?;
            self.rename(&input, id)?;
        }
        Ok(true)
    }

    /// Gives node `old` the id `new`, updating every reference to it.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), CompileError> {
        if old == new {
            return Ok(());
        }
        if self.contains(new) {
            return Err(CompileError::invalid_graph(format!(
                "cannot rename '{old}': '{new}' already exists"
            )));
        }
        let mut node = self
            .nodes
            .remove(old)
            .ok_or_else(|| CompileError::MissingNode(old.to_string()))?;
        node.desc.id = new.to_string();

        for dep in node.dependencies.iter() {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                for user in dep_node.users.iter_mut().filter(|user| *user == old) {
                    *user = new.to_string();
                }
            }
        }
        for user in node.users.iter() {
            if let Some(user_node) = self.nodes.get_mut(user) {
                for dep in user_node.dependencies.iter_mut().filter(|dep| *dep == old) {
                    *dep = new.to_string();
                }
                for slot in user_node.desc.kind.dependencies_mut() {
                    if slot == old {
                        *slot = new.to_string();
                    }
                }
            }
        }
        self.nodes.insert(new.to_string(), node);
        self.order.rename(old, new);
        for id in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            if id == old {
                *id = new.to_string();
            }
        }
        Ok(())
    }

    /// First id of the form `base`, `base_1`, `base_2`, ... not in use.
    pub(crate) fn unused_id(&self, base: &str) -> PrimitiveId {
        if !self.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Clears the cached layout of `id` and of everything downstream of it.
    pub(crate) fn invalidate_layout(&mut self, id: &str) {
        let mut visited: HashSet<PrimitiveId> = HashSet::new();
        let mut worklist = vec![id.to_string()];
        while let Some(current) = worklist.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&current) {
                node.output_layout = None;
                worklist.extend(node.users.iter().cloned());
            }
        }
    }

    /// Output layout of `id`, recomputed through the kind registry when stale.
    pub fn get_output_layout(&mut self, id: &str) -> Result<Layout, CompileError> {
        let node = self.node(id)?;
        if let Some(layout) = node.output_layout {
            return Ok(layout);
        }
        let deps: Vec<PrimitiveId> = node.dependencies.to_vec();
        let mut inputs = Vec::with_capacity(deps.len());
        for dep in &deps {
            inputs.push(self.get_output_layout(dep)?);
        }
        let node = self.node(id)?;
        let ops = self.registry.get(node.primitive_type())?;
        let layout = ops.calc_output_layout(node, &inputs)?;
        self.node_mut(id)?.output_layout = Some(layout);
        Ok(layout)
    }

    /// Layouts of `id`'s dependencies, in argument order.
    pub fn input_layouts(&mut self, id: &str) -> Result<Vec<Layout>, CompileError> {
        let deps: Vec<PrimitiveId> = self.node(id)?.dependencies.to_vec();
        deps.iter().map(|dep| self.get_output_layout(dep)).collect()
    }

    pub fn recalc_all_layouts(&mut self) -> Result<(), CompileError> {
        for id in self.order.ids() {
            self.get_output_layout(&id)?;
        }
        Ok(())
    }

    /// Sets `id`'s output padding; downstream layouts are recomputed lazily.
    pub fn set_output_padding(&mut self, id: &str, padding: Padding) -> Result<(), CompileError> {
        let node = self.node_mut(id)?;
        if node.desc.output_padding == padding {
            return Ok(());
        }
        node.desc.output_padding = padding;
        self.invalidate_layout(id);
        Ok(())
    }

    /// Marks the explicitly requested outputs, or every endpoint when none are given.
    pub fn set_outputs(&mut self, requested: &[PrimitiveId]) -> Result<(), CompileError> {
        for node in self.nodes.values_mut() {
            node.output = false;
        }
        self.outputs.clear();
        let outputs: Vec<PrimitiveId> = if requested.is_empty() {
            self.order
                .iter()
                .filter(|id| self.nodes.get(*id).is_some_and(ProgramNode::is_endpoint))
                .map(str::to_string)
                .collect()
        } else {
            requested.to_vec()
        };
        for id in outputs {
            self.mark_output(&id)?;
        }
        Ok(())
    }

    pub(crate) fn mark_output(&mut self, id: &str) -> Result<(), CompileError> {
        self.node_mut(id)?.output = true;
        if !self.outputs.iter().any(|output| output == id) {
            self.outputs.push(id.to_string());
        }
        Ok(())
    }

    /// Literals are constant; any other node is constant when it has
    /// dependencies and all of them are constant. Constant dependencies of
    /// non-constant nodes form the constant frontier.
    pub fn mark_constants(&mut self) -> Result<(), CompileError> {
        for id in self.order.ids() {
            let node = self.node(&id)?;
            let constant = match node.kind() {
                PrimitiveKind::Data { .. } => true,
                PrimitiveKind::InputLayout(_) => false,
                _ => {
                    !node.dependencies.is_empty()
                        && node
                            .dependencies
                            .iter()
                            .all(|dep| self.nodes.get(dep).is_some_and(|d| d.constant))
                }
            };
            let node = self.node_mut(&id)?;
            node.constant = constant;
            node.constant_frontier = false;
        }
        for id in self.order.ids() {
            let node = self.node(&id)?;
            if node.constant {
                continue;
            }
            let deps: Vec<PrimitiveId> = node.dependencies.to_vec();
            for dep in deps {
                let dep_node = self.node_mut(&dep)?;
                if dep_node.constant {
                    dep_node.constant_frontier = true;
                }
            }
        }
        Ok(())
    }

    /// Marks the non-constant nodes that feed a non-constant endpoint or output.
    pub fn mark_data_flow(&mut self) -> Result<(), CompileError> {
        let mut worklist: VecDeque<PrimitiveId> = VecDeque::new();
        for node in self.nodes.values_mut() {
            node.data_flow = false;
        }
        for node in self.nodes.values() {
            if !node.constant && (node.is_endpoint() || node.output) {
                worklist.push_back(node.desc.id.clone());
            }
        }
        let mut visited: HashSet<PrimitiveId> = HashSet::new();
        while let Some(id) = worklist.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let node = self.node_mut(&id)?;
            if node.constant {
                continue;
            }
            node.data_flow = true;
            worklist.extend(node.dependencies.iter().cloned());
        }
        Ok(())
    }

    /// Recomputes the processing order by depth-first search from the inputs.
    pub fn calc_processing_order(&mut self) -> Result<(), CompileError> {
        self.order = order::dfs_order(self)?;
        self.order.update_processing_numbers();
        Ok(())
    }

    /// Reorders by depth so that nodes of one level are adjacent.
    pub fn calculate_bfs_processing_order(&mut self) -> Result<(), CompileError> {
        self.order = order::bfs_order(self)?;
        self.order.update_processing_numbers();
        Ok(())
    }

    pub fn update_processing_numbers(&mut self) {
        self.order.update_processing_numbers();
    }

    /// True when every dependency of `id` precedes it. Uses the numbers of
    /// the last [`update_processing_numbers`](Self::update_processing_numbers).
    pub fn is_correct(&self, id: &str) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let Some(position) = self.order.processing_number(id) else {
            return false;
        };
        node.dependencies.iter().all(|dep| {
            self.order
                .processing_number(dep)
                .is_some_and(|dep_position| dep_position < position)
        })
    }

    /// True when the whole order is a topological order of the graph.
    pub fn is_order_valid(&self) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        for id in self.order.iter() {
            let Some(node) = self.nodes.get(id) else {
                return false;
            };
            if !node.dependencies.iter().all(|dep| seen.contains(dep.as_str())) {
                return false;
            }
            seen.insert(id);
        }
        seen.len() == self.nodes.len()
    }

    /// Moves users of `id` that precede it to right after it, transitively.
    pub(crate) fn relocate_users_after(&mut self, id: &str) -> Result<(), CompileError> {
        self.order.update_processing_numbers();
        let mut anchor = id.to_string();
        let mut worklist: VecDeque<PrimitiveId> = VecDeque::from([id.to_string()]);
        let mut visited: HashSet<PrimitiveId> = HashSet::new();
        while let Some(current) = worklist.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let position = self.order.processing_number(&current);
            let users: Vec<PrimitiveId> = self.node(&current)?.users.to_vec();
            for user in users {
                let misplaced = match (self.order.processing_number(&user), position) {
                    (Some(user_pos), Some(pos)) => user_pos < pos,
                    _ => false,
                };
                if misplaced {
                    self.order.insert_after(&anchor, user.clone());
                    anchor = user.clone();
                    self.order.update_processing_numbers();
                    worklist.push_back(user);
                }
            }
        }
        Ok(())
    }

    /// Debug dump of the graph.
    pub fn to_json(&self) -> Value {
        let nodes: Vec<Value> = self
            .order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|node| {
                json!({
                    "id": node.id(),
                    "type": node.primitive_type().as_str(),
                    "dependencies": node.dependencies(),
                    "users": node.users(),
                    "output": node.output,
                    "constant": node.constant,
                    "data_flow": node.data_flow,
                    "layout": node.output_layout,
                    "kernel": node.selected_impl.as_ref().map(|kd| kd.kernel_name.clone()),
                })
            })
            .collect();
        json!({
            "nodes": nodes,
            "inputs": self.inputs,
            "outputs": self.outputs,
            "optimized_out": self.optimized_out,
        })
    }
}
