use std::collections::HashMap;

use crate::error::CompileError;
use crate::primitives::{PrimitiveDesc, PrimitiveId};

/// Ordered collection of primitive descriptors to compile.
///
/// Dependencies may name primitives added later; they are resolved when the
/// program graph is built.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    primitives: Vec<PrimitiveDesc>,
    index: HashMap<PrimitiveId, usize>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, desc: PrimitiveDesc) -> Result<(), CompileError> {
        if self.index.contains_key(&desc.id) {
            return Err(CompileError::invalid_graph(format!(
                "primitive '{}' is defined twice",
                desc.id
            )));
        }
        self.index.insert(desc.id.clone(), self.primitives.len());
        self.primitives.push(desc);
        Ok(())
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(mut self, desc: PrimitiveDesc) -> Result<Self, CompileError> {
        self.add(desc)?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&PrimitiveDesc> {
        self.index.get(id).map(|&idx| &self.primitives[idx])
    }

    pub fn primitives(&self) -> &[PrimitiveDesc] {
        &self.primitives
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    /// First dependency that names no primitive, with the primitive using it.
    pub fn find_missing_dependency(&self) -> Option<(&str, &str)> {
        self.primitives.iter().find_map(|desc| {
            desc.dependencies()
                .into_iter()
                .find(|dep| !self.index.contains_key(dep.as_str()))
                .map(|dep| (desc.id.as_str(), dep.as_str()))
        })
    }
}
