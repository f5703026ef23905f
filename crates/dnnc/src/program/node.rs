use dnnc_kernel_selector::KernelData;
use smallvec::SmallVec;

use crate::layout::{Layout, Padding};
use crate::primitives::{FusedActivation, PrimitiveDesc, PrimitiveId, PrimitiveKind, PrimitiveType};

pub type NodeIds = SmallVec<[PrimitiveId; 4]>;

/// One operation in the program graph.
///
/// Edges are ids into the owning [`Program`](super::Program); a node never
/// owns its neighbours. `dependencies` is ordered like the descriptor's
/// arguments, `users` carries no order.
#[derive(Debug, Clone)]
pub struct ProgramNode {
    pub(crate) desc: PrimitiveDesc,
    pub(crate) dependencies: NodeIds,
    pub(crate) users: NodeIds,
    /// `None` until computed, and again after an upstream change.
    pub(crate) output_layout: Option<Layout>,
    pub(crate) output: bool,
    pub(crate) constant: bool,
    pub(crate) constant_frontier: bool,
    pub(crate) data_flow: bool,
    pub(crate) fused_activation: FusedActivation,
    pub(crate) selected_impl: Option<KernelData>,
}

impl ProgramNode {
    pub(crate) fn new(desc: PrimitiveDesc) -> Self {
        Self {
            desc,
            dependencies: NodeIds::new(),
            users: NodeIds::new(),
            output_layout: None,
            output: false,
            constant: false,
            constant_frontier: false,
            data_flow: false,
            fused_activation: FusedActivation::default(),
            selected_impl: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.desc.id
    }

    pub fn desc(&self) -> &PrimitiveDesc {
        &self.desc
    }

    pub fn kind(&self) -> &PrimitiveKind {
        &self.desc.kind
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.desc.primitive_type()
    }

    pub fn is_type(&self, ty: PrimitiveType) -> bool {
        self.primitive_type() == ty
    }

    pub fn dependencies(&self) -> &[PrimitiveId] {
        &self.dependencies
    }

    pub fn dependency(&self, idx: usize) -> Option<&str> {
        self.dependencies.get(idx).map(String::as_str)
    }

    pub fn users(&self) -> &[PrimitiveId] {
        &self.users
    }

    pub fn has_user(&self, id: &str) -> bool {
        self.users.iter().any(|user| user == id)
    }

    pub fn is_input(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn is_endpoint(&self) -> bool {
        self.users.is_empty()
    }

    pub fn is_output(&self) -> bool {
        self.output
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    pub fn is_constant_frontier(&self) -> bool {
        self.constant_frontier
    }

    pub fn is_in_data_flow(&self) -> bool {
        self.data_flow
    }

    /// Cached output layout; `None` when it needs recomputing.
    pub fn cached_layout(&self) -> Option<&Layout> {
        self.output_layout.as_ref()
    }

    pub fn output_padding(&self) -> Padding {
        self.desc.output_padding
    }

    /// Activation the node applies to its result, its own or an absorbed one.
    pub fn activation(&self) -> FusedActivation {
        let own = self.desc.kind.activation();
        if own.is_none() {
            self.fused_activation
        } else {
            own
        }
    }

    pub fn has_fused_activation(&self) -> bool {
        !self.fused_activation.is_none()
    }

    pub fn selected_impl(&self) -> Option<&KernelData> {
        self.selected_impl.as_ref()
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.desc.kind, PrimitiveKind::Data { .. })
    }
}
