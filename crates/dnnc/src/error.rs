use dnnc_kernel_selector::SelectorError;
use thiserror::Error;

use crate::primitives::PrimitiveId;

/// Fatal compilation failure. Nothing is produced once one of these is raised.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("primitive '{user}' depends on unknown primitive '{dependency}'")]
    MissingDependency {
        user: PrimitiveId,
        dependency: PrimitiveId,
    },
    #[error("no node with id '{0}'")]
    MissingNode(PrimitiveId),
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error("invalid primitive '{id}': {reason}")]
    InvalidPrimitive { id: PrimitiveId, reason: String },
    #[error("no kernel for '{id}'")]
    NoImplementation {
        id: PrimitiveId,
        #[source]
        source: SelectorError,
    },
    #[error("constant evaluation of '{id}' failed")]
    ConstantEvaluation {
        id: PrimitiveId,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid build options: {0}")]
    InvalidOptions(String),
}

impl CompileError {
    pub(crate) fn invalid_primitive(id: impl Into<PrimitiveId>, reason: impl Into<String>) -> Self {
        CompileError::InvalidPrimitive {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_graph(reason: impl Into<String>) -> Self {
        CompileError::InvalidGraph(reason.into())
    }
}
