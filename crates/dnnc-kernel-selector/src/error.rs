use thiserror::Error;

/// Fatal selection failures. Candidate-local failures are
/// [`KernelError`](crate::kernel::KernelError) and never surface here.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("no {kind} implementation accepts layer '{layer_id}'")]
    NoImplementation { kind: &'static str, layer_id: String },
    #[error("{what} is not available on this device for layer '{layer_id}'")]
    TypeMismatch { what: String, layer_id: String },
    #[error("tuned variant {index:?} of '{kernel_name}' is unavailable: {reason}")]
    TunedVariantUnavailable {
        kernel_name: String,
        index: Option<usize>,
        reason: String,
    },
    #[error("tuning runner failed: {0}")]
    Runner(String),
    #[error("tuning cache I/O failed: {0}")]
    Cache(#[from] std::io::Error),
    #[error("request fingerprint failed: {0}")]
    Fingerprint(#[from] bincode::Error),
}

impl SelectorError {
    pub fn runner(msg: impl Into<String>) -> Self {
        SelectorError::Runner(msg.into())
    }
}
