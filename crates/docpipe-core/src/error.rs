use docpipe_retry::ErrorClass;

/// The error taxonomy steps classify their failures into. The executor
/// only needs to know whether to retry; the finer-grained variants exist
/// so step implementations and logs carry a precise reason.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Network timeout, rate limit, transient 5xx, connection reset —
    /// retried with backoff.
    #[error("transient failure: {0}")]
    Transient(String),
    /// The step's output could not be trusted (e.g. dimension mismatch,
    /// malformed structured result) — not retried, the attempt is poisoned.
    #[error("poisoned result: {0}")]
    Poison(String),
    /// A precondition the caller must satisfy was violated (e.g. called
    /// outside a transaction, missing required config) — a bug, not retried.
    #[error("invariant violation: {0}")]
    Invariant(String),
    /// Content policy violation, schema validation failure, malformed
    /// payload — permanent, not retried.
    #[error("infrastructure rejected the request: {0}")]
    Infrastructure(String),
}

impl PipelineError {
    /// Whether the executor should retry the step (causing offset
    /// non-commit) or write a terminal `failed` ledger row and move on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }

    /// Maps onto the generic retry-crate classification used to look up a
    /// per-error-class backoff configuration.
    pub fn error_class(&self) -> ErrorClass {
        match self {
            PipelineError::Transient(_) => ErrorClass::Retryable,
            PipelineError::Poison(_) => ErrorClass::Ambiguous,
            PipelineError::Invariant(_) | PipelineError::Infrastructure(_) => {
                ErrorClass::Permanent
            }
        }
    }
}

impl From<docpipe_store::StoreError> for PipelineError {
    fn from(e: docpipe_store::StoreError) -> Self {
        match e {
            docpipe_store::StoreError::Database { message } => PipelineError::Transient(message),
            docpipe_store::StoreError::Serialization { message } => {
                PipelineError::Poison(message)
            }
            docpipe_store::StoreError::Invariant { message } => PipelineError::Invariant(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(PipelineError::Transient("timeout".to_string()).is_retryable());
        assert!(!PipelineError::Poison("bad output".to_string()).is_retryable());
        assert!(!PipelineError::Invariant("missing config".to_string()).is_retryable());
        assert!(!PipelineError::Infrastructure("rejected".to_string()).is_retryable());
    }

    #[test]
    fn error_class_mapping() {
        assert_eq!(
            PipelineError::Transient("x".to_string()).error_class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            PipelineError::Poison("x".to_string()).error_class(),
            ErrorClass::Ambiguous
        );
        assert_eq!(
            PipelineError::Invariant("x".to_string()).error_class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            PipelineError::Infrastructure("x".to_string()).error_class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn store_error_conversion_preserves_retryability() {
        let transient: PipelineError = docpipe_store::StoreError::Database {
            message: "connection reset".to_string(),
        }
        .into();
        assert!(transient.is_retryable());

        let poison: PipelineError = docpipe_store::StoreError::Serialization {
            message: "bad json".to_string(),
        }
        .into();
        assert!(!poison.is_retryable());
        assert!(matches!(poison, PipelineError::Poison(_)));

        let invariant: PipelineError = docpipe_store::StoreError::Invariant {
            message: "unreachable state".to_string(),
        }
        .into();
        assert!(matches!(invariant, PipelineError::Invariant(_)));
    }
}
