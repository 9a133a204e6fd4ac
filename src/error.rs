//! Closed error taxonomy for the gateway.
//!
//! Validation errors are local, cheap, and deterministic; they never touch the
//! database and are never retried. Execution errors are surfaced after the
//! configured retry budget, with messages sanitized of connection details.

use thiserror::Error;

/// Errors produced by the validator and the template catalog.
///
/// These are surfaced immediately with the specific reason so the caller can
/// adapt its request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The query contains a write or administrative operation.
    #[error("disallowed operation: {0}")]
    DisallowedOperation(String),

    /// The query could not be scanned (empty, garbage, or a form the
    /// conservative policy cannot reason about).
    #[error("unparseable query: {0}")]
    UnparseableQuery(String),

    /// The text contains a statement separator.
    #[error("multiple statements are not allowed")]
    MultipleStatements,

    /// No template registered under the given id.
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    /// A parameter has the wrong type, or a required parameter is absent.
    #[error("parameter '{name}' type mismatch: expected {expected}, got {got}")]
    ParameterTypeMismatch {
        name: String,
        expected: String,
        got: String,
    },

    /// A numeric parameter falls outside its declared range.
    #[error("parameter '{name}' out of range [{min}, {max}]: {value}")]
    ParameterOutOfRange {
        name: String,
        value: i64,
        min: i64,
        max: i64,
    },

    /// Comment delimiters, unbalanced quoting, or string splicing detected.
    #[error("injection pattern detected: {0}")]
    InjectionPatternDetected(String),
}

impl ValidationError {
    /// Stable snake_case identifier for the tool invocation contract.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::DisallowedOperation(_) => "disallowed_operation",
            ValidationError::UnparseableQuery(_) => "unparseable_query",
            ValidationError::MultipleStatements => "multiple_statements",
            ValidationError::UnknownTemplate(_) => "unknown_template",
            ValidationError::ParameterTypeMismatch { .. } => "parameter_type_mismatch",
            ValidationError::ParameterOutOfRange { .. } => "parameter_out_of_range",
            ValidationError::InjectionPatternDetected(_) => "injection_pattern_detected",
        }
    }
}

/// Errors produced by the execution path.
///
/// `Clone` is required so the outcome of a deduplicated execution can be
/// delivered to every waiter.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// The candidate query or its parameters were rejected before execution.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No pooled connection became available within the admission timeout.
    /// Not retried automatically.
    #[error("connection pool exhausted after {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// The query exceeded its wall-clock limit. Not retried: a slow query
    /// will not become fast on retry. The connection is discarded.
    #[error("query exceeded {timeout_ms}ms wall-clock limit")]
    QueryTimeout { timeout_ms: u64 },

    /// Transient connection-level failure, surfaced after the retry budget.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// The store rejected a theoretically valid query. Never retried.
    #[error("database error: {0}")]
    DatabaseError(String),
}

impl GatewayError {
    /// Stable snake_case identifier for the tool invocation contract.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(v) => v.kind(),
            GatewayError::PoolExhausted { .. } => "pool_exhausted",
            GatewayError::QueryTimeout { .. } => "query_timeout",
            GatewayError::ConnectionFailure(_) => "connection_failure",
            GatewayError::DatabaseError(_) => "database_error",
        }
    }

    /// Only connection-level failures are eligible for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::ConnectionFailure(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        let err = GatewayError::PoolExhausted { waited_ms: 500 };
        assert_eq!(err.kind(), "pool_exhausted");

        let err = GatewayError::Validation(ValidationError::MultipleStatements);
        assert_eq!(err.kind(), "multiple_statements");
    }

    #[test]
    fn test_only_connection_failures_are_transient() {
        assert!(GatewayError::ConnectionFailure("reset".into()).is_transient());
        assert!(!GatewayError::QueryTimeout { timeout_ms: 1000 }.is_transient());
        assert!(!GatewayError::PoolExhausted { waited_ms: 100 }.is_transient());
        assert!(!GatewayError::DatabaseError("unknown property".into()).is_transient());
    }

    #[test]
    fn test_display_names_offending_parameter() {
        let err = ValidationError::ParameterOutOfRange {
            name: "days".into(),
            value: 900,
            min: 1,
            max: 365,
        };
        assert!(err.to_string().contains("days"));
        assert!(err.to_string().contains("900"));
    }
}
