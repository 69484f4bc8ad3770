//! Error types for the DocQL translator core.
//!
//! Every rejectable condition in the translators maps to one variant of
//! [`TranslateError`]. Errors carry a stable kind and a human-readable
//! message naming the offending key, path or value - nothing else. They are
//! fatal to the current translation; the core never panics and never returns
//! a partial result.
//!
//! # Error Taxonomy
//!
//! ```text
//! TranslateError
//! ├── InvalidPath          - field-path segment fails the safe-name rules
//! ├── InvalidOperator      - operator unknown in its context
//! ├── InvalidArgument      - operator value has the wrong shape or arity
//! ├── ConflictingUpdate    - two update operators write the same path
//! ├── UnresolvedPositional - positional token with no matching context
//! ├── InvalidStage         - aggregation stage unknown or misconfigured
//! ├── InvalidExpression    - aggregation expression unknown or malformed
//! └── Unsupported          - recognised construct deliberately out of scope
//! ```

use thiserror::Error;

/// Result type alias for DocQL translation.
pub type Result<T> = std::result::Result<T, TranslateError>;

/// Main error type for the DocQL translators.
///
/// Callers are expected to surface these verbatim to their clients; the
/// core performs no retries, no fallbacks and no logging of its own errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// A field-path segment failed the safe-name rules, or a positional
    /// token appeared where one is not allowed.
    #[error("Invalid path: {message}")]
    InvalidPath {
        /// Description naming the offending segment.
        message: String,
    },

    /// An operator is not in the supported set for its context.
    #[error("Invalid operator: {message}")]
    InvalidOperator {
        /// Description naming the offending operator.
        message: String,
    },

    /// An operator value has the wrong shape, the wrong arity, or a
    /// non-finite number where a finite one is required.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description naming the operator and the offending value.
        message: String,
    },

    /// Two update operators would mutate the same path, outside the
    /// `$min`/`$max` exception.
    #[error("Conflicting update: {message}")]
    ConflictingUpdate {
        /// Description naming the contested path and both operators.
        message: String,
    },

    /// A positional operator was encountered with no matching entry in the
    /// supplied positional context.
    #[error("Unresolved positional operator: {message}")]
    UnresolvedPositional {
        /// Description naming the unresolved token.
        message: String,
    },

    /// An aggregation stage is unknown, misconfigured or misordered.
    #[error("Invalid stage: {message}")]
    InvalidStage {
        /// Description naming the offending stage.
        message: String,
    },

    /// An aggregation expression is unknown or malformed.
    #[error("Invalid expression: {message}")]
    InvalidExpression {
        /// Description naming the offending expression.
        message: String,
    },

    /// A recognised construct that this core deliberately does not
    /// implement (delegated to an external collaborator).
    #[error("Unsupported: {message}")]
    Unsupported {
        /// Description naming the construct.
        message: String,
    },
}

impl TranslateError {
    // ========================================================================
    // Constructor helpers
    // ========================================================================

    /// Create an invalid-path error.
    #[must_use]
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::InvalidPath {
            message: message.into(),
        }
    }

    /// Create an invalid-operator error.
    #[must_use]
    pub fn invalid_operator(message: impl Into<String>) -> Self {
        Self::InvalidOperator {
            message: message.into(),
        }
    }

    /// Create an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a conflicting-update error.
    #[must_use]
    pub fn conflicting_update(message: impl Into<String>) -> Self {
        Self::ConflictingUpdate {
            message: message.into(),
        }
    }

    /// Create an unresolved-positional error.
    #[must_use]
    pub fn unresolved_positional(message: impl Into<String>) -> Self {
        Self::UnresolvedPositional {
            message: message.into(),
        }
    }

    /// Create an invalid-stage error.
    #[must_use]
    pub fn invalid_stage(message: impl Into<String>) -> Self {
        Self::InvalidStage {
            message: message.into(),
        }
    }

    /// Create an invalid-expression error.
    #[must_use]
    pub fn invalid_expression(message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            message: message.into(),
        }
    }

    /// Create an unsupported error.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    // ========================================================================
    // Error classification
    // ========================================================================

    /// Get the stable error code for client responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "INVALID_PATH",
            Self::InvalidOperator { .. } => "INVALID_OPERATOR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::ConflictingUpdate { .. } => "CONFLICTING_UPDATE",
            Self::UnresolvedPositional { .. } => "UNRESOLVED_POSITIONAL",
            Self::InvalidStage { .. } => "INVALID_STAGE",
            Self::InvalidExpression { .. } => "INVALID_EXPRESSION",
            Self::Unsupported { .. } => "UNSUPPORTED",
        }
    }

    /// Check whether the construct was recognised but deliberately not
    /// implemented, as opposed to malformed input.
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
