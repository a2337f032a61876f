// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use thiserror::Error;

use crate::Classify;

/// What kind of failure a [`QueryError`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum QueryErrorKind {
    /// The operation itself reported a failure.
    Failed,
    /// Execution was cancelled through a cancellation token.
    Cancelled,
    /// The operation panicked.
    Panicked,
}

/// A failure reported by a data-source operation.
///
/// Operation failures are values, not Rust errors returned from the executor: they travel
/// inside an [`Outcome`](crate::Outcome) and are shared between every caller that joined the
/// same in-flight request, which is why this type is cheap to clone.
///
/// # Examples
///
/// ```
/// use steadfast::QueryError;
///
/// let error = QueryError::new("upstream returned 503").with_status(503);
///
/// assert_eq!(error.status(), Some(503));
/// assert!(error.is_retryable());
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct QueryError {
    message: String,
    code: Option<String>,
    status: Option<u16>,
    kind: QueryErrorKind,
    retryable: Option<bool>,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Creates an operation failure with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
            kind: QueryErrorKind::Failed,
            retryable: None,
            source: None,
        }
    }

    /// Wraps an error, taking its display text as the message.
    #[must_use]
    pub fn from_error(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = error.to_string();
        Self {
            source: Some(Arc::new(error)),
            ..Self::new(message)
        }
    }

    /// Wraps a domain error that decides its own retryability.
    #[must_use]
    pub fn classified<E>(error: E) -> Self
    where
        E: Classify + std::error::Error + Send + Sync + 'static,
    {
        let retryable = error.is_retryable();
        Self::from_error(error).with_retryable(retryable)
    }

    /// The error reported to callers joined to a cancelled execution.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            kind: QueryErrorKind::Cancelled,
            ..Self::new("operation cancelled")
        }
    }

    pub(crate) fn panicked() -> Self {
        Self {
            kind: QueryErrorKind::Panicked,
            ..Self::new("operation panicked")
        }
    }

    /// Attaches a driver or protocol error code, such as a SQLSTATE.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attaches an HTTP-style status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Overrides the built-in classification.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The driver or protocol error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// The HTTP-style status, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// The kind of failure.
    #[must_use]
    pub fn kind(&self) -> QueryErrorKind {
        self.kind
    }

    /// Whether this error reports a cancelled execution.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind == QueryErrorKind::Cancelled
    }

    pub(crate) fn retryable_override(&self) -> Option<bool> {
        self.retryable
    }
}

/// A retry configuration value violated one of its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// `initial_delay` was larger than `max_delay`.
    #[error("initial_delay must not exceed max_delay")]
    InitialDelayExceedsMax,

    /// `exponential_base` was below 1 or not finite.
    #[error("exponential_base must be a finite number of at least 1")]
    InvalidExponentialBase,
}
