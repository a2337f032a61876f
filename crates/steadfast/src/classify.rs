// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Transient versus permanent failure classification.
//!
//! A failure is worth retrying when it looks like a network hiccup, a transient database
//! condition, or a server-side or throttling status. Everything else (validation errors,
//! missing rows, permission problems, cancellation) fails fast.

use crate::{QueryError, QueryErrorKind};

/// Message fragments that indicate a transient network failure, matched case-insensitively.
const TRANSIENT_MARKERS: &[&str] = &[
    "network",
    "fetch failed",
    "failed to fetch",
    "timeout",
    "timed out",
    "connection",
    "econnreset",
    "econnrefused",
    "etimedout",
    "socket hang up",
    "temporarily unavailable",
];

/// Error codes that indicate a transient condition.
const TRANSIENT_CODES: &[&str] = &[
    // SQLSTATE class 08: connection exceptions
    "08000",
    "08001",
    "08003",
    "08004",
    "08006",
    // serialization failure
    "40001",
    // deadlock detected
    "40P01",
    // lock not available
    "55P03",
    // query canceled by statement timeout
    "57014",
    // admin shutdown, cannot connect now
    "57P01",
    "57P03",
    // too many connections
    "53300",
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "DEADLINE_EXCEEDED",
    "UNAVAILABLE",
    "RESOURCE_EXHAUSTED",
];

const TOO_MANY_REQUESTS: u16 = 429;
const FIRST_SERVER_ERROR: u16 = 500;

/// Decides whether a failure is transient and worth retrying.
///
/// Implement this for domain error types and wrap them with
/// [`QueryError::classified`] so the executor honors the decision.
///
/// # Examples
///
/// ```
/// use steadfast::{Classify, QueryError};
///
/// #[derive(Debug, thiserror::Error)]
/// enum LedgerError {
///     #[error("ledger is rebalancing")]
///     Rebalancing,
///     #[error("account not found")]
///     NotFound,
/// }
///
/// impl Classify for LedgerError {
///     fn is_retryable(&self) -> bool {
///         matches!(self, Self::Rebalancing)
///     }
/// }
///
/// assert!(QueryError::classified(LedgerError::Rebalancing).is_retryable());
/// assert!(!QueryError::classified(LedgerError::NotFound).is_retryable());
/// ```
pub trait Classify {
    /// Returns `true` if retrying might succeed.
    fn is_retryable(&self) -> bool;
}

impl Classify for QueryError {
    fn is_retryable(&self) -> bool {
        is_retryable(self)
    }
}

impl QueryError {
    /// Returns `true` if retrying might succeed. See [`is_retryable`].
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        is_retryable(self)
    }
}

/// Returns `true` if `error` is transient.
///
/// An explicit decision made through [`QueryError::with_retryable`] or
/// [`QueryError::classified`] wins. Cancelled and panicked executions are never retried.
/// Otherwise the error is transient if its message contains a network failure marker, its
/// code is a known transient database or RPC code, or its status is 429 or at least 500.
///
/// # Examples
///
/// ```
/// use steadfast::{QueryError, is_retryable};
///
/// assert!(is_retryable(&QueryError::new("network request failed")));
/// assert!(is_retryable(&QueryError::new("serialization failure").with_code("40001")));
/// assert!(!is_retryable(&QueryError::new("not found").with_status(404)));
/// ```
#[must_use]
pub fn is_retryable(error: &QueryError) -> bool {
    if error.kind() != QueryErrorKind::Failed {
        return false;
    }

    if let Some(decided) = error.retryable_override() {
        return decided;
    }

    has_transient_marker(error.message())
        || error.code().is_some_and(is_transient_code)
        || error.status().is_some_and(is_transient_status)
}

fn has_transient_marker(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
}

fn is_transient_code(code: &str) -> bool {
    TRANSIENT_CODES.iter().any(|known| known.eq_ignore_ascii_case(code))
}

fn is_transient_status(status: u16) -> bool {
    status >= FIRST_SERVER_ERROR || status == TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::network("network request failed")]
    #[case::fetch("TypeError: Failed to fetch")]
    #[case::timeout("query timed out after 30s")]
    #[case::connection("Connection terminated unexpectedly")]
    #[case::reset("read ECONNRESET")]
    #[case::hang_up("socket hang up")]
    #[case::unavailable("service temporarily unavailable")]
    fn transient_messages_are_retryable(#[case] message: &str) {
        assert!(is_retryable(&QueryError::new(message)));
    }

    #[rstest]
    #[case::connection_exception("08006")]
    #[case::serialization("40001")]
    #[case::deadlock("40P01")]
    #[case::lock_not_available("55P03")]
    #[case::statement_timeout("57014")]
    #[case::admin_shutdown("57P01")]
    #[case::cannot_connect_now("57P03")]
    #[case::too_many_connections("53300")]
    #[case::deadline("DEADLINE_EXCEEDED")]
    #[case::lowercase_symbolic("unavailable")]
    fn transient_codes_are_retryable(#[case] code: &str) {
        assert!(is_retryable(&QueryError::new("query failed").with_code(code)));
    }

    #[rstest]
    #[case::server_error(500, true)]
    #[case::bad_gateway(502, true)]
    #[case::throttled(429, true)]
    #[case::bad_request(400, false)]
    #[case::forbidden(403, false)]
    #[case::not_found(404, false)]
    fn statuses(#[case] status: u16, #[case] expected: bool) {
        assert_eq!(is_retryable(&QueryError::new("request failed").with_status(status)), expected);
    }

    #[rstest]
    #[case::validation(QueryError::new("invalid input syntax for type uuid").with_code("22P02"))]
    #[case::permission(QueryError::new("permission denied for table accounts").with_code("42501"))]
    #[case::not_found(QueryError::new("row not found"))]
    fn permanent_failures_are_not_retryable(#[case] error: QueryError) {
        assert!(!is_retryable(&error));
    }

    #[test]
    fn cancellation_and_panics_are_never_retryable() {
        assert!(!is_retryable(&QueryError::cancelled()));
        assert!(!is_retryable(&QueryError::panicked()));
        assert!(!is_retryable(&QueryError::cancelled().with_retryable(true)));
    }

    #[test]
    fn explicit_decision_wins() {
        assert!(!is_retryable(&QueryError::new("network down").with_retryable(false)));
        assert!(is_retryable(&QueryError::new("conflict").with_status(409).with_retryable(true)));
    }

    #[test]
    fn trait_and_inherent_method_agree() {
        let error = QueryError::new("network request failed");
        assert_eq!(Classify::is_retryable(&error), error.is_retryable());
    }
}
