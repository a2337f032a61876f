// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::QueryError;

/// The result of a resilient execution.
///
/// Exactly one of [`data`](Self::data) and [`error`](Self::error) is present. A value served
/// from the cache, including a stale value returned because the data source was unreachable
/// or kept failing, is marked [`from_cache`](Self::from_cache).
///
/// # Examples
///
/// ```
/// use steadfast::Outcome;
///
/// fn describe(outcome: Outcome<u32>) -> String {
///     match outcome.into_result() {
///         Ok(value) => format!("got {value}"),
///         Err(error) => format!("failed: {error}"),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct Outcome<V> {
    data: Option<V>,
    error: Option<QueryError>,
    from_cache: bool,
}

impl<V> Outcome<V> {
    pub(crate) fn fresh(value: V) -> Self {
        Self {
            data: Some(value),
            error: None,
            from_cache: false,
        }
    }

    pub(crate) fn cached(value: V) -> Self {
        Self {
            data: Some(value),
            error: None,
            from_cache: true,
        }
    }

    pub(crate) fn failed(error: QueryError) -> Self {
        Self {
            data: None,
            error: Some(error),
            from_cache: false,
        }
    }

    /// The value, if the execution produced or fell back to one.
    #[must_use]
    pub fn data(&self) -> Option<&V> {
        self.data.as_ref()
    }

    /// The failure, if no value could be produced.
    #[must_use]
    pub fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    /// Whether the value came from the cache rather than a successful operation call.
    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Whether a value is present.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.data.is_some()
    }

    /// Consumes the outcome, returning the value if present.
    #[must_use]
    pub fn into_data(self) -> Option<V> {
        self.data
    }

    /// Converts into a `Result`, dropping the cache marker.
    ///
    /// # Errors
    ///
    /// Returns the failure when no value is present.
    pub fn into_result(self) -> Result<V, QueryError> {
        match (self.data, self.error) {
            (Some(value), _) => Ok(value),
            (None, Some(error)) => Err(error),
            (None, None) => Err(QueryError::new("outcome carried neither data nor error")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_value() {
        let outcome = Outcome::fresh(5);

        assert_eq!(outcome.data(), Some(&5));
        assert!(outcome.error().is_none());
        assert!(!outcome.from_cache());
        assert!(outcome.is_success());
        assert_eq!(outcome.into_result().unwrap(), 5);
    }

    #[test]
    fn cached_value() {
        let outcome = Outcome::cached("stale");

        assert!(outcome.from_cache());
        assert_eq!(outcome.into_data(), Some("stale"));
    }

    #[test]
    fn failure() {
        let outcome = Outcome::<u8>::failed(QueryError::new("boom").with_status(403));

        assert!(!outcome.is_success());
        assert!(!outcome.from_cache());
        assert_eq!(outcome.error().and_then(QueryError::status), Some(403));
        assert_eq!(outcome.into_result().unwrap_err().message(), "boom");
    }
}
