// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use regex::Regex;

use crate::{Error, Result};

const WILDCARD: char = '*';

/// A key or glob pattern used for invalidation.
///
/// `*` matches any run of characters, including none. Every other character matches itself.
#[derive(Debug, Clone)]
pub(crate) enum KeyPattern {
    Exact(String),
    Glob(Regex),
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if !pattern.contains(WILDCARD) {
            return Ok(Self::exact(pattern));
        }

        let body = pattern.split(WILDCARD).map(regex::escape).collect::<Vec<_>>().join(".*");

        Regex::new(&format!("^(?s:{body})$"))
            .map(Self::Glob)
            .map_err(|source| Error::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })
    }

    pub fn exact(key: &str) -> Self {
        Self::Exact(key.to_owned())
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Glob(regex) => regex.is_match(key),
        }
    }

    pub fn as_exact(&self) -> Option<&str> {
        match self {
            Self::Exact(exact) => Some(exact),
            Self::Glob(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("user:1", "user:1", true)]
    #[case("user:1", "user:10", false)]
    #[case("user:*", "user:10", true)]
    #[case("user:*", "user:", true)]
    #[case("user:*", "account:1", false)]
    #[case("*:orders", "tenant-a:orders", true)]
    #[case("a*c*e", "abcde", true)]
    #[case("a*c*e", "abcdef", false)]
    #[case("price[1].*", "price[1].usd", true)]
    #[case("price[1].*", "price1xusd", false)]
    #[case("*", "anything\nat all", true)]
    fn matching(#[case] pattern: &str, #[case] key: &str, #[case] expected: bool) {
        assert_eq!(KeyPattern::parse(pattern).unwrap().matches(key), expected);
    }

    #[test]
    fn exact_keys_do_not_compile_a_regex() {
        let pattern = KeyPattern::parse("report:2024").unwrap();
        assert_eq!(pattern.as_exact(), Some("report:2024"));

        let pattern = KeyPattern::parse("report:*").unwrap();
        assert!(pattern.as_exact().is_none());
    }

    #[test]
    fn exact_treats_wildcard_literally() {
        let pattern = KeyPattern::exact("user:*");

        assert!(pattern.matches("user:*"));
        assert!(!pattern.matches("user:1"));
    }
}
