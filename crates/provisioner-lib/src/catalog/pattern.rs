//! Instance-type allow patterns
//!
//! Preferences hold comma-separated patterns such as `"m4.*,m5.*"`.
//! A `*` is only meaningful as the last character; anywhere else it is
//! matched literally.

use serde::{Serialize, Serializer};
use std::fmt;

/// A single instance-type pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AllowPattern {
    /// Bare `*`
    Any,
    /// `m5.*` matches every type starting with `m5.`
    Prefix(String),
    /// No wildcard; exact, case-sensitive match
    Exact(String),
}

impl AllowPattern {
    /// Parse one pattern; blank input yields `None`
    pub fn parse(raw: &str) -> Option<Self> {
        let pattern = raw.trim();
        if pattern.is_empty() {
            return None;
        }
        if pattern == "*" {
            return Some(AllowPattern::Any);
        }
        match pattern.strip_suffix('*') {
            Some(prefix) => Some(AllowPattern::Prefix(prefix.to_string())),
            None => Some(AllowPattern::Exact(pattern.to_string())),
        }
    }

    pub fn matches(&self, instance_type: &str) -> bool {
        match self {
            AllowPattern::Any => true,
            AllowPattern::Prefix(prefix) => instance_type.starts_with(prefix.as_str()),
            AllowPattern::Exact(exact) => instance_type == exact,
        }
    }
}

impl fmt::Display for AllowPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowPattern::Any => f.write_str("*"),
            AllowPattern::Prefix(prefix) => write!(f, "{}*", prefix),
            AllowPattern::Exact(exact) => f.write_str(exact),
        }
    }
}

/// Ordered list of patterns parsed from one preference value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AllowList {
    patterns: Vec<AllowPattern>,
}

impl AllowList {
    /// Parse a comma-separated preference value
    pub fn parse(raw: &str) -> Self {
        Self {
            patterns: raw.split(',').filter_map(AllowPattern::parse).collect(),
        }
    }

    pub fn allow_all() -> Self {
        Self {
            patterns: vec![AllowPattern::Any],
        }
    }

    /// An empty list allows nothing
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[AllowPattern] {
        &self.patterns
    }

    /// True iff at least one pattern matches
    pub fn matches(&self, instance_type: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(instance_type))
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pattern) in self.patterns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", pattern)?;
        }
        Ok(())
    }
}

impl Serialize for AllowList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_wildcard() {
        let list = AllowList::parse("m4.*,m5.*");
        assert!(list.matches("m4.large"));
        assert!(list.matches("m5.2xlarge"));
        assert!(!list.matches("t2.large"));
        assert!(!list.matches("m4"));
    }

    #[test]
    fn test_bare_star_matches_everything() {
        let list = AllowList::parse("*");
        assert!(list.matches("anything"));
        assert!(list.matches(""));
    }

    #[test]
    fn test_exact_and_case_sensitive() {
        let list = AllowList::parse("c5.xlarge");
        assert!(list.matches("c5.xlarge"));
        assert!(!list.matches("C5.xlarge"));
        assert!(!list.matches("c5.xlarge2"));
    }

    #[test]
    fn test_inner_star_is_literal() {
        let list = AllowList::parse("m*.large");
        assert!(!list.matches("m5.large"));
        assert!(list.matches("m*.large"));
    }

    #[test]
    fn test_blank_entries_dropped() {
        let list = AllowList::parse(" , m5.* ,, ");
        assert_eq!(list.patterns().len(), 1);
        assert_eq!(list.to_string(), "m5.*");
    }

    #[test]
    fn test_empty_allows_nothing() {
        let list = AllowList::parse("");
        assert!(list.is_empty());
        assert!(!list.matches("m5.large"));
    }
}
