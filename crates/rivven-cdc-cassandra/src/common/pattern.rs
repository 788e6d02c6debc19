//! # Pattern Matching for Field Filtering
//!
//! Compiled glob/regex matching of fully qualified column names.
//!
//! Field names are matched in their `keyspace.table.column` form. Glob
//! syntax supports `*` (any run of characters) and `?` (one character);
//! matching is case-insensitive, as CQL identifiers are unless quoted.
//!
//! ## Example
//!
//! ```rust
//! use rivven_cdc_cassandra::common::pattern::{FieldPattern, FieldPatternSet};
//!
//! let pattern = FieldPattern::new("shop.orders.*_secret").unwrap();
//! assert!(pattern.matches_field("shop", "orders", "api_secret"));
//! assert!(!pattern.matches_field("shop", "users", "api_secret"));
//!
//! let set = FieldPatternSet::from_patterns(&["*.*.ssn".to_string()]).unwrap();
//! assert!(set.matches_field("hr", "people", "ssn"));
//! ```

use regex::Regex;

/// Pattern syntax type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatternSyntax {
    /// Glob syntax: `*` matches any chars, `?` matches single char
    #[default]
    Glob,
    /// Regular expression syntax
    Regex,
}

/// Error type for pattern operations
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("Empty pattern")]
    EmptyPattern,
}

/// A compiled field pattern.
#[derive(Debug, Clone)]
pub struct FieldPattern {
    pattern: String,
    regex: Regex,
    is_wildcard: bool,
}

impl FieldPattern {
    /// Compile a glob pattern.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        Self::with_syntax(pattern, PatternSyntax::Glob)
    }

    /// Compile a pattern with explicit syntax.
    pub fn with_syntax(pattern: &str, syntax: PatternSyntax) -> Result<Self, PatternError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(PatternError::EmptyPattern);
        }

        let is_wildcard = pattern == "*" || pattern == ".*" || pattern == "^.*$";

        let regex_pattern = match syntax {
            PatternSyntax::Glob => glob_to_regex(pattern),
            PatternSyntax::Regex => pattern.to_string(),
        };

        let regex = regex::RegexBuilder::new(&regex_pattern)
            .case_insensitive(true)
            .build()?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            is_wildcard,
        })
    }

    /// Check if text matches the pattern
    #[inline]
    pub fn matches(&self, text: &str) -> bool {
        self.is_wildcard || self.regex.is_match(text)
    }

    /// Check a column against the pattern in its `keyspace.table.column` form.
    pub fn matches_field(&self, keyspace: &str, table: &str, column: &str) -> bool {
        if self.is_wildcard {
            return true;
        }
        self.regex
            .is_match(&format!("{}.{}.{}", keyspace, table, column))
    }

    /// Get the original pattern string
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if this is a wildcard pattern (matches everything)
    pub fn is_wildcard(&self) -> bool {
        self.is_wildcard
    }
}

/// A set of field patterns; a field matches the set if it matches any member.
#[derive(Debug, Clone, Default)]
pub struct FieldPatternSet {
    patterns: Vec<FieldPattern>,
}

impl FieldPatternSet {
    /// Create an empty pattern set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pattern set from a list of glob patterns. Blank entries are ignored.
    pub fn from_patterns(patterns: &[String]) -> Result<Self, PatternError> {
        let mut set = Self::new();
        for pattern in patterns.iter().filter(|p| !p.trim().is_empty()) {
            set.add(pattern)?;
        }
        Ok(set)
    }

    /// Add a glob pattern to the set
    pub fn add(&mut self, pattern: &str) -> Result<(), PatternError> {
        self.patterns.push(FieldPattern::new(pattern)?);
        Ok(())
    }

    /// Check if a column matches any pattern in the set
    pub fn matches_field(&self, keyspace: &str, table: &str, column: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_field(keyspace, table, column))
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Get the number of patterns in the set
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Iterate over the patterns
    pub fn iter(&self) -> impl Iterator<Item = &FieldPattern> {
        self.patterns.iter()
    }
}

/// Convert a glob pattern to an anchored regex.
///
/// - `*` → `.*`
/// - `?` → `.`
fn glob_to_regex(pattern: &str) -> String {
    let escaped = regex::escape(pattern);
    let regex_pattern = escaped.replace(r"\*", ".*").replace(r"\?", ".");
    format!("^{}$", regex_pattern)
}
