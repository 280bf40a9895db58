//! Value matchers used by traffic filters.
//!
//! A matcher is a pure predicate. Regex patterns are compiled once, when the
//! matcher is built; a malformed pattern degrades to "match anything" rather
//! than failing the pipeline.

use hyper::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Multi-valued string map, as produced by query strings, forms and headers.
pub type ValueMap = BTreeMap<String, Vec<String>>;

/// Pattern accepting any string, including the empty one.
const MATCH_ANYTHING: &str = "";

static ANY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(MATCH_ANYTHING).expect("empty pattern always compiles"));

/// The kind tag of a [`Matcher`], checked once when a matcher is assigned to a
/// filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    KeyValue,
    Range,
}

impl MatcherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatcherKind::KeyValue => "key-value",
            MatcherKind::Range => "range",
        }
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of matcher variants.
#[derive(Debug, Clone)]
pub enum Matcher {
    KeyValue(KeyValueMatcher),
    Range(RangeMatcher),
}

impl Matcher {
    pub fn kind(&self) -> MatcherKind {
        match self {
            Matcher::KeyValue(_) => MatcherKind::KeyValue,
            Matcher::Range(_) => MatcherKind::Range,
        }
    }
}

impl From<KeyValueMatcher> for Matcher {
    fn from(m: KeyValueMatcher) -> Self {
        Matcher::KeyValue(m)
    }
}

impl From<RangeMatcher> for Matcher {
    fn from(m: RangeMatcher) -> Self {
        Matcher::Range(m)
    }
}

/// Matches multi-valued maps: at least one key must match the key pattern
/// and, for that same key, at least one value must match the value pattern.
///
/// For a case-insensitive match, prefix the pattern with `(?i)`, as in
/// `(?i)\.example\.com$`.
#[derive(Debug, Clone)]
pub struct KeyValueMatcher {
    key: Arc<Regex>,
    value: Arc<Regex>,
}

impl KeyValueMatcher {
    /// Build a matcher from optional patterns. Missing or malformed patterns
    /// accept anything.
    pub fn new(key_pattern: Option<&str>, value_pattern: Option<&str>) -> Self {
        Self {
            key: Arc::new(compile_or_any(key_pattern)),
            value: Arc::new(compile_or_any(value_pattern)),
        }
    }

    /// A matcher accepting any non-empty map.
    pub fn any() -> Self {
        Self::new(None, None)
    }

    pub fn key_pattern(&self) -> &str {
        self.key.as_str()
    }

    pub fn value_pattern(&self) -> &str {
        self.value.as_str()
    }

    /// Match a multi-valued map. An absent map never matches.
    pub fn matches(&self, values: Option<&ValueMap>) -> bool {
        let Some(values) = values else {
            return false;
        };
        values
            .iter()
            .filter(|(k, _)| self.key.is_match(k))
            .any(|(_, vs)| vs.iter().any(|v| self.value.is_match(v)))
    }

    /// Match HTTP headers by their canonical names (`Content-Type`). Values
    /// that are not visible ASCII are skipped.
    pub fn matches_headers(&self, headers: &HeaderMap) -> bool {
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name, v)))
            .any(|(name, v)| {
                self.key.is_match(&canonical_header_name(name.as_str())) && self.value.is_match(v)
            })
    }
}

/// Canonical form of a header name: the first letter and every letter
/// following a hyphen upper case, the rest lower case.
///
/// ```
/// use sift_agent::filters::canonical_header_name;
///
/// assert_eq!(canonical_header_name("content-type"), "Content-Type");
/// assert_eq!(canonical_header_name("x-API-key"), "X-Api-Key");
/// ```
pub fn canonical_header_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

impl Default for KeyValueMatcher {
    fn default() -> Self {
        Self::any()
    }
}

fn compile_or_any(pattern: Option<&str>) -> Regex {
    let Some(pattern) = pattern else {
        return ANY_VALUE.clone();
    };
    Regex::new(pattern).unwrap_or_else(|e| {
        warn!(pattern, error = %e, "invalid matcher pattern, accepting any value");
        ANY_VALUE.clone()
    })
}

/// Lowest valid HTTP status code.
pub const HTTP_STATUS_MIN: i64 = 100;
/// Highest valid HTTP status code.
pub const HTTP_STATUS_MAX: i64 = 599;

/// Integer range with independently exclusive bounds.
///
/// Built with chained setters:
///
/// ```
/// use sift_agent::filters::RangeMatcher;
///
/// let server_errors = RangeMatcher::unbounded()
///     .lower_bound(500)
///     .upper_bound(600)
///     .exclude_upper();
/// assert!(server_errors.matches(503));
/// assert!(!server_errors.matches(600));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeMatcher {
    from: Option<i64>,
    to: Option<i64>,
    exclude_from: bool,
    exclude_to: bool,
}

impl RangeMatcher {
    /// Range without any bound.
    pub fn unbounded() -> Self {
        Self {
            from: None,
            to: None,
            exclude_from: false,
            exclude_to: false,
        }
    }

    /// Inclusive range over the valid HTTP status codes.
    pub fn http_status() -> Self {
        Self::unbounded().lower_bound(HTTP_STATUS_MIN).upper_bound(HTTP_STATUS_MAX)
    }

    pub fn lower_bound(mut self, from: i64) -> Self {
        self.from = Some(from);
        self
    }

    pub fn upper_bound(mut self, to: i64) -> Self {
        self.to = Some(to);
        self
    }

    pub fn exclude_lower(mut self) -> Self {
        self.exclude_from = true;
        self
    }

    pub fn exclude_upper(mut self) -> Self {
        self.exclude_to = true;
        self
    }

    pub fn lower(&self) -> Option<(i64, bool)> {
        self.from.map(|f| (f, self.exclude_from))
    }

    pub fn upper(&self) -> Option<(i64, bool)> {
        self.to.map(|t| (t, self.exclude_to))
    }

    pub fn matches(&self, n: i64) -> bool {
        let above = match self.from {
            Some(from) if self.exclude_from => n > from,
            Some(from) => n >= from,
            None => true,
        };
        let below = match self.to {
            Some(to) if self.exclude_to => n < to,
            Some(to) => n <= to,
            None => true,
        };
        above && below
    }
}

impl Default for RangeMatcher {
    fn default() -> Self {
        Self::http_status()
    }
}
