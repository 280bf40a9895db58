//! Error types shared across the agent core.
//!
//! None of these are fatal: callers log them and carry on with reduced data.

use crate::filters::{FilterType, MatcherKind};

/// Rejected filter configuration. The filter has already fallen back to its
/// default matcher when one of these is returned.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("{filter} filter expects a {expected} matcher, got a {actual} matcher")]
    IncompatibleMatcher {
        filter: FilterType,
        expected: MatcherKind,
        actual: MatcherKind,
    },
    #[error("set empty {expected} matcher on {filter} filter")]
    MissingMatcher {
        filter: FilterType,
        expected: MatcherKind,
    },
}

/// Body decoding failure. The report keeps an "undecodable" marker instead.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("decoding JSON {side} body: {source}")]
    Json {
        side: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("decoding HTML form {side} body: {source}")]
    Form {
        side: &'static str,
        #[source]
        source: FormError,
    },
    #[error("reading {side} body: {source}")]
    Io {
        side: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Malformed `application/x-www-form-urlencoded` content.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormError {
    #[error("invalid URL escape {0:?}")]
    InvalidEscape(String),
    #[error("form content is not valid UTF-8")]
    InvalidUtf8,
}

/// Failed report transmission. Logged by the sender, never retried.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transmitting report: {0}")]
    Http(#[from] reqwest::Error),
    #[error("report server answered {0}")]
    Status(u16),
}
