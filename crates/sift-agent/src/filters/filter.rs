//! Traffic filters: extract one attribute of an API call and hand it to a
//! matcher.

use super::matcher::{KeyValueMatcher, Matcher, MatcherKind, RangeMatcher};
use crate::error::FilterError;
use crate::interception::parse_query;
use hyper::{Request, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// The call attribute a filter inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Param,
    RequestHeaders,
    ResponseHeaders,
    StatusCode,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::Param => "Param",
            FilterType::RequestHeaders => "RequestHeaders",
            FilterType::ResponseHeaders => "ResponseHeaders",
            FilterType::StatusCode => "StatusCode",
        }
    }

    /// Matcher kind accepted by filters of this type.
    pub fn matcher_kind(&self) -> MatcherKind {
        match self {
            FilterType::StatusCode => MatcherKind::Range,
            _ => MatcherKind::KeyValue,
        }
    }

    /// Accept-all matcher used until (or instead of) a configured one.
    pub fn default_matcher(&self) -> Matcher {
        match self.matcher_kind() {
            MatcherKind::KeyValue => Matcher::KeyValue(KeyValueMatcher::any()),
            MatcherKind::Range => Matcher::Range(RangeMatcher::http_status()),
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filter owns exactly one matcher, always compatible with its type.
#[derive(Debug, Clone)]
pub struct Filter {
    filter_type: FilterType,
    matcher: Matcher,
}

impl Filter {
    /// Build a filter with its type's accept-all matcher.
    pub fn new(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            matcher: filter_type.default_matcher(),
        }
    }

    /// Build a filter with a configured matcher, rejecting incompatible ones.
    pub fn with_matcher(filter_type: FilterType, matcher: Matcher) -> Result<Self, FilterError> {
        let mut filter = Self::new(filter_type);
        filter.set_matcher(Some(matcher))?;
        Ok(filter)
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Replace the matcher.
    ///
    /// On error the filter has been reset to its default matcher and remains
    /// usable. A status code filter treats `None` as "any valid status"; the
    /// key-value filters reject it.
    pub fn set_matcher(&mut self, matcher: Option<Matcher>) -> Result<(), FilterError> {
        let expected = self.filter_type.matcher_kind();
        let result = match matcher {
            Some(m) if m.kind() == expected => {
                self.matcher = m;
                return Ok(());
            }
            Some(m) => Err(FilterError::IncompatibleMatcher {
                filter: self.filter_type,
                expected,
                actual: m.kind(),
            }),
            None if self.filter_type == FilterType::StatusCode => Ok(()),
            None => Err(FilterError::MissingMatcher {
                filter: self.filter_type,
                expected,
            }),
        };

        self.matcher = self.filter_type.default_matcher();
        if let Err(e) = &result {
            warn!(error = %e, "matcher rejected, filter reset to its default");
        }
        result
    }

    /// Whether the call satisfies this filter. Response-side filters never
    /// match a call that produced no response.
    pub fn matches_call<B1, B2>(
        &self,
        request: &Request<B1>,
        response: Option<&Response<B2>>,
    ) -> bool {
        match (&self.matcher, self.filter_type) {
            (Matcher::KeyValue(m), FilterType::Param) => match request.uri().query() {
                Some(query) => m.matches(Some(&parse_query(query))),
                None => false,
            },
            (Matcher::KeyValue(m), FilterType::RequestHeaders) => {
                m.matches_headers(request.headers())
            }
            (Matcher::KeyValue(m), FilterType::ResponseHeaders) => {
                response.is_some_and(|r| m.matches_headers(r.headers()))
            }
            (Matcher::Range(m), FilterType::StatusCode) => {
                response.is_some_and(|r| m.matches(i64::from(r.status().as_u16())))
            }
            // set_matcher never stores a mismatched kind.
            _ => false,
        }
    }
}
