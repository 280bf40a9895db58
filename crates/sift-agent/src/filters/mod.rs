//! Traffic filters deciding which intercepted calls are worth reporting.
//!
//! # Module Structure
//!
//! - `matcher` - Key-value (regex pair) and range matchers
//! - `filter` - Param, request headers, response headers and status code filters
//! - `description` - Pre-decoded filter parameters and their conversion into filters

mod description;
mod filter;
mod matcher;

pub use description::{FilterDescription, KeyValueDescription, RangeDescription};
pub use filter::{Filter, FilterType};
pub use matcher::{
    canonical_header_name, KeyValueMatcher, Matcher, MatcherKind, RangeMatcher, ValueMap,
    HTTP_STATUS_MAX, HTTP_STATUS_MIN,
};

use hyper::{Request, Response};

/// True when every filter matches. An empty set matches every call.
pub fn matches_all<B1, B2>(
    filters: &[Filter],
    request: &Request<B1>,
    response: Option<&Response<B2>>,
) -> bool {
    filters.iter().all(|f| f.matches_call(request, response))
}
