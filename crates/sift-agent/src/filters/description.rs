//! Pre-decoded filter descriptions, as handed over by the rule decoder.

use super::filter::{Filter, FilterType};
use super::matcher::{KeyValueMatcher, Matcher, RangeMatcher};
use crate::error::FilterError;
use serde::{Deserialize, Serialize};

/// Regex pair for key-value filters. Unset patterns accept anything.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct KeyValueDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_pattern: Option<String>,
}

/// Numeric range for the status code filter. Unset bounds keep the valid
/// HTTP status range.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RangeDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<i64>,
    #[serde(default)]
    pub exclude_from: bool,
    #[serde(default)]
    pub exclude_to: bool,
}

/// One configured filter.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FilterDescription {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    #[serde(flatten)]
    pub key_value: KeyValueDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeDescription>,
}

impl From<&KeyValueDescription> for KeyValueMatcher {
    fn from(d: &KeyValueDescription) -> Self {
        KeyValueMatcher::new(d.key_pattern.as_deref(), d.value_pattern.as_deref())
    }
}

impl From<&RangeDescription> for RangeMatcher {
    fn from(d: &RangeDescription) -> Self {
        let mut m = RangeMatcher::default();
        if let Some(from) = d.from {
            m = m.lower_bound(from);
        }
        if let Some(to) = d.to {
            m = m.upper_bound(to);
        }
        if d.exclude_from {
            m = m.exclude_lower();
        }
        if d.exclude_to {
            m = m.exclude_upper();
        }
        m
    }
}

impl FilterDescription {
    /// The matcher this description calls for, based on the filter type.
    pub fn matcher(&self) -> Matcher {
        match self.filter_type {
            FilterType::StatusCode => {
                RangeMatcher::from(&self.range.clone().unwrap_or_default()).into()
            }
            _ => KeyValueMatcher::from(&self.key_value).into(),
        }
    }
}

impl Filter {
    pub fn from_description(description: &FilterDescription) -> Result<Self, FilterError> {
        Filter::with_matcher(description.filter_type, description.matcher())
    }
}
