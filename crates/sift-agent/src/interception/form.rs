//! `application/x-www-form-urlencoded` decoding.
//!
//! Used both for form bodies (strict: a bad escape rejects the body) and for
//! URL query strings (lenient: bad pairs are skipped).

use crate::error::FormError;
use crate::filters::ValueMap;
use std::borrow::Cow;

/// Decode form content into an ordered multi-map.
///
/// Repeated keys accumulate values in order of appearance. Empty segments
/// (`a=1&&b=2`) are ignored and a segment without `=` maps to an empty value.
pub fn parse_form(body: &[u8]) -> Result<ValueMap, FormError> {
    let text = std::str::from_utf8(body).map_err(|_| FormError::InvalidUtf8)?;
    let mut values = ValueMap::new();
    for (key, value) in segments(text) {
        let key = unescape(key)?;
        let value = unescape(value)?;
        values.entry(key).or_default().push(value);
    }
    Ok(values)
}

/// Decode a URL query string, dropping pairs that fail to decode.
pub fn parse_query(query: &str) -> ValueMap {
    let mut values = ValueMap::new();
    for (key, value) in segments(query) {
        if let (Ok(key), Ok(value)) = (unescape(key), unescape(value)) {
            values.entry(key).or_default().push(value);
        }
    }
    values
}

fn segments(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.split_once('=').unwrap_or((segment, "")))
}

fn unescape(component: &str) -> Result<String, FormError> {
    let bytes = component.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let well_formed = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !well_formed {
                let end = (i + 3).min(bytes.len());
                return Err(FormError::InvalidEscape(
                    String::from_utf8_lossy(&bytes[i..end]).into_owned(),
                ));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced: Cow<str> = if component.contains('+') {
        Cow::Owned(component.replace('+', " "))
    } else {
        Cow::Borrowed(component)
    };
    let decoded = urlencoding::decode_binary(spaced.as_bytes());
    String::from_utf8(decoded.into_owned()).map_err(|_| FormError::InvalidUtf8)
}
