//! Body capture: size and content-type gating, JSON and form decoding, and
//! payload digests.
//!
//! Decoding only ever looks at the peek buffer of a [`PeekingReader`], so the
//! proxied stream is left untouched for its real consumer.

use super::form::parse_form;
use super::peek::PeekingReader;
use crate::error::BodyError;
use crate::filters::ValueMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use tracing::{debug, warn};

/// Bodies of this size or larger are never decoded.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

static JSON_CONTENT_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(application|text)/([\w.-]+\+)?json\s*(;|$)").expect("valid regex")
});

static FORM_CONTENT_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*application/x-www-form-urlencoded\s*(;|$)").expect("valid regex")
});

/// Which side of the call a body belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySide {
    Request,
    Response,
}

impl BodySide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodySide::Request => "request",
            BodySide::Response => "response",
        }
    }
}

/// Placeholder recorded instead of a body that was not decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BodyMarker {
    #[serde(rename = "(omitted due to size)")]
    TooLong,
    #[serde(rename = "(not showing binary data)")]
    Binary,
    #[serde(rename = "(unable to read data)")]
    Undecodable,
}

/// Captured body content as it appears in a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BodyContent {
    Json(serde_json::Value),
    Form(ValueMap),
    Marker(BodyMarker),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedBody {
    pub content: BodyContent,
    /// Hex SHA-256 of the decoded payload; markers have none.
    pub sha: Option<String>,
}

impl CapturedBody {
    pub fn marker(marker: BodyMarker) -> Self {
        Self {
            content: BodyContent::Marker(marker),
            sha: None,
        }
    }

    pub fn is_marker(&self, marker: BodyMarker) -> bool {
        self.content == BodyContent::Marker(marker)
    }
}

/// Decodes request and response bodies for reports.
#[derive(Debug, Clone)]
pub struct BodyParser {
    max_body_size: usize,
}

impl Default for BodyParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BODY_SIZE)
    }
}

impl BodyParser {
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Wrap a body stream with a peek buffer large enough for any decodable
    /// body.
    pub fn reader<R: Read>(&self, inner: R) -> PeekingReader<R> {
        PeekingReader::new(inner, self.max_body_size)
    }

    /// Decode a body of `length` bytes declared as `content_type`.
    ///
    /// Oversized and non-parsable bodies yield a marker, never an error. A
    /// body that fails to decode yields the error; callers that keep going
    /// record [`BodyMarker::Undecodable`] instead, see [`BodyParser::capture`].
    /// An empty body yields `None`.
    pub fn parse<R: Read>(
        &self,
        side: BodySide,
        reader: &mut PeekingReader<R>,
        length: usize,
        content_type: Option<&str>,
    ) -> Result<Option<CapturedBody>, BodyError> {
        if length == 0 {
            return Ok(None);
        }
        if length >= self.max_body_size {
            return Ok(Some(CapturedBody::marker(BodyMarker::TooLong)));
        }
        let content_type = content_type.unwrap_or_default();
        let is_json = JSON_CONTENT_TYPE.is_match(content_type);
        if !is_json && !FORM_CONTENT_TYPE.is_match(content_type) {
            return Ok(Some(CapturedBody::marker(BodyMarker::Binary)));
        }

        let bytes = reader
            .peek()
            .map_err(|source| BodyError::Io { side: side.as_str(), source })?;
        if bytes.len() >= self.max_body_size {
            // The stream is longer than it claimed.
            return Ok(Some(CapturedBody::marker(BodyMarker::TooLong)));
        }

        let captured = if is_json {
            decode_json(side, bytes)?
        } else {
            decode_form(side, bytes)?
        };
        Ok(Some(captured))
    }

    /// Like [`BodyParser::parse`], but a decode failure is logged and recorded
    /// as [`BodyMarker::Undecodable`].
    pub fn capture<R: Read>(
        &self,
        side: BodySide,
        reader: &mut PeekingReader<R>,
        length: usize,
        content_type: Option<&str>,
    ) -> Option<CapturedBody> {
        match self.parse(side, reader, length, content_type) {
            Ok(captured) => captured,
            Err(e) => {
                warn!(error = %e, "body capture failed");
                Some(CapturedBody::marker(BodyMarker::Undecodable))
            }
        }
    }
}

fn decode_json(side: BodySide, bytes: &[u8]) -> Result<CapturedBody, BodyError> {
    // Only the first JSON value counts; trailing bytes are ignored.
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let value = serde_json::Value::deserialize(&mut deserializer).map_err(|source| {
        BodyError::Json {
            side: side.as_str(),
            source,
        }
    })?;
    debug!(side = side.as_str(), size = bytes.len(), "decoded JSON body");
    Ok(CapturedBody {
        content: BodyContent::Json(value),
        sha: Some(sha256_hex(bytes)),
    })
}

fn decode_form(side: BodySide, bytes: &[u8]) -> Result<CapturedBody, BodyError> {
    let form = parse_form(bytes).map_err(|source| BodyError::Form {
        side: side.as_str(),
        source,
    })?;
    let canonical = serde_json::to_vec(&form).map_err(|source| BodyError::Json {
        side: side.as_str(),
        source,
    })?;
    Ok(CapturedBody {
        content: BodyContent::Form(form),
        sha: Some(sha256_hex(&canonical)),
    })
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
