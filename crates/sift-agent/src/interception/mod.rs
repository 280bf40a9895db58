//! Body interception: pass-through peeking, body decoding and report
//! collection for completed calls.
//!
//! # Module Structure
//!
//! - `peek` - Read-through wrapper buffering the first bytes of a stream
//! - `form` - URL-encoded form and query string decoding
//! - `body` - Size and content-type gated body decoding with digests
//! - `collector` - Builds and submits the report of a completed call

mod body;
mod collector;
mod form;
mod peek;

pub use body::{
    sha256_hex, BodyContent, BodyMarker, BodyParser, BodySide, CapturedBody,
    DEFAULT_MAX_BODY_SIZE,
};
pub use collector::{CallFailure, CollectionRule, Collector, CompletedCall, RuleDescription};
pub use form::{parse_form, parse_query};
pub use peek::PeekingReader;
