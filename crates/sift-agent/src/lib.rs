//! Data collection and reporting core of an HTTP interception agent.
//!
//! Intercepted calls are selected by [`filters`], their bodies are read
//! through [`interception::PeekingReader`] and decoded, and the resulting
//! [`report::ReportLog`]s are shipped in the background by a
//! [`report::Sender`].

pub mod config;
pub mod error;
pub mod filters;
pub mod interception;
pub mod logging;
pub mod metrics;
pub mod report;

pub use config::AgentConfig;
pub use error::{BodyError, FilterError, FormError, TransportError};
pub use interception::{Collector, CompletedCall, PeekingReader};
pub use report::{ReportLog, Sender, SenderConfig};
