//! Report records and their asynchronous shipping to the collector.
//!
//! # Module Structure
//!
//! - `log` - The report record and the batch payload
//! - `state` - In-flight and loss accounting
//! - `sender` - Background shipping loop and its handle
//! - `transport` - Delivery seam and the HTTP implementation

mod log;
mod sender;
mod state;
mod transport;

pub use log::{AgentInfo, ReportBatch, ReportLog, ReportType, RuntimeInfo, Stage};
pub use sender::{
    Sender, SenderConfig, SenderStatus, ACK_BACKLOG, DEFAULT_IN_FLIGHT_LIMIT, FAN_IN_BACKLOG,
};
pub use state::{Phase, ShippingState};
pub use transport::{HttpTransport, ReportTransport, CONTENT_TYPE_JSON, FULL_CONTENT_TYPE_JSON};
