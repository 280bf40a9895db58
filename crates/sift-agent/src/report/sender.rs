//! Background shipping of report logs.
//!
//! A single task owns the in-flight and loss counters and multiplexes three
//! event sources: new reports from the fan-in queue, acknowledgments from
//! finished transmissions, and the stop signal. Each accepted report is sent
//! by its own task, whose only effect on the owner is one acknowledgment.
//!
//! Delivery is best effort: reports over the in-flight limit are dropped and
//! later summarized in a loss notice; failed transmissions are logged and
//! never retried.

use super::log::{AgentInfo, ReportBatch, ReportLog, RuntimeInfo};
use super::state::{Phase, ShippingState};
use super::transport::ReportTransport;
use crate::metrics;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

/// Capacity of the acknowledgment queue.
pub const ACK_BACKLOG: usize = 1000;
/// Capacity of the fan-in report queue.
pub const FAN_IN_BACKLOG: usize = 100;
/// Default ceiling on reports awaiting acknowledgment.
pub const DEFAULT_IN_FLIGHT_LIMIT: u64 = 100;

/// Agent type reported to the collector.
const AGENT_TYPE: &str = "rust";

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Reports beyond this many unacknowledged transmissions are dropped.
    pub in_flight_limit: u64,
    pub fan_in_backlog: usize,
    pub ack_backlog: usize,
    pub secret_key: String,
    /// Runtime environment type, e.g. staging or production.
    pub environment: String,
    /// Agent version.
    pub version: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            in_flight_limit: DEFAULT_IN_FLIGHT_LIMIT,
            fan_in_backlog: FAN_IN_BACKLOG,
            ack_backlog: ACK_BACKLOG,
            secret_key: String::new(),
            environment: "default".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Snapshot of the shipping loop counters, published after every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderStatus {
    pub in_flight: u64,
    pub lost: u64,
    pub phase: Phase,
}

/// Handle to the background shipping loop.
pub struct Sender {
    fan_in: mpsc::Sender<ReportLog>,
    stopped: AtomicBool,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    status: watch::Receiver<SenderStatus>,
    runtime: Handle,
}

impl Sender {
    /// Start the shipping loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn start(config: SenderConfig, transport: Arc<dyn ReportTransport>) -> Self {
        Self::start_on(&Handle::current(), config, transport)
    }

    /// Start the shipping loop on the given runtime.
    pub fn start_on(
        runtime: &Handle,
        config: SenderConfig,
        transport: Arc<dyn ReportTransport>,
    ) -> Self {
        let (fan_in_tx, fan_in_rx) = mpsc::channel(config.fan_in_backlog.max(1));
        let (acks_tx, acks_rx) = mpsc::channel(config.ack_backlog.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let state = ShippingState::new(config.in_flight_limit);
        let (status_tx, status_rx) = watch::channel(snapshot(&state));

        let courier = Courier {
            transport,
            secret_key: config.secret_key,
            environment: config.environment,
            agent: AgentInfo {
                agent_type: AGENT_TYPE,
                version: config.version,
            },
            runtime: RuntimeInfo::current(),
        };

        let shipping = ShippingLoop {
            state,
            fan_in: fan_in_rx,
            acks_tx,
            acks: acks_rx,
            stop: stop_rx,
            status: status_tx,
            courier: Arc::new(courier),
        };
        runtime.spawn(shipping.run());

        Self {
            fan_in: fan_in_tx,
            stopped: AtomicBool::new(false),
            stop_tx: Mutex::new(Some(stop_tx)),
            status: status_rx,
            runtime: runtime.clone(),
        }
    }

    /// Queue a report for transmission without blocking the caller. When the
    /// fan-in queue is full the enqueue is left to a task of its own.
    ///
    /// Ignored, with a warning, once [`Sender::stop`] has been called.
    pub fn send(&self, log: ReportLog) {
        if self.stopped.load(Ordering::Acquire) {
            warn!("sending attempted after stop: ignored");
            return;
        }
        metrics::record_report_submitted();
        match self.fan_in.try_send(log) {
            Ok(()) => {}
            Err(TrySendError::Full(log)) => {
                let fan_in = self.fan_in.clone();
                self.runtime.spawn(async move {
                    if fan_in.send(log).await.is_err() {
                        debug!("shipping loop has exited, report discarded");
                    }
                });
            }
            Err(TrySendError::Closed(_)) => {
                debug!("shipping loop has exited, report discarded");
            }
        }
    }

    /// Ask the loop to finish: reports already queued are still shipped.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Latest published counters.
    pub fn status(&self) -> SenderStatus {
        *self.status.borrow()
    }

    /// Receiver notified every time the loop publishes new counters.
    pub fn subscribe(&self) -> watch::Receiver<SenderStatus> {
        self.status.clone()
    }

    /// Wait until the loop has exited.
    pub async fn wait(&self) {
        let mut status = self.status.clone();
        // An error means the loop is gone, which is what we wait for anyway.
        let _ = status.wait_for(|s| s.phase == Phase::Stopped).await;
    }

    /// Stop, then wait for every admitted report to be acknowledged.
    pub async fn shutdown(&self) {
        self.stop();
        self.wait().await;
    }
}

fn snapshot(state: &ShippingState) -> SenderStatus {
    SenderStatus {
        in_flight: state.in_flight(),
        lost: state.lost(),
        phase: state.phase(),
    }
}

/// Serializes reports and hands them to the transport.
struct Courier {
    transport: Arc<dyn ReportTransport>,
    secret_key: String,
    environment: String,
    agent: AgentInfo,
    runtime: RuntimeInfo,
}

impl Courier {
    fn payload(&self, log: &ReportLog) -> Vec<u8> {
        let batch = ReportBatch {
            secret_key: &self.secret_key,
            agent: self.agent.clone(),
            runtime: self.runtime.clone(),
            environment: &self.environment,
            logs: vec![log],
        };
        serde_json::to_vec(&batch).unwrap_or_else(|e| {
            serde_json::to_vec(&serde_json::json!({ "Error": e.to_string() })).unwrap_or_default()
        })
    }

    async fn transmit(&self, log: &ReportLog) {
        let payload = self.payload(log);
        let size = payload.len();
        match self.transport.deliver(payload).await {
            Ok(()) => {
                metrics::record_transmission(true);
                debug!(size, report_type = ?log.report_type, "report uploaded");
            }
            Err(e) => {
                metrics::record_transmission(false);
                warn!(error = %e, "transmitting report to the report server failed");
            }
        }
    }
}

struct ShippingLoop {
    state: ShippingState,
    fan_in: mpsc::Receiver<ReportLog>,
    acks_tx: mpsc::Sender<u64>,
    acks: mpsc::Receiver<u64>,
    stop: oneshot::Receiver<()>,
    status: watch::Sender<SenderStatus>,
    courier: Arc<Courier>,
}

impl ShippingLoop {
    async fn run(mut self) {
        self.normal().await;

        debug!("sender switching to finishing mode");
        self.state.finish();
        self.publish();
        self.finishing().await;

        self.state.mark_stopped();
        self.publish();
        debug!("sender stopped");
    }

    async fn normal(&mut self) {
        loop {
            tokio::select! {
                // A dropped handle counts as a stop request.
                _ = &mut self.stop => return,
                Some(log) = self.fan_in.recv() => self.on_report(log),
                Some(count) = self.acks.recv() => self.on_ack(count),
                else => return,
            }
            self.publish();
        }
    }

    async fn finishing(&mut self) {
        while !self.drained() {
            tokio::select! {
                Some(log) = self.fan_in.recv() => self.on_report(log),
                Some(count) = self.acks.recv() => self.on_ack(count),
                else => return,
            }
            self.publish();
        }
    }

    fn drained(&self) -> bool {
        self.state.is_idle() && self.fan_in.is_empty()
    }

    fn on_report(&mut self, log: ReportLog) {
        debug!(phase = %self.state.phase(), "sender received log");
        if self.state.admit() {
            self.dispatch(log);
        }
    }

    fn on_ack(&mut self, count: u64) {
        debug!(phase = %self.state.phase(), count, "sender received ack");
        if let Some(notice) = self.state.acknowledge(count) {
            self.dispatch(notice);
        }
    }

    fn dispatch(&self, log: ReportLog) {
        let courier = Arc::clone(&self.courier);
        let acks = self.acks_tx.clone();
        tokio::spawn(async move {
            let transmission = tokio::spawn(async move { courier.transmit(&log).await });
            if let Err(e) = transmission.await {
                error!(error = %e, "report transmission task failed");
            }
            // Acknowledged whatever the outcome, so in_flight always drains.
            let _ = acks.send(1).await;
        });
    }

    fn publish(&self) {
        self.status.send_replace(snapshot(&self.state));
    }
}
