//! In-flight and loss accounting for the shipping loop.
//!
//! Owned by the loop task alone, so none of this needs locking.

use super::log::ReportLog;
use crate::metrics;
use std::fmt;
use tracing::error;

/// Shipping loop phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting reports and acknowledgments.
    Normal,
    /// Stop requested: draining what was already admitted.
    Finishing,
    /// Loop exited.
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Normal => f.write_str("normal"),
            Phase::Finishing => f.write_str("finishing"),
            Phase::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Debug)]
pub struct ShippingState {
    in_flight: u64,
    lost: u64,
    in_flight_limit: u64,
    phase: Phase,
}

impl ShippingState {
    pub fn new(in_flight_limit: u64) -> Self {
        Self {
            in_flight: 0,
            lost: 0,
            in_flight_limit,
            phase: Phase::Normal,
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn finish(&mut self) {
        self.phase = Phase::Finishing;
    }

    pub fn mark_stopped(&mut self) {
        self.phase = Phase::Stopped;
    }

    /// Admission control for a new report: `true` means dispatch it, `false`
    /// means it was dropped and counted as lost.
    pub fn admit(&mut self) -> bool {
        if self.in_flight >= self.in_flight_limit {
            self.lost += 1;
            metrics::record_report_dropped();
            return false;
        }
        self.in_flight += 1;
        metrics::set_in_flight(self.in_flight);
        true
    }

    /// Account for `count` finished transmissions.
    ///
    /// Returns a loss notice to dispatch when reports were dropped since the
    /// previous notice; the notice is already counted in flight.
    pub fn acknowledge(&mut self, count: u64) -> Option<ReportLog> {
        if count == 0 {
            error!(phase = %self.phase, "received an acknowledgment for 0 report");
            return None;
        }
        let mut count = count;
        if count > self.in_flight {
            error!(
                phase = %self.phase,
                "{} reports acknowledged, but only {} were in flight",
                count,
                self.in_flight
            );
            count = self.in_flight;
        }
        self.in_flight -= count;

        let notice = if self.lost > 0 {
            self.in_flight += 1;
            let notice = ReportLog::loss_notice(self.lost);
            metrics::record_loss_notice();
            self.lost = 0;
            Some(notice)
        } else {
            None
        };
        metrics::set_in_flight(self.in_flight);
        notice
    }

    /// Nothing left in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }
}
