//! # Node Telemetry
//!
//! Running counters for one node, kept next to the rest of the node's state
//! and read back as a snapshot.
//!
//! ## Why these counters matter:
//! - **windows_sent / bytes_sent**: upstream load generated by this node
//! - **responses_delivered**: windows that made it back and were played
//! - **responses_rejected**: replies dropped by the minimum-length check
//! - **error_count**: every fault reported to the listener
//! - **response times**: average round trip across delivered windows

use actix::MessageResponse;
use std::time::{Duration, Instant};

/// Counters for one node.
#[derive(Debug, Clone, MessageResponse)]
pub struct NodeStats {
    pub windows_sent: u64,

    pub bytes_sent: u64,

    pub responses_delivered: u64,

    pub responses_rejected: u64,

    pub error_count: u64,

    /// Sum of reported round trips in milliseconds
    pub total_response_time_ms: u64,

    /// Number of round trips summed into `total_response_time_ms`
    pub response_time_samples: u64,

    /// When the node was created
    pub started_at: Instant,
}

impl Default for NodeStats {
    fn default() -> Self {
        Self {
            windows_sent: 0,
            bytes_sent: 0,
            responses_delivered: 0,
            responses_rejected: 0,
            error_count: 0,
            total_response_time_ms: 0,
            response_time_samples: 0,
            started_at: Instant::now(),
        }
    }
}

impl NodeStats {
    pub fn record_window(&mut self, bytes: usize) {
        self.windows_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_delivery(&mut self) {
        self.responses_delivered += 1;
    }

    pub fn record_rejection(&mut self) {
        self.responses_rejected += 1;
    }

    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    pub fn record_response_time(&mut self, millis: u64) {
        self.total_response_time_ms += millis;
        self.response_time_samples += 1;
    }

    /// Average round trip in milliseconds, 0.0 before the first response.
    pub fn average_response_time_ms(&self) -> f64 {
        if self.response_time_samples > 0 {
            self.total_response_time_ms as f64 / self.response_time_samples as f64
        } else {
            0.0
        }
    }

    /// Share of sent windows that never produced a delivered response.
    pub fn loss_rate(&self) -> f64 {
        if self.windows_sent > 0 {
            let lost = self.windows_sent.saturating_sub(self.responses_delivered);
            lost as f64 / self.windows_sent as f64
        } else {
            0.0
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_response_time() {
        let mut stats = NodeStats::default();
        assert_eq!(stats.average_response_time_ms(), 0.0);

        stats.record_response_time(40);
        stats.record_response_time(60);
        assert_eq!(stats.average_response_time_ms(), 50.0);
    }

    #[test]
    fn test_loss_rate() {
        let mut stats = NodeStats::default();
        assert_eq!(stats.loss_rate(), 0.0);

        for _ in 0..4 {
            stats.record_window(256);
        }
        stats.record_delivery();
        stats.record_delivery();
        stats.record_delivery();

        assert_eq!(stats.bytes_sent, 1024);
        assert_eq!(stats.loss_rate(), 0.25);
    }
}
