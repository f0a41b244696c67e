//! Transfer tunables shared by both endpoints.
//!
//! Both sides must agree on `max_segment_size`: the sender never frames more
//! than [`TransferConfig::max_payload_size`] payload bytes and the receiver
//! drops any segment that carries more.

use std::time::Duration;

use crate::segment::HEADER_LEN;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 1000;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_LINGER: Duration = Duration::from_millis(500);

/// Adjustable protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Largest frame on the wire, header included.
    pub max_segment_size: usize,
    /// Interval between retransmissions of an unacknowledged segment.
    pub retry_interval: Duration,
    /// How long the receiver keeps re-acknowledging the end marker after the
    /// transfer completes. Zero disables lingering.
    pub linger: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            linger: DEFAULT_LINGER,
        }
    }
}

impl TransferConfig {
    pub fn with_max_segment_size(mut self, max_segment_size: usize) -> Self {
        self.max_segment_size = max_segment_size;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// Payload capacity of one segment: `max_segment_size - HEADER_LEN`.
    pub fn max_payload_size(&self) -> usize {
        self.max_segment_size.saturating_sub(HEADER_LEN)
    }

    /// Reject settings the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_segment_size <= HEADER_LEN || self.max_segment_size > MAX_UDP_PAYLOAD {
            return Err(ConfigError::SegmentSize(self.max_segment_size));
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::RetryInterval);
        }
        Ok(())
    }
}

/// A [`TransferConfig`] that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max segment size {0} must be in {min}..={max}", min = HEADER_LEN + 1, max = MAX_UDP_PAYLOAD)]
    SegmentSize(usize),
    #[error("retry interval must be non-zero")]
    RetryInterval,
}
