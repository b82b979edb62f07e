//! Transfer tunables.

use crate::error::SessionError;
use meshmodem_stream::FRAME_HEADER_LEN;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a transfer session.
///
/// The defaults suit a LoRa-class mesh: small datagrams, second-scale
/// retry cadence, tens of seconds before giving a transfer up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Overall inactivity timeout in milliseconds. A transfer with no
    /// meaningful event for this long fails.
    pub timeout_ms: u64,
    /// Maximum datagram payload including the frame header. Must not
    /// exceed the radio MTU.
    pub max_packet_size: usize,
    /// Interval between progress log lines in milliseconds; 0 disables
    /// them.
    pub progress_interval_ms: u64,
    /// Discriminator byte tagging this protocol's frames. Must not
    /// collide with other protocols sharing the data port.
    pub packet_identifier: u8,
    /// Receive buffer size; at least `max_packet_size`.
    pub rx_buffer_size: usize,
    /// Transmit buffer size; at least `max_packet_size`.
    pub tx_buffer_size: usize,
    /// How often a stalled protocol step is re-sent, in milliseconds.
    pub retry_interval_ms: u64,
    /// Receiver keepalive interval in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Consecutive unanswered re-sends of one step before the transfer
    /// fails.
    pub max_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_packet_size: 230,
            progress_interval_ms: 5_000,
            packet_identifier: 0xFF,
            rx_buffer_size: 256,
            tx_buffer_size: 256,
            retry_interval_ms: 1_000,
            keepalive_interval_ms: 3_000,
            max_retries: 10,
        }
    }
}

impl TransferConfig {
    /// Overall inactivity timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry cadence for stalled steps.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Receiver keepalive cadence.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Progress logging cadence, `None` when disabled.
    pub fn progress_interval(&self) -> Option<Duration> {
        if self.progress_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.progress_interval_ms))
        }
    }

    /// Check the configuration for internally inconsistent values.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.max_packet_size < FRAME_HEADER_LEN + 7 {
            return Err(SessionError::Config(format!(
                "max_packet_size {} leaves no room for frames",
                self.max_packet_size
            )));
        }
        if self.rx_buffer_size < self.max_packet_size
            || self.tx_buffer_size < self.max_packet_size
        {
            return Err(SessionError::Config(
                "stream buffers must hold at least one datagram".into(),
            ));
        }
        if self.timeout_ms == 0 || self.retry_interval_ms == 0 || self.keepalive_interval_ms == 0 {
            return Err(SessionError::Config(
                "timeouts and intervals must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(TransferConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_tiny_packets() {
        let config = TransferConfig {
            max_packet_size: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_undersized_buffers() {
        let config = TransferConfig {
            rx_buffer_size: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn progress_can_be_disabled() {
        let config = TransferConfig {
            progress_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.progress_interval().is_none());
    }
}
