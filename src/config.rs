//! Protocol constants and transfer configuration

use crate::protocol::crc::CrcMode;

/// Packet size limits and wire constants
pub mod protocol {
    /// Largest packet the LoRa-family radios can carry
    pub const MAX_PACKET_LEN: usize = 255;

    /// Trailer appended to every frame: network id (u16 LE) then payload CRC (u16 LE)
    pub const TRAILER_LEN: usize = 4;

    /// Hard ceiling for one segment of payload data
    pub const MAX_SEGMENT_SIZE: u8 = 245;

    /// Segment ceiling for the faster, shorter-range radio mode
    pub const FAST_MODE_SEGMENT_SIZE: u8 = 117;

    /// Payload capacity of a decoded frame
    pub const MAX_PAYLOAD: usize = MAX_SEGMENT_SIZE as usize;

    /// Longest transfer name carried by Start and FileOpen frames
    pub const MAX_NAME_LEN: usize = 32;

    /// Sample network id used by the deployed nodes
    pub const DEFAULT_NETWORK_ID: u16 = 0x3210;
}

/// Default transfer timings and retry limits
pub mod transfer_defaults {
    pub const START_ATTEMPTS: u8 = 10;
    pub const SEND_ATTEMPTS: u8 = 10;
    /// Consecutive missed ACKs tolerated before the transfer restarts
    pub const NO_ACK_COUNT_LIMIT: u16 = 250;

    pub const TX_TIMEOUT_MS: u32 = 5000;
    pub const ACK_OPEN_TIMEOUT_MS: u32 = 250;
    pub const ACK_SEGMENT_TIMEOUT_MS: u32 = 75;
    pub const ACK_CLOSE_TIMEOUT_MS: u32 = 250;

    /// Pause between phases (start, open, segments, close)
    pub const FUNCTION_DELAY_MS: u32 = 0;
    /// Pause between consecutive packets
    pub const PACKET_DELAY_MS: u32 = 0;

    /// Receiver pause before sending a segment ACK
    pub const ACK_DELAY_MS: u32 = 0;
    /// Extra receiver pause after a duplicate
    pub const DUPLICATE_DELAY_MS: u32 = 10;
    /// Receiver pause before acknowledging start, open and close
    pub const ACK_DELAY_START_END_MS: u32 = 25;

    /// Receiver gives up after this long without a valid frame
    pub const RECEIVE_TIMEOUT_MS: u32 = 60_000;
    /// Receiver keeps answering repeated closes for this long after completion
    pub const CLOSE_LINGER_MS: u32 = 1000;
}

/// YModem serial transfer constants
pub mod ymodem {
    pub const BLOCK_SIZE: usize = 128;
    pub const TRANSFER_TIMEOUT_MS: u32 = 5000;
    pub const ACK_ERROR_LIMIT: u8 = 16;
}

/// Knobs for one segmented transfer
///
/// Every field is a plain number; the defaults mirror the values deployed
/// by SX12XX DT nodes in the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Network id stamped on and required of every frame
    pub network_id: u16,
    /// Bytes per segment (1..=245)
    pub segment_size: u8,
    /// CRC variant carried in the frame trailer
    pub crc_mode: CrcMode,
    /// Whole-transfer attempts before giving up
    pub start_attempts: u8,
    /// Sends of one frame before the attempt is abandoned
    pub send_attempts: u8,
    /// Consecutive missed ACKs before the transfer restarts
    pub no_ack_count_limit: u16,
    pub tx_timeout_ms: u32,
    pub ack_open_timeout_ms: u32,
    pub ack_segment_timeout_ms: u32,
    pub ack_close_timeout_ms: u32,
    pub function_delay_ms: u32,
    pub packet_delay_ms: u32,
    pub ack_delay_ms: u32,
    pub duplicate_delay_ms: u32,
    pub ack_delay_start_end_ms: u32,
    pub receive_timeout_ms: u32,
    pub close_linger_ms: u32,
}

impl TransferConfig {
    /// Create a configuration with the default timings
    pub fn new() -> Self {
        use transfer_defaults as d;

        Self {
            network_id: protocol::DEFAULT_NETWORK_ID,
            segment_size: protocol::MAX_SEGMENT_SIZE,
            crc_mode: CrcMode::Augmented,
            start_attempts: d::START_ATTEMPTS,
            send_attempts: d::SEND_ATTEMPTS,
            no_ack_count_limit: d::NO_ACK_COUNT_LIMIT,
            tx_timeout_ms: d::TX_TIMEOUT_MS,
            ack_open_timeout_ms: d::ACK_OPEN_TIMEOUT_MS,
            ack_segment_timeout_ms: d::ACK_SEGMENT_TIMEOUT_MS,
            ack_close_timeout_ms: d::ACK_CLOSE_TIMEOUT_MS,
            function_delay_ms: d::FUNCTION_DELAY_MS,
            packet_delay_ms: d::PACKET_DELAY_MS,
            ack_delay_ms: d::ACK_DELAY_MS,
            duplicate_delay_ms: d::DUPLICATE_DELAY_MS,
            ack_delay_start_end_ms: d::ACK_DELAY_START_END_MS,
            receive_timeout_ms: d::RECEIVE_TIMEOUT_MS,
            close_linger_ms: d::CLOSE_LINGER_MS,
        }
    }

    /// Defaults with segments capped for the fast radio mode
    pub fn fast_mode() -> Self {
        Self {
            segment_size: protocol::FAST_MODE_SEGMENT_SIZE,
            ..Self::new()
        }
    }

    pub fn with_network_id(mut self, network_id: u16) -> Self {
        self.network_id = network_id;
        self
    }

    pub fn with_segment_size(mut self, segment_size: u8) -> Self {
        self.segment_size = segment_size;
        self
    }

    pub fn with_crc_mode(mut self, crc_mode: CrcMode) -> Self {
        self.crc_mode = crc_mode;
        self
    }

    pub fn with_attempts(mut self, start_attempts: u8, send_attempts: u8) -> Self {
        self.start_attempts = start_attempts;
        self.send_attempts = send_attempts;
        self
    }

    /// Check the knobs a session cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_size == 0 || self.segment_size > protocol::MAX_SEGMENT_SIZE {
            return Err(ConfigError::SegmentSize);
        }
        if self.start_attempts == 0 || self.send_attempts == 0 {
            return Err(ConfigError::Attempts);
        }
        Ok(())
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Reasons a [`TransferConfig`] is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Segment size is zero or above the radio ceiling
    SegmentSize,
    /// Start or send attempts is zero
    Attempts,
    /// Transfer name longer than a frame may carry
    NameLength,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::SegmentSize => write!(f, "segment size must be 1..=245"),
            ConfigError::Attempts => write!(f, "attempt counts must be non-zero"),
            ConfigError::NameLength => write!(f, "transfer name too long"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = TransferConfig::default();
        assert_eq!(config.network_id, 0x3210);
        assert_eq!(config.segment_size, 245);
        assert_eq!(config.no_ack_count_limit, 250);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_fast_mode_segment_size() {
        let config = TransferConfig::fast_mode();
        assert_eq!(config.segment_size, 117);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_segment_size() {
        let config = TransferConfig::new().with_segment_size(0);
        assert_eq!(config.validate(), Err(ConfigError::SegmentSize));

        let config = TransferConfig::new().with_segment_size(246);
        assert_eq!(config.validate(), Err(ConfigError::SegmentSize));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = TransferConfig::new().with_attempts(0, 3);
        assert_eq!(config.validate(), Err(ConfigError::Attempts));
    }
}
