//! Radio transceiver trait for abstraction and testability
//!
//! The transfer engine only needs to push bytes out, pull bytes in with a
//! timeout, and read signal quality. Each radio family implements this once
//! and the protocol code above it is shared.

use crate::config::protocol::MAX_PACKET_LEN;
use core::future::Future;
use heapless::Vec;

/// Errors reported by a transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Nothing arrived, or transmission did not finish, within the window
    Timeout,
    /// Packet arrived with a bad radio-level CRC
    CrcError,
    /// Transmission failed
    TransmitFailed,
    /// Reception failed
    ReceiveFailed,
    /// Radio stayed busy past its limit
    BusyTimeout,
    /// Bus communication error
    SpiError,
    /// Radio not initialised
    NotInitialised,
}

impl RadioError {
    /// Whether the error means the hardware cannot carry on
    ///
    /// Timeouts and corrupted packets are ordinary link losses and are left
    /// to the retry logic.
    pub fn is_fatal(self) -> bool {
        !matches!(self, RadioError::Timeout | RadioError::CrcError)
    }
}

impl core::fmt::Display for RadioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            RadioError::Timeout => "radio timeout",
            RadioError::CrcError => "radio CRC error",
            RadioError::TransmitFailed => "transmit failed",
            RadioError::ReceiveFailed => "receive failed",
            RadioError::BusyTimeout => "radio busy timeout",
            RadioError::SpiError => "SPI error",
            RadioError::NotInitialised => "radio not initialised",
        };
        f.write_str(text)
    }
}

/// Received packet with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPacket {
    /// Received data
    pub data: Vec<u8, MAX_PACKET_LEN>,
    /// Received Signal Strength Indicator in dBm
    pub rssi: i16,
    /// Signal-to-Noise Ratio in dB
    pub snr: i8,
}

impl RxPacket {
    /// Packet with neutral signal readings, truncated to the radio limit
    pub fn from_slice(data: &[u8]) -> Self {
        let len = data.len().min(MAX_PACKET_LEN);
        let mut buf = Vec::new();
        let _ = buf.extend_from_slice(&data[..len]);
        Self {
            data: buf,
            rssi: 0,
            snr: 0,
        }
    }
}

/// Half-duplex packet radio
pub trait Transceiver {
    /// Transmit one packet
    ///
    /// Resolves once the packet is on air, or with [`RadioError::Timeout`]
    /// if that takes longer than `timeout_ms`.
    fn transmit(&mut self, data: &[u8], timeout_ms: u32) -> impl Future<Output = Result<(), RadioError>>;

    /// Receive one packet
    ///
    /// Listens until a packet arrives or `timeout_ms` expires.
    fn receive(&mut self, timeout_ms: u32) -> impl Future<Output = Result<RxPacket, RadioError>>;

    /// RSSI of the last received packet in dBm
    fn last_rssi(&self) -> i16;

    /// SNR of the last received packet in dB
    fn last_snr(&self) -> i8;

    /// Whether the radio is still busy with a previous operation
    fn is_busy(&self) -> bool;
}

#[cfg(test)]
pub mod mock {
    //! Mock transceiver for testing

    use super::*;
    use crate::time::mock::MockClock;
    use crate::time::Clock;
    use core::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Mock transceiver for unit testing
    pub struct MockTransceiver {
        /// Packets returned by receive(), oldest first
        rx_queue: RefCell<VecDeque<RxPacket>>,
        /// Record of transmitted packets
        tx_history: RefCell<std::vec::Vec<std::vec::Vec<u8>>>,
        /// Error to return on next transmit
        next_tx_error: Cell<Option<RadioError>>,
        /// Error to return on next receive
        next_rx_error: Cell<Option<RadioError>>,
        /// receive() calls left that report busy
        busy_polls: Cell<u32>,
        last_rssi: Cell<i16>,
        last_snr: Cell<i8>,
        /// Clock advanced by the full window when receive() times out
        clock: Option<MockClock>,
    }

    impl MockTransceiver {
        pub fn new() -> Self {
            Self {
                rx_queue: RefCell::new(VecDeque::new()),
                tx_history: RefCell::new(std::vec::Vec::new()),
                next_tx_error: Cell::new(None),
                next_rx_error: Cell::new(None),
                busy_polls: Cell::new(0),
                last_rssi: Cell::new(0),
                last_snr: Cell::new(0),
                clock: None,
            }
        }

        /// Mock whose receive timeouts consume virtual time
        pub fn with_clock(clock: MockClock) -> Self {
            Self {
                clock: Some(clock),
                ..Self::new()
            }
        }

        /// Queue a packet to be returned by a later receive() call
        pub fn queue_rx_packet(&self, packet: RxPacket) {
            self.rx_queue.borrow_mut().push_back(packet);
        }

        /// Queue raw bytes with neutral signal readings
        pub fn queue_rx_bytes(&self, data: &[u8]) {
            self.queue_rx_packet(RxPacket::from_slice(data));
        }

        /// Set an error to be returned by the next transmit() call
        pub fn set_next_tx_error(&self, error: RadioError) {
            self.next_tx_error.set(Some(error));
        }

        /// Set an error to be returned by the next receive() call
        pub fn set_next_rx_error(&self, error: RadioError) {
            self.next_rx_error.set(Some(error));
        }

        /// Report busy for the next `polls` is_busy() checks
        pub fn set_busy_polls(&self, polls: u32) {
            self.busy_polls.set(polls);
        }

        /// Get all transmitted packets
        pub fn get_tx_history(&self) -> std::vec::Vec<std::vec::Vec<u8>> {
            self.tx_history.borrow().clone()
        }

        pub fn pending_rx(&self) -> usize {
            self.rx_queue.borrow().len()
        }
    }

    impl Default for MockTransceiver {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transceiver for MockTransceiver {
        async fn transmit(&mut self, data: &[u8], _timeout_ms: u32) -> Result<(), RadioError> {
            if let Some(error) = self.next_tx_error.take() {
                return Err(error);
            }

            self.tx_history.borrow_mut().push(data.to_vec());
            Ok(())
        }

        async fn receive(&mut self, timeout_ms: u32) -> Result<RxPacket, RadioError> {
            if let Some(error) = self.next_rx_error.take() {
                return Err(error);
            }

            match self.rx_queue.borrow_mut().pop_front() {
                Some(packet) => {
                    self.last_rssi.set(packet.rssi);
                    self.last_snr.set(packet.snr);
                    Ok(packet)
                }
                None => {
                    if let Some(clock) = &self.clock {
                        clock.advance(timeout_ms);
                    }
                    Err(RadioError::Timeout)
                }
            }
        }

        fn last_rssi(&self) -> i16 {
            self.last_rssi.get()
        }

        fn last_snr(&self) -> i8 {
            self.last_snr.get()
        }

        fn is_busy(&self) -> bool {
            let polls = self.busy_polls.get();
            if polls > 0 {
                self.busy_polls.set(polls - 1);
                return true;
            }
            false
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_mock_transmit() {
            let mut radio = MockTransceiver::new();

            futures::executor::block_on(async {
                let data = [0x01, 0x02, 0x03];
                radio.transmit(&data, 1000).await.unwrap();

                let history = radio.get_tx_history();
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].as_slice(), &data);
            });
        }

        #[test]
        fn test_mock_receive_queued() {
            let mut radio = MockTransceiver::new();

            futures::executor::block_on(async {
                let mut packet = RxPacket::from_slice(&[0x48, 0x65, 0x6C]);
                packet.rssi = -50;
                packet.snr = 10;
                radio.queue_rx_packet(packet);

                let received = radio.receive(1000).await.unwrap();
                assert_eq!(received.data.as_slice(), &[0x48, 0x65, 0x6C]);
                assert_eq!(radio.last_rssi(), -50);
                assert_eq!(radio.last_snr(), 10);
            });
        }

        #[test]
        fn test_mock_receive_timeout_advances_clock() {
            let clock = MockClock::new();
            let mut radio = MockTransceiver::with_clock(clock.clone());

            futures::executor::block_on(async {
                let result = radio.receive(750).await;
                assert_eq!(result, Err(RadioError::Timeout));
            });

            assert_eq!(clock.now_ms(), 750);
        }

        #[test]
        fn test_mock_tx_error() {
            let mut radio = MockTransceiver::new();

            futures::executor::block_on(async {
                radio.set_next_tx_error(RadioError::TransmitFailed);

                let result = radio.transmit(&[0x01], 1000).await;
                assert_eq!(result, Err(RadioError::TransmitFailed));

                // Error should be cleared, next call should succeed
                radio.transmit(&[0x02], 1000).await.unwrap();
                assert_eq!(radio.get_tx_history().len(), 1);
            });
        }

        #[test]
        fn test_fatal_classification() {
            assert!(!RadioError::Timeout.is_fatal());
            assert!(!RadioError::CrcError.is_fatal());
            assert!(RadioError::TransmitFailed.is_fatal());
            assert!(RadioError::SpiError.is_fatal());
        }
    }
}
