//! Serial port trait
//!
//! YModem uploads go out over a UART to a PC terminal program. The sender only
//! needs byte reads that may come back empty, writes, and a flush, so any
//! UART driver or a test mock can sit behind this trait.

use core::future::Future;

/// Errors from a serial port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialError {
    /// Framing error in received data
    FramingError,
    /// Receive or transmit buffer overflowed
    OverflowError,
    /// Operation timed out
    Timeout,
    /// Write error
    WriteError,
}

impl core::fmt::Display for SerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SerialError::FramingError => write!(f, "framing error"),
            SerialError::OverflowError => write!(f, "buffer overflow"),
            SerialError::Timeout => write!(f, "timeout"),
            SerialError::WriteError => write!(f, "write failed"),
        }
    }
}

/// Byte-oriented serial port
pub trait SerialPort {
    /// Read whatever is waiting, up to `buf.len()` bytes
    ///
    /// Returns 0 when nothing has arrived; callers poll.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize, SerialError>>;

    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), SerialError>>;

    fn flush(&mut self) -> impl Future<Output = Result<(), SerialError>>;
}

#[cfg(test)]
pub mod mock {
    //! Mock serial port for testing

    use super::*;
    use crate::time::mock::MockClock;
    use crate::time::Clock;
    use core::cell::RefCell;
    use heapless::Vec;
    use std::collections::VecDeque;

    /// Capacity of the recorded output
    pub const TX_CAPACITY: usize = 8192;

    /// Mock serial port
    ///
    /// Each chunk queued with [`MockSerialPort::queue_reply`] becomes readable
    /// after the next write, imitating a terminal that answers every block as
    /// it lands. With a clock, [`MockSerialPort::queue_rx_at`] delivers bytes
    /// at a set virtual time.
    pub struct MockSerialPort {
        /// Bytes readable right now
        rx_buffer: RefCell<VecDeque<u8>>,
        /// Chunks released one per write
        replies: RefCell<VecDeque<std::vec::Vec<u8>>>,
        /// Bytes arriving once the clock reaches their time
        timed: RefCell<VecDeque<(u32, std::vec::Vec<u8>)>>,
        /// Everything written
        tx_buffer: RefCell<Vec<u8, TX_CAPACITY>>,
        writes: RefCell<usize>,
        next_read_error: RefCell<Option<SerialError>>,
        next_write_error: RefCell<Option<SerialError>>,
        clock: Option<MockClock>,
    }

    impl MockSerialPort {
        pub fn new() -> Self {
            Self {
                rx_buffer: RefCell::new(VecDeque::new()),
                replies: RefCell::new(VecDeque::new()),
                timed: RefCell::new(VecDeque::new()),
                tx_buffer: RefCell::new(Vec::new()),
                writes: RefCell::new(0),
                next_read_error: RefCell::new(None),
                next_write_error: RefCell::new(None),
                clock: None,
            }
        }

        /// Mock that can deliver bytes at a virtual time
        pub fn with_clock(clock: MockClock) -> Self {
            Self {
                clock: Some(clock),
                ..Self::new()
            }
        }

        /// Make bytes readable immediately
        pub fn queue_rx_data(&self, data: &[u8]) {
            self.rx_buffer.borrow_mut().extend(data.iter().copied());
        }

        /// Queue a chunk to become readable after the next unanswered write
        pub fn queue_reply(&self, data: &[u8]) {
            self.replies.borrow_mut().push_back(data.to_vec());
        }

        /// Make bytes readable once the clock reaches `at_ms`
        pub fn queue_rx_at(&self, at_ms: u32, data: &[u8]) {
            self.timed.borrow_mut().push_back((at_ms, data.to_vec()));
        }

        pub fn get_tx_data(&self) -> Vec<u8, TX_CAPACITY> {
            self.tx_buffer.borrow().clone()
        }

        /// Number of write() calls made
        pub fn write_count(&self) -> usize {
            *self.writes.borrow()
        }

        pub fn pending_rx(&self) -> usize {
            self.rx_buffer.borrow().len()
        }

        pub fn set_next_read_error(&self, error: SerialError) {
            *self.next_read_error.borrow_mut() = Some(error);
        }

        pub fn set_next_write_error(&self, error: SerialError) {
            *self.next_write_error.borrow_mut() = Some(error);
        }

        fn release_due(&self) {
            let Some(clock) = &self.clock else {
                return;
            };
            let now = clock.now_ms();
            let mut timed = self.timed.borrow_mut();
            while timed.front().is_some_and(|(at, _)| *at <= now) {
                if let Some((_, data)) = timed.pop_front() {
                    self.queue_rx_data(&data);
                }
            }
        }
    }

    impl Default for MockSerialPort {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SerialPort for MockSerialPort {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
            if let Some(error) = self.next_read_error.borrow_mut().take() {
                return Err(error);
            }
            self.release_due();

            let mut rx = self.rx_buffer.borrow_mut();
            let count = buf.len().min(rx.len());
            for (slot, byte) in buf.iter_mut().zip(rx.drain(..count)) {
                *slot = byte;
            }
            Ok(count)
        }

        async fn write(&mut self, data: &[u8]) -> Result<(), SerialError> {
            if let Some(error) = self.next_write_error.borrow_mut().take() {
                return Err(error);
            }

            self.tx_buffer
                .borrow_mut()
                .extend_from_slice(data)
                .map_err(|_| SerialError::OverflowError)?;
            *self.writes.borrow_mut() += 1;

            if let Some(chunk) = self.replies.borrow_mut().pop_front() {
                self.queue_rx_data(&chunk);
            }
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), SerialError> {
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_mock_partial_read() {
            let mut port = MockSerialPort::new();

            futures::executor::block_on(async {
                port.queue_rx_data(&[0x01, 0x02, 0x03, 0x04, 0x05]);

                let mut buf = [0u8; 2];
                assert_eq!(port.read(&mut buf).await, Ok(2));
                assert_eq!(&buf, &[0x01, 0x02]);

                let mut buf = [0u8; 10];
                assert_eq!(port.read(&mut buf).await, Ok(3));
                assert_eq!(&buf[..3], &[0x03, 0x04, 0x05]);
                assert_eq!(port.read(&mut buf).await, Ok(0));
            });
        }

        #[test]
        fn test_mock_replies_follow_writes() {
            let mut port = MockSerialPort::new();

            futures::executor::block_on(async {
                port.queue_reply(&[0x06, b'C']);
                port.queue_reply(&[0x15]);
                assert_eq!(port.pending_rx(), 0);

                port.write(&[0xAA]).await.unwrap();
                assert_eq!(port.pending_rx(), 2);
                port.write(&[0xBB]).await.unwrap();

                let mut buf = [0u8; 4];
                assert_eq!(port.read(&mut buf).await, Ok(3));
                assert_eq!(&buf[..3], &[0x06, b'C', 0x15]);
                assert_eq!(port.get_tx_data().as_slice(), &[0xAA, 0xBB]);
                assert_eq!(port.write_count(), 2);
            });
        }

        #[test]
        fn test_mock_timed_delivery() {
            let clock = MockClock::new();
            let mut port = MockSerialPort::with_clock(clock.clone());

            futures::executor::block_on(async {
                port.queue_rx_at(10, b"C");
                let mut buf = [0u8; 4];
                assert_eq!(port.read(&mut buf).await, Ok(0));

                clock.advance(10);
                assert_eq!(port.read(&mut buf).await, Ok(1));
                assert_eq!(buf[0], b'C');
            });
        }

        #[test]
        fn test_mock_errors_clear() {
            let mut port = MockSerialPort::new();

            futures::executor::block_on(async {
                port.set_next_read_error(SerialError::FramingError);
                let mut buf = [0u8; 4];
                assert_eq!(port.read(&mut buf).await, Err(SerialError::FramingError));

                port.set_next_write_error(SerialError::WriteError);
                assert_eq!(port.write(&[1]).await, Err(SerialError::WriteError));
                assert_eq!(port.write(&[1]).await, Ok(()));
            });
        }
    }
}
