//! [`SerialPort`] over any `embedded_io_async` stream
//!
//! Works with a HAL UART, USB CDC-ACM, or anything else implementing the
//! embedded-io traits. Reads only touch the stream when it reports data
//! ready, so callers can poll with a timeout.

use super::traits::{SerialError, SerialPort};
use embedded_io_async::{Error, ErrorKind, Read, ReadReady, Write};

/// Adapter from an embedded-io stream to [`SerialPort`]
pub struct IoPort<T> {
    inner: T,
}

impl<T> IoPort<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn read_error<E: Error>(error: E) -> SerialError {
    match error.kind() {
        ErrorKind::OutOfMemory => SerialError::OverflowError,
        ErrorKind::TimedOut => SerialError::Timeout,
        _ => SerialError::FramingError,
    }
}

fn write_error<E: Error>(error: E) -> SerialError {
    match error.kind() {
        ErrorKind::TimedOut => SerialError::Timeout,
        _ => SerialError::WriteError,
    }
}

impl<T: Read + ReadReady + Write> SerialPort for IoPort<T> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        if !self.inner.read_ready().map_err(read_error)? {
            return Ok(0);
        }
        self.inner.read(buf).await.map_err(read_error)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), SerialError> {
        self.inner.write_all(data).await.map_err(write_error)
    }

    async fn flush(&mut self) -> Result<(), SerialError> {
        self.inner.flush().await.map_err(write_error)
    }
}
