//! Byte sources and sinks for transfers
//!
//! The engine reads segments out of a [`Source`] on the sending side and
//! writes them into a [`Sink`] on the receiving side. Implementations are
//! provided for in-memory buffers; files plug in the same way.

use heapless::Vec;

/// Errors from a source or sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// Offset outside the data
    OutOfBounds,
    /// Sink cannot hold the data
    Full,
    /// Read returned less than a whole segment
    ShortRead,
    /// Backing store failed
    Device,
}

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IoError::OutOfBounds => write!(f, "offset out of bounds"),
            IoError::Full => write!(f, "sink full"),
            IoError::ShortRead => write!(f, "short read"),
            IoError::Device => write!(f, "storage device error"),
        }
    }
}

/// Data to be sent
pub trait Source {
    /// Total length in bytes
    fn size(&self) -> u32;

    /// Read up to `buf.len()` bytes starting at `offset`
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, IoError>;

    /// Fill `buf` completely from `offset`
    fn read_exact(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), IoError> {
        let mut filled = 0;
        while filled < buf.len() {
            let count = self.read(offset + filled as u32, &mut buf[filled..])?;
            if count == 0 {
                return Err(IoError::ShortRead);
            }
            filled += count;
        }
        Ok(())
    }
}

/// Destination for received data
pub trait Sink {
    /// Prepare for a transfer of `length` bytes, discarding anything held
    fn begin(&mut self, name: &[u8], length: u32) -> Result<(), IoError>;

    /// Write `data` at `offset`, returning the bytes written
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<usize, IoError>;

    /// Bytes currently held
    fn size(&self) -> u32;

    /// Called once the transfer is complete
    fn finish(&mut self) -> Result<(), IoError> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn begin(&mut self, name: &[u8], length: u32) -> Result<(), IoError> {
        (**self).begin(name, length)
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<usize, IoError> {
        (**self).write(offset, data)
    }

    fn size(&self) -> u32 {
        (**self).size()
    }

    fn finish(&mut self) -> Result<(), IoError> {
        (**self).finish()
    }
}

impl Source for &[u8] {
    fn size(&self) -> u32 {
        self.len() as u32
    }

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, IoError> {
        let start = offset as usize;
        if start > self.len() {
            return Err(IoError::OutOfBounds);
        }
        let count = buf.len().min(self.len() - start);
        buf[..count].copy_from_slice(&self[start..start + count]);
        Ok(count)
    }
}

/// Writes into a caller-provided array
pub struct ArraySink<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> ArraySink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    /// The bytes written so far
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Sink for ArraySink<'_> {
    fn begin(&mut self, _name: &[u8], length: u32) -> Result<(), IoError> {
        if length as usize > self.buf.len() {
            return Err(IoError::Full);
        }
        self.len = 0;
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<usize, IoError> {
        let start = offset as usize;
        if start > self.len {
            return Err(IoError::OutOfBounds);
        }
        let end = start + data.len();
        if end > self.buf.len() {
            return Err(IoError::Full);
        }
        self.buf[start..end].copy_from_slice(data);
        self.len = self.len.max(end);
        Ok(data.len())
    }

    fn size(&self) -> u32 {
        self.len as u32
    }
}

impl<const N: usize> Sink for Vec<u8, N> {
    fn begin(&mut self, _name: &[u8], length: u32) -> Result<(), IoError> {
        if length as usize > N {
            return Err(IoError::Full);
        }
        self.clear();
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<usize, IoError> {
        let start = offset as usize;
        if start > self.len() {
            return Err(IoError::OutOfBounds);
        }
        let overlap = data.len().min(self.len() - start);
        self[start..start + overlap].copy_from_slice(&data[..overlap]);
        self.extend_from_slice(&data[overlap..])
            .map_err(|_| IoError::Full)?;
        Ok(data.len())
    }

    fn size(&self) -> u32 {
        self.len() as u32
    }
}
