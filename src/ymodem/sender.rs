//! YModem batch sender
//!
//! Sends one file as 128-byte CRC blocks to a PC terminal program. Block 0
//! carries the name and size; the receiver answers it with ACK followed by
//! 'C'. Every data block must be ACKed before the next goes out. NAKs and
//! unknown answers resend the block, and they count toward a per-file error
//! limit.

use crate::config::ymodem::{ACK_ERROR_LIMIT, BLOCK_SIZE, TRANSFER_TIMEOUT_MS};
use crate::protocol::crc::crc16_xmodem;
use crate::serial::{SerialError, SerialPort};
use crate::time::{Clock, Deadline};
use crate::transfer::io::{IoError, Source};
use core::fmt::Write;
use log::{debug, info, warn};

pub const SOH: u8 = 0x01;
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
/// Receiver's request for a CRC-mode transfer
pub const CRC_REQUEST: u8 = b'C';
/// Filler after the last data byte
pub const PAD: u8 = 0x1A;

/// SOH, block number, its complement, payload, CRC
pub const PACKET_LEN: usize = 3 + BLOCK_SIZE + 2;

const POLL_MS: u32 = 1;

/// Errors that end a YModem send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YModemError {
    /// Receiver did not answer in time
    Timeout,
    /// Nothing to send
    EmptySource,
    /// Too many NAKs or unknown answers
    AckErrorLimit,
    /// Name and size do not fit in block 0
    NameTooLong,
    Serial(SerialError),
    Source(IoError),
}

impl From<SerialError> for YModemError {
    fn from(error: SerialError) -> Self {
        YModemError::Serial(error)
    }
}

impl core::fmt::Display for YModemError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            YModemError::Timeout => write!(f, "timeout waiting for receiver"),
            YModemError::EmptySource => write!(f, "source is empty"),
            YModemError::AckErrorLimit => write!(f, "ack error limit reached"),
            YModemError::NameTooLong => write!(f, "file name too long"),
            YModemError::Serial(e) => write!(f, "serial: {}", e),
            YModemError::Source(e) => write!(f, "source: {}", e),
        }
    }
}

/// Frame one block: `[SOH, n, 0xFF - n, payload, crc_hi, crc_lo]`
pub fn build_packet(block: u8, payload: &[u8; BLOCK_SIZE]) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = SOH;
    packet[1] = block;
    packet[2] = 0xFF - block;
    packet[3..3 + BLOCK_SIZE].copy_from_slice(payload);
    packet[3 + BLOCK_SIZE..].copy_from_slice(&crc16_xmodem(payload).to_be_bytes());
    packet
}

/// Block 0 payload: name, NUL, decimal size, zero fill
pub fn header_payload(name: &[u8], size: u32) -> Result<[u8; BLOCK_SIZE], YModemError> {
    let mut digits: heapless::String<10> = heapless::String::new();
    write!(digits, "{}", size).map_err(|_| YModemError::NameTooLong)?;

    // Keep a trailing NUL after the size
    if name.len() + 1 + digits.len() >= BLOCK_SIZE {
        return Err(YModemError::NameTooLong);
    }

    let mut payload = [0u8; BLOCK_SIZE];
    payload[..name.len()].copy_from_slice(name);
    let start = name.len() + 1;
    payload[start..start + digits.len()].copy_from_slice(digits.as_bytes());
    Ok(payload)
}

struct Session<'a, P: SerialPort, C: Clock> {
    port: &'a mut P,
    clock: &'a mut C,
    errors: u8,
}

impl<P: SerialPort, C: Clock> Session<'_, P, C> {
    /// Discard anything already waiting
    async fn drain(&mut self) -> Result<(), YModemError> {
        let mut buf = [0u8; 16];
        while self.port.read(&mut buf).await? > 0 {}
        Ok(())
    }

    async fn read_byte(&mut self, deadline: &Deadline) -> Result<u8, YModemError> {
        let mut byte = [0u8; 1];
        loop {
            if self.port.read(&mut byte).await? == 1 {
                return Ok(byte[0]);
            }
            if deadline.expired(self.clock.now_ms()) {
                return Err(YModemError::Timeout);
            }
            self.clock.delay_ms(POLL_MS).await;
        }
    }

    async fn next_answer(&mut self) -> Result<u8, YModemError> {
        let deadline = Deadline::after(&*self.clock, TRANSFER_TIMEOUT_MS);
        self.read_byte(&deadline).await
    }

    async fn wait_for_receiver(&mut self) -> Result<(), YModemError> {
        self.drain().await?;
        let deadline = Deadline::after(&*self.clock, TRANSFER_TIMEOUT_MS);
        while self.read_byte(&deadline).await? != CRC_REQUEST {}
        Ok(())
    }

    fn count_error(&mut self, answer: u8) -> Result<(), YModemError> {
        self.errors += 1;
        if answer == NAK {
            debug!("NAK");
        } else {
            debug!("Unexpected answer 0x{:02X}", answer);
        }
        if self.errors >= ACK_ERROR_LIMIT {
            warn!("YModem ack error limit reached");
            return Err(YModemError::AckErrorLimit);
        }
        Ok(())
    }

    /// Send block 0 until it is ACKed and followed by 'C'
    async fn send_header(&mut self, packet: &[u8; PACKET_LEN]) -> Result<(), YModemError> {
        loop {
            self.port.write(packet).await?;
            let answer = self.next_answer().await?;
            if answer != ACK {
                self.count_error(answer)?;
                continue;
            }
            let answer = self.next_answer().await?;
            if answer == CRC_REQUEST {
                return Ok(());
            }
            self.count_error(answer)?;
        }
    }

    /// Send a data block until it is ACKed
    async fn send_block(&mut self, packet: &[u8; PACKET_LEN]) -> Result<(), YModemError> {
        loop {
            self.port.write(packet).await?;
            let answer = self.next_answer().await?;
            if answer == ACK {
                return Ok(());
            }
            self.count_error(answer)?;
        }
    }
}

/// Send `source` as `name`, returning the bytes sent
///
/// With `wait_for_receiver` the send begins only once the receiver asks for
/// it with 'C'. Set `batch` for every file of a batch but the last; the last
/// file ends the session with an empty block 0.
pub async fn send_file<P, C, S>(
    port: &mut P,
    clock: &mut C,
    source: &mut S,
    name: &[u8],
    wait_for_receiver: bool,
    batch: bool,
) -> Result<u32, YModemError>
where
    P: SerialPort,
    C: Clock,
    S: Source,
{
    let size = source.size();
    if size == 0 {
        return Err(YModemError::EmptySource);
    }
    let header = build_packet(0, &header_payload(name, size)?);

    let mut session = Session {
        port,
        clock,
        errors: 0,
    };

    if wait_for_receiver {
        session.wait_for_receiver().await.inspect_err(|_| {
            warn!("Timeout starting YModem transfer");
        })?;
    }

    info!("YModem sending {} bytes", size);
    session.send_header(&header).await?;

    let mut block: u8 = 1;
    let mut offset = 0u32;
    while offset < size {
        let len = BLOCK_SIZE.min((size - offset) as usize);
        let mut payload = [PAD; BLOCK_SIZE];
        source
            .read_exact(offset, &mut payload[..len])
            .map_err(YModemError::Source)?;

        session.send_block(&build_packet(block, &payload)).await?;
        offset += len as u32;
        block = block.wrapping_add(1);
    }

    session.port.write(&[EOT]).await?;
    session.next_answer().await?;
    session.port.write(&[EOT]).await?;

    if !batch {
        session.port.write(&build_packet(0, &[0u8; BLOCK_SIZE])).await?;
    }
    session.port.flush().await?;

    info!("YModem sent {} bytes", size);
    Ok(size)
}
