//! Single-packet reliable exchange
//!
//! A [`Link`] owns the radio and the clock. It stamps outgoing requests with
//! the network id and payload CRC, and it filters inbound traffic. Anything
//! that fails to decode, belongs to another network, or fails its CRC is
//! dropped here and looks like silence to the caller.
//!
//! Nothing in this module retries. One call sends one packet.

use crate::config::TransferConfig;
use crate::protocol::crc::CrcMode;
use crate::protocol::frame::{Frame, FrameError};
use crate::protocol::packet::{Outcome, PacketKind, PacketType};
use crate::radio::{RadioError, Transceiver};
use crate::time::{Clock, Deadline};
use log::{debug, warn};

/// Interval between polls of a busy radio
const BUSY_POLL_MS: u32 = 1;

/// Errors that end an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Transceiver fault
    Radio(RadioError),
    /// Outgoing frame could not be encoded
    Frame(FrameError),
}

impl From<RadioError> for LinkError {
    fn from(error: RadioError) -> Self {
        LinkError::Radio(error)
    }
}

impl From<FrameError> for LinkError {
    fn from(error: FrameError) -> Self {
        LinkError::Frame(error)
    }
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinkError::Radio(e) => write!(f, "radio: {}", e),
            LinkError::Frame(e) => write!(f, "frame: {}", e),
        }
    }
}

/// Result of a single transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    Timeout,
}

/// Result of waiting for an acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    /// Peer acknowledged; the reply may carry fields the caller needs
    Acked(Frame),
    /// Peer answered with a NACK
    NotAcked(Frame),
    /// No matching reply within the window
    Timeout,
}

/// Result of listening for an inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveStatus {
    Received(Frame),
    Timeout,
}

/// Counters kept by a link
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u32,
    pub frames_received: u32,
    pub acks: u32,
    pub nacks: u32,
    pub ack_timeouts: u32,
    /// Frames that failed to decode
    pub rejected_malformed: u32,
    /// Frames for another network id
    pub rejected_network: u32,
    /// Frames with a bad radio or payload CRC
    pub rejected_crc: u32,
    /// Valid replies that did not answer the frame we sent
    pub rejected_unrelated: u32,
}

/// Whether `reply` can answer a request of type `sent`
fn answers(sent: PacketType, reply: PacketType) -> bool {
    if !reply.is_reply() {
        return false;
    }
    if reply.kind == sent.kind {
        return true;
    }
    match reply.outcome {
        // A receiver holding a partial transfer answers Start with a seek
        Outcome::Ack => sent.kind == PacketKind::Start && reply.kind == PacketKind::DataSeek,
        // A receiver with no open session refuses anything with StartNACK
        Outcome::Nack => reply.kind == PacketKind::Start,
        Outcome::Request => false,
    }
}

/// Whether `reply` echoes `sent` closely enough to be its answer
///
/// The payload CRC must match. A SegmentWriteACK must also name the segment
/// sent, so an ACK for an earlier segment with identical content is stale.
fn echoes(sent: &Frame, reply: &Frame) -> bool {
    if reply.payload_crc != sent.payload_crc {
        return false;
    }
    if reply.packet_type == PacketType::ack(PacketKind::SegmentWrite) {
        return reply.header == sent.header;
    }
    true
}

/// Radio plus clock, with framing and validation
pub struct Link<R: Transceiver, C: Clock> {
    radio: R,
    clock: C,
    network_id: u16,
    crc_mode: CrcMode,
    stats: LinkStats,
}

impl<R: Transceiver, C: Clock> Link<R, C> {
    pub fn new(radio: R, clock: C, network_id: u16, crc_mode: CrcMode) -> Self {
        Self {
            radio,
            clock,
            network_id,
            crc_mode,
            stats: LinkStats::default(),
        }
    }

    /// Link using the network id and CRC mode of a transfer configuration
    pub fn from_config(radio: R, clock: C, config: &TransferConfig) -> Self {
        Self::new(radio, clock, config.network_id, config.crc_mode)
    }

    pub fn network_id(&self) -> u16 {
        self.network_id
    }

    pub fn crc_mode(&self) -> CrcMode {
        self.crc_mode
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn into_parts(self) -> (R, C) {
        (self.radio, self.clock)
    }

    pub fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    /// Pause; zero returns immediately
    pub async fn delay_ms(&mut self, ms: u32) {
        if ms > 0 {
            self.clock.delay_ms(ms).await;
        }
    }

    /// Fill in the trailer of an outgoing frame
    ///
    /// Requests get a fresh payload CRC. Replies keep the CRC they echo.
    pub fn stamp(&self, frame: &mut Frame) {
        frame.network_id = self.network_id;
        if !frame.packet_type.is_reply() {
            frame.payload_crc = self.crc_mode.checksum(&frame.payload);
        }
    }

    /// Poll until the radio is idle; false if it stays busy past the timeout
    async fn wait_not_busy(&mut self, timeout_ms: u32) -> bool {
        let deadline = Deadline::after(&self.clock, timeout_ms);
        while self.radio.is_busy() {
            if deadline.expired(self.clock.now_ms()) {
                return false;
            }
            self.clock.delay_ms(BUSY_POLL_MS).await;
        }
        true
    }

    /// Transmit once, without waiting for any answer
    ///
    /// A radio that stays busy, or a transmission that does not finish,
    /// within `tx_timeout_ms` gives [`SendStatus::Timeout`].
    pub async fn transmit_reliable(&mut self, frame: &mut Frame, tx_timeout_ms: u32) -> Result<SendStatus, LinkError> {
        self.stamp(frame);
        let bytes = frame.encode()?;
        if !self.wait_not_busy(tx_timeout_ms).await {
            warn!("Radio busy, {} not sent", frame.packet_type);
            return Ok(SendStatus::Timeout);
        }

        match self.radio.transmit(&bytes, tx_timeout_ms).await {
            Ok(()) => {
                self.stats.frames_sent += 1;
                debug!(
                    "TX {} seq {:?} len {} crc 0x{:04X}",
                    frame.packet_type,
                    frame.sequence(),
                    bytes.len(),
                    frame.payload_crc
                );
                Ok(SendStatus::Sent)
            }
            Err(RadioError::Timeout) => {
                warn!("TX timeout for {}", frame.packet_type);
                Ok(SendStatus::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Transmit, then listen for the matching ACK or NACK
    ///
    /// A reply only counts if it carries our network id and echoes the CRC of
    /// the payload just sent, so a late ACK for an earlier packet is ignored.
    pub async fn transmit_reliable_auto_ack(
        &mut self,
        frame: &mut Frame,
        ack_timeout_ms: u32,
        tx_timeout_ms: u32,
    ) -> Result<AckStatus, LinkError> {
        match self.transmit_reliable(frame, tx_timeout_ms).await? {
            SendStatus::Sent => self.wait_ack(frame, ack_timeout_ms).await,
            SendStatus::Timeout => Ok(AckStatus::Timeout),
        }
    }

    /// Listen for a reply to `sent` until the window closes
    pub async fn wait_ack(&mut self, sent: &Frame, ack_timeout_ms: u32) -> Result<AckStatus, LinkError> {
        let deadline = Deadline::after(&self.clock, ack_timeout_ms);

        loop {
            let remaining = deadline.remaining(self.clock.now_ms());
            if remaining == 0 {
                self.stats.ack_timeouts += 1;
                debug!("No ACK for {}", sent.packet_type);
                return Ok(AckStatus::Timeout);
            }

            let Some(reply) = self.receive_frame(remaining).await? else {
                continue;
            };

            if !answers(sent.packet_type, reply.packet_type) || !echoes(sent, &reply) {
                self.stats.rejected_unrelated += 1;
                debug!("Ignoring {} while waiting on {}", reply.packet_type, sent.packet_type);
                continue;
            }

            return Ok(match reply.packet_type.outcome {
                Outcome::Nack => {
                    self.stats.nacks += 1;
                    AckStatus::NotAcked(reply)
                }
                _ => {
                    self.stats.acks += 1;
                    AckStatus::Acked(reply)
                }
            });
        }
    }

    /// Listen for any valid frame until the window closes
    pub async fn receive_reliable(&mut self, timeout_ms: u32) -> Result<ReceiveStatus, LinkError> {
        let deadline = Deadline::after(&self.clock, timeout_ms);

        loop {
            let remaining = deadline.remaining(self.clock.now_ms());
            if remaining == 0 {
                return Ok(ReceiveStatus::Timeout);
            }
            if let Some(frame) = self.receive_frame(remaining).await? {
                return Ok(ReceiveStatus::Received(frame));
            }
        }
    }

    /// Receive a valid frame, pause `ack_delay_ms`, then acknowledge it
    pub async fn receive_reliable_auto_ack(
        &mut self,
        ack_delay_ms: u32,
        timeout_ms: u32,
        tx_timeout_ms: u32,
    ) -> Result<ReceiveStatus, LinkError> {
        let status = self.receive_reliable(timeout_ms).await?;
        if let ReceiveStatus::Received(frame) = &status {
            self.send_reply(frame.reply(Outcome::Ack), ack_delay_ms, tx_timeout_ms)
                .await?;
        }
        Ok(status)
    }

    /// Pause, then acknowledge `received` with data in the ACK payload
    ///
    /// The requester gets the data back in [`AckStatus::Acked`].
    pub async fn send_ack_with(
        &mut self,
        received: &Frame,
        payload: &[u8],
        delay_ms: u32,
        tx_timeout_ms: u32,
    ) -> Result<SendStatus, LinkError> {
        let reply = received.reply_with(Outcome::Ack, payload)?;
        self.send_reply(reply, delay_ms, tx_timeout_ms).await
    }

    /// Pause, then send a reply built by the caller
    pub async fn send_reply(&mut self, mut reply: Frame, delay_ms: u32, tx_timeout_ms: u32) -> Result<SendStatus, LinkError> {
        self.delay_ms(delay_ms).await;
        self.transmit_reliable(&mut reply, tx_timeout_ms).await
    }

    /// One radio receive, validated
    ///
    /// `Ok(None)` covers silence and every kind of rejected frame.
    async fn receive_frame(&mut self, timeout_ms: u32) -> Result<Option<Frame>, LinkError> {
        let packet = match self.radio.receive(timeout_ms).await {
            Ok(packet) => packet,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(RadioError::CrcError) => {
                self.stats.rejected_crc += 1;
                return Ok(None);
            }
            Err(_) => return Ok(None),
        };

        let frame = match Frame::decode(&packet.data) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.rejected_malformed += 1;
                debug!("Dropping packet: {}", e);
                return Ok(None);
            }
        };

        if frame.network_id != self.network_id {
            self.stats.rejected_network += 1;
            debug!("Dropping {} for network 0x{:04X}", frame.packet_type, frame.network_id);
            return Ok(None);
        }

        if !frame.packet_type.is_reply() && !self.crc_mode.verify(&frame.payload, frame.payload_crc) {
            self.stats.rejected_crc += 1;
            debug!("Dropping {} with bad payload CRC", frame.packet_type);
            return Ok(None);
        }

        self.stats.frames_received += 1;
        debug!(
            "RX {} seq {:?} rssi {} snr {}",
            frame.packet_type,
            frame.sequence(),
            self.radio.last_rssi(),
            self.radio.last_snr()
        );
        Ok(Some(frame))
    }
}
