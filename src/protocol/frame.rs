//! Frame layout and codec
//!
//! # Wire Format
//!
//! ```text
//! [type: u8][flags: u8][header_len: u8][data_len: u8][fields...][payload...][network_id: u16 LE][payload_crc: u16 LE]
//! ```
//!
//! - `type`: [`PacketType`] byte
//! - `header_len`: fixed per kind (6, 8, 9 or 12), see [`PacketKind::header_len`]
//! - `data_len`: payload length for requests; replies echo the request's value
//!   and carry no payload
//! - `fields`: kind-specific, see [`Header`]
//! - `payload_crc`: CRC over the payload only; replies echo the request's CRC
//!
//! No retries or timeouts live here. Decode failures are reported to the caller,
//! which treats them exactly like a frame that never arrived.

use crate::config::protocol::{MAX_PACKET_LEN, MAX_PAYLOAD, TRAILER_LEN};
use crate::protocol::packet::{Outcome, PacketKind, PacketType};
use heapless::Vec;

/// Smallest header of any kind
pub const MIN_HEADER_LEN: usize = 6;

/// Encoded frame buffer
pub type FrameBuf = Vec<u8, MAX_PACKET_LEN>;

/// Errors from encoding or decoding a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the header and trailer need
    Truncated,
    /// Type byte matches no known packet type
    UnknownType(u8),
    /// Header length byte disagrees with the packet type
    HeaderLength,
    /// Data length byte disagrees with the payload of a request
    DataLength,
    /// Header fields do not belong to the packet kind
    HeaderMismatch,
    /// Payload or whole packet exceeds the radio limit
    TooLong,
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "frame truncated"),
            FrameError::UnknownType(byte) => write!(f, "unknown packet type 0x{:02X}", byte),
            FrameError::HeaderLength => write!(f, "header length does not match packet type"),
            FrameError::DataLength => write!(f, "data length does not match payload"),
            FrameError::HeaderMismatch => write!(f, "header fields do not match packet kind"),
            FrameError::TooLong => write!(f, "frame exceeds radio packet limit"),
        }
    }
}

/// Kind-specific header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// SegmentWrite: segment index. A NACK carries the segment the receiver expects.
    Segment { segment: u16 },

    /// FileOpen and FileClose. A close ACK carries what the receiver holds.
    Transfer {
        length: u32,
        crc: u16,
        segment_size: u8,
    },

    /// DataSeek: byte offset to resume from
    Seek { offset: u32, segment_size: u8 },

    /// Start, Wake and Info: transaction counter
    Control { sequence: u16 },
}

impl Header {
    fn fits(&self, kind: PacketKind) -> bool {
        matches!(
            (self, kind),
            (Header::Segment { .. }, PacketKind::SegmentWrite)
                | (Header::Transfer { .. }, PacketKind::FileOpen | PacketKind::FileClose)
                | (Header::Seek { .. }, PacketKind::DataSeek)
                | (
                    Header::Control { .. },
                    PacketKind::Start | PacketKind::Wake | PacketKind::Info
                )
        )
    }

    /// Read the fields following the four common header bytes
    fn read(kind: PacketKind, fields: &[u8]) -> Self {
        match kind {
            PacketKind::SegmentWrite => Header::Segment {
                segment: u16::from_le_bytes([fields[0], fields[1]]),
            },
            PacketKind::FileOpen | PacketKind::FileClose => Header::Transfer {
                length: u32::from_le_bytes([fields[0], fields[1], fields[2], fields[3]]),
                crc: u16::from_le_bytes([fields[4], fields[5]]),
                segment_size: fields[6],
            },
            PacketKind::DataSeek => Header::Seek {
                offset: u32::from_le_bytes([fields[0], fields[1], fields[2], fields[3]]),
                segment_size: fields[4],
            },
            PacketKind::Start | PacketKind::Wake | PacketKind::Info => Header::Control {
                sequence: u16::from_le_bytes([fields[0], fields[1]]),
            },
        }
    }

    /// Write the fields, padding reserved bytes up to the kind's header length
    fn write(&self, kind: PacketKind, buf: &mut FrameBuf) -> Result<(), FrameError> {
        let start = buf.len();
        match *self {
            Header::Segment { segment } => push(buf, &segment.to_le_bytes())?,
            Header::Transfer {
                length,
                crc,
                segment_size,
            } => {
                push(buf, &length.to_le_bytes())?;
                push(buf, &crc.to_le_bytes())?;
                push(buf, &[segment_size])?;
            }
            Header::Seek {
                offset,
                segment_size,
            } => {
                push(buf, &offset.to_le_bytes())?;
                push(buf, &[segment_size])?;
            }
            Header::Control { sequence } => push(buf, &sequence.to_le_bytes())?,
        }
        let field_len = kind.header_len() - 4;
        while buf.len() - start < field_len {
            push(buf, &[0])?;
        }
        Ok(())
    }
}

fn push(buf: &mut FrameBuf, bytes: &[u8]) -> Result<(), FrameError> {
    buf.extend_from_slice(bytes).map_err(|_| FrameError::TooLong)
}

/// One radio packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub packet_type: PacketType,
    pub flags: u8,
    /// Payload length the request declared
    pub data_len: u8,
    pub header: Header,
    pub payload: Vec<u8, MAX_PAYLOAD>,
    pub network_id: u16,
    pub payload_crc: u16,
}

impl Frame {
    /// Build a frame with an unstamped trailer
    ///
    /// The network id and payload CRC are filled in by the link when the
    /// frame is sent.
    pub fn new(packet_type: PacketType, header: Header, payload: &[u8]) -> Result<Self, FrameError> {
        if !header.fits(packet_type.kind) {
            return Err(FrameError::HeaderMismatch);
        }
        if packet_type.kind.header_len() + payload.len() + TRAILER_LEN > MAX_PACKET_LEN {
            return Err(FrameError::TooLong);
        }
        let payload = Vec::from_slice(payload).map_err(|_| FrameError::TooLong)?;

        Ok(Self {
            packet_type,
            flags: 0,
            data_len: payload.len() as u8,
            header,
            payload,
            network_id: 0,
            payload_crc: 0,
        })
    }

    pub fn segment(segment: u16, data: &[u8]) -> Result<Self, FrameError> {
        Self::new(
            PacketType::request(PacketKind::SegmentWrite),
            Header::Segment { segment },
            data,
        )
    }

    pub fn file_open(name: &[u8], length: u32, crc: u16, segment_size: u8) -> Result<Self, FrameError> {
        Self::new(
            PacketType::request(PacketKind::FileOpen),
            Header::Transfer {
                length,
                crc,
                segment_size,
            },
            name,
        )
    }

    pub fn file_close(length: u32, crc: u16, segment_size: u8) -> Result<Self, FrameError> {
        Self::new(
            PacketType::request(PacketKind::FileClose),
            Header::Transfer {
                length,
                crc,
                segment_size,
            },
            &[],
        )
    }

    pub fn seek(offset: u32, segment_size: u8) -> Result<Self, FrameError> {
        Self::new(
            PacketType::request(PacketKind::DataSeek),
            Header::Seek {
                offset,
                segment_size,
            },
            &[],
        )
    }

    /// A control request (Start, Wake or Info)
    pub fn control(kind: PacketKind, sequence: u16, payload: &[u8]) -> Result<Self, FrameError> {
        Self::new(PacketType::request(kind), Header::Control { sequence }, payload)
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Segment index or transaction counter, where the kind has one
    pub fn sequence(&self) -> Option<u16> {
        match self.header {
            Header::Segment { segment } => Some(segment),
            Header::Control { sequence } => Some(sequence),
            _ => None,
        }
    }

    /// ACK or NACK of the same kind, echoing header, network id and payload CRC
    pub fn reply(&self, outcome: Outcome) -> Frame {
        self.reply_as(PacketType::new(self.packet_type.kind, outcome), self.header)
    }

    /// Reply of the same kind that carries data back to the requester
    ///
    /// The header and trailer echo the request as in [`Frame::reply`].
    pub fn reply_with(&self, outcome: Outcome, payload: &[u8]) -> Result<Frame, FrameError> {
        let mut reply = self.reply(outcome);
        if self.packet_type.kind.header_len() + payload.len() + TRAILER_LEN > MAX_PACKET_LEN {
            return Err(FrameError::TooLong);
        }
        reply.payload = Vec::from_slice(payload).map_err(|_| FrameError::TooLong)?;
        Ok(reply)
    }

    /// Reply of a different kind (for example a DataSeekACK answering a Start)
    ///
    /// The caller is responsible for passing a header that fits `packet_type`.
    pub fn reply_as(&self, packet_type: PacketType, header: Header) -> Frame {
        Frame {
            packet_type,
            flags: self.flags,
            data_len: self.data_len,
            header,
            payload: Vec::new(),
            network_id: self.network_id,
            payload_crc: self.payload_crc,
        }
    }

    /// Serialise to the wire format
    pub fn encode(&self) -> Result<FrameBuf, FrameError> {
        let kind = self.packet_type.kind;
        if !self.header.fits(kind) {
            return Err(FrameError::HeaderMismatch);
        }

        let mut buf = FrameBuf::new();
        push(
            &mut buf,
            &[
                self.packet_type.to_byte(),
                self.flags,
                kind.header_len() as u8,
                self.data_len,
            ],
        )?;
        self.header.write(kind, &mut buf)?;
        push(&mut buf, &self.payload)?;
        push(&mut buf, &self.network_id.to_le_bytes())?;
        push(&mut buf, &self.payload_crc.to_le_bytes())?;

        Ok(buf)
    }

    /// Parse a received packet
    ///
    /// The trailer is read but not checked; network id and CRC validation
    /// belong to the link.
    pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
        if bytes.len() < MIN_HEADER_LEN + TRAILER_LEN {
            return Err(FrameError::Truncated);
        }

        let packet_type = PacketType::from_byte(bytes[0]).ok_or(FrameError::UnknownType(bytes[0]))?;
        let kind = packet_type.kind;
        let header_len = kind.header_len();
        if bytes[2] as usize != header_len {
            return Err(FrameError::HeaderLength);
        }
        if bytes.len() < header_len + TRAILER_LEN {
            return Err(FrameError::Truncated);
        }

        let trailer = bytes.len() - TRAILER_LEN;
        let data = &bytes[header_len..trailer];
        let data_len = bytes[3];
        if packet_type.outcome == Outcome::Request && data_len as usize != data.len() {
            return Err(FrameError::DataLength);
        }
        let payload = Vec::from_slice(data).map_err(|_| FrameError::TooLong)?;

        Ok(Frame {
            packet_type,
            flags: bytes[1],
            data_len,
            header: Header::read(kind, &bytes[4..header_len]),
            payload,
            network_id: u16::from_le_bytes([bytes[trailer], bytes[trailer + 1]]),
            payload_crc: u16::from_le_bytes([bytes[trailer + 2], bytes[trailer + 3]]),
        })
    }
}
