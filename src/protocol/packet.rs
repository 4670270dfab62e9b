//! Packet types and flag bits
//!
//! Packet type bytes are allocated in groups of four:
//!
//! | Base | Kind         | ACK  | NACK | Header |
//! |------|--------------|------|------|--------|
//! | 0xA0 | SegmentWrite | 0xA1 | 0xA2 | 6      |
//! | 0xA4 | FileOpen     | 0xA5 | 0xA6 | 12     |
//! | 0xA8 | FileClose    | 0xA9 | 0xAA | 12     |
//! | 0xAC | DataSeek     | 0xAD | 0xAE | 9      |
//! | 0xB0 | Start        | 0xB1 | 0xB2 | 6      |
//! | 0xB4 | Wake         | 0xB5 | 0xB6 | 6      |
//! | 0xB8 | Info         | 0xB9 | 0xBA | 8      |
//!
//! The fourth code of each group is reserved. ArrayStart and ArrayEnd reuse the
//! FileOpen and FileClose codes; [`flags::SEND_ARRAY`] marks an in-memory transfer.

/// What a frame is about
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// One segment of transfer data (0xA0)
    SegmentWrite = 0xA0,

    /// Open a transfer: name, total length, whole-payload CRC, segment size (0xA4)
    FileOpen = 0xA4,

    /// Close a transfer; the ACK reports what the receiver holds (0xA8)
    FileClose = 0xA8,

    /// Resume point negotiation (0xAC)
    DataSeek = 0xAC,

    /// Begin a transfer attempt (0xB0)
    Start = 0xB0,

    /// Wake a sleeping peer (0xB4)
    Wake = 0xB4,

    /// Status flags only (0xB8)
    Info = 0xB8,
}

impl PacketKind {
    /// Try to convert a group base byte to a kind
    pub fn from_base(byte: u8) -> Option<Self> {
        match byte {
            0xA0 => Some(Self::SegmentWrite),
            0xA4 => Some(Self::FileOpen),
            0xA8 => Some(Self::FileClose),
            0xAC => Some(Self::DataSeek),
            0xB0 => Some(Self::Start),
            0xB4 => Some(Self::Wake),
            0xB8 => Some(Self::Info),
            _ => None,
        }
    }

    /// Fixed header length for this kind, including the four common bytes
    pub fn header_len(self) -> usize {
        match self {
            Self::SegmentWrite | Self::Start | Self::Wake => 6,
            Self::Info => 8,
            Self::DataSeek => 9,
            Self::FileOpen | Self::FileClose => 12,
        }
    }
}

/// Position within a packet type group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Request = 0,
    Ack = 1,
    Nack = 2,
}

/// Packet type as a kind plus an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketType {
    pub kind: PacketKind,
    pub outcome: Outcome,
}

impl PacketType {
    pub const fn new(kind: PacketKind, outcome: Outcome) -> Self {
        Self { kind, outcome }
    }

    pub const fn request(kind: PacketKind) -> Self {
        Self::new(kind, Outcome::Request)
    }

    pub const fn ack(kind: PacketKind) -> Self {
        Self::new(kind, Outcome::Ack)
    }

    pub const fn nack(kind: PacketKind) -> Self {
        Self::new(kind, Outcome::Nack)
    }

    /// Wire byte: group base plus the outcome offset
    pub fn to_byte(self) -> u8 {
        self.kind as u8 + self.outcome as u8
    }

    /// Decode a wire byte; the reserved slot and unknown groups give `None`
    pub fn from_byte(byte: u8) -> Option<Self> {
        let kind = PacketKind::from_base(byte & !0x03)?;
        let outcome = match byte & 0x03 {
            0 => Outcome::Request,
            1 => Outcome::Ack,
            2 => Outcome::Nack,
            _ => return None,
        };
        Some(Self { kind, outcome })
    }

    pub fn is_reply(self) -> bool {
        self.outcome != Outcome::Request
    }
}

impl core::fmt::Display for PacketType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let suffix = match self.outcome {
            Outcome::Request => "",
            Outcome::Ack => "ACK",
            Outcome::Nack => "NACK",
        };
        write!(f, "{:?}{} (0x{:02X})", self.kind, suffix, self.to_byte())
    }
}

/// Bits of the header flags byte
pub mod flags {
    /// Receiver should not persist the transfer
    pub const NO_FILE_SAVE: u8 = 1 << 0;
    /// Sender has nothing to transfer
    pub const NOTHING_TO_SEND: u8 = 1 << 1;
    /// Transfer comes from memory rather than a file
    pub const SEND_ARRAY: u8 = 1 << 2;
    /// Sender hit its missed-ACK ceiling
    pub const NO_ACK_LIMIT: u8 = 1 << 3;
    /// Sender failed to get a packet acknowledged
    pub const SEND_PACKET: u8 = 1 << 4;
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [PacketKind; 7] = [
        PacketKind::SegmentWrite,
        PacketKind::FileOpen,
        PacketKind::FileClose,
        PacketKind::DataSeek,
        PacketKind::Start,
        PacketKind::Wake,
        PacketKind::Info,
    ];

    #[test]
    fn test_ack_nack_offsets() {
        for kind in KINDS {
            let base = PacketType::request(kind).to_byte();
            assert_eq!(PacketType::ack(kind).to_byte(), base + 1);
            assert_eq!(PacketType::nack(kind).to_byte(), base + 2);
        }
    }

    #[test]
    fn test_known_wire_bytes() {
        assert_eq!(PacketType::request(PacketKind::SegmentWrite).to_byte(), 0xA0);
        assert_eq!(PacketType::ack(PacketKind::FileOpen).to_byte(), 0xA5);
        assert_eq!(PacketType::nack(PacketKind::FileClose).to_byte(), 0xAA);
        assert_eq!(PacketType::ack(PacketKind::DataSeek).to_byte(), 0xAD);
        assert_eq!(PacketType::nack(PacketKind::Start).to_byte(), 0xB2);
        assert_eq!(PacketType::ack(PacketKind::Info).to_byte(), 0xB9);
    }

    #[test]
    fn test_from_byte() {
        assert_eq!(
            PacketType::from_byte(0xA1),
            Some(PacketType::ack(PacketKind::SegmentWrite))
        );
        assert_eq!(
            PacketType::from_byte(0xB6),
            Some(PacketType::nack(PacketKind::Wake))
        );
        // Reserved slot
        assert_eq!(PacketType::from_byte(0xA3), None);
        // Outside every group
        assert_eq!(PacketType::from_byte(0x00), None);
        assert_eq!(PacketType::from_byte(0xBC), None);
    }

    #[test]
    fn test_header_lengths() {
        assert_eq!(PacketKind::SegmentWrite.header_len(), 6);
        assert_eq!(PacketKind::Info.header_len(), 8);
        assert_eq!(PacketKind::DataSeek.header_len(), 9);
        assert_eq!(PacketKind::FileClose.header_len(), 12);
    }
}
