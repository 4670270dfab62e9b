//! Progress reporting, statistics and terminal outcomes

use crate::config::ConfigError;
use crate::protocol::frame::FrameError;
use crate::protocol::packet::{PacketKind, PacketType};
use crate::radio::RadioError;
use crate::reliable::LinkError;
use crate::transfer::io::IoError;
use crate::transfer::segment::PlanError;

/// Something observable happened during a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// Sender began a transfer attempt (1-based)
    AttemptStarted { attempt: u8 },
    /// Receiver already held a prefix; sending resumes at `segment`
    Resumed { segment: u16 },
    /// Transfer opened on both ends
    Opened { length: u32, segments: u16 },
    /// Sender got an ACK for a segment
    SegmentAcked { segment: u16, of: u16 },
    /// Receiver applied a segment
    SegmentReceived { segment: u16, of: u16 },
    /// Receiver saw a segment it already holds
    Duplicate { segment: u16 },
    /// A frame is being sent again
    Retry { packet_type: PacketType, attempt: u8 },
    /// Receiver asked for a different segment
    Seek { segment: u16 },
    /// Attempt abandoned; the transfer starts over
    Restart { cause: FailureCause },
    /// Transfer closed and verified
    Closed { length: u32, crc: u16 },
    /// Peer woke us
    Woken,
    /// Peer sent its status flags
    PeerInfo { flags: u8 },
}

/// Whether the transfer should carry on after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Abort,
}

/// Receives progress events
pub trait TransferObserver {
    fn on_event(&mut self, event: &TransferEvent) -> Flow;
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_event(&mut self, _event: &TransferEvent) -> Flow {
        Flow::Continue
    }
}

/// Why one transfer attempt was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// A frame went unacknowledged for every send attempt
    NoAck(PacketKind),
    /// Consecutive missed ACKs passed the configured ceiling
    NoAckLimit,
    /// Peer refused a frame
    Nack(PacketType),
    /// Peer answered with something that does not fit the exchange
    UnexpectedReply(PacketType),
    /// Peer offered a resume point outside the transfer
    BadSeek,
    /// Peer's length or CRC at close differs from ours
    CloseMismatch { length: u32, crc: u16 },
}

/// Why a transfer ended without completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Every attempt failed; carries the cause of the last one
    RetryBudgetExhausted(FailureCause),
    /// Receiver heard nothing valid for the whole receive window
    Timeout,
    /// Observer asked to stop
    Cancelled,
    /// Peer refused a control exchange
    Refused(PacketType),
    /// Transceiver fault
    Radio(RadioError),
    /// Outgoing frame could not be built
    Frame(FrameError),
    /// Reading the source failed
    Source(IoError),
    /// Writing the sink failed
    Sink(IoError),
    /// Configuration rejected
    InvalidConfig(ConfigError),
    /// Payload needs more segments than can be numbered
    TooLarge,
}

impl From<LinkError> for AbortReason {
    fn from(error: LinkError) -> Self {
        match error {
            LinkError::Radio(e) => AbortReason::Radio(e),
            LinkError::Frame(e) => AbortReason::Frame(e),
        }
    }
}

impl From<FrameError> for AbortReason {
    fn from(error: FrameError) -> Self {
        AbortReason::Frame(error)
    }
}

impl From<ConfigError> for AbortReason {
    fn from(error: ConfigError) -> Self {
        AbortReason::InvalidConfig(error)
    }
}

impl From<PlanError> for AbortReason {
    fn from(error: PlanError) -> Self {
        match error {
            PlanError::SegmentSize => AbortReason::InvalidConfig(ConfigError::SegmentSize),
            PlanError::TooLarge => AbortReason::TooLarge,
        }
    }
}

impl core::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AbortReason::RetryBudgetExhausted(cause) => {
                write!(f, "retry budget exhausted, last failure {:?}", cause)
            }
            AbortReason::Timeout => write!(f, "receive timeout"),
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::Refused(t) => write!(f, "refused with {}", t),
            AbortReason::Radio(e) => write!(f, "radio: {}", e),
            AbortReason::Frame(e) => write!(f, "frame: {}", e),
            AbortReason::Source(e) => write!(f, "source: {}", e),
            AbortReason::Sink(e) => write!(f, "sink: {}", e),
            AbortReason::InvalidConfig(e) => write!(f, "config: {}", e),
            AbortReason::TooLarge => write!(f, "payload too large"),
        }
    }
}

/// Counters for one transfer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    /// Frames transmitted, including repeats
    pub frames_sent: u32,
    /// Frames sent again after a missed ACK
    pub retransmissions: u32,
    pub acks: u32,
    pub nacks: u32,
    pub no_acks: u32,
    /// Attempts abandoned and started over
    pub restarts: u32,
    /// Cursor moves requested by the receiver
    pub seeks: u32,
    /// Segments received again after being applied
    pub duplicates: u32,
}

/// Final result of a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u32,
    pub crc: u16,
    pub stats: TransferStats,
}
