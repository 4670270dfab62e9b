//! Receiving side of a segmented transfer
//!
//! [`ReceiverSession`] is a plain state machine: it takes one validated frame
//! and returns the reply to send. [`transfer_in`] drives it from a [`Link`],
//! adding the reply delays and the inactivity timeout.
//!
//! Segments are applied strictly in order. A segment below the cursor is
//! acknowledged again without touching the sink. A segment above it gets a
//! NACK naming the segment the receiver wants.

use crate::config::protocol::MAX_NAME_LEN;
use crate::config::TransferConfig;
use crate::protocol::crc::{CrcMode, RunningCrc};
use crate::protocol::frame::{Frame, Header};
use crate::protocol::packet::{Outcome, PacketKind, PacketType};
use crate::radio::Transceiver;
use crate::reliable::{Link, ReceiveStatus};
use crate::time::{Clock, Deadline};
use crate::transfer::events::{AbortReason, Flow, TransferEvent, TransferObserver, TransferReport, TransferStats};
use crate::transfer::io::{IoError, Sink};
use crate::transfer::segment::SegmentPlan;
use heapless::Vec;
use log::{debug, info, warn};

/// Receiver state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    /// Start acknowledged, waiting for the open
    Starting,
    /// Open acknowledged, no segment applied yet
    Open,
    Transferring,
    Complete,
}

/// What handling a frame amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Start, open, close or another control exchange
    Control,
    /// Segment written to the sink
    Applied(u16),
    /// Already applied; acknowledged again
    Duplicate,
    /// Answered with a NACK
    Refused,
    /// Not a request; no reply
    Ignored,
    /// Sink failed; the session was dropped
    Failed(IoError),
}

/// Result of [`ReceiverSession::handle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub reply: Option<Frame>,
    pub disposition: Disposition,
    pub event: Option<TransferEvent>,
}

impl Handled {
    fn reply(reply: Frame, disposition: Disposition) -> Self {
        Self {
            reply: Some(reply),
            disposition,
            event: None,
        }
    }

    fn with_event(mut self, event: TransferEvent) -> Self {
        self.event = Some(event);
        self
    }
}

/// Incoming transfer state
pub struct ReceiverSession<S: Sink> {
    sink: S,
    crc_mode: CrcMode,
    state: ReceiverState,
    name: Vec<u8, MAX_NAME_LEN>,
    plan: Option<SegmentPlan>,
    announced_crc: u16,
    cursor: u16,
    crc: RunningCrc,
    received: u32,
    closed: Option<(u32, u16)>,
    peer_flags: u8,
    duplicates: u32,
}

impl<S: Sink> ReceiverSession<S> {
    pub fn new(sink: S, crc_mode: CrcMode) -> Self {
        Self {
            sink,
            crc_mode,
            state: ReceiverState::Idle,
            name: Vec::new(),
            plan: None,
            announced_crc: 0,
            cursor: 0,
            crc: RunningCrc::new(crc_mode),
            received: 0,
            closed: None,
            peer_flags: 0,
            duplicates: 0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Next segment expected
    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    /// Bytes applied to the sink
    pub fn received(&self) -> u32 {
        self.received
    }

    /// CRC of the bytes applied so far
    pub fn crc(&self) -> u16 {
        self.crc.value()
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn peer_flags(&self) -> u8 {
        self.peer_flags
    }

    pub fn duplicates(&self) -> u32 {
        self.duplicates
    }

    pub fn is_complete(&self) -> bool {
        self.state == ReceiverState::Complete
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn is_receiving(&self) -> bool {
        matches!(self.state, ReceiverState::Open | ReceiverState::Transferring)
    }

    fn reset(&mut self) {
        self.state = ReceiverState::Idle;
        self.name.clear();
        self.plan = None;
        self.announced_crc = 0;
        self.cursor = 0;
        self.crc = RunningCrc::new(self.crc_mode);
        self.received = 0;
        self.closed = None;
    }

    /// Act on one validated frame and produce the reply
    pub fn handle(&mut self, frame: &Frame) -> Handled {
        if frame.packet_type.outcome != Outcome::Request {
            return Handled {
                reply: None,
                disposition: Disposition::Ignored,
                event: None,
            };
        }

        match frame.packet_type.kind {
            PacketKind::Start => self.on_start(frame),
            PacketKind::FileOpen => self.on_open(frame),
            PacketKind::SegmentWrite => self.on_segment(frame),
            PacketKind::FileClose => self.on_close(frame),
            PacketKind::DataSeek => self.on_seek(frame),
            PacketKind::Wake => Handled::reply(frame.reply(Outcome::Ack), Disposition::Control).with_event(TransferEvent::Woken),
            PacketKind::Info => {
                self.peer_flags = frame.flags;
                Handled::reply(frame.reply(Outcome::Ack), Disposition::Control)
                    .with_event(TransferEvent::PeerInfo { flags: frame.flags })
            }
        }
    }

    /// Resume offer at the current cursor
    fn seek_reply(&self, frame: &Frame, plan: &SegmentPlan) -> Frame {
        frame.reply_as(
            PacketType::ack(PacketKind::DataSeek),
            Header::Seek {
                offset: plan.offset(self.cursor),
                segment_size: plan.segment_size(),
            },
        )
    }

    fn on_start(&mut self, frame: &Frame) -> Handled {
        if let Some(plan) = self.plan {
            if self.is_receiving() && self.cursor > 0 && frame.payload.as_slice() == self.name.as_slice() {
                info!("Start for partial transfer, offering segment {}", self.cursor);
                return Handled::reply(self.seek_reply(frame, &plan), Disposition::Control)
                    .with_event(TransferEvent::Resumed { segment: self.cursor });
            }
        }

        self.reset();
        self.state = ReceiverState::Starting;
        Handled::reply(frame.reply(Outcome::Ack), Disposition::Control)
    }

    fn on_open(&mut self, frame: &Frame) -> Handled {
        let Header::Transfer {
            length,
            crc,
            segment_size,
        } = frame.header
        else {
            return Handled::reply(frame.reply(Outcome::Nack), Disposition::Refused);
        };
        let (Ok(plan), Ok(name)) = (
            SegmentPlan::new(length, segment_size),
            Vec::<u8, MAX_NAME_LEN>::from_slice(&frame.payload),
        ) else {
            warn!("Refusing open of {} bytes in {} byte segments", length, segment_size);
            return Handled::reply(frame.reply(Outcome::Nack), Disposition::Refused);
        };

        if self.state == ReceiverState::Open
            && self.plan == Some(plan)
            && self.announced_crc == crc
            && self.name == name
        {
            return Handled::reply(frame.reply(Outcome::Ack), Disposition::Duplicate);
        }

        self.reset();
        if let Err(e) = self.sink.begin(&name, length) {
            warn!("Sink refused transfer: {}", e);
            return Handled::reply(frame.reply(Outcome::Nack), Disposition::Refused);
        }

        self.name = name;
        self.plan = Some(plan);
        self.announced_crc = crc;
        self.state = if plan.segment_count() == 0 {
            ReceiverState::Transferring
        } else {
            ReceiverState::Open
        };
        info!("Opened transfer of {} bytes", length);
        Handled::reply(frame.reply(Outcome::Ack), Disposition::Control).with_event(TransferEvent::Opened {
            length,
            segments: plan.segment_count(),
        })
    }

    fn on_segment(&mut self, frame: &Frame) -> Handled {
        let (Some(plan), true, Header::Segment { segment }) = (self.plan, self.is_receiving(), frame.header) else {
            // No session to write into; make the sender start over
            debug!("Segment with no open transfer");
            return Handled::reply(self.start_nack(frame), Disposition::Refused);
        };

        if segment < self.cursor {
            self.duplicates += 1;
            debug!("Duplicate segment {}", segment);
            return Handled::reply(frame.reply(Outcome::Ack), Disposition::Duplicate)
                .with_event(TransferEvent::Duplicate { segment });
        }

        if segment > self.cursor || plan.segment_len(segment).map(usize::from) != Some(frame.payload.len()) {
            warn!("Got segment {}, expecting {}", segment, self.cursor);
            let nack = frame.reply_as(
                PacketType::nack(PacketKind::SegmentWrite),
                Header::Segment { segment: self.cursor },
            );
            return Handled::reply(nack, Disposition::Refused);
        }

        match self.sink.write(plan.offset(segment), &frame.payload) {
            Ok(written) if written == frame.payload.len() => {}
            Ok(_) => return self.sink_failed(frame, IoError::Full),
            Err(e) => return self.sink_failed(frame, e),
        }

        self.crc.update(&frame.payload);
        self.received += frame.payload.len() as u32;
        self.cursor += 1;
        self.state = ReceiverState::Transferring;
        Handled::reply(frame.reply(Outcome::Ack), Disposition::Applied(segment)).with_event(
            TransferEvent::SegmentReceived {
                segment,
                of: plan.segment_count(),
            },
        )
    }

    fn on_close(&mut self, frame: &Frame) -> Handled {
        let segment_size = match frame.header {
            Header::Transfer { segment_size, .. } => segment_size,
            _ => 0,
        };
        let close_ack = |length: u32, crc: u16| {
            frame.reply_as(
                PacketType::ack(PacketKind::FileClose),
                Header::Transfer {
                    length,
                    crc,
                    segment_size,
                },
            )
        };

        if let (ReceiverState::Complete, Some((length, crc))) = (self.state, self.closed) {
            return Handled::reply(close_ack(length, crc), Disposition::Duplicate);
        }

        let complete = self
            .plan
            .is_some_and(|plan| self.is_receiving() && self.cursor == plan.segment_count());
        if !complete {
            warn!("Close before all segments arrived");
            return Handled::reply(frame.reply(Outcome::Nack), Disposition::Refused);
        }

        if let Err(e) = self.sink.finish() {
            warn!("Sink failed to finish: {}", e);
            self.reset();
            return Handled {
                reply: Some(frame.reply(Outcome::Nack)),
                disposition: Disposition::Failed(e),
                event: None,
            };
        }

        let crc = self.crc.value();
        self.closed = Some((self.received, crc));
        self.state = ReceiverState::Complete;
        info!("Transfer complete, {} bytes crc 0x{:04X}", self.received, crc);
        if crc != self.announced_crc {
            warn!("Sender announced crc 0x{:04X}", self.announced_crc);
        }
        Handled::reply(close_ack(self.received, crc), Disposition::Control).with_event(TransferEvent::Closed {
            length: self.received,
            crc,
        })
    }

    fn on_seek(&mut self, frame: &Frame) -> Handled {
        match self.plan {
            Some(plan) if self.is_receiving() => Handled::reply(self.seek_reply(frame, &plan), Disposition::Control),
            _ => Handled::reply(frame.reply(Outcome::Nack), Disposition::Refused),
        }
    }

    fn start_nack(&self, frame: &Frame) -> Frame {
        let sequence = frame.sequence().unwrap_or(0);
        frame.reply_as(PacketType::nack(PacketKind::Start), Header::Control { sequence })
    }

    fn sink_failed(&mut self, frame: &Frame, error: IoError) -> Handled {
        warn!("Sink write failed: {}", error);
        self.reset();
        Handled {
            reply: Some(self.start_nack(frame)),
            disposition: Disposition::Failed(error),
            event: None,
        }
    }
}

/// Receive one transfer into `sink`
///
/// Returns once a transfer has been closed and verified, after lingering
/// `close_linger_ms` to answer a repeated close. Gives up when nothing valid
/// arrives for `receive_timeout_ms`.
pub async fn transfer_in<R, C, S, O>(
    link: &mut Link<R, C>,
    sink: &mut S,
    config: &TransferConfig,
    observer: &mut O,
) -> Result<TransferReport, AbortReason>
where
    R: Transceiver,
    C: Clock,
    S: Sink,
    O: TransferObserver,
{
    config.validate()?;

    let mut session = ReceiverSession::new(sink, link.crc_mode());
    let mut stats = TransferStats::default();
    let mut window = Deadline::after(link.clock(), config.receive_timeout_ms);

    loop {
        let remaining = window.remaining(link.now_ms());
        if remaining == 0 {
            if session.is_complete() {
                break;
            }
            warn!("Nothing received for {} ms", config.receive_timeout_ms);
            return Err(AbortReason::Timeout);
        }

        let frame = match link.receive_reliable(remaining).await? {
            ReceiveStatus::Received(frame) => frame,
            ReceiveStatus::Timeout => continue,
        };

        let was_complete = session.is_complete();
        if was_complete && frame.packet_type.kind != PacketKind::FileClose {
            debug!("Ignoring {} after completion", frame.packet_type);
            continue;
        }

        let handled = session.handle(&frame);
        let delay = match handled.disposition {
            Disposition::Ignored => continue,
            Disposition::Control => config.ack_delay_start_end_ms,
            Disposition::Applied(_) | Disposition::Refused => config.ack_delay_ms,
            Disposition::Duplicate => config.ack_delay_ms + config.duplicate_delay_ms,
            Disposition::Failed(_) => 0,
        };

        if let Some(reply) = handled.reply {
            match reply.packet_type.outcome {
                Outcome::Nack => stats.nacks += 1,
                _ => stats.acks += 1,
            }
            if reply.packet_type == PacketType::ack(PacketKind::DataSeek) {
                stats.seeks += 1;
            }
            stats.frames_sent += 1;
            link.send_reply(reply, delay, config.tx_timeout_ms).await?;
        }

        if let Disposition::Failed(e) = handled.disposition {
            return Err(AbortReason::Sink(e));
        }

        if let Some(event) = handled.event {
            if observer.on_event(&event) == Flow::Abort {
                return Err(AbortReason::Cancelled);
            }
        }

        let timeout = if session.is_complete() {
            if config.close_linger_ms == 0 {
                break;
            }
            config.close_linger_ms
        } else {
            config.receive_timeout_ms
        };
        window = Deadline::after(link.clock(), timeout);
    }

    stats.duplicates = session.duplicates();
    Ok(TransferReport {
        bytes: session.received(),
        crc: session.crc(),
        stats,
    })
}
