//! Sending side of a segmented transfer
//!
//! One attempt runs Start, Open, the segment loop and Close. Each frame is
//! sent up to `send_attempts` times. An attempt that cannot get a frame
//! acknowledged, or that the receiver refuses, costs one unit of the retry
//! budget and the transfer starts over from segment 0. The exception is a
//! receiver that answers Start with a seek, in which case sending resumes
//! at the segment it asked for.

use crate::config::protocol::{MAX_NAME_LEN, MAX_PAYLOAD};
use crate::config::{ConfigError, TransferConfig};
use crate::protocol::crc::{CrcMode, RunningCrc};
use crate::protocol::frame::{Frame, FrameError, Header};
use crate::protocol::packet::{Outcome, PacketKind, PacketType};
use crate::radio::Transceiver;
use crate::reliable::{AckStatus, Link, LinkError};
use crate::time::Clock;
use crate::transfer::events::{
    AbortReason, FailureCause, Flow, TransferEvent, TransferObserver, TransferReport, TransferStats,
};
use crate::transfer::io::Source;
use crate::transfer::segment::SegmentPlan;
use log::{debug, info, warn};

/// Sender state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Starting,
    Open,
    Transferring,
    Closing,
    Complete,
    Failed,
}

/// Progress of one outgoing transfer
#[derive(Debug, Clone)]
pub struct SenderSession {
    plan: SegmentPlan,
    source_crc: u16,
    state: SenderState,
    cursor: u16,
    retry_budget: u8,
    no_ack_streak: u16,
    no_ack_limit: u16,
    attempt: u8,
    send_attempts: u8,
    /// NACKs in a row that did not move the cursor forward
    stalled_seeks: u8,
    /// This attempt picked up where the receiver left off
    resumed: bool,
    resume_allowed: bool,
    stats: TransferStats,
}

impl SenderSession {
    pub fn new(plan: SegmentPlan, source_crc: u16, config: &TransferConfig) -> Self {
        Self {
            plan,
            source_crc,
            state: SenderState::Idle,
            cursor: 0,
            retry_budget: config.start_attempts,
            no_ack_streak: 0,
            no_ack_limit: config.no_ack_count_limit,
            attempt: 0,
            send_attempts: config.send_attempts,
            stalled_seeks: 0,
            resumed: false,
            resume_allowed: true,
            stats: TransferStats::default(),
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    pub fn retry_budget(&self) -> u8 {
        self.retry_budget
    }

    pub fn no_ack_streak(&self) -> u16 {
        self.no_ack_streak
    }

    pub fn attempt(&self) -> u8 {
        self.attempt
    }

    pub fn plan(&self) -> &SegmentPlan {
        &self.plan
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Start a fresh attempt from segment 0
    ///
    /// Returns false, leaving the session Failed, once the budget is spent.
    pub fn begin_attempt(&mut self) -> bool {
        if self.retry_budget == 0 {
            self.state = SenderState::Failed;
            return false;
        }
        self.attempt = self.attempt.wrapping_add(1);
        self.cursor = 0;
        self.no_ack_streak = 0;
        self.stalled_seeks = 0;
        self.resumed = false;
        self.state = SenderState::Starting;
        true
    }

    /// Give up on the current attempt
    ///
    /// A resumed attempt that the receiver refused means its partial copy
    /// does not belong to this data, so later attempts open afresh.
    pub fn fail_attempt(&mut self, cause: FailureCause) -> SenderState {
        if self.resumed
            && matches!(
                cause,
                FailureCause::Nack(_) | FailureCause::UnexpectedReply(_) | FailureCause::BadSeek
            )
        {
            self.resume_allowed = false;
        }
        self.retry_budget = self.retry_budget.saturating_sub(1);
        self.stats.restarts += 1;
        self.state = if self.retry_budget == 0 {
            SenderState::Failed
        } else {
            SenderState::Idle
        };
        self.state
    }

    /// Note a send that got no answer
    ///
    /// Returns false once the streak passes the ceiling.
    pub fn record_no_ack(&mut self) -> bool {
        self.stats.no_acks += 1;
        self.no_ack_streak = self.no_ack_streak.saturating_add(1);
        self.no_ack_streak <= self.no_ack_limit
    }

    pub fn record_reply(&mut self, outcome: Outcome) {
        self.no_ack_streak = 0;
        match outcome {
            Outcome::Nack => self.stats.nacks += 1,
            _ => self.stats.acks += 1,
        }
    }

    pub fn start_acked(&mut self) {
        self.state = SenderState::Open;
    }

    /// Receiver confirmed the open; segments start at 0
    pub fn opened(&mut self) {
        self.set_cursor(0);
    }

    /// Receiver offered a resume point in answer to Start
    ///
    /// Returns the segment to resume at, or `None` if the offer does not fit
    /// this transfer.
    pub fn resume(&mut self, offset: u32, segment_size: u8) -> Option<u16> {
        if segment_size != self.plan.segment_size() {
            return None;
        }
        let segment = self.plan.segment_at_offset(offset)?;
        self.stats.seeks += 1;
        self.resumed = true;
        self.set_cursor(segment);
        Some(segment)
    }

    pub fn segment_acked(&mut self) {
        self.stalled_seeks = 0;
        self.set_cursor(self.cursor + 1);
    }

    /// Move the cursor to the segment the receiver expects
    ///
    /// A NACK that does not move the cursor forward counts as one send of
    /// the current segment; `send_attempts` of them in a row fail the attempt.
    pub fn seek(&mut self, segment: u16) -> Result<(), FailureCause> {
        if segment > self.plan.segment_count() {
            return Err(FailureCause::BadSeek);
        }
        if segment <= self.cursor {
            self.stalled_seeks = self.stalled_seeks.saturating_add(1);
            if self.stalled_seeks >= self.send_attempts {
                return Err(FailureCause::Nack(PacketType::nack(PacketKind::SegmentWrite)));
            }
        }
        self.stats.seeks += 1;
        self.set_cursor(segment);
        Ok(())
    }

    /// Compare the receiver's totals at close with ours
    pub fn verify_close(&mut self, length: u32, crc: u16) -> bool {
        if length == self.plan.total_length() && crc == self.source_crc {
            self.state = SenderState::Complete;
            true
        } else {
            // Resuming would only close onto the same bad data
            self.resume_allowed = false;
            false
        }
    }

    fn set_cursor(&mut self, segment: u16) {
        self.cursor = segment;
        self.state = if segment >= self.plan.segment_count() {
            SenderState::Closing
        } else {
            SenderState::Transferring
        };
    }
}

/// Why an attempt stopped early
enum Interrupt {
    Restart(FailureCause),
    Abort(AbortReason),
}

impl From<LinkError> for Interrupt {
    fn from(error: LinkError) -> Self {
        Interrupt::Abort(error.into())
    }
}

impl From<FrameError> for Interrupt {
    fn from(error: FrameError) -> Self {
        Interrupt::Abort(error.into())
    }
}

fn refused(packet_type: PacketType) -> Interrupt {
    if packet_type.outcome == Outcome::Nack {
        Interrupt::Restart(FailureCause::Nack(packet_type))
    } else {
        Interrupt::Restart(FailureCause::UnexpectedReply(packet_type))
    }
}

struct Sender<'a, R: Transceiver, C: Clock, S: Source, O: TransferObserver> {
    link: &'a mut Link<R, C>,
    source: &'a mut S,
    name: &'a [u8],
    config: &'a TransferConfig,
    observer: &'a mut O,
    session: SenderSession,
}

impl<R: Transceiver, C: Clock, S: Source, O: TransferObserver> Sender<'_, R, C, S, O> {
    fn notify(&mut self, event: TransferEvent) -> Result<(), Interrupt> {
        match self.observer.on_event(&event) {
            Flow::Continue => Ok(()),
            Flow::Abort => Err(Interrupt::Abort(AbortReason::Cancelled)),
        }
    }

    /// Send a frame until something answers it
    async fn exchange(&mut self, mut frame: Frame, ack_timeout_ms: u32) -> Result<Frame, Interrupt> {
        let kind = frame.packet_type.kind;

        for attempt in 1..=self.config.send_attempts {
            if attempt > 1 {
                self.session.stats.retransmissions += 1;
                self.notify(TransferEvent::Retry {
                    packet_type: frame.packet_type,
                    attempt,
                })?;
            }

            self.session.stats.frames_sent += 1;
            let status = self
                .link
                .transmit_reliable_auto_ack(&mut frame, ack_timeout_ms, self.config.tx_timeout_ms)
                .await?;

            match status {
                AckStatus::Acked(reply) | AckStatus::NotAcked(reply) => {
                    self.session.record_reply(reply.packet_type.outcome);
                    return Ok(reply);
                }
                AckStatus::Timeout => {
                    if !self.session.record_no_ack() {
                        warn!("Missed ACK limit reached");
                        return Err(Interrupt::Restart(FailureCause::NoAckLimit));
                    }
                }
            }
        }

        Err(Interrupt::Restart(FailureCause::NoAck(kind)))
    }

    async fn run_attempt(&mut self) -> Result<(), Interrupt> {
        let attempt = self.session.attempt();
        info!("Transfer attempt {}", attempt);
        self.notify(TransferEvent::AttemptStarted { attempt })?;

        self.start().await?;
        self.link.delay_ms(self.config.function_delay_ms).await;

        if self.session.state() == SenderState::Open {
            self.open().await?;
            self.link.delay_ms(self.config.function_delay_ms).await;
        }

        self.send_segments().await?;
        self.link.delay_ms(self.config.function_delay_ms).await;

        self.close().await
    }

    async fn start(&mut self) -> Result<(), Interrupt> {
        let frame = Frame::control(PacketKind::Start, self.session.attempt() as u16, self.name)?;
        let reply = self.exchange(frame, self.config.ack_open_timeout_ms).await?;

        match (reply.packet_type, reply.header) {
            (t, _) if t == PacketType::ack(PacketKind::Start) => {
                self.session.start_acked();
                Ok(())
            }
            (t, Header::Seek { offset, segment_size }) if t == PacketType::ack(PacketKind::DataSeek) => {
                if !self.session.resume_allowed {
                    debug!("Ignoring resume offer at {}", offset);
                    self.session.start_acked();
                    return Ok(());
                }
                let segment = self
                    .session
                    .resume(offset, segment_size)
                    .ok_or(Interrupt::Restart(FailureCause::BadSeek))?;
                info!("Receiver holds {} segments, resuming", segment);
                self.notify(TransferEvent::Resumed { segment })
            }
            (t, _) => Err(refused(t)),
        }
    }

    async fn open(&mut self) -> Result<(), Interrupt> {
        let plan = *self.session.plan();
        let frame = Frame::file_open(
            self.name,
            plan.total_length(),
            self.session.source_crc,
            plan.segment_size(),
        )?;
        let reply = self.exchange(frame, self.config.ack_open_timeout_ms).await?;

        if reply.packet_type != PacketType::ack(PacketKind::FileOpen) {
            return Err(refused(reply.packet_type));
        }
        self.session.opened();
        info!(
            "Opened transfer of {} bytes in {} segments",
            plan.total_length(),
            plan.segment_count()
        );
        self.notify(TransferEvent::Opened {
            length: plan.total_length(),
            segments: plan.segment_count(),
        })
    }

    async fn send_segments(&mut self) -> Result<(), Interrupt> {
        let plan = *self.session.plan();
        let mut buf = [0u8; MAX_PAYLOAD];

        while self.session.state() == SenderState::Transferring {
            let segment = self.session.cursor();
            let Some(range) = plan.segment_range(segment) else {
                break;
            };
            let data = &mut buf[..(range.end - range.start) as usize];
            self.source
                .read_exact(range.start, data)
                .map_err(|e| Interrupt::Abort(AbortReason::Source(e)))?;

            let frame = Frame::segment(segment, data)?;
            let reply = self.exchange(frame, self.config.ack_segment_timeout_ms).await?;
            let t = reply.packet_type;

            match reply.header {
                // The link only passes an ACK that names this segment
                Header::Segment { .. } if t == PacketType::ack(PacketKind::SegmentWrite) => {
                    self.session.segment_acked();
                    debug!("Segment {} of {} acknowledged", segment, plan.segment_count());
                    self.notify(TransferEvent::SegmentAcked {
                        segment,
                        of: plan.segment_count(),
                    })?;
                }
                Header::Segment { segment: expected } if t == PacketType::nack(PacketKind::SegmentWrite) => {
                    self.session.seek(expected).map_err(Interrupt::Restart)?;
                    warn!("Receiver expects segment {}, not {}", expected, segment);
                    self.notify(TransferEvent::Seek { segment: expected })?;
                }
                _ => return Err(refused(t)),
            }

            if self.session.state() == SenderState::Transferring {
                self.link.delay_ms(self.config.packet_delay_ms).await;
            }
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<(), Interrupt> {
        let plan = *self.session.plan();
        let frame = Frame::file_close(plan.total_length(), self.session.source_crc, plan.segment_size())?;
        let reply = self.exchange(frame, self.config.ack_close_timeout_ms).await?;

        match reply.header {
            Header::Transfer { length, crc, .. } if reply.packet_type == PacketType::ack(PacketKind::FileClose) => {
                if !self.session.verify_close(length, crc) {
                    warn!("Receiver holds {} bytes crc 0x{:04X}", length, crc);
                    return Err(Interrupt::Restart(FailureCause::CloseMismatch { length, crc }));
                }
                info!("Transfer complete, {} bytes crc 0x{:04X}", length, crc);
                self.notify(TransferEvent::Closed { length, crc })
            }
            _ => Err(refused(reply.packet_type)),
        }
    }
}

/// CRC over the whole source, as announced in FileOpen and checked at close
pub fn source_crc<S: Source>(source: &mut S, mode: CrcMode) -> Result<u16, AbortReason> {
    let mut crc = RunningCrc::new(mode);
    let mut buf = [0u8; 64];
    let total = source.size();
    let mut offset = 0u32;

    while offset < total {
        let len = buf.len().min((total - offset) as usize);
        source
            .read_exact(offset, &mut buf[..len])
            .map_err(AbortReason::Source)?;
        crc.update(&buf[..len]);
        offset += len as u32;
    }

    Ok(crc.value())
}

/// Send `source` to the peer as `name`
///
/// Runs attempts until one completes or the retry budget is spent. A
/// transceiver fault, a source read error, or the observer returning
/// [`Flow::Abort`] ends the transfer immediately.
pub async fn transfer_out<R, C, S, O>(
    link: &mut Link<R, C>,
    source: &mut S,
    name: &[u8],
    config: &TransferConfig,
    observer: &mut O,
) -> Result<TransferReport, AbortReason>
where
    R: Transceiver,
    C: Clock,
    S: Source,
    O: TransferObserver,
{
    config.validate()?;
    if name.len() > MAX_NAME_LEN {
        return Err(AbortReason::InvalidConfig(ConfigError::NameLength));
    }

    let plan = SegmentPlan::new(source.size(), config.segment_size)?;
    let crc = source_crc(source, link.crc_mode())?;
    let mut sender = Sender {
        link,
        source,
        name,
        config,
        observer,
        session: SenderSession::new(plan, crc, config),
    };

    while sender.session.begin_attempt() {
        match sender.run_attempt().await {
            Ok(()) => {
                return Ok(TransferReport {
                    bytes: plan.total_length(),
                    crc,
                    stats: sender.session.stats(),
                });
            }
            Err(Interrupt::Abort(reason)) => {
                warn!("Transfer aborted: {}", reason);
                return Err(reason);
            }
            Err(Interrupt::Restart(cause)) => {
                warn!("Attempt {} failed: {:?}", sender.session.attempt(), cause);
                if sender.session.fail_attempt(cause) == SenderState::Failed {
                    return Err(AbortReason::RetryBudgetExhausted(cause));
                }
                if let Err(Interrupt::Abort(reason)) = sender.notify(TransferEvent::Restart { cause }) {
                    return Err(reason);
                }
                sender.link.delay_ms(config.function_delay_ms).await;
            }
        }
    }

    // Only reachable with a zero budget, which validate() rejects
    Err(AbortReason::InvalidConfig(ConfigError::Attempts))
}

/// Send a Wake and wait for WakeACK
pub async fn send_wake<R: Transceiver, C: Clock>(
    link: &mut Link<R, C>,
    sequence: u16,
    config: &TransferConfig,
) -> Result<(), AbortReason> {
    let frame = Frame::control(PacketKind::Wake, sequence, &[])?;
    control_exchange(link, frame, config).await
}

/// Send status flags in an Info frame and wait for InfoACK
pub async fn send_info<R: Transceiver, C: Clock>(
    link: &mut Link<R, C>,
    sequence: u16,
    flags: u8,
    config: &TransferConfig,
) -> Result<(), AbortReason> {
    let frame = Frame::control(PacketKind::Info, sequence, &[])?.with_flags(flags);
    control_exchange(link, frame, config).await
}

async fn control_exchange<R: Transceiver, C: Clock>(
    link: &mut Link<R, C>,
    mut frame: Frame,
    config: &TransferConfig,
) -> Result<(), AbortReason> {
    let expected = PacketType::ack(frame.packet_type.kind);

    for attempt in 1..=config.send_attempts {
        let status = link
            .transmit_reliable_auto_ack(&mut frame, config.ack_segment_timeout_ms, config.tx_timeout_ms)
            .await?;
        match status {
            AckStatus::Acked(reply) if reply.packet_type == expected => return Ok(()),
            AckStatus::Acked(reply) | AckStatus::NotAcked(reply) => {
                warn!("{} answered with {}", frame.packet_type, reply.packet_type);
                return Err(AbortReason::Refused(reply.packet_type));
            }
            AckStatus::Timeout => {
                debug!("{} attempt {} not acknowledged", frame.packet_type, attempt);
                link.delay_ms(config.packet_delay_ms).await;
            }
        }
    }

    Err(AbortReason::RetryBudgetExhausted(FailureCause::NoAck(
        frame.packet_type.kind,
    )))
}
