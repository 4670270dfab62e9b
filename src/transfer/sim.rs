//! Simulated peer for end-to-end transfer tests
//!
//! [`SimulatedPeer`] is a transceiver with a receiver behind it. Every frame
//! the sender transmits is validated and handed to a [`ReceiverSession`],
//! and the reply is queued for the sender's next receive. A [`LinkPolicy`]
//! can lose replies or corrupt frames on the way.

use crate::protocol::crc::CrcMode;
use crate::protocol::frame::Frame;
use crate::protocol::packet::{Outcome, PacketType};
use crate::radio::{RadioError, RxPacket, Transceiver};
use crate::time::mock::MockClock;
use crate::transfer::receiver::ReceiverSession;
use std::collections::VecDeque;
use std::vec::Vec;

/// Receiver sink size for simulated transfers
pub const SIM_CAPACITY: usize = 2048;

/// Faults applied between sender and receiver
#[derive(Debug, Default, Clone)]
pub struct LinkPolicy {
    /// Lose every nth ACK the receiver sends
    pub drop_every_nth_ack: Option<u32>,
    /// Flip the network id of every frame the sender transmits
    pub corrupt_network_id: bool,
    /// Go deaf once the receiver has applied this many segments
    pub deaf_after_segments: Option<u16>,
}

/// What crossed the simulated air, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    Sent(PacketType, Option<u16>),
    Delivered(PacketType, Option<u16>),
    Lost(PacketType, Option<u16>),
}

pub struct SimulatedPeer {
    session: ReceiverSession<heapless::Vec<u8, SIM_CAPACITY>>,
    network_id: u16,
    crc_mode: CrcMode,
    clock: MockClock,
    inbox: VecDeque<Vec<u8>>,
    acks_sent: u32,
    pub policy: LinkPolicy,
    pub log: Vec<SimEvent>,
}

impl SimulatedPeer {
    pub fn new(clock: MockClock, network_id: u16, crc_mode: CrcMode) -> Self {
        Self {
            session: ReceiverSession::new(heapless::Vec::new(), crc_mode),
            network_id,
            crc_mode,
            clock,
            inbox: VecDeque::new(),
            acks_sent: 0,
            policy: LinkPolicy::default(),
            log: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: LinkPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn session(&self) -> &ReceiverSession<heapless::Vec<u8, SIM_CAPACITY>> {
        &self.session
    }

    /// Bytes the receiver has written
    pub fn received(&self) -> &[u8] {
        self.session.sink()
    }

    /// Frames of `packet_type` the sender transmitted
    pub fn sent(&self, packet_type: PacketType) -> Vec<Option<u16>> {
        self.log
            .iter()
            .filter_map(|event| match event {
                SimEvent::Sent(t, seq) if *t == packet_type => Some(*seq),
                _ => None,
            })
            .collect()
    }

    fn is_deaf(&self) -> bool {
        self.policy
            .deaf_after_segments
            .is_some_and(|limit| self.session.cursor() >= limit)
    }

    fn deliver(&mut self, data: &[u8]) {
        let Ok(mut frame) = Frame::decode(data) else {
            return;
        };
        self.log.push(SimEvent::Sent(frame.packet_type, frame.sequence()));

        if self.is_deaf() {
            return;
        }
        if self.policy.corrupt_network_id {
            frame.network_id ^= 0xFFFF;
        }
        if frame.network_id != self.network_id || !self.crc_mode.verify(&frame.payload, frame.payload_crc) {
            return;
        }

        let Some(mut reply) = self.session.handle(&frame).reply else {
            return;
        };
        reply.network_id = self.network_id;
        let seq = reply.sequence();

        if reply.packet_type.outcome == Outcome::Ack {
            self.acks_sent += 1;
            if let Some(n) = self.policy.drop_every_nth_ack {
                if self.acks_sent % n == 0 {
                    self.log.push(SimEvent::Lost(reply.packet_type, seq));
                    return;
                }
            }
        }

        if let Ok(bytes) = reply.encode() {
            self.log.push(SimEvent::Delivered(reply.packet_type, seq));
            self.inbox.push_back(bytes.to_vec());
        }
    }
}

impl Transceiver for SimulatedPeer {
    async fn transmit(&mut self, data: &[u8], _timeout_ms: u32) -> Result<(), RadioError> {
        self.deliver(data);
        Ok(())
    }

    async fn receive(&mut self, timeout_ms: u32) -> Result<RxPacket, RadioError> {
        match self.inbox.pop_front() {
            Some(bytes) => Ok(RxPacket::from_slice(&bytes)),
            None => {
                self.clock.advance(timeout_ms);
                Err(RadioError::Timeout)
            }
        }
    }

    fn last_rssi(&self) -> i16 {
        -60
    }

    fn last_snr(&self) -> i8 {
        8
    }

    fn is_busy(&self) -> bool {
        false
    }
}
