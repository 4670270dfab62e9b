//! Segmented transfers over a reliable link
//!
//! [`transfer_out`] sends a [`Source`] as numbered segments and [`transfer_in`]
//! writes what arrives into a [`Sink`]. Both sides report progress through a
//! [`TransferObserver`].

pub mod events;
pub mod io;
pub mod receiver;
pub mod segment;
pub mod sender;

#[cfg(test)]
mod sim;

pub use events::{AbortReason, FailureCause, Flow, NoopObserver, TransferEvent, TransferObserver, TransferReport, TransferStats};
pub use io::{ArraySink, IoError, Sink, Source};
pub use receiver::{transfer_in, Disposition, Handled, ReceiverSession, ReceiverState};
pub use segment::{PlanError, SegmentPlan};
pub use sender::{send_info, send_wake, source_crc, transfer_out, SenderSession, SenderState};
