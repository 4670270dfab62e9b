pub mod link;

pub use link::{AckStatus, Link, LinkError, LinkStats, ReceiveStatus, SendStatus};
