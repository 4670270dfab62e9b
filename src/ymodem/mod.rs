//! YModem file upload over a serial port

pub mod sender;

pub use sender::{send_file, YModemError};
