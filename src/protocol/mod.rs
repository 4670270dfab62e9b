pub mod crc;
pub mod frame;
pub mod packet;

pub use crc::{crc16_ccitt, crc16_ccitt_direct, crc16_xmodem, CrcMode, RunningCrc};
pub use frame::{Frame, FrameBuf, FrameError, Header};
pub use packet::{flags, Outcome, PacketKind, PacketType};
