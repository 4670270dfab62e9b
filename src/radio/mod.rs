pub mod traits;

pub use traits::{RadioError, RxPacket, Transceiver};
