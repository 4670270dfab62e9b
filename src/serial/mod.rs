pub mod traits;
#[cfg(feature = "uart")]
pub mod uart;

pub use traits::{SerialError, SerialPort};
#[cfg(feature = "uart")]
pub use uart::IoPort;
