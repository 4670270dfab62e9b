//! CRC16 variants used on the link
//!
//! All three share polynomial 0x1021 and differ in initial value and in
//! whether 16 zero bits are shifted through the register after the data:
//!
//! | Function               | Init   | Zero flush | Catalogue name     |
//! |------------------------|--------|------------|--------------------|
//! | [`crc16_ccitt`]        | 0xFFFF | yes        | CRC-16/SPI-FUJITSU |
//! | [`crc16_ccitt_direct`] | 0xFFFF | no         | CRC-16/IBM-3740    |
//! | [`crc16_xmodem`]       | 0x0000 | yes        | CRC-16/XMODEM      |
//!
//! Flushing 16 zero bits through an augmented register is the same as running
//! the direct algorithm from the flushed initial value, which is why the
//! augmented CCITT CRC lines up with the SPI-FUJITSU entry (init 0x1D0F).

use crc::{Crc, Digest, CRC_16_IBM_3740, CRC_16_SPI_FUJITSU, CRC_16_XMODEM};

static AUGMENTED: Crc<u16> = Crc::<u16>::new(&CRC_16_SPI_FUJITSU);
static DIRECT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
static XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC-16/CCITT, init 0xFFFF, with the trailing 16 zero-bit flush
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    AUGMENTED.checksum(data)
}

/// CRC-16/CCITT, init 0xFFFF, no flush
///
/// This is what SX12XX-library nodes already in the field put in the frame trailer.
pub fn crc16_ccitt_direct(data: &[u8]) -> u16 {
    DIRECT.checksum(data)
}

/// CRC-16/XMODEM, used for YModem blocks
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}

/// Which CCITT variant frames carry in their trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcMode {
    /// Zero-flush variant ([`crc16_ccitt`])
    Augmented,
    /// Plain variant ([`crc16_ccitt_direct`]) for interop with deployed nodes
    Direct,
    /// Frames carry 0 and nothing is checked
    None,
}

impl CrcMode {
    pub fn checksum(self, data: &[u8]) -> u16 {
        match self.algorithm() {
            Some(crc) => crc.checksum(data),
            None => 0,
        }
    }

    /// Whether `crc` is acceptable for `data`; always true with [`CrcMode::None`]
    pub fn verify(self, data: &[u8], crc: u16) -> bool {
        self == CrcMode::None || self.checksum(data) == crc
    }

    fn algorithm(self) -> Option<&'static Crc<u16>> {
        match self {
            CrcMode::Augmented => Some(&AUGMENTED),
            CrcMode::Direct => Some(&DIRECT),
            CrcMode::None => None,
        }
    }
}

/// CRC accumulated over data that arrives in pieces
///
/// Feeding the pieces in order gives the same value as [`CrcMode::checksum`]
/// over the concatenation.
#[derive(Clone)]
pub struct RunningCrc {
    digest: Option<Digest<'static, u16>>,
}

impl RunningCrc {
    pub fn new(mode: CrcMode) -> Self {
        Self {
            digest: mode.algorithm().map(|crc| crc.digest()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(digest) = &mut self.digest {
            digest.update(data);
        }
    }

    /// Current value; the accumulator stays usable
    pub fn value(&self) -> u16 {
        self.digest.clone().map_or(0, |digest| digest.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    /// Bit-at-a-time augmented CRC, MSB first, including the zero flush
    fn reference_augmented(data: &[u8], init: u16) -> u16 {
        fn shift(crc: &mut u16, bit: bool) {
            let carry = *crc & 0x8000 != 0;
            *crc = (*crc << 1) | bit as u16;
            if carry {
                *crc ^= 0x1021;
            }
        }

        let mut crc = init;
        for byte in data {
            for i in (0..8).rev() {
                shift(&mut crc, (byte >> i) & 1 == 1);
            }
        }
        for _ in 0..16 {
            shift(&mut crc, false);
        }
        crc
    }

    #[test]
    fn test_ccitt_check_values() {
        assert_eq!(crc16_ccitt(CHECK), 0xE5CC);
        assert_eq!(crc16_ccitt(&[]), 0x1D0F);
        assert_eq!(crc16_ccitt(&[0x41]), 0x9479);
    }

    #[test]
    fn test_ccitt_matches_bitwise_reference() {
        let inputs: [&[u8]; 5] = [
            &[],
            &[0x00],
            &[0xFF, 0xFF],
            CHECK,
            b"The quick brown fox jumps over the lazy dog",
        ];
        for input in inputs {
            assert_eq!(crc16_ccitt(input), reference_augmented(input, 0xFFFF));
        }
    }

    #[test]
    fn test_xmodem_matches_bitwise_reference() {
        assert_eq!(crc16_xmodem(CHECK), 0x31C3);
        assert_eq!(crc16_xmodem(CHECK), reference_augmented(CHECK, 0x0000));
    }

    #[test]
    fn test_direct_check_value() {
        assert_eq!(crc16_ccitt_direct(CHECK), 0x29B1);
        assert_ne!(crc16_ccitt_direct(CHECK), crc16_ccitt(CHECK));
    }

    #[test]
    fn test_deterministic_and_distinguishing() {
        let a = [0x10, 0x20, 0x30];
        let b = [0x10, 0x20, 0x31];
        assert_eq!(crc16_ccitt(&a), crc16_ccitt(&a));
        assert_ne!(crc16_ccitt(&a), crc16_ccitt(&b));
    }

    #[test]
    fn test_running_crc_matches_one_shot() {
        for mode in [CrcMode::Augmented, CrcMode::Direct] {
            let mut running = RunningCrc::new(mode);
            running.update(b"1234");
            assert_eq!(running.value(), mode.checksum(b"1234"));
            running.update(b"56789");
            assert_eq!(running.value(), mode.checksum(CHECK));
        }
    }

    #[test]
    fn test_none_mode_carries_zero() {
        assert_eq!(CrcMode::None.checksum(CHECK), 0);
        assert!(CrcMode::None.verify(CHECK, 0x1234));
        assert!(!CrcMode::Direct.verify(CHECK, 0x1234));
        assert!(CrcMode::Direct.verify(CHECK, 0x29B1));

        let mut running = RunningCrc::new(CrcMode::None);
        running.update(CHECK);
        assert_eq!(running.value(), 0);
    }
}
