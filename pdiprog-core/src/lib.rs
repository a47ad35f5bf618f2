// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! pdiprog-core - Core PDI and NVM concepts used by pdiprog.
//!
//! Designed to be used in conjunction with the `pdiprog-pdi` library, which
//! bit-bangs the AVR XMEGA Program and Debug Interface (PDI).
//!
//! This crate contains no I/O.  It provides:
//! - [`pdi`] - PDI instruction encoding and control/status registers.
//! - [`memory`] - The address spaces visible over PDI.
//! - [`nvm`] - NVM controller registers, commands and programmable regions.
//! - [`xmega`] - Known XMEGA devices, identified by their signature.
//!
//! This library is `no_std` compatible and does not require an allocator.

#![cfg_attr(not(test), no_std)]

pub mod memory;
pub mod nvm;
pub mod pdi;
pub mod xmega;

use core::fmt;
use static_assertions::const_assert;

use crate::xmega::XmegaDetails;

/// Length of an XMEGA device signature in bytes.
pub const SIGNATURE_LEN: usize = 3;

/// Manufacturer byte found in the first signature byte of all Atmel/Microchip
/// AVR devices.
pub const ATMEL_MANUFACTURER_ID: u8 = 0x1E;

const_assert!(SIGNATURE_LEN == 3);

/// A target device signature, read from `MCU.DEVID0..2`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceSignature([u8; SIGNATURE_LEN]);

impl DeviceSignature {
    pub const fn new(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw signature bytes, DEVID0 first.
    pub const fn bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0
    }

    /// Returns the signature byte at `index`, if in range.
    pub fn byte(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    pub fn manufacturer(&self) -> u8 {
        self.0[0]
    }

    /// Returns whether the manufacturer byte is Atmel/Microchip's.
    pub fn is_atmel(&self) -> bool {
        self.manufacturer() == ATMEL_MANUFACTURER_ID
    }

    /// Returns whether this looks like a signature read from a device that
    /// isn't there - all bits high or all bits low.
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|&b| b == 0xFF) || self.0.iter().all(|&b| b == 0x00)
    }

    /// Looks up the device details for this signature.
    pub fn device(&self) -> Option<&'static XmegaDetails> {
        xmega::from_signature(self)
    }
}

impl From<[u8; SIGNATURE_LEN]> for DeviceSignature {
    fn from(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for DeviceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X} {:02X}", self.0[0], self.0[1], self.0[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_display_and_lookup() {
        let sig = DeviceSignature::new([0x1E, 0x94, 0x42]);
        assert_eq!(format!("{sig}"), "1E 94 42");
        assert!(sig.is_atmel());
        assert!(!sig.is_blank());
        assert_eq!(sig.device().map(|d| d.name), Some("ATxmega16D4"));
        assert_eq!(sig.byte(2), Some(0x42));
        assert_eq!(sig.byte(3), None);
    }

    #[test]
    fn blank_signatures() {
        assert!(DeviceSignature::new([0xFF; 3]).is_blank());
        assert!(DeviceSignature::new([0x00; 3]).is_blank());
        assert!(DeviceSignature::new([0xFF; 3]).device().is_none());
    }
}
