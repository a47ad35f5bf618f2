// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! XMEGA address spaces as seen over PDI.
//!
//! PDI uses a unified 32-bit address map.  NVM (flash, EEPROM, signature
//! rows, fuses and lock bits) sits below 0x0100_0000 and the data space
//! (IO registers and SRAM) above it.

use core::fmt;
use static_assertions::const_assert;

pub const FLASH_BASE: u32 = 0x0080_0000;
pub const EEPROM_BASE: u32 = 0x008C_0000;
pub const PRODUCTION_SIGNATURE_BASE: u32 = 0x008E_0200;
pub const USER_SIGNATURE_BASE: u32 = 0x008E_0400;
pub const FUSE_BASE: u32 = 0x008F_0020;
pub const LOCK_BITS_BASE: u32 = 0x008F_0027;
pub const DATA_BASE: u32 = 0x0100_0000;

/// Number of fuse bytes, starting at [`FUSE_BASE`].
pub const FUSE_COUNT: usize = 7;

const_assert!(FLASH_BASE < EEPROM_BASE);
const_assert!(EEPROM_BASE < PRODUCTION_SIGNATURE_BASE);
const_assert!(PRODUCTION_SIGNATURE_BASE < USER_SIGNATURE_BASE);
const_assert!(USER_SIGNATURE_BASE < FUSE_BASE);
const_assert!(FUSE_BASE + FUSE_COUNT as u32 == LOCK_BITS_BASE);
const_assert!(LOCK_BITS_BASE < DATA_BASE);

/// An address space, identified by its base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Space {
    Flash,
    Eeprom,
    ProductionSignature,
    UserSignature,
    Fuses,
    LockBits,
    Data,
}

impl Space {
    pub const fn base(&self) -> u32 {
        match self {
            Space::Flash => FLASH_BASE,
            Space::Eeprom => EEPROM_BASE,
            Space::ProductionSignature => PRODUCTION_SIGNATURE_BASE,
            Space::UserSignature => USER_SIGNATURE_BASE,
            Space::Fuses => FUSE_BASE,
            Space::LockBits => LOCK_BITS_BASE,
            Space::Data => DATA_BASE,
        }
    }

    /// Number of addresses between this space's base and the next space's.
    pub const fn size(&self) -> u32 {
        match self {
            Space::Flash => EEPROM_BASE - FLASH_BASE,
            Space::Eeprom => PRODUCTION_SIGNATURE_BASE - EEPROM_BASE,
            Space::ProductionSignature => USER_SIGNATURE_BASE - PRODUCTION_SIGNATURE_BASE,
            Space::UserSignature => FUSE_BASE - USER_SIGNATURE_BASE,
            Space::Fuses => FUSE_COUNT as u32,
            Space::LockBits => 1,
            Space::Data => u32::MAX - DATA_BASE + 1,
        }
    }

    /// Converts an offset within this space into an absolute PDI address.
    ///
    /// Returns `None` if `offset` lies outside the space.
    pub const fn absolute(&self, offset: u32) -> Option<u32> {
        self.absolute_range(offset, 1)
    }

    /// Converts an offset within this space into an absolute PDI address,
    /// checking that all `len` bytes from it stay inside the space.
    pub const fn absolute_range(&self, offset: u32, len: usize) -> Option<u32> {
        span_start(self.base(), self.size(), offset, len)
    }
}

/// Absolute address of `offset` within `size` bytes from `base`, if
/// `offset..offset + len` fits.  A zero length is treated as one byte.
pub(crate) const fn span_start(base: u32, size: u32, offset: u32, len: usize) -> Option<u32> {
    let len = if len == 0 { 1 } else { len as u64 };
    if offset as u64 + len > size as u64 {
        None
    } else {
        Some(base + offset)
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Space::Flash => "flash",
            Space::Eeprom => "eeprom",
            Space::ProductionSignature => "production signature",
            Space::UserSignature => "user signature",
            Space::Fuses => "fuses",
            Space::LockBits => "lock bits",
            Space::Data => "data",
        };
        write!(f, "{s}")
    }
}
