// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Known XMEGA devices

use core::fmt;

use crate::DeviceSignature;
use crate::nvm::{EEPROM_PAGE_SIZE, FLASH_PAGE_SIZE};

/// Details of a specific XMEGA part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XmegaDetails {
    pub name: &'static str,
    pub signature: DeviceSignature,

    /// Application section size in KB.  The boot section is additional.
    pub app_flash_kb: u32,
    pub boot_flash_kb: u32,
    pub eeprom_bytes: u32,
    pub flash_page_size: usize,
    pub eeprom_page_size: usize,
}

impl XmegaDetails {
    pub fn app_flash_bytes(&self) -> u32 {
        self.app_flash_kb * 1024
    }

    /// Total flash, application plus boot section.
    pub fn flash_bytes(&self) -> u32 {
        (self.app_flash_kb + self.boot_flash_kb) * 1024
    }

    pub fn flash_pages(&self) -> u32 {
        self.flash_bytes() / self.flash_page_size as u32
    }
}

impl fmt::Display for XmegaDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}KB+{}KB flash, {} bytes EEPROM)",
            self.name, self.app_flash_kb, self.boot_flash_kb, self.eeprom_bytes
        )
    }
}

const fn part(
    name: &'static str,
    signature: [u8; 3],
    app_flash_kb: u32,
    boot_flash_kb: u32,
    eeprom_bytes: u32,
) -> XmegaDetails {
    XmegaDetails {
        name,
        signature: DeviceSignature::new(signature),
        app_flash_kb,
        boot_flash_kb,
        eeprom_bytes,
        flash_page_size: FLASH_PAGE_SIZE,
        eeprom_page_size: EEPROM_PAGE_SIZE,
    }
}

pub const ATXMEGA16A4U: XmegaDetails = part("ATxmega16A4U", [0x1E, 0x94, 0x41], 16, 4, 1024);
pub const ATXMEGA16D4: XmegaDetails = part("ATxmega16D4", [0x1E, 0x94, 0x42], 16, 4, 1024);
pub const ATXMEGA32A4U: XmegaDetails = part("ATxmega32A4U", [0x1E, 0x95, 0x41], 32, 4, 1024);
pub const ATXMEGA32D4: XmegaDetails = part("ATxmega32D4", [0x1E, 0x95, 0x42], 32, 4, 1024);

/// All devices this crate knows about.
pub const KNOWN_DEVICES: &[XmegaDetails] = &[ATXMEGA16A4U, ATXMEGA16D4, ATXMEGA32A4U, ATXMEGA32D4];

/// Identifies a device from its signature.
pub fn from_signature(signature: &DeviceSignature) -> Option<&'static XmegaDetails> {
    KNOWN_DEVICES.iter().find(|d| d.signature == *signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(ATXMEGA16D4.flash_bytes(), 20 * 1024);
        assert_eq!(ATXMEGA16D4.app_flash_bytes(), 16 * 1024);
        assert_eq!(ATXMEGA16D4.flash_pages(), 80);
    }

    #[test]
    fn signatures_unique() {
        for (i, a) in KNOWN_DEVICES.iter().enumerate() {
            for b in &KNOWN_DEVICES[i + 1..] {
                assert_ne!(a.signature, b.signature);
            }
        }
    }
}
