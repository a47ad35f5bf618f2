// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! XMEGA NVM controller definitions
//!
//! The NVM controller lives in IO space.  Commands are issued by writing the
//! command code to `NVM.CMD` and then either setting `NVM.CTRLA.CMDEX`
//! (action commands) or performing a dummy write into the target region
//! (page/row commands).  Completion is detected by polling `NVM.STATUS.BUSY`.

use core::fmt;
use static_assertions::const_assert;

use crate::memory::{DATA_BASE, EEPROM_BASE, FLASH_BASE, Space, USER_SIGNATURE_BASE, span_start};

/// Base of the NVM controller registers within IO space.
pub const NVM_CONTROLLER_BASE: u16 = 0x01C0;

/// Offset of `MCU.DEVID0` within IO space.  `DEVID1` and `DEVID2` follow.
pub const MCU_DEVID_OFFSET: u16 = 0x0090;

/// `NVM.CTRLA` command execute bit.
pub const CTRLA_CMDEX: u8 = 0x01;

/// `NVM.STATUS` busy bit.
pub const STATUS_BUSY: u8 = 0x80;

/// Default number of polls of a status bit before giving up.
pub const WAIT_RETRIES: u32 = 1000;

/// NVM controller registers used by the programmer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NvmRegister {
    Cmd = 0x0A,
    CtrlA = 0x0B,
    Status = 0x0F,
}

impl NvmRegister {
    /// Offset of this register within IO space.
    pub const fn io_offset(&self) -> u16 {
        NVM_CONTROLLER_BASE + *self as u16
    }

    /// Absolute PDI address of this register.
    pub const fn address(&self) -> u32 {
        DATA_BASE + self.io_offset() as u32
    }

    pub const fn from_io_offset(offset: u16) -> Option<Self> {
        match offset.wrapping_sub(NVM_CONTROLLER_BASE) {
            0x0A => Some(NvmRegister::Cmd),
            0x0B => Some(NvmRegister::CtrlA),
            0x0F => Some(NvmRegister::Status),
            _ => None,
        }
    }
}

/// NVM controller command codes, written to `NVM.CMD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NvmCommand {
    Nop = 0x00,
    ReadUserSignature = 0x01,
    ReadCalibration = 0x02,
    ReadEeprom = 0x06,
    ReadFuse = 0x07,
    WriteLockBits = 0x08,
    EraseUserSignature = 0x18,
    WriteUserSignature = 0x1A,
    LoadFlashPageBuffer = 0x23,
    EraseWriteAppPage = 0x25,
    EraseFlashPageBuffer = 0x26,
    LoadEepromPageBuffer = 0x33,
    EraseWriteEepromPage = 0x35,
    EraseEepromPageBuffer = 0x36,
    ChipErase = 0x40,
    ReadNvm = 0x43,
    WriteFuse = 0x4C,
}

impl NvmCommand {
    pub const fn to_byte(self) -> u8 {
        self as u8
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(NvmCommand::Nop),
            0x01 => Some(NvmCommand::ReadUserSignature),
            0x02 => Some(NvmCommand::ReadCalibration),
            0x06 => Some(NvmCommand::ReadEeprom),
            0x07 => Some(NvmCommand::ReadFuse),
            0x08 => Some(NvmCommand::WriteLockBits),
            0x18 => Some(NvmCommand::EraseUserSignature),
            0x1A => Some(NvmCommand::WriteUserSignature),
            0x23 => Some(NvmCommand::LoadFlashPageBuffer),
            0x25 => Some(NvmCommand::EraseWriteAppPage),
            0x26 => Some(NvmCommand::EraseFlashPageBuffer),
            0x33 => Some(NvmCommand::LoadEepromPageBuffer),
            0x35 => Some(NvmCommand::EraseWriteEepromPage),
            0x36 => Some(NvmCommand::EraseEepromPageBuffer),
            0x40 => Some(NvmCommand::ChipErase),
            0x43 => Some(NvmCommand::ReadNvm),
            0x4C => Some(NvmCommand::WriteFuse),
            _ => None,
        }
    }
}

impl fmt::Display for NvmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NvmCommand::Nop => "NOP",
            NvmCommand::ReadUserSignature => "Read User Signature",
            NvmCommand::ReadCalibration => "Read Calibration",
            NvmCommand::ReadEeprom => "Read EEPROM",
            NvmCommand::ReadFuse => "Read Fuse",
            NvmCommand::WriteLockBits => "Write Lock Bits",
            NvmCommand::EraseUserSignature => "Erase User Signature",
            NvmCommand::WriteUserSignature => "Write User Signature",
            NvmCommand::LoadFlashPageBuffer => "Load Flash Page Buffer",
            NvmCommand::EraseWriteAppPage => "Erase and Write Application Page",
            NvmCommand::EraseFlashPageBuffer => "Erase Flash Page Buffer",
            NvmCommand::LoadEepromPageBuffer => "Load EEPROM Page Buffer",
            NvmCommand::EraseWriteEepromPage => "Erase and Write EEPROM Page",
            NvmCommand::EraseEepromPageBuffer => "Erase EEPROM Page Buffer",
            NvmCommand::ChipErase => "Chip Erase",
            NvmCommand::ReadNvm => "Read NVM",
            NvmCommand::WriteFuse => "Write Fuse",
        };
        write!(f, "{s}")
    }
}

/// A page-programmable NVM region.
///
/// Every region is programmed with the same procedure - erase the page
/// buffer, load it, issue the commit command and trigger it with a dummy
/// write, then wait for the controller to go idle.  Only the commands and
/// base address differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvmRegion {
    pub name: &'static str,

    /// Absolute PDI base address of the region.
    pub base: u32,

    /// Number of addresses from `base` up to the next region.
    pub size: u32,

    /// Command to erase the page buffer, executed with `CMDEX`.
    pub erase_buffer: NvmCommand,

    /// Command active while writing data into the page buffer.
    pub load_buffer: NvmCommand,

    /// Command which erases the whole row before committing, triggered by a
    /// dummy write.  Only needed where `commit` doesn't erase.
    pub row_erase: Option<NvmCommand>,

    /// Command which commits the page buffer, triggered by a dummy write.
    pub commit: NvmCommand,

    /// Size of the page buffer in bytes.
    pub page_size: usize,
}

/// Flash and user signature page size.
pub const FLASH_PAGE_SIZE: usize = 256;

/// EEPROM page size.
pub const EEPROM_PAGE_SIZE: usize = 32;

const_assert!(FLASH_PAGE_SIZE.is_power_of_two());
const_assert!(EEPROM_PAGE_SIZE.is_power_of_two());

impl NvmRegion {
    /// Application flash section.
    pub const FLASH: NvmRegion = NvmRegion {
        name: "flash",
        base: FLASH_BASE,
        size: Space::Flash.size(),
        erase_buffer: NvmCommand::EraseFlashPageBuffer,
        load_buffer: NvmCommand::LoadFlashPageBuffer,
        row_erase: None,
        commit: NvmCommand::EraseWriteAppPage,
        page_size: FLASH_PAGE_SIZE,
    };

    pub const EEPROM: NvmRegion = NvmRegion {
        name: "eeprom",
        base: EEPROM_BASE,
        size: Space::Eeprom.size(),
        erase_buffer: NvmCommand::EraseEepromPageBuffer,
        load_buffer: NvmCommand::LoadEepromPageBuffer,
        row_erase: None,
        commit: NvmCommand::EraseWriteEepromPage,
        page_size: EEPROM_PAGE_SIZE,
    };

    /// User signature row.  This goes via the flash page buffer, and the row
    /// must be erased separately before committing.
    pub const USER_SIGNATURE: NvmRegion = NvmRegion {
        name: "user signature",
        base: USER_SIGNATURE_BASE,
        size: Space::UserSignature.size(),
        erase_buffer: NvmCommand::EraseFlashPageBuffer,
        load_buffer: NvmCommand::LoadFlashPageBuffer,
        row_erase: Some(NvmCommand::EraseUserSignature),
        commit: NvmCommand::WriteUserSignature,
        page_size: FLASH_PAGE_SIZE,
    };

    /// Converts an offset within the region to an absolute address, or
    /// `None` if it falls outside the region.
    pub const fn absolute(&self, offset: u32) -> Option<u32> {
        self.absolute_range(offset, 1)
    }

    /// As [`NvmRegion::absolute`], also checking that `len` bytes from
    /// `offset` stay inside the region.
    pub const fn absolute_range(&self, offset: u32, len: usize) -> Option<u32> {
        span_start(self.base, self.size, offset, len)
    }
}

impl fmt::Display for NvmRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ 0x{:08X}", self.name, self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_addresses() {
        assert_eq!(NvmRegister::Cmd.address(), 0x0100_01CA);
        assert_eq!(NvmRegister::CtrlA.address(), 0x0100_01CB);
        assert_eq!(NvmRegister::Status.address(), 0x0100_01CF);
        assert_eq!(NvmRegister::from_io_offset(0x01CF), Some(NvmRegister::Status));
        assert_eq!(NvmRegister::from_io_offset(0x0090), None);
    }

    #[test]
    fn command_byte_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(cmd) = NvmCommand::from_byte(byte) {
                assert_eq!(cmd.to_byte(), byte);
            }
        }
        assert_eq!(NvmCommand::from_byte(0x40), Some(NvmCommand::ChipErase));
        assert_eq!(NvmCommand::from_byte(0xFF), None);
    }

    #[test]
    fn regions() {
        assert_eq!(NvmRegion::FLASH.absolute(0x200), Some(0x0080_0200));
        assert_eq!(NvmRegion::FLASH.absolute(0x000C_0000), None);
        assert_eq!(NvmRegion::FLASH.absolute_range(0xFFFF_FF00, FLASH_PAGE_SIZE), None);
        assert_eq!(
            NvmRegion::EEPROM.absolute_range(0x0002_01E0, EEPROM_PAGE_SIZE),
            Some(0x008E_01E0)
        );
        assert_eq!(NvmRegion::EEPROM.absolute_range(0x0002_01F0, EEPROM_PAGE_SIZE), None);
        assert_eq!(NvmRegion::EEPROM.page_size, 32);
        assert_eq!(
            NvmRegion::USER_SIGNATURE.load_buffer,
            NvmRegion::FLASH.load_buffer
        );
    }
}
