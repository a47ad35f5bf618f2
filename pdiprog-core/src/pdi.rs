// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! PDI Instruction Encoding
//!
//! Each PDI instruction is a single byte, optionally followed by address and
//! data bytes, all sent LSB first.  The layout of the instruction byte is:
//!
//! ```text
//!   7   6   5   4   3   2   1   0
//! +-----------+---+-------+-------+
//! |  opcode   | 0 | size A| size B|
//! +-----------+---+-------+-------+
//! ```
//!
//! - For `LDS`/`STS`, size A is the address size and size B the data size.
//! - For `LD`/`ST`, size A is the [`PointerMode`] and size B the data size.
//! - For `LDCS`/`STCS`, bits 3:0 are the control/status register index.
//! - For `REPEAT`, size B is the size of the repeat count that follows.
//! - `KEY` takes no operands in the instruction byte.  8 key bytes follow.

use core::fmt;

/// Key which enables the NVM controller via the `KEY` instruction, as a
/// 64-bit value.
pub const NVM_KEY: u64 = 0x1289_AB45_CDD8_88FF;

/// [`NVM_KEY`] in transmission order (LSB first).
pub const NVM_KEY_BYTES: [u8; 8] = NVM_KEY.to_le_bytes();

/// Value written to the `RESET` control/status register to hold the target
/// in reset.  Any other value releases it.
pub const RESET_SIGNATURE: u8 = 0x59;

/// `NVMEN` bit in the `STATUS` control/status register, set once the key has
/// been accepted and the NVM controller is accessible.
pub const STATUS_NVMEN: u8 = 0x02;

/// Byte written via `ST *ptr++` to trigger a page commit or row erase.  The
/// value itself is ignored by the target.
pub const DUMMY_BYTE: u8 = 0x55;

/// PDI instruction opcodes, bits 7:5 of the instruction byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Lds = 0x00,
    Ld = 0x20,
    Sts = 0x40,
    St = 0x60,
    Ldcs = 0x80,
    Repeat = 0xA0,
    Stcs = 0xC0,
    Key = 0xE0,
}

impl Opcode {
    const MASK: u8 = 0xE0;

    /// Extracts the opcode from an instruction byte.  All 8 values of bits
    /// 7:5 are valid opcodes.
    pub const fn from_instruction(byte: u8) -> Self {
        match byte & Self::MASK {
            0x00 => Opcode::Lds,
            0x20 => Opcode::Ld,
            0x40 => Opcode::Sts,
            0x60 => Opcode::St,
            0x80 => Opcode::Ldcs,
            0xA0 => Opcode::Repeat,
            0xC0 => Opcode::Stcs,
            _ => Opcode::Key,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Opcode::Lds => "LDS",
            Opcode::Ld => "LD",
            Opcode::Sts => "STS",
            Opcode::St => "ST",
            Opcode::Ldcs => "LDCS",
            Opcode::Repeat => "REPEAT",
            Opcode::Stcs => "STCS",
            Opcode::Key => "KEY",
        };
        write!(f, "{s}")
    }
}

/// Size of an address or data operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Size {
    Byte = 0,
    Word = 1,
    ThreeBytes = 2,
    Long = 3,
}

impl Size {
    /// Decodes a 2-bit size field.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Size::Byte,
            1 => Size::Word,
            2 => Size::ThreeBytes,
            _ => Size::Long,
        }
    }

    /// Number of bytes occupied by an operand of this size.
    pub const fn len(&self) -> usize {
        *self as usize + 1
    }

    /// Returns the narrowest size able to hold `value`.
    pub const fn narrowest(value: u32) -> Self {
        if value < (1 << 8) {
            Size::Byte
        } else if value < (1 << 16) {
            Size::Word
        } else if value < (1 << 24) {
            Size::ThreeBytes
        } else {
            Size::Long
        }
    }
}

/// Pointer access mode for `LD` and `ST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PointerMode {
    /// `*(ptr)` - access the location the pointer references.
    Indirect = 0,

    /// `*(ptr++)` - access the referenced location, then increment the
    /// pointer.
    IndirectPostInc = 1,

    /// `ptr` - access the pointer register itself.
    Direct = 2,

    /// `ptr++` - reserved by the PDI controller.
    DirectPostInc = 3,
}

impl PointerMode {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => PointerMode::Indirect,
            1 => PointerMode::IndirectPostInc,
            2 => PointerMode::Direct,
            _ => PointerMode::DirectPostInc,
        }
    }
}

/// PDI control/status registers, accessed with `LDCS`/`STCS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlRegister {
    Status = 0,
    Reset = 1,
    Ctrl = 2,
}

impl ControlRegister {
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(ControlRegister::Status),
            1 => Some(ControlRegister::Reset),
            2 => Some(ControlRegister::Ctrl),
            _ => None,
        }
    }
}

/// A single PDI instruction byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(u8);

impl Instruction {
    const fn encode(opcode: Opcode, a: u8, b: u8) -> Self {
        Self(opcode as u8 | (a & 0x03) << 2 | (b & 0x03))
    }

    /// `LDS` - load data from an absolute address.
    pub const fn lds(address: Size, data: Size) -> Self {
        Self::encode(Opcode::Lds, address as u8, data as u8)
    }

    /// `STS` - store data to an absolute address.
    pub const fn sts(address: Size, data: Size) -> Self {
        Self::encode(Opcode::Sts, address as u8, data as u8)
    }

    /// `LD` - load data via the pointer register.
    pub const fn ld(mode: PointerMode, data: Size) -> Self {
        Self::encode(Opcode::Ld, mode as u8, data as u8)
    }

    /// `ST` - store data via the pointer register.
    pub const fn st(mode: PointerMode, data: Size) -> Self {
        Self::encode(Opcode::St, mode as u8, data as u8)
    }

    /// `LDCS` - load a control/status register.
    pub const fn ldcs(register: ControlRegister) -> Self {
        Self(Opcode::Ldcs as u8 | register as u8)
    }

    /// `STCS` - store a control/status register.
    pub const fn stcs(register: ControlRegister) -> Self {
        Self(Opcode::Stcs as u8 | register as u8)
    }

    /// `REPEAT` - repeat the next instruction.  The count that follows has
    /// the given size.
    pub const fn repeat(count: Size) -> Self {
        Self::encode(Opcode::Repeat, 0, count as u8)
    }

    /// `KEY` - 8 key bytes follow.
    pub const fn key() -> Self {
        Self(Opcode::Key as u8)
    }

    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn to_byte(self) -> u8 {
        self.0
    }

    pub const fn opcode(&self) -> Opcode {
        Opcode::from_instruction(self.0)
    }

    /// Address size for `LDS`/`STS`.
    pub const fn address_size(&self) -> Size {
        Size::from_bits(self.0 >> 2)
    }

    /// Data size for `LDS`/`STS`/`LD`/`ST`, or count size for `REPEAT`.
    pub const fn data_size(&self) -> Size {
        Size::from_bits(self.0)
    }

    /// Pointer mode for `LD`/`ST`.
    pub const fn pointer_mode(&self) -> PointerMode {
        PointerMode::from_bits(self.0 >> 2)
    }

    /// Control/status register index for `LDCS`/`STCS`.
    pub const fn register_index(&self) -> u8 {
        self.0 & 0x0F
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.opcode(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings_match_instruction_set() {
        // Long address, byte data
        assert_eq!(Instruction::lds(Size::Long, Size::Byte).to_byte(), 0x0C);
        assert_eq!(Instruction::sts(Size::Long, Size::Byte).to_byte(), 0x4C);
        // Set pointer with a 4 byte address
        assert_eq!(
            Instruction::st(PointerMode::Direct, Size::Long).to_byte(),
            0x6B
        );
        assert_eq!(
            Instruction::st(PointerMode::IndirectPostInc, Size::Byte).to_byte(),
            0x64
        );
        assert_eq!(
            Instruction::ld(PointerMode::IndirectPostInc, Size::Byte).to_byte(),
            0x24
        );
        assert_eq!(Instruction::ldcs(ControlRegister::Status).to_byte(), 0x80);
        assert_eq!(Instruction::stcs(ControlRegister::Reset).to_byte(), 0xC1);
        assert_eq!(Instruction::repeat(Size::Word).to_byte(), 0xA1);
        assert_eq!(Instruction::key().to_byte(), 0xE0);
    }

    #[test]
    fn decode_fields() {
        let instr = Instruction::from_byte(0x6B);
        assert_eq!(instr.opcode(), Opcode::St);
        assert_eq!(instr.pointer_mode(), PointerMode::Direct);
        assert_eq!(instr.data_size(), Size::Long);
        assert_eq!(instr.data_size().len(), 4);

        let instr = Instruction::from_byte(0xC1);
        assert_eq!(instr.opcode(), Opcode::Stcs);
        assert_eq!(
            ControlRegister::from_index(instr.register_index()),
            Some(ControlRegister::Reset)
        );
    }

    #[test]
    fn key_is_sent_lsb_first() {
        assert_eq!(
            NVM_KEY_BYTES,
            [0xFF, 0x88, 0xD8, 0xCD, 0x45, 0xAB, 0x89, 0x12]
        );
    }

    #[test]
    fn narrowest_size_boundaries() {
        assert_eq!(Size::narrowest(0), Size::Byte);
        assert_eq!(Size::narrowest(255), Size::Byte);
        assert_eq!(Size::narrowest(256), Size::Word);
        assert_eq!(Size::narrowest(65_535), Size::Word);
        assert_eq!(Size::narrowest(65_536), Size::ThreeBytes);
        assert_eq!(Size::narrowest(1 << 24), Size::Long);
    }
}
