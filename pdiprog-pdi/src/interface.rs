// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! PDI Instruction Interface
//!
//! This module implements [`PdiInterface`], which sends individual PDI
//! instructions - `LDS`, `STS`, `LDCS`, `STCS`, `KEY`, `REPEAT`, and the
//! pointer based `LD`/`ST` forms - over [`PdiProtocol`].
//!
//! Each instruction is built in a buffer local to the call, so
//! `PdiInterface` holds no state other than the protocol object and the
//! retry count used when waiting for the target to respond.

use core::result::Result;
use embedded_hal::delay::DelayNs;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use pdiprog_core::nvm::WAIT_RETRIES;
use pdiprog_core::pdi::{ControlRegister, Instruction, NVM_KEY_BYTES, PointerMode, Size};

use crate::PdiError;
use crate::protocol::{PdiPins, PdiProtocol, Speed};

// Instruction byte plus the largest operand
const MAX_INSTRUCTION_LEN: usize = 1 + 8;

/// PDI instruction level interface.
///
/// Used by [`crate::NvmInterface`] to perform NVM operations.  Applications
/// which need tighter control can use it directly, via
/// [`crate::NvmInterface::pdi_if()`].
#[derive(Debug)]
pub struct PdiInterface<P, D> {
    pdi: PdiProtocol<P, D>,
    retries: u32,
}

impl<P: PdiPins, D: DelayNs> PdiInterface<P, D> {
    /// Creates a new `PdiInterface` from an existing [`PdiProtocol`].
    pub fn new(pdi: PdiProtocol<P, D>) -> Self {
        Self {
            pdi,
            retries: WAIT_RETRIES,
        }
    }

    /// Creates a new `PdiInterface` from pins and a delay provider.
    pub fn from_pins(pins: P, delay: D) -> Self {
        Self::new(PdiProtocol::new(pins, delay))
    }

    pub fn protocol(&self) -> &PdiProtocol<P, D> {
        &self.pdi
    }

    /// Returns a mutable reference to the underlying [`PdiProtocol`].
    pub fn protocol_mut(&mut self) -> &mut PdiProtocol<P, D> {
        &mut self.pdi
    }

    /// Number of bits to wait for each response byte's start bit, and
    /// number of attempts per byte in bulk reads.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
    }

    pub fn set_speed(&mut self, speed: Speed) {
        self.pdi.set_speed(speed);
    }

    /// Enables the target's PDI interface.
    pub fn enable(&mut self) {
        self.pdi.enable();
    }

    /// Disables the target's PDI interface.
    pub fn disable(&mut self) {
        self.pdi.disable();
    }

    fn send(&mut self, buf: &[u8]) -> Result<(), PdiError> {
        self.pdi.write(buf)
    }

    fn with_address(instr: Instruction, address: u32) -> ([u8; MAX_INSTRUCTION_LEN], usize) {
        let mut buf = [0u8; MAX_INSTRUCTION_LEN];
        buf[0] = instr.to_byte();
        buf[1..5].copy_from_slice(&address.to_le_bytes());
        (buf, 5)
    }

    /// `LDS` - reads a byte from a 4-byte absolute address.
    ///
    /// Arguments:
    /// - `address`: Absolute PDI address.
    ///
    /// Returns:
    /// - `Ok(u8)`: The byte read.
    /// - `Err(PdiError)`: The instruction couldn't be sent, or no valid
    ///   response was received.
    pub fn lds(&mut self, address: u32) -> Result<u8, PdiError> {
        let (buf, len) = Self::with_address(Instruction::lds(Size::Long, Size::Byte), address);
        self.send(&buf[..len])?;
        let value = self.pdi.read_byte(self.retries)?;
        trace!("Value: LDS 0x{address:08X} = 0x{value:02X}");
        Ok(value)
    }

    /// `STS` - writes a byte to a 4-byte absolute address.
    pub fn sts(&mut self, address: u32, value: u8) -> Result<(), PdiError> {
        trace!("Exec:  STS 0x{address:08X} = 0x{value:02X}");
        let (mut buf, len) = Self::with_address(Instruction::sts(Size::Long, Size::Byte), address);
        buf[len] = value;
        self.send(&buf[..len + 1])
    }

    /// `LDCS` - reads a PDI control/status register.
    pub fn ldcs(&mut self, register: ControlRegister) -> Result<u8, PdiError> {
        self.send(&[Instruction::ldcs(register).to_byte()])?;
        let value = self.pdi.read_byte(self.retries)?;
        trace!("Value: LDCS {register:?} = 0x{value:02X}");
        Ok(value)
    }

    /// `STCS` - writes a PDI control/status register.
    pub fn stcs(&mut self, register: ControlRegister, value: u8) -> Result<(), PdiError> {
        trace!("Exec:  STCS {register:?} = 0x{value:02X}");
        self.send(&[Instruction::stcs(register).to_byte(), value])
    }

    /// `KEY` - sends the NVM programming key.
    pub fn key(&mut self) -> Result<(), PdiError> {
        let mut buf = [0u8; MAX_INSTRUCTION_LEN];
        buf[0] = Instruction::key().to_byte();
        buf[1..].copy_from_slice(&NVM_KEY_BYTES);
        self.send(&buf)
    }

    /// `REPEAT` - causes the next instruction to be executed `count` times.
    ///
    /// The repeat value sent is `count - 1`, in the narrowest of 1, 2, 3 or
    /// 4 bytes which will hold it.
    ///
    /// Returns:
    /// - `Err(PdiError::InvalidArgument)`: if `count` is zero.
    pub fn repeat(&mut self, count: u32) -> Result<(), PdiError> {
        if count == 0 {
            return Err(PdiError::InvalidArgument);
        }
        let value = count - 1;
        let size = Size::narrowest(value);

        let mut buf = [0u8; MAX_INSTRUCTION_LEN];
        buf[0] = Instruction::repeat(size).to_byte();
        buf[1..1 + size.len()].copy_from_slice(&value.to_le_bytes()[..size.len()]);
        self.send(&buf[..1 + size.len()])
    }

    /// `ST ptr` - sets the pointer register to a 4-byte absolute address.
    pub fn st_ptr(&mut self, address: u32) -> Result<(), PdiError> {
        trace!("Exec:  ST ptr = 0x{address:08X}");
        let (buf, len) = Self::with_address(Instruction::st(PointerMode::Direct, Size::Long), address);
        self.send(&buf[..len])
    }

    /// `ST *(ptr++)` - writes a single byte via the pointer register.
    pub fn st_star_ptr_postinc(&mut self, value: u8) -> Result<(), PdiError> {
        let instr = Instruction::st(PointerMode::IndirectPostInc, Size::Byte);
        self.send(&[instr.to_byte(), value])
    }

    /// Writes `data` via the pointer register, using `REPEAT` for more than
    /// one byte.  A single byte is sent without a `REPEAT`.
    ///
    /// Returns:
    /// - `Err(PdiError::InvalidArgument)`: if `data` is empty.
    pub fn st_star_ptr_postinc_bulk(&mut self, data: &[u8]) -> Result<(), PdiError> {
        match data.len() {
            0 => Err(PdiError::InvalidArgument),
            1 => self.st_star_ptr_postinc(data[0]),
            len => {
                let count = u32::try_from(len).map_err(|_| PdiError::InvalidArgument)?;
                self.repeat(count)?;
                let instr = Instruction::st(PointerMode::IndirectPostInc, Size::Byte);
                self.send(&[instr.to_byte()])?;
                self.send(data)
            }
        }
    }

    /// `LD *(ptr++)` - reads `buf.len()` bytes via the pointer register,
    /// using `REPEAT` for more than one byte.
    ///
    /// Returns:
    /// - `Ok(usize)`: The number of bytes read, always `buf.len()`.
    /// - `Err(PdiError)`: Nothing usable was read.
    pub fn ld_star_ptr_postinc(&mut self, buf: &mut [u8]) -> Result<usize, PdiError> {
        if buf.is_empty() {
            return Err(PdiError::InvalidArgument);
        }
        if buf.len() > 1 {
            let count = u32::try_from(buf.len()).map_err(|_| PdiError::InvalidArgument)?;
            self.repeat(count)?;
        }
        let instr = Instruction::ld(PointerMode::IndirectPostInc, Size::Byte);
        self.send(&[instr.to_byte()])?;
        self.pdi.read(buf, self.retries)
    }
}
