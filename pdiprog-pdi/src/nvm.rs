// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! XMEGA NVM Programming Interface
//!
//! This module implements a high-level interface to the XMEGA NVM
//! controller over PDI.  Its aim is to provide a simple API for reading the
//! device signature, erasing the chip, and reading and programming flash,
//! EEPROM, the user signature row and fuses.
//!
//! If this module does not give you the control you need, you can use the
//! [`PdiInterface`] object directly for individual PDI instructions, via
//! [`NvmInterface::pdi_if()`].
//!
//! All NVM page programming follows the same procedure, parameterized by an
//! [`NvmRegion`]:
//!
//! ```text
//! erase page buffer -> load page buffer -> (erase row) -> commit -> wait
//! ```

use core::result::Result;
use embedded_hal::delay::DelayNs;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use pdiprog_core::DeviceSignature;
use pdiprog_core::SIGNATURE_LEN;
use pdiprog_core::memory::{DATA_BASE, FUSE_BASE, FUSE_COUNT, LOCK_BITS_BASE, Space};
use pdiprog_core::nvm::{
    CTRLA_CMDEX, MCU_DEVID_OFFSET, NvmCommand, NvmRegion, NvmRegister, STATUS_BUSY, WAIT_RETRIES,
};
use pdiprog_core::pdi::{ControlRegister, DUMMY_BYTE, RESET_SIGNATURE, STATUS_NVMEN};

use crate::PdiError;
use crate::interface::PdiInterface;
use crate::protocol::PdiPins;

/// Bring-up state of the target's NVM controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum NvmState {
    /// PDI link not enabled, or the target has been released.
    Reset,

    /// Target held in reset and the key has been sent, but the NVM
    /// controller has not (yet) reported itself enabled.
    KeyAuthenticated,

    /// NVM controller enabled.  NVM operations may be performed.
    NvmEnabled,
}

/// XMEGA NVM interface object
///
/// This is used by applications to read, erase and program the target.
///
/// The simplest way to create an `NvmInterface` is to use the
/// [`Self::from_pins()`] method:
///
/// ```rust,ignore
/// use pdiprog_pdi::NvmInterface;
///
/// let mut nvm = NvmInterface::from_pins(pins, delay);
///
/// nvm.initialize()?;
/// let signature = nvm.read_signature()?;
/// info!("Value: Signature {signature}");
/// ```
#[derive(Debug)]
pub struct NvmInterface<P, D> {
    pdi: PdiInterface<P, D>,
    state: NvmState,
    retries: u32,
}

impl<P: PdiPins, D: DelayNs> NvmInterface<P, D> {
    /// Creates a new `NvmInterface` with the given [`PdiInterface`].
    pub fn new(pdi: PdiInterface<P, D>) -> Self {
        Self {
            pdi,
            state: NvmState::Reset,
            retries: WAIT_RETRIES,
        }
    }

    /// Creates a new `NvmInterface` from pins and a delay provider.
    pub fn from_pins(pins: P, delay: D) -> Self {
        Self::new(PdiInterface::from_pins(pins, delay))
    }

    /// Returns a mutable reference to the underlying [`PdiInterface`].
    ///
    /// This allows you to access lower-level PDI operations directly, if
    /// required.
    pub fn pdi_if(&mut self) -> &mut PdiInterface<P, D> {
        &mut self.pdi
    }

    pub fn state(&self) -> NvmState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == NvmState::NvmEnabled
    }

    /// Retry count used when polling for NVM enable and NVM busy.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Sets the retry count used when polling for NVM enable and NVM busy,
    /// and when waiting for each byte from the target.
    pub fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
        self.pdi.set_retries(retries);
    }

    fn require_enabled(&self) -> Result<(), PdiError> {
        if self.is_enabled() {
            Ok(())
        } else {
            warn!("Error: NVM operation attempted in state {:?}", self.state);
            Err(PdiError::NotReady)
        }
    }

    /// Enables PDI and the target's NVM controller.
    ///
    /// Enables the link, holds the target in reset, sends the NVM key and
    /// waits for the NVM controller to report itself enabled.
    ///
    /// Returns:
    /// - `Ok(())`: The NVM controller is enabled.
    /// - `Err(PdiError::Timeout)`: The NVM controller didn't become enabled.
    /// - `Err(PdiError)`: Another error occurred along the way.
    pub fn initialize(&mut self) -> Result<(), PdiError> {
        debug!("Exec:  Initialize NVM");
        self.state = NvmState::Reset;

        self.pdi.enable();
        self.pdi
            .stcs(ControlRegister::Reset, RESET_SIGNATURE)
            .inspect_err(|e| warn!("Error: Failed to reset target: {e}"))?;

        self.pdi.key()?;
        self.state = NvmState::KeyAuthenticated;

        self.wait_for_nvm_enabled(self.retries)?;
        self.state = NvmState::NvmEnabled;

        debug!("OK:    NVM enabled");
        Ok(())
    }

    /// Releases the target from reset, leaving the link enabled.
    pub fn release_reset(&mut self) -> Result<(), PdiError> {
        debug!("Exec:  Release target reset");
        self.state = NvmState::Reset;
        self.pdi.stcs(ControlRegister::Reset, 0)
    }

    /// Releases the target from reset and disables the link, so the target
    /// runs normally.
    pub fn deinitialize(&mut self) -> Result<(), PdiError> {
        let result = self.release_reset();
        self.pdi.disable();
        self.state = NvmState::Reset;
        result
    }

    /// Disables the link without releasing reset first.  The target leaves
    /// reset when PDI is disabled.
    pub fn disable(&mut self) {
        self.pdi.disable();
        self.state = NvmState::Reset;
    }

    /// Reads the PDI `STATUS` control/status register.
    pub fn read_pdi_status(&mut self) -> Result<u8, PdiError> {
        self.pdi.ldcs(ControlRegister::Status)
    }

    /// Polls the PDI `STATUS` register until `NVMEN` is set.
    ///
    /// Returns:
    /// - `Ok(())`: `NVMEN` is set.
    /// - `Err(PdiError::Timeout)`: Not set within `retries` polls.
    /// - `Err(PdiError)`: A status read failed.
    pub fn wait_for_nvm_enabled(&mut self, retries: u32) -> Result<(), PdiError> {
        for _ in 0..retries {
            if self.read_pdi_status()? & STATUS_NVMEN != 0 {
                return Ok(());
            }
        }
        warn!("Error: Timed out waiting for NVM enable");
        Err(PdiError::Timeout)
    }

    /// Reads a byte from IO/data space.
    ///
    /// Arguments:
    /// - `address`: Address relative to the start of data space.
    pub fn read_register(&mut self, address: u16) -> Result<u8, PdiError> {
        self.pdi.lds(DATA_BASE + address as u32)
    }

    /// Writes a byte to IO/data space.
    ///
    /// Arguments:
    /// - `address`: Address relative to the start of data space.
    /// - `value`: Byte to write.
    pub fn write_register(&mut self, address: u16, value: u8) -> Result<(), PdiError> {
        self.pdi.sts(DATA_BASE + address as u32, value)
    }

    pub fn write_nvm_register(&mut self, register: NvmRegister, value: u8) -> Result<(), PdiError> {
        self.write_register(register.io_offset(), value)
    }

    /// Reads `NVM.STATUS`.
    pub fn read_nvm_status(&mut self) -> Result<u8, PdiError> {
        self.read_register(NvmRegister::Status.io_offset())
    }

    /// Writes a command to `NVM.CMD`.
    pub fn issue_command(&mut self, command: NvmCommand) -> Result<(), PdiError> {
        trace!("Exec:  NVM command {command}");
        self.write_nvm_register(NvmRegister::Cmd, command.to_byte())
    }

    /// Executes the current NVM command, by setting `NVM.CTRLA.CMDEX`.
    pub fn trigger_execute(&mut self) -> Result<(), PdiError> {
        self.write_nvm_register(NvmRegister::CtrlA, CTRLA_CMDEX)
    }

    /// Polls `NVM.STATUS` until `BUSY` is clear.
    ///
    /// A poll which gets no response counts as a busy poll.  Framing or pin
    /// errors end the wait immediately.
    ///
    /// Returns:
    /// - `Ok(())`: The NVM controller is idle.
    /// - `Err(PdiError::Timeout)`: Still busy after `retries` polls.
    pub fn wait_not_busy(&mut self, retries: u32) -> Result<(), PdiError> {
        for _ in 0..retries {
            match self.read_nvm_status() {
                Ok(status) if status & STATUS_BUSY == 0 => return Ok(()),
                Ok(_) | Err(PdiError::Timeout) => (),
                Err(e) => return Err(e),
            }
        }
        warn!("Error: Timed out waiting for NVM controller");
        Err(PdiError::Timeout)
    }

    /// Erases the application and boot sections, and EEPROM.  The user
    /// signature row is unaffected.
    pub fn chip_erase(&mut self) -> Result<(), PdiError> {
        self.require_enabled()?;
        debug!("Exec:  Chip erase");

        self.issue_command(NvmCommand::ChipErase)?;
        self.trigger_execute()?;
        self.wait_not_busy(self.retries)?;

        debug!("OK:    Chip erased");
        Ok(())
    }

    /// Reads NVM (or data space) starting at an absolute address.
    ///
    /// Arguments:
    /// - `address`: Absolute PDI address, for example
    ///   `FLASH_BASE + 0x100`.
    /// - `buf`: Buffer to fill.  Its length is the number of bytes read.
    ///
    /// Returns:
    /// - `Ok(usize)`: The number of bytes read, always `buf.len()`.
    /// - `Err(PdiError::InvalidArgument)`: `buf` is empty.
    /// - `Err(PdiError)`: The read failed, and `buf` is zeroed.
    pub fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<usize, PdiError> {
        self.require_enabled()?;
        if buf.is_empty() {
            return Err(PdiError::InvalidArgument);
        }
        trace!("Exec:  Read {} bytes from 0x{address:08X}", buf.len());

        self.issue_command(NvmCommand::ReadNvm)?;
        self.pdi.st_ptr(address)?;
        self.pdi.ld_star_ptr_postinc(buf)
    }

    /// Loads `data` into a page buffer at an absolute address, with `command`
    /// selecting which buffer.
    ///
    /// Returns:
    /// - `Err(PdiError::InvalidArgument)`: `data` is empty.
    pub fn load_page_buffer(
        &mut self,
        command: NvmCommand,
        address: u32,
        data: &[u8],
    ) -> Result<(), PdiError> {
        if data.is_empty() {
            return Err(PdiError::InvalidArgument);
        }
        self.issue_command(command)?;
        self.pdi.st_ptr(address)?;
        self.pdi.st_star_ptr_postinc_bulk(data)
    }

    /// Erases a page buffer, with `command` selecting which.
    pub fn erase_page_buffer(&mut self, command: NvmCommand, retries: u32) -> Result<(), PdiError> {
        self.pdi.st_ptr(0)?;
        self.issue_command(command)?;
        self.trigger_execute()?;
        self.wait_not_busy(retries)
    }

    // Issues a command which is triggered by a dummy write to `address`.
    fn dummy_write_command(&mut self, command: NvmCommand, address: u32) -> Result<(), PdiError> {
        self.issue_command(command)?;
        self.pdi.st_ptr(address)?;
        self.pdi.st_star_ptr_postinc(DUMMY_BYTE)?;
        self.wait_not_busy(self.retries)
    }

    /// Programs a page of an NVM region.
    ///
    /// Arguments:
    /// - `region`: The region to program, for example [`NvmRegion::FLASH`].
    /// - `offset`: Offset of the page within the region.
    /// - `data`: Page data, up to the region's page size.  Bytes not supplied
    ///   are left erased.
    ///
    /// Returns:
    /// - `Ok(())`: The page was programmed.
    /// - `Err(PdiError::InvalidArgument)`: `data` is empty or longer than a
    ///   page, or the page doesn't fit inside the region.
    /// - `Err(PdiError::Timeout)`: The NVM controller stayed busy.
    pub fn erase_and_program(
        &mut self,
        region: &NvmRegion,
        offset: u32,
        data: &[u8],
    ) -> Result<(), PdiError> {
        self.require_enabled()?;
        if data.is_empty() || data.len() > region.page_size {
            warn!(
                "Error: Invalid {} page length {} (page size {})",
                region.name,
                data.len(),
                region.page_size
            );
            return Err(PdiError::InvalidArgument);
        }

        let Some(address) = region.absolute_range(offset, data.len()) else {
            warn!(
                "Error: Offset 0x{offset:08X} + {} outside {}",
                data.len(),
                region.name
            );
            return Err(PdiError::InvalidArgument);
        };
        debug!("Exec:  Program {} bytes of {} at 0x{address:08X}", data.len(), region.name);

        self.erase_page_buffer(region.erase_buffer, self.retries)?;
        self.load_page_buffer(region.load_buffer, address, data)?;
        if let Some(row_erase) = region.row_erase {
            self.dummy_write_command(row_erase, region.base)?;
        }
        self.dummy_write_command(region.commit, address)?;

        debug!("OK:    Programmed {} page", region.name);
        Ok(())
    }

    /// Programs a flash page.  `offset` is relative to the start of flash.
    pub fn program_flash_page(&mut self, offset: u32, data: &[u8]) -> Result<(), PdiError> {
        self.erase_and_program(&NvmRegion::FLASH, offset, data)
    }

    /// Programs an EEPROM page.  `offset` is relative to the start of EEPROM.
    pub fn program_eeprom_page(&mut self, offset: u32, data: &[u8]) -> Result<(), PdiError> {
        self.erase_and_program(&NvmRegion::EEPROM, offset, data)
    }

    /// Erases and programs the user signature row.
    pub fn program_user_signature(&mut self, offset: u32, data: &[u8]) -> Result<(), PdiError> {
        self.erase_and_program(&NvmRegion::USER_SIGNATURE, offset, data)
    }

    /// Erases the user signature row.
    pub fn erase_user_signature(&mut self) -> Result<(), PdiError> {
        self.require_enabled()?;
        debug!("Exec:  Erase user signature");
        self.dummy_write_command(NvmCommand::EraseUserSignature, NvmRegion::USER_SIGNATURE.base)
    }

    /// Writes a fuse byte.
    ///
    /// Arguments:
    /// - `index`: Fuse byte number, 0 for FUSEBYTE0.
    /// - `value`: Value to write.
    /// - `retries`: Polls of `NVM.STATUS` to wait for completion.
    pub fn write_fuse(&mut self, index: u32, value: u8, retries: u32) -> Result<(), PdiError> {
        self.require_enabled()?;
        if index as usize >= FUSE_COUNT {
            return Err(PdiError::InvalidArgument);
        }
        debug!("Exec:  Write fuse {index} = 0x{value:02X}");

        self.issue_command(NvmCommand::WriteFuse)?;
        self.pdi.sts(FUSE_BASE + index, value)?;
        self.wait_not_busy(retries)
    }

    /// Writes the lock bits.  Lock bits can only be cleared - they are set
    /// again by a chip erase.
    pub fn write_lock_bits(&mut self, value: u8, retries: u32) -> Result<(), PdiError> {
        self.require_enabled()?;
        debug!("Exec:  Write lock bits = 0x{value:02X}");

        self.issue_command(NvmCommand::WriteLockBits)?;
        self.pdi.sts(LOCK_BITS_BASE, value)?;
        self.wait_not_busy(retries)
    }

    /// Reads the device signature from `MCU.DEVID0..2`.
    pub fn read_signature(&mut self) -> Result<DeviceSignature, PdiError> {
        let mut bytes = [0u8; SIGNATURE_LEN];
        self.read_memory(DATA_BASE + MCU_DEVID_OFFSET as u32, &mut bytes)?;
        let signature = DeviceSignature::new(bytes);
        debug!("Value: Signature {signature}");
        Ok(signature)
    }

    /// Reads all fuse bytes.
    pub fn read_fuses(&mut self) -> Result<[u8; FUSE_COUNT], PdiError> {
        let mut fuses = [0u8; FUSE_COUNT];
        self.read_memory(FUSE_BASE, &mut fuses)?;
        Ok(fuses)
    }

    pub fn read_lock_bits(&mut self) -> Result<u8, PdiError> {
        let mut lock = [0u8; 1];
        self.read_memory(LOCK_BITS_BASE, &mut lock)?;
        Ok(lock[0])
    }

    /// Reads flash, `offset` relative to the start of flash.
    pub fn read_flash(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, PdiError> {
        self.read_space(Space::Flash, offset, buf)
    }

    /// Reads EEPROM, `offset` relative to the start of EEPROM.
    pub fn read_eeprom(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, PdiError> {
        self.read_space(Space::Eeprom, offset, buf)
    }

    pub fn read_user_signature(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, PdiError> {
        self.read_space(Space::UserSignature, offset, buf)
    }

    // Reads from within a single space.  A read running past the end of the
    // space is rejected, with `buf` zeroed.
    fn read_space(&mut self, space: Space, offset: u32, buf: &mut [u8]) -> Result<usize, PdiError> {
        match space.absolute_range(offset, buf.len()) {
            Some(address) => self.read_memory(address, buf),
            None => {
                warn!("Error: Offset 0x{offset:08X} + {} outside {space}", buf.len());
                buf.fill(0);
                Err(PdiError::InvalidArgument)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDelay, SimPins, SimTarget};
    use pdiprog_core::nvm::FLASH_PAGE_SIZE;

    fn nvm(target: &SimTarget) -> NvmInterface<SimPins, SimDelay> {
        let mut nvm = NvmInterface::from_pins(target.pins(), target.delay());
        nvm.set_retries(50);
        nvm
    }

    fn initialized(target: &SimTarget) -> NvmInterface<SimPins, SimDelay> {
        let mut nvm = nvm(target);
        nvm.initialize().unwrap();
        nvm
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    #[test]
    fn initialize_enables_nvm() {
        let target = SimTarget::new();
        let mut nvm = nvm(&target);
        assert_eq!(nvm.state(), NvmState::Reset);

        nvm.initialize().unwrap();
        assert_eq!(nvm.state(), NvmState::NvmEnabled);
        assert!(target.link_enabled());
        assert!(target.in_reset());
        assert!(target.nvm_enabled());
        assert_eq!(target.frame_errors(), 0);
    }

    #[test]
    fn rejected_key_times_out() {
        let target = SimTarget::new();
        target.set_reject_key(true);
        let mut nvm = nvm(&target);
        assert_eq!(nvm.initialize(), Err(PdiError::Timeout));
        assert_eq!(nvm.state(), NvmState::KeyAuthenticated);
        assert_eq!(nvm.chip_erase(), Err(PdiError::NotReady));
    }

    #[test]
    fn absent_target_times_out() {
        let target = SimTarget::new();
        target.set_responding(false);
        let mut nvm = nvm(&target);
        nvm.set_retries(3);
        assert_eq!(nvm.initialize(), Err(PdiError::Timeout));
    }

    #[test]
    fn signature() {
        let target = SimTarget::new();
        let mut nvm = initialized(&target);
        let signature = nvm.read_signature().unwrap();
        assert_eq!(signature.bytes(), [0x1E, 0x94, 0x42]);
        assert_eq!(signature.device().map(|d| d.name), Some("ATxmega16D4"));

        target.set_signature([0x1E, 0x95, 0x41]);
        assert_eq!(nvm.read_signature().unwrap().bytes(), [0x1E, 0x95, 0x41]);
    }

    #[test]
    fn operations_require_initialize() {
        let target = SimTarget::new();
        let mut nvm = nvm(&target);
        let mut buf = [0u8; 4];
        assert_eq!(nvm.read_memory(0, &mut buf), Err(PdiError::NotReady));
        assert_eq!(nvm.program_flash_page(0, &[0]), Err(PdiError::NotReady));
        assert_eq!(nvm.write_fuse(0, 0, 10), Err(PdiError::NotReady));
    }

    #[test]
    fn program_and_read_flash_page() {
        let target = SimTarget::new();
        let mut nvm = initialized(&target);
        let page = pattern(FLASH_PAGE_SIZE, 3);

        nvm.program_flash_page(0x200, &page).unwrap();
        assert_eq!(&target.flash()[0x200..0x300], &page[..]);
        assert!(target.flash()[..0x200].iter().all(|&b| b == 0xFF));
        assert!(target.flash()[0x300..].iter().all(|&b| b == 0xFF));

        let mut buf = vec![0u8; FLASH_PAGE_SIZE];
        assert_eq!(nvm.read_flash(0x200, &mut buf), Ok(FLASH_PAGE_SIZE));
        assert_eq!(buf, page);
    }

    // Start of internal SRAM on the simulated ATxmega16D4
    const SRAM_OFFSET: u32 = 0x2000;

    #[test]
    fn loaded_lengths_read_back() {
        let target = SimTarget::new();
        let mut nvm = initialized(&target);

        // Page buffers aren't readable over PDI, so the direct load and read
        // goes via SRAM, and flash is read back once committed.
        let sram = DATA_BASE + SRAM_OFFSET;
        for len in 1..=255 {
            let data = pattern(len, len as u8);

            nvm.load_page_buffer(NvmCommand::LoadFlashPageBuffer, sram, &data).unwrap();
            let mut buf = vec![0u8; len];
            assert_eq!(nvm.read_memory(sram, &mut buf), Ok(len));
            assert_eq!(buf, data, "sram length {len}");

            nvm.program_flash_page(0x400, &data).unwrap();
            buf.fill(0);
            assert_eq!(nvm.read_flash(0x400, &mut buf), Ok(len));
            assert_eq!(buf, data, "flash length {len}");
        }
        assert_eq!(
            nvm.load_page_buffer(NvmCommand::LoadFlashPageBuffer, sram, &[]),
            Err(PdiError::InvalidArgument)
        );
    }

    #[test]
    fn offsets_outside_region_rejected() {
        let target = SimTarget::new();
        let mut nvm = initialized(&target);
        let page = pattern(FLASH_PAGE_SIZE, 9);

        // Would overflow, and would land on EEPROM
        for offset in [0xFFFF_FF00, 0x000C_0000, 0x000B_FFF0] {
            assert_eq!(
                nvm.program_flash_page(offset, &page),
                Err(PdiError::InvalidArgument),
                "offset 0x{offset:08X}"
            );
            let mut buf = vec![0xAAu8; FLASH_PAGE_SIZE];
            assert_eq!(nvm.read_flash(offset, &mut buf), Err(PdiError::InvalidArgument));
            assert!(buf.iter().all(|&b| b == 0));
        }
        assert!(target.flash().iter().all(|&b| b == 0xFF));
        assert!(target.eeprom().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn partial_page_leaves_rest_erased() {
        let target = SimTarget::new();
        target.load_flash(0, &[0x00; FLASH_PAGE_SIZE]);
        let mut nvm = initialized(&target);

        nvm.program_flash_page(0, &[0x12, 0x34]).unwrap();
        let mut buf = [0u8; 4];
        nvm.read_flash(0, &mut buf).unwrap();
        assert_eq!(buf, [0x12, 0x34, 0xFF, 0xFF]);
    }

    #[test]
    fn oversized_page_rejected() {
        let target = SimTarget::new();
        let mut nvm = initialized(&target);
        let data = vec![0u8; FLASH_PAGE_SIZE + 1];
        assert_eq!(nvm.program_flash_page(0, &data), Err(PdiError::InvalidArgument));
        assert_eq!(nvm.program_flash_page(0, &[]), Err(PdiError::InvalidArgument));
    }

    #[test]
    fn chip_erase_erases_flash_and_eeprom() {
        let target = SimTarget::new();
        target.load_flash(0x100, &[0x00; 64]);
        target.load_eeprom(0, &[0x00; 16]);
        target.load_user_signature(0, &[0xA5; 4]);
        let mut nvm = initialized(&target);

        nvm.chip_erase().unwrap();
        assert!(target.flash().iter().all(|&b| b == 0xFF));
        assert!(target.eeprom().iter().all(|&b| b == 0xFF));
        assert_eq!(&target.user_signature()[..4], &[0xA5; 4]);

        let mut buf = [0u8; 16];
        nvm.read_flash(0x100, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 16]);
    }

    #[test]
    fn eeprom_page() {
        let target = SimTarget::new();
        let mut nvm = initialized(&target);
        let page = pattern(32, 9);

        nvm.program_eeprom_page(0x40, &page).unwrap();
        assert_eq!(&target.eeprom()[0x40..0x60], &page[..]);

        let mut buf = [0u8; 32];
        nvm.read_eeprom(0x40, &mut buf).unwrap();
        assert_eq!(&buf[..], &page[..]);
    }

    #[test]
    fn user_signature_is_erased_then_written() {
        let target = SimTarget::new();
        target.load_user_signature(0, &[0x0F; 8]);
        let mut nvm = initialized(&target);

        nvm.program_user_signature(0, &[0xF0, 0xF1]).unwrap();
        let mut buf = [0u8; 4];
        nvm.read_user_signature(0, &mut buf).unwrap();
        assert_eq!(buf, [0xF0, 0xF1, 0xFF, 0xFF]);

        nvm.erase_user_signature().unwrap();
        assert!(target.user_signature().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn fuses_and_lock_bits() {
        let target = SimTarget::new();
        let mut nvm = initialized(&target);

        nvm.write_fuse(2, 0xBF, 50).unwrap();
        assert_eq!(target.fuses()[2], 0xBF);
        assert_eq!(nvm.read_fuses().unwrap()[2], 0xBF);
        assert_eq!(nvm.write_fuse(7, 0x00, 50), Err(PdiError::InvalidArgument));

        nvm.write_lock_bits(0xFC, 50).unwrap();
        assert_eq!(nvm.read_lock_bits(), Ok(0xFC));
        nvm.chip_erase().unwrap();
        assert_eq!(nvm.read_lock_bits(), Ok(0xFF));
    }

    #[test]
    fn stuck_busy_times_out() {
        let target = SimTarget::new();
        let mut nvm = initialized(&target);
        target.set_stuck_busy(true);
        assert_eq!(nvm.wait_not_busy(5), Err(PdiError::Timeout));
        assert_eq!(nvm.chip_erase(), Err(PdiError::Timeout));
        target.set_stuck_busy(false);
        assert_eq!(nvm.wait_not_busy(5), Ok(()));
    }

    #[test]
    fn busy_is_polled() {
        let target = SimTarget::new();
        target.set_busy_polls(3);
        let mut nvm = initialized(&target);
        target.clear_log();
        nvm.chip_erase().unwrap();
        // CMD write, CTRLA write, 3 busy polls, 1 idle poll
        assert_eq!(target.instructions().len(), 6);
    }

    #[test]
    fn deinitialize_releases_target() {
        let target = SimTarget::new();
        let mut nvm = initialized(&target);
        nvm.deinitialize().unwrap();
        assert_eq!(nvm.state(), NvmState::Reset);
        assert!(!target.in_reset());
        assert!(!target.link_enabled());

        // Can be brought back up again
        nvm.initialize().unwrap();
        assert!(nvm.read_signature().is_ok());
    }
}
