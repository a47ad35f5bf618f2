// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Coprocessor side of the mailbox
//!
//! [`Dispatcher`] polls the opcode cell, runs the command against an
//! [`NvmInterface`], writes the result, status and sequence cells, clears
//! the opcode and argument cells and raises the completion signal.
//!
//! Completion is always signalled, whatever the outcome.  Failures are
//! reported via the status cell.

use core::result::Result;
use embedded_hal::delay::DelayNs;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use pdiprog_core::SIGNATURE_LEN;
use pdiprog_core::nvm::{FLASH_PAGE_SIZE, NvmRegion};
use pdiprog_pdi::protocol::PdiPins;
use pdiprog_pdi::{NvmInterface, PdiError};

use crate::io::MailboxIo;
use crate::{
    CELL_ARG, CELL_OPCODE, CELL_PAGE, CELL_RESULT, CELL_SEQUENCE, CELL_STATUS, Command,
    OPCODE_IDLE, PAGE_CELLS, StatusCode,
};

/// Raises the completion signal to the host, for example an interrupt line
/// or an async signal.
pub trait CompletionSignal {
    fn raise(&self);
}

impl<T: CompletionSignal + ?Sized> CompletionSignal for &T {
    fn raise(&self) {
        (**self).raise()
    }
}

// Flash is read in two halves, re-initializing before each
const READ_FLASH_CHUNK: usize = FLASH_PAGE_SIZE / 2;

/// Mailbox dispatcher
///
/// ```rust,ignore
/// let nvm = NvmInterface::from_pins(pins, delay);
/// let mut dispatcher = Dispatcher::new(nvm, &MAILBOX, &COMPLETION);
/// dispatcher.run();
/// ```
#[derive(Debug)]
pub struct Dispatcher<P, D, M, S> {
    nvm: NvmInterface<P, D>,
    mailbox: M,
    signal: S,
    // Set by a successful READ_SIGNATURE of byte 0
    signature: Option<[u8; SIGNATURE_LEN]>,
    sequence: u32,
}

impl<P, D, M, S> Dispatcher<P, D, M, S>
where
    P: PdiPins,
    D: DelayNs,
    M: MailboxIo,
    S: CompletionSignal,
{
    /// Creates the dispatcher, and resets the mailbox's sequence counter.
    pub fn new(nvm: NvmInterface<P, D>, mailbox: M, signal: S) -> Self {
        mailbox.write_cell(CELL_SEQUENCE, 0);
        Self {
            nvm,
            mailbox,
            signal,
            signature: None,
            sequence: 0,
        }
    }

    pub fn nvm(&mut self) -> &mut NvmInterface<P, D> {
        &mut self.nvm
    }

    pub fn mailbox(&self) -> &M {
        &self.mailbox
    }

    /// Number of commands completed.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Checks for and executes a single command.
    ///
    /// Returns:
    /// - `None`: No command was outstanding.
    /// - `Some(StatusCode)`: A command was executed and completion signalled,
    ///   with this status.
    pub fn poll(&mut self) -> Option<StatusCode> {
        let opcode = self.mailbox.read_cell(CELL_OPCODE);
        if opcode == OPCODE_IDLE {
            return None;
        }
        let arg = self.mailbox.read_cell(CELL_ARG);

        let (result, status) = match Command::from_word(opcode) {
            Some(command) => {
                debug!("Exec:  {command} arg 0x{arg:08X}");
                match self.execute(command, arg) {
                    Ok(result) => {
                        debug!("OK:    {command} result 0x{result:08X}");
                        (result, StatusCode::Ok)
                    }
                    Err(status) => {
                        warn!("Error: {command} failed: {status}");
                        (0, status)
                    }
                }
            }
            None => {
                warn!("Error: Unknown mailbox opcode 0x{opcode:08X}");
                (0, StatusCode::UnknownOpcode)
            }
        };

        self.complete(result, status);
        Some(status)
    }

    /// Polls for commands forever.
    pub fn run(&mut self) -> ! {
        info!("Mailbox dispatcher running");
        loop {
            if self.poll().is_none() {
                core::hint::spin_loop();
            }
        }
    }

    fn complete(&mut self, result: u32, status: StatusCode) {
        self.sequence = self.sequence.wrapping_add(1);

        self.mailbox.write_cell(CELL_RESULT, result);
        self.mailbox.write_cell(CELL_STATUS, status.to_word());
        self.mailbox.write_cell(CELL_SEQUENCE, self.sequence);
        self.mailbox.write_cell(CELL_ARG, 0);
        self.mailbox.write_cell(CELL_OPCODE, OPCODE_IDLE);

        self.signal.raise();
    }

    fn execute(&mut self, command: Command, arg: u32) -> Result<u32, StatusCode> {
        match command {
            Command::EnterProgmode => {
                self.nvm.initialize()?;
                Ok(0)
            }
            Command::LeaveProgmode => {
                self.nvm.deinitialize()?;
                Ok(0)
            }
            Command::ReadSignature => self.read_signature(arg),
            Command::ChipErase => {
                if !self.nvm.is_enabled() {
                    self.nvm.initialize()?;
                }
                self.nvm.chip_erase()?;
                Ok(0)
            }
            Command::ProgramFlash => self.program_flash(arg),
            Command::ReadFlash => self.read_flash(arg),
        }
    }

    fn read_signature(&mut self, index: u32) -> Result<u32, StatusCode> {
        match index {
            0 => {
                self.signature = None;
                self.nvm.initialize()?;
                let bytes = self.nvm.read_signature()?.bytes();
                self.signature = Some(bytes);
                Ok(bytes[0] as u32)
            }
            1 | 2 => match self.signature {
                Some(bytes) => Ok(bytes[index as usize] as u32),
                None => {
                    warn!("Error: Signature byte {index} requested before byte 0");
                    Err(StatusCode::NotReady)
                }
            },
            _ => Err(StatusCode::InvalidArgument),
        }
    }

    fn program_flash(&mut self, offset: u32) -> Result<u32, StatusCode> {
        if offset as usize % FLASH_PAGE_SIZE != 0 {
            return Err(StatusCode::InvalidArgument);
        }
        check_flash_page(offset)?;

        let mut page = [0u8; FLASH_PAGE_SIZE];
        for (ii, byte) in page.iter_mut().enumerate() {
            *byte = self.mailbox.read_cell(CELL_PAGE + ii) as u8;
        }

        self.nvm.initialize()?;
        self.nvm.program_flash_page(offset, &page)?;
        Ok(0)
    }

    fn read_flash(&mut self, offset: u32) -> Result<u32, StatusCode> {
        for ii in 0..PAGE_CELLS {
            self.mailbox.write_cell(CELL_PAGE + ii, 0);
        }

        check_flash_page(offset)?;

        let mut page = [0u8; FLASH_PAGE_SIZE];
        let result = self.read_flash_halves(offset, &mut page);
        self.nvm.disable();
        result?;

        for (ii, &byte) in page.iter().enumerate() {
            self.mailbox.write_cell(CELL_PAGE + ii, byte as u32);
        }
        Ok(0)
    }

    fn read_flash_halves(&mut self, offset: u32, page: &mut [u8]) -> Result<(), PdiError> {
        for (ii, chunk) in page.chunks_mut(READ_FLASH_CHUNK).enumerate() {
            self.nvm.initialize()?;
            // In range, as the whole page was checked first
            let chunk_offset = offset + (ii * READ_FLASH_CHUNK) as u32;
            self.nvm.read_flash(chunk_offset, chunk)?;
        }
        Ok(())
    }
}

// A whole page from `offset` must lie inside flash.
fn check_flash_page(offset: u32) -> Result<(), StatusCode> {
    match NvmRegion::FLASH.absolute_range(offset, FLASH_PAGE_SIZE) {
        Some(_) => Ok(()),
        None => {
            warn!("Error: Flash offset 0x{offset:08X} out of range");
            Err(StatusCode::InvalidArgument)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::AtomicMailbox;
    use core::cell::Cell;
    use pdiprog_pdi::sim::{SimDelay, SimPins, SimTarget};

    #[derive(Debug, Default)]
    pub(crate) struct CountingSignal {
        pub(crate) raised: Cell<u32>,
    }

    impl CompletionSignal for CountingSignal {
        fn raise(&self) {
            self.raised.set(self.raised.get() + 1);
        }
    }

    pub(crate) type SimDispatcher<'a> =
        Dispatcher<SimPins, SimDelay, &'a AtomicMailbox, &'a CountingSignal>;

    pub(crate) fn dispatcher<'a>(
        target: &SimTarget,
        mailbox: &'a AtomicMailbox,
        signal: &'a CountingSignal,
    ) -> SimDispatcher<'a> {
        let mut nvm = NvmInterface::from_pins(target.pins(), target.delay());
        nvm.set_retries(50);
        Dispatcher::new(nvm, mailbox, signal)
    }

    fn issue(mailbox: &AtomicMailbox, opcode: u32, arg: u32) {
        mailbox.write_cell(CELL_ARG, arg);
        mailbox.write_cell(CELL_OPCODE, opcode);
    }

    fn status(mailbox: &AtomicMailbox) -> StatusCode {
        StatusCode::from(mailbox.read_cell(CELL_STATUS))
    }

    #[test]
    fn idle_does_nothing() {
        let target = SimTarget::new();
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);
        assert_eq!(dispatcher.poll(), None);
        assert_eq!(signal.raised.get(), 0);
        assert!(!target.link_enabled());
    }

    #[test]
    fn read_signature_bytes() {
        let target = SimTarget::new();
        target.set_signature([0x1E, 0x94, 0x41]);
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);

        let mut signature = [0u8; 3];
        for index in 0..3 {
            issue(&mailbox, crate::OPCODE_READ_SIGNATURE, index);
            assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));
            assert_eq!(mailbox.read_cell(CELL_OPCODE), 0);
            assert_eq!(mailbox.read_cell(CELL_ARG), 0);
            signature[index as usize] = mailbox.read_cell(CELL_RESULT) as u8;
        }
        assert_eq!(signature, [0x1E, 0x94, 0x41]);
        assert_eq!(signal.raised.get(), 3);
        assert_eq!(mailbox.read_cell(CELL_SEQUENCE), 3);

        issue(&mailbox, crate::OPCODE_READ_SIGNATURE, 3);
        assert_eq!(dispatcher.poll(), Some(StatusCode::InvalidArgument));
        assert_eq!(status(&mailbox), StatusCode::InvalidArgument);
        assert_eq!(mailbox.read_cell(CELL_OPCODE), 0);
    }

    #[test]
    fn signature_bytes_need_byte_zero_first() {
        let target = SimTarget::new();
        target.set_signature([0x1E, 0x94, 0x41]);
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);

        for index in 1..3 {
            issue(&mailbox, crate::OPCODE_READ_SIGNATURE, index);
            assert_eq!(dispatcher.poll(), Some(StatusCode::NotReady));
            assert_eq!(mailbox.read_cell(CELL_RESULT), 0);
            assert_eq!(mailbox.read_cell(CELL_OPCODE), 0);
        }
        assert_eq!(signal.raised.get(), 2);

        issue(&mailbox, crate::OPCODE_READ_SIGNATURE, 0);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));
        issue(&mailbox, crate::OPCODE_READ_SIGNATURE, 1);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));
        assert_eq!(mailbox.read_cell(CELL_RESULT), 0x94);
    }

    #[test]
    fn failed_signature_read_clears_cached_bytes() {
        let target = SimTarget::new();
        target.set_signature([0x1E, 0x94, 0x41]);
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);
        dispatcher.nvm().set_retries(3);

        issue(&mailbox, crate::OPCODE_READ_SIGNATURE, 0);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));

        target.set_responding(false);
        issue(&mailbox, crate::OPCODE_READ_SIGNATURE, 0);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Timeout));
        issue(&mailbox, crate::OPCODE_READ_SIGNATURE, 2);
        assert_eq!(dispatcher.poll(), Some(StatusCode::NotReady));
        assert_eq!(mailbox.read_cell(CELL_RESULT), 0);
    }

    #[test]
    fn unknown_opcode_still_completes() {
        let target = SimTarget::new();
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);

        issue(&mailbox, 0x42, 7);
        assert_eq!(dispatcher.poll(), Some(StatusCode::UnknownOpcode));
        assert_eq!(mailbox.read_cell(CELL_OPCODE), 0);
        assert_eq!(mailbox.read_cell(CELL_ARG), 0);
        assert_eq!(signal.raised.get(), 1);
        assert!(target.instructions().is_empty());
    }

    #[test]
    fn silent_target_reports_timeout() {
        let target = SimTarget::new();
        target.set_responding(false);
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);
        dispatcher.nvm().set_retries(3);

        issue(&mailbox, crate::OPCODE_READ_SIGNATURE, 0);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Timeout));
        assert_eq!(status(&mailbox), StatusCode::Timeout);
        assert_eq!(mailbox.read_cell(CELL_RESULT), 0);
        assert_eq!(mailbox.read_cell(CELL_OPCODE), 0);
        assert_eq!(signal.raised.get(), 1);
    }

    #[test]
    fn program_then_read_flash() {
        let target = SimTarget::new();
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);

        for ii in 0..PAGE_CELLS {
            mailbox.write_cell(CELL_PAGE + ii, (ii as u32 * 3) & 0xFF);
        }
        issue(&mailbox, crate::OPCODE_PROGRAM_FLASH, 0x100);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));
        assert_eq!(target.flash()[0x100 + 10], 30);

        mailbox.write_cells(CELL_PAGE, &[0xAA; PAGE_CELLS]);
        issue(&mailbox, crate::OPCODE_READ_FLASH, 0x100);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));
        for ii in 0..PAGE_CELLS {
            assert_eq!(mailbox.read_cell(CELL_PAGE + ii), (ii as u32 * 3) & 0xFF);
        }
        assert!(!target.link_enabled());
    }

    #[test]
    fn failed_read_flash_leaves_zeroed_page() {
        let target = SimTarget::new();
        target.set_responding(false);
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);
        dispatcher.nvm().set_retries(3);

        mailbox.write_cells(CELL_PAGE, &[0xAA; PAGE_CELLS]);
        issue(&mailbox, crate::OPCODE_READ_FLASH, 0);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Timeout));
        for ii in 0..PAGE_CELLS {
            assert_eq!(mailbox.read_cell(CELL_PAGE + ii), 0);
        }
    }

    #[test]
    fn unaligned_program_rejected() {
        let target = SimTarget::new();
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);

        issue(&mailbox, crate::OPCODE_PROGRAM_FLASH, 0x80);
        assert_eq!(dispatcher.poll(), Some(StatusCode::InvalidArgument));
    }

    #[test]
    fn program_flash_offset_outside_flash_rejected() {
        let target = SimTarget::new();
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);
        mailbox.write_cells(CELL_PAGE, &[0x00; PAGE_CELLS]);

        // Overflows the address, then lands on EEPROM
        for offset in [0xFFFF_FF00, 0x000C_0000] {
            issue(&mailbox, crate::OPCODE_PROGRAM_FLASH, offset);
            assert_eq!(dispatcher.poll(), Some(StatusCode::InvalidArgument));
            assert_eq!(status(&mailbox), StatusCode::InvalidArgument);
            assert_eq!(mailbox.read_cell(CELL_OPCODE), 0);
        }
        assert_eq!(signal.raised.get(), 2);
        assert!(target.instructions().is_empty());
        assert!(target.flash().iter().all(|&b| b == 0xFF));
        assert!(target.eeprom().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn read_flash_offset_outside_flash_rejected() {
        let target = SimTarget::new();
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);

        // Overflows the address, lands on EEPROM, then runs past the end
        for offset in [0xFFFF_FF00, 0x000C_0000, 0x000B_FF80] {
            mailbox.write_cells(CELL_PAGE, &[0xAA; PAGE_CELLS]);
            issue(&mailbox, crate::OPCODE_READ_FLASH, offset);
            assert_eq!(dispatcher.poll(), Some(StatusCode::InvalidArgument));
            assert_eq!(mailbox.read_cell(CELL_OPCODE), 0);

            let mut page = [0xAAu32; PAGE_CELLS];
            mailbox.read_cells(CELL_PAGE, &mut page);
            assert_eq!(page, [0; PAGE_CELLS]);
        }
        assert!(target.instructions().is_empty());
    }

    #[test]
    fn chip_erase_initializes_if_needed() {
        let target = SimTarget::new();
        target.load_flash(0, &[0x00; 16]);
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);

        issue(&mailbox, crate::OPCODE_CHIP_ERASE, 0);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));
        assert!(target.flash().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn chip_erase_then_read_flash_is_blank() {
        let target = SimTarget::new();
        target.load_flash(0, &[0x5A; FLASH_PAGE_SIZE]);
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);

        issue(&mailbox, crate::OPCODE_CHIP_ERASE, 0);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));
        issue(&mailbox, crate::OPCODE_READ_FLASH, 0);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));

        let mut page = [0u32; PAGE_CELLS];
        mailbox.read_cells(CELL_PAGE, &mut page);
        assert_eq!(page, [0xFF; PAGE_CELLS]);
        assert_eq!(mailbox.read_cell(CELL_OPCODE), 0);
    }

    #[test]
    fn enter_and_leave_progmode() {
        let target = SimTarget::new();
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let mut dispatcher = dispatcher(&target, &mailbox, &signal);

        issue(&mailbox, crate::OPCODE_ENTER_PROGMODE, 0);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));
        assert!(target.nvm_enabled());
        assert!(target.in_reset());

        issue(&mailbox, crate::OPCODE_LEAVE_PROGMODE, 0);
        assert_eq!(dispatcher.poll(), Some(StatusCode::Ok));
        assert!(!target.link_enabled());
        assert!(!target.in_reset());
        assert_eq!(dispatcher.sequence(), 2);
    }
}
