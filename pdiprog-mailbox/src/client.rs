// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Host side of the mailbox
//!
//! [`Client`] issues commands to the coprocessor and waits for them to
//! complete.  It is runtime agnostic - the application supplies a
//! [`CompletionWait`] implementation for its executor and completion signal.
//!
//! ```rust,ignore
//! let mut client = Client::new(&MAILBOX, &COMPLETION);
//! let signature = client.read_signature().await?;
//! info!("Value: Signature {signature}");
//! ```

use core::result::Result;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use pdiprog_core::{DeviceSignature, SIGNATURE_LEN};

use crate::io::MailboxIo;
use crate::{
    CELL_ARG, CELL_OPCODE, CELL_PAGE, CELL_RESULT, CELL_SEQUENCE, CELL_STATUS, Command,
    MailboxError, OPCODE_IDLE, PAGE_CELLS, STATUS_RESERVED, StatusCode,
};

/// Default time to wait for each command to complete.  Long enough for a
/// chip erase.
pub const DEFAULT_TIMEOUT_MS: u32 = 5_000;

/// Waits for the coprocessor's completion signal.
#[allow(async_fn_in_trait)]
pub trait CompletionWait {
    /// Clears any completion already signalled.
    fn reset(&self);

    /// Waits up to `timeout_ms` for completion to be signalled, clearing it
    /// again before returning.
    ///
    /// Returns:
    /// - `true`: Completion was signalled.
    /// - `false`: Timed out.
    async fn wait(&self, timeout_ms: u32) -> bool;
}

impl<T: CompletionWait> CompletionWait for &T {
    fn reset(&self) {
        (**self).reset()
    }

    async fn wait(&self, timeout_ms: u32) -> bool {
        (**self).wait(timeout_ms).await
    }
}

/// Mailbox client
#[derive(Debug)]
pub struct Client<M, W> {
    mailbox: M,
    completion: W,
    timeout_ms: u32,
}

impl<M: MailboxIo, W: CompletionWait> Client<M, W> {
    pub fn new(mailbox: M, completion: W) -> Self {
        Self {
            mailbox,
            completion,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    /// Number of commands the coprocessor has completed.
    pub fn sequence(&self) -> u32 {
        self.mailbox.read_cell(CELL_SEQUENCE)
    }

    /// Issues a raw opcode and waits for it to complete.
    ///
    /// Arguments:
    /// - `opcode`: Value for the opcode cell.  Must be non-zero.
    /// - `arg`: Value for the argument cell.
    ///
    /// Returns:
    /// - `Ok(u32)`: The result cell.
    /// - `Err(MailboxError::Busy)`: A command was already outstanding.
    /// - `Err(MailboxError::Timeout)`: Completion wasn't signalled in time.
    ///   The command may still be outstanding.
    /// - `Err(MailboxError::NotCleared)`: Completion was signalled, but the
    ///   opcode cell wasn't cleared.
    /// - `Err(MailboxError::Status)`: The command failed.
    pub async fn execute_raw(&mut self, opcode: u32, arg: u32) -> Result<u32, MailboxError> {
        if opcode == OPCODE_IDLE {
            return Err(MailboxError::InvalidArgument);
        }
        if self.mailbox.read_cell(CELL_OPCODE) != OPCODE_IDLE {
            warn!("Error: Mailbox busy, can't issue 0x{opcode:02X}");
            return Err(MailboxError::Busy);
        }

        self.completion.reset();
        self.mailbox.write_cell(CELL_STATUS, STATUS_RESERVED);
        self.mailbox.write_cell(CELL_ARG, arg);
        self.mailbox.write_cell(CELL_OPCODE, opcode);

        if !self.completion.wait(self.timeout_ms).await {
            warn!("Error: Timed out waiting for opcode 0x{opcode:02X}");
            return Err(MailboxError::Timeout);
        }
        if self.mailbox.read_cell(CELL_OPCODE) != OPCODE_IDLE {
            warn!("Error: Opcode 0x{opcode:02X} not cleared on completion");
            return Err(MailboxError::NotCleared);
        }

        match StatusCode::from(self.mailbox.read_cell(CELL_STATUS)) {
            StatusCode::Ok => Ok(self.mailbox.read_cell(CELL_RESULT)),
            status => Err(MailboxError::Status(status)),
        }
    }

    /// Issues a command and waits for it to complete.
    pub async fn execute(&mut self, command: Command, arg: u32) -> Result<u32, MailboxError> {
        trace!("Exec:  {command} arg 0x{arg:08X}");
        self.execute_raw(command.to_word(), arg).await
    }

    pub async fn enter_progmode(&mut self) -> Result<(), MailboxError> {
        self.execute(Command::EnterProgmode, 0).await.map(|_| ())
    }

    pub async fn leave_progmode(&mut self) -> Result<(), MailboxError> {
        self.execute(Command::LeaveProgmode, 0).await.map(|_| ())
    }

    /// Reads one signature byte.  Byte 0 must be read first - it reads the
    /// signature from the target, and bytes 1 and 2 are returned from what
    /// was read then.
    pub async fn read_signature_byte(&mut self, index: u32) -> Result<u8, MailboxError> {
        self.execute(Command::ReadSignature, index)
            .await
            .map(|word| word as u8)
    }

    /// Reads the target's 3 byte signature.
    pub async fn read_signature(&mut self) -> Result<DeviceSignature, MailboxError> {
        let mut bytes = [0u8; SIGNATURE_LEN];
        for (ii, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read_signature_byte(ii as u32).await?;
        }
        let signature = DeviceSignature::new(bytes);
        debug!("Value: Signature {signature}");
        Ok(signature)
    }

    pub async fn chip_erase(&mut self) -> Result<(), MailboxError> {
        self.execute(Command::ChipErase, 0).await.map(|_| ())
    }

    /// Programs a flash page.
    ///
    /// Arguments:
    /// - `offset`: Page offset from the start of flash.
    /// - `data`: Up to a page of data.  The remainder of the page is left
    ///   erased.
    pub async fn program_flash(&mut self, offset: u32, data: &[u8]) -> Result<(), MailboxError> {
        if data.is_empty() || data.len() > PAGE_CELLS {
            return Err(MailboxError::InvalidArgument);
        }
        for ii in 0..PAGE_CELLS {
            let byte = data.get(ii).copied().unwrap_or(0xFF);
            self.mailbox.write_cell(CELL_PAGE + ii, byte as u32);
        }
        self.execute(Command::ProgramFlash, offset).await.map(|_| ())
    }

    /// Reads a page of flash.
    ///
    /// Arguments:
    /// - `offset`: Offset from the start of flash.
    /// - `buf`: Receives the first `buf.len()` bytes of the page.
    pub async fn read_flash(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, MailboxError> {
        if buf.is_empty() || buf.len() > PAGE_CELLS {
            return Err(MailboxError::InvalidArgument);
        }
        self.execute(Command::ReadFlash, offset).await?;
        for (ii, byte) in buf.iter_mut().enumerate() {
            *byte = self.mailbox.read_cell(CELL_PAGE + ii) as u8;
        }
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{CountingSignal, SimDispatcher, dispatcher};
    use crate::io::AtomicMailbox;
    use core::cell::RefCell;
    use embassy_futures::block_on;
    use pdiprog_pdi::sim::SimTarget;

    // Runs the dispatcher when the client waits, standing in for the
    // coprocessor
    struct InlineCoprocessor<'a> {
        dispatcher: RefCell<SimDispatcher<'a>>,
        signal: &'a CountingSignal,
    }

    impl CompletionWait for InlineCoprocessor<'_> {
        fn reset(&self) {
            self.signal.raised.set(0);
        }

        async fn wait(&self, _timeout_ms: u32) -> bool {
            self.dispatcher.borrow_mut().poll();
            let raised = self.signal.raised.get() > 0;
            self.signal.raised.set(0);
            raised
        }
    }

    // A coprocessor which never completes
    struct Absent;

    impl CompletionWait for Absent {
        fn reset(&self) {}

        async fn wait(&self, _timeout_ms: u32) -> bool {
            false
        }
    }

    // Signals completion without touching the mailbox
    struct Spurious;

    impl CompletionWait for Spurious {
        fn reset(&self) {}

        async fn wait(&self, _timeout_ms: u32) -> bool {
            true
        }
    }

    fn coprocessor<'a>(
        target: &SimTarget,
        mailbox: &'a AtomicMailbox,
        signal: &'a CountingSignal,
    ) -> InlineCoprocessor<'a> {
        InlineCoprocessor {
            dispatcher: RefCell::new(dispatcher(target, mailbox, signal)),
            signal,
        }
    }

    #[test]
    fn signature_via_mailbox() {
        let target = SimTarget::new();
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let coprocessor = coprocessor(&target, &mailbox, &signal);
        let mut client = Client::new(&mailbox, &coprocessor);

        let signature = block_on(client.read_signature()).unwrap();
        assert_eq!(signature.bytes(), [0x1E, 0x94, 0x42]);
        assert_eq!(client.sequence(), 3);
        assert_eq!(mailbox.read_cell(CELL_OPCODE), 0);

        let result = block_on(client.read_signature_byte(5));
        assert_eq!(
            result,
            Err(MailboxError::Status(StatusCode::InvalidArgument))
        );
    }

    #[test]
    fn flash_round_trip() {
        let target = SimTarget::new();
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let coprocessor = coprocessor(&target, &mailbox, &signal);
        let mut client = Client::new(&mailbox, &coprocessor);

        block_on(client.enter_progmode()).unwrap();
        block_on(client.chip_erase()).unwrap();
        block_on(client.program_flash(0x200, &[0xDE, 0xAD, 0xBE, 0xEF])).unwrap();

        let mut buf = [0u8; 6];
        assert_eq!(block_on(client.read_flash(0x200, &mut buf)), Ok(6));
        assert_eq!(buf, [0xDE, 0xAD, 0xBE, 0xEF, 0xFF, 0xFF]);
        block_on(client.leave_progmode()).unwrap();
        assert!(!target.link_enabled());
    }

    #[test]
    fn unknown_opcode() {
        let target = SimTarget::new();
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let coprocessor = coprocessor(&target, &mailbox, &signal);
        let mut client = Client::new(&mailbox, &coprocessor);

        assert_eq!(
            block_on(client.execute_raw(0x99, 0)),
            Err(MailboxError::Status(StatusCode::UnknownOpcode))
        );
        assert_eq!(
            block_on(client.execute_raw(OPCODE_IDLE, 0)),
            Err(MailboxError::InvalidArgument)
        );
    }

    #[test]
    fn target_not_responding() {
        let target = SimTarget::new();
        target.set_responding(false);
        let mailbox = AtomicMailbox::new();
        let signal = CountingSignal::default();
        let coprocessor = coprocessor(&target, &mailbox, &signal);
        coprocessor.dispatcher.borrow_mut().nvm().set_retries(3);
        let mut client = Client::new(&mailbox, &coprocessor);

        assert_eq!(
            block_on(client.read_signature()),
            Err(MailboxError::Status(StatusCode::Timeout))
        );
        assert_eq!(mailbox.read_cell(CELL_OPCODE), 0);
    }

    #[test]
    fn invalid_page_lengths() {
        let mailbox = AtomicMailbox::new();
        let mut client = Client::new(&mailbox, Absent);
        assert_eq!(
            block_on(client.program_flash(0, &[])),
            Err(MailboxError::InvalidArgument)
        );
        let mut buf = [0u8; PAGE_CELLS + 1];
        assert_eq!(
            block_on(client.read_flash(0, &mut buf)),
            Err(MailboxError::InvalidArgument)
        );
    }

    #[test]
    fn timeout_then_busy() {
        let mailbox = AtomicMailbox::new();
        let mut client = Client::new(&mailbox, Absent);
        client.set_timeout_ms(10);
        assert_eq!(block_on(client.chip_erase()), Err(MailboxError::Timeout));
        assert_eq!(
            mailbox.read_cell(CELL_OPCODE),
            Command::ChipErase.to_word()
        );
        assert_eq!(block_on(client.chip_erase()), Err(MailboxError::Busy));
    }

    #[test]
    fn completion_without_clearing() {
        let mailbox = AtomicMailbox::new();
        let mut client = Client::new(&mailbox, Spurious);
        assert_eq!(
            block_on(client.enter_progmode()),
            Err(MailboxError::NotCleared)
        );
    }

    // Clears the opcode cell without writing a status
    struct NoStatus<'a>(&'a AtomicMailbox);

    impl CompletionWait for NoStatus<'_> {
        fn reset(&self) {}

        async fn wait(&self, _timeout_ms: u32) -> bool {
            self.0.write_cell(CELL_OPCODE, OPCODE_IDLE);
            true
        }
    }

    #[test]
    fn missing_status_detected() {
        let mailbox = AtomicMailbox::new();
        mailbox.write_cell(CELL_STATUS, 0);
        let mut client = Client::new(&mailbox, NoStatus(&mailbox));
        assert_eq!(
            block_on(client.chip_erase()),
            Err(MailboxError::Status(StatusCode::Reserved))
        );
    }
}
