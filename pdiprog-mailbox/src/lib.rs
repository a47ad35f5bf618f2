// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! pdiprog-mailbox - shared memory mailbox between a host and the PDI
//! coprocessor
//!
//! The mailbox is an array of 32-bit cells.  The host writes an argument
//! (and, for some commands, a page of data), then the opcode.  The
//! coprocessor executes the command, writes the result and status, clears
//! the opcode and argument, and raises a completion signal.
//!
//! ```text
//! cell   0        1        2        3        4        5 ............ 260
//!     +--------+--------+--------+--------+--------+-------------------+
//!     | opcode |  arg   | result | status |  seq   | page (1 byte/cell)|
//!     +--------+--------+--------+--------+--------+-------------------+
//! ```
//!
//! Only one command may be outstanding at a time.  The host must not write
//! the opcode cell until the previous command has completed.
//!
//! * [`dispatch::Dispatcher`] runs on the coprocessor.
//! * [`client::Client`] runs on the host.
//! * [`io::MailboxIo`] abstracts access to the cells.
//!
//! This crate is `no_std` and platform agnostic.

#![cfg_attr(not(test), no_std)]

pub mod client;
pub mod dispatch;
pub mod io;

#[doc(inline)]
pub use crate::client::{Client, CompletionWait};
#[doc(inline)]
pub use crate::dispatch::{CompletionSignal, Dispatcher};
#[doc(inline)]
pub use crate::io::{AtomicMailbox, MailboxIo, RamMailboxIo};

use core::fmt;
use serde::Serialize;
use static_assertions::const_assert_eq;

use pdiprog_core::nvm::FLASH_PAGE_SIZE;
use pdiprog_pdi::PdiError;

/// Mailbox cell indices
pub const CELL_OPCODE: usize = 0;
pub const CELL_ARG: usize = 1;
pub const CELL_RESULT: usize = 2;
pub const CELL_STATUS: usize = 3;
pub const CELL_SEQUENCE: usize = 4;
pub const CELL_PAGE: usize = 5;

/// Number of page cells, one byte per cell.
pub const PAGE_CELLS: usize = FLASH_PAGE_SIZE;

/// Total number of cells in the mailbox.
pub const MAILBOX_CELLS: usize = CELL_PAGE + PAGE_CELLS;

const_assert_eq!(MAILBOX_CELLS, 261);

/// Opcode cell value when no command is outstanding.
pub const OPCODE_IDLE: u32 = 0x00;

/// Mailbox opcodes
pub const OPCODE_ENTER_PROGMODE: u32 = 0x10;
pub const OPCODE_LEAVE_PROGMODE: u32 = 0x11;
pub const OPCODE_READ_SIGNATURE: u32 = 0x12;
pub const OPCODE_CHIP_ERASE: u32 = 0x13;
pub const OPCODE_PROGRAM_FLASH: u32 = 0x14;
pub const OPCODE_READ_FLASH: u32 = 0x15;

/// Status codes, written to [`CELL_STATUS`]
pub const STATUS_OK: u32 = 0x00;
pub const STATUS_TIMEOUT: u32 = 0x01;
pub const STATUS_FRAMING: u32 = 0x02;
pub const STATUS_INVALID_ARGUMENT: u32 = 0x03;
pub const STATUS_IO: u32 = 0x04;
pub const STATUS_UNKNOWN_OPCODE: u32 = 0x05;
pub const STATUS_NOT_READY: u32 = 0x06;
pub const STATUS_RESERVED: u32 = 0xFF;

/// Mailbox commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    EnterProgmode = OPCODE_ENTER_PROGMODE,
    LeaveProgmode = OPCODE_LEAVE_PROGMODE,
    ReadSignature = OPCODE_READ_SIGNATURE,
    ChipErase = OPCODE_CHIP_ERASE,
    ProgramFlash = OPCODE_PROGRAM_FLASH,
    ReadFlash = OPCODE_READ_FLASH,
}

impl Command {
    pub fn to_word(self) -> u32 {
        self as u32
    }

    /// Convert an opcode cell value to a `Command`
    ///
    /// Returns:
    /// - `Some(Command)`: If the opcode is recognized.
    /// - `None`: Otherwise, including for [`OPCODE_IDLE`].
    pub fn from_word(word: u32) -> Option<Self> {
        match word {
            OPCODE_ENTER_PROGMODE => Some(Self::EnterProgmode),
            OPCODE_LEAVE_PROGMODE => Some(Self::LeaveProgmode),
            OPCODE_READ_SIGNATURE => Some(Self::ReadSignature),
            OPCODE_CHIP_ERASE => Some(Self::ChipErase),
            OPCODE_PROGRAM_FLASH => Some(Self::ProgramFlash),
            OPCODE_READ_FLASH => Some(Self::ReadFlash),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::EnterProgmode => write!(f, "Enter Programming Mode"),
            Command::LeaveProgmode => write!(f, "Leave Programming Mode"),
            Command::ReadSignature => write!(f, "Read Signature"),
            Command::ChipErase => write!(f, "Chip Erase"),
            Command::ProgramFlash => write!(f, "Program Flash"),
            Command::ReadFlash => write!(f, "Read Flash"),
        }
    }
}

/// Command status, written by the coprocessor to [`CELL_STATUS`] before
/// signalling completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum StatusCode {
    Ok = STATUS_OK,
    Timeout = STATUS_TIMEOUT,
    Framing = STATUS_FRAMING,
    InvalidArgument = STATUS_INVALID_ARGUMENT,
    Io = STATUS_IO,
    UnknownOpcode = STATUS_UNKNOWN_OPCODE,
    NotReady = STATUS_NOT_READY,

    /// Never written by the coprocessor.  The host primes the status cell
    /// with this value, so it can tell if the status was not updated.
    Reserved = STATUS_RESERVED,
}

impl StatusCode {
    pub fn to_word(self) -> u32 {
        self as u32
    }

    pub fn is_ok(&self) -> bool {
        *self == StatusCode::Ok
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Timeout => "Timeout",
            StatusCode::Framing => "Framing Error",
            StatusCode::InvalidArgument => "Invalid Argument",
            StatusCode::Io => "I/O Error",
            StatusCode::UnknownOpcode => "Unknown Opcode",
            StatusCode::NotReady => "Not Ready",
            StatusCode::Reserved => "Reserved",
        }
    }
}

// Unrecognised values are treated as the status never having been written
impl From<u32> for StatusCode {
    fn from(word: u32) -> Self {
        match word {
            STATUS_OK => StatusCode::Ok,
            STATUS_TIMEOUT => StatusCode::Timeout,
            STATUS_FRAMING => StatusCode::Framing,
            STATUS_INVALID_ARGUMENT => StatusCode::InvalidArgument,
            STATUS_IO => StatusCode::Io,
            STATUS_UNKNOWN_OPCODE => StatusCode::UnknownOpcode,
            STATUS_NOT_READY => StatusCode::NotReady,
            _ => StatusCode::Reserved,
        }
    }
}

impl From<PdiError> for StatusCode {
    fn from(error: PdiError) -> Self {
        match error {
            PdiError::Timeout => StatusCode::Timeout,
            PdiError::Framing => StatusCode::Framing,
            PdiError::InvalidArgument => StatusCode::InvalidArgument,
            PdiError::Io => StatusCode::Io,
            PdiError::NotReady => StatusCode::NotReady,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors seen by the host [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    /// The completion signal wasn't raised within the client's timeout.
    Timeout,

    /// A command was already outstanding - the opcode cell was non-zero.
    Busy,

    /// The coprocessor completed the command with a failure status.
    Status(StatusCode),

    /// Completion was signalled but the opcode cell wasn't cleared.
    NotCleared,

    /// The client was called with an invalid argument.
    InvalidArgument,
}

impl MailboxError {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailboxError::Timeout => "Timeout",
            MailboxError::Busy => "Busy",
            MailboxError::Status(_) => "Command Failed",
            MailboxError::NotCleared => "Opcode Not Cleared",
            MailboxError::InvalidArgument => "Invalid Argument",
        }
    }
}

impl Serialize for MailboxError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("MailboxError", 2)?;

        match self {
            MailboxError::Timeout => {
                state.serialize_field("kind", "timeout")?;
                state.serialize_field("detail", "")?;
            }
            MailboxError::Busy => {
                state.serialize_field("kind", "busy")?;
                state.serialize_field("detail", "")?;
            }
            MailboxError::Status(status) => {
                state.serialize_field("kind", "status")?;
                state.serialize_field("detail", status.as_str())?;
            }
            MailboxError::NotCleared => {
                state.serialize_field("kind", "not cleared")?;
                state.serialize_field("detail", "")?;
            }
            MailboxError::InvalidArgument => {
                state.serialize_field("kind", "invalid argument")?;
                state.serialize_field("detail", "")?;
            }
        }
        state.end()
    }
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxError::Status(status) => write!(f, "{}: {status}", self.as_str()),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

impl From<StatusCode> for MailboxError {
    fn from(status: StatusCode) -> Self {
        MailboxError::Status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands() {
        assert_eq!(Command::from_word(0x12), Some(Command::ReadSignature));
        assert_eq!(Command::from_word(OPCODE_IDLE), None);
        assert_eq!(Command::from_word(0x16), None);
        assert_eq!(Command::ReadFlash.to_word(), 0x15);
        assert_eq!(format!("{}", Command::ChipErase), "Chip Erase");
    }

    #[test]
    fn status_codes() {
        assert_eq!(StatusCode::from(PdiError::Timeout), StatusCode::Timeout);
        assert_eq!(StatusCode::from(PdiError::NotReady).to_word(), 6);
        assert_eq!(StatusCode::from(STATUS_FRAMING), StatusCode::Framing);
        assert_eq!(StatusCode::from(0x1234), StatusCode::Reserved);
        assert!(StatusCode::Ok.is_ok());
    }

    #[test]
    fn error_display() {
        let err = MailboxError::from(StatusCode::Timeout);
        assert_eq!(format!("{err}"), "Command Failed: Timeout");
        assert_eq!(format!("{}", MailboxError::Busy), "Busy");
    }
}
