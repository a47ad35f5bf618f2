// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! pdiprog-pdi library
//!
//! AVR XMEGA Program and Debug Interface (PDI) implementation.
//!
//! This can be used to read, erase and program the flash, EEPROM, user
//! signature row and fuses of XMEGA devices, by bit-banging PDI from a
//! microcontroller's GPIO pins.
//!
//! It is `no_std`, does not require an allocator and is platform agnostic.
//! Pin access is supplied by an implementation of [`PdiPins`] and timing by
//! an [`embedded_hal::delay::DelayNs`] implementation.
//!
//! The following diagram shows the key `pdiprog-pdi` concepts.
//!
//! ```text
//!   Mailbox dispatcher   |
//! ----------------------
//!      NvmInterface       \
//! ----------------------   \
//!      PdiInterface         |--  PdiError
//! ----------------------   /
//!      PdiProtocol        /                          e.g. ATxmega16D4
//! ----------------------                            -----------------
//!       PdiPins         >========================<      PDI Target
//!                          PDI_CLK/PDI_DATA/GND
//! ```
//!
//! * [`NvmInterface`] provides the highest-level interface, performing
//!   complete NVM operations such as erasing the chip or programming a page.
//! * [`PdiInterface`] provides a lower-level interface to issue individual
//!   PDI instructions.
//! * [`PdiProtocol`] implements the PDI wire protocol through bit-banging.
//!
//! Most applications should use [`NvmInterface`].
//!
//! With the `sim` feature, [`sim`] provides a bit-level simulated XMEGA
//! target, implementing [`PdiPins`], which can be used to test code built on
//! this crate without hardware.

#![cfg_attr(not(any(test, feature = "sim")), no_std)]

pub mod interface;
pub mod nvm;
pub mod protocol;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[doc(inline)]
pub use crate::interface::PdiInterface;
#[doc(inline)]
pub use crate::nvm::NvmInterface;
#[doc(inline)]
pub use crate::protocol::{PdiPins, PdiProtocol};

use core::fmt;
use serde::Serialize;

/// Core error type used by all pdiprog-pdi objects
///
/// Methods are provided to make it easier to handle errors, by checking if
/// either a retry or a re-initialization is required:
///
/// - [`PdiError::requires_retry()`]
/// - [`PdiError::requires_reset()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdiError {
    /// A bounded wait ran out of retries.  This covers waiting for a start
    /// bit from the target, waiting for the NVM controller to be enabled
    /// after sending the key, and waiting for the NVM controller to go idle.
    ///
    /// A timeout waiting for a start bit usually means the target isn't
    /// connected, isn't powered, or the PDI link has not been enabled.
    Timeout,

    /// A byte was received with a bad parity bit or stop bits.  The data
    /// cannot be trusted, and the PDI link is likely out of sync.
    ///
    /// A significant number of framing errors suggest either:
    /// - A noise issue on the PDI lines
    /// - Running PDI too fast for the lines or target
    ///
    /// To recover, re-initialize using [`NvmInterface::initialize()`].
    Framing,

    /// The API was called incorrectly, for example an empty buffer was
    /// passed to a page buffer load.
    InvalidArgument,

    /// The pin implementation reported a failure while driving the lines.
    Io,

    /// The target is not in the required state for the operation.  Normally
    /// this means [`NvmInterface::initialize()`] has not been called.
    NotReady,
}

impl PdiError {
    /// Returns true if the error requires the link to be re-enabled, and the
    /// NVM controller re-initialized, to recover.
    pub fn requires_reset(&self) -> bool {
        matches!(self, PdiError::Framing | PdiError::Io | PdiError::NotReady)
    }

    /// Returns true if the error is transient and the operation can be
    /// retried.
    pub fn requires_retry(&self) -> bool {
        matches!(self, PdiError::Timeout)
    }

    /// Returns true if the error requires neither a reset nor retry to
    /// recover.  This means the API was used incorrectly.
    pub fn requires_other(&self) -> bool {
        !self.requires_reset() && !self.requires_retry()
    }

    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            PdiError::Timeout => "Timeout",
            PdiError::Framing => "Framing Error",
            PdiError::InvalidArgument => "Invalid Argument",
            PdiError::Io => "I/O Error",
            PdiError::NotReady => "Not Ready",
        }
    }
}

impl Serialize for PdiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("PdiError", 2)?;

        let kind = match self {
            PdiError::Timeout => "timeout",
            PdiError::Framing => "framing",
            PdiError::InvalidArgument => "invalid argument",
            PdiError::Io => "io",
            PdiError::NotReady => "not ready",
        };

        state.serialize_field("kind", kind)?;
        state.serialize_field("detail", "")?;
        state.end()
    }
}

impl fmt::Display for PdiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(PdiError::Timeout.requires_retry());
        assert!(!PdiError::Timeout.requires_reset());
        assert!(PdiError::Framing.requires_reset());
        assert!(PdiError::InvalidArgument.requires_other());
        assert_eq!(format!("{}", PdiError::Framing), "Framing Error");
    }
}
