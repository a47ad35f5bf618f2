// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! pdiprog - Configuration
//!
//! Settings are fixed at build time.  The defaults can be overridden by
//! setting these environment variables when building:
//! - `PDIPROG_SPEED`: PDI clock speed - `slow`, `standard`, `fast` or
//!   `turbo`.
//! - `PDIPROG_RETRIES`: Bit periods to wait for a start bit from the target,
//!   and polls to wait for the NVM controller.
//! - `PDIPROG_TIMEOUT_MS`: Time the host waits for each mailbox command to
//!   complete.
//!
//! Invalid values are logged and the default used instead.
//!
//! Pins (ESP32-C3):
//!
//! | GPIO  | Signal   | Notes                                           |
//! |-------|----------|-------------------------------------------------|
//! | GPIO0 | PDI_DATA | Bidirectional.  Wire to the target's PDI_DATA.  |
//! | GPIO1 | PDI_CLK  | Push-pull output.  Wire to the target's RESET.  |
//!
//! The target's GND must be connected to the ESP32-C3's GND.  The target
//! must be powered at 3.3V.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use pdiprog_core::nvm::WAIT_RETRIES;
use pdiprog_mailbox::client::DEFAULT_TIMEOUT_MS;
use pdiprog_pdi::protocol::Speed;

/// Firmware settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Settings {
    pub speed: Speed,
    pub retries: u32,
    pub timeout_ms: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            speed: Speed::Standard,
            retries: WAIT_RETRIES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl Settings {
    /// Returns the default settings, with any build time overrides applied.
    pub(crate) fn from_env() -> Self {
        Self::from_overrides(
            option_env!("PDIPROG_SPEED"),
            option_env!("PDIPROG_RETRIES"),
            option_env!("PDIPROG_TIMEOUT_MS"),
        )
    }

    fn from_overrides(speed: Option<&str>, retries: Option<&str>, timeout_ms: Option<&str>) -> Self {
        let mut settings = Self::default();

        if let Some(speed) = speed {
            match Speed::from_name(speed) {
                Some(speed) => settings.speed = speed,
                None => warn!("Error: Invalid PDIPROG_SPEED {speed}, using default"),
            }
        }

        if let Some(value) = parse_u32("PDIPROG_RETRIES", retries) {
            settings.retries = value;
        }

        if let Some(value) = parse_u32("PDIPROG_TIMEOUT_MS", timeout_ms) {
            settings.timeout_ms = value;
        }

        settings
    }
}

fn parse_u32(name: &str, value: Option<&str>) -> Option<u32> {
    let value = value?;
    match value.parse::<u32>() {
        Ok(0) | Err(_) => {
            warn!("Error: Invalid {name} {value}, using default");
            None
        }
        Ok(parsed) => Some(parsed),
    }
}
