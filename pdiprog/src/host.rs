// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! pdiprog - Host task
//!
//! Drives the coprocessor through the mailbox, as an external host would.
//! Periodically identifies the attached target and dumps the start of its
//! flash.  With feature `program-test` it also erases the target and
//! programs and verifies a test page, once.

use embassy_time::{Duration, Timer};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use pdiprog_core::nvm::FLASH_PAGE_SIZE;
use pdiprog_mailbox::{AtomicMailbox, Client};

use crate::config::Settings;
use crate::error::{ErrorKind, PdiprogError};
use crate::mailbox::{COMPLETION, Completion, MAILBOX};

// Time between identification sessions
const SESSION_INTERVAL: Duration = Duration::from_secs(10);

// Flash bytes logged per session
const DUMP_BYTES: usize = 16;

type MailboxClient = Client<&'static AtomicMailbox, &'static Completion>;

pub(crate) fn client(settings: &Settings) -> MailboxClient {
    let mut client = Client::new(&MAILBOX, &COMPLETION);
    client.set_timeout_ms(settings.timeout_ms);
    client
}

/// Task to issue mailbox commands to the coprocessor
#[embassy_executor::task]
pub(crate) async fn task(client: MailboxClient) -> ! {
    info!("Exec:  Host task started");
    let mut client = client;
    let mut program = cfg!(feature = "program-test");
    let mut session_count: u32 = 0;

    loop {
        session_count += 1;
        match session(&mut client, program).await {
            Ok(()) => {
                info!("OK:    Session {session_count} complete");
                program = false;
            }
            Err(e) => warn!("Error: Session {session_count} failed: {e}"),
        }

        // Always release the target, even if the session failed
        if let Err(e) = client.leave_progmode().await {
            warn!("Error: Failed to leave programming mode: {e}");
        }

        Timer::after(SESSION_INTERVAL).await;
    }
}

async fn session(client: &mut MailboxClient, program: bool) -> Result<(), PdiprogError> {
    info!("Exec:  Enter programming mode");
    client.enter_progmode().await?;

    let signature = client.read_signature().await?;
    info!("Value: Device signature {signature}");
    if !signature.is_atmel() {
        return Err(PdiprogError::Pdiprog(ErrorKind::NotAtmel));
    }
    let device = signature
        .device()
        .ok_or(PdiprogError::Pdiprog(ErrorKind::UnknownDevice))?;
    info!("Value: Device {device}");

    if program {
        program_test_page(client).await?;
    }

    let mut page = [0u8; FLASH_PAGE_SIZE];
    client.read_flash(0, &mut page).await?;
    info!("Value: Flash 0x0000: {:02X?}", &page[..DUMP_BYTES]);

    Ok(())
}

// Erases the chip, programs the first flash page with an incrementing
// pattern and reads it back.
async fn program_test_page(client: &mut MailboxClient) -> Result<(), PdiprogError> {
    info!("Exec:  Chip erase");
    client.chip_erase().await?;

    let mut pattern = [0u8; FLASH_PAGE_SIZE];
    for (ii, byte) in pattern.iter_mut().enumerate() {
        *byte = ii as u8;
    }

    info!("Exec:  Program test page");
    client.program_flash(0, &pattern).await?;

    let mut readback = [0u8; FLASH_PAGE_SIZE];
    client.read_flash(0, &mut readback).await?;
    if readback != pattern {
        let first = pattern
            .iter()
            .zip(readback.iter())
            .position(|(expected, actual)| expected != actual)
            .unwrap_or(0);
        warn!(
            "Error: Verify failed at 0x{first:04X}: expected 0x{:02X} read 0x{:02X}",
            pattern[first], readback[first]
        );
        return Err(PdiprogError::Pdiprog(ErrorKind::Verify));
    }
    info!("OK:    Test page verified");

    Ok(())
}
