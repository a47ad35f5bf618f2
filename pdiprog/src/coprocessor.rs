// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! pdiprog - Coprocessor task
//!
//! Owns the PDI pins and executes mailbox commands against the target.

use embassy_futures::yield_now;
use embassy_time::{Duration, Timer};
use esp_hal::delay::Delay;
use esp_hal::gpio::{InputPin, OutputPin};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use pdiprog_mailbox::{AtomicMailbox, Dispatcher};
use pdiprog_pdi::NvmInterface;

use crate::config::Settings;
use crate::mailbox::{COMPLETION, Completion, MAILBOX};
use crate::pins::EspPdiPins;

// How often to check the mailbox when idle
const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) type PdiDispatcher = Dispatcher<
    EspPdiPins<'static>,
    Delay,
    &'static AtomicMailbox,
    &'static Completion,
>;

/// Creates the dispatcher, driving the target via the given pins.
pub(crate) fn dispatcher(
    settings: &Settings,
    data_pin: impl InputPin + OutputPin + 'static,
    clk_pin: impl OutputPin + 'static,
) -> PdiDispatcher {
    debug!("Exec:  Create PDI interface");
    let pins = EspPdiPins::new(data_pin, clk_pin);
    let mut nvm = NvmInterface::from_pins(pins, Delay::new());
    nvm.pdi_if().set_speed(settings.speed);
    nvm.set_retries(settings.retries);
    info!(
        "Value: PDI speed {:?} ({}kHz), retries {}",
        settings.speed,
        settings.speed.speed_khz(),
        settings.retries
    );

    Dispatcher::new(nvm, &MAILBOX, &COMPLETION)
}

/// Task to execute mailbox commands
#[embassy_executor::task]
pub(crate) async fn task(dispatcher: &'static mut PdiDispatcher) -> ! {
    info!("Exec:  Coprocessor task started");
    loop {
        // Bit timing is by busy-wait, so each command runs with interrupts
        // disabled
        match critical_section::with(|_| dispatcher.poll()) {
            Some(status) => {
                if status.is_ok() {
                    debug!("OK:    Command {} complete", dispatcher.sequence());
                } else {
                    warn!(
                        "Error: Command {} failed: {status}",
                        dispatcher.sequence()
                    );
                }
                yield_now().await;
            }
            None => Timer::after(POLL_INTERVAL).await,
        }
    }
}
