// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! pdiprog - ESP32-C3 PDI Programmer Firmware
//!
//! Bit-bangs PDI to program an AVR XMEGA target.  Runs two tasks which
//! share a mailbox:
//! - The coprocessor task owns the PDI pins and executes mailbox commands.
//! - The host task issues commands through the mailbox, identifying the
//!   target and reading its flash.
//!
//! See `config` for pin assignments and build time settings.
//!
//! Features:
//! - `program-test`: The host task erases the target, then programs and
//!   verifies a test page.  Destroys the target's existing contents.
//!
//! To change other configuration:
//! - `HEAP_SIZE`: Size of the heap used by the application.  This is set
//!   below and can be changed if desired.
//! - `coprocessor::POLL_INTERVAL`: How often the coprocessor checks the
//!   mailbox when idle.
//! - `host::SESSION_INTERVAL`: How often the host task identifies the
//!   target.

#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![feature(type_alias_impl_trait)]
#![feature(impl_trait_in_assoc_type)]

extern crate alloc;
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{clock::CpuClock, timer::timg::TimerGroup};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use static_cell::make_static;

mod config;
mod coprocessor;
mod error;
mod host;
mod mailbox;
mod pins;

use config::Settings;

include!(concat!(env!("OUT_DIR"), "/built.rs"));
pub const PDIPROG_BUILD_TIME: &str = env!("PDIPROG_BUILD_TIME");
pub const PDIPROG_BUILD_DATE: &str = env!("PDIPROG_BUILD_DATE");

// Creates app-descriptor required by the esp-idf bootloader, with this
// crate's build time and date rather than esp-bootloader-esp-idf's.
esp_bootloader_esp_idf::esp_app_desc!(
    PKG_VERSION,
    PKG_NAME,
    PDIPROG_BUILD_TIME,
    PDIPROG_BUILD_DATE,
    esp_bootloader_esp_idf::ESP_IDF_COMPATIBLE_VERSION,
    esp_bootloader_esp_idf::MMU_PAGE_SIZE,
    0,
    u16::MAX
);

// Heap size for the application.
pub const HEAP_SIZE: usize = 32 * 1024;

// How often main logs that it is alive
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

// pdiprog firmware's main function.
//
// - Set up the HAL and device
// - Set up the heap
// - Set up the PDI interface and mailbox dispatcher
// - Start the coprocessor and host tasks
// - Loop forever to prevent main from exiting.
#[esp_hal_embassy::main]
async fn main(spawner: Spawner) -> ! {
    // Set up the logger
    esp_println::logger::init_logger_from_env();

    info!("*** pdiprog v{PKG_VERSION} ***");
    info!("Value: Built {PDIPROG_BUILD_DATE} {PDIPROG_BUILD_TIME}");

    // Set up the HAL
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    let clocks = esp_hal::clock::Clocks::get();
    info!(
        "Value: {} running at {}MHz",
        esp_hal::chip!(),
        clocks.cpu_clock.as_mhz()
    );

    // Set up the heap allocator
    esp_alloc::heap_allocator!(size: HEAP_SIZE);

    // Initialize embassy
    let timg1 = TimerGroup::new(peripherals.TIMG1);
    esp_hal_embassy::init(timg1.timer0);

    let settings = Settings::from_env();

    // Set up the PDI interface and start the coprocessor task
    let data_pin = peripherals.GPIO0;
    let clk_pin = peripherals.GPIO1;
    let dispatcher = make_static!(coprocessor::dispatcher(&settings, data_pin, clk_pin));
    spawner.must_spawn(coprocessor::task(dispatcher));

    // Start the host task
    spawner.must_spawn(host::task(host::client(&settings)));

    let mut uptime_mins: u32 = 0;
    loop {
        Timer::after(HEARTBEAT_INTERVAL).await;
        uptime_mins += 1;
        debug!("Value: Up {uptime_mins} minutes");
    }
}
