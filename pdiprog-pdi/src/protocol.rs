// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! PDI Wire Protocol Implementation
//!
//! This module implements the PDI link layer for communicating with AVR
//! XMEGA MCUs.  It provides the `PdiProtocol` struct for low-level PDI
//! operations - clocking bits, framing bytes, and the waveforms which enable
//! and disable the target's PDI interface.
//!
//! PDI is a synchronous, half-duplex protocol.  The programmer always drives
//! PDI_CLK.  PDI_DATA is driven by the programmer when sending and released
//! (and driven by the target) when receiving.  The target samples data on the
//! rising clock edge and changes its output on the falling edge.
//!
//! Each byte is sent as a 12 bit frame:
//!
//! ```text
//! +-------+------------------------+--------+--------+--------+
//! | start |  D0 D1 ... D7 (LSB 1st)| parity | stop 1 | stop 2 |
//! |   0   |                        | (even) |   1    |   1    |
//! +-------+------------------------+--------+--------+--------+
//! ```

use core::result::Result;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin, PinState};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::PdiError;

#[doc(inline)]
pub use crate::interface::PdiInterface;
#[doc(inline)]
pub use crate::nvm::NvmInterface;

/// Number of bits in a PDI frame.
pub const FRAME_BITS: usize = 12;

// Data held low, with clock high, to time out any existing PDI session
const ENABLE_RESET_HOLD_MS: u32 = 10;

// Wait after raising data before clocking, to land within the target's
// enable window
const ENABLE_SETTLE_US: u32 = 5;

// 16+ clock cycles with data high to enable PDI
const ENABLE_CLOCK_CYCLES: u32 = 32;

// Clock cycles with data idle making up a break
const BREAK_CLOCK_CYCLES: u32 = 8;

// Breaks sent ahead of every write, to separate it from what came before
const BREAKS_BEFORE_WRITE: u32 = 2;

// Hold times used while dropping the PDI link
const DISABLE_HOLD_US: u32 = 300;

/// Direction of the PDI_DATA line, from the programmer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Programmer drives PDI_DATA.
    Output,

    /// Programmer releases PDI_DATA, and the target drives it.
    Input,
}

/// Pin access required by [`PdiProtocol`].
///
/// This is implemented by the application for its hardware - for example
/// GPIO pins driven directly, or separate TX/RX/output-enable pins where the
/// data line goes via a bus buffer.  [`HalPins`] implements it for any
/// `embedded-hal` pins.
///
/// Methods are infallible, as they are called within tight bit-banging
/// loops.  An implementation which can fail should record the failure and
/// report it via [`PdiPins::take_fault()`], which the protocol checks after
/// each burst of writes.
pub trait PdiPins {
    /// Drive PDI_CLK to `level`.
    fn set_clk(&mut self, level: PinState);

    /// Set the level driven on PDI_DATA when the direction is
    /// [`Direction::Output`].
    fn set_data(&mut self, level: PinState);

    /// Sample PDI_DATA.
    fn data(&mut self) -> PinState;

    /// Drive or release PDI_DATA.
    fn set_data_direction(&mut self, direction: Direction);

    /// Returns whether a pin operation failed since the last call, and
    /// clears the indication.
    fn take_fault(&mut self) -> bool {
        false
    }
}

/// PDI protocol speed setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Speed {
    /// Aims to be roughly 50kHz clock
    Slow,

    /// Aims to be roughly 100kHz clock
    #[default]
    Standard,

    /// Aims to be roughly 500kHz clock
    Fast,

    /// Aims to be roughly 1MHz clock
    Turbo,
}

impl Speed {
    /// Returns the **approximate** speed in kHz for this PDI speed setting.
    pub fn speed_khz(&self) -> u32 {
        match self {
            Speed::Slow => 50,
            Speed::Standard => 100,
            Speed::Fast => 500,
            Speed::Turbo => 1000,
        }
    }

    /// Returns the length of each half of the clock period.  The high and
    /// low phases are always equal.
    pub fn half_period_ns(&self) -> u32 {
        500_000 / self.speed_khz()
    }

    /// Parses a speed name, as used in configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "slow" => Some(Speed::Slow),
            "standard" => Some(Speed::Standard),
            "fast" => Some(Speed::Fast),
            "turbo" => Some(Speed::Turbo),
            _ => None,
        }
    }
}

/// [`PdiPins`] implementation for `embedded-hal` pins.
///
/// The data line is split into a TX output, an RX input and an output
/// enable, which drives a bus buffer between TX and PDI_DATA.  Where a
/// single bidirectional pin is used, the application should implement
/// [`PdiPins`] directly instead.
#[derive(Debug)]
pub struct HalPins<CLK, TX, RX, OE> {
    clk: CLK,
    tx: TX,
    rx: RX,
    oe: OE,
    fault: bool,
}

impl<CLK, TX, RX, OE> HalPins<CLK, TX, RX, OE>
where
    CLK: OutputPin,
    TX: OutputPin,
    RX: InputPin,
    OE: OutputPin,
{
    /// Create from the individual pins.  The pins are not touched until
    /// first used.
    pub fn new(clk: CLK, tx: TX, rx: RX, oe: OE) -> Self {
        Self {
            clk,
            tx,
            rx,
            oe,
            fault: false,
        }
    }

    /// Returns the pins.
    pub fn release(self) -> (CLK, TX, RX, OE) {
        (self.clk, self.tx, self.rx, self.oe)
    }
}

impl<CLK, TX, RX, OE> PdiPins for HalPins<CLK, TX, RX, OE>
where
    CLK: OutputPin,
    TX: OutputPin,
    RX: InputPin,
    OE: OutputPin,
{
    fn set_clk(&mut self, level: PinState) {
        if self.clk.set_state(level).is_err() {
            self.fault = true;
        }
    }

    fn set_data(&mut self, level: PinState) {
        if self.tx.set_state(level).is_err() {
            self.fault = true;
        }
    }

    fn data(&mut self) -> PinState {
        match self.rx.is_high() {
            Ok(high) => PinState::from(high),
            Err(_) => {
                self.fault = true;
                PinState::High
            }
        }
    }

    fn set_data_direction(&mut self, direction: Direction) {
        let level = match direction {
            Direction::Output => PinState::High,
            Direction::Input => PinState::Low,
        };
        if self.oe.set_state(level).is_err() {
            self.fault = true;
        }
    }

    fn take_fault(&mut self) -> bool {
        core::mem::take(&mut self.fault)
    }
}

/// PDI Protocol object
///
/// This is used by [`PdiInterface`] to communicate with the target.  Most
/// applications should use [`NvmInterface`] (preferred) or [`PdiInterface`]
/// instead.
///
/// Create using `PdiProtocol::new()` passing in the pins and a delay
/// provider.
///
/// ```rust,ignore
/// use pdiprog_pdi::PdiProtocol;
///
/// let pdi = PdiProtocol::new(pins, delay);
/// ```
#[derive(Debug)]
pub struct PdiProtocol<P, D> {
    pins: P,
    delay: D,
    speed: Speed,
    half_period_ns: u32,
}

impl<P: PdiPins, D: DelayNs> PdiProtocol<P, D> {
    /// Create a new PDI protocol instance.
    ///
    /// Leaves PDI_CLK low and PDI_DATA released.  The link is not enabled
    /// until [`Self::enable()`] is called.
    ///
    /// Arguments:
    /// - `pins`: Pin access for PDI_CLK and PDI_DATA.
    /// - `delay`: Delay provider, used to time each half clock period.
    ///
    /// Returns:
    /// - A new `PdiProtocol` instance running at the default [`Speed`].
    pub fn new(mut pins: P, delay: D) -> Self {
        pins.set_clk(PinState::Low);
        pins.set_data(PinState::High);
        pins.set_data_direction(Direction::Input);

        debug!("PDI interface created, DATA released, CLK low");

        let speed = Speed::default();
        Self {
            pins,
            delay,
            speed,
            half_period_ns: speed.half_period_ns(),
        }
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    pub fn set_speed(&mut self, speed: Speed) {
        self.speed = speed;
        self.half_period_ns = speed.half_period_ns();
        debug!("PDI speed set to {speed:?}");
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    /// Returns the pins and delay provider.
    pub fn release(self) -> (P, D) {
        (self.pins, self.delay)
    }

    #[inline]
    pub fn set_clock(&mut self, level: PinState) {
        self.pins.set_clk(level);
    }

    /// Drive PDI_DATA to `level`.
    #[inline]
    pub fn drive_data(&mut self, level: PinState) {
        self.pins.set_data(level);
        self.pins.set_data_direction(Direction::Output);
    }

    /// Release PDI_DATA so the target can drive it.
    #[inline]
    pub fn release_data(&mut self) {
        self.pins.set_data_direction(Direction::Input);
    }

    #[inline]
    fn hold(&mut self) {
        self.delay.delay_ns(self.half_period_ns);
    }

    #[inline]
    fn clock_cycle(&mut self) {
        self.set_clock(PinState::Low);
        self.hold();
        self.set_clock(PinState::High);
        self.hold();
    }

    /// Send a single bit.  Data changes while the clock is low and is
    /// sampled by the target on the rising edge.
    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.set_clock(PinState::Low);
        self.pins.set_data(PinState::from(bit));
        self.hold();
        self.set_clock(PinState::High);
        self.hold();
    }

    /// Receive a single bit.  The target changes data on the falling edge,
    /// and it is sampled just after the rising edge.
    #[inline]
    pub fn read_bit(&mut self) -> bool {
        self.set_clock(PinState::Low);
        self.hold();
        self.set_clock(PinState::High);
        let bit = self.pins.data() == PinState::High;
        self.hold();
        bit
    }

    /// Send a single framed byte.  Assumes PDI_DATA is already driven.
    pub fn write_byte(&mut self, byte: u8) {
        self.write_bit(false);
        for ii in 0..8 {
            self.write_bit(byte & (1 << ii) != 0);
        }
        self.write_bit(calculate_parity(byte));
        self.write_bit(true);
        self.write_bit(true);
    }

    /// Send a break - clock cycles with PDI_DATA held idle (high), which the
    /// target ignores.
    pub fn write_break(&mut self) {
        self.drive_data(PinState::High);
        for _ in 0..BREAK_CLOCK_CYCLES {
            self.clock_cycle();
        }
    }

    /// Receive a single framed byte.
    ///
    /// Releases PDI_DATA, then clocks up to `retries` bits waiting for a
    /// start bit.  PDI_DATA is driven (idle) again before returning, whether
    /// successful or not.
    ///
    /// Returns:
    /// - `Ok(u8)`: The byte received.
    /// - `Err(PdiError::Timeout)`: No start bit within `retries` bits.
    /// - `Err(PdiError::Framing)`: Bad parity or stop bits.  Not retried
    ///   here - it is up to the caller.
    pub fn read_byte(&mut self, retries: u32) -> Result<u8, PdiError> {
        self.release_data();
        let result = self.read_frame(retries);
        self.drive_data(PinState::High);
        result
    }

    fn read_frame(&mut self, retries: u32) -> Result<u8, PdiError> {
        let mut started = false;
        for _ in 0..retries {
            if !self.read_bit() {
                started = true;
                break;
            }
        }
        if !started {
            return Err(PdiError::Timeout);
        }

        let mut value = 0u8;
        for ii in 0..8 {
            if self.read_bit() {
                value |= 1 << ii;
            }
        }

        let parity = self.read_bit();
        if parity != calculate_parity(value) {
            debug!("PDI read parity error: data=0x{value:02X}, parity={parity}");
            return Err(PdiError::Framing);
        }

        let stop1 = self.read_bit();
        let stop2 = self.read_bit();
        if !stop1 || !stop2 {
            debug!("PDI read stop bit error: data=0x{value:02X}, stop={stop1}/{stop2}");
            return Err(PdiError::Framing);
        }

        Ok(value)
    }

    /// Send a burst of bytes, preceded by two breaks.
    ///
    /// Returns:
    /// - `Ok(())`: Sent.
    /// - `Err(PdiError::Io)`: The pins reported a failure while sending.
    pub fn write(&mut self, data: &[u8]) -> Result<(), PdiError> {
        trace!("Info:  Writing {} bytes: {data:02X?}", data.len());

        for _ in 0..BREAKS_BEFORE_WRITE {
            self.write_break();
        }
        for &byte in data {
            self.write_byte(byte);
        }

        if self.pins.take_fault() {
            warn!("Error: PDI pin failure during write");
            return Err(PdiError::Io);
        }
        Ok(())
    }

    /// Receive `buf.len()` bytes.
    ///
    /// Each byte is attempted up to `retries` times, each attempt waiting up
    /// to `retries` bits for the start bit.  If any byte fails, the whole
    /// read fails and `buf` is zeroed - partial reads are not returned.
    ///
    /// Returns:
    /// - `Ok(usize)`: The number of bytes read, which is always `buf.len()`.
    /// - `Err(PdiError)`: The error from the last attempt at the failing
    ///   byte.
    pub fn read(&mut self, buf: &mut [u8], retries: u32) -> Result<usize, PdiError> {
        for ii in 0..buf.len() {
            let mut result = Err(PdiError::Timeout);
            for _ in 0..retries {
                result = self.read_byte(retries);
                if result.is_ok() {
                    break;
                }
            }

            match result {
                Ok(byte) => buf[ii] = byte,
                Err(e) => {
                    debug!("PDI read failed at byte {ii} of {}: {e}", buf.len());
                    buf.fill(0);
                    return Err(e);
                }
            }
        }

        if self.pins.take_fault() {
            warn!("Error: PDI pin failure during read");
            buf.fill(0);
            return Err(PdiError::Io);
        }
        Ok(buf.len())
    }

    /// Enable the target's PDI interface.
    ///
    /// Holds PDI_DATA low with PDI_CLK high to time out any existing
    /// session, then raises PDI_DATA and clocks the target into PDI mode.
    pub fn enable(&mut self) {
        debug!("Exec:  Enable PDI");

        self.drive_data(PinState::Low);
        self.set_clock(PinState::High);
        self.delay.delay_ms(ENABLE_RESET_HOLD_MS);

        self.pins.set_data(PinState::High);
        self.delay.delay_us(ENABLE_SETTLE_US);

        for _ in 0..ENABLE_CLOCK_CYCLES {
            self.clock_cycle();
        }
    }

    /// Disable the target's PDI interface.  Leaves PDI_CLK high.
    pub fn disable(&mut self) {
        debug!("Exec:  Disable PDI");

        self.write_break();
        self.set_clock(PinState::High);
        self.delay.delay_us(DISABLE_HOLD_US);

        self.pins.set_data(PinState::Low);
        self.set_clock(PinState::Low);
        self.delay.delay_us(DISABLE_HOLD_US);
        self.set_clock(PinState::High);
    }
}

/// Calculate PDI (even) parity - 1 for an odd number of bits set to 1, 0
/// otherwise, so the total number of ones including parity is even.
pub const fn calculate_parity(value: u8) -> bool {
    value.count_ones() % 2 == 1
}
