// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! pdiprog - ESP32-C3 GPIO implementation of `PdiPins`

use core::fmt;
use embedded_hal::digital::PinState;
use esp_hal::gpio::{
    DriveMode, DriveStrength, Flex, InputConfig, InputPin, Level, Output, OutputConfig, OutputPin,
    Pull,
};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use pdiprog_pdi::protocol::{Direction, PdiPins};

/// PDI_CLK and PDI_DATA on ESP32-C3 GPIOs, with PDI_DATA on a single
/// bidirectional pin.
pub(crate) struct EspPdiPins<'a> {
    clk: Output<'a>,
    data: Flex<'a>,
}

impl fmt::Debug for EspPdiPins<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EspPdiPins").finish_non_exhaustive()
    }
}

impl<'a> EspPdiPins<'a> {
    /// Sets up the pins.
    ///
    /// Arguments:
    /// - `data_pin`: The pin to use for PDI_DATA.
    /// - `clk_pin`: The pin to use for PDI_CLK.
    ///
    /// Returns:
    /// - PDI_CLK driven low and PDI_DATA released.
    pub(crate) fn new(data_pin: impl InputPin + OutputPin + 'a, clk_pin: impl OutputPin + 'a) -> Self {
        // Pull up so a released, undriven line doesn't look like a start bit
        let mut data = Flex::new(data_pin);
        let input_config = InputConfig::default().with_pull(Pull::Up);
        data.apply_input_config(&input_config);
        let output_config = OutputConfig::default()
            .with_drive_strength(DriveStrength::_20mA)
            .with_drive_mode(DriveMode::PushPull);
        data.apply_output_config(&output_config);
        data.set_output_enable(false);
        data.set_input_enable(true);

        let clk = Output::new(clk_pin, Level::Low, output_config);

        debug!("PDI pins created, PDI_DATA input with pull up, PDI_CLK output low");

        Self { clk, data }
    }
}

fn level(state: PinState) -> Level {
    match state {
        PinState::High => Level::High,
        PinState::Low => Level::Low,
    }
}

impl PdiPins for EspPdiPins<'_> {
    #[inline]
    fn set_clk(&mut self, state: PinState) {
        self.clk.set_level(level(state));
    }

    #[inline]
    fn set_data(&mut self, state: PinState) {
        self.data.set_level(level(state));
    }

    #[inline]
    fn data(&mut self) -> PinState {
        PinState::from(self.data.is_high())
    }

    #[inline]
    fn set_data_direction(&mut self, direction: Direction) {
        match direction {
            Direction::Output => {
                self.data.set_input_enable(false);
                self.data.set_output_enable(true);
            }
            Direction::Input => {
                self.data.set_output_enable(false);
                self.data.set_input_enable(true);
            }
        }
    }
}
