// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Simulated XMEGA target
//!
//! [`SimTarget`] models an XMEGA device at the level of the PDI_CLK and
//! PDI_DATA lines.  [`SimPins`] implements [`PdiPins`] on top of it, so the
//! whole stack - [`crate::PdiProtocol`], [`crate::PdiInterface`] and
//! [`crate::NvmInterface`] - runs unmodified against the simulation.
//!
//! The simulation covers:
//! - The enable and disable waveforms.
//! - Frame reception, including parity and stop bit checking.
//! - The PDI instruction set, including `REPEAT` and the pointer register.
//! - The NVM controller commands used for programming, with page buffers,
//!   a busy indication and the `NVMEN` delay after the key.
//! - Flash, EEPROM, the user signature row, fuses and lock bits.
//!
//! Faults can be injected to exercise error paths - a target which never
//! responds, a corrupted response, a rejected key and an NVM controller
//! stuck busy.
//!
//! ```rust,ignore
//! use pdiprog_pdi::sim::SimTarget;
//! use pdiprog_pdi::NvmInterface;
//!
//! let target = SimTarget::new();
//! let mut nvm = NvmInterface::from_pins(target.pins(), target.delay());
//! nvm.initialize()?;
//! assert_eq!(nvm.read_signature()?.bytes(), [0x1E, 0x94, 0x42]);
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::PinState;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use pdiprog_core::DeviceSignature;
use pdiprog_core::memory::{DATA_BASE, FUSE_COUNT, Space};
use pdiprog_core::nvm::{
    CTRLA_CMDEX, FLASH_PAGE_SIZE, MCU_DEVID_OFFSET, NvmCommand, NvmRegister, STATUS_BUSY,
};
use pdiprog_core::pdi::{
    ControlRegister, Instruction, NVM_KEY_BYTES, Opcode, PointerMode, RESET_SIGNATURE,
    STATUS_NVMEN,
};
use pdiprog_core::xmega::{ATXMEGA16D4, XmegaDetails};

use crate::protocol::{Direction, PdiPins, calculate_parity};

/// Rising clock edges with PDI_DATA high needed to enable the link.
pub const ENABLE_EDGES: u32 = 16;

/// Idle bits the target sends before each response.
pub const RESPONSE_GUARD_BITS: usize = 2;

/// Default number of `NVM.STATUS` polls which report busy after each NVM
/// action.
pub const DEFAULT_BUSY_POLLS: u32 = 2;

/// `LDCS STATUS` polls after a valid key before `NVMEN` is reported.
pub const NVMEN_DELAY_POLLS: u32 = 2;

const SIGNATURE_ROW_SIZE: usize = FLASH_PAGE_SIZE;

// Value reading back from `LDCS RESET` while the target is held in reset
const RESET_ACTIVE: u8 = 0x01;

// Instruction decoder state
#[derive(Debug)]
enum Decoder {
    Instruction,
    Operands {
        instr: Instruction,
        needed: usize,
        buf: Vec<u8>,
    },
    StoreData {
        post_inc: bool,
        remaining: u64,
    },
}

#[derive(Debug)]
struct SimDevice {
    // Lines
    clk: PinState,
    data_out: PinState,
    direction: Direction,
    tx_level: bool,
    tx: VecDeque<bool>,

    // Link
    link_enabled: bool,
    arming: Option<u32>,
    rx: Option<(usize, u16)>,
    frame_errors: u32,
    elapsed_ns: u64,

    // PDI controller
    decoder: Decoder,
    repeat: Option<u32>,
    last_repeat: Option<u32>,
    pointer: u32,
    ctrl: u8,
    in_reset: bool,
    key_accepted: bool,
    nvmen_countdown: u32,
    nvm_enabled: bool,
    instructions: Vec<Instruction>,

    // NVM controller
    nvm_cmd: u8,
    busy_remaining: u32,
    busy_polls: u32,
    stuck_busy: bool,
    flash_buffer: Vec<u8>,
    eeprom_buffer: Vec<u8>,

    // Memories
    signature: DeviceSignature,
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    user_signature: Vec<u8>,
    production_signature: Vec<u8>,
    fuses: [u8; FUSE_COUNT],
    lock_bits: u8,
    io: HashMap<u16, u8>,

    // Fault injection
    responding: bool,
    corrupt_next: bool,
    reject_key: bool,
}

impl SimDevice {
    fn new(details: &XmegaDetails) -> Self {
        Self {
            clk: PinState::Low,
            data_out: PinState::High,
            direction: Direction::Input,
            tx_level: true,
            tx: VecDeque::new(),
            link_enabled: false,
            arming: None,
            rx: None,
            frame_errors: 0,
            elapsed_ns: 0,
            decoder: Decoder::Instruction,
            repeat: None,
            last_repeat: None,
            pointer: 0,
            ctrl: 0,
            in_reset: false,
            key_accepted: false,
            nvmen_countdown: 0,
            nvm_enabled: false,
            instructions: Vec::new(),
            nvm_cmd: NvmCommand::Nop.to_byte(),
            busy_remaining: 0,
            busy_polls: DEFAULT_BUSY_POLLS,
            stuck_busy: false,
            flash_buffer: vec![0xFF; details.flash_page_size],
            eeprom_buffer: vec![0xFF; details.eeprom_page_size],
            signature: details.signature,
            flash: vec![0xFF; details.flash_bytes() as usize],
            eeprom: vec![0xFF; details.eeprom_bytes as usize],
            user_signature: vec![0xFF; SIGNATURE_ROW_SIZE],
            production_signature: vec![0xFF; SIGNATURE_ROW_SIZE],
            fuses: [0xFF; FUSE_COUNT],
            lock_bits: 0xFF,
            io: HashMap::new(),
            responding: true,
            corrupt_next: false,
            reject_key: false,
        }
    }

    // Whether the programmer is actively pulling PDI_DATA low
    fn driving_low(&self) -> bool {
        self.direction == Direction::Output && self.data_out == PinState::Low
    }

    // Called whenever the programmer's drive of PDI_DATA may have changed
    fn data_line_changed(&mut self, was_low: bool) {
        let now_low = self.driving_low();
        if self.clk != PinState::High || was_low == now_low {
            return;
        }
        if now_low {
            if self.link_enabled {
                debug!("Sim:   PDI disabled");
            }
            self.reset_session();
        } else {
            trace!("Sim:   PDI enable armed");
            self.reset_session();
            self.arming = Some(0);
        }
    }

    fn reset_session(&mut self) {
        self.link_enabled = false;
        self.arming = None;
        self.rx = None;
        self.tx.clear();
        self.tx_level = true;
        self.decoder = Decoder::Instruction;
        self.repeat = None;
        self.in_reset = false;
        self.key_accepted = false;
        self.nvm_enabled = false;
    }

    fn rising_edge(&mut self) {
        if self.direction != Direction::Output {
            return;
        }
        let bit = self.data_out == PinState::High;

        if let Some(count) = self.arming {
            if !bit {
                self.arming = None;
            } else if count + 1 >= ENABLE_EDGES {
                debug!("Sim:   PDI enabled");
                self.arming = None;
                self.link_enabled = true;
            } else {
                self.arming = Some(count + 1);
            }
            return;
        }

        if !self.link_enabled {
            return;
        }

        // The programmer is driving, so anything still queued is lost
        self.tx.clear();
        self.tx_level = true;
        self.receive_bit(bit);
    }

    fn falling_edge(&mut self) {
        if self.direction == Direction::Input {
            self.tx_level = self.tx.pop_front().unwrap_or(true);
        }
    }

    fn receive_bit(&mut self, bit: bool) {
        let Some((count, bits)) = self.rx else {
            if !bit {
                self.rx = Some((0, 0));
            }
            return;
        };

        let bits = bits | (bit as u16) << count;
        let count = count + 1;
        if count < 11 {
            self.rx = Some((count, bits));
            return;
        }
        self.rx = None;

        let byte = (bits & 0xFF) as u8;
        let parity = bits & (1 << 8) != 0;
        let stops = (bits >> 9) & 0x03 == 0x03;
        if parity != calculate_parity(byte) || !stops {
            warn!("Sim:   Framing error receiving 0x{byte:02X}");
            self.frame_errors += 1;
            self.decoder = Decoder::Instruction;
            return;
        }
        self.receive_byte(byte);
    }

    fn respond(&mut self, bytes: &[u8]) {
        if !self.responding {
            trace!("Sim:   Not responding");
            return;
        }
        self.tx.extend([true; RESPONSE_GUARD_BITS]);
        for &byte in bytes {
            let mut parity = calculate_parity(byte);
            if core::mem::take(&mut self.corrupt_next) {
                parity = !parity;
            }
            self.tx.push_back(false);
            self.tx.extend((0..8).map(|ii| byte & (1 << ii) != 0));
            self.tx.extend([parity, true, true]);
        }
    }

    fn receive_byte(&mut self, byte: u8) {
        match core::mem::replace(&mut self.decoder, Decoder::Instruction) {
            Decoder::Instruction => self.decode(Instruction::from_byte(byte)),
            Decoder::Operands {
                instr,
                needed,
                mut buf,
            } => {
                buf.push(byte);
                if buf.len() < needed {
                    self.decoder = Decoder::Operands { instr, needed, buf };
                } else {
                    self.execute(instr, &buf);
                }
            }
            Decoder::StoreData {
                post_inc,
                remaining,
            } => {
                self.write_memory(self.pointer, byte);
                if post_inc {
                    self.pointer = self.pointer.wrapping_add(1);
                }
                if remaining > 1 {
                    self.decoder = Decoder::StoreData {
                        post_inc,
                        remaining: remaining - 1,
                    };
                }
            }
        }
    }

    fn decode(&mut self, instr: Instruction) {
        trace!("Sim:   {instr}");
        self.instructions.push(instr);

        let opcode = instr.opcode();
        let count = if opcode == Opcode::Repeat {
            1
        } else {
            self.repeat.take().map_or(1, |r| r as u64 + 1)
        };

        let operands = |needed: usize| Decoder::Operands {
            instr,
            needed,
            buf: Vec::with_capacity(needed),
        };

        match opcode {
            Opcode::Lds => self.decoder = operands(instr.address_size().len()),
            Opcode::Sts => {
                self.decoder = operands(instr.address_size().len() + instr.data_size().len())
            }
            Opcode::Stcs => self.decoder = operands(1),
            Opcode::Repeat => self.decoder = operands(instr.data_size().len()),
            Opcode::Key => self.decoder = operands(NVM_KEY_BYTES.len()),
            Opcode::Ldcs => {
                let value = self.read_control(instr.register_index());
                self.respond(&[value]);
            }
            Opcode::St => match instr.pointer_mode() {
                PointerMode::Direct | PointerMode::DirectPostInc => {
                    self.decoder = operands(instr.data_size().len())
                }
                mode => {
                    self.decoder = Decoder::StoreData {
                        post_inc: mode == PointerMode::IndirectPostInc,
                        remaining: count * instr.data_size().len() as u64,
                    }
                }
            },
            Opcode::Ld => match instr.pointer_mode() {
                PointerMode::Direct | PointerMode::DirectPostInc => {
                    let len = instr.data_size().len();
                    let bytes = self.pointer.to_le_bytes();
                    self.respond(&bytes[..len]);
                }
                mode => {
                    let post_inc = mode == PointerMode::IndirectPostInc;
                    let total = count * instr.data_size().len() as u64;
                    let mut bytes = Vec::with_capacity(total as usize);
                    for _ in 0..total {
                        bytes.push(self.read_memory(self.pointer));
                        if post_inc {
                            self.pointer = self.pointer.wrapping_add(1);
                        }
                    }
                    self.respond(&bytes);
                }
            },
        }
    }

    fn execute(&mut self, instr: Instruction, operands: &[u8]) {
        match instr.opcode() {
            Opcode::Lds => {
                let address = le_value(operands);
                let len = instr.data_size().len() as u32;
                let bytes: Vec<u8> = (0..len)
                    .map(|ii| self.read_memory(address.wrapping_add(ii)))
                    .collect();
                self.respond(&bytes);
            }
            Opcode::Sts => {
                let (address, data) = operands.split_at(instr.address_size().len());
                let address = le_value(address);
                for (ii, &byte) in data.iter().enumerate() {
                    self.write_memory(address.wrapping_add(ii as u32), byte);
                }
            }
            Opcode::St => self.pointer = le_value(operands),
            Opcode::Stcs => self.write_control(instr.register_index(), operands[0]),
            Opcode::Repeat => {
                let value = le_value(operands);
                self.repeat = Some(value);
                self.last_repeat = Some(value);
            }
            Opcode::Key => {
                if operands == NVM_KEY_BYTES && self.in_reset && !self.reject_key {
                    debug!("Sim:   Key accepted");
                    self.key_accepted = true;
                    self.nvmen_countdown = NVMEN_DELAY_POLLS;
                } else {
                    debug!("Sim:   Key rejected");
                }
            }
            Opcode::Ld | Opcode::Ldcs => (),
        }
    }

    fn read_control(&mut self, index: u8) -> u8 {
        match ControlRegister::from_index(index) {
            Some(ControlRegister::Status) => {
                if self.key_accepted && !self.nvm_enabled {
                    if self.nvmen_countdown == 0 {
                        self.nvm_enabled = true;
                    } else {
                        self.nvmen_countdown -= 1;
                    }
                }
                if self.nvm_enabled { STATUS_NVMEN } else { 0 }
            }
            Some(ControlRegister::Reset) => {
                if self.in_reset { RESET_ACTIVE } else { 0 }
            }
            Some(ControlRegister::Ctrl) => self.ctrl,
            None => 0,
        }
    }

    fn write_control(&mut self, index: u8, value: u8) {
        match ControlRegister::from_index(index) {
            Some(ControlRegister::Reset) => {
                self.in_reset = value == RESET_SIGNATURE;
                debug!("Sim:   Target reset {}", if self.in_reset { "held" } else { "released" });
            }
            Some(ControlRegister::Ctrl) => self.ctrl = value,
            Some(ControlRegister::Status) | None => (),
        }
    }

    fn locate(&self, address: u32) -> Option<(Space, usize)> {
        let spaces = [
            (Space::Flash, self.flash.len()),
            (Space::Eeprom, self.eeprom.len()),
            (Space::ProductionSignature, self.production_signature.len()),
            (Space::UserSignature, self.user_signature.len()),
            (Space::Fuses, FUSE_COUNT),
            (Space::LockBits, 1),
        ];
        spaces.into_iter().find_map(|(space, len)| {
            let offset = address.checked_sub(space.base())? as usize;
            (offset < len).then_some((space, offset))
        })
    }

    fn read_memory(&mut self, address: u32) -> u8 {
        if let Some(offset) = address.checked_sub(DATA_BASE) {
            return self.read_data_space(offset as u16);
        }
        if !self.nvm_enabled || self.nvm_cmd != NvmCommand::ReadNvm.to_byte() {
            return 0x00;
        }
        match self.locate(address) {
            Some((Space::Flash, offset)) => self.flash[offset],
            Some((Space::Eeprom, offset)) => self.eeprom[offset],
            Some((Space::ProductionSignature, offset)) => self.production_signature[offset],
            Some((Space::UserSignature, offset)) => self.user_signature[offset],
            Some((Space::Fuses, offset)) => self.fuses[offset],
            Some((Space::LockBits, _)) => self.lock_bits,
            Some((Space::Data, _)) | None => 0xFF,
        }
    }

    fn read_data_space(&mut self, offset: u16) -> u8 {
        let devid = offset.wrapping_sub(MCU_DEVID_OFFSET) as usize;
        if let Some(byte) = self.signature.byte(devid) {
            return byte;
        }
        match NvmRegister::from_io_offset(offset) {
            Some(NvmRegister::Cmd) => self.nvm_cmd,
            Some(NvmRegister::CtrlA) => 0,
            Some(NvmRegister::Status) => {
                if self.stuck_busy {
                    STATUS_BUSY
                } else if self.busy_remaining > 0 {
                    self.busy_remaining -= 1;
                    STATUS_BUSY
                } else {
                    0
                }
            }
            None => self.io.get(&offset).copied().unwrap_or(0),
        }
    }

    fn write_memory(&mut self, address: u32, value: u8) {
        if let Some(offset) = address.checked_sub(DATA_BASE) {
            self.write_data_space(offset as u16, value);
            return;
        }
        if !self.nvm_enabled {
            trace!("Sim:   NVM write to 0x{address:08X} ignored, NVM not enabled");
            return;
        }
        let Some((space, offset)) = self.locate(address) else {
            return;
        };

        match (NvmCommand::from_byte(self.nvm_cmd), space) {
            (Some(NvmCommand::LoadFlashPageBuffer), Space::Flash | Space::UserSignature) => {
                let len = self.flash_buffer.len();
                self.flash_buffer[offset % len] = value;
            }
            (Some(NvmCommand::LoadEepromPageBuffer), Space::Eeprom) => {
                let len = self.eeprom_buffer.len();
                self.eeprom_buffer[offset % len] = value;
            }
            (Some(NvmCommand::EraseWriteAppPage), Space::Flash) => {
                let page = self.flash_buffer.len();
                let start = offset / page * page;
                self.flash[start..start + page].copy_from_slice(&self.flash_buffer);
                self.flash_buffer.fill(0xFF);
                self.set_busy();
            }
            (Some(NvmCommand::EraseWriteEepromPage), Space::Eeprom) => {
                let page = self.eeprom_buffer.len();
                let start = offset / page * page;
                self.eeprom[start..start + page].copy_from_slice(&self.eeprom_buffer);
                self.eeprom_buffer.fill(0xFF);
                self.set_busy();
            }
            (Some(NvmCommand::EraseUserSignature), Space::UserSignature) => {
                self.user_signature.fill(0xFF);
                self.set_busy();
            }
            (Some(NvmCommand::WriteUserSignature), Space::UserSignature) => {
                for (cell, byte) in self.user_signature.iter_mut().zip(&self.flash_buffer) {
                    *cell &= byte;
                }
                self.flash_buffer.fill(0xFF);
                self.set_busy();
            }
            (Some(NvmCommand::WriteFuse), Space::Fuses) => {
                self.fuses[offset] = value;
                self.set_busy();
            }
            (Some(NvmCommand::WriteLockBits), Space::LockBits) => {
                self.lock_bits &= value;
                self.set_busy();
            }
            (cmd, space) => {
                trace!("Sim:   Write to {space} ignored with command {cmd:?}");
            }
        }
    }

    fn write_data_space(&mut self, offset: u16, value: u8) {
        match NvmRegister::from_io_offset(offset) {
            Some(NvmRegister::Cmd) => self.nvm_cmd = value,
            Some(NvmRegister::CtrlA) => {
                if value & CTRLA_CMDEX != 0 {
                    self.execute_action();
                }
            }
            Some(NvmRegister::Status) => (),
            None => {
                self.io.insert(offset, value);
            }
        }
    }

    fn execute_action(&mut self) {
        if !self.nvm_enabled {
            return;
        }
        match NvmCommand::from_byte(self.nvm_cmd) {
            Some(NvmCommand::ChipErase) => {
                debug!("Sim:   Chip erase");
                self.flash.fill(0xFF);
                self.eeprom.fill(0xFF);
                self.lock_bits = 0xFF;
            }
            Some(NvmCommand::EraseFlashPageBuffer) => self.flash_buffer.fill(0xFF),
            Some(NvmCommand::EraseEepromPageBuffer) => self.eeprom_buffer.fill(0xFF),
            cmd => {
                trace!("Sim:   CMDEX ignored with command {cmd:?}");
                return;
            }
        }
        self.set_busy();
    }

    fn set_busy(&mut self) {
        self.busy_remaining = self.busy_polls;
    }
}

// Little-endian operand value, up to 4 bytes
fn le_value(bytes: &[u8]) -> u32 {
    bytes.iter().rev().fold(0, |acc, &b| acc << 8 | b as u32)
}

/// A simulated XMEGA target.
///
/// Cloning gives another handle to the same target.
#[derive(Debug, Clone)]
pub struct SimTarget {
    device: Rc<RefCell<SimDevice>>,
}

impl Default for SimTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTarget {
    /// Creates a simulated ATxmega16D4, with all NVM erased.
    pub fn new() -> Self {
        Self::with_device(&ATXMEGA16D4)
    }

    pub fn with_device(details: &XmegaDetails) -> Self {
        Self {
            device: Rc::new(RefCell::new(SimDevice::new(details))),
        }
    }

    /// Returns pins connected to this target.
    pub fn pins(&self) -> SimPins {
        SimPins {
            device: self.device.clone(),
        }
    }

    /// Returns a delay provider which advances this target's clock instead
    /// of sleeping.
    pub fn delay(&self) -> SimDelay {
        SimDelay {
            device: self.device.clone(),
        }
    }

    pub fn link_enabled(&self) -> bool {
        self.device.borrow().link_enabled
    }

    pub fn in_reset(&self) -> bool {
        self.device.borrow().in_reset
    }

    pub fn nvm_enabled(&self) -> bool {
        self.device.borrow().nvm_enabled
    }

    /// Number of frames received with bad parity or stop bits.
    pub fn frame_errors(&self) -> u32 {
        self.device.borrow().frame_errors
    }

    /// Instructions received since creation or the last [`Self::clear_log()`].
    pub fn instructions(&self) -> Vec<Instruction> {
        self.device.borrow().instructions.clone()
    }

    pub fn clear_log(&self) {
        self.device.borrow_mut().instructions.clear();
    }

    /// Value of the most recent `REPEAT` received - one less than the count.
    pub fn last_repeat(&self) -> Option<u32> {
        self.device.borrow().last_repeat
    }

    /// Total time passed to the delay provider.
    pub fn elapsed_ns(&self) -> u64 {
        self.device.borrow().elapsed_ns
    }

    pub fn flash(&self) -> Vec<u8> {
        self.device.borrow().flash.clone()
    }

    pub fn eeprom(&self) -> Vec<u8> {
        self.device.borrow().eeprom.clone()
    }

    pub fn user_signature(&self) -> Vec<u8> {
        self.device.borrow().user_signature.clone()
    }

    pub fn fuses(&self) -> [u8; FUSE_COUNT] {
        self.device.borrow().fuses
    }

    pub fn lock_bits(&self) -> u8 {
        self.device.borrow().lock_bits
    }

    pub fn set_signature(&self, bytes: [u8; 3]) {
        self.device.borrow_mut().signature = DeviceSignature::new(bytes);
    }

    /// Writes directly into flash, bypassing the NVM controller.
    pub fn load_flash(&self, offset: usize, data: &[u8]) {
        self.device.borrow_mut().flash[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Writes directly into EEPROM, bypassing the NVM controller.
    pub fn load_eeprom(&self, offset: usize, data: &[u8]) {
        self.device.borrow_mut().eeprom[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn load_user_signature(&self, offset: usize, data: &[u8]) {
        self.device.borrow_mut().user_signature[offset..offset + data.len()]
            .copy_from_slice(data);
    }

    /// Number of `NVM.STATUS` polls which report busy after each NVM action.
    pub fn set_busy_polls(&self, polls: u32) {
        self.device.borrow_mut().busy_polls = polls;
    }

    /// Makes `NVM.STATUS` report busy permanently.
    pub fn set_stuck_busy(&self, stuck: bool) {
        self.device.borrow_mut().stuck_busy = stuck;
    }

    /// Makes the target ignore the NVM key.
    pub fn set_reject_key(&self, reject: bool) {
        self.device.borrow_mut().reject_key = reject;
    }

    /// A target which isn't responding never drives PDI_DATA.
    pub fn set_responding(&self, responding: bool) {
        self.device.borrow_mut().responding = responding;
    }

    /// Flips the parity bit of the first byte of the next response.
    pub fn corrupt_next_response(&self) {
        self.device.borrow_mut().corrupt_next = true;
    }
}

/// [`PdiPins`] connected to a [`SimTarget`].
#[derive(Debug, Clone)]
pub struct SimPins {
    device: Rc<RefCell<SimDevice>>,
}

impl PdiPins for SimPins {
    fn set_clk(&mut self, level: PinState) {
        let mut device = self.device.borrow_mut();
        let previous = device.clk;
        device.clk = level;
        match (previous, level) {
            (PinState::Low, PinState::High) => device.rising_edge(),
            (PinState::High, PinState::Low) => device.falling_edge(),
            _ => (),
        }
    }

    fn set_data(&mut self, level: PinState) {
        let mut device = self.device.borrow_mut();
        let was_low = device.driving_low();
        device.data_out = level;
        device.data_line_changed(was_low);
    }

    fn data(&mut self) -> PinState {
        let device = self.device.borrow();
        match device.direction {
            Direction::Output => device.data_out,
            Direction::Input => PinState::from(device.tx_level),
        }
    }

    fn set_data_direction(&mut self, direction: Direction) {
        let mut device = self.device.borrow_mut();
        let was_low = device.driving_low();
        device.direction = direction;
        device.data_line_changed(was_low);
    }
}

/// [`DelayNs`] which advances a [`SimTarget`]'s clock.
#[derive(Debug, Clone)]
pub struct SimDelay {
    device: Rc<RefCell<SimDevice>>,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.device.borrow_mut().elapsed_ns += ns as u64;
    }
}
