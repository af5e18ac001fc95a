// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Simulated board.
//!
//! [`NoDevice`] is an in-memory register file that stands in for hardware.
//! It is seeded with the board ID and a routing ROM derived from the legal
//! connection table, so routing code behaves as it would on the real
//! board. An optional [`SimulatedFlash`] emulates the SPI flash controller
//! for the flash programmer.

use crate::device::DeviceId;
use crate::error::Ntv2Result;
use crate::flash::{FlashChip, FlashCommand, FlashStatus, EXTENDED_WRITE_STATUS, PAGE_WORDS};
use crate::register::RegisterIo;
use crate::regs;
use crate::router;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

/// Busy polls after each command, by default.
const DEFAULT_BUSY_POLLS: u32 = 2;

/// Junk reported in the top byte of READID.
const READ_ID_JUNK: u32 = 0xA5 << 24;

/// Simulated SPI NOR flash behind the flash controller registers.
#[derive(Debug)]
pub struct SimulatedFlash {
    chip: FlashChip,
    /// Absolute byte address to word. Absent words read as erased.
    memory: BTreeMap<u32, u32>,
    din: VecDeque<u32>,
    address: u32,
    dout: u32,
    write_enabled: bool,
    bank: u8,
    status: u32,
    status_history: Vec<u32>,
    bank_history: Vec<u8>,
    extended_write_status: bool,
    busy_polls: u32,
    busy_remaining: u32,
}

impl SimulatedFlash {
    pub fn new(chip: FlashChip) -> Self {
        Self {
            chip,
            memory: BTreeMap::new(),
            din: VecDeque::with_capacity(PAGE_WORDS),
            address: 0,
            dout: 0,
            write_enabled: false,
            bank: 0,
            status: 0,
            status_history: Vec::new(),
            bank_history: Vec::new(),
            extended_write_status: false,
            busy_polls: DEFAULT_BUSY_POLLS,
            busy_remaining: 0,
        }
    }

    pub fn chip(&self) -> FlashChip {
        self.chip
    }

    /// Word at an absolute byte address.
    pub fn word(&self, absolute: u32) -> u32 {
        self.memory.get(&(absolute & !3)).copied().unwrap_or(0xFFFF_FFFF)
    }

    /// Store a word directly, bypassing the controller.
    pub fn poke(&mut self, absolute: u32, value: u32) {
        self.memory.insert(absolute & !3, value);
    }

    pub fn bank(&self) -> u8 {
        self.bank
    }

    /// Every status-register value written, in order.
    pub fn status_history(&self) -> &[u32] {
        &self.status_history
    }

    /// Every bank selected, in order.
    pub fn bank_history(&self) -> &[u8] {
        &self.bank_history
    }

    /// Whether a write-status command carried the extended flag.
    pub fn saw_extended_write_status(&self) -> bool {
        self.extended_write_status
    }

    /// Polls that report busy after each command.
    pub fn set_busy_polls(&mut self, polls: u32) {
        self.busy_polls = polls;
        self.busy_remaining = polls;
    }

    fn absolute(&self, address: u32) -> u32 {
        u32::from(self.bank) * self.chip.bank_size + (address % self.chip.bank_size)
    }

    /// Consume the write-enable latch. Commands that need it are dropped without it.
    fn take_write_enable(&mut self, cmd: FlashCommand) -> bool {
        if !self.write_enabled {
            log::warn!("simulated flash: {:?} without write enable ignored", cmd);
            return false;
        }
        self.write_enabled = false;
        true
    }

    fn read_status(&mut self) -> u32 {
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            FlashStatus::BUSY.bits()
        } else {
            0
        }
    }

    fn command(&mut self, value: u32) {
        let Some(cmd) = FlashCommand::from_u32(value) else {
            // Writing zero resets the controller.
            if value != 0 {
                log::warn!("simulated flash: unknown command {:#x}", value);
            }
            return;
        };
        self.busy_remaining = self.busy_polls;

        match cmd {
            FlashCommand::WriteEnable => self.write_enabled = true,
            FlashCommand::ReadId => self.dout = READ_ID_JUNK | self.chip.id,
            FlashCommand::ReadStatus => self.dout = self.status,
            FlashCommand::ReadFast => self.dout = self.word(self.absolute(self.address)),
            FlashCommand::ReadBankSelect | FlashCommand::ReadExtendedAddress => {
                self.dout = u32::from(self.bank)
            }
            FlashCommand::WriteStatus => {
                if value & EXTENDED_WRITE_STATUS != 0 {
                    self.extended_write_status = true;
                }
                if self.take_write_enable(cmd) {
                    self.status = self.din.pop_front().unwrap_or(0);
                    self.status_history.push(self.status);
                }
                self.din.clear();
            }
            FlashCommand::BankSelect | FlashCommand::ExtendedAddress => {
                if self.take_write_enable(cmd) {
                    self.bank = (self.address & 0xF) as u8;
                    self.bank_history.push(self.bank);
                }
            }
            FlashCommand::PageProgram => {
                if self.take_write_enable(cmd) {
                    let start = self.absolute(self.address);
                    let words: Vec<u32> = self.din.drain(..).collect();
                    for (i, w) in words.into_iter().enumerate() {
                        let addr = start + 4 * i as u32;
                        // NOR programming only clears bits.
                        let old = self.word(addr);
                        self.memory.insert(addr & !3, old & w);
                    }
                }
                self.din.clear();
            }
            FlashCommand::SectorErase => {
                if self.take_write_enable(cmd) {
                    let sector = self.chip.sector_size;
                    let start = self.absolute(self.address) / sector * sector;
                    let doomed: Vec<u32> =
                        self.memory.range(start..start + sector).map(|(k, _)| *k).collect();
                    for k in doomed {
                        self.memory.remove(&k);
                    }
                }
            }
            FlashCommand::ChipErase => {
                if self.take_write_enable(cmd) {
                    self.memory.clear();
                }
            }
        }
    }

    fn write(&mut self, reg: u32, value: u32) {
        match reg {
            regs::FLASH_CONTROL_STATUS => self.command(value),
            regs::FLASH_ADDRESS => self.address = value,
            regs::FLASH_DIN => {
                if self.din.len() < PAGE_WORDS {
                    self.din.push_back(value);
                } else {
                    log::warn!("simulated flash: DIN FIFO overflow");
                }
            }
            _ => {}
        }
    }

    fn read(&mut self, reg: u32) -> u32 {
        match reg {
            regs::FLASH_CONTROL_STATUS => self.read_status(),
            regs::FLASH_DOUT => self.dout,
            regs::FLASH_ADDRESS => self.address,
            _ => 0,
        }
    }
}

fn is_flash_register(reg: u32) -> bool {
    matches!(
        reg,
        regs::FLASH_ADDRESS | regs::FLASH_CONTROL_STATUS | regs::FLASH_DIN | regs::FLASH_DOUT
    )
}

/// In-memory board simulation.
#[derive(Debug)]
pub struct NoDevice {
    device: DeviceId,
    registers: RwLock<HashMap<u32, u32>>,
    flash: Mutex<Option<SimulatedFlash>>,
}

impl NoDevice {
    /// Simulate `device` with its board ID and routing ROM populated.
    pub fn for_device(device: DeviceId) -> Self {
        let mut registers = HashMap::new();
        registers.insert(regs::BOARD_ID, device.as_u32());
        registers.insert(regs::GLOBAL_CONTROL, 0);
        let legal = router::legal_connections(device);
        for r in router::make_route_rom_registers(&legal) {
            if r.value != 0 {
                registers.insert(r.number, r.value);
            }
        }
        log::debug!(
            "simulating {} with {} initialized registers",
            device,
            registers.len()
        );
        Self {
            device,
            registers: RwLock::new(registers),
            flash: Mutex::new(None),
        }
    }

    /// Attach a simulated SPI flash of a chip from the chip table.
    pub fn with_flash(self, chip_id: u32) -> Ntv2Result<Self> {
        let chip = FlashChip::from_id(chip_id)?;
        *self.flash.lock().unwrap_or_else(|e| e.into_inner()) = Some(SimulatedFlash::new(chip));
        Ok(self)
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Inspect the simulated flash, if one is attached.
    pub fn with_flash_state<T>(&self, f: impl FnOnce(&SimulatedFlash) -> T) -> Option<T> {
        self.flash
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(f)
    }

    /// Modify the simulated flash, if one is attached.
    pub fn with_flash_state_mut<T>(&self, f: impl FnOnce(&mut SimulatedFlash) -> T) -> Option<T> {
        self.flash
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
            .map(f)
    }

    /// Number of registers holding a value.
    pub fn populated(&self) -> usize {
        self.registers.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl RegisterIo for NoDevice {
    fn read_register(&self, reg: u32) -> Ntv2Result<u32> {
        self.check_register(reg)?;
        if is_flash_register(reg) {
            if let Some(v) = self.with_flash_state_mut(|f| f.read(reg)) {
                return Ok(v);
            }
        }
        let regs = self.registers.read().unwrap_or_else(|e| e.into_inner());
        Ok(regs.get(&reg).copied().unwrap_or(0))
    }

    fn write_register(&self, reg: u32, value: u32) -> Ntv2Result<()> {
        self.check_register(reg)?;
        if is_flash_register(reg) && self.with_flash_state_mut(|f| f.write(reg, value)).is_some() {
            return Ok(());
        }
        self.registers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reg, value);
        Ok(())
    }

    fn max_register(&self) -> u32 {
        regs::MAX_REGISTER
    }
}
