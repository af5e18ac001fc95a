// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! SPI flash programming.
//!
//! The board's configuration flash sits behind a small SPI controller
//! reached through four registers:
//!
//! | Register        | Use                                         |
//! |-----------------|---------------------------------------------|
//! | control/status  | command byte in, busy flag (bit 8) out      |
//! | DIN             | data FIFO (up to 64 words = one 256 B page) |
//! | DOUT            | read data                                   |
//! | address         | byte address within the selected bank       |
//!
//! Flash parts larger than 16 MB are split into banks. On boards with a
//! bank-select ROM the programmer selects a bank before touching a block
//! and always returns to bank 0 afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use ntv2_rust::flash::{FlashProgrammer, ProgramOptions};
//! use ntv2_rust::{DeviceId, NoDevice};
//!
//! # fn main() -> Result<(), ntv2_rust::Ntv2Error> {
//! let board = NoDevice::for_device(DeviceId::Kona5).with_flash(0x20BA20)?;
//! let image = std::fs::read("kona5_retail.bit")?;
//! let programmer = FlashProgrammer::new(&board, DeviceId::Kona5)?;
//! programmer.program_bitfile(&image, &ProgramOptions::default(), &mut |p| println!("{}", p))?;
//! # Ok(())
//! # }
//! ```

use crate::bitfile::Bitfile;
use crate::device::DeviceId;
use crate::error::{Ntv2Error, Ntv2Result};
use crate::register::RegisterIo;
use crate::regs;
use bitflags::bitflags;
use std::fmt;

/// Bytes per page program.
pub const PAGE_SIZE: u32 = 256;

/// Words per page program.
pub const PAGE_WORDS: usize = (PAGE_SIZE / 4) as usize;

/// Default number of busy polls before giving up.
pub const DEFAULT_POLL_LIMIT: u32 = 1_000_000;

/// Maximum MCS info string length.
const MAX_MCS_INFO_SIZE: usize = 256 * 1024;

/// Maximum license string length in words.
const MAX_LICENSE_WORDS: usize = 100;

/// Status register value that write-protects the part.
const STATUS_PROTECT: u32 = 0x9C;

/// Status register value written before [`STATUS_PROTECT`] after programming.
const STATUS_PROTECT_PRELUDE: u32 = 0x1C;

bitflags! {
    /// Flash controller status bits (control/status register read).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlashStatus: u32 {
        const BUSY = 1 << 8;
    }
}

/// Extended-command flag OR'ed into the write-status command.
pub const EXTENDED_WRITE_STATUS: u32 = 1 << 16;

/// Controller commands (written to the control/status register).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FlashCommand {
    WriteStatus = 0x01,
    PageProgram = 0x02,
    ReadStatus = 0x05,
    WriteEnable = 0x06,
    ReadFast = 0x0B,
    ReadBankSelect = 0x16,
    BankSelect = 0x17,
    ExtendedAddress = 0xC5,
    ChipErase = 0xC7,
    ReadExtendedAddress = 0xC8,
    SectorErase = 0xD8,
    ReadId = 0x9F,
}

impl FlashCommand {
    /// Decode the low byte of a control register write.
    pub fn from_u32(value: u32) -> Option<Self> {
        use FlashCommand::*;
        Some(match value & 0xFF {
            0x01 => WriteStatus,
            0x02 => PageProgram,
            0x05 => ReadStatus,
            0x06 => WriteEnable,
            0x0B => ReadFast,
            0x16 => ReadBankSelect,
            0x17 => BankSelect,
            0xC5 => ExtendedAddress,
            0xC7 => ChipErase,
            0xC8 => ReadExtendedAddress,
            0xD8 => SectorErase,
            0x9F => ReadId,
            _ => return None,
        })
    }
}

// ============================================================================
// Chip table
// ============================================================================

const MB: u32 = 1024 * 1024;
const KB: u32 = 1024;

/// Geometry of a supported SPI flash part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashChip {
    /// JEDEC ID (`READID & 0xFFFFFF`).
    pub id: u32,
    pub name: &'static str,
    pub flash_size: u32,
    pub bank_size: u32,
    pub sector_size: u32,
    /// Sectors trimmed from the failsafe block.
    pub failsafe_padding: u32,
    /// Micron-style extended command set.
    pub extended_commands: bool,
}

#[rustfmt::skip]
static CHIPS: &[FlashChip] = &[
    FlashChip { id: 0x20_2018, name: "STMicro",     flash_size: 16 * MB, bank_size: 16 * MB, sector_size: 256 * KB, failsafe_padding: 1, extended_commands: false },
    FlashChip { id: 0xC2_2018, name: "Macronix",    flash_size: 16 * MB, bank_size: 16 * MB, sector_size: 256 * KB, failsafe_padding: 1, extended_commands: false },
    FlashChip { id: 0x01_0220, name: "Cypress 512", flash_size: 64 * MB, bank_size: 16 * MB, sector_size: 256 * KB, failsafe_padding: 1, extended_commands: false },
    FlashChip { id: 0x9D_6019, name: "ISSI",        flash_size: 64 * MB, bank_size: 16 * MB, sector_size: 64 * KB,  failsafe_padding: 4, extended_commands: false },
    FlashChip { id: 0x20_BA20, name: "Micron",      flash_size: 64 * MB, bank_size: 16 * MB, sector_size: 64 * KB,  failsafe_padding: 4, extended_commands: true  },
    FlashChip { id: 0xC8_4018, name: "GigaDevice",  flash_size: 16 * MB, bank_size: 16 * MB, sector_size: 64 * KB,  failsafe_padding: 4, extended_commands: false },
    FlashChip { id: 0xEF_4018, name: "Winbond",     flash_size: 16 * MB, bank_size: 16 * MB, sector_size: 64 * KB,  failsafe_padding: 4, extended_commands: false },
    FlashChip { id: 0x01_2018, name: "Cypress 128", flash_size: 16 * MB, bank_size: 16 * MB, sector_size: 64 * KB,  failsafe_padding: 4, extended_commands: false },
    FlashChip { id: 0x01_0219, name: "Cypress 256", flash_size: 32 * MB, bank_size: 16 * MB, sector_size: 64 * KB,  failsafe_padding: 4, extended_commands: false },
];

impl FlashChip {
    /// Look up a part by the value read back from READID.
    pub fn from_id(raw: u32) -> Ntv2Result<Self> {
        let id = raw & 0x00FF_FFFF;
        CHIPS
            .iter()
            .find(|c| c.id == id)
            .copied()
            .ok_or(Ntv2Error::UnknownFlashChip(id))
    }

    pub fn sectors(&self) -> u32 {
        self.flash_size / self.sector_size
    }

    pub fn num_banks(&self) -> u32 {
        self.flash_size / self.bank_size
    }
}

// ============================================================================
// Layout
// ============================================================================

/// Named flash region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashBlock {
    Main,
    Failsafe,
    McsInfo,
    Mac,
    License,
    Soc1,
    Soc2,
}

impl FlashBlock {
    /// Infer the target block from a bitfile name (`_fs_` marks failsafe images).
    pub fn from_file_name(name: &str) -> Self {
        if name.contains("_fs_") {
            FlashBlock::Failsafe
        } else {
            FlashBlock::Main
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FlashBlock::Main => "main",
            FlashBlock::Failsafe => "failsafe",
            FlashBlock::McsInfo => "mcs-info",
            FlashBlock::Mac => "mac",
            FlashBlock::License => "license",
            FlashBlock::Soc1 => "soc1",
            FlashBlock::Soc2 => "soc2",
        }
    }
}

impl fmt::Display for FlashBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Placement of a block: starting bank, address within that bank, size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    pub bank: u8,
    pub offset: u32,
    pub sectors: u32,
}

/// Device-specific block placement for one flash part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLayout {
    pub chip: FlashChip,
    pub spi_version: u8,
    /// Whether the board ROM can switch banks.
    pub bank_select: bool,
    pub main: FlashRegion,
    pub failsafe: FlashRegion,
    pub mcs_info: Option<FlashRegion>,
    pub mac: Option<FlashRegion>,
    pub license: Option<FlashRegion>,
    pub soc1: Option<FlashRegion>,
    pub soc2: Option<FlashRegion>,
}

impl FlashLayout {
    /// Compute block placement for a part on a board of the given SPI flash version.
    pub fn compute(chip: FlashChip, spi_version: u8) -> Self {
        let sectors = chip.sectors();
        let sector = chip.sector_size;
        let bank = chip.bank_size;
        let bank_select = spi_version >= 3 && chip.flash_size > chip.bank_size;
        let failsafe_bank = Self::bank_for_block(FlashBlock::Failsafe, spi_version);
        let one = |offset: u32| {
            Some(FlashRegion {
                bank: Self::bank_for_block(FlashBlock::Mac, spi_version),
                offset,
                sectors: 1,
            })
        };

        let mut layout = Self {
            chip,
            spi_version,
            bank_select,
            main: FlashRegion { bank: 0, offset: 0, sectors: sectors / 2 },
            failsafe: FlashRegion {
                bank: failsafe_bank,
                offset: 0,
                sectors: sectors / 2 - chip.failsafe_padding,
            },
            mcs_info: None,
            mac: None,
            license: None,
            soc1: None,
            soc2: None,
        };

        let quarters = |layout: &mut Self, trim: u32| {
            layout.main.sectors = sectors / 4;
            layout.failsafe.sectors = sectors / 4 - trim;
            layout.soc1 = Some(FlashRegion { bank: 2, offset: 0, sectors: sectors / 4 });
            layout.soc2 = Some(FlashRegion { bank: 3, offset: 0, sectors: sectors / 4 });
        };

        let legacy_mac = Some(FlashRegion { bank: 0, offset: bank - 2 * sector, sectors: 1 });
        match spi_version {
            0 | 1 => {
                layout.main.sectors = sectors / 4;
                layout.failsafe = FlashRegion { bank: 0, offset: 12 * MB, sectors: sectors / 4 - 1 };
                layout.mac = legacy_mac;
            }
            2 => {
                layout.failsafe.bank = 0;
                layout.failsafe.offset = 8 * MB;
                layout.mac = legacy_mac;
            }
            3 | 4 => {
                if spi_version == 4 {
                    quarters(&mut layout, 4);
                } else if chip.id == 0x01_0220 {
                    quarters(&mut layout, 3);
                }
                layout.mac = one(bank - 2 * sector);
                layout.mcs_info = one(bank - 3 * sector);
                layout.license = one(bank - 4 * sector);
            }
            _ => {}
        }
        layout
    }

    /// Bank a block starts in.
    pub fn bank_for_block(block: FlashBlock, spi_version: u8) -> u8 {
        match block {
            FlashBlock::Main => 0,
            FlashBlock::Failsafe => {
                if spi_version >= 5 {
                    2
                } else {
                    1
                }
            }
            FlashBlock::McsInfo | FlashBlock::Mac | FlashBlock::License => 1,
            FlashBlock::Soc1 => 2,
            FlashBlock::Soc2 => 3,
        }
    }

    /// Region for `block`, if this layout has one.
    pub fn region(&self, block: FlashBlock) -> Ntv2Result<FlashRegion> {
        let region = match block {
            FlashBlock::Main => Some(self.main),
            FlashBlock::Failsafe => Some(self.failsafe),
            FlashBlock::McsInfo => self.mcs_info,
            FlashBlock::Mac => self.mac,
            FlashBlock::License => self.license,
            FlashBlock::Soc1 => self.soc1,
            FlashBlock::Soc2 => self.soc2,
        };
        region.ok_or_else(|| {
            Ntv2Error::FlashBlockUnsupported(format!(
                "{} on SPI flash v{} ({})",
                block, self.spi_version, self.chip.name
            ))
        })
    }

    /// Whether large blocks continue into the next bank at the bank boundary.
    pub fn switches_banks(&self) -> bool {
        self.bank_select && self.spi_version >= 5
    }

    /// Bank and in-bank address of byte `offset` within `region`.
    pub fn locate(&self, region: FlashRegion, offset: u32) -> (u8, u32) {
        if self.switches_banks() {
            let bank_size = self.chip.bank_size;
            let absolute = region.offset + offset;
            (region.bank + (absolute / bank_size) as u8, absolute % bank_size)
        } else {
            (region.bank, region.offset + offset)
        }
    }

    /// Capacity of a region in bytes.
    pub fn region_bytes(&self, region: FlashRegion) -> u64 {
        u64::from(region.sectors) * u64::from(self.chip.sector_size)
    }
}

// ============================================================================
// Progress / options
// ============================================================================

/// Programming phase reported through progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashPhase {
    Idle,
    Erase,
    Program,
    Verify,
    Done,
}

/// Progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashProgress {
    pub phase: FlashPhase,
    pub done: u32,
    pub total: u32,
}

impl FlashProgress {
    pub const IDLE: Self = Self {
        phase: FlashPhase::Idle,
        done: 0,
        total: 0,
    };

    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((u64::from(self.done) * 100) / u64::from(self.total)) as u32
    }
}

impl fmt::Display for FlashProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}%", self.phase, self.percent())
    }
}

/// Options for [`FlashProgrammer::program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramOptions {
    pub block: FlashBlock,
    /// Verify every word instead of every 64th.
    pub full_verify: bool,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            block: FlashBlock::Main,
            full_verify: false,
        }
    }
}

/// Six-byte MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    fn to_words(self) -> (u32, u32) {
        let m = self.0;
        let lo = u32::from_be_bytes([m[0], m[1], m[2], m[3]]);
        let hi = u32::from_be_bytes([m[4], m[5], 0, 0]);
        (lo, hi)
    }

    fn from_words(lo: u32, hi: u32) -> Self {
        let l = lo.to_be_bytes();
        let h = hi.to_be_bytes();
        Self([l[0], l[1], l[2], l[3], h[0], h[1]])
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Pack bytes into little-endian words, padding the tail with 0xFF to a page boundary.
pub fn image_words(image: &[u8]) -> Vec<u32> {
    let pages = image.len().div_ceil(PAGE_SIZE as usize).max(1);
    let mut words = Vec::with_capacity(pages * PAGE_WORDS);
    for chunk in image.chunks(4) {
        let mut b = [0xFFu8; 4];
        b[..chunk.len()].copy_from_slice(chunk);
        words.push(u32::from_le_bytes(b));
    }
    words.resize(pages * PAGE_WORDS, 0xFFFF_FFFF);
    words
}

// ============================================================================
// Programmer
// ============================================================================

/// Read the raw flash JEDEC ID through the controller.
pub fn read_flash_id<R: RegisterIo + ?Sized>(regs: &R, poll_limit: u32) -> Ntv2Result<u32> {
    regs.write_register(regs::FLASH_CONTROL_STATUS, FlashCommand::ReadId as u32)?;
    wait_not_busy(regs, poll_limit)?;
    Ok(regs.read_register(regs::FLASH_DOUT)? & 0x00FF_FFFF)
}

fn wait_not_busy<R: RegisterIo + ?Sized>(regs: &R, poll_limit: u32) -> Ntv2Result<()> {
    for _ in 0..poll_limit {
        let status = FlashStatus::from_bits_retain(regs.read_register(regs::FLASH_CONTROL_STATUS)?);
        if !status.contains(FlashStatus::BUSY) {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(Ntv2Error::FlashTimeout {
        reg: regs::FLASH_CONTROL_STATUS,
    })
}

/// SPI flash programmer bound to one board.
pub struct FlashProgrammer<'a, R: RegisterIo + ?Sized> {
    regs: &'a R,
    device: DeviceId,
    layout: FlashLayout,
    poll_limit: u32,
}

impl<'a, R: RegisterIo + ?Sized> FlashProgrammer<'a, R> {
    /// Identify the flash part and compute its layout for `device`.
    pub fn new(regs: &'a R, device: DeviceId) -> Ntv2Result<Self> {
        let id = read_flash_id(regs, DEFAULT_POLL_LIMIT)?;
        let chip = FlashChip::from_id(id)?;
        let layout = FlashLayout::compute(chip, device.spi_flash_version());
        log::info!(
            "{}: {} SPI flash ({} MB, {} KB sectors, SPI v{})",
            device,
            chip.name,
            chip.flash_size / MB,
            chip.sector_size / KB,
            layout.spi_version
        );
        Ok(Self {
            regs,
            device,
            layout,
            poll_limit: DEFAULT_POLL_LIMIT,
        })
    }

    /// Set the busy-poll limit.
    pub fn set_poll_limit(&mut self, limit: u32) {
        self.poll_limit = limit;
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Re-read the JEDEC ID.
    pub fn read_device_id(&self) -> Ntv2Result<u32> {
        read_flash_id(self.regs, self.poll_limit)
    }

    /// Issue a controller command.
    pub fn write_command(&self, cmd: FlashCommand) -> Ntv2Result<()> {
        let mut value = cmd as u32;
        if self.layout.chip.extended_commands && cmd == FlashCommand::WriteStatus {
            value |= EXTENDED_WRITE_STATUS;
        }
        self.regs.write_register(regs::FLASH_CONTROL_STATUS, value)
    }

    /// Poll until the controller clears its busy flag.
    pub fn wait_not_busy(&self) -> Ntv2Result<()> {
        wait_not_busy(self.regs, self.poll_limit)
    }

    fn command_and_wait(&self, cmd: FlashCommand) -> Ntv2Result<()> {
        self.write_command(cmd)?;
        self.wait_not_busy()
    }

    fn write_enable(&self) -> Ntv2Result<()> {
        self.command_and_wait(FlashCommand::WriteEnable)
    }

    fn write_status(&self, value: u32) -> Ntv2Result<()> {
        self.write_enable()?;
        self.regs.write_register(regs::FLASH_DIN, value)?;
        self.command_and_wait(FlashCommand::WriteStatus)
    }

    fn protect(&self) -> Ntv2Result<()> {
        self.write_status(STATUS_PROTECT_PRELUDE)?;
        self.write_status(STATUS_PROTECT)
    }

    /// Select a flash bank. No-op on boards without bank select.
    pub fn set_bank(&self, bank: u8) -> Ntv2Result<()> {
        if !self.layout.bank_select {
            return Ok(());
        }
        self.write_enable()?;
        self.regs.write_register(regs::FLASH_ADDRESS, u32::from(bank))?;
        self.command_and_wait(if self.layout.chip.extended_commands {
            FlashCommand::ExtendedAddress
        } else {
            FlashCommand::BankSelect
        })?;
        log::debug!("selected flash bank {}", bank);
        Ok(())
    }

    /// Currently selected bank (0 on boards without bank select).
    pub fn read_bank(&self) -> Ntv2Result<u8> {
        if !self.layout.bank_select {
            return Ok(0);
        }
        self.command_and_wait(if self.layout.chip.extended_commands {
            FlashCommand::ReadExtendedAddress
        } else {
            FlashCommand::ReadBankSelect
        })?;
        Ok((self.regs.read_register(regs::FLASH_DOUT)? & 0xF) as u8)
    }

    /// Read one word at an in-bank byte address.
    pub fn read_word(&self, address: u32) -> Ntv2Result<u32> {
        self.regs.write_register(regs::FLASH_ADDRESS, address)?;
        self.command_and_wait(FlashCommand::ReadFast)?;
        self.regs.read_register(regs::FLASH_DOUT)
    }

    /// Program a single word.
    pub fn program_word(&self, address: u32, value: u32) -> Ntv2Result<()> {
        self.write_enable()?;
        self.regs.write_register(regs::FLASH_DIN, value)?;
        self.regs.write_register(regs::FLASH_ADDRESS, address)?;
        self.command_and_wait(FlashCommand::PageProgram)
    }

    /// Program one 256-byte page.
    pub fn program_page(&self, address: u32, words: &[u32]) -> Ntv2Result<()> {
        if words.len() != PAGE_WORDS {
            return Err(Ntv2Error::InvalidArgument(format!(
                "page must be {} words, got {}",
                PAGE_WORDS,
                words.len()
            )));
        }
        self.write_enable()?;
        for w in words {
            self.regs.write_register(regs::FLASH_DIN, *w)?;
        }
        self.regs.write_register(regs::FLASH_ADDRESS, address)?;
        self.command_and_wait(FlashCommand::PageProgram)
    }

    /// Erase the sector containing `address` in the selected bank.
    pub fn erase_sector(&self, address: u32) -> Ntv2Result<()> {
        self.regs.write_register(regs::FLASH_ADDRESS, address)?;
        self.write_enable()?;
        self.command_and_wait(FlashCommand::SectorErase)
    }

    /// Erase the whole part.
    pub fn erase_chip(&self) -> Ntv2Result<()> {
        self.regs.write_register(regs::FLASH_CONTROL_STATUS, 0)?;
        self.write_status(0)?;
        self.write_enable()?;
        self.command_and_wait(FlashCommand::ChipErase)
    }

    /// Run `f` and reselect bank 0 afterwards, even on error.
    fn in_bank_scope<T>(&self, f: impl FnOnce() -> Ntv2Result<T>) -> Ntv2Result<T> {
        let restore = scopeguard::guard((), |_| {
            if let Err(e) = self.set_bank(0) {
                log::warn!("failed to restore flash bank 0: {}", e);
            }
        });
        let result = f();
        drop(restore);
        result
    }

    /// Erase every sector of a block.
    pub fn erase_block(
        &self,
        block: FlashBlock,
        progress: &mut dyn FnMut(FlashProgress),
    ) -> Ntv2Result<()> {
        let region = self.layout.region(block)?;
        self.in_bank_scope(|| {
            let mut bank = region.bank;
            self.set_bank(bank)?;
            self.write_status(0)?;

            let sector = self.layout.chip.sector_size;
            let mut reporter = Reporter::new(FlashPhase::Erase, region.sectors, progress);
            for i in 0..region.sectors {
                let (b, address) = self.layout.locate(region, i * sector);
                if b != bank {
                    bank = b;
                    self.set_bank(bank)?;
                }
                self.erase_sector(address)?;
                reporter.update(i + 1);
            }
            Ok(())
        })
    }

    /// Erase, program, verify and protect a block with `image`.
    pub fn program(
        &self,
        image: &[u8],
        options: &ProgramOptions,
        progress: &mut dyn FnMut(FlashProgress),
    ) -> Ntv2Result<()> {
        let region = self.layout.region(options.block)?;
        let capacity = self.layout.region_bytes(region);
        if image.len() as u64 > capacity {
            return Err(Ntv2Error::InvalidArgument(format!(
                "image of {} bytes exceeds {} block ({} bytes)",
                image.len(),
                options.block,
                capacity
            )));
        }

        let words = image_words(image);
        log::info!(
            "{}: programming {} bytes into {} flash block",
            self.device,
            image.len(),
            options.block
        );

        self.erase_block(options.block, progress)?;

        self.in_bank_scope(|| {
            let pages = (words.len() / PAGE_WORDS) as u32;
            let mut bank = region.bank;
            self.set_bank(bank)?;
            let mut reporter = Reporter::new(FlashPhase::Program, pages, progress);
            for (i, page) in words.chunks_exact(PAGE_WORDS).enumerate() {
                let (b, address) = self.layout.locate(region, i as u32 * PAGE_SIZE);
                if b != bank {
                    bank = b;
                    self.set_bank(bank)?;
                }
                self.program_page(address, page)?;
                reporter.update(i as u32 + 1);
            }
            Ok(())
        })?;

        self.verify(options.block, &words, options.full_verify, progress)?;

        self.in_bank_scope(|| self.protect())?;
        progress(FlashProgress {
            phase: FlashPhase::Done,
            done: 1,
            total: 1,
        });
        Ok(())
    }

    /// Check a bitfile against this board, then program it.
    pub fn program_bitfile(
        &self,
        file: &[u8],
        options: &ProgramOptions,
        progress: &mut dyn FnMut(FlashProgress),
    ) -> Ntv2Result<()> {
        let bitfile = Bitfile::parse_header(file)?;
        if !bitfile.can_flash_device(self.device) {
            return Err(Ntv2Error::BitfileIncompatible {
                design: bitfile.design_name().to_string(),
                device: self.device.to_string(),
            });
        }
        // Bounds-check the program stream before erasing anything.
        bitfile.program_stream(file)?;
        self.program(file, options, progress)
    }

    /// Compare flash contents against `words`.
    ///
    /// A sparse verify checks the first word of every page.
    pub fn verify(
        &self,
        block: FlashBlock,
        words: &[u32],
        full: bool,
        progress: &mut dyn FnMut(FlashProgress),
    ) -> Ntv2Result<()> {
        let region = self.layout.region(block)?;
        let step = if full { 1 } else { PAGE_WORDS };
        self.in_bank_scope(|| {
            let mut bank = region.bank;
            self.set_bank(bank)?;
            let mut reporter = Reporter::new(FlashPhase::Verify, words.len() as u32, progress);
            for i in (0..words.len()).step_by(step) {
                let (b, address) = self.layout.locate(region, i as u32 * 4);
                if b != bank {
                    bank = b;
                    self.set_bank(bank)?;
                }
                let actual = self.read_word(address)?;
                if actual != words[i] {
                    return Err(Ntv2Error::FlashVerify {
                        word: i,
                        expected: words[i],
                        actual,
                    });
                }
                reporter.update(i as u32 + 1);
            }
            reporter.update(words.len() as u32);
            Ok(())
        })
    }

    /// Read `len` bytes from the start of a block.
    pub fn read_flash(&self, block: FlashBlock, len: usize) -> Ntv2Result<Vec<u8>> {
        let region = self.layout.region(block)?;
        if len as u64 > self.layout.region_bytes(region) {
            return Err(Ntv2Error::InvalidArgument(format!(
                "read of {} bytes exceeds {} block",
                len, block
            )));
        }
        self.in_bank_scope(|| {
            let mut bank = region.bank;
            self.set_bank(bank)?;
            let mut out = Vec::with_capacity(len.next_multiple_of(4));
            for i in 0..len.div_ceil(4) {
                let (b, address) = self.layout.locate(region, i as u32 * 4);
                if b != bank {
                    bank = b;
                    self.set_bank(bank)?;
                }
                out.extend_from_slice(&self.read_word(address)?.to_le_bytes());
            }
            out.truncate(len);
            Ok(out)
        })
    }

    /// Read consecutive words from a single-sector block until `stop` says so.
    fn read_words_until(
        &self,
        block: FlashBlock,
        max_words: usize,
        mut stop: impl FnMut(u32) -> bool,
    ) -> Ntv2Result<Vec<u32>> {
        let region = self.layout.region(block)?;
        self.in_bank_scope(|| {
            self.set_bank(region.bank)?;
            let mut words = Vec::new();
            for i in 0..max_words {
                let w = self.read_word(region.offset + i as u32 * 4)?;
                if stop(w) {
                    break;
                }
                words.push(w);
            }
            Ok(words)
        })
    }

    /// Read the MCS info string stored alongside the bitfile.
    pub fn read_mcs_info(&self) -> Ntv2Result<String> {
        let words = self.read_words_until(FlashBlock::McsInfo, MAX_MCS_INFO_SIZE / 4, |w| {
            w == 0 || w == 0xFFFF_FFFF
        })?;
        let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        if let Some(pos) = bytes.windows(2).position(|w| w == [0xFF, 0xFF]) {
            bytes.truncate(pos);
        }
        if let Some(pos) = bytes.iter().position(|b| *b == 0) {
            bytes.truncate(pos);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read the two board MAC addresses.
    pub fn read_mac_addresses(&self) -> Ntv2Result<(MacAddr, MacAddr)> {
        let region = self.layout.region(FlashBlock::Mac)?;
        self.in_bank_scope(|| {
            self.set_bank(region.bank)?;
            let mut w = [0u32; 4];
            for (i, slot) in w.iter_mut().enumerate() {
                *slot = self.read_word(region.offset + i as u32 * 4)?;
            }
            Ok((MacAddr::from_words(w[0], w[1]), MacAddr::from_words(w[2], w[3])))
        })
    }

    /// Write the two board MAC addresses.
    pub fn program_mac_addresses(&self, mac1: MacAddr, mac2: MacAddr) -> Ntv2Result<()> {
        let region = self.layout.region(FlashBlock::Mac)?;
        self.erase_block(FlashBlock::Mac, &mut |_| {})?;
        self.in_bank_scope(|| {
            self.set_bank(region.bank)?;
            let (lo1, hi1) = mac1.to_words();
            let (lo2, hi2) = mac2.to_words();
            for (i, w) in [lo1, hi1, lo2, hi2].into_iter().enumerate() {
                self.program_word(region.offset + i as u32 * 4, w)?;
            }
            self.write_status(STATUS_PROTECT)
        })
    }

    /// Read the license string. `None` if the block is erased.
    pub fn read_license(&self) -> Ntv2Result<Option<String>> {
        let mut erased = false;
        let words = self.read_words_until(FlashBlock::License, MAX_LICENSE_WORDS, |w| {
            erased = w == 0xFFFF_FFFF;
            erased || w == 0
        })?;
        if words.is_empty() && erased {
            return Ok(None);
        }
        let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        if let Some(pos) = bytes.iter().position(|b| *b == 0) {
            bytes.truncate(pos);
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Write a license string (NUL-terminated, zero-padded).
    pub fn program_license(&self, license: &str) -> Ntv2Result<()> {
        if license.len() / 4 + 2 > MAX_LICENSE_WORDS {
            return Err(Ntv2Error::InvalidArgument(format!(
                "license string of {} bytes is too long",
                license.len()
            )));
        }
        let region = self.layout.region(FlashBlock::License)?;
        self.erase_block(FlashBlock::License, &mut |_| {})?;

        let mut bytes = license.as_bytes().to_vec();
        bytes.resize((license.len() / 4 + 2) * 4, 0);
        self.in_bank_scope(|| {
            self.set_bank(region.bank)?;
            for (i, chunk) in bytes.chunks_exact(4).enumerate() {
                let w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                self.program_word(region.offset + i as u32 * 4, w)?;
            }
            self.protect()
        })
    }

    /// CRC-32 of `len` bytes read back from a block.
    pub fn readback_crc32(&self, block: FlashBlock, len: usize) -> Ntv2Result<u32> {
        Ok(crc32fast::hash(&self.read_flash(block, len)?))
    }
}

/// Emits progress callbacks and logs every 10%.
struct Reporter<'p> {
    phase: FlashPhase,
    total: u32,
    last_logged: u32,
    sink: &'p mut dyn FnMut(FlashProgress),
}

impl<'p> Reporter<'p> {
    fn new(phase: FlashPhase, total: u32, sink: &'p mut dyn FnMut(FlashProgress)) -> Self {
        sink(FlashProgress {
            phase,
            done: 0,
            total,
        });
        Self {
            phase,
            total,
            last_logged: 0,
            sink,
        }
    }

    fn update(&mut self, done: u32) {
        let p = FlashProgress {
            phase: self.phase,
            done: done.min(self.total),
            total: self.total,
        };
        (self.sink)(p);
        let decile = p.percent() / 10;
        if decile > self.last_logged {
            self.last_logged = decile;
            log::info!("flash {:?}: {}%", self.phase, decile * 10);
        }
    }
}

// ============================================================================
// Async support
// ============================================================================

/// Program a block on a blocking task, publishing progress on a watch channel.
#[cfg(feature = "tokio")]
pub async fn program_async<R>(
    regs: std::sync::Arc<R>,
    device: DeviceId,
    image: Vec<u8>,
    options: ProgramOptions,
    progress: tokio::sync::watch::Sender<FlashProgress>,
) -> Ntv2Result<()>
where
    R: RegisterIo + Send + Sync + 'static,
{
    tokio::task::spawn_blocking(move || {
        let programmer = FlashProgrammer::new(regs.as_ref(), device)?;
        programmer.program(&image, &options, &mut |p| {
            let _ = progress.send(p);
        })
    })
    .await
    .map_err(|e| Ntv2Error::Io(std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodevice::NoDevice;

    const MICRON: u32 = 0x20_BA20;
    const CYPRESS_256: u32 = 0x01_0219;
    const CYPRESS_512: u32 = 0x01_0220;
    const WINBOND: u32 = 0xEF_4018;

    fn board(device: DeviceId, chip: u32) -> NoDevice {
        NoDevice::for_device(device).with_flash(chip).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_chip_lookup() {
        let chip = FlashChip::from_id(0xFF20_BA20).unwrap();
        assert_eq!(chip.name, "Micron");
        assert!(chip.extended_commands);
        assert_eq!(chip.num_banks(), 4);
        assert!(matches!(
            FlashChip::from_id(0x12_3456),
            Err(Ntv2Error::UnknownFlashChip(0x12_3456))
        ));
    }

    #[test]
    fn test_layout_v1() {
        let l = FlashLayout::compute(FlashChip::from_id(WINBOND).unwrap(), 1);
        assert!(!l.bank_select);
        assert_eq!(l.main.sectors, 64);
        assert_eq!(l.failsafe.sectors, 63);
        assert_eq!(l.failsafe.offset, 12 * MB);
        assert_eq!(
            l.region(FlashBlock::Mac).unwrap(),
            FlashRegion { bank: 0, offset: 16 * MB - 2 * 64 * KB, sectors: 1 }
        );
        assert!(l.region(FlashBlock::McsInfo).is_err());
    }

    #[test]
    fn test_layout_v2() {
        let l = FlashLayout::compute(FlashChip::from_id(0x20_2018).unwrap(), 2);
        assert_eq!(l.main.sectors, 32);
        assert_eq!(l.failsafe.sectors, 31);
        assert_eq!(l.failsafe.offset, 8 * MB);
        assert_eq!(l.mac.unwrap().offset, 16 * MB - 2 * 256 * KB);
        assert_eq!(l.mac.unwrap().bank, 0);
    }

    #[test]
    fn test_layout_v3() {
        let chip = FlashChip::from_id(CYPRESS_256).unwrap();
        let l = FlashLayout::compute(chip, 3);
        assert!(l.bank_select);
        assert_eq!(l.main.sectors, 256);
        assert_eq!(l.failsafe, FlashRegion { bank: 1, offset: 0, sectors: 252 });
        assert_eq!(l.mac.unwrap().offset, 16 * MB - 2 * 64 * KB);
        assert_eq!(l.mcs_info.unwrap().offset, 16 * MB - 3 * 64 * KB);
        assert_eq!(l.license.unwrap().offset, 16 * MB - 4 * 64 * KB);
        assert!(l.soc1.is_none());

        let quad = FlashLayout::compute(FlashChip::from_id(CYPRESS_512).unwrap(), 3);
        assert_eq!(quad.main.sectors, 64);
        assert_eq!(quad.failsafe.sectors, 61);
        assert_eq!(quad.soc2.unwrap().bank, 3);
    }

    #[test]
    fn test_layout_v4_and_v5() {
        let chip = FlashChip::from_id(MICRON).unwrap();
        let v4 = FlashLayout::compute(chip, 4);
        assert_eq!(v4.main.sectors, 256);
        assert_eq!(v4.failsafe.sectors, 252);
        assert_eq!(v4.soc1.unwrap().bank, 2);
        assert!(!v4.switches_banks());

        let v5 = FlashLayout::compute(chip, 5);
        assert_eq!(v5.main.sectors, 512);
        assert_eq!(v5.failsafe.sectors, 508);
        assert_eq!(v5.failsafe.bank, 2);
        assert!(v5.switches_banks());
        assert!(v5.region(FlashBlock::License).is_err());
    }

    #[test]
    fn test_locate_switches_bank_at_boundary() {
        let l = FlashLayout::compute(FlashChip::from_id(MICRON).unwrap(), 5);
        assert_eq!(l.locate(l.main, 0), (0, 0));
        assert_eq!(l.locate(l.main, 16 * MB - 4), (0, 16 * MB - 4));
        assert_eq!(l.locate(l.main, 16 * MB), (1, 0));
        assert_eq!(l.locate(l.failsafe, 16 * MB + 256), (3, 256));

        let v3 = FlashLayout::compute(FlashChip::from_id(CYPRESS_256).unwrap(), 3);
        assert_eq!(v3.locate(v3.failsafe, 1024), (1, 1024));
    }

    #[test]
    fn test_bank_for_block() {
        assert_eq!(FlashLayout::bank_for_block(FlashBlock::Failsafe, 3), 1);
        assert_eq!(FlashLayout::bank_for_block(FlashBlock::Failsafe, 5), 2);
        assert_eq!(FlashLayout::bank_for_block(FlashBlock::Mac, 4), 1);
        assert_eq!(FlashLayout::bank_for_block(FlashBlock::Soc2, 4), 3);
    }

    #[test]
    fn test_image_words_pads_with_ff() {
        let words = image_words(&[1, 2, 3, 4, 5]);
        assert_eq!(words.len(), PAGE_WORDS);
        assert_eq!(words[0], 0x0403_0201);
        assert_eq!(words[1], 0xFFFF_FF05);
        assert_eq!(words[2], 0xFFFF_FFFF);
    }

    #[test]
    fn test_program_and_read_back() {
        let dev = board(DeviceId::Kona1, CYPRESS_256);
        let p = FlashProgrammer::new(&dev, DeviceId::Kona1).unwrap();
        assert_eq!(p.read_device_id().unwrap(), CYPRESS_256);

        let image = pattern(3000);
        let mut phases = Vec::new();
        p.program(&image, &ProgramOptions { block: FlashBlock::Failsafe, full_verify: true }, &mut |pr| {
            if phases.last() != Some(&pr.phase) {
                phases.push(pr.phase);
            }
        })
        .unwrap();
        assert_eq!(
            phases,
            vec![FlashPhase::Erase, FlashPhase::Program, FlashPhase::Verify, FlashPhase::Done]
        );

        assert_eq!(p.read_flash(FlashBlock::Failsafe, image.len()).unwrap(), image);
        assert_eq!(
            p.readback_crc32(FlashBlock::Failsafe, image.len()).unwrap(),
            crc32fast::hash(&image)
        );
        // Failsafe lives in bank 1; main (bank 0) stays erased.
        assert_eq!(dev.with_flash_state(|f| f.word(0)).unwrap(), 0xFFFF_FFFF);
        assert_eq!(dev.with_flash_state(|f| f.word(16 * MB)).unwrap(), 0x1811_0A03);
        assert_eq!(p.read_bank().unwrap(), 0);
        assert_eq!(
            dev.with_flash_state(|f| f.status_history().to_vec()).unwrap(),
            vec![0, STATUS_PROTECT_PRELUDE, STATUS_PROTECT]
        );
    }

    #[test]
    fn test_erase_block_switches_banks_on_v5() {
        let dev = board(DeviceId::Kona5, CYPRESS_512);
        let p = FlashProgrammer::new(&dev, DeviceId::Kona5).unwrap();
        p.erase_block(FlashBlock::Main, &mut |_| {}).unwrap();
        let banks = dev.with_flash_state(|f| f.bank_history().to_vec()).unwrap();
        assert_eq!(banks, vec![0, 1, 0]);
        assert_eq!(p.read_bank().unwrap(), 0);
    }

    #[test]
    fn test_extended_commands_on_micron() {
        let dev = board(DeviceId::Kona5, MICRON);
        let p = FlashProgrammer::new(&dev, DeviceId::Kona5).unwrap();
        p.program(&pattern(600), &ProgramOptions::default(), &mut |_| {}).unwrap();
        assert!(dev.with_flash_state(|f| f.saw_extended_write_status()).unwrap());
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let dev = board(DeviceId::Kona1, CYPRESS_256);
        let p = FlashProgrammer::new(&dev, DeviceId::Kona1).unwrap();
        let image = pattern(512);
        p.program(&image, &ProgramOptions::default(), &mut |_| {}).unwrap();

        let mut words = image_words(&image);
        words[64] ^= 1;
        let err = p.verify(FlashBlock::Main, &words, false, &mut |_| {}).unwrap_err();
        assert!(matches!(err, Ntv2Error::FlashVerify { word: 64, .. }));
        assert_eq!(p.read_bank().unwrap(), 0);
    }

    #[test]
    fn test_image_too_large() {
        let dev = board(DeviceId::Kona4, WINBOND);
        let p = FlashProgrammer::new(&dev, DeviceId::Kona4).unwrap();
        let err = p
            .program(&vec![0u8; 5 * MB as usize], &ProgramOptions::default(), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Ntv2Error::InvalidArgument(_)));
    }

    #[test]
    fn test_busy_timeout() {
        let dev = board(DeviceId::Kona1, CYPRESS_256);
        let mut p = FlashProgrammer::new(&dev, DeviceId::Kona1).unwrap();
        dev.with_flash_state_mut(|f| f.set_busy_polls(50));
        p.set_poll_limit(5);
        assert!(matches!(
            p.read_device_id(),
            Err(Ntv2Error::FlashTimeout { .. })
        ));
    }

    #[test]
    fn test_mac_addresses() {
        let dev = board(DeviceId::Kona1, CYPRESS_256);
        let p = FlashProgrammer::new(&dev, DeviceId::Kona1).unwrap();
        let mac1 = MacAddr([0x00, 0x0C, 0x17, 0x01, 0x02, 0x03]);
        let mac2 = MacAddr([0x00, 0x0C, 0x17, 0x01, 0x02, 0x04]);
        p.program_mac_addresses(mac1, mac2).unwrap();
        assert_eq!(p.read_mac_addresses().unwrap(), (mac1, mac2));
        assert_eq!(mac1.to_string(), "00:0c:17:01:02:03");
    }

    #[test]
    fn test_mac_addresses_legacy_board() {
        let dev = board(DeviceId::Kona4, WINBOND);
        let p = FlashProgrammer::new(&dev, DeviceId::Kona4).unwrap();
        let mac1 = MacAddr([0x00, 0x0C, 0x17, 0x0A, 0x0B, 0x0C]);
        let mac2 = MacAddr([0x00, 0x0C, 0x17, 0x0A, 0x0B, 0x0D]);
        p.program_mac_addresses(mac1, mac2).unwrap();
        assert_eq!(p.read_mac_addresses().unwrap(), (mac1, mac2));
        assert_eq!(p.read_bank().unwrap(), 0);
    }

    #[test]
    fn test_license_round_trip() {
        let dev = board(DeviceId::Kona1, CYPRESS_256);
        let p = FlashProgrammer::new(&dev, DeviceId::Kona1).unwrap();
        assert_eq!(p.read_license().unwrap(), None);
        p.program_license("ABC-1234-XYZ").unwrap();
        assert_eq!(p.read_license().unwrap().as_deref(), Some("ABC-1234-XYZ"));
    }

    #[test]
    fn test_mcs_info_cut_at_ff() {
        let dev = board(DeviceId::Kona1, CYPRESS_256);
        let p = FlashProgrammer::new(&dev, DeviceId::Kona1).unwrap();
        let region = p.layout().region(FlashBlock::McsInfo).unwrap();
        let text = b"kona1;2025/01/02\xFF\xFF\xFF\xFF";
        dev.with_flash_state_mut(|f| {
            for (i, chunk) in text.chunks(4).enumerate() {
                let mut b = [0u8; 4];
                b[..chunk.len()].copy_from_slice(chunk);
                f.poke(16 * MB + region.offset + i as u32 * 4, u32::from_le_bytes(b));
            }
        });
        assert_eq!(p.read_mcs_info().unwrap(), "kona1;2025/01/02");
    }

    #[test]
    fn test_program_bitfile_rejects_wrong_device() {
        let dev = board(DeviceId::Kona1, CYPRESS_256);
        let p = FlashProgrammer::new(&dev, DeviceId::Kona1).unwrap();
        let file = crate::bitfile::tests::build_bitfile("corvid_88;UserID=0XFFFFFFFF", &[0u8; 64]);
        assert!(matches!(
            p.program_bitfile(&file, &ProgramOptions::default(), &mut |_| {}),
            Err(Ntv2Error::BitfileIncompatible { .. })
        ));

        let ok = crate::bitfile::tests::build_bitfile("kona1;UserID=0XFFFFFFFF", &[0x5Au8; 64]);
        p.program_bitfile(&ok, &ProgramOptions::default(), &mut |_| {}).unwrap();
        assert_eq!(p.read_flash(FlashBlock::Main, ok.len()).unwrap(), ok);
    }

    #[test]
    fn test_flash_block_from_file_name() {
        assert_eq!(FlashBlock::from_file_name("kona5_fs_retail.bit"), FlashBlock::Failsafe);
        assert_eq!(FlashBlock::from_file_name("kona5_retail.bit"), FlashBlock::Main);
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_program_async_reports_done() {
        let dev = std::sync::Arc::new(board(DeviceId::Kona1, CYPRESS_256));
        let (tx, rx) = tokio::sync::watch::channel(FlashProgress::IDLE);
        program_async(dev.clone(), DeviceId::Kona1, pattern(1024), ProgramOptions::default(), tx)
            .await
            .unwrap();
        assert_eq!(rx.borrow().phase, FlashPhase::Done);
    }
}
