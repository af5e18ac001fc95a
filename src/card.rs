// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Board-level operations over any register backend.
//!
//! # Example
//!
//! ```rust
//! use ntv2_rust::{Card, DeviceId, InputXpt, OutputXpt};
//!
//! let card = Card::no_device(DeviceId::Kona4);
//! card.connect(InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER1_YUV, true)?;
//! assert_eq!(card.connected_output(InputXpt::SDI_OUT1)?, OutputXpt::FRAME_BUFFER1_YUV);
//! # Ok::<(), ntv2_rust::Ntv2Error>(())
//! ```

use crate::devspec::{DeviceSpec, DeviceSpecKind};
use crate::device::{self, DeviceId, DeviceInfo};
use crate::error::{Ntv2Error, Ntv2Result};
use crate::flash::FlashProgrammer;
use crate::mmio::MappedRegisters;
use crate::nodevice::NoDevice;
use crate::nub::NubClient;
use crate::register::{RegInfo, RegisterIo};
use crate::regs;
use crate::router::{self, SignalRouter};
use crate::xpt::{Channel, InputXpt, OutputXpt, WidgetId};
use std::collections::{BTreeSet, VecDeque};

/// Any backend, chosen at run time.
pub type DynRegisters = Box<dyn RegisterIo + Send + Sync>;

/// An NTV2 board.
pub struct Card<R> {
    regs: R,
    device: DeviceId,
}

impl<R: RegisterIo> Card<R> {
    /// Wrap a backend, identifying the board from its ID register.
    pub fn new(regs: R) -> Ntv2Result<Self> {
        let board_id = regs.read_register(regs::BOARD_ID)?;
        let device = DeviceId::from_u32(board_id).ok_or_else(|| {
            Ntv2Error::InvalidArgument(format!("unknown board id {:#010x}", board_id))
        })?;
        log::debug!("opened {} (board id {:#010x})", device, board_id);
        Ok(Self { regs, device })
    }

    pub fn device_id(&self) -> DeviceId {
        self.device
    }

    /// Raw board ID register.
    pub fn board_id(&self) -> Ntv2Result<u32> {
        self.regs.read_register(regs::BOARD_ID)
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn into_registers(self) -> R {
        self.regs
    }

    // ------------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------------

    pub fn read_register(&self, reg: u32) -> Ntv2Result<u32> {
        self.regs.read_register(reg)
    }

    pub fn write_register(&self, reg: u32, value: u32) -> Ntv2Result<()> {
        self.regs.write_register(reg, value)
    }

    pub fn read_register_masked(&self, reg: u32, mask: u32, shift: u32) -> Ntv2Result<u32> {
        self.regs.read_register_masked(reg, mask, shift)
    }

    pub fn write_register_masked(
        &self,
        reg: u32,
        value: u32,
        mask: u32,
        shift: u32,
    ) -> Ntv2Result<()> {
        self.regs.write_register_masked(reg, value, mask, shift)
    }

    pub fn read_registers(&self, regs: &mut [RegInfo]) -> Ntv2Result<()> {
        self.regs.read_registers(regs)
    }

    pub fn write_registers(&self, regs: &[RegInfo]) -> Ntv2Result<()> {
        self.regs.write_registers(regs)
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Select register, mask and shift for `input`.
    fn select_field(&self, input: InputXpt) -> Ntv2Result<(u32, u32, u32)> {
        let (reg, ndx) = input.select_register().ok_or_else(|| {
            Ntv2Error::InvalidCrosspoint(format!("{:?} has no select register", input))
        })?;
        if reg == 0 || reg > self.regs.max_register() || ndx > 3 {
            return Err(Ntv2Error::InvalidCrosspoint(format!(
                "{:?} maps to register {} byte {}",
                input, reg, ndx
            )));
        }
        let shift = u32::from(ndx) * 8;
        Ok((reg, 0xFF << shift, shift))
    }

    /// Output currently feeding `input`.
    pub fn connected_output(&self, input: InputXpt) -> Ntv2Result<OutputXpt> {
        let (reg, mask, shift) = self.select_field(input)?;
        let value = self.regs.read_register_masked(reg, mask, shift)?;
        Ok(OutputXpt(value as u8))
    }

    /// Every input fed by `output`.
    pub fn connected_inputs(&self, output: OutputXpt) -> Ntv2Result<Vec<InputXpt>> {
        let routing = self.routing()?;
        Ok(routing
            .iter()
            .filter(|(_, o)| *o == output)
            .map(|(i, _)| i)
            .collect())
    }

    /// First input fed by `output`, if any.
    pub fn connected_input(&self, output: OutputXpt) -> Ntv2Result<Option<InputXpt>> {
        Ok(self.connected_inputs(output)?.into_iter().next())
    }

    /// Route `output` into `input`. `BLACK` disconnects.
    ///
    /// With `validate`, the routing ROM must allow the connection.
    pub fn connect(&self, input: InputXpt, output: OutputXpt, validate: bool) -> Ntv2Result<()> {
        let (reg, mask, shift) = self.select_field(input)?;
        if validate && output != OutputXpt::BLACK && !self.can_connect(input, output)? {
            return Err(Ntv2Error::RouteNotAllowed {
                input: input.name().to_string(),
                output: output.name().to_string(),
            });
        }
        log::debug!("{}: {} <== {}", self.device, input, output);
        self.regs
            .write_register_masked(reg, u32::from(output.id()), mask, shift)
    }

    pub fn disconnect(&self, input: InputXpt) -> Ntv2Result<()> {
        self.connect(input, OutputXpt::BLACK, false)
    }

    /// Whether the routing ROM allows `output` into `input`.
    ///
    /// Every input accepts `BLACK`. Boards with an empty ROM for `input` fall
    /// back to the static table.
    pub fn can_connect(&self, input: InputXpt, output: OutputXpt) -> Ntv2Result<bool> {
        let base = router::rom_register_base(input)
            .ok_or_else(|| Ntv2Error::InvalidCrosspoint(format!("{:?}", input)))?;
        if output == OutputXpt::BLACK {
            return Ok(true);
        }
        let mut rom: Vec<RegInfo> = (0..regs::XPT_ROM_REGS_PER_INPUT)
            .map(|n| RegInfo::new(base + n, 0))
            .collect();
        self.regs.read_registers(&mut rom)?;
        if rom.iter().all(|r| r.value == 0) {
            log::debug!("{}: empty routing ROM for {}", self.device, input);
            return Ok(router::is_legal_connection(self.device, input, output));
        }
        let (word, bit) = router::rom_bit(output);
        Ok(rom[word as usize].value & (1 << bit) != 0)
    }

    /// Disconnect every input.
    pub fn clear_routing(&self) -> Ntv2Result<()> {
        for reg in regs::XPT_SELECT_REGISTERS {
            self.regs.write_register(reg, 0)?;
        }
        Ok(())
    }

    /// Every current connection.
    pub fn routing(&self) -> Ntv2Result<SignalRouter> {
        let mut reads: Vec<RegInfo> = regs::XPT_SELECT_REGISTERS
            .iter()
            .map(|r| RegInfo::new(*r, 0))
            .collect();
        self.regs.read_registers(&mut reads)?;
        SignalRouter::connections_from_registers(&reads)
    }

    /// Connections upstream of the SDI output of `channel`.
    pub fn routing_for_channel(&self, channel: Channel) -> Ntv2Result<SignalRouter> {
        let start = *InputXpt::SDI_OUTS.get(channel.index()).ok_or_else(|| {
            Ntv2Error::InvalidArgument(format!("no SDI output for channel {}", channel))
        })?;

        let mut router = SignalRouter::new();
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(input) = queue.pop_front() {
            if !visited.insert(input) {
                continue;
            }
            let output = self.connected_output(input)?;
            if output == OutputXpt::BLACK {
                continue;
            }
            router.add_connection(input, output);
            let Some(widget) = WidgetId::for_output(output) else {
                continue;
            };
            if self.device.can_do_widget(widget) {
                queue.extend(widget.inputs().iter().filter(|i| !visited.contains(*i)));
            }
        }
        Ok(router)
    }

    /// Apply `router`. With `replace`, clear everything else first.
    pub fn apply_signal_route(&self, router: &SignalRouter, replace: bool) -> Ntv2Result<()> {
        if replace {
            self.clear_routing()?;
        }
        let writes = router.register_writes()?;
        log::debug!("{}: applying {} connections", self.device, writes.len());
        self.regs.write_registers(&writes)
    }

    /// Disconnect each of `router`'s connections that is currently made.
    pub fn remove_connections(&self, router: &SignalRouter) -> Ntv2Result<()> {
        for (input, output) in router.iter() {
            if self.connected_output(input)? == output {
                self.disconnect(input)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Flash
    // ------------------------------------------------------------------------

    pub fn flash_programmer(&self) -> Ntv2Result<FlashProgrammer<'_, R>> {
        FlashProgrammer::new(&self.regs, self.device)
    }
}

impl Card<NoDevice> {
    /// Simulated board.
    pub fn no_device(device: DeviceId) -> Self {
        Self {
            regs: NoDevice::for_device(device),
            device,
        }
    }

    /// Simulated board with a simulated SPI flash part.
    pub fn no_device_with_flash(device: DeviceId, chip_id: u32) -> Ntv2Result<Self> {
        Ok(Self {
            regs: NoDevice::for_device(device).with_flash(chip_id)?,
            device,
        })
    }
}

impl Card<MappedRegisters> {
    /// Local board by index.
    pub fn open_index(index: u32) -> Ntv2Result<Self> {
        let info = device::find_device(index)?;
        Self::open_info(&info)
    }

    fn open_info(info: &DeviceInfo) -> Ntv2Result<Self> {
        Self::new(MappedRegisters::open(&info.path)?)
    }
}

impl Card<DynRegisters> {
    /// Open whatever a device spec names.
    pub fn open_spec(spec: &str) -> Ntv2Result<Self> {
        let spec = DeviceSpec::parse(spec)?;
        let regs: DynRegisters = match spec.kind() {
            DeviceSpecKind::Simulated(model) => Box::new(NoDevice::for_device(*model)),
            DeviceSpecKind::Remote => {
                let config = spec.nub_config()?;
                Box::new(NubClient::connect_and_open(&config, spec.remote_board_index())?)
            }
            DeviceSpecKind::LocalIndex(index) => {
                Box::new(Card::open_index(*index)?.into_registers())
            }
            DeviceSpecKind::LocalModel(model) => {
                Box::new(open_local_by_id(model.as_u32())?.into_registers())
            }
            DeviceSpecKind::LocalId(id) => Box::new(open_local_by_id(*id)?.into_registers()),
            DeviceSpecKind::LocalSerial(serial) => {
                log::warn!("serial number lookup not supported: {}", serial);
                return Err(Ntv2Error::NoDeviceFound);
            }
        };
        Self::new(regs)
    }
}

fn open_local_by_id(board_id: u32) -> Ntv2Result<Card<MappedRegisters>> {
    let info = device::discover_devices()?
        .into_iter()
        .find(|d| d.board_id == Some(board_id))
        .ok_or(Ntv2Error::NoDeviceFound)?;
    Card::open_info(&info)
}
