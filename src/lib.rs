// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! # AJA NTV2 Rust Bindings
//!
//! Register-level access to AJA NTV2 video I/O boards (Kona, Corvid, Io,
//! T-Tap).
//!
//! ## Supported Operations
//!
//! - Register reads and writes, including masked bit fields and batches
//! - Signal routing through the crosspoint matrix, validated against the
//!   board's routing ROM
//! - Xilinx bitfile header parsing
//! - SPI flash programming, verification and readback
//! - Remote register access over the nub protocol
//!
//! ## Backends
//!
//! | Backend                | Transport                               |
//! |------------------------|-----------------------------------------|
//! | [`MappedRegisters`]    | mmap of `/dev/ajantv2_N` (Linux only)   |
//! | [`NoDevice`]           | in-memory simulation, any platform      |
//! | [`NubClient`]          | TCP to a nub server, any platform       |
//!
//! All three implement [`RegisterIo`]; [`Card`] works over any of them.
//!
//! ## Example
//!
//! ```rust
//! use ntv2_rust::{Card, DeviceId, InputXpt, OutputXpt, SignalRouter};
//!
//! fn main() -> Result<(), ntv2_rust::Ntv2Error> {
//!     // Simulated Kona 4; use Card::open_spec("0") for the first real board.
//!     let card = Card::no_device(DeviceId::Kona4);
//!
//!     let mut router = SignalRouter::new();
//!     router.add_connection(InputXpt::FRAME_BUFFER1, OutputXpt::SDI_IN1);
//!     router.add_connection(InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER1_YUV);
//!     card.apply_signal_route(&router, true)?;
//!
//!     print!("{}", card.routing()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Requirements
//!
//! Local boards need Linux with the `ajantv2` kernel driver loaded.
//! Simulated and remote boards work everywhere.

// Module declarations
pub mod bitfile;
pub mod card;
pub mod device;
pub mod devspec;
pub mod error;
pub mod flash;
pub mod mmio;
pub mod nodevice;
pub mod nub;
pub mod register;
pub mod regs;
pub mod router;
pub mod xpt;

// Re-exports for convenient access
pub use bitfile::Bitfile;
pub use card::{Card, DynRegisters};
pub use device::{discover_devices, find_device, is_driver_loaded, DeviceId, DeviceInfo};
pub use devspec::{DeviceSpec, DeviceSpecKind, Dictionary};
pub use error::{Ntv2Error, Ntv2Result};
pub use flash::{FlashBlock, FlashProgrammer, FlashProgress, ProgramOptions};
pub use mmio::MappedRegisters;
pub use nodevice::NoDevice;
pub use nub::{NubClient, NubConfig, NubErrorCode, NubServer};
pub use register::{RegInfo, RegisterIo};
pub use router::SignalRouter;
pub use xpt::{Channel, InputXpt, OutputXpt, WidgetId};
