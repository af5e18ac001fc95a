// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Error types for NTV2 operations.

use crate::nub::NubErrorCode;
use thiserror::Error;

/// Errors that can occur during NTV2 operations.
#[derive(Debug, Error)]
pub enum Ntv2Error {
    /// No NTV2 device found on the system.
    #[error("no NTV2 device found")]
    NoDeviceFound,

    /// Operation requires an open device.
    #[error("device not open")]
    DeviceNotOpen,

    /// Register number beyond the device's register window.
    #[error("register {reg} out of range (max {max})")]
    RegisterOutOfRange { reg: u32, max: u32 },

    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Crosspoint ID is unknown or has no select register.
    #[error("invalid crosspoint: {0}")]
    InvalidCrosspoint(String),

    /// The routing ROM does not permit this connection.
    #[error("route not allowed: {input} <== {output}")]
    RouteNotAllowed { input: String, output: String },

    /// Routing text could not be parsed.
    #[error("route parse error on line {line}: {reason}")]
    RouteParse { line: usize, reason: String },

    /// Malformed bitfile header.
    #[error("bitfile header: {0}")]
    BitfileHeader(String),

    /// Bitfile design does not match the target device.
    #[error("bitfile design '{design}' cannot be flashed to {device}")]
    BitfileIncompatible { design: String, device: String },

    /// SPI flash reported an ID not in the chip table.
    #[error("unknown SPI flash chip id {0:#08x}")]
    UnknownFlashChip(u32),

    /// SPI flash controller stayed busy.
    #[error("flash controller busy timeout (register {reg})")]
    FlashTimeout { reg: u32 },

    /// Readback after programming did not match.
    #[error("flash verify failed at word {word}: expected {expected:#010x}, read {actual:#010x}")]
    FlashVerify {
        word: usize,
        expected: u32,
        actual: u32,
    },

    /// Flash block has no place in this device's flash layout.
    #[error("flash block not supported: {0}")]
    FlashBlockUnsupported(String),

    /// Remote nub reported or caused an error.
    #[error("nub: {0}")]
    Nub(NubErrorCode),

    /// Nub peer sent something unexpected.
    #[error("nub protocol error: {0}")]
    NubProtocol(String),

    /// Device specification string could not be parsed.
    #[error("device spec: {0}")]
    DeviceSpec(String),

    /// I/O error from system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Platform not supported.
    #[error("platform not supported: local NTV2 access requires Linux with the ajantv2 driver")]
    PlatformNotSupported,

    /// Permission denied accessing the device node.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Memory mapping failed.
    #[error("mmap failed: {0}")]
    MmapFailed(String),
}

/// Result type alias for NTV2 operations.
pub type Ntv2Result<T> = Result<T, Ntv2Error>;
