// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Register numbers.
//!
//! Only the registers this crate drives directly are named here.

// ── Global ──────────────────────────────────────────────────────────────────

pub const GLOBAL_CONTROL: u32 = 0;
pub const BOARD_ID: u32 = 50;

// ── SPI flash controller ────────────────────────────────────────────────────

pub const FLASH_ADDRESS: u32 = 40;
pub const FLASH_CONTROL_STATUS: u32 = 41;
pub const FLASH_DIN: u32 = 42;
pub const FLASH_DOUT: u32 = 43;

// ── Crosspoint select groups ────────────────────────────────────────────────
//
// Each register holds four 8-bit output crosspoint selectors.

pub const XPT_SELECT_GROUP_1: u32 = 136;
pub const XPT_SELECT_GROUP_2: u32 = 137;
pub const XPT_SELECT_GROUP_3: u32 = 138;
pub const XPT_SELECT_GROUP_4: u32 = 139;
pub const XPT_SELECT_GROUP_5: u32 = 140;
pub const XPT_SELECT_GROUP_6: u32 = 141;
pub const XPT_SELECT_GROUP_8: u32 = 143;
pub const XPT_SELECT_GROUP_10: u32 = 145;
pub const XPT_SELECT_GROUP_11: u32 = 146;
pub const XPT_SELECT_GROUP_13: u32 = 148;
pub const XPT_SELECT_GROUP_14: u32 = 149;
pub const XPT_SELECT_GROUP_15: u32 = 150;

/// Every crosspoint select register, in ascending order.
pub const XPT_SELECT_REGISTERS: [u32; 12] = [
    XPT_SELECT_GROUP_1,
    XPT_SELECT_GROUP_2,
    XPT_SELECT_GROUP_3,
    XPT_SELECT_GROUP_4,
    XPT_SELECT_GROUP_5,
    XPT_SELECT_GROUP_6,
    XPT_SELECT_GROUP_8,
    XPT_SELECT_GROUP_10,
    XPT_SELECT_GROUP_11,
    XPT_SELECT_GROUP_13,
    XPT_SELECT_GROUP_14,
    XPT_SELECT_GROUP_15,
];

// ── Routing ROM ─────────────────────────────────────────────────────────────
//
// Four registers per input crosspoint, 128 output bits in total.

pub const XPT_ROM_FIRST: u32 = 3072;
pub const XPT_ROM_REGS_PER_INPUT: u32 = 4;
/// One past the last ROM register (inputs 0x01..=0x7F).
pub const XPT_ROM_END: u32 = XPT_ROM_FIRST + XPT_ROM_REGS_PER_INPUT * 0x7F;

/// Register window of a mapped board (64 KB BAR, 32-bit registers).
pub const REGISTER_WINDOW_BYTES: usize = 0x1_0000;
pub const MAX_REGISTER: u32 = (REGISTER_WINDOW_BYTES / 4) as u32 - 1;

// Window must cover the routing ROM.
const _: () = assert!(XPT_ROM_END <= MAX_REGISTER);
