// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Register access abstraction.
//!
//! Every NTV2 board is driven through 32-bit registers. The [`RegisterIo`]
//! trait is the seam between the higher layers (routing, flash, card) and
//! the transport actually carrying the register traffic:
//!
//! - [`MappedRegisters`](crate::mmio::MappedRegisters): memory-mapped PCIe BAR (Linux)
//! - [`NoDevice`](crate::nodevice::NoDevice): in-memory simulation
//! - [`NubClient`](crate::nub::NubClient): remote nub over TCP

use crate::error::{Ntv2Error, Ntv2Result};
use std::fmt;

/// Mask selecting a full register.
pub const FULL_MASK: u32 = 0xFFFF_FFFF;

/// A single register number/value pair with its bit-field selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegInfo {
    /// Register number.
    pub number: u32,
    /// Register (or field) value.
    pub value: u32,
    /// Bit mask of the field.
    pub mask: u32,
    /// Right shift applied after masking.
    pub shift: u32,
}

impl RegInfo {
    /// Create a full-register entry.
    pub const fn new(number: u32, value: u32) -> Self {
        Self {
            number,
            value,
            mask: FULL_MASK,
            shift: 0,
        }
    }

    /// Create a masked field entry.
    pub const fn masked(number: u32, value: u32, mask: u32, shift: u32) -> Self {
        Self {
            number,
            value,
            mask,
            shift,
        }
    }

    /// Whether this entry covers the full 32-bit register.
    pub const fn is_full(&self) -> bool {
        self.mask == FULL_MASK && self.shift == 0
    }
}

impl fmt::Display for RegInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reg {} = {:#010x} (mask {:#010x}, shift {})",
            self.number, self.value, self.mask, self.shift
        )
    }
}

/// An ordered batch of register writes.
pub type RegisterWrites = Vec<RegInfo>;

/// Extract a field from a raw register value.
#[inline]
pub fn extract_field(raw: u32, mask: u32, shift: u32) -> Ntv2Result<u32> {
    check_shift(shift)?;
    Ok((raw & mask) >> shift)
}

/// Merge a field value into a raw register value.
#[inline]
pub fn merge_field(old: u32, value: u32, mask: u32, shift: u32) -> Ntv2Result<u32> {
    check_shift(shift)?;
    Ok((old & !mask) | ((value << shift) & mask))
}

pub(crate) fn check_shift(shift: u32) -> Ntv2Result<()> {
    if shift >= 32 {
        return Err(Ntv2Error::InvalidArgument(format!(
            "register shift {} out of range",
            shift
        )));
    }
    Ok(())
}

/// Register transport.
///
/// Implementors provide raw 32-bit reads and writes. Field access and
/// bulk reads are provided on top.
pub trait RegisterIo {
    /// Read a full 32-bit register.
    fn read_register(&self, reg: u32) -> Ntv2Result<u32>;

    /// Write a full 32-bit register.
    fn write_register(&self, reg: u32, value: u32) -> Ntv2Result<()>;

    /// Highest valid register number.
    fn max_register(&self) -> u32;

    /// Read a bit field: `(raw & mask) >> shift`.
    fn read_register_masked(&self, reg: u32, mask: u32, shift: u32) -> Ntv2Result<u32> {
        check_shift(shift)?;
        let raw = self.read_register(reg)?;
        extract_field(raw, mask, shift)
    }

    /// Read-modify-write a bit field.
    ///
    /// A full mask with zero shift writes straight through.
    fn write_register_masked(&self, reg: u32, value: u32, mask: u32, shift: u32) -> Ntv2Result<()> {
        check_shift(shift)?;
        if mask == FULL_MASK && shift == 0 {
            return self.write_register(reg, value);
        }
        let old = self.read_register(reg)?;
        self.write_register(reg, merge_field(old, value, mask, shift)?)
    }

    /// Read each entry in place, honoring its mask and shift.
    ///
    /// Stops at the first failure. Entries before it hold valid values.
    fn read_registers(&self, regs: &mut [RegInfo]) -> Ntv2Result<()> {
        for info in regs.iter_mut() {
            info.value = self
                .read_register_masked(info.number, info.mask, info.shift)
                .inspect_err(|e| log::warn!("bulk read failed at register {}: {}", info.number, e))?;
        }
        Ok(())
    }

    /// Apply a batch of (possibly masked) writes in order.
    fn write_registers(&self, regs: &[RegInfo]) -> Ntv2Result<()> {
        for info in regs {
            self.write_register_masked(info.number, info.value, info.mask, info.shift)?;
        }
        Ok(())
    }

    /// Fail with [`Ntv2Error::RegisterOutOfRange`] if `reg` is beyond the window.
    fn check_register(&self, reg: u32) -> Ntv2Result<()> {
        let max = self.max_register();
        if reg > max {
            return Err(Ntv2Error::RegisterOutOfRange { reg, max });
        }
        Ok(())
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    fn read_register(&self, reg: u32) -> Ntv2Result<u32> {
        (**self).read_register(reg)
    }

    fn write_register(&self, reg: u32, value: u32) -> Ntv2Result<()> {
        (**self).write_register(reg, value)
    }

    fn max_register(&self) -> u32 {
        (**self).max_register()
    }

    fn read_registers(&self, regs: &mut [RegInfo]) -> Ntv2Result<()> {
        (**self).read_registers(regs)
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for Box<T> {
    fn read_register(&self, reg: u32) -> Ntv2Result<u32> {
        (**self).read_register(reg)
    }

    fn write_register(&self, reg: u32, value: u32) -> Ntv2Result<()> {
        (**self).write_register(reg, value)
    }

    fn max_register(&self) -> u32 {
        (**self).max_register()
    }

    fn read_registers(&self, regs: &mut [RegInfo]) -> Ntv2Result<()> {
        (**self).read_registers(regs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MapRegs(RefCell<HashMap<u32, u32>>);

    impl RegisterIo for MapRegs {
        fn read_register(&self, reg: u32) -> Ntv2Result<u32> {
            self.check_register(reg)?;
            Ok(*self.0.borrow().get(&reg).unwrap_or(&0))
        }

        fn write_register(&self, reg: u32, value: u32) -> Ntv2Result<()> {
            self.check_register(reg)?;
            self.0.borrow_mut().insert(reg, value);
            Ok(())
        }

        fn max_register(&self) -> u32 {
            255
        }
    }

    fn regs() -> MapRegs {
        MapRegs(RefCell::new(HashMap::new()))
    }

    #[test]
    fn test_field_helpers() {
        assert_eq!(extract_field(0xAABB_CCDD, 0x0000_FF00, 8).unwrap(), 0xCC);
        assert_eq!(
            merge_field(0xAABB_CCDD, 0x11, 0x00FF_0000, 16).unwrap(),
            0xAA11_CCDD
        );
        assert!(extract_field(1, 1, 32).is_err());
    }

    #[test]
    fn test_masked_write_preserves_other_bits() {
        let r = regs();
        r.write_register(10, 0x1234_5678).unwrap();
        r.write_register_masked(10, 0xAB, 0x0000_FF00, 8).unwrap();
        assert_eq!(r.read_register(10).unwrap(), 0x1234_AB78);
        assert_eq!(r.read_register_masked(10, 0x0000_FF00, 8).unwrap(), 0xAB);
    }

    #[test]
    fn test_full_mask_write_through() {
        let r = regs();
        r.write_register(3, 0xFFFF_FFFF).unwrap();
        r.write_register_masked(3, 7, FULL_MASK, 0).unwrap();
        assert_eq!(r.read_register(3).unwrap(), 7);
    }

    #[test]
    fn test_out_of_range() {
        let r = regs();
        assert!(matches!(
            r.read_register(256),
            Err(Ntv2Error::RegisterOutOfRange { reg: 256, max: 255 })
        ));
    }

    #[test]
    fn test_bulk_read_and_write() {
        let r = regs();
        r.write_registers(&[
            RegInfo::new(1, 0x0000_00FF),
            RegInfo::masked(2, 0x3, 0x0000_0030, 4),
        ])
        .unwrap();

        let mut batch = [RegInfo::new(1, 0), RegInfo::masked(2, 0, 0x0000_0030, 4)];
        r.read_registers(&mut batch).unwrap();
        assert_eq!(batch[0].value, 0xFF);
        assert_eq!(batch[1].value, 0x3);

        let mut bad = [RegInfo::new(1, 0), RegInfo::new(999, 0)];
        assert!(r.read_registers(&mut bad).is_err());
        assert_eq!(bad[0].value, 0xFF);
    }

    #[test]
    fn test_reg_info_display() {
        let s = RegInfo::masked(140, 0x22, 0xFF00, 8).to_string();
        assert!(s.contains("reg 140"));
        assert!(s.contains("shift 8"));
    }
}
