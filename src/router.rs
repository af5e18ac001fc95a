// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Signal routing.
//!
//! A [`SignalRouter`] is an offline set of crosspoint connections. It can be
//! built by hand, parsed from text, captured from a board's select
//! registers, compared against another router, and turned into the
//! register writes that apply it.
//!
//! The routing ROM describes which outputs each input may legally select:
//! four registers per input, one bit per YUV output ID (the RGB twin shares
//! the bit).

use crate::device::DeviceId;
use crate::error::{Ntv2Error, Ntv2Result};
use crate::register::{RegInfo, RegisterWrites, FULL_MASK};
use crate::regs::{XPT_ROM_END, XPT_ROM_FIRST, XPT_ROM_REGS_PER_INPUT};
use crate::xpt::{InputXpt, OutputXpt, WidgetId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Legal outputs per input.
pub type PossibleConnections = BTreeMap<InputXpt, BTreeSet<OutputXpt>>;

/// Offline set of input-to-output connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalRouter {
    connections: BTreeMap<InputXpt, OutputXpt>,
}

/// Result of [`SignalRouter::compare`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDiff {
    /// Connections only in the other router.
    pub new: BTreeMap<InputXpt, OutputXpt>,
    /// Inputs connected in both but to different outputs (other router's output).
    pub changed: BTreeMap<InputXpt, OutputXpt>,
    /// Connections only in this router.
    pub missing: BTreeMap<InputXpt, OutputXpt>,
}

impl RouteDiff {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.missing.is_empty()
    }
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `input` to `output`, replacing any existing source.
    pub fn add_connection(&mut self, input: InputXpt, output: OutputXpt) {
        self.connections.insert(input, output);
    }

    /// Remove the connection only if `input` is fed by `output`.
    pub fn remove_connection(&mut self, input: InputXpt, output: OutputXpt) -> bool {
        if self.connections.get(&input) == Some(&output) {
            self.connections.remove(&input);
            true
        } else {
            false
        }
    }

    pub fn has_connection(&self, input: InputXpt, output: OutputXpt) -> bool {
        self.connections.get(&input) == Some(&output)
    }

    pub fn has_input(&self, input: InputXpt) -> bool {
        self.connections.contains_key(&input)
    }

    /// Source of `input`, or BLACK.
    pub fn connected_output(&self, input: InputXpt) -> OutputXpt {
        self.connections
            .get(&input)
            .copied()
            .unwrap_or(OutputXpt::BLACK)
    }

    pub fn reset(&mut self) {
        self.connections.clear();
    }

    pub fn reset_from(&mut self, connections: BTreeMap<InputXpt, OutputXpt>) {
        self.connections = connections;
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn connections(&self) -> &BTreeMap<InputXpt, OutputXpt> {
        &self.connections
    }

    pub fn iter(&self) -> impl Iterator<Item = (InputXpt, OutputXpt)> + '_ {
        self.connections.iter().map(|(i, o)| (*i, *o))
    }

    /// Differences from `self` to `rhs`.
    pub fn compare(&self, rhs: &SignalRouter) -> RouteDiff {
        let mut diff = RouteDiff::default();
        for (input, output) in &rhs.connections {
            match self.connections.get(input) {
                None => {
                    diff.new.insert(*input, *output);
                }
                Some(mine) if mine != output => {
                    diff.changed.insert(*input, *output);
                }
                Some(_) => {}
            }
        }
        for (input, output) in &self.connections {
            if !rhs.connections.contains_key(input) {
                diff.missing.insert(*input, *output);
            }
        }
        diff
    }

    /// Masked select-register writes that apply every connection.
    pub fn register_writes(&self) -> Ntv2Result<RegisterWrites> {
        self.connections
            .iter()
            .map(|(input, output)| {
                let (reg, ndx) = input.select_register().ok_or_else(|| {
                    Ntv2Error::InvalidCrosspoint(format!("{:?} has no select register", input))
                })?;
                let shift = u32::from(ndx) * 8;
                Ok(RegInfo::masked(reg, u32::from(output.id()), 0xFF << shift, shift))
            })
            .collect()
    }

    /// Rebuild a router from full reads of the crosspoint select registers.
    ///
    /// Registers that are not select registers are ignored.
    pub fn connections_from_registers(regs: &[RegInfo]) -> Ntv2Result<Self> {
        let mut router = Self::new();
        for r in regs {
            if r.mask != FULL_MASK || r.shift != 0 {
                return Err(Ntv2Error::InvalidArgument(format!(
                    "select register read {} is not a full-register read",
                    r
                )));
            }
            for (ndx, byte) in r.value.to_le_bytes().into_iter().enumerate() {
                let Some(input) = InputXpt::from_select_register(r.number, ndx as u8) else {
                    continue;
                };
                if byte != OutputXpt::BLACK.id() {
                    router.add_connection(input, OutputXpt(byte));
                }
            }
        }
        Ok(router)
    }

    /// Parse routing text.
    ///
    /// Accepts `Input <== Output` lines and `Connect(Input, Output);` calls.
    /// `//` comments and blank lines are skipped.
    pub fn from_text(text: &str) -> Ntv2Result<Self> {
        let mut router = Self::new();
        for (n, raw) in text.lines().enumerate() {
            let line = n + 1;
            let content = raw.split("//").next().unwrap_or("");
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            if compact.is_empty() {
                continue;
            }
            let lower = compact.to_ascii_lowercase();

            let (in_name, out_name) = if let Some(pos) = compact.find("<==") {
                (&compact[..pos], &compact[pos + 3..])
            } else if let Some(pos) = lower.find("connect(") {
                let args = &compact[pos + "connect(".len()..];
                let Some(close) = args.find(')') else {
                    return Err(Ntv2Error::RouteParse {
                        line,
                        reason: "missing ')'".into(),
                    });
                };
                let args = &args[..close];
                let mut parts = args.split(',');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(i), Some(o), None) => (i, o),
                    _ => {
                        return Err(Ntv2Error::RouteParse {
                            line,
                            reason: format!("expected two arguments in '{}'", args),
                        })
                    }
                }
            } else {
                return Err(Ntv2Error::RouteParse {
                    line,
                    reason: format!("no '<==' or 'Connect(' in '{}'", raw.trim()),
                });
            };

            let input = InputXpt::from_name(in_name).ok_or_else(|| Ntv2Error::RouteParse {
                line,
                reason: format!("unknown input crosspoint '{}'", in_name),
            })?;
            let output = OutputXpt::from_name(out_name).ok_or_else(|| Ntv2Error::RouteParse {
                line,
                reason: format!("unknown output crosspoint '{}'", out_name),
            })?;
            router.add_connection(input, output);
        }
        Ok(router)
    }

    /// Source code that rebuilds this router through `var.Connect(...)` calls.
    pub fn to_code(&self, var: &str) -> String {
        let mut out = String::new();
        for (input, output) in self.iter() {
            out.push_str(&format!(
                "{}.Connect(NTV2_Xpt{}, NTV2_Xpt{});\n",
                var,
                input.name(),
                output.name()
            ));
        }
        out
    }
}

impl fmt::Display for SignalRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (input, output) in self.iter() {
            writeln!(f, "{} <== {}", input, output)?;
        }
        Ok(())
    }
}

impl FromIterator<(InputXpt, OutputXpt)> for SignalRouter {
    fn from_iter<I: IntoIterator<Item = (InputXpt, OutputXpt)>>(iter: I) -> Self {
        Self {
            connections: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Routing ROM
// ============================================================================

/// First of the four ROM registers describing `input`.
pub fn rom_register_base(input: InputXpt) -> Option<u32> {
    let offset = input.id().checked_sub(InputXpt::FIRST)?;
    let base = XPT_ROM_FIRST + XPT_ROM_REGS_PER_INPUT * u32::from(offset);
    (base < XPT_ROM_END).then_some(base)
}

/// ROM register and bit that allow `output`, relative to an input's base.
pub fn rom_bit(output: OutputXpt) -> (u32, u32) {
    let bit = u32::from(output.id() & 0x7F);
    (bit / 32, bit % 32)
}

/// Decode routing ROM registers into the connections they allow.
///
/// Registers outside the ROM are skipped.
pub fn possible_connections_from_rom(regs: &[RegInfo]) -> PossibleConnections {
    let mut possible = PossibleConnections::new();
    for r in regs {
        if !(XPT_ROM_FIRST..XPT_ROM_END).contains(&r.number) {
            continue;
        }
        let offset = r.number - XPT_ROM_FIRST;
        let input = InputXpt(InputXpt::FIRST + (offset / XPT_ROM_REGS_PER_INPUT) as u8);
        let bit_offset = (offset % XPT_ROM_REGS_PER_INPUT) * 32;
        if r.value == 0 || !input.is_valid() {
            continue;
        }
        for bit in (0..32).filter(|b| r.value & (1 << b) != 0) {
            let yuv = OutputXpt(((bit_offset + bit) & 0x7F) as u8);
            let rgb = OutputXpt(yuv.id() | OutputXpt::RGB_BIT);
            for out in [yuv, rgb] {
                if out.is_valid() {
                    possible.entry(input).or_default().insert(out);
                }
            }
        }
    }
    possible
}

/// Zeroed list of every ROM register, ready to be read.
pub fn route_rom_reads() -> RegisterWrites {
    (XPT_ROM_FIRST..XPT_ROM_END).map(|n| RegInfo::new(n, 0)).collect()
}

/// Encode legal connections as routing ROM register values.
pub fn make_route_rom_registers(legal: &PossibleConnections) -> RegisterWrites {
    let mut regs = route_rom_reads();
    for (input, outputs) in legal {
        let Some(base) = rom_register_base(*input) else {
            continue;
        };
        for out in outputs {
            let (word, bit) = rom_bit(*out);
            regs[(base - XPT_ROM_FIRST + word) as usize].value |= 1 << bit;
        }
    }
    regs
}

/// Whether `device`'s fabric can carry `output` into `input`.
pub fn is_legal_connection(device: DeviceId, input: InputXpt, output: OutputXpt) -> bool {
    let (Some(wi), Some(wo)) = (WidgetId::for_input(input), WidgetId::for_output(output)) else {
        return false;
    };
    if wi == wo || !device.can_do_widget(wi) || !device.can_do_widget(wo) {
        return false;
    }
    if input.is_rgb_only() && !output.is_rgb() {
        return false;
    }
    if input.is_yuv_only() && !output.is_yuv() {
        return false;
    }
    true
}

/// Every legal connection on `device`.
pub fn legal_connections(device: DeviceId) -> PossibleConnections {
    let mut legal = PossibleConnections::new();
    for input in InputXpt::all() {
        let outputs: BTreeSet<OutputXpt> = OutputXpt::all()
            .filter(|o| is_legal_connection(device, input, *o))
            .collect();
        if !outputs.is_empty() {
            legal.insert(input, outputs);
        }
    }
    legal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::*;

    fn sample() -> SignalRouter {
        [
            (InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER1_YUV),
            (InputXpt::CSC1_VID, OutputXpt::SDI_IN1),
            (InputXpt::FRAME_BUFFER2, OutputXpt::CSC1_VID_RGB),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_add_remove() {
        let mut r = SignalRouter::new();
        r.add_connection(InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER1_YUV);
        r.add_connection(InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER2_YUV);
        assert_eq!(r.len(), 1);
        assert_eq!(r.connected_output(InputXpt::SDI_OUT1), OutputXpt::FRAME_BUFFER2_YUV);
        assert!(!r.remove_connection(InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER1_YUV));
        assert!(r.has_input(InputXpt::SDI_OUT1));
        assert!(r.remove_connection(InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER2_YUV));
        assert!(r.is_empty());
        assert_eq!(r.connected_output(InputXpt::SDI_OUT1), OutputXpt::BLACK);
    }

    #[test]
    fn test_compare() {
        let a = sample();
        assert!(a.compare(&a.clone()).is_empty());

        let mut b = a.clone();
        b.remove_connection(InputXpt::CSC1_VID, OutputXpt::SDI_IN1);
        b.add_connection(InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER2_YUV);
        b.add_connection(InputXpt::HDMI_OUT, OutputXpt::FRAME_BUFFER1_RGB);

        let diff = a.compare(&b);
        assert_eq!(diff.new.get(&InputXpt::HDMI_OUT), Some(&OutputXpt::FRAME_BUFFER1_RGB));
        assert_eq!(diff.changed.get(&InputXpt::SDI_OUT1), Some(&OutputXpt::FRAME_BUFFER2_YUV));
        assert_eq!(diff.missing.get(&InputXpt::CSC1_VID), Some(&OutputXpt::SDI_IN1));
        assert_eq!(diff.new.len() + diff.changed.len() + diff.missing.len(), 3);
    }

    #[test]
    fn test_register_writes() {
        let writes = sample().register_writes().unwrap();
        assert_eq!(writes.len(), 3);
        let sdi = writes.iter().find(|w| w.number == XPT_SELECT_GROUP_3).unwrap();
        assert_eq!(sdi.mask, 0x0000_FF00);
        assert_eq!(sdi.shift, 8);
        assert_eq!(sdi.value, u32::from(OutputXpt::FRAME_BUFFER1_YUV.id()));

        let mut bad = SignalRouter::new();
        bad.add_connection(InputXpt(0x7E), OutputXpt::SDI_IN1);
        assert!(matches!(bad.register_writes(), Err(Ntv2Error::InvalidCrosspoint(_))));
    }

    #[test]
    fn test_connections_from_registers() {
        let regs = [
            RegInfo::new(XPT_SELECT_GROUP_1, 0x0000_0100),
            RegInfo::new(XPT_SELECT_GROUP_3, 0x0000_0800),
            RegInfo::new(GLOBAL_CONTROL, 0xFFFF_FFFF),
        ];
        let r = SignalRouter::connections_from_registers(&regs).unwrap();
        assert_eq!(r.len(), 2);
        assert!(r.has_connection(InputXpt::CSC1_VID, OutputXpt::SDI_IN1));
        assert!(r.has_connection(InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER1_YUV));

        let masked = [RegInfo::masked(XPT_SELECT_GROUP_1, 1, 0xFF, 0)];
        assert!(SignalRouter::connections_from_registers(&masked).is_err());
    }

    #[test]
    fn test_text_round_trip() {
        let r = sample();
        let text = r.to_string();
        assert!(text.contains("SDIOut1Input <== FrameBuffer1YUV"));
        assert_eq!(SignalRouter::from_text(&text).unwrap(), r);
        assert_eq!(SignalRouter::from_text(&r.to_code("router")).unwrap(), r);
    }

    #[test]
    fn test_from_text_forms() {
        let text = "
            // capture path
            FrameBuffer1Input <== SDIIn1

            mRouter.Connect (NTV2_XptSDIOut2Input, NTV2_XptFrameBuffer1YUV);  // playback
            csc1_vid_input <== black
        ";
        let r = SignalRouter::from_text(text).unwrap();
        assert_eq!(r.len(), 3);
        assert!(r.has_connection(InputXpt::FRAME_BUFFER1, OutputXpt::SDI_IN1));
        assert!(r.has_connection(InputXpt::SDI_OUT2, OutputXpt::FRAME_BUFFER1_YUV));
        assert!(r.has_connection(InputXpt::CSC1_VID, OutputXpt::BLACK));
    }

    #[test]
    fn test_from_text_errors() {
        let err = SignalRouter::from_text("SDIOut1Input <== SDIIn1\nBogus <== SDIIn1").unwrap_err();
        assert!(matches!(err, Ntv2Error::RouteParse { line: 2, .. }));
        let err = SignalRouter::from_text("SDIOut1Input = SDIIn1").unwrap_err();
        assert!(matches!(err, Ntv2Error::RouteParse { line: 1, .. }));
        let err = SignalRouter::from_text("Connect(SDIOut1Input)").unwrap_err();
        assert!(matches!(err, Ntv2Error::RouteParse { line: 1, .. }));
    }

    #[test]
    fn test_rom_decode() {
        // Input 0x0D (SDIOut1) bit group 0, bits 8 and 12: FB1 YUV/RGB and CSC1 vid YUV/RGB.
        let base = rom_register_base(InputXpt::SDI_OUT1).unwrap();
        assert_eq!(base, XPT_ROM_FIRST + 4 * 0x0C);
        let regs = [
            RegInfo::new(base, (1 << 8) | (1 << 12)),
            RegInfo::new(base + 1, 0),
            RegInfo::new(GLOBAL_CONTROL, 0xFFFF_FFFF),
        ];
        let possible = possible_connections_from_rom(&regs);
        let outs = &possible[&InputXpt::SDI_OUT1];
        assert!(outs.contains(&OutputXpt::FRAME_BUFFER1_YUV));
        assert!(outs.contains(&OutputXpt::FRAME_BUFFER1_RGB));
        assert!(outs.contains(&OutputXpt::CSC1_VID_YUV));
        assert!(outs.contains(&OutputXpt::CSC1_VID_RGB));
        assert_eq!(outs.len(), 4);
    }

    #[test]
    fn test_rom_encode_covers_legal() {
        let legal = legal_connections(DeviceId::Kona4);
        let regs = make_route_rom_registers(&legal);
        assert_eq!(regs.len() as u32, XPT_ROM_END - XPT_ROM_FIRST);
        let decoded = possible_connections_from_rom(&regs);
        for (input, outs) in &legal {
            for out in outs {
                assert!(decoded[input].contains(out), "{:?} <== {:?}", input, out);
            }
        }
    }

    #[test]
    fn test_legal_connections_rules() {
        let d = DeviceId::Kona4;
        assert!(is_legal_connection(d, InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER1_YUV));
        assert!(!is_legal_connection(d, InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER1_RGB));
        assert!(is_legal_connection(d, InputXpt::LUT1, OutputXpt::CSC1_VID_RGB));
        assert!(!is_legal_connection(d, InputXpt::LUT1, OutputXpt::CSC1_VID_YUV));
        assert!(!is_legal_connection(d, InputXpt::CSC1_VID, OutputXpt::CSC1_VID_YUV));
        assert!(!is_legal_connection(d, InputXpt::SDI_OUT1, OutputXpt::BLACK));
        // Kona 1 has a single SDI output.
        assert!(!is_legal_connection(
            DeviceId::Kona1,
            InputXpt::SDI_OUT2,
            OutputXpt::FRAME_BUFFER1_YUV
        ));
    }
}
