// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Crosspoint, widget and channel identifiers.
//!
//! The FPGA routing matrix connects *output* crosspoints (signal sources)
//! to *input* crosspoints (signal sinks). Every input owns one byte in a
//! crosspoint select register; the byte holds the ID of the output feeding
//! it. Crosspoints belong to widgets, the functional blocks of the FPGA.
//!
//! Output IDs with bit 7 set are the RGB twins of the YUV output with the
//! same low seven bits.

use crate::regs::*;
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Classification of a crosspoint.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct XptFlags: u16 {
        const RGB_ONLY    = 1 << 0;
        const YUV_ONLY    = 1 << 1;
        const KEY         = 1 << 2;
        const SDI         = 1 << 3;
        const DUAL_LINK   = 1 << 4;
        const HDMI        = 1 << 5;
        const FRAME_STORE = 1 << 6;
        const CSC         = 1 << 7;
        const LUT         = 1 << 8;
        const MIXER       = 1 << 9;
        /// Second data stream of a dual-stream (3G level B) link.
        const DS2         = 1 << 10;
        const MUX_425     = 1 << 11;
    }
}

/// Video channel (1-based, 1..=8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);

impl Channel {
    pub const MAX: u8 = 8;

    /// Create a channel from its 1-based number.
    pub fn new(number: u8) -> Option<Self> {
        (1..=Self::MAX).contains(&number).then_some(Self(number))
    }

    /// 1-based channel number.
    pub fn number(self) -> u8 {
        self.0
    }

    /// 0-based index.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ch{}", self.0)
    }
}

// ============================================================================
// Output crosspoints
// ============================================================================

/// Output crosspoint (signal source).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputXpt(pub u8);

impl OutputXpt {
    pub const BLACK: Self = Self(0x00);
    pub const SDI_IN1: Self = Self(0x01);
    pub const SDI_IN2: Self = Self(0x02);
    pub const SDI_IN3: Self = Self(0x03);
    pub const SDI_IN4: Self = Self(0x04);
    pub const SDI_IN1_DS2: Self = Self(0x05);
    pub const SDI_IN2_DS2: Self = Self(0x06);
    pub const FRAME_BUFFER1_YUV: Self = Self(0x08);
    pub const FRAME_BUFFER2_YUV: Self = Self(0x09);
    pub const FRAME_BUFFER3_YUV: Self = Self(0x0A);
    pub const FRAME_BUFFER4_YUV: Self = Self(0x0B);
    pub const CSC1_VID_YUV: Self = Self(0x0C);
    pub const CSC1_KEY_YUV: Self = Self(0x0D);
    pub const CSC2_VID_YUV: Self = Self(0x0E);
    pub const CSC2_KEY_YUV: Self = Self(0x0F);
    pub const HDMI_IN1_YUV: Self = Self(0x12);
    pub const MIXER1_VID_YUV: Self = Self(0x14);
    pub const MIXER1_KEY_YUV: Self = Self(0x15);
    pub const DUAL_LINK_OUT1: Self = Self(0x17);
    pub const DUAL_LINK_OUT1_DS2: Self = Self(0x18);
    pub const MUX425_1A_YUV: Self = Self(0x19);

    pub const FRAME_BUFFER1_RGB: Self = Self(0x88);
    pub const FRAME_BUFFER2_RGB: Self = Self(0x89);
    pub const FRAME_BUFFER3_RGB: Self = Self(0x8A);
    pub const FRAME_BUFFER4_RGB: Self = Self(0x8B);
    pub const CSC1_VID_RGB: Self = Self(0x8C);
    pub const CSC2_VID_RGB: Self = Self(0x8E);
    pub const LUT1_RGB: Self = Self(0x90);
    pub const LUT2_RGB: Self = Self(0x91);
    pub const HDMI_IN1_RGB: Self = Self(0x92);
    pub const DUAL_LINK_IN1: Self = Self(0x96);

    /// Bit that marks an RGB output.
    pub const RGB_BIT: u8 = 0x80;

    /// Raw ID.
    pub const fn id(self) -> u8 {
        self.0
    }

    /// Whether this ID names a known output.
    pub fn is_valid(self) -> bool {
        self == Self::BLACK || output_entry(self).is_some()
    }

    pub fn is_rgb(self) -> bool {
        self.0 & Self::RGB_BIT != 0
    }

    pub fn is_yuv(self) -> bool {
        !self.is_rgb()
    }

    /// The RGB twin of this output, if that twin exists.
    pub fn rgb_twin(self) -> Option<Self> {
        let twin = Self(self.0 | Self::RGB_BIT);
        (twin != self && output_entry(twin).is_some()).then_some(twin)
    }

    /// Display name, e.g. `FrameBuffer1RGB`.
    pub fn name(self) -> &'static str {
        if self == Self::BLACK {
            return "Black";
        }
        output_entry(self).map(|e| e.1).unwrap_or("?")
    }

    /// Look up an output by name (case-insensitive, `_` and `NTV2_Xpt` prefix ignored).
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = normalize_name(name);
        if wanted == "black" {
            return Some(Self::BLACK);
        }
        OUTPUTS
            .iter()
            .find(|e| normalize_name(e.1) == wanted)
            .map(|e| e.0)
    }

    pub fn flags(self) -> XptFlags {
        output_entry(self).map(|e| e.2).unwrap_or(XptFlags::empty())
    }

    /// Every known output, BLACK excluded.
    pub fn all() -> impl Iterator<Item = OutputXpt> {
        OUTPUTS.iter().map(|e| e.0)
    }
}

impl fmt::Display for OutputXpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for OutputXpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#04x})", self.name(), self.0)
    }
}

type OutputEntry = (OutputXpt, &'static str, XptFlags);

#[rustfmt::skip]
static OUTPUTS: &[OutputEntry] = &[
    (OutputXpt::SDI_IN1,            "SDIIn1",           XptFlags::SDI.union(XptFlags::YUV_ONLY)),
    (OutputXpt::SDI_IN2,            "SDIIn2",           XptFlags::SDI.union(XptFlags::YUV_ONLY)),
    (OutputXpt::SDI_IN3,            "SDIIn3",           XptFlags::SDI.union(XptFlags::YUV_ONLY)),
    (OutputXpt::SDI_IN4,            "SDIIn4",           XptFlags::SDI.union(XptFlags::YUV_ONLY)),
    (OutputXpt::SDI_IN1_DS2,        "SDIIn1DS2",        XptFlags::SDI.union(XptFlags::DS2)),
    (OutputXpt::SDI_IN2_DS2,        "SDIIn2DS2",        XptFlags::SDI.union(XptFlags::DS2)),
    (OutputXpt::FRAME_BUFFER1_YUV,  "FrameBuffer1YUV",  XptFlags::FRAME_STORE),
    (OutputXpt::FRAME_BUFFER2_YUV,  "FrameBuffer2YUV",  XptFlags::FRAME_STORE),
    (OutputXpt::FRAME_BUFFER3_YUV,  "FrameBuffer3YUV",  XptFlags::FRAME_STORE),
    (OutputXpt::FRAME_BUFFER4_YUV,  "FrameBuffer4YUV",  XptFlags::FRAME_STORE),
    (OutputXpt::CSC1_VID_YUV,       "CSC1VidYUV",       XptFlags::CSC),
    (OutputXpt::CSC1_KEY_YUV,       "CSC1KeyYUV",       XptFlags::CSC.union(XptFlags::KEY)),
    (OutputXpt::CSC2_VID_YUV,       "CSC2VidYUV",       XptFlags::CSC),
    (OutputXpt::CSC2_KEY_YUV,       "CSC2KeyYUV",       XptFlags::CSC.union(XptFlags::KEY)),
    (OutputXpt::HDMI_IN1_YUV,       "HDMIIn1",          XptFlags::HDMI),
    (OutputXpt::MIXER1_VID_YUV,     "Mixer1VidYUV",     XptFlags::MIXER),
    (OutputXpt::MIXER1_KEY_YUV,     "Mixer1KeyYUV",     XptFlags::MIXER.union(XptFlags::KEY)),
    (OutputXpt::DUAL_LINK_OUT1,     "DuallinkOut1",     XptFlags::DUAL_LINK),
    (OutputXpt::DUAL_LINK_OUT1_DS2, "DuallinkOut1DS2",  XptFlags::DUAL_LINK.union(XptFlags::DS2)),
    (OutputXpt::MUX425_1A_YUV,      "425Mux1AYUV",      XptFlags::MUX_425),
    (OutputXpt::FRAME_BUFFER1_RGB,  "FrameBuffer1RGB",  XptFlags::FRAME_STORE),
    (OutputXpt::FRAME_BUFFER2_RGB,  "FrameBuffer2RGB",  XptFlags::FRAME_STORE),
    (OutputXpt::FRAME_BUFFER3_RGB,  "FrameBuffer3RGB",  XptFlags::FRAME_STORE),
    (OutputXpt::FRAME_BUFFER4_RGB,  "FrameBuffer4RGB",  XptFlags::FRAME_STORE),
    (OutputXpt::CSC1_VID_RGB,       "CSC1VidRGB",       XptFlags::CSC),
    (OutputXpt::CSC2_VID_RGB,       "CSC2VidRGB",       XptFlags::CSC),
    (OutputXpt::LUT1_RGB,           "LUT1RGB",          XptFlags::LUT.union(XptFlags::RGB_ONLY)),
    (OutputXpt::LUT2_RGB,           "LUT2RGB",          XptFlags::LUT.union(XptFlags::RGB_ONLY)),
    (OutputXpt::HDMI_IN1_RGB,       "HDMIIn1RGB",       XptFlags::HDMI),
    (OutputXpt::DUAL_LINK_IN1,      "DuallinkIn1",      XptFlags::DUAL_LINK.union(XptFlags::RGB_ONLY)),
];

fn output_entry(xpt: OutputXpt) -> Option<&'static OutputEntry> {
    OUTPUTS.iter().find(|e| e.0 == xpt)
}

// ============================================================================
// Input crosspoints
// ============================================================================

/// Input crosspoint (signal sink).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputXpt(pub u8);

impl InputXpt {
    /// Lowest input ID. ROM addressing is relative to this.
    pub const FIRST: u8 = 0x01;

    pub const FRAME_BUFFER1: Self = Self(0x01);
    pub const FRAME_BUFFER1_B: Self = Self(0x02);
    pub const FRAME_BUFFER2: Self = Self(0x03);
    pub const FRAME_BUFFER2_B: Self = Self(0x04);
    pub const FRAME_BUFFER3: Self = Self(0x05);
    pub const FRAME_BUFFER4: Self = Self(0x06);
    pub const CSC1_VID: Self = Self(0x07);
    pub const CSC1_KEY: Self = Self(0x08);
    pub const CSC2_VID: Self = Self(0x09);
    pub const CSC2_KEY: Self = Self(0x0A);
    pub const LUT1: Self = Self(0x0B);
    pub const LUT2: Self = Self(0x0C);
    pub const SDI_OUT1: Self = Self(0x0D);
    pub const SDI_OUT1_DS2: Self = Self(0x0E);
    pub const SDI_OUT2: Self = Self(0x0F);
    pub const SDI_OUT2_DS2: Self = Self(0x10);
    pub const SDI_OUT3: Self = Self(0x11);
    pub const SDI_OUT4: Self = Self(0x12);
    pub const HDMI_OUT: Self = Self(0x13);
    pub const MIXER1_FG_VID: Self = Self(0x14);
    pub const MIXER1_FG_KEY: Self = Self(0x15);
    pub const MIXER1_BG_VID: Self = Self(0x16);
    pub const MIXER1_BG_KEY: Self = Self(0x17);
    pub const DUAL_LINK_IN1: Self = Self(0x18);
    pub const DUAL_LINK_IN1_DS: Self = Self(0x19);
    pub const DUAL_LINK_OUT1: Self = Self(0x1A);
    pub const MUX425_1A: Self = Self(0x1B);
    pub const MUX425_1B: Self = Self(0x1C);

    /// SDI output inputs by channel index.
    pub const SDI_OUTS: [Self; 4] = [Self::SDI_OUT1, Self::SDI_OUT2, Self::SDI_OUT3, Self::SDI_OUT4];

    pub const fn id(self) -> u8 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        input_entry(self).is_some()
    }

    pub fn name(self) -> &'static str {
        input_entry(self).map(|e| e.name).unwrap_or("?")
    }

    /// Look up an input by name (case-insensitive, `_` and `NTV2_Xpt` prefix ignored).
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = normalize_name(name);
        INPUTS
            .iter()
            .find(|e| normalize_name(e.name) == wanted)
            .map(|e| e.xpt)
    }

    pub fn flags(self) -> XptFlags {
        input_entry(self).map(|e| e.flags).unwrap_or(XptFlags::empty())
    }

    /// Crosspoint select register and byte index (0..=3) for this input.
    pub fn select_register(self) -> Option<(u32, u8)> {
        input_entry(self).map(|e| (e.reg, e.ndx))
    }

    /// Reverse of [`select_register`](Self::select_register).
    pub fn from_select_register(reg: u32, ndx: u8) -> Option<Self> {
        INPUTS
            .iter()
            .find(|e| e.reg == reg && e.ndx == ndx)
            .map(|e| e.xpt)
    }

    pub fn is_rgb_only(self) -> bool {
        self.flags().contains(XptFlags::RGB_ONLY)
    }

    pub fn is_yuv_only(self) -> bool {
        self.flags().contains(XptFlags::YUV_ONLY)
    }

    pub fn is_key_input(self) -> bool {
        self.flags().contains(XptFlags::KEY)
    }

    pub fn is_sdi_output(self) -> bool {
        self.flags().contains(XptFlags::SDI)
    }

    pub fn is_dual_link(self) -> bool {
        self.flags().contains(XptFlags::DUAL_LINK)
    }

    pub fn is_hdmi_output(self) -> bool {
        self.flags().contains(XptFlags::HDMI)
    }

    /// Every known input, in ID order.
    pub fn all() -> impl Iterator<Item = InputXpt> {
        INPUTS.iter().map(|e| e.xpt)
    }
}

impl fmt::Display for InputXpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for InputXpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#04x})", self.name(), self.0)
    }
}

struct InputEntry {
    xpt: InputXpt,
    name: &'static str,
    flags: XptFlags,
    reg: u32,
    ndx: u8,
}

macro_rules! input {
    ($xpt:ident, $name:literal, $flags:expr, $reg:expr, $ndx:literal) => {
        InputEntry {
            xpt: InputXpt::$xpt,
            name: $name,
            flags: $flags,
            reg: $reg,
            ndx: $ndx,
        }
    };
}

#[rustfmt::skip]
static INPUTS: &[InputEntry] = &[
    input!(FRAME_BUFFER1,    "FrameBuffer1Input",      XptFlags::FRAME_STORE,                          XPT_SELECT_GROUP_2,  0),
    input!(FRAME_BUFFER1_B,  "FrameBuffer1BInput",     XptFlags::FRAME_STORE.union(XptFlags::DS2),     XPT_SELECT_GROUP_14, 0),
    input!(FRAME_BUFFER2,    "FrameBuffer2Input",      XptFlags::FRAME_STORE,                          XPT_SELECT_GROUP_5,  0),
    input!(FRAME_BUFFER2_B,  "FrameBuffer2BInput",     XptFlags::FRAME_STORE.union(XptFlags::DS2),     XPT_SELECT_GROUP_14, 1),
    input!(FRAME_BUFFER3,    "FrameBuffer3Input",      XptFlags::FRAME_STORE,                          XPT_SELECT_GROUP_13, 0),
    input!(FRAME_BUFFER4,    "FrameBuffer4Input",      XptFlags::FRAME_STORE,                          XPT_SELECT_GROUP_13, 2),
    input!(CSC1_VID,         "CSC1VidInput",           XptFlags::CSC,                                  XPT_SELECT_GROUP_1,  1),
    input!(CSC1_KEY,         "CSC1KeyInput",           XptFlags::CSC.union(XptFlags::KEY),             XPT_SELECT_GROUP_3,  3),
    input!(CSC2_VID,         "CSC2VidInput",           XptFlags::CSC,                                  XPT_SELECT_GROUP_5,  2),
    input!(CSC2_KEY,         "CSC2KeyInput",           XptFlags::CSC.union(XptFlags::KEY),             XPT_SELECT_GROUP_5,  3),
    input!(LUT1,             "LUT1Input",              XptFlags::LUT.union(XptFlags::RGB_ONLY),        XPT_SELECT_GROUP_1,  0),
    input!(LUT2,             "LUT2Input",              XptFlags::LUT.union(XptFlags::RGB_ONLY),        XPT_SELECT_GROUP_5,  1),
    input!(SDI_OUT1,         "SDIOut1Input",           XptFlags::SDI.union(XptFlags::YUV_ONLY),        XPT_SELECT_GROUP_3,  1),
    input!(SDI_OUT1_DS2,     "SDIOut1InputDS2",        XptFlags::SDI.union(XptFlags::DS2),             XPT_SELECT_GROUP_10, 0),
    input!(SDI_OUT2,         "SDIOut2Input",           XptFlags::SDI.union(XptFlags::YUV_ONLY),        XPT_SELECT_GROUP_3,  2),
    input!(SDI_OUT2_DS2,     "SDIOut2InputDS2",        XptFlags::SDI.union(XptFlags::DS2),             XPT_SELECT_GROUP_10, 1),
    input!(SDI_OUT3,         "SDIOut3Input",           XptFlags::SDI.union(XptFlags::YUV_ONLY),        XPT_SELECT_GROUP_8,  0),
    input!(SDI_OUT4,         "SDIOut4Input",           XptFlags::SDI.union(XptFlags::YUV_ONLY),        XPT_SELECT_GROUP_8,  1),
    input!(HDMI_OUT,         "HDMIOutInput",           XptFlags::HDMI,                                 XPT_SELECT_GROUP_6,  2),
    input!(MIXER1_FG_VID,    "Mixer1FGVidInput",       XptFlags::MIXER.union(XptFlags::YUV_ONLY),      XPT_SELECT_GROUP_4,  0),
    input!(MIXER1_FG_KEY,    "Mixer1FGKeyInput",       XptFlags::MIXER.union(XptFlags::KEY),           XPT_SELECT_GROUP_4,  1),
    input!(MIXER1_BG_VID,    "Mixer1BGVidInput",       XptFlags::MIXER.union(XptFlags::YUV_ONLY),      XPT_SELECT_GROUP_4,  2),
    input!(MIXER1_BG_KEY,    "Mixer1BGKeyInput",       XptFlags::MIXER.union(XptFlags::KEY),           XPT_SELECT_GROUP_4,  3),
    input!(DUAL_LINK_IN1,    "DualLinkIn1Input",       XptFlags::DUAL_LINK,                            XPT_SELECT_GROUP_11, 0),
    input!(DUAL_LINK_IN1_DS, "DualLinkIn1DSInput",     XptFlags::DUAL_LINK.union(XptFlags::DS2),       XPT_SELECT_GROUP_11, 1),
    input!(DUAL_LINK_OUT1,   "DualLinkOut1Input",      XptFlags::DUAL_LINK.union(XptFlags::RGB_ONLY),  XPT_SELECT_GROUP_2,  3),
    input!(MUX425_1A,        "425Mux1AInput",          XptFlags::MUX_425,                              XPT_SELECT_GROUP_15, 0),
    input!(MUX425_1B,        "425Mux1BInput",          XptFlags::MUX_425,                              XPT_SELECT_GROUP_15, 1),
];

fn input_entry(xpt: InputXpt) -> Option<&'static InputEntry> {
    INPUTS.iter().find(|e| e.xpt == xpt)
}

fn normalize_name(name: &str) -> String {
    let lower: String = name
        .chars()
        .filter(|c| *c != '_' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    match lower.strip_prefix("ntv2xpt") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

// ============================================================================
// Widgets
// ============================================================================

/// Functional FPGA block category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetType {
    FrameStore,
    Csc,
    Lut,
    SdiIn,
    SdiOut,
    HdmiIn,
    HdmiOut,
    Mixer,
    DualLinkIn,
    DualLinkOut,
    Mux425,
}

/// A specific FPGA widget instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WidgetId {
    FrameStore1,
    FrameStore2,
    FrameStore3,
    FrameStore4,
    Csc1,
    Csc2,
    Lut1,
    Lut2,
    SdiIn1,
    SdiIn2,
    SdiIn3,
    SdiIn4,
    SdiOut1,
    SdiOut2,
    SdiOut3,
    SdiOut4,
    HdmiIn1,
    HdmiOut1,
    Mixer1,
    DualLinkIn1,
    DualLinkOut1,
    Mux425_1,
}

struct WidgetEntry {
    id: WidgetId,
    kind: WidgetType,
    channel: u8,
    inputs: &'static [InputXpt],
    outputs: &'static [OutputXpt],
}

macro_rules! widget {
    ($id:ident, $kind:ident, $ch:literal, [$($i:ident),*], [$($o:ident),*]) => {
        WidgetEntry {
            id: WidgetId::$id,
            kind: WidgetType::$kind,
            channel: $ch,
            inputs: &[$(InputXpt::$i),*],
            outputs: &[$(OutputXpt::$o),*],
        }
    };
}

#[rustfmt::skip]
static WIDGETS: &[WidgetEntry] = &[
    widget!(FrameStore1,  FrameStore,  1, [FRAME_BUFFER1, FRAME_BUFFER1_B], [FRAME_BUFFER1_YUV, FRAME_BUFFER1_RGB]),
    widget!(FrameStore2,  FrameStore,  2, [FRAME_BUFFER2, FRAME_BUFFER2_B], [FRAME_BUFFER2_YUV, FRAME_BUFFER2_RGB]),
    widget!(FrameStore3,  FrameStore,  3, [FRAME_BUFFER3],                  [FRAME_BUFFER3_YUV, FRAME_BUFFER3_RGB]),
    widget!(FrameStore4,  FrameStore,  4, [FRAME_BUFFER4],                  [FRAME_BUFFER4_YUV, FRAME_BUFFER4_RGB]),
    widget!(Csc1,         Csc,         1, [CSC1_VID, CSC1_KEY],             [CSC1_VID_YUV, CSC1_VID_RGB, CSC1_KEY_YUV]),
    widget!(Csc2,         Csc,         2, [CSC2_VID, CSC2_KEY],             [CSC2_VID_YUV, CSC2_VID_RGB, CSC2_KEY_YUV]),
    widget!(Lut1,         Lut,         1, [LUT1],                           [LUT1_RGB]),
    widget!(Lut2,         Lut,         2, [LUT2],                           [LUT2_RGB]),
    widget!(SdiIn1,       SdiIn,       1, [],                               [SDI_IN1, SDI_IN1_DS2]),
    widget!(SdiIn2,       SdiIn,       2, [],                               [SDI_IN2, SDI_IN2_DS2]),
    widget!(SdiIn3,       SdiIn,       3, [],                               [SDI_IN3]),
    widget!(SdiIn4,       SdiIn,       4, [],                               [SDI_IN4]),
    widget!(SdiOut1,      SdiOut,      1, [SDI_OUT1, SDI_OUT1_DS2],         []),
    widget!(SdiOut2,      SdiOut,      2, [SDI_OUT2, SDI_OUT2_DS2],         []),
    widget!(SdiOut3,      SdiOut,      3, [SDI_OUT3],                       []),
    widget!(SdiOut4,      SdiOut,      4, [SDI_OUT4],                       []),
    widget!(HdmiIn1,      HdmiIn,      1, [],                               [HDMI_IN1_YUV, HDMI_IN1_RGB]),
    widget!(HdmiOut1,     HdmiOut,     1, [HDMI_OUT],                       []),
    widget!(Mixer1,       Mixer,       1, [MIXER1_FG_VID, MIXER1_FG_KEY, MIXER1_BG_VID, MIXER1_BG_KEY], [MIXER1_VID_YUV, MIXER1_KEY_YUV]),
    widget!(DualLinkIn1,  DualLinkIn,  1, [DUAL_LINK_IN1, DUAL_LINK_IN1_DS], [DUAL_LINK_IN1]),
    widget!(DualLinkOut1, DualLinkOut, 1, [DUAL_LINK_OUT1],                 [DUAL_LINK_OUT1, DUAL_LINK_OUT1_DS2]),
    widget!(Mux425_1,     Mux425,      1, [MUX425_1A, MUX425_1B],           [MUX425_1A_YUV]),
];

impl WidgetId {
    fn entry(self) -> &'static WidgetEntry {
        // The table has one row per variant.
        &WIDGETS[self as usize]
    }

    pub fn widget_type(self) -> WidgetType {
        self.entry().kind
    }

    pub fn channel(self) -> Channel {
        Channel(self.entry().channel)
    }

    pub fn inputs(self) -> &'static [InputXpt] {
        self.entry().inputs
    }

    pub fn outputs(self) -> &'static [OutputXpt] {
        self.entry().outputs
    }

    /// Widget owning `output`. BLACK has no widget.
    pub fn for_output(output: OutputXpt) -> Option<Self> {
        WIDGETS
            .iter()
            .find(|w| w.outputs.contains(&output))
            .map(|w| w.id)
    }

    /// Widget owning `input`.
    pub fn for_input(input: InputXpt) -> Option<Self> {
        WIDGETS
            .iter()
            .find(|w| w.inputs.contains(&input))
            .map(|w| w.id)
    }

    pub fn all() -> impl Iterator<Item = WidgetId> {
        WIDGETS.iter().map(|w| w.id)
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_widget_table_order_matches_enum() {
        for (i, w) in WIDGETS.iter().enumerate() {
            assert_eq!(w.id as usize, i, "widget table out of order at {:?}", w.id);
        }
    }

    #[test]
    fn test_select_registers_are_unique() {
        let mut seen = HashSet::new();
        for input in InputXpt::all() {
            let slot = input.select_register().unwrap();
            assert!(slot.1 <= 3);
            assert!(seen.insert(slot), "{} shares a select slot", input);
            assert!(XPT_SELECT_REGISTERS.contains(&slot.0));
            assert_eq!(InputXpt::from_select_register(slot.0, slot.1), Some(input));
        }
    }

    #[test]
    fn test_rgb_twins() {
        assert!(OutputXpt::FRAME_BUFFER1_RGB.is_rgb());
        assert!(OutputXpt::FRAME_BUFFER1_YUV.is_yuv());
        assert_eq!(
            OutputXpt::FRAME_BUFFER1_YUV.rgb_twin(),
            Some(OutputXpt::FRAME_BUFFER1_RGB)
        );
        assert_eq!(OutputXpt::SDI_IN1.rgb_twin(), None);
        assert!(OutputXpt::LUT1_RGB.flags().contains(XptFlags::RGB_ONLY));
    }

    #[test]
    fn test_names() {
        assert_eq!(InputXpt::from_name("sdiout1input"), Some(InputXpt::SDI_OUT1));
        assert_eq!(
            InputXpt::from_name("NTV2_XptFrameBuffer1Input"),
            Some(InputXpt::FRAME_BUFFER1)
        );
        assert_eq!(OutputXpt::from_name("CSC1_VID_RGB"), Some(OutputXpt::CSC1_VID_RGB));
        assert_eq!(OutputXpt::from_name("black"), Some(OutputXpt::BLACK));
        assert_eq!(OutputXpt::from_name("nope"), None);
        assert_eq!(OutputXpt::BLACK.name(), "Black");
        assert_eq!(OutputXpt(0x7E).name(), "?");
        assert!(!OutputXpt(0x7E).is_valid());
    }

    #[test]
    fn test_input_predicates() {
        assert!(InputXpt::LUT1.is_rgb_only());
        assert!(InputXpt::SDI_OUT1.is_yuv_only());
        assert!(InputXpt::SDI_OUT1.is_sdi_output());
        assert!(InputXpt::CSC1_KEY.is_key_input());
        assert!(InputXpt::DUAL_LINK_OUT1.is_dual_link());
        assert!(InputXpt::HDMI_OUT.is_hdmi_output());
        assert!(!InputXpt(0x7F).is_valid());
    }

    #[test]
    fn test_widget_lookup() {
        assert_eq!(
            WidgetId::for_output(OutputXpt::CSC1_VID_RGB),
            Some(WidgetId::Csc1)
        );
        assert_eq!(WidgetId::for_output(OutputXpt::BLACK), None);
        assert_eq!(WidgetId::for_input(InputXpt::SDI_OUT2), Some(WidgetId::SdiOut2));
        assert_eq!(WidgetId::FrameStore3.channel().number(), 3);
        assert_eq!(WidgetId::Mixer1.inputs().len(), 4);
        assert_eq!(WidgetId::Lut1.widget_type(), WidgetType::Lut);
    }

    #[test]
    fn test_channel() {
        assert!(Channel::new(0).is_none());
        assert!(Channel::new(9).is_none());
        let ch = Channel::new(3).unwrap();
        assert_eq!(ch.index(), 2);
        assert_eq!(ch.to_string(), "Ch3");
    }
}
