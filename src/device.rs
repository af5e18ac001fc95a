// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! NTV2 device identification and discovery.
//!
//! # Platform Support
//!
//! ## Linux
//! The `ajantv2` kernel driver creates one character device per board:
//! `/dev/ajantv2_0`... in older drivers `/dev/ajantv20`. Each node maps
//! the board's register BAR. The board ID is read from register 50.
//!
//! ## Other platforms
//! Local discovery is not available. Remote boards are reached through
//! the nub protocol and simulated boards through [`NoDevice`](crate::nodevice::NoDevice).

use crate::error::{Ntv2Error, Ntv2Result};
use crate::xpt::{WidgetId, WidgetType};
use std::fmt;
use std::path::PathBuf;

#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;

/// Device node directory (Linux only).
#[cfg(target_os = "linux")]
const DEV_PATH: &str = "/dev";

/// Device node name prefix (Linux only).
#[cfg(target_os = "linux")]
const DEV_PREFIX: &str = "ajantv2";

/// Driver module sysfs entry (Linux only).
#[cfg(target_os = "linux")]
const SYSFS_DRIVER_PATH: &str = "/sys/module/ajantv2";

/// Board model, identified by the value of the board ID register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum DeviceId {
    Kona1 = 0x1075_6600,
    Kona4 = 0x1051_8400,
    Kona4Ufc = 0x1051_8450,
    Kona5 = 0x1079_8400,
    Kona5_8KMK = 0x1079_8402,
    Kona5_8K = 0x1079_8403,
    KonaHdmi = 0x1076_7400,
    Corvid44 = 0x1056_5400,
    Corvid44_8KMK = 0x1056_5402,
    Corvid88 = 0x1053_8200,
    Io4K = 0x1047_8300,
    Io4KUfc = 0x1047_8350,
    TTapPro = 0x1087_9000,
}

impl DeviceId {
    /// Every known model.
    pub const ALL: [DeviceId; 13] = [
        DeviceId::Kona1,
        DeviceId::Kona4,
        DeviceId::Kona4Ufc,
        DeviceId::Kona5,
        DeviceId::Kona5_8KMK,
        DeviceId::Kona5_8K,
        DeviceId::KonaHdmi,
        DeviceId::Corvid44,
        DeviceId::Corvid44_8KMK,
        DeviceId::Corvid88,
        DeviceId::Io4K,
        DeviceId::Io4KUfc,
        DeviceId::TTapPro,
    ];

    /// Raw board ID register value.
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Map a board ID register value to a model.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.as_u32() == value)
    }

    /// Look up a model by its short name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL.iter().copied().find(|d| {
            let candidate: String = d
                .name()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .collect();
            candidate == wanted
        })
    }

    /// Short marketing name.
    pub fn name(self) -> &'static str {
        match self {
            DeviceId::Kona1 => "Kona 1",
            DeviceId::Kona4 => "Kona 4",
            DeviceId::Kona4Ufc => "Kona 4 UFC",
            DeviceId::Kona5 => "Kona 5",
            DeviceId::Kona5_8KMK => "Kona 5 8K MK",
            DeviceId::Kona5_8K => "Kona 5 8K",
            DeviceId::KonaHdmi => "Kona HDMI",
            DeviceId::Corvid44 => "Corvid 44",
            DeviceId::Corvid44_8KMK => "Corvid 44 8K MK",
            DeviceId::Corvid88 => "Corvid 88",
            DeviceId::Io4K => "Io 4K",
            DeviceId::Io4KUfc => "Io 4K UFC",
            DeviceId::TTapPro => "T-Tap Pro",
        }
    }

    /// SPI flash layout generation.
    pub fn spi_flash_version(self) -> u8 {
        match self {
            DeviceId::Kona4 | DeviceId::Kona4Ufc | DeviceId::Io4K | DeviceId::Io4KUfc => 1,
            DeviceId::Corvid88 | DeviceId::Corvid44 => 2,
            DeviceId::Kona1 => 3,
            DeviceId::KonaHdmi => 4,
            DeviceId::Kona5
            | DeviceId::Kona5_8KMK
            | DeviceId::Kona5_8K
            | DeviceId::Corvid44_8KMK
            | DeviceId::TTapPro => 5,
        }
    }

    /// Number of video channels (frame stores).
    pub fn num_video_channels(self) -> u8 {
        match self {
            DeviceId::Kona1 | DeviceId::TTapPro => 1,
            DeviceId::Corvid88 => 8,
            _ => 4,
        }
    }

    /// Number of SDI outputs.
    pub fn num_sdi_outputs(self) -> u8 {
        match self {
            DeviceId::KonaHdmi => 0,
            DeviceId::Kona1 | DeviceId::TTapPro => 1,
            DeviceId::Corvid88 => 8,
            _ => 4,
        }
    }

    pub fn has_hdmi_in(self) -> bool {
        matches!(
            self,
            DeviceId::KonaHdmi | DeviceId::Io4K | DeviceId::Io4KUfc | DeviceId::Kona5
        )
    }

    pub fn has_hdmi_out(self) -> bool {
        !matches!(
            self,
            DeviceId::KonaHdmi | DeviceId::Corvid44 | DeviceId::Corvid44_8KMK | DeviceId::Corvid88
        )
    }

    /// Whether the board's FPGA contains this widget.
    pub fn can_do_widget(self, widget: WidgetId) -> bool {
        let ch = widget.channel().number();
        match widget.widget_type() {
            WidgetType::SdiIn | WidgetType::SdiOut => ch <= self.num_sdi_outputs(),
            WidgetType::HdmiIn => self.has_hdmi_in(),
            WidgetType::HdmiOut => self.has_hdmi_out(),
            WidgetType::DualLinkIn | WidgetType::DualLinkOut => self.num_sdi_outputs() > 0,
            WidgetType::Mux425 => ch <= self.num_video_channels() && self.num_video_channels() >= 4,
            WidgetType::FrameStore | WidgetType::Csc | WidgetType::Lut | WidgetType::Mixer => {
                ch <= self.num_video_channels()
            }
        }
    }

    /// Design name in the header of this board's main bitfile.
    pub fn primary_design_name(self) -> &'static str {
        match self {
            DeviceId::Kona1 => "kona1",
            DeviceId::Kona4 => "kona_4_quad",
            DeviceId::Kona4Ufc => "kona_4_ufc",
            DeviceId::Kona5 => "kona5_retail",
            DeviceId::Kona5_8KMK => "kona5_8k_mk",
            DeviceId::Kona5_8K => "kona5_8k",
            DeviceId::KonaHdmi => "kona_hdmi_4rx",
            DeviceId::Corvid44 => "corvid_44",
            DeviceId::Corvid44_8KMK => "c44_12g_8k_mk",
            DeviceId::Corvid88 => "corvid_88",
            DeviceId::Io4K => "io_xt_4k",
            DeviceId::Io4KUfc => "io_xt_4k_ufc",
            DeviceId::TTapPro => "t_tap_pro",
        }
    }

    /// Design-pair (design ID, bitfile ID) carried in newer bitfile UserIDs.
    pub fn design_pair(self) -> Option<(u8, u8)> {
        match self {
            DeviceId::Kona5 => Some((0x01, 0x00)),
            DeviceId::Kona5_8KMK => Some((0x01, 0x01)),
            DeviceId::Kona5_8K => Some((0x01, 0x02)),
            DeviceId::Corvid44_8KMK => Some((0x02, 0x00)),
            DeviceId::TTapPro => Some((0x03, 0x00)),
            _ => None,
        }
    }

    /// Look up a model from a bitfile design pair.
    pub fn from_design_pair(design_id: u8, bitfile_id: u8) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.design_pair() == Some((design_id, bitfile_id)))
    }

    /// Look up a model from a bitfile design name (case-insensitive).
    pub fn from_design_name(design: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.primary_design_name().eq_ignore_ascii_case(design))
    }

    /// Whether a bitfile with this design name may be written to this board.
    pub fn can_flash_design(self, design: &str) -> bool {
        if design == self.primary_design_name() {
            return true;
        }
        match self {
            DeviceId::Kona4 => design == DeviceId::Kona4Ufc.primary_design_name(),
            DeviceId::Kona4Ufc => design == DeviceId::Kona4.primary_design_name(),
            DeviceId::Io4K => design == DeviceId::Io4KUfc.primary_design_name(),
            DeviceId::Io4KUfc => design == DeviceId::Io4K.primary_design_name(),
            DeviceId::Corvid44 => design == "corvid_446",
            DeviceId::Corvid88 => design == "CORVID88" || design == "corvid88_top",
            DeviceId::KonaHdmi => design == "Corvid_HDMI_4Rx_Top",
            DeviceId::Kona5 | DeviceId::Kona5_8KMK | DeviceId::Kona5_8K => {
                let base = design.strip_suffix("_tprom").unwrap_or(design);
                base == "kona5"
                    || base == "kona5_12g"
                    || [DeviceId::Kona5, DeviceId::Kona5_8KMK, DeviceId::Kona5_8K]
                        .iter()
                        .any(|d| d.primary_design_name() == base)
            }
            _ => false,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A locally installed board.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Board index (0-based, in node order).
    pub index: u32,
    /// Node name (e.g., "ajantv2_0").
    pub name: String,
    /// Device node path.
    pub path: PathBuf,
    /// Raw board ID register, if the node could be mapped.
    pub board_id: Option<u32>,
}

impl DeviceInfo {
    /// Known model for this board, if any.
    pub fn device_id(&self) -> Option<DeviceId> {
        self.board_id.and_then(DeviceId::from_u32)
    }

    /// Display name for logs and listings.
    pub fn display_name(&self) -> String {
        match self.device_id() {
            Some(id) => format!("{} - {}", id, self.index),
            None => format!("{} - {}", self.name, self.index),
        }
    }
}

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;
    use crate::mmio::MappedRegisters;
    use crate::register::RegisterIo;
    use crate::regs;

    pub fn discover_devices() -> Ntv2Result<Vec<DeviceInfo>> {
        let dev_path = Path::new(DEV_PATH);

        let mut node_names: Vec<(u32, String)> = Vec::new();
        for entry in fs::read_dir(dev_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(index) = parse_node_index(&name) {
                node_names.push((index, name));
            }
        }
        node_names.sort();

        let mut devices = Vec::new();
        for (index, name) in node_names {
            let path = dev_path.join(&name);
            let board_id = read_board_id(&path);
            let info = DeviceInfo {
                index,
                name,
                path,
                board_id,
            };
            log::info!("Found NTV2 device: {} ({})", info.display_name(), info.path.display());
            devices.push(info);
        }

        Ok(devices)
    }

    pub(super) fn parse_node_index(name: &str) -> Option<u32> {
        let rest = name.strip_prefix(DEV_PREFIX)?;
        let digits = rest.strip_prefix('_').unwrap_or(rest);
        if digits.is_empty() {
            return None;
        }
        digits.parse().ok()
    }

    fn read_board_id(path: &Path) -> Option<u32> {
        match MappedRegisters::open(path) {
            Ok(regs) => regs.read_register(regs::BOARD_ID).ok(),
            Err(e) => {
                log::debug!("cannot map {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn is_driver_loaded() -> bool {
        Path::new(SYSFS_DRIVER_PATH).exists()
    }
}

// ============================================================================
// Unsupported Platform Stub
// ============================================================================

#[cfg(not(target_os = "linux"))]
mod stub_impl {
    use super::*;

    pub fn discover_devices() -> Ntv2Result<Vec<DeviceInfo>> {
        Err(Ntv2Error::PlatformNotSupported)
    }

    pub fn is_driver_loaded() -> bool {
        false
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Discover all locally installed NTV2 boards.
///
/// # Platform Support
///
/// - **Linux**: Scans `/dev` for `ajantv2` nodes and reads each board ID
/// - **Other**: Returns `PlatformNotSupported`
///
/// # Example
///
/// ```rust,no_run
/// use ntv2_rust::discover_devices;
///
/// let devices = discover_devices()?;
/// for device in &devices {
///     println!("Found NTV2 board: {}", device.display_name());
/// }
/// # Ok::<(), ntv2_rust::Ntv2Error>(())
/// ```
#[cfg(target_os = "linux")]
pub fn discover_devices() -> Ntv2Result<Vec<DeviceInfo>> {
    linux_impl::discover_devices()
}

#[cfg(not(target_os = "linux"))]
pub fn discover_devices() -> Ntv2Result<Vec<DeviceInfo>> {
    stub_impl::discover_devices()
}

/// Check if the NTV2 kernel driver is loaded.
#[cfg(target_os = "linux")]
pub fn is_driver_loaded() -> bool {
    linux_impl::is_driver_loaded()
}

#[cfg(not(target_os = "linux"))]
pub fn is_driver_loaded() -> bool {
    stub_impl::is_driver_loaded()
}

/// Find the board with the given index.
pub fn find_device(index: u32) -> Ntv2Result<DeviceInfo> {
    discover_devices()?
        .into_iter()
        .find(|d| d.index == index)
        .ok_or(Ntv2Error::NoDeviceFound)
}
