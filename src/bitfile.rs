// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Xilinx bitfile header parsing.
//!
//! A bitfile starts with a fixed 13-byte preamble followed by tagged
//! sections:
//!
//! | Tag | Length  | Content                                   |
//! |-----|---------|-------------------------------------------|
//! | `a` | u16 BE  | design name and `;key=value` parameters    |
//! | `b` | u16 BE  | part name                                  |
//! | `c` | u16 BE  | build date `yyyy/mm/dd`                    |
//! | `d` | u16 BE  | build time `hh:mm:ss`                      |
//! | `e` | u32 BE  | program size; program data follows         |
//!
//! The program data carries the Xilinx sync word near its start.

use crate::device::DeviceId;
use crate::error::{Ntv2Error, Ntv2Result};
use std::fmt;
use std::path::Path;

/// Largest header buffer examined.
pub const MAX_HEADER_BYTES: usize = 512;

/// How far past the program offset the sync word may appear.
const SYNC_SEARCH_LIMIT: usize = 1000;

const PREAMBLE: [u8; 13] = [
    0x00, 0x09, 0x0F, 0xF0, 0x0F, 0xF0, 0x0F, 0xF0, 0x0F, 0xF0, 0x00, 0x00, 0x01,
];

const SYNC_WORD: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0xAA, 0x99, 0x55, 0x66];

/// Parsed bitfile header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfile {
    raw_design: String,
    part_name: String,
    date: String,
    time: String,
    program_size: u32,
    program_offset: u32,
    user_id: u32,
    partial: bool,
    clear: bool,
}

/// Cursor over the header buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Ntv2Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|e| *e <= self.buf.len());
        let Some(end) = end else {
            return Err(Ntv2Error::BitfileHeader(format!(
                "truncated: need {} bytes at offset {}, header is {} bytes",
                n,
                self.pos,
                self.buf.len()
            )));
        };
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn tag(&mut self, expected: u8) -> Ntv2Result<()> {
        let at = self.pos;
        let got = self.take(1)?[0];
        if got != expected {
            return Err(Ntv2Error::BitfileHeader(format!(
                "expected section '{}' at offset {}, got {:#04x}",
                expected as char, at, got
            )));
        }
        Ok(())
    }

    fn u16_be(&mut self) -> Ntv2Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32_be(&mut self) -> Ntv2Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A tagged, length-prefixed string section.
    fn section(&mut self, tag: u8) -> Ntv2Result<&'a [u8]> {
        self.tag(tag)?;
        let len = self.u16_be()? as usize;
        self.take(len)
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Strip everything from the first NUL.
fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == 0) {
        Some(p) => &bytes[..p],
        None => bytes,
    }
}

fn check_pattern(value: &str, pattern: &str, what: &str) -> Ntv2Result<()> {
    let ok = value.len() == pattern.len()
        && value.bytes().zip(pattern.bytes()).all(|(v, p)| match p {
            b'd' => v.is_ascii_digit(),
            _ => v == p,
        });
    if ok {
        Ok(())
    } else {
        Err(Ntv2Error::BitfileHeader(format!(
            "{} '{}' does not match {}",
            what,
            value,
            pattern.replace('d', "N")
        )))
    }
}

/// Parse the `;`-separated design parameters.
///
/// Returns (user_id, partial, clear).
fn parse_design_params(raw: &str) -> Ntv2Result<(u32, bool, bool)> {
    let lower = raw.to_ascii_lowercase();
    let mut user_id = None;
    let mut partial = false;
    let mut clear = false;

    for segment in lower.split(';') {
        if let Some(value) = segment.strip_prefix("userid=") {
            if user_id.is_some() {
                return Err(Ntv2Error::BitfileHeader(format!(
                    "design '{}' has multiple UserID parameters",
                    raw
                )));
            }
            if value.contains('=') {
                return Err(Ntv2Error::BitfileHeader(format!(
                    "UserID '{}' has more than one '='",
                    segment
                )));
            }
            if value.len() < 3 {
                return Err(Ntv2Error::BitfileHeader(format!(
                    "UserID '{}' is too short",
                    value
                )));
            }
            let hex = value.strip_prefix("0x").unwrap_or(value);
            if let Some(bad) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
                return Err(Ntv2Error::BitfileHeader(format!(
                    "bad hex digit '{}' in UserID '{}'",
                    bad, value
                )));
            }
            let id = u32::from_str_radix(hex, 16).map_err(|e| {
                Ntv2Error::BitfileHeader(format!("UserID '{}': {}", value, e))
            })?;
            user_id = Some(id);
        } else if segment == "partial=true" {
            partial = true;
        } else if segment == "clear=true" {
            clear = true;
        }
    }
    Ok((user_id.unwrap_or(0xFFFF_FFFF), partial, clear))
}

impl Bitfile {
    /// Parse a header from the start of a bitfile.
    ///
    /// Only the first [`MAX_HEADER_BYTES`] bytes are examined.
    pub fn parse_header(bytes: &[u8]) -> Ntv2Result<Self> {
        let buf = &bytes[..bytes.len().min(MAX_HEADER_BYTES)];
        let mut r = Reader { buf, pos: 0 };

        if r.take(PREAMBLE.len())? != PREAMBLE {
            return Err(Ntv2Error::BitfileHeader(
                "byte mismatch in first 13 bytes".into(),
            ));
        }

        let design_bytes = r.section(b'a')?;
        if design_bytes.len() < 8 {
            return Err(Ntv2Error::BitfileHeader(format!(
                "raw design '{}' shorter than 8 characters",
                lossy(design_bytes)
            )));
        }
        let design_bytes = design_bytes.strip_suffix(&[0]).unwrap_or(design_bytes);
        let raw_design = lossy(design_bytes);
        let (user_id, partial, clear) = parse_design_params(&raw_design)?;

        let part_name = lossy(until_nul(r.section(b'b')?));

        let date_bytes = r.section(b'c')?;
        let date = lossy(until_nul(&date_bytes[..date_bytes.len().min(10)]));
        check_pattern(&date, "dddd/dd/dd", "date")?;

        let time_bytes = r.section(b'd')?;
        let time = lossy(until_nul(&time_bytes[..time_bytes.len().min(8)]));
        check_pattern(&time, "dd:dd:dd", "time")?;

        r.tag(b'e')?;
        let program_size = r.u32_be()?;
        if program_size == 0 {
            return Err(Ntv2Error::BitfileHeader(
                "non-zero program size expected".into(),
            ));
        }
        let program_offset = r.pos as u32;

        let search_end = buf.len().min(r.pos + SYNC_SEARCH_LIMIT + SYNC_WORD.len());
        let found = buf[r.pos..search_end]
            .windows(SYNC_WORD.len())
            .any(|w| w == SYNC_WORD);
        if !found {
            return Err(Ntv2Error::BitfileHeader(format!(
                "missing sync word after offset {}",
                program_offset
            )));
        }

        let bitfile = Self {
            raw_design,
            part_name,
            date,
            time,
            program_size,
            program_offset,
            user_id,
            partial,
            clear,
        };
        if bitfile.design_name().is_empty() {
            return Err(Ntv2Error::BitfileHeader(format!(
                "bad design name in '{}'",
                bitfile.raw_design
            )));
        }
        log::debug!("parsed bitfile header: {}", bitfile);
        Ok(bitfile)
    }

    /// Read and parse a bitfile from disk.
    pub fn open(path: impl AsRef<Path>) -> Ntv2Result<Self> {
        Ok(Self::load(path)?.0)
    }

    /// Read a bitfile from disk, returning the header and the whole file.
    pub fn load(path: impl AsRef<Path>) -> Ntv2Result<(Self, Vec<u8>)> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let header = Self::parse_header(&data).inspect_err(|e| {
            log::warn!("{}: {}", path.display(), e);
        })?;
        Ok((header, data))
    }

    /// Design name: the leading `[A-Za-z0-9_]` run of the raw design.
    pub fn design_name(&self) -> &str {
        let end = self
            .raw_design
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(self.raw_design.len());
        &self.raw_design[..end]
    }

    pub fn raw_design(&self) -> &str {
        &self.raw_design
    }

    pub fn part_name(&self) -> &str {
        &self.part_name
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn program_size(&self) -> u32 {
        self.program_size
    }

    pub fn program_offset(&self) -> u32 {
        self.program_offset
    }

    /// 0xFFFFFFFF when the design carries no UserID.
    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    pub fn design_id(&self) -> u8 {
        (self.user_id >> 24) as u8
    }

    pub fn design_version(&self) -> u8 {
        (self.user_id >> 16) as u8
    }

    pub fn bitfile_id(&self) -> u8 {
        (self.user_id >> 8) as u8
    }

    pub fn bitfile_version(&self) -> u8 {
        self.user_id as u8
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn is_clear(&self) -> bool {
        self.clear
    }

    /// Board this bitfile was built for.
    pub fn device_id(&self) -> Option<DeviceId> {
        if self.user_id != 0 && self.user_id != 0xFFFF_FFFF {
            DeviceId::from_design_pair(self.design_id(), self.bitfile_id())
        } else {
            DeviceId::from_design_name(self.design_name())
        }
    }

    /// Whether this bitfile may be written to `device`'s flash.
    ///
    /// Partial and clear bitfiles are never flashed.
    pub fn can_flash_device(&self, device: DeviceId) -> bool {
        !self.partial && !self.clear && device.can_flash_design(self.design_name())
    }

    /// The program data within a complete file.
    pub fn program_stream<'f>(&self, file: &'f [u8]) -> Ntv2Result<&'f [u8]> {
        let start = self.program_offset as usize;
        let end = start + self.program_size as usize;
        file.get(start..end).ok_or_else(|| {
            Ntv2Error::BitfileHeader(format!(
                "file of {} bytes is shorter than program end {}",
                file.len(),
                end
            ))
        })
    }

    /// CRC-32 of the program data.
    pub fn program_crc32(&self, file: &[u8]) -> Ntv2Result<u32> {
        Ok(crc32fast::hash(self.program_stream(file)?))
    }
}

impl fmt::Display for Bitfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} {}, {} bytes at {}",
            self.design_name(),
            self.part_name,
            self.date,
            self.time,
            self.program_size,
            self.program_offset
        )?;
        if self.user_id != 0xFFFF_FFFF {
            write!(f, ", UserID {:#010x}", self.user_id)?;
        }
        if self.partial {
            f.write_str(", partial")?;
        }
        if self.clear {
            f.write_str(", clear")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn push_section(out: &mut Vec<u8>, tag: u8, text: &str) {
        out.push(tag);
        out.extend_from_slice(&((text.len() + 1) as u16).to_be_bytes());
        out.extend_from_slice(text.as_bytes());
        out.push(0);
    }

    /// Build a complete bitfile whose program data is the sync word followed by `body`.
    pub(crate) fn build_bitfile(design: &str, body: &[u8]) -> Vec<u8> {
        let mut out = PREAMBLE.to_vec();
        push_section(&mut out, b'a', design);
        push_section(&mut out, b'b', "7k325tffg900");
        push_section(&mut out, b'c', "2025/03/14");
        push_section(&mut out, b'd', "09:26:53");
        out.push(b'e');
        out.extend_from_slice(&((SYNC_WORD.len() + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(&SYNC_WORD);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_parse_fields() {
        let file = build_bitfile("kona5_retail;UserID=0X01020304;Version=2", &[1, 2, 3, 4]);
        let bf = Bitfile::parse_header(&file).unwrap();
        assert_eq!(bf.design_name(), "kona5_retail");
        assert_eq!(bf.raw_design(), "kona5_retail;UserID=0X01020304;Version=2");
        assert_eq!(bf.part_name(), "7k325tffg900");
        assert_eq!(bf.date(), "2025/03/14");
        assert_eq!(bf.time(), "09:26:53");
        assert_eq!(bf.user_id(), 0x0102_0304);
        assert_eq!(bf.design_id(), 1);
        assert_eq!(bf.design_version(), 2);
        assert_eq!(bf.bitfile_id(), 3);
        assert_eq!(bf.bitfile_version(), 4);
        assert_eq!(bf.program_size(), 12);
        assert_eq!(bf.program_stream(&file).unwrap()[8..], [1, 2, 3, 4]);
        assert!(!bf.is_partial());
    }

    #[test]
    fn test_device_id_from_pair_and_name() {
        let by_pair = build_bitfile("anything_x;UserID=0x01000200", &[]);
        assert_eq!(
            Bitfile::parse_header(&by_pair).unwrap().device_id(),
            Some(DeviceId::Kona5_8K)
        );
        let by_name = build_bitfile("corvid_88;UserID=0xFFFFFFFF", &[]);
        assert_eq!(
            Bitfile::parse_header(&by_name).unwrap().device_id(),
            Some(DeviceId::Corvid88)
        );
    }

    #[test]
    fn test_can_flash_device() {
        let bf = Bitfile::parse_header(&build_bitfile("kona_4_ufc;UserID=0xFFFFFFFF", &[])).unwrap();
        assert!(bf.can_flash_device(DeviceId::Kona4Ufc));
        assert!(bf.can_flash_device(DeviceId::Kona4));
        assert!(!bf.can_flash_device(DeviceId::Kona1));

        let partial =
            Bitfile::parse_header(&build_bitfile("kona_4_ufc;PARTIAL=TRUE", &[])).unwrap();
        assert!(partial.is_partial());
        assert!(!partial.can_flash_device(DeviceId::Kona4Ufc));

        let clear = Bitfile::parse_header(&build_bitfile("kona_4_ufc;Clear=True", &[])).unwrap();
        assert!(clear.is_clear());
        assert!(!clear.can_flash_device(DeviceId::Kona4Ufc));
    }

    #[test]
    fn test_missing_user_id_is_all_ones() {
        let bf = Bitfile::parse_header(&build_bitfile("t_tap_pro_top", &[])).unwrap();
        assert_eq!(bf.user_id(), 0xFFFF_FFFF);
        assert_eq!(bf.design_name(), "t_tap_pro_top");
    }

    #[test]
    fn test_bad_preamble() {
        let mut file = build_bitfile("kona1;UserID=0xFFFFFFFF", &[]);
        file[1] = 0x08;
        assert!(matches!(Bitfile::parse_header(&file), Err(Ntv2Error::BitfileHeader(_))));
    }

    #[test]
    fn test_short_design_rejected() {
        let file = build_bitfile("k1", &[]);
        assert!(Bitfile::parse_header(&file).is_err());
    }

    #[test]
    fn test_user_id_errors() {
        for design in [
            "kona1_top;UserID=1f;",
            "kona1_top;UserID=0xFFFFFFFF;UserID=0x01",
            "kona1_top;UserID=0xZZ00",
            "kona1_top;UserID=0x12=34",
        ] {
            let file = build_bitfile(design, &[]);
            assert!(Bitfile::parse_header(&file).is_err(), "{}", design);
        }
    }

    #[test]
    fn test_bad_date_and_time() {
        let mut file = PREAMBLE.to_vec();
        push_section(&mut file, b'a', "kona1_top");
        push_section(&mut file, b'b', "part");
        push_section(&mut file, b'c', "2025-03-14");
        push_section(&mut file, b'd', "09:26:53");
        let err = Bitfile::parse_header(&file).unwrap_err();
        assert!(err.to_string().contains("date"));

        let mut file = PREAMBLE.to_vec();
        push_section(&mut file, b'a', "kona1_top");
        push_section(&mut file, b'b', "part");
        push_section(&mut file, b'c', "2025/03/14");
        push_section(&mut file, b'd', "9:26:53");
        let err = Bitfile::parse_header(&file).unwrap_err();
        assert!(err.to_string().contains("time"));
    }

    #[test]
    fn test_missing_sync_word() {
        let mut file = build_bitfile("kona1_top", &[0; 16]);
        let pos = file.len() - 16 - SYNC_WORD.len();
        file[pos + 4] = 0x00;
        assert!(Bitfile::parse_header(&file).unwrap_err().to_string().contains("sync"));
    }

    #[test]
    fn test_zero_program_size() {
        let mut file = build_bitfile("kona1_top", &[]);
        let size_pos = file.len() - SYNC_WORD.len() - 4;
        file[size_pos..size_pos + 4].copy_from_slice(&[0, 0, 0, 0]);
        assert!(Bitfile::parse_header(&file).is_err());
    }

    #[test]
    fn test_truncated_header() {
        let file = build_bitfile("kona1_top", &[]);
        assert!(Bitfile::parse_header(&file[..30]).is_err());
    }

    #[test]
    fn test_program_stream_short_file() {
        let file = build_bitfile("kona1_top", &[9; 64]);
        let bf = Bitfile::parse_header(&file).unwrap();
        assert!(bf.program_stream(&file[..file.len() - 1]).is_err());
        assert_eq!(
            bf.program_crc32(&file).unwrap(),
            crc32fast::hash(&file[bf.program_offset() as usize..])
        );
    }
}
