// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Device specification strings.
//!
//! A device spec names the board a caller wants to open:
//!
//! | Form                        | Meaning                      |
//! |-----------------------------|------------------------------|
//! | `0`                         | local board by index         |
//! | `kona5`                     | first local board of a model |
//! | `0x10798400`                | first local board with an ID |
//! | `00T64450`                  | local board by serial number |
//! | `nub://host[:port]/0?k=v`   | remote board over the nub    |
//! | `ntv2local:///1`            | local board, URL form        |
//! | `nodevice://kona5`          | simulated board              |

use crate::device::DeviceId;
use crate::error::{Ntv2Error, Ntv2Result};
use crate::nub::{NubConfig, NUB_PORT};
use std::fmt;
use std::time::Duration;

pub const KEY_SCHEME: &str = "Scheme";
pub const KEY_HOST: &str = "Host";
pub const KEY_PORT: &str = "Port";
pub const KEY_DEVICE_INDEX: &str = "DeviceIndex";
pub const KEY_DEVICE_SERIAL: &str = "DeviceSerial";
pub const KEY_DEVICE_MODEL: &str = "DeviceModel";
pub const KEY_DEVICE_ID: &str = "DeviceID";
pub const KEY_RESOURCE_PATH: &str = "ResourcePath";
pub const KEY_QUERY: &str = "Query";

/// Keys filled from the spec itself. A query may not set them.
const RESERVED_KEYS: [&str; 9] = [
    KEY_SCHEME,
    KEY_HOST,
    KEY_PORT,
    KEY_DEVICE_INDEX,
    KEY_DEVICE_SERIAL,
    KEY_DEVICE_MODEL,
    KEY_DEVICE_ID,
    KEY_RESOURCE_PATH,
    KEY_QUERY,
];

/// Largest index accepted as a bare local board number.
const MAX_LOCAL_INDEX_DIGITS: usize = 2;

/// Ordered string map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    entries: Vec<(String, String)>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.value_of(key).is_some()
    }

    /// Value parsed as a `u16`. `None` if absent or not a number.
    pub fn u16_value_of(&self, key: &str) -> Option<u16> {
        self.value_of(key)?.parse().ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in self.iter() {
            writeln!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

/// What a device spec selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpecKind {
    LocalIndex(u32),
    LocalSerial(String),
    LocalModel(DeviceId),
    /// Raw board ID; need not be a known model.
    LocalId(u32),
    /// Remote board; details are in the dictionary.
    Remote,
    /// In-memory simulation of a model.
    Simulated(DeviceId),
}

/// A parsed device spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    spec: String,
    kind: DeviceSpecKind,
    dict: Dictionary,
}

impl DeviceSpec {
    pub fn parse(spec: &str) -> Ntv2Result<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(Ntv2Error::DeviceSpec("empty device spec".into()));
        }

        let mut dict = Dictionary::new();
        let kind = match trimmed.split_once("://") {
            Some((scheme, rest)) => parse_url(&scheme.to_ascii_lowercase(), rest, &mut dict)?,
            None => parse_local(trimmed, &mut dict).ok_or_else(|| {
                Ntv2Error::DeviceSpec(format!("unrecognized device spec '{}'", trimmed))
            })?,
        };
        log::debug!("device spec '{}' parsed as {:?}", trimmed, kind);
        Ok(Self {
            spec: trimmed.to_string(),
            kind,
            dict,
        })
    }

    pub fn kind(&self) -> &DeviceSpecKind {
        &self.kind
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub fn as_str(&self) -> &str {
        &self.spec
    }

    pub fn is_local(&self) -> bool {
        !matches!(self.kind, DeviceSpecKind::Remote | DeviceSpecKind::Simulated(_))
    }

    pub fn is_nub(&self) -> bool {
        matches!(self.kind, DeviceSpecKind::Remote)
            && matches!(self.dict.value_of(KEY_SCHEME), Some("nub" | "ntv2nub" | "ntv2"))
    }

    /// Board index on the remote host: the resource path if numeric, else 0.
    pub fn remote_board_index(&self) -> u32 {
        self.dict
            .value_of(KEY_RESOURCE_PATH)
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    }

    /// Nub connection settings. Honors `timeout` (milliseconds) and
    /// `protocol` query keys.
    pub fn nub_config(&self) -> Ntv2Result<NubConfig> {
        if !self.is_nub() {
            return Err(Ntv2Error::DeviceSpec(format!(
                "'{}' does not name a nub device",
                self.spec
            )));
        }
        let host = self
            .dict
            .value_of(KEY_HOST)
            .ok_or_else(|| Ntv2Error::DeviceSpec("nub spec without host".into()))?;
        let mut config = NubConfig::new(host);
        config.port = self.dict.u16_value_of(KEY_PORT).unwrap_or(NUB_PORT);
        if let Some(ms) = self.dict.value_of("timeout") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| Ntv2Error::DeviceSpec(format!("bad timeout '{}'", ms)))?;
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(v) = self.dict.value_of("protocol") {
            config.protocol_version = v
                .parse()
                .map_err(|_| Ntv2Error::DeviceSpec(format!("bad protocol version '{}'", v)))?;
        }
        Ok(config)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

impl std::str::FromStr for DeviceSpec {
    type Err = Ntv2Error;

    fn from_str(s: &str) -> Ntv2Result<Self> {
        Self::parse(s)
    }
}

/// Index, hex ID, model name or serial number.
fn parse_local(s: &str, dict: &mut Dictionary) -> Option<DeviceSpecKind> {
    if s.len() <= MAX_LOCAL_INDEX_DIGITS && s.bytes().all(|b| b.is_ascii_digit()) {
        let index = s.parse().ok()?;
        dict.insert(KEY_DEVICE_INDEX, s);
        return Some(DeviceSpecKind::LocalIndex(index));
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let id = u32::from_str_radix(hex, 16).ok()?;
        dict.insert(KEY_DEVICE_ID, format!("{:#010x}", id));
        return Some(DeviceSpecKind::LocalId(id));
    }
    if let Some(model) = DeviceId::from_name(s) {
        dict.insert(KEY_DEVICE_MODEL, model.name());
        return Some(DeviceSpecKind::LocalModel(model));
    }
    if (8..=9).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_alphanumeric()) {
        dict.insert(KEY_DEVICE_SERIAL, s);
        return Some(DeviceSpecKind::LocalSerial(s.to_string()));
    }
    None
}

fn parse_url(scheme: &str, rest: &str, dict: &mut Dictionary) -> Ntv2Result<DeviceSpecKind> {
    dict.insert(KEY_SCHEME, scheme);

    let (before_query, query) = match rest.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (rest, None),
    };
    let (authority, path) = match before_query.split_once('/') {
        Some((a, p)) => (a, p),
        None => (before_query, ""),
    };

    if !authority.is_empty() {
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(Ntv2Error::DeviceSpec(format!("no host in '{}'", authority)));
        }
        dict.insert(KEY_HOST, host);
        if let Some(port) = port {
            let port: u16 = port
                .parse()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| Ntv2Error::DeviceSpec(format!("bad port '{}'", port)))?;
            dict.insert(KEY_PORT, port.to_string());
        }
    }

    let path = path.trim_end_matches('/');
    if !path.is_empty() {
        dict.insert(KEY_RESOURCE_PATH, path);
    }

    if let Some(query) = query {
        dict.insert(KEY_QUERY, query);
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if RESERVED_KEYS.iter().any(|r| r.eq_ignore_ascii_case(k)) {
                return Err(Ntv2Error::DeviceSpec(format!("query key '{}' is reserved", k)));
            }
            dict.insert(k, v);
        }
    }

    let is_loopback = dict
        .value_of(KEY_HOST)
        .is_some_and(|h| h.eq_ignore_ascii_case("localhost"));

    match scheme {
        "ntv2local" => {
            let resource = dict
                .value_of(KEY_RESOURCE_PATH)
                .map(str::to_string)
                .ok_or_else(|| Ntv2Error::DeviceSpec("ntv2local spec without resource".into()))?;
            parse_local(&resource, dict).ok_or_else(|| {
                Ntv2Error::DeviceSpec(format!("unrecognized local resource '{}'", resource))
            })
        }
        _ if !dict.has_key(KEY_HOST) => Err(Ntv2Error::DeviceSpec(format!(
            "'{}' spec without host",
            scheme
        ))),
        "ntv2" if is_loopback && dict.has_key(KEY_RESOURCE_PATH) => {
            let resource = dict.value_of(KEY_RESOURCE_PATH).unwrap_or_default().to_string();
            parse_local(&resource, dict).ok_or_else(|| {
                Ntv2Error::DeviceSpec(format!("unrecognized local resource '{}'", resource))
            })
        }
        "nodevice" => {
            let host = dict.value_of(KEY_HOST).unwrap_or_default().to_string();
            let model = DeviceId::from_name(&host)
                .ok_or_else(|| Ntv2Error::DeviceSpec(format!("unknown model '{}'", host)))?;
            dict.insert(KEY_DEVICE_MODEL, model.name());
            Ok(DeviceSpecKind::Simulated(model))
        }
        "nub" | "ntv2nub" | "ntv2" => {
            if !dict.has_key(KEY_PORT) {
                dict.insert(KEY_PORT, NUB_PORT.to_string());
            }
            Ok(DeviceSpecKind::Remote)
        }
        other => Err(Ntv2Error::DeviceSpec(format!("unsupported scheme '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dictionary() {
        let mut d = Dictionary::new();
        d.insert("Port", "7474");
        d.insert("Host", "lab1");
        d.insert("Port", "9000");
        assert_eq!(d.len(), 2);
        assert_eq!(d.u16_value_of("Port"), Some(9000));
        assert_eq!(d.u16_value_of("Host"), None);
        assert!(!d.has_key("Scheme"));
        assert_eq!(d.to_string(), "Port=9000\nHost=lab1\n");
    }

    #[test]
    fn test_local_forms() {
        assert_eq!(DeviceSpec::parse("0").unwrap().kind(), &DeviceSpecKind::LocalIndex(0));
        assert_eq!(
            DeviceSpec::parse("kona5").unwrap().kind(),
            &DeviceSpecKind::LocalModel(DeviceId::Kona5)
        );
        assert_eq!(
            DeviceSpec::parse("0x10798400").unwrap().kind(),
            &DeviceSpecKind::LocalId(0x1079_8400)
        );
        let serial = DeviceSpec::parse("00T64450").unwrap();
        assert_eq!(serial.kind(), &DeviceSpecKind::LocalSerial("00T64450".into()));
        assert_eq!(serial.dictionary().value_of(KEY_DEVICE_SERIAL), Some("00T64450"));
        assert!(serial.is_local());
        assert!(!serial.is_nub());
    }

    #[test]
    fn test_nub_url() {
        let spec = DeviceSpec::parse("nub://lab-host:9000/1?timeout=250&verbose").unwrap();
        assert_eq!(spec.kind(), &DeviceSpecKind::Remote);
        assert!(spec.is_nub());
        let d = spec.dictionary();
        assert_eq!(d.value_of(KEY_HOST), Some("lab-host"));
        assert_eq!(d.value_of(KEY_QUERY), Some("timeout=250&verbose"));
        assert_eq!(d.value_of("verbose"), Some(""));
        assert_eq!(spec.remote_board_index(), 1);

        let config = spec.nub_config().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_query_cannot_override_authority() {
        for spec in [
            "nub://h/0?Port=abc",
            "nub://h:9000/0?port=1",
            "ntv2nub://h/0?Host=other",
            "nub://h/0?timeout=5&Scheme=nodevice",
        ] {
            assert!(
                matches!(DeviceSpec::parse(spec), Err(Ntv2Error::DeviceSpec(_))),
                "{}",
                spec
            );
        }
        let spec = DeviceSpec::parse("nub://h:9000/0?timeout=5").unwrap();
        assert_eq!(spec.dictionary().u16_value_of(KEY_PORT), Some(9000));
    }

    #[test]
    fn test_nub_default_port() {
        let spec = DeviceSpec::parse("NTV2NUB://10.0.0.5").unwrap();
        assert_eq!(spec.dictionary().u16_value_of(KEY_PORT), Some(NUB_PORT));
        assert_eq!(spec.remote_board_index(), 0);
        assert_eq!(spec.nub_config().unwrap().host, "10.0.0.5");
    }

    #[test]
    fn test_url_local_forms() {
        let spec = DeviceSpec::parse("ntv2local:///2").unwrap();
        assert_eq!(spec.kind(), &DeviceSpecKind::LocalIndex(2));
        let spec = DeviceSpec::parse("ntv2://localhost/corvid88").unwrap();
        assert_eq!(spec.kind(), &DeviceSpecKind::LocalModel(DeviceId::Corvid88));
        assert!(spec.nub_config().is_err());
    }

    #[test]
    fn test_simulated() {
        let spec = DeviceSpec::parse("nodevice://Kona1").unwrap();
        assert_eq!(spec.kind(), &DeviceSpecKind::Simulated(DeviceId::Kona1));
        assert!(!spec.is_local());
        assert!(!spec.is_nub());
        assert!(DeviceSpec::parse("nodevice://kona99").is_err());
    }

    #[test]
    fn test_errors() {
        assert!(DeviceSpec::parse("   ").is_err());
        assert!(DeviceSpec::parse("nub://host:notaport").is_err());
        assert!(DeviceSpec::parse("nub://host:0").is_err());
        assert!(DeviceSpec::parse("nub:///1").is_err());
        assert!(DeviceSpec::parse("ntv2local://").is_err());
        assert!(DeviceSpec::parse("ftp://host/x").is_err());
        assert!(DeviceSpec::parse("not a device").is_err());
    }
}
