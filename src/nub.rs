// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Remote "nub" register access over TCP.
//!
//! Every packet is a 64-byte header followed by a payload. All integers
//! are big-endian.
//!
//! ```text
//! +------------------+----------+-------------+---------------+---------+
//! | protocol_version | pkt_type | data_length | reserved[13]  | payload |
//! |       u32        |   u32    |     u32     |    13 x u32   |  bytes  |
//! +------------------+----------+-------------+---------------+---------+
//! ```
//!
//! Queries have even packet types; the matching response is `query + 1`.
//!
//! [`NubClient`] implements [`RegisterIo`], so a remote board can be driven
//! exactly like a local one. [`NubServer`] exposes any `RegisterIo` backend
//! (typically a [`NoDevice`](crate::nodevice::NoDevice)) to nub clients.

use crate::error::{Ntv2Error, Ntv2Result};
use crate::register::{check_shift, RegInfo, RegisterIo};
use crate::regs;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

pub const DISCOVERY_PORT: u16 = 7777;
pub const NUB_PORT: u16 = 7474;

pub const PROTOCOL_VERSION_1: u32 = 1;
pub const PROTOCOL_VERSION_2: u32 = 2;
/// Adds build information queries.
pub const PROTOCOL_VERSION_3: u32 = 3;
pub const MAX_PROTOCOL_VERSION: u32 = PROTOCOL_VERSION_3;

pub const HEADER_SIZE: usize = 64;
pub const MAX_PAYLOAD: usize = 8192;
pub const MAX_BOARDS: usize = 16;
/// Registers per multi-read packet.
pub const MULTI_READ_MAX: usize = 200;
pub const DESCRIPTION_LEN: usize = 32;
pub const BUILD_STRING_LEN: usize = 256;

/// Handle reported when an open fails.
pub const INVALID_HANDLE: i32 = -1;

// ============================================================================
// Error codes
// ============================================================================

/// Remote access status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum NubErrorCode {
    Success = 0,
    NotConnected = -1,
    OutOfMemory = -2,
    SendErr = -3,
    ConnectionClosed = -4,
    RecvErr = -5,
    TimedOut = -6,
    NoCard = -7,
    NotOpenResp = -8,
    NonNubPacket = -9,
    NotReadRegisterResp = -10,
    NotWriteRegisterResp = -11,
    NotAutoCircResp = -12,
    NotWaitForInterruptResp = -13,
    WaitForInterruptFailed = -14,
    AutoCircFailed = -15,
    DriverGetBitfileInfoFailed = -16,
    NotDriverGetBitfileInfo = -17,
    NotDownloadTestPattern = -18,
    DownloadTestPatternFailed = -19,
    ReadRegMultiFailed = -20,
    NotReadRegMulti = -21,
    GetDriverVersionFailed = -22,
    NotGetDriverVersionResp = -23,
    ReadRegFailed = -24,
    DriverGetBuildInfoFailed = -25,
    NotDriverGetBuildInfo = -26,
    Unimplemented = -27,
}

impl NubErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        use NubErrorCode::*;
        const ALL: [NubErrorCode; 28] = [
            Success,
            NotConnected,
            OutOfMemory,
            SendErr,
            ConnectionClosed,
            RecvErr,
            TimedOut,
            NoCard,
            NotOpenResp,
            NonNubPacket,
            NotReadRegisterResp,
            NotWriteRegisterResp,
            NotAutoCircResp,
            NotWaitForInterruptResp,
            WaitForInterruptFailed,
            AutoCircFailed,
            DriverGetBitfileInfoFailed,
            NotDriverGetBitfileInfo,
            NotDownloadTestPattern,
            DownloadTestPatternFailed,
            ReadRegMultiFailed,
            NotReadRegMulti,
            GetDriverVersionFailed,
            NotGetDriverVersionResp,
            ReadRegFailed,
            DriverGetBuildInfoFailed,
            NotDriverGetBuildInfo,
            Unimplemented,
        ];
        ALL.into_iter().find(|c| c.code() == code)
    }

    pub fn message(self) -> &'static str {
        use NubErrorCode::*;
        match self {
            Success => "success",
            NotConnected => "not connected",
            OutOfMemory => "out of memory",
            SendErr => "send error",
            ConnectionClosed => "connection closed",
            RecvErr => "receive error",
            TimedOut => "timed out",
            NoCard => "no card",
            NotOpenResp => "response packet is not an open response",
            NonNubPacket => "not a nub packet",
            NotReadRegisterResp => "response packet is not a register read response",
            NotWriteRegisterResp => "response packet is not a register write response",
            NotAutoCircResp => "response packet is not an autocirculate response",
            NotWaitForInterruptResp => "response packet is not a wait-for-interrupt response",
            WaitForInterruptFailed => "wait for interrupt failed",
            AutoCircFailed => "autocirculate command failed",
            DriverGetBitfileInfoFailed => "get bitfile info failed",
            NotDriverGetBitfileInfo => "response packet is not a get bitfile info response",
            NotDownloadTestPattern => "response packet is not a download test pattern response",
            DownloadTestPatternFailed => "download test pattern failed",
            ReadRegMultiFailed => "multi-register read failed",
            NotReadRegMulti => "response packet is not a multi-register read response",
            GetDriverVersionFailed => "get driver version failed",
            NotGetDriverVersionResp => "response packet is not a driver version response",
            ReadRegFailed => "register read failed",
            DriverGetBuildInfoFailed => "get build info failed",
            NotDriverGetBuildInfo => "response packet is not a build info response",
            Unimplemented => "unimplemented",
        }
    }
}

impl fmt::Display for NubErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

// ============================================================================
// Packet types and header
// ============================================================================

/// Nub packet type. Queries are even, responses odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    DiscoverQuery = 0,
    DiscoverResponse = 1,
    OpenQuery = 2,
    OpenResponse = 3,
    ReadRegisterQuery = 4,
    ReadRegisterResponse = 5,
    WriteRegisterQuery = 6,
    WriteRegisterResponse = 7,
    GetAutoCirculateQuery = 8,
    GetAutoCirculateResponse = 9,
    WaitForInterruptQuery = 10,
    WaitForInterruptResponse = 11,
    GetBitfileInfoQuery = 12,
    GetBitfileInfoResponse = 13,
    DownloadTestPatternQuery = 14,
    DownloadTestPatternResponse = 15,
    ReadRegisterMultiQuery = 16,
    ReadRegisterMultiResponse = 17,
    GetDriverVersionQuery = 18,
    GetDriverVersionResponse = 19,
    ControlAutoCirculateQuery = 20,
    ControlAutoCirculateResponse = 21,
    GetBuildInfoQuery = 22,
    GetBuildInfoResponse = 23,
    DmaTransferQuery = 24,
    DmaTransferResponse = 25,
    MessageQuery = 26,
    MessageResponse = 27,
}

impl PacketType {
    pub fn from_u32(value: u32) -> Option<Self> {
        use PacketType::*;
        const ALL: [PacketType; 28] = [
            DiscoverQuery,
            DiscoverResponse,
            OpenQuery,
            OpenResponse,
            ReadRegisterQuery,
            ReadRegisterResponse,
            WriteRegisterQuery,
            WriteRegisterResponse,
            GetAutoCirculateQuery,
            GetAutoCirculateResponse,
            WaitForInterruptQuery,
            WaitForInterruptResponse,
            GetBitfileInfoQuery,
            GetBitfileInfoResponse,
            DownloadTestPatternQuery,
            DownloadTestPatternResponse,
            ReadRegisterMultiQuery,
            ReadRegisterMultiResponse,
            GetDriverVersionQuery,
            GetDriverVersionResponse,
            ControlAutoCirculateQuery,
            ControlAutoCirculateResponse,
            GetBuildInfoQuery,
            GetBuildInfoResponse,
            DmaTransferQuery,
            DmaTransferResponse,
            MessageQuery,
            MessageResponse,
        ];
        ALL.get(value as usize).copied()
    }

    pub fn is_query(self) -> bool {
        (self as u32) % 2 == 0
    }

    /// Response type for a query. `None` for responses.
    pub fn response_for(self) -> Option<Self> {
        if self.is_query() {
            Self::from_u32(self as u32 + 1)
        } else {
            None
        }
    }

    /// Error reported when a reply to this query has the wrong type.
    fn wrong_response_code(self) -> NubErrorCode {
        match self {
            PacketType::OpenQuery => NubErrorCode::NotOpenResp,
            PacketType::ReadRegisterQuery => NubErrorCode::NotReadRegisterResp,
            PacketType::WriteRegisterQuery => NubErrorCode::NotWriteRegisterResp,
            PacketType::ReadRegisterMultiQuery => NubErrorCode::NotReadRegMulti,
            PacketType::GetDriverVersionQuery => NubErrorCode::NotGetDriverVersionResp,
            PacketType::GetBuildInfoQuery => NubErrorCode::NotDriverGetBuildInfo,
            _ => NubErrorCode::NonNubPacket,
        }
    }
}

/// Fixed 64-byte packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub protocol_version: u32,
    pub pkt_type: u32,
    pub data_length: u32,
}

impl PacketHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.protocol_version.to_be_bytes());
        out[4..8].copy_from_slice(&self.pkt_type.to_be_bytes());
        out[8..12].copy_from_slice(&self.data_length.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        let word = |i: usize| u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Self {
            protocol_version: word(0),
            pkt_type: word(4),
            data_length: word(8),
        }
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u32(self.pkt_type)
    }
}

/// Write one packet.
pub fn write_packet<W: Write>(
    w: &mut W,
    protocol_version: u32,
    pkt_type: PacketType,
    payload: &[u8],
) -> Ntv2Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Ntv2Error::NubProtocol(format!(
            "payload of {} bytes exceeds {}",
            payload.len(),
            MAX_PAYLOAD
        )));
    }
    let header = PacketHeader {
        protocol_version,
        pkt_type: pkt_type as u32,
        data_length: payload.len() as u32,
    };
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    w.write_all(&buf).map_err(|e| io_to_nub(e, NubErrorCode::SendErr))?;
    w.flush().map_err(|e| io_to_nub(e, NubErrorCode::SendErr))
}

/// Read one packet.
pub fn read_packet<R: Read>(r: &mut R) -> Ntv2Result<(PacketHeader, Vec<u8>)> {
    let mut hdr = [0u8; HEADER_SIZE];
    r.read_exact(&mut hdr)
        .map_err(|e| io_to_nub(e, NubErrorCode::RecvErr))?;
    let header = PacketHeader::decode(&hdr);
    if header.packet_type().is_none() {
        return Err(Ntv2Error::Nub(NubErrorCode::NonNubPacket));
    }
    let len = header.data_length as usize;
    if len > MAX_PAYLOAD {
        return Err(Ntv2Error::NubProtocol(format!(
            "payload length {} exceeds {}",
            len, MAX_PAYLOAD
        )));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .map_err(|e| io_to_nub(e, NubErrorCode::RecvErr))?;
    Ok((header, payload))
}

fn io_to_nub(e: io::Error, fallback: NubErrorCode) -> Ntv2Error {
    let code = match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => NubErrorCode::ConnectionClosed,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => NubErrorCode::TimedOut,
        io::ErrorKind::NotConnected => NubErrorCode::NotConnected,
        _ => fallback,
    };
    log::debug!("nub I/O error: {}", e);
    Ntv2Error::Nub(code)
}

// ============================================================================
// Payloads
// ============================================================================

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Ntv2Result<&'a [u8]> {
        let end = self.pos + n;
        let s = self.buf.get(self.pos..end).ok_or_else(|| {
            Ntv2Error::NubProtocol(format!(
                "payload too short: need {} bytes, have {}",
                end,
                self.buf.len()
            ))
        })?;
        self.pos = end;
        Ok(s)
    }

    fn u32(&mut self) -> Ntv2Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Ntv2Result<i32> {
        Ok(self.u32()? as i32)
    }

    fn string(&mut self, n: usize) -> Ntv2Result<String> {
        let b = self.bytes(n)?;
        let end = b.iter().position(|c| *c == 0).unwrap_or(b.len());
        Ok(String::from_utf8_lossy(&b[..end]).into_owned())
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// NUL-padded fixed-width string. The last byte is always NUL.
fn put_string(out: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width - 1);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + width - n, 0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoverQuery {
    pub board_mask: u32,
}

impl DiscoverQuery {
    pub fn encode(&self) -> Vec<u8> {
        self.board_mask.to_be_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Ntv2Result<Self> {
        Ok(Self {
            board_mask: Decoder::new(buf).u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoverBoardInfo {
    pub board_number: u32,
    pub board_type: u32,
    pub board_id: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoverResponse {
    pub boards: Vec<DiscoverBoardInfo>,
}

impl DiscoverResponse {
    const ENTRY_SIZE: usize = 12 + DESCRIPTION_LEN;

    /// Always the full table of [`MAX_BOARDS`] entries.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + MAX_BOARDS * Self::ENTRY_SIZE);
        let n = self.boards.len().min(MAX_BOARDS);
        put_u32(&mut out, n as u32);
        for b in &self.boards[..n] {
            put_u32(&mut out, b.board_number);
            put_u32(&mut out, b.board_type);
            put_u32(&mut out, b.board_id);
            put_string(&mut out, &b.description, DESCRIPTION_LEN);
        }
        out.resize(4 + MAX_BOARDS * Self::ENTRY_SIZE, 0);
        out
    }

    pub fn decode(buf: &[u8]) -> Ntv2Result<Self> {
        let mut d = Decoder::new(buf);
        let n = d.u32()? as usize;
        if n > MAX_BOARDS {
            return Err(Ntv2Error::NubProtocol(format!("{} boards exceeds {}", n, MAX_BOARDS)));
        }
        let mut boards = Vec::with_capacity(n);
        for _ in 0..n {
            boards.push(DiscoverBoardInfo {
                board_number: d.u32()?,
                board_type: d.u32()?,
                board_id: d.u32()?,
                description: d.string(DESCRIPTION_LEN)?,
            });
        }
        Ok(Self { boards })
    }
}

/// Open query and response share one layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenInfo {
    pub board_number: u32,
    pub board_type: u32,
    pub handle: i32,
}

impl OpenInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        put_u32(&mut out, self.board_number);
        put_u32(&mut out, self.board_type);
        put_u32(&mut out, self.handle as u32);
        out
    }

    pub fn decode(buf: &[u8]) -> Ntv2Result<Self> {
        let mut d = Decoder::new(buf);
        Ok(Self {
            board_number: d.u32()?,
            board_type: d.u32()?,
            handle: d.i32()?,
        })
    }
}

/// Single register read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterPayload {
    pub handle: i32,
    pub number: u32,
    pub value: u32,
    pub mask: u32,
    pub shift: u32,
    /// Nonzero on success.
    pub result: u32,
}

impl RegisterPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        for v in [
            self.handle as u32,
            self.number,
            self.value,
            self.mask,
            self.shift,
            self.result,
        ] {
            put_u32(&mut out, v);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Ntv2Result<Self> {
        let mut d = Decoder::new(buf);
        Ok(Self {
            handle: d.i32()?,
            number: d.u32()?,
            value: d.u32()?,
            mask: d.u32()?,
            shift: d.u32()?,
            result: d.u32()?,
        })
    }
}

/// Multi-register read, used for both query and response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiReadPayload {
    pub handle: i32,
    /// Nonzero on success.
    pub result: u32,
    /// Index of the first failed register when `result` is zero.
    pub which_failed: u32,
    pub regs: Vec<RegInfo>,
}

impl MultiReadPayload {
    pub fn encode(&self) -> Ntv2Result<Vec<u8>> {
        if self.regs.len() > MULTI_READ_MAX {
            return Err(Ntv2Error::NubProtocol(format!(
                "{} registers exceeds multi-read limit {}",
                self.regs.len(),
                MULTI_READ_MAX
            )));
        }
        let mut out = Vec::with_capacity(16 + 16 * self.regs.len());
        put_u32(&mut out, self.handle as u32);
        put_u32(&mut out, self.regs.len() as u32);
        put_u32(&mut out, self.result);
        put_u32(&mut out, self.which_failed);
        for r in &self.regs {
            put_u32(&mut out, r.number);
            put_u32(&mut out, r.value);
            put_u32(&mut out, r.mask);
            put_u32(&mut out, r.shift);
        }
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Ntv2Result<Self> {
        let mut d = Decoder::new(buf);
        let handle = d.i32()?;
        let count = d.u32()? as usize;
        let result = d.u32()?;
        let which_failed = d.u32()?;
        if count > MULTI_READ_MAX {
            return Err(Ntv2Error::NubProtocol(format!(
                "{} registers exceeds multi-read limit {}",
                count, MULTI_READ_MAX
            )));
        }
        let mut regs = Vec::with_capacity(count);
        for _ in 0..count {
            let number = d.u32()?;
            let value = d.u32()?;
            let mask = d.u32()?;
            let shift = d.u32()?;
            regs.push(RegInfo::masked(number, value, mask, shift));
        }
        Ok(Self {
            handle,
            result,
            which_failed,
            regs,
        })
    }
}

/// Driver version query/response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverVersionPayload {
    pub handle: i32,
    pub result: u32,
    pub version: u32,
}

impl DriverVersionPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        put_u32(&mut out, self.handle as u32);
        put_u32(&mut out, self.result);
        put_u32(&mut out, self.version);
        out
    }

    pub fn decode(buf: &[u8]) -> Ntv2Result<Self> {
        let mut d = Decoder::new(buf);
        Ok(Self {
            handle: d.i32()?,
            result: d.u32()?,
            version: d.u32()?,
        })
    }
}

/// Build information query/response (protocol version 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfoPayload {
    pub handle: i32,
    pub result: u32,
    pub struct_version: u32,
    pub build: String,
}

impl BuildInfoPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + BUILD_STRING_LEN);
        put_u32(&mut out, self.handle as u32);
        put_u32(&mut out, self.result);
        put_u32(&mut out, self.struct_version);
        put_u32(&mut out, (8 + BUILD_STRING_LEN) as u32);
        put_string(&mut out, &self.build, BUILD_STRING_LEN);
        out
    }

    pub fn decode(buf: &[u8]) -> Ntv2Result<Self> {
        let mut d = Decoder::new(buf);
        let handle = d.i32()?;
        let result = d.u32()?;
        let struct_version = d.u32()?;
        let _struct_size = d.u32()?;
        Ok(Self {
            handle,
            result,
            struct_version,
            build: d.string(BUILD_STRING_LEN)?,
        })
    }
}

/// Packs a driver version as `major.minor.point.build`, one byte each.
pub fn format_driver_version(version: u32) -> String {
    let b = version.to_be_bytes();
    format!("{}.{}.{}.{}", b[0], b[1], b[2], b[3])
}

// ============================================================================
// Client
// ============================================================================

/// Connection settings for [`NubClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NubConfig {
    pub host: String,
    pub port: u16,
    /// Connect, read and write timeout.
    pub timeout: Duration,
    /// Highest protocol version to offer.
    pub protocol_version: u32,
}

impl Default for NubConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: NUB_PORT,
            timeout: Duration::from_secs(5),
            protocol_version: MAX_PROTOCOL_VERSION,
        }
    }
}

impl NubConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }
}

struct ClientState {
    stream: TcpStream,
    handle: i32,
    protocol_version: u32,
}

impl ClientState {
    fn drop_connection(&mut self) {
        if self.handle != INVALID_HANDLE {
            log::warn!("nub: dropping connection (handle {})", self.handle);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        self.handle = INVALID_HANDLE;
    }
}

/// Register access to a board served by a remote nub.
pub struct NubClient {
    state: Mutex<ClientState>,
    peer: SocketAddr,
}

impl NubClient {
    /// Connect to a nub. No board is open yet.
    pub fn connect(config: &NubConfig) -> Ntv2Result<Self> {
        let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| {
                log::warn!("cannot resolve nub host {}: {}", config.host, e);
                Ntv2Error::Nub(NubErrorCode::NotConnected)
            })?
            .collect();

        let mut last_err = Ntv2Error::Nub(NubErrorCode::NotConnected);
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(config.timeout))?;
                    stream.set_write_timeout(Some(config.timeout))?;
                    stream.set_nodelay(true)?;
                    log::info!("connected to nub at {}", addr);
                    return Ok(Self {
                        state: Mutex::new(ClientState {
                            stream,
                            handle: INVALID_HANDLE,
                            protocol_version: config.protocol_version.min(MAX_PROTOCOL_VERSION),
                        }),
                        peer: addr,
                    });
                }
                Err(e) => {
                    log::debug!("nub connect to {} failed: {}", addr, e);
                    last_err = io_to_nub(e, NubErrorCode::NotConnected);
                }
            }
        }
        Err(last_err)
    }

    /// Connect and open a board in one step.
    pub fn connect_and_open(config: &NubConfig, board_index: u32) -> Ntv2Result<Self> {
        let client = Self::connect(config)?;
        client.open(board_index)?;
        Ok(client)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a query and wait for its response.
    ///
    /// Any failure leaves the stream out of step with the server, so the
    /// connection is dropped and later calls fail with `DeviceNotOpen`.
    fn transact(
        state: &mut ClientState,
        query: PacketType,
        payload: &[u8],
    ) -> Ntv2Result<(PacketHeader, Vec<u8>)> {
        let result = write_packet(&mut state.stream, state.protocol_version, query, payload)
            .and_then(|()| read_packet(&mut state.stream));
        let (header, body) = match result {
            Ok(packet) => packet,
            Err(e) => {
                state.drop_connection();
                return Err(e);
            }
        };
        if header.packet_type() != query.response_for() {
            log::warn!(
                "nub: expected response to {:?}, got packet type {}",
                query,
                header.pkt_type
            );
            state.drop_connection();
            return Err(Ntv2Error::Nub(query.wrong_response_code()));
        }
        Ok((header, body))
    }

    /// Register exchange; the reply must name the queried register.
    fn transact_register(
        state: &mut ClientState,
        query_type: PacketType,
        query: &RegisterPayload,
    ) -> Ntv2Result<RegisterPayload> {
        let (_, body) = Self::transact(state, query_type, &query.encode())?;
        let resp = RegisterPayload::decode(&body)?;
        if resp.number != query.number {
            log::warn!(
                "nub: reply names register {}, asked for {}",
                resp.number,
                query.number
            );
            state.drop_connection();
            return Err(Ntv2Error::NubProtocol(format!(
                "reply for register {} answered register {}",
                query.number, resp.number
            )));
        }
        Ok(resp)
    }

    fn opened(&self) -> Ntv2Result<std::sync::MutexGuard<'_, ClientState>> {
        let state = self.lock();
        if state.handle == INVALID_HANDLE {
            return Err(Ntv2Error::DeviceNotOpen);
        }
        Ok(state)
    }

    /// Open board `board_index` on the remote host. Returns the session handle.
    pub fn open(&self, board_index: u32) -> Ntv2Result<i32> {
        let mut state = self.lock();
        let query = OpenInfo {
            board_number: board_index,
            board_type: 0,
            handle: INVALID_HANDLE,
        };
        let (header, body) = Self::transact(&mut state, PacketType::OpenQuery, &query.encode())?;
        let resp = OpenInfo::decode(&body)?;
        if resp.handle == INVALID_HANDLE {
            return Err(Ntv2Error::Nub(NubErrorCode::NoCard));
        }
        state.handle = resp.handle;
        state.protocol_version = state.protocol_version.min(header.protocol_version);
        log::info!(
            "opened remote board {} on {} (handle {}, protocol v{})",
            board_index,
            self.peer,
            resp.handle,
            state.protocol_version
        );
        Ok(resp.handle)
    }

    pub fn handle(&self) -> i32 {
        self.lock().handle
    }

    /// Negotiated protocol version.
    pub fn protocol_version(&self) -> u32 {
        self.lock().protocol_version
    }

    /// List the boards the remote host serves.
    pub fn discover(&self) -> Ntv2Result<Vec<DiscoverBoardInfo>> {
        let mut state = self.lock();
        let query = DiscoverQuery { board_mask: 0xFFFF_FFFF };
        let (_, body) = Self::transact(&mut state, PacketType::DiscoverQuery, &query.encode())?;
        Ok(DiscoverResponse::decode(&body)?.boards)
    }

    /// Masked register read performed on the remote side.
    pub fn remote_read(&self, reg: u32, mask: u32, shift: u32) -> Ntv2Result<u32> {
        let mut state = self.opened()?;
        let query = RegisterPayload {
            handle: state.handle,
            number: reg,
            value: 0,
            mask,
            shift,
            result: 0,
        };
        let resp = Self::transact_register(&mut state, PacketType::ReadRegisterQuery, &query)?;
        if resp.result == 0 {
            return Err(Ntv2Error::Nub(NubErrorCode::ReadRegFailed));
        }
        Ok(resp.value)
    }

    /// Masked register write performed on the remote side.
    pub fn remote_write(&self, reg: u32, value: u32, mask: u32, shift: u32) -> Ntv2Result<()> {
        let mut state = self.opened()?;
        let query = RegisterPayload {
            handle: state.handle,
            number: reg,
            value,
            mask,
            shift,
            result: 0,
        };
        let resp = Self::transact_register(&mut state, PacketType::WriteRegisterQuery, &query)?;
        if resp.result == 0 {
            return Err(Ntv2Error::NubProtocol(format!(
                "remote write of register {} failed",
                reg
            )));
        }
        Ok(())
    }

    /// Read many registers, [`MULTI_READ_MAX`] per round trip.
    pub fn remote_read_multi(&self, regs: &mut [RegInfo]) -> Ntv2Result<()> {
        let mut state = self.opened()?;
        for (chunk_index, chunk) in regs.chunks_mut(MULTI_READ_MAX).enumerate() {
            let query = MultiReadPayload {
                handle: state.handle,
                result: 0,
                which_failed: 0,
                regs: chunk.to_vec(),
            };
            let (_, body) = Self::transact(
                &mut state,
                PacketType::ReadRegisterMultiQuery,
                &query.encode()?,
            )?;
            let resp = MultiReadPayload::decode(&body)?;
            if resp.result == 0 {
                log::warn!(
                    "remote multi-read failed at register index {}",
                    chunk_index * MULTI_READ_MAX + resp.which_failed as usize
                );
                return Err(Ntv2Error::Nub(NubErrorCode::ReadRegMultiFailed));
            }
            if resp.regs.len() != chunk.len() {
                return Err(Ntv2Error::NubProtocol(format!(
                    "multi-read returned {} registers, asked for {}",
                    resp.regs.len(),
                    chunk.len()
                )));
            }
            for (dst, src) in chunk.iter_mut().zip(resp.regs) {
                dst.value = src.value;
            }
        }
        Ok(())
    }

    /// Remote driver version, packed one byte per component.
    pub fn driver_version(&self) -> Ntv2Result<u32> {
        let mut state = self.opened()?;
        let query = DriverVersionPayload {
            handle: state.handle,
            result: 0,
            version: 0,
        };
        let (_, body) =
            Self::transact(&mut state, PacketType::GetDriverVersionQuery, &query.encode())?;
        let resp = DriverVersionPayload::decode(&body)?;
        if resp.result == 0 {
            return Err(Ntv2Error::Nub(NubErrorCode::GetDriverVersionFailed));
        }
        Ok(resp.version)
    }

    /// Remote driver build string. Needs protocol version 3.
    pub fn build_info(&self) -> Ntv2Result<String> {
        let mut state = self.opened()?;
        if state.protocol_version < PROTOCOL_VERSION_3 {
            return Err(Ntv2Error::Nub(NubErrorCode::Unimplemented));
        }
        let query = BuildInfoPayload {
            handle: state.handle,
            result: 0,
            struct_version: 1,
            build: String::new(),
        };
        let (_, body) =
            Self::transact(&mut state, PacketType::GetBuildInfoQuery, &query.encode())?;
        let resp = BuildInfoPayload::decode(&body)?;
        if resp.result == 0 {
            return Err(Ntv2Error::Nub(NubErrorCode::DriverGetBuildInfoFailed));
        }
        Ok(resp.build)
    }
}

impl RegisterIo for NubClient {
    fn read_register(&self, reg: u32) -> Ntv2Result<u32> {
        self.check_register(reg)?;
        self.remote_read(reg, crate::register::FULL_MASK, 0)
    }

    fn write_register(&self, reg: u32, value: u32) -> Ntv2Result<()> {
        self.check_register(reg)?;
        self.remote_write(reg, value, crate::register::FULL_MASK, 0)
    }

    fn max_register(&self) -> u32 {
        regs::MAX_REGISTER
    }

    fn read_register_masked(&self, reg: u32, mask: u32, shift: u32) -> Ntv2Result<u32> {
        self.check_register(reg)?;
        check_shift(shift)?;
        self.remote_read(reg, mask, shift)
    }

    fn write_register_masked(&self, reg: u32, value: u32, mask: u32, shift: u32) -> Ntv2Result<()> {
        self.check_register(reg)?;
        check_shift(shift)?;
        self.remote_write(reg, value, mask, shift)
    }

    fn read_registers(&self, regs: &mut [RegInfo]) -> Ntv2Result<()> {
        self.remote_read_multi(regs)
    }
}

// ============================================================================
// Server
// ============================================================================

/// Driver version reported by [`NubServer`].
pub const SERVER_DRIVER_VERSION: u32 = 0x11_02_00_00;

/// Serves one register backend to nub clients, one thread per connection.
pub struct NubServer<R> {
    listener: TcpListener,
    backend: Arc<R>,
    description: String,
    next_handle: Arc<AtomicI32>,
}

/// Running server.
pub struct NubServerHandle {
    pub addr: SocketAddr,
    pub thread: JoinHandle<()>,
}

struct Session<R> {
    backend: Arc<R>,
    description: String,
    handle: i32,
    next_handle: Arc<AtomicI32>,
}

impl<R: RegisterIo + Send + Sync + 'static> NubServer<R> {
    /// Bind to `addr` (port 0 picks a free port).
    pub fn bind(addr: impl ToSocketAddrs, backend: Arc<R>) -> Ntv2Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            backend,
            description: "NTV2 nub".into(),
            next_handle: Arc::new(AtomicI32::new(1)),
        })
    }

    /// Description reported to discovery queries.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn local_addr(&self) -> Ntv2Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    pub fn serve(self) {
        log::info!(
            "nub server listening on {}",
            self.listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default()
        );
        for conn in self.listener.incoming() {
            match conn {
                Ok(stream) => {
                    let session = Session {
                        backend: Arc::clone(&self.backend),
                        description: self.description.clone(),
                        handle: INVALID_HANDLE,
                        next_handle: Arc::clone(&self.next_handle),
                    };
                    thread::spawn(move || session.run(stream));
                }
                Err(e) => log::warn!("nub accept failed: {}", e),
            }
        }
    }

    /// Serve on a background thread.
    pub fn spawn(self) -> Ntv2Result<NubServerHandle> {
        let addr = self.local_addr()?;
        let thread = thread::Builder::new()
            .name("ntv2-nub".into())
            .spawn(move || self.serve())?;
        Ok(NubServerHandle { addr, thread })
    }
}

impl<R: RegisterIo> Session<R> {
    fn run(mut self, mut stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        log::debug!("nub client {} connected", peer);
        loop {
            let (header, body) = match read_packet(&mut stream) {
                Ok(p) => p,
                Err(Ntv2Error::Nub(NubErrorCode::ConnectionClosed)) => break,
                Err(e) => {
                    log::warn!("nub client {}: {}", peer, e);
                    break;
                }
            };
            let version = header.protocol_version.min(MAX_PROTOCOL_VERSION);
            let reply = header
                .packet_type()
                .ok_or(Ntv2Error::Nub(NubErrorCode::NonNubPacket))
                .and_then(|t| self.respond(t, version, &body));
            let sent = match reply {
                Ok(Some((t, payload))) => write_packet(&mut stream, version, t, &payload),
                Ok(None) => {
                    log::debug!("nub client {}: ignoring packet type {}", peer, header.pkt_type);
                    Ok(())
                }
                Err(e) => {
                    log::warn!("nub client {}: bad packet: {}", peer, e);
                    break;
                }
            };
            if let Err(e) = sent {
                log::warn!("nub client {}: {}", peer, e);
                break;
            }
        }
        log::debug!("nub client {} disconnected", peer);
    }

    fn ok(&self, handle: i32) -> bool {
        handle != INVALID_HANDLE && handle == self.handle
    }

    fn respond(
        &mut self,
        query: PacketType,
        version: u32,
        body: &[u8],
    ) -> Ntv2Result<Option<(PacketType, Vec<u8>)>> {
        let Some(response) = query.response_for() else {
            return Ok(None);
        };
        let payload = match query {
            PacketType::DiscoverQuery => {
                let board_id = self.backend.read_register(regs::BOARD_ID).unwrap_or(0);
                DiscoverResponse {
                    boards: vec![DiscoverBoardInfo {
                        board_number: 0,
                        board_type: 0,
                        board_id,
                        description: self.description.clone(),
                    }],
                }
                .encode()
            }
            PacketType::OpenQuery => {
                let mut info = OpenInfo::decode(body)?;
                info.handle = if info.board_number == 0 {
                    self.handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
                    self.handle
                } else {
                    INVALID_HANDLE
                };
                info.encode()
            }
            PacketType::ReadRegisterQuery => {
                let mut p = RegisterPayload::decode(body)?;
                p.result = 0;
                if self.ok(p.handle) {
                    if let Ok(v) = self.backend.read_register_masked(p.number, p.mask, p.shift) {
                        p.value = v;
                        p.result = 1;
                    }
                }
                p.encode()
            }
            PacketType::WriteRegisterQuery => {
                let mut p = RegisterPayload::decode(body)?;
                p.result = u32::from(
                    self.ok(p.handle)
                        && self
                            .backend
                            .write_register_masked(p.number, p.value, p.mask, p.shift)
                            .is_ok(),
                );
                p.encode()
            }
            PacketType::ReadRegisterMultiQuery => {
                let mut p = MultiReadPayload::decode(body)?;
                p.result = 1;
                if !self.ok(p.handle) {
                    p.result = 0;
                    p.which_failed = 0;
                }
                for (i, r) in p.regs.iter_mut().enumerate() {
                    if p.result == 0 {
                        break;
                    }
                    match self.backend.read_register_masked(r.number, r.mask, r.shift) {
                        Ok(v) => r.value = v,
                        Err(_) => {
                            p.result = 0;
                            p.which_failed = i as u32;
                        }
                    }
                }
                p.encode()?
            }
            PacketType::GetDriverVersionQuery => {
                let mut p = DriverVersionPayload::decode(body)?;
                p.result = u32::from(self.ok(p.handle));
                p.version = SERVER_DRIVER_VERSION;
                p.encode()
            }
            PacketType::GetBuildInfoQuery => {
                let mut p = BuildInfoPayload::decode(body)?;
                p.result = u32::from(self.ok(p.handle) && version >= PROTOCOL_VERSION_3);
                p.struct_version = 1;
                p.build = format!("ntv2-rust {}", env!("CARGO_PKG_VERSION"));
                p.encode()
            }
            _ => return Ok(None),
        };
        Ok(Some((response, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::nodevice::NoDevice;

    fn serve(device: DeviceId) -> (Arc<NoDevice>, NubConfig) {
        let backend = Arc::new(NoDevice::for_device(device));
        let server = NubServer::bind("127.0.0.1:0", Arc::clone(&backend))
            .unwrap()
            .with_description("sim board");
        let handle = server.spawn().unwrap();
        let config = NubConfig {
            host: "127.0.0.1".into(),
            port: handle.addr.port(),
            ..NubConfig::default()
        };
        (backend, config)
    }

    #[test]
    fn test_header_layout() {
        let h = PacketHeader {
            protocol_version: 3,
            pkt_type: PacketType::OpenQuery as u32,
            data_length: 12,
        };
        let bytes = h.encode();
        assert_eq!(&bytes[..12], &[0, 0, 0, 3, 0, 0, 0, 2, 0, 0, 0, 12]);
        assert!(bytes[12..].iter().all(|b| *b == 0));
        assert_eq!(PacketHeader::decode(&bytes), h);
    }

    #[test]
    fn test_packet_types() {
        assert_eq!(
            PacketType::ReadRegisterQuery.response_for(),
            Some(PacketType::ReadRegisterResponse)
        );
        assert_eq!(PacketType::ReadRegisterResponse.response_for(), None);
        assert_eq!(PacketType::from_u32(27), Some(PacketType::MessageResponse));
        assert_eq!(PacketType::from_u32(28), None);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(NubErrorCode::from_code(-24), Some(NubErrorCode::ReadRegFailed));
        assert_eq!(NubErrorCode::from_code(-99), None);
        assert_eq!(NubErrorCode::TimedOut.to_string(), "timed out (-6)");
    }

    #[test]
    fn test_payload_decode_short() {
        assert!(RegisterPayload::decode(&[0; 10]).is_err());
        let mut big = MultiReadPayload {
            handle: 1,
            result: 0,
            which_failed: 0,
            regs: vec![RegInfo::new(0, 0); MULTI_READ_MAX + 1],
        };
        assert!(big.encode().is_err());
        big.regs.truncate(MULTI_READ_MAX);
        assert!(big.encode().unwrap().len() <= MAX_PAYLOAD);
    }

    #[test]
    fn test_discover_description_truncated() {
        let resp = DiscoverResponse {
            boards: vec![DiscoverBoardInfo {
                board_number: 0,
                board_type: 0,
                board_id: 0x1079_8400,
                description: "x".repeat(40),
            }],
        };
        let decoded = DiscoverResponse::decode(&resp.encode()).unwrap();
        assert_eq!(decoded.boards[0].description.len(), DESCRIPTION_LEN - 1);
        assert_eq!(decoded.boards[0].board_id, 0x1079_8400);
    }

    #[test]
    fn test_loopback_register_access() {
        let (backend, config) = serve(DeviceId::Kona5);
        let client = NubClient::connect(&config).unwrap();
        assert!(matches!(client.read_register(0), Err(Ntv2Error::DeviceNotOpen)));
        assert!(client.open(0).unwrap() > 0);
        assert_eq!(client.protocol_version(), PROTOCOL_VERSION_3);

        assert_eq!(
            client.read_register(regs::BOARD_ID).unwrap(),
            DeviceId::Kona5.as_u32()
        );
        client.write_register(500, 0xDEAD_BEEF).unwrap();
        assert_eq!(backend.read_register(500).unwrap(), 0xDEAD_BEEF);

        client.write_register_masked(500, 0x12, 0x00FF_0000, 16).unwrap();
        assert_eq!(backend.read_register(500).unwrap(), 0xDE12_BEEF);
        assert_eq!(client.read_register_masked(500, 0xFF00, 8).unwrap(), 0xBE);
    }

    #[test]
    fn test_loopback_multi_read_chunks() {
        let (backend, config) = serve(DeviceId::Kona4);
        for n in 0..450u32 {
            backend.write_register(1000 + n, n * 3).unwrap();
        }
        let client = NubClient::connect_and_open(&config, 0).unwrap();
        let mut regs: Vec<RegInfo> = (0..450).map(|n| RegInfo::new(1000 + n, 0)).collect();
        client.read_registers(&mut regs).unwrap();
        assert!(regs.iter().enumerate().all(|(n, r)| r.value == n as u32 * 3));

        let mut bad = vec![RegInfo::new(1, 0), RegInfo::new(regs::MAX_REGISTER + 5, 0)];
        assert!(matches!(
            client.read_registers(&mut bad),
            Err(Ntv2Error::Nub(NubErrorCode::ReadRegMultiFailed))
        ));
    }

    #[test]
    fn test_loopback_open_missing_board() {
        let (_backend, config) = serve(DeviceId::Kona1);
        let client = NubClient::connect(&config).unwrap();
        assert!(matches!(
            client.open(3),
            Err(Ntv2Error::Nub(NubErrorCode::NoCard))
        ));
    }

    #[test]
    fn test_loopback_discover_and_versions() {
        let (_backend, config) = serve(DeviceId::Corvid88);
        let client = NubClient::connect_and_open(&config, 0).unwrap();
        let boards = client.discover().unwrap();
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].board_id, DeviceId::Corvid88.as_u32());
        assert_eq!(boards[0].description, "sim board");

        let version = client.driver_version().unwrap();
        assert_eq!(format_driver_version(version), "17.2.0.0");
        assert!(client.build_info().unwrap().starts_with("ntv2-rust"));
    }

    #[test]
    fn test_build_info_needs_v3() {
        let (_backend, mut config) = serve(DeviceId::Kona1);
        config.protocol_version = PROTOCOL_VERSION_2;
        let client = NubClient::connect_and_open(&config, 0).unwrap();
        assert!(matches!(
            client.build_info(),
            Err(Ntv2Error::Nub(NubErrorCode::Unimplemented))
        ));
    }

    /// A hand-driven nub that answers `open`, then replies to one register
    /// read after `delay`, naming register `reply_reg`.
    fn scripted_server(delay: Duration, reply_reg: u32) -> (NubConfig, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let thread = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let (_, body) = read_packet(&mut stream).unwrap();
            let mut open = OpenInfo::decode(&body).unwrap();
            open.handle = 1;
            write_packet(
                &mut stream,
                PROTOCOL_VERSION_3,
                PacketType::OpenResponse,
                &open.encode(),
            )
            .unwrap();

            let (_, body) = read_packet(&mut stream).unwrap();
            let mut reply = RegisterPayload::decode(&body).unwrap();
            reply.number = reply_reg;
            reply.value = 1111;
            reply.result = 1;
            thread::sleep(delay);
            let _ = write_packet(
                &mut stream,
                PROTOCOL_VERSION_3,
                PacketType::ReadRegisterResponse,
                &reply.encode(),
            );
            // Serve whatever else arrives until the client hangs up.
            while let Ok((_, body)) = read_packet(&mut stream) {
                let mut reply = RegisterPayload::decode(&body).unwrap();
                reply.value = 2222;
                reply.result = 1;
                let _ = write_packet(
                    &mut stream,
                    PROTOCOL_VERSION_3,
                    PacketType::ReadRegisterResponse,
                    &reply.encode(),
                );
            }
        });
        let config = NubConfig {
            host: "127.0.0.1".into(),
            port,
            timeout: Duration::from_millis(200),
            ..NubConfig::default()
        };
        (config, thread)
    }

    #[test]
    fn test_late_reply_drops_connection() {
        let (config, server) = scripted_server(Duration::from_millis(600), 10);
        let client = NubClient::connect_and_open(&config, 0).unwrap();
        assert!(matches!(
            client.read_register(10),
            Err(Ntv2Error::Nub(NubErrorCode::TimedOut))
        ));
        assert_eq!(client.handle(), INVALID_HANDLE);
        assert!(matches!(client.read_register(20), Err(Ntv2Error::DeviceNotOpen)));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn test_reply_for_other_register_rejected() {
        let (config, server) = scripted_server(Duration::ZERO, 99);
        let client = NubClient::connect_and_open(&config, 0).unwrap();
        assert!(matches!(client.read_register(10), Err(Ntv2Error::NubProtocol(_))));
        assert!(matches!(client.read_register(10), Err(Ntv2Error::DeviceNotOpen)));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn test_masked_shift_checked_locally() {
        let (_backend, config) = serve(DeviceId::Kona4);
        let client = NubClient::connect_and_open(&config, 0).unwrap();
        assert!(matches!(
            client.read_register_masked(500, 0xFF, 32),
            Err(Ntv2Error::InvalidArgument(_))
        ));
        assert!(matches!(
            client.write_register_masked(500, 1, 0xFF, 40),
            Err(Ntv2Error::InvalidArgument(_))
        ));
        assert!(client.handle() > 0);
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = NubConfig {
            host: "127.0.0.1".into(),
            port,
            timeout: Duration::from_millis(500),
            ..NubConfig::default()
        };
        assert!(matches!(NubClient::connect(&config), Err(Ntv2Error::Nub(_))));
    }
}
