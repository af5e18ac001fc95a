// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Benchmarks for header parsing, routing and simulated flash programming.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ntv2_rust::flash::{FlashBlock, ProgramOptions};
use ntv2_rust::router::{self, SignalRouter};
use ntv2_rust::{Bitfile, Card, DeviceId, InputXpt, OutputXpt, RegInfo};
use std::hint::black_box;

const PREAMBLE: [u8; 13] = [
    0x00, 0x09, 0x0F, 0xF0, 0x0F, 0xF0, 0x0F, 0xF0, 0x0F, 0xF0, 0x00, 0x00, 0x01,
];
const SYNC_WORD: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0xAA, 0x99, 0x55, 0x66];

fn section(out: &mut Vec<u8>, tag: u8, text: &str) {
    out.push(tag);
    out.extend_from_slice(&((text.len() + 1) as u16).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    out.push(0);
}

fn bitfile(design: &str, body_len: usize) -> Vec<u8> {
    let mut out = PREAMBLE.to_vec();
    section(&mut out, b'a', design);
    section(&mut out, b'b', "7k325tffg900");
    section(&mut out, b'c', "2025/03/14");
    section(&mut out, b'd', "09:26:53");
    out.push(b'e');
    out.extend_from_slice(&((SYNC_WORD.len() + body_len) as u32).to_be_bytes());
    out.extend_from_slice(&SYNC_WORD);
    out.extend((0..body_len).map(|i| (i * 7) as u8));
    out
}

/// Bitfile header parsing.
fn bench_bitfile_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitfile_header");
    for design in [
        "kona4_quad",
        "kona5_retail;UserID=0x01000100;Version=2;Compress=TRUE",
    ] {
        let file = bitfile(design, 64);
        group.bench_with_input(BenchmarkId::from_parameter(design.len()), &file, |b, file| {
            b.iter(|| Bitfile::parse_header(black_box(file)).unwrap());
        });
    }
    group.finish();
}

/// Register writes for routers of growing size.
fn bench_router_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("router_register_writes");
    let outputs: Vec<OutputXpt> = OutputXpt::all().filter(|o| *o != OutputXpt::BLACK).collect();
    let pairs: Vec<(InputXpt, OutputXpt)> = InputXpt::all()
        .zip(outputs.iter().copied().cycle())
        .collect();
    for n in [4usize, 16, pairs.len()] {
        let router: SignalRouter = pairs.iter().take(n).copied().collect();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &router, |b, router| {
            b.iter(|| router.register_writes().unwrap());
        });
    }
    group.finish();
}

/// Decoding a full routing ROM dump.
fn bench_rom_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_rom_decode");
    for device in [DeviceId::Kona1, DeviceId::Kona4, DeviceId::Corvid88] {
        let rom: Vec<RegInfo> = router::make_route_rom_registers(&router::legal_connections(device));
        group.bench_with_input(BenchmarkId::from_parameter(device), &rom, |b, rom| {
            b.iter(|| router::possible_connections_from_rom(black_box(rom)));
        });
    }
    group.finish();
}

/// Programming the failsafe block of a simulated flash.
fn bench_flash_program(c: &mut Criterion) {
    let mut group = c.benchmark_group("flash_program_sim");
    group.sample_size(10);
    for size in [4 * 1024usize, 64 * 1024] {
        let image: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &image, |b, image| {
            b.iter(|| {
                let card = Card::no_device_with_flash(DeviceId::Kona1, 0x01_0219).unwrap();
                let flash = card.flash_programmer().unwrap();
                let options = ProgramOptions {
                    block: FlashBlock::Failsafe,
                    full_verify: false,
                };
                flash.program(image, &options, &mut |_| {}).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_bitfile_header,
    bench_router_writes,
    bench_rom_decode,
    bench_flash_program
);
criterion_main!(benches);
