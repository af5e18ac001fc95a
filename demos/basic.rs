// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Basic example demonstrating NTV2 board access.
//!
//! Run with: `cargo run --example basic [device-spec]`
//!
//! Without an argument a simulated Kona 1 is used.

use ntv2_rust::flash::FlashBlock;
use ntv2_rust::{
    discover_devices, is_driver_loaded, Card, DeviceId, InputXpt, NoDevice, NubClient, NubConfig,
    NubServer, Ntv2Error, OutputXpt, ProgramOptions, RegisterIo, SignalRouter,
};
use std::sync::Arc;

fn main() {
    println!("NTV2 Basic Example");
    println!("==================\n");

    // Local boards
    println!("Checking local boards...");
    println!("  Driver loaded: {}", is_driver_loaded());
    match discover_devices() {
        Ok(devices) if devices.is_empty() => println!("  No local boards found."),
        Ok(devices) => {
            for device in &devices {
                println!("  Board: {}", device.display_name());
                println!("    Node: {}", device.path.display());
                if let Some(id) = device.board_id {
                    println!("    Board ID: {:#010x}", id);
                }
            }
        }
        Err(Ntv2Error::PlatformNotSupported) => println!("  Platform not supported."),
        Err(e) => println!("  Error discovering boards: {}", e),
    }
    println!();

    // Open the requested board
    let spec = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "nodevice://kona1".to_string());
    println!("Opening '{}'...", spec);
    let card = match Card::open_spec(&spec) {
        Ok(card) => {
            println!("  Opened {} (board id {:#010x})", card.device_id(), card.device_id().as_u32());
            card
        }
        Err(e) => {
            println!("  Failed to open board: {}", e);
            return;
        }
    };
    println!();

    // Routing
    println!("Routing SDI In 1 through frame store 1 to SDI Out 1...");
    let mut router = SignalRouter::new();
    router.add_connection(InputXpt::FRAME_BUFFER1, OutputXpt::SDI_IN1);
    router.add_connection(InputXpt::SDI_OUT1, OutputXpt::FRAME_BUFFER1_YUV);
    for (input, output) in router.iter() {
        match card.can_connect(input, output) {
            Ok(ok) => println!("  {} <== {}: allowed = {}", input, output, ok),
            Err(e) => println!("  {} <== {}: {}", input, output, e),
        }
    }
    match card.apply_signal_route(&router, true) {
        Ok(()) => {
            println!("  Applied. Current routing:");
            match card.routing() {
                Ok(current) => {
                    for line in current.to_string().lines() {
                        println!("    {}", line);
                    }
                }
                Err(e) => println!("    Read failed: {}", e),
            }
        }
        Err(e) => println!("  Apply failed: {}", e),
    }
    println!();

    // SPI flash on a simulated board with a flash part attached
    println!("Programming the failsafe block of a simulated Kona 1...");
    match Card::no_device_with_flash(DeviceId::Kona1, 0x01_0219) {
        Ok(sim) => match sim.flash_programmer() {
            Ok(flash) => {
                let image: Vec<u8> = (0..16 * 1024).map(|i| (i % 251) as u8).collect();
                let options = ProgramOptions {
                    block: FlashBlock::Failsafe,
                    full_verify: true,
                };
                let mut last_phase = None;
                let result = flash.program(&image, &options, &mut |p| {
                    if last_phase != Some(p.phase) {
                        println!("  {}", p);
                        last_phase = Some(p.phase);
                    }
                });
                match result {
                    Ok(()) => match flash.readback_crc32(FlashBlock::Failsafe, image.len()) {
                        Ok(crc) => println!(
                            "  Done. Readback CRC32 {:#010x}, image CRC32 {:#010x}",
                            crc,
                            crc32fast::hash(&image)
                        ),
                        Err(e) => println!("  Readback failed: {}", e),
                    },
                    Err(e) => println!("  Programming failed: {}", e),
                }
            }
            Err(e) => println!("  Flash not available: {}", e),
        },
        Err(e) => println!("  Simulation failed: {}", e),
    }
    println!();

    // Nub loopback
    println!("Serving a simulated Kona 5 over the nub...");
    let backend = Arc::new(NoDevice::for_device(DeviceId::Kona5));
    let server = match NubServer::bind("127.0.0.1:0", backend).and_then(|s| s.spawn()) {
        Ok(server) => server,
        Err(e) => {
            println!("  Failed to start server: {}", e);
            return;
        }
    };
    println!("  Listening on {}", server.addr);
    let config = NubConfig {
        port: server.addr.port(),
        ..NubConfig::new("127.0.0.1")
    };
    match NubClient::connect_and_open(&config, 0) {
        Ok(client) => {
            match client.read_register(ntv2_rust::regs::BOARD_ID) {
                Ok(id) => println!("  Remote board id: {:#010x}", id),
                Err(e) => println!("  Remote read failed: {}", e),
            }
            match client.build_info() {
                Ok(build) => println!("  Remote build: {}", build),
                Err(e) => println!("  Build info failed: {}", e),
            }
        }
        Err(e) => println!("  Connect failed: {}", e),
    }
    println!();

    println!("Done!");
}
