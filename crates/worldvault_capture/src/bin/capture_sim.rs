//! # Capture Simulator
//!
//! Drives the capture engine with a synthetic event source: a walk
//! across the world that streams LOD chunks first and upgrades them
//! to full detail as the "player" gets close, plus a handful of
//! wandering entities.
//!
//! ## Usage
//!
//! ```bash
//! capture_sim --out ./out --steps 500 --radius 16
//! ```

use std::path::PathBuf;
use worldvault_capture::{
    CaptureConfig, CaptureManager, CaptureOrigin, ChunkObservation, ChunkPayload, ChunkPos,
    Completeness, EntityObservation, EntitySnapshot,
};

fn main() {
    tracing_subscriber::fmt().init();

    println!("=== WorldVault Capture Simulator ===");

    let args: Vec<String> = std::env::args().collect();
    let mut out = PathBuf::from("./capture_out");
    let mut steps = 500usize;
    let mut radius = 16u32;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--out" | "-o" => {
                if i + 1 < args.len() {
                    out = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--steps" | "-s" => {
                if i + 1 < args.len() {
                    steps = args[i + 1].parse().unwrap_or(500);
                    i += 1;
                }
            }
            "--radius" | "-r" => {
                if i + 1 < args.len() {
                    radius = args[i + 1].parse().unwrap_or(16);
                    i += 1;
                }
            }
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
        i += 1;
    }

    let config = CaptureConfig {
        capture_radius: radius,
        flush_interval_ms: 100,
        ..CaptureConfig::default()
    };
    let manager = CaptureManager::new(config);
    let origin = CaptureOrigin::new("overworld", "simulated:25565", ChunkPos::new(0, 0));

    if let Err(e) = manager.start(&out, origin) {
        eprintln!("failed to start capture: {e}");
        std::process::exit(1);
    }

    // Walk east one chunk per step. Each step streams the frontier as
    // LOD, then upgrades the player's own column to full detail - the
    // same chunk arrives twice with increasing completeness.
    for step in 0..steps {
        let x = (step / 4) as i32;
        let frontier = x + 8;

        for z in -2..=2 {
            let _ = manager.ingest(
                ChunkObservation::new(
                    ChunkPos::new(frontier, z),
                    Completeness::Lod,
                    synthetic_payload(frontier, z, 64),
                )
                .into(),
            );
            let _ = manager.ingest(
                ChunkObservation::new(
                    ChunkPos::new(x, z),
                    Completeness::Full,
                    synthetic_payload(x, z, 4096),
                )
                .into(),
            );
        }

        let _ = manager.ingest(
            EntityObservation::new(EntitySnapshot {
                id: (step % 7) as u64,
                kind: "wanderer".to_string(),
                position: [f64::from(x) * 16.0, 64.0, 0.0],
                attributes: vec![step as u8],
            })
            .into(),
        );
    }

    if let Err(e) = manager.stop(false) {
        eprintln!("stop failed: {e}");
    }

    let stats = manager.stats();
    println!();
    println!("--- Capture Summary ---");
    println!("Chunks written:    {}", stats.chunks_written);
    println!("Chunks skipped:    {}", stats.chunks_skipped);
    println!("Chunks failed:     {}", stats.chunks_failed);
    println!("Entities captured: {}", stats.entities_captured);
    println!("Bytes written:     {} KiB", stats.bytes_written / 1024);
    println!("Archive:           {}", out.display());
}

/// Deterministic filler payload for a chunk.
fn synthetic_payload(x: i32, z: i32, size: usize) -> ChunkPayload {
    let seed = (x.wrapping_mul(31).wrapping_add(z)) as u8;
    ChunkPayload {
        blocks: vec![seed; size],
        biomes: vec![seed.wrapping_add(1); size / 16],
        light: vec![seed.wrapping_add(2); size / 32],
        block_entities: Vec::new(),
    }
}
