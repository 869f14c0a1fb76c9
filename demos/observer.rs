//! Demo observer: plays the host-side probe against a region created by the
//! target demo. Polls vacated blocks, prints every complete record, and can
//! send a one-shot command down to the target.
//!
//! Usage: `cargo run --example observer [region-name] [command]`

use std::time::Duration;
use tracelink::{HeaderFormat, RecordIter, TraceRegion};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tracelink_demo".to_string());
    let mut command = std::env::args().nth(2);

    let region = match TraceRegion::open(&name) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[observer] failed to open region '{name}': {e}");
            eprintln!("[observer] is the target demo running?");
            std::process::exit(1);
        }
    };
    println!(
        "[observer] attached to '{}' ({} byte blocks)",
        name,
        region.block_size()
    );

    let mut records = 0u64;
    let mut dropped = 0u64;
    loop {
        let Some((slot, bytes)) = region.take_block() else {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        };

        for rec in RecordIter::new(HeaderFormat::Compact, bytes) {
            if rec.header.is_complete() {
                records += 1;
                println!("[observer] {}", String::from_utf8_lossy(rec.payload));
            } else {
                // Producer was mid-write when the block swapped out.
                dropped += 1;
            }
        }

        // Answer through the block we own before handing it back.
        if let Some(cmd) = command.take() {
            if region.deposit(slot, cmd.as_bytes()) {
                println!("[observer] sent command: {cmd}");
            } else {
                eprintln!("[observer] command too large for a block");
            }
        }
        region.release_block(slot);

        if records > 0 && records % 64 == 0 {
            println!("[observer] {records} records so far ({dropped} incomplete discarded)");
        }
    }
}
