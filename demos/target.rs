//! Demo target: emits a steady stream of trace records into a shared region
//! and answers commands the observer sends back.
//!
//! Run `cargo run --example target` in one terminal and
//! `cargo run --example observer` in another.

use std::time::Duration;
use tracelink::{ChannelConfig, TraceRegion};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tracelink_demo".to_string());

    let region = match TraceRegion::create(&name, 16 * 1024, 4 * 1024) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[target] failed to create region: {e}");
            std::process::exit(1);
        }
    };
    println!(
        "[target] region '{}' ready: 2 x {} byte blocks, {} byte down-channel",
        name,
        region.block_size(),
        region.down_capacity()
    );

    let mut channel = region.into_channel(ChannelConfig::default());
    let mut seq = 0u64;
    let mut cmd = [0u8; 256];

    loop {
        let line = format!("event {seq} from pid {}", std::process::id());
        match channel.reserve(line.len() as u32, Duration::from_millis(250)) {
            Ok(ptr) => {
                unsafe {
                    core::ptr::copy_nonoverlapping(line.as_ptr(), ptr, line.len());
                }
                channel.close(ptr);
            }
            Err(e) => eprintln!("[target] reserve failed: {e}"),
        }
        seq += 1;

        // Hand partial blocks over regularly so the observer sees output
        // even at low rates.
        if seq % 16 == 0 {
            if let Err(e) = channel.flush(0, Duration::from_millis(250)) {
                eprintln!("[target] flush failed: {e}");
            }
        }

        if let Ok(got) = channel.get(&mut cmd, Duration::from_millis(5)) {
            if got > 0 {
                let text = String::from_utf8_lossy(&cmd[..got]);
                println!("[target] observer says: {}", text.trim());
                if text.trim() == "quit" {
                    break;
                }
            }
        }

        std::thread::sleep(Duration::from_millis(25));
    }

    println!("[target] shutting down after {seq} events");
}
