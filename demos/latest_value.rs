//! Latest value demo
//!
//! This example replays the reference writer/reader scenario step by step,
//! then runs a producer and a consumer on two threads and reports how many of
//! the published values the consumer actually got to see.
//!
//! Progress is reported through tracing:
//!
//! ```text
//! cargo run --example latest_value -- --updates 100000 --writer-pause-us 5
//! ```

use anyhow::{ensure, Result};
use clap::Parser;
use snapflip::{triple_buffer, TripleBuffer};
use std::{thread, time::Duration};
use tracing::{debug, info};

/// Command line options
#[derive(Parser, Debug)]
#[command(name = "latest_value", about = "Triple buffer producer/consumer demo")]
struct Args {
    /// Number of values published by the writer thread
    #[arg(long, default_value_t = 100_000)]
    updates: u64,

    /// Pause between two updates of the writer thread, in microseconds
    #[arg(long, default_value_t = 0)]
    writer_pause_us: u64,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    info!(?args, "starting latest value demo");

    reference_scenario()?;
    producer_consumer(args.updates, Duration::from_micros(args.writer_pause_us))?;

    info!("demo complete");
    Ok(())
}

/// Replay the single-threaded reference scenario, checking every step
fn reference_scenario() -> Result<()> {
    let (mut writer, mut reader) = TripleBuffer::new(0).split();

    writer.write(3);
    writer.flip_writer();
    let claimed = reader.new_snap();
    debug!(claimed, snap = *reader.snap(), "first claim");
    ensure!(*reader.snap() == 3, "expected 3, got {}", reader.snap());

    for value in [4, 5, 6] {
        writer.write(value);
        writer.flip_writer();
    }
    reader.new_snap();
    for value in [7, 8] {
        writer.write(value);
        writer.flip_writer();
    }
    debug!(snap = *reader.snap(), pending = reader.updated(), "after unclaimed writes");
    ensure!(*reader.snap() == 6, "expected 6, got {}", reader.snap());

    for value in [7, 8] {
        writer.write(value);
        writer.flip_writer();
    }
    reader.new_snap();
    ensure!(*reader.snap() == 8, "expected 8, got {}", reader.snap());

    let claimed = reader.new_snap();
    debug!(claimed, snap = *reader.snap(), "claim without new data");
    ensure!(!claimed, "claimed a snapshot although nothing was published");
    ensure!(*reader.snap() == 8, "expected 8, got {}", reader.snap());

    info!("reference scenario passed");
    Ok(())
}

/// Publish `updates` increasing values from one thread, read from another
fn producer_consumer(updates: u64, writer_pause: Duration) -> Result<()> {
    // Each value is stored twice so that torn reads would be detectable
    let (mut writer, mut reader) = triple_buffer((0u64, 0u64));

    let producer = thread::spawn(move || {
        for value in 1..=updates {
            writer.update((value, !value));
            if !writer_pause.is_zero() {
                thread::sleep(writer_pause);
            }
        }
    });

    let mut last_value = 0;
    let mut distinct_values = 0u64;
    while last_value < updates {
        let (value, check) = *reader.read_last();
        ensure!(check == !value || value == 0, "torn read: {value} / {check}");
        ensure!(value >= last_value, "went back in time: {last_value} -> {value}");
        if value != last_value {
            distinct_values += 1;
            last_value = value;
        }
    }

    producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;

    info!(
        updates,
        distinct_values,
        skipped = updates - distinct_values,
        "producer/consumer run finished"
    );
    Ok(())
}
