//! Number processing pipeline demonstrating filtering and transformations
//!
//! Pipeline:
//! 1. Generate: every tick emits the next batch of numbers 1-100
//! 2. Filter: Keep only even numbers
//! 3. Transform: Multiply by 10 through a simulated async lookup, then restore a single
//!    ordered lane
//! 4. Audit: a side branch samples values without slowing the main path
//! 5. Aggregate: Running count and sum
//!
//! Usage: cargo run --example filter_pipeline --release
//!        (RUST_LOG=info shows the audit branch)

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream_flow::prelude::*;
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const MAX: u32 = 100;
const BATCH: u32 = 10;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Number Processing Pipeline");
    println!("==========================");
    println!("Generating numbers 1-{MAX}, filtering evens, multiplying by 10, and summing");
    println!();

    let start = Instant::now();

    let audit = PartialPipeline::new().map_async(1, |value: u64| async move {
        tokio::time::sleep(Duration::from_millis(15)).await;
        info!(value, "audited");
        Ok(value)
    });

    let next = Arc::new(AtomicU32::new(1));
    let pipeline = tick(Duration::from_millis(5), ())
        .flat_map(move |()| {
            let from = next.fetch_add(BATCH, Ordering::Relaxed).min(MAX + 1);
            let to = (from + BATCH).min(MAX + 1);
            Ok((from..to).collect::<Vec<_>>())
        })
        .filter(|n| n % 2 == 0)
        .map_async_unordered(4, |n: u32| async move {
            // Larger numbers take longer to "look up"
            tokio::time::sleep(Duration::from_micros(u64::from(n) * 20)).await;
            Ok(u64::from(n) * 10)
        })
        .map_async(1, |value: u64| async move {
            debug!(value, "resolved");
            Ok(value)
        })
        .also_to(&audit)
        .reduce(|(count, sum): &(u64, u64), value| Ok((count + 1, sum + value)), (0, 0));

    println!("Stages: {}", pipeline.describe());

    let (progress, mut watcher) = watch::channel((0u64, 0u64));
    let running = pipeline.run(move |(count, sum)| {
        if count % 5 == 0 {
            println!("Running sum: {sum} (count: {count})");
        }
        progress.send_replace((count, sum));
        async { Ok(()) }
    })?;

    let expected = u64::from(MAX / 2);
    watcher.wait_for(|(count, _)| *count == expected).await?;
    running.cancel().await;

    let (count, sum) = *watcher.borrow();
    println!("\n=== Final Results ===");
    println!("Total numbers processed: {count}");
    println!("Sum of all numbers: {sum}");
    if count > 0 {
        println!("Average: {:.2}", sum as f64 / count as f64);
    }
    println!("{}", running.metrics().snapshot().format());

    let elapsed = start.elapsed();
    println!("\nPipeline execution time: {:.3}s", elapsed.as_secs_f64());

    Ok(())
}
