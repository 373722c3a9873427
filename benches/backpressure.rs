use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use stream_flow::prelude::*;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Runtime build failed")
}

async fn slow_consumer(data: Vec<u8>) -> Result<()> {
    tokio::time::sleep(Duration::from_micros(100)).await;
    black_box(data);
    Ok(())
}

fn benchmark_backpressure_slow_consumer(c: &mut Criterion) {
    let rt = runtime();
    c.bench_function("backpressure_slow_consumer_200_msgs", |b| {
        b.to_async(&rt).iter(|| async {
            let running = pushable::<Vec<u8>>()
                .run(slow_consumer)
                .expect("Start failed");

            // Every push waits for the consumer
            let input = running.input();
            input.initial_ready().await.expect("Never ready");
            for i in 0..200 {
                let data = vec![i as u8; 64];
                input.push(black_box(data)).await.expect("Push failed");
            }
            running.cancel().await;
        });
    });
}

fn benchmark_buffered_slow_consumer(c: &mut Criterion) {
    let rt = runtime();
    c.bench_function("buffered_slow_consumer_200_msgs", |b| {
        b.to_async(&rt).iter(|| async {
            let running = pushable::<Vec<u8>>()
                .buffer(100)
                .run(slow_consumer)
                .expect("Start failed");

            let input = running.input();
            input.initial_ready().await.expect("Never ready");
            for i in 0..200 {
                let data = vec![i as u8; 64];
                input.push(black_box(data)).await.expect("Push failed");
            }
            running.cancel().await;
        });
    });
}

fn benchmark_parallel_slow_lookup(c: &mut Criterion) {
    let rt = runtime();
    c.bench_function("parallel_unordered_slow_lookup_200_msgs", |b| {
        b.to_async(&rt).iter(|| async {
            let running = pushable::<Vec<u8>>()
                .map_async_unordered(16, |data: Vec<u8>| async move {
                    tokio::time::sleep(Duration::from_micros(100)).await;
                    Ok(data.len())
                })
                .run_and_discard()
                .expect("Start failed");

            let input = running.input();
            input.initial_ready().await.expect("Never ready");
            for i in 0..200 {
                let data = vec![i as u8; 64];
                input.push(black_box(data)).await.expect("Push failed");
            }
            running.cancel().await;
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(15))
        .sample_size(20);
    targets = benchmark_backpressure_slow_consumer,
        benchmark_buffered_slow_consumer,
        benchmark_parallel_slow_lookup
);
criterion_main!(benches);
