//! Append benchmarks
//!
//! Block assembly and the full append path against the in-memory backend.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::stream;
use kasane_appendr::append::AppendBuffer;
use kasane_appendr::backend::MemoryBackend;
use kasane_appendr::ContainerConnection;
use std::io;
use std::sync::Arc;

const TOTAL: usize = 1024 * 1024;
const BLOCK: usize = 256 * 1024;

fn chunks(read_size: usize) -> Vec<io::Result<Bytes>> {
    let data = Bytes::from(vec![7u8; TOTAL]);
    (0..TOTAL)
        .step_by(read_size)
        .map(|start| Ok(data.slice(start..(start + read_size).min(TOTAL))))
        .collect()
}

fn benchmark_block_assembly(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("block_assembly");
    group.throughput(Throughput::Bytes(TOTAL as u64));

    for read_size in [4 * 1024, 64 * 1024, BLOCK] {
        group.bench_with_input(BenchmarkId::from_parameter(read_size), &read_size, |b, &read_size| {
            b.to_async(&rt).iter(|| async move {
                let mut input = stream::iter(chunks(read_size));
                let mut buffer = AppendBuffer::new(BLOCK);
                while let Some(block) = buffer.next_block(&mut input).await.unwrap() {
                    black_box(block);
                }
            });
        });
    }

    group.finish();
}

fn benchmark_append_path(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("append_path");
    group.throughput(Throughput::Bytes(TOTAL as u64));

    group.bench_function("memory_backend_1mib", |b| {
        b.to_async(&rt).iter(|| async {
            let backend = Arc::new(MemoryBackend::new("bench", BLOCK).with_container("c"));
            let conn = ContainerConnection::new_unchecked(backend, "c");
            let outcome = conn
                .append_blob("bench.bin", stream::iter(chunks(64 * 1024)), None)
                .await
                .unwrap();
            black_box(outcome);
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_block_assembly, benchmark_append_path);
criterion_main!(benches);
