//! 재조립 버퍼 처리량 벤치마크

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::seq::SliceRandom;

use peerdrop::{ChunkPlan, ReassemblyBuffer};

fn chunks(size: u64, chunk_size: usize) -> Vec<(u64, Bytes)> {
    let data = Bytes::from(vec![0x5Au8; size as usize]);
    ChunkPlan::new(size, chunk_size)
        .ranges()
        .map(|(_, range)| (range.start, data.slice(range.start as usize..range.end as usize)))
        .collect()
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");
    let size = 16 * 1024 * 1024;

    for chunk_size in [16 * 1024, 64 * 1024, 256 * 1024] {
        let ordered = chunks(size, chunk_size);
        let mut shuffled = ordered.clone();
        shuffled.shuffle(&mut rand::thread_rng());

        group.throughput(Throughput::Bytes(size));
        for (label, parts) in [("ordered", &ordered), ("shuffled", &shuffled)] {
            group.bench_with_input(BenchmarkId::new(label, chunk_size), parts, |b, parts| {
                b.iter(|| {
                    let mut buffer = ReassemblyBuffer::new("bench.bin", size, "");
                    for (offset, payload) in parts.iter() {
                        buffer.insert(*offset, payload.clone());
                    }
                    black_box(buffer.into_finished())
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_reassembly);
criterion_main!(benches);
