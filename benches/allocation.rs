use blockstore_rs::{
    AllocatorConfig, BlockAllocator, BlockDeviceBackedAllocator, Digest, MemoryBlockDevice,
    SectorWriter, ValidatingBufferFactory,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

fn allocator(block_count: usize) -> BlockDeviceBackedAllocator {
    let config = AllocatorConfig {
        sector_size_bytes: 4096,
        block_sector_count: 64,
        block_count,
    };
    let device = Arc::new(MemoryBlockDevice::new(
        config.device_size_bytes().unwrap() as usize,
    ));
    BlockDeviceBackedAllocator::new(device, Arc::new(ValidatingBufferFactory), &config).unwrap()
}

/// Benchmark allocating and releasing every block
fn bench_alloc_release_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_release_cycle");

    for block_count in [16, 256, 1024].iter() {
        let alloc = allocator(*block_count);
        group.bench_with_input(
            BenchmarkId::from_parameter(block_count),
            block_count,
            |b, &count| {
                b.iter(|| {
                    let blocks: Vec<_> = (0..count).map(|_| alloc.new_block().unwrap()).collect();
                    black_box(&blocks);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark re-attaching blocks, as done once per block at startup
fn bench_new_block_at_location(c: &mut Criterion) {
    let alloc = allocator(1024);
    let locations: Vec<_> = (0..1024)
        .map(|_| alloc.new_block().unwrap().1)
        .collect();

    c.bench_function("new_block_at_location/1024", |b| {
        b.iter(|| {
            let blocks: Vec<_> = locations
                .iter()
                .rev()
                .map(|location| alloc.new_block_at_location(location, 0).unwrap())
                .collect();
            black_box(&blocks);
        });
    });
}

/// Benchmark sector-aligned writes of various object sizes
fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_by_size");
    let alloc = allocator(4);

    for size_kb in [1, 4, 17, 64].iter() {
        let data = vec![0x5Au8; size_kb * 1024];
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}KB", size_kb)),
            &data,
            |b, data| {
                b.iter(|| {
                    let (mut block, _) = alloc.new_block().unwrap();
                    while block.has_space(data.len() as u64) {
                        block.put(data.len() as u64).write(&data[..]).unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark validated reads
fn bench_get(c: &mut Criterion) {
    let alloc = allocator(1);
    let (mut block, _) = alloc.new_block().unwrap();
    let data = vec![0xC3u8; 64 * 1024];
    let digest = Digest::compute(&data);
    let offset = block.put(data.len() as u64).write(&data[..]).unwrap();

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("64KB", |b| {
        b.iter(|| {
            let buffer = block.get(digest, offset, data.len() as u64, Box::new(|_| {}));
            black_box(buffer.into_bytes().unwrap());
        });
    });
    group.finish();
}

/// Benchmark splitting a stream into small appends
fn bench_sector_writer_small_appends(c: &mut Criterion) {
    let device = MemoryBlockDevice::new(1024 * 1024);
    let chunk = [0x11u8; 100];

    c.bench_function("sector_writer/100B_appends", |b| {
        b.iter(|| {
            let mut writer = SectorWriter::new(&device, 4096, 0);
            for _ in 0..10_000 {
                writer.append(&chunk).unwrap();
            }
            black_box(writer.finish().unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_alloc_release_cycle,
    bench_new_block_at_location,
    bench_put,
    bench_get,
    bench_sector_writer_small_appends
);
criterion_main!(benches);
