use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use double_socket::core::bit_buffer::BitBuffer;

fn bench_aligned(c: &mut Criterion) {
    let mut group = c.benchmark_group("bit_buffer_aligned");
    group.throughput(Throughput::Bytes(1000 * 8));

    group.bench_function("write_read_u64", |b| {
        let mut buffer = BitBuffer::with_capacity(8 * 1000);
        b.iter(|| {
            let mut scoped = buffer.scoped();
            for i in 0..1000u64 {
                scoped.write_u64(i);
            }
            let mut sum = 0u64;
            for _ in 0..1000 {
                sum = sum.wrapping_add(scoped.read_u64());
            }
            black_box(sum)
        })
    });
    group.finish();
}

fn bench_unaligned(c: &mut Criterion) {
    let mut group = c.benchmark_group("bit_buffer_unaligned");

    group.bench_function("write_read_bits_5_11_20", |b| {
        let mut buffer = BitBuffer::with_capacity(8 * 1000);
        b.iter(|| {
            let mut scoped = buffer.scoped();
            for i in 0..1000u64 {
                scoped.write_bits(i & 0x1F, 5);
                scoped.write_bits(i & 0x7FF, 11);
                scoped.write_bits(i, 20);
            }
            let mut sum = 0u64;
            for _ in 0..1000 {
                sum = sum
                    .wrapping_add(scoped.read_bits(5))
                    .wrapping_add(scoped.read_bits(11))
                    .wrapping_add(scoped.read_bits(20));
            }
            black_box(sum)
        })
    });

    let bytes = vec![0x5Au8; 1200];
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("write_bytes_after_nibble", |b| {
        let mut buffer = BitBuffer::with_capacity(1536);
        b.iter(|| {
            let mut scoped = buffer.scoped();
            scoped.write_bits(0xF, 4);
            scoped.write_bytes(black_box(&bytes));
        })
    });
    group.finish();
}

criterion_group!(benches, bench_aligned, bench_unaligned);
criterion_main!(benches);
