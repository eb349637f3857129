use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use peer_link::core::codec::LineCodec;
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_line_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_decode");
    let frame_sizes = [16usize, 256, 4096, 65536];
    let frames_per_buffer = 64;

    for &size in &frame_sizes {
        let mut wire = BytesMut::new();
        let mut codec = LineCodec::new();
        let frame = vec![b'x'; size];
        for _ in 0..frames_per_buffer {
            codec.encode(&frame[..], &mut wire).unwrap();
        }

        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_function(format!("decode_{frames_per_buffer}x{size}b"), |b| {
            b.iter_batched(
                || wire.clone(),
                |mut buf| {
                    let mut codec = LineCodec::new();
                    let mut count = 0;
                    while let Some(frame) = codec.decode(&mut buf).unwrap() {
                        count += frame.len();
                    }
                    assert_eq!(count, size * frames_per_buffer);
                },
                BatchSize::SmallInput,
            )
        });

        // Same bytes arriving in small chunks, as a socket delivers them
        group.bench_function(format!("decode_chunked_{frames_per_buffer}x{size}b"), |b| {
            b.iter(|| {
                let mut codec = LineCodec::new();
                let mut buf = BytesMut::new();
                let mut frames = 0;
                for chunk in wire.chunks(1500) {
                    buf.extend_from_slice(chunk);
                    while codec.decode(&mut buf).unwrap().is_some() {
                        frames += 1;
                    }
                }
                assert_eq!(frames, frames_per_buffer);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_line_decode);
criterion_main!(benches);
