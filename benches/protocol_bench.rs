//! Frame codec throughput. Encoding and decoding are the hot path on every
//! dispatch, retry, and abort — this guards against regressions in the
//! digest/compression combination actually used in production (`PAYLOAD_DIGEST
//! = CRC32`, `PAYLOAD_COMPRESS = DEFLATE`) as well as the bare wire format.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio_util::codec::{Decoder, Encoder};

use concord::compress::CompressionAlgorithm;
use concord::digest::DigestAlgorithm;
use concord::{Frame, FrameCodec, FrameCodecOptions, FrameType};

fn encode_decode_round_trip(c: &mut Criterion, name: &str, options: FrameCodecOptions, payload_len: usize) {
    let payload = vec![0x42u8; payload_len];

    c.bench_function(&format!("encode/{name}"), |b| {
        b.iter(|| {
            let mut codec = FrameCodec::new(options);
            let frame = Frame::new(FrameType::CommandReq, payload.clone()).with_exchange(1).with_slot(0, 1);
            let mut buf = BytesMut::new();
            codec.encode(frame, &mut buf).unwrap();
            black_box(buf);
        })
    });

    let mut codec = FrameCodec::new(options);
    let mut encoded = BytesMut::new();
    let frame = Frame::new(FrameType::CommandReq, payload.clone()).with_exchange(1).with_slot(0, 1);
    codec.encode(frame, &mut encoded).unwrap();

    c.bench_function(&format!("decode/{name}"), |b| {
        b.iter(|| {
            let mut codec = FrameCodec::new(options);
            let mut buf = encoded.clone();
            let decoded = codec.decode(&mut buf).unwrap();
            black_box(decoded);
        })
    });
}

fn bare_frame(c: &mut Criterion) {
    encode_decode_round_trip(c, "bare-1kb", FrameCodecOptions::default(), 1024);
}

fn digest_and_compression(c: &mut Criterion) {
    let options = FrameCodecOptions {
        header_digest: DigestAlgorithm::Crc32,
        frame_digest: DigestAlgorithm::Crc32,
        payload_digest: DigestAlgorithm::Crc32,
        digest_data: false,
        compression: CompressionAlgorithm::Deflate,
    };
    encode_decode_round_trip(c, "crc32-deflate-16kb", options, 16 * 1024);
}

criterion_group!(benches, bare_frame, digest_and_compression);
criterion_main!(benches);
