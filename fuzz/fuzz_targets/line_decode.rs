#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use peer_link::core::codec::LineCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Decoded frames plus delimiters must account for every consumed byte
    let mut codec = LineCodec::with_max_length(4096);
    let mut buf = BytesMut::from(data);
    let mut consumed = 0;
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        assert!(!frame.contains(&b'\n'));
        consumed += frame.len() + 1;
    }
    assert_eq!(consumed + buf.len(), data.len());
});
