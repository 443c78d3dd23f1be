//! Property tests: parsing must not depend on how bytes are split in transit.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use h1_wire::http::request::parse_request;
use h1_wire::http::response::{encode_chunk, LAST_CHUNK};
use h1_wire::http::{BodyReader, FrameBuffer, ParseLimits};
use h1_wire::ws::{Frame, FrameCodec, OpCode, Role};
use proptest::prelude::*;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::codec::{Decoder, Encoder};

/// Yields a fixed byte string in the given fragments, then EOF.
struct Fragments(VecDeque<Vec<u8>>);

impl Fragments {
    fn new(data: &[u8], cuts: &[usize]) -> Self {
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (data.len() + 1)).collect();
        points.sort_unstable();
        points.dedup();
        let mut chunks = VecDeque::new();
        let mut start = 0;
        for point in points.into_iter().chain(std::iter::once(data.len())) {
            if point > start {
                chunks.push_back(data[start..point].to_vec());
                start = point;
            }
        }
        Fragments(chunks)
    }
}

impl AsyncRead for Fragments {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(mut chunk) = self.0.pop_front() {
            let n = chunk.len().min(buf.remaining());
            buf.put_slice(&chunk[..n]);
            if n < chunk.len() {
                self.0.push_front(chunk.split_off(n));
            }
        }
        Poll::Ready(Ok(()))
    }
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

async fn read_body(reader: &mut BodyReader, src: &mut FrameBuffer<Fragments>) -> Vec<u8> {
    let mut body = Vec::new();
    let mut out = [0u8; 7];
    loop {
        let n = reader.read(src, &mut out).await.unwrap();
        if n == 0 {
            return body;
        }
        body.extend_from_slice(&out[..n]);
    }
}

fn header_value() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ;=/.-]{0,40}"
}

proptest! {
    #[test]
    fn request_parse_ignores_fragmentation(
        values in prop::collection::vec(header_value(), 0..6),
        body in prop::collection::vec(any::<u8>(), 0..300),
        cuts in prop::collection::vec(any::<usize>(), 0..20),
    ) {
        let mut wire = format!("POST /upload?id=1 HTTP/1.1\r\nContent-Length: {}\r\n", body.len());
        for (i, value) in values.iter().enumerate() {
            wire.push_str(&format!("X-Field-{i}: {value}\r\n"));
        }
        wire.push_str("\r\n");
        let mut wire = wire.into_bytes();
        wire.extend_from_slice(&body);

        let parse = |cuts: &[usize]| {
            block_on(async {
                let mut src = FrameBuffer::new(Fragments::new(&wire, cuts));
                let (request, mut reader) = parse_request(&mut src, &ParseLimits::default()).await.unwrap().unwrap();
                let body = read_body(&mut reader, &mut src).await;
                (request, body)
            })
        };

        let (whole_request, whole_body) = parse(&[]);
        let (split_request, split_body) = parse(&cuts);
        prop_assert_eq!(&whole_body, &body);
        prop_assert_eq!(split_request, whole_request);
        prop_assert_eq!(split_body, whole_body);
    }

    #[test]
    fn chunked_body_round_trips(
        body in prop::collection::vec(any::<u8>(), 0..600),
        sizes in prop::collection::vec(1usize..64, 1..10),
        cuts in prop::collection::vec(any::<usize>(), 0..20),
    ) {
        let mut wire = BytesMut::new();
        let mut rest = &body[..];
        let mut sizes = sizes.iter().cycle();
        while !rest.is_empty() {
            let n = sizes.next().copied().unwrap_or(1).min(rest.len());
            encode_chunk(&rest[..n], &mut wire);
            rest = &rest[n..];
        }
        wire.extend_from_slice(LAST_CHUNK);
        wire.extend_from_slice(b"GET /next HTTP/1.1\r\n\r\n");

        let (decoded, next) = block_on(async {
            let mut src = FrameBuffer::new(Fragments::new(&wire, &cuts));
            let mut reader = BodyReader::chunked();
            let decoded = read_body(&mut reader, &mut src).await;
            let next = parse_request(&mut src, &ParseLimits::default()).await.unwrap().unwrap().0;
            (decoded, next)
        });
        prop_assert_eq!(decoded, body);
        prop_assert_eq!(next.target, "/next");
    }

    #[test]
    fn frame_decode_ignores_fragmentation(
        payload in prop::collection::vec(any::<u8>(), 0..70_000),
        cuts in prop::collection::vec(any::<usize>(), 0..8),
    ) {
        let mut wire = BytesMut::new();
        FrameCodec::new(Role::Client, 1 << 20)
            .encode(Frame::binary(payload.clone()), &mut wire)
            .unwrap();

        let mut points: Vec<usize> = cuts.iter().map(|c| c % wire.len()).collect();
        points.sort_unstable();

        let mut decoder = FrameCodec::new(Role::Server, 1 << 20);
        let mut src = BytesMut::new();
        let mut start = 0;
        for point in points {
            src.extend_from_slice(&wire[start..point.max(start)]);
            start = point.max(start);
            prop_assert!(decoder.decode(&mut src).unwrap().is_none());
        }
        src.extend_from_slice(&wire[start..]);
        let frame = decoder.decode(&mut src).unwrap().unwrap();
        prop_assert!(frame.fin);
        prop_assert_eq!(frame.opcode, OpCode::Binary);
        prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
        prop_assert!(src.is_empty());
    }
}
