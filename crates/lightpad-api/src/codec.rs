//! Frame layer of the Lightpad control channel.
//!
//! Every message on the socket is a fixed 10-byte big-endian header
//! followed by a body:
//!
//! ```text
//! +------+-------+-----------+-----------+----------------+
//! | kind | flags |  seq u32  |  len u32  |  body (len B)  |
//! +------+-------+-----------+-----------+----------------+
//! ```
//!
//! `kind` is the lane discriminator: command replies and push events
//! share the socket and are told apart only by this byte. `seq`
//! correlates a reply with its request and is zero on events.
//!
//! [`FrameCodec`] decodes as a two-state machine
//! (`AwaitingHeader` → `AwaitingBody` → frame → `AwaitingHeader`).
//! An oversized length or a stream ending mid-frame moves it to
//! `Failed`, which is terminal for that codec instance.

use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::DecodeError;

pub const HEADER_LEN: usize = 10;

/// Largest body the decoder accepts. Lightpad messages are small JSON
/// documents; anything bigger means the stream is out of sync.
pub const MAX_BODY_LEN: usize = 64 * 1024;

// ── Frame ────────────────────────────────────────────────────────────

/// Lane discriminator carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Client → device: session handshake carrying the house access token.
    Hello,
    /// Client → device: imperative request.
    Command,
    /// Device → client: answer to a `Hello` or `Command` with the same `seq`.
    Reply,
    /// Device → client: unsolicited state notification.
    Event,
    /// Any discriminator this client does not know.
    Other(u8),
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => Self::Hello,
            0x02 => Self::Command,
            0x03 => Self::Reply,
            0x04 => Self::Event,
            other => Self::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Hello => 0x01,
            Self::Command => 0x02,
            Self::Reply => 0x03,
            Self::Event => 0x04,
            Self::Other(b) => b,
        }
    }
}

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub seq: u32,
    pub body: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, seq: u32, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            seq,
            body: body.into(),
        }
    }

    /// Build a frame whose body is `value` serialized as JSON.
    pub fn json(kind: FrameKind, seq: u32, value: &impl Serialize) -> serde_json::Result<Self> {
        Ok(Self::new(kind, seq, serde_json::to_vec(value)?))
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

// ── Codec ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Header {
    kind: FrameKind,
    seq: u32,
    len: usize,
}

#[derive(Debug, Clone, Copy, Default)]
enum DecodeState {
    #[default]
    AwaitingHeader,
    AwaitingBody(Header),
    Failed,
}

/// Length-prefixed codec for [`Frame`]s.
#[derive(Debug)]
pub struct FrameCodec {
    state: DecodeState,
    max_body: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_body(MAX_BODY_LEN)
    }

    pub fn with_max_body(max_body: usize) -> Self {
        Self {
            state: DecodeState::AwaitingHeader,
            max_body,
        }
    }

    /// `true` once the decoder has hit a fatal error.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, DecodeState::Failed)
    }

    fn fail(&mut self, err: DecodeError) -> DecodeError {
        self.state = DecodeState::Failed;
        err
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, DecodeError> {
        loop {
            match self.state {
                DecodeState::Failed => return Err(DecodeError::Poisoned),
                DecodeState::AwaitingHeader => {
                    if src.len() < HEADER_LEN {
                        src.reserve(HEADER_LEN - src.len());
                        return Ok(None);
                    }
                    let kind = FrameKind::from_byte(src.get_u8());
                    let _flags = src.get_u8();
                    let seq = src.get_u32();
                    let len = usize::try_from(src.get_u32()).unwrap_or(usize::MAX);

                    if len > self.max_body {
                        return Err(self.fail(DecodeError::Oversized {
                            len,
                            max: self.max_body,
                        }));
                    }

                    src.reserve(len);
                    self.state = DecodeState::AwaitingBody(Header { kind, seq, len });
                }
                DecodeState::AwaitingBody(header) => {
                    if src.len() < header.len {
                        return Ok(None);
                    }
                    let body = src.split_to(header.len).freeze();
                    self.state = DecodeState::AwaitingHeader;
                    return Ok(Some(Frame {
                        kind: header.kind,
                        seq: header.seq,
                        body,
                    }));
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, DecodeError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        let mid_frame = matches!(self.state, DecodeState::AwaitingBody(_)) || !buf.is_empty();
        if mid_frame {
            let buffered = buf.len();
            return Err(self.fail(DecodeError::TruncatedFrame { buffered }));
        }
        Ok(None)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), std::io::Error> {
        let len = u32::try_from(frame.body.len())
            .ok()
            .filter(|_| frame.body.len() <= self.max_body)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("frame body of {} bytes exceeds limit", frame.body.len()),
                )
            })?;

        dst.reserve(HEADER_LEN + frame.body.len());
        dst.put_u8(frame.kind.as_byte());
        dst.put_u8(0);
        dst.put_u32(frame.seq);
        dst.put_u32(len);
        dst.extend_from_slice(&frame.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio_util::codec::FramedRead;

    fn encoded(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn header_layout_is_big_endian() {
        let buf = encoded(Frame::new(FrameKind::Reply, 0x0102_0304, &b"{}"[..]));
        assert_eq!(
            &buf[..HEADER_LEN],
            &[0x03, 0x00, 0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x00, 0x02]
        );
        assert_eq!(&buf[HEADER_LEN..], b"{}");
    }

    #[test]
    fn decodes_across_partial_reads() {
        let frame = Frame::new(FrameKind::Event, 0, &br#"{"type":"power","watts":12}"#[..]);
        let full = encoded(frame.clone());
        let mut codec = FrameCodec::new();
        let mut src = BytesMut::new();

        // Header split in two, then the body byte by byte.
        src.extend_from_slice(&full[..4]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&full[4..HEADER_LEN]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        for b in &full[HEADER_LEN..full.len() - 1] {
            src.put_u8(*b);
            assert!(codec.decode(&mut src).unwrap().is_none());
        }
        src.put_u8(full[full.len() - 1]);

        assert_eq!(codec.decode(&mut src).unwrap(), Some(frame));
        assert!(src.is_empty());
    }

    #[test]
    fn back_to_back_frames_keep_order() {
        let mut src = BytesMut::new();
        for seq in 1..=3 {
            src.extend_from_slice(&encoded(Frame::new(FrameKind::Reply, seq, &b"ok"[..])));
        }
        let mut codec = FrameCodec::new();
        let seqs: Vec<u32> = std::iter::from_fn(|| codec.decode(&mut src).unwrap())
            .map(|f| f.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn empty_body_is_a_frame() {
        let mut src = encoded(Frame::new(FrameKind::Event, 0, Bytes::new()));
        let frame = FrameCodec::new().decode(&mut src).unwrap().unwrap();
        assert!(frame.body.is_empty());
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let mut src = encoded(Frame::new(FrameKind::Other(0x7f), 9, &b"?"[..]));
        let frame = FrameCodec::new().decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Other(0x7f));
        assert_eq!(frame.kind.as_byte(), 0x7f);
    }

    #[test]
    fn oversized_length_fails_and_poisons() {
        let mut codec = FrameCodec::with_max_body(8);
        let mut src = BytesMut::new();
        src.put_u8(0x04);
        src.put_u8(0);
        src.put_u32(0);
        src.put_u32(9);

        assert!(matches!(
            codec.decode(&mut src),
            Err(DecodeError::Oversized { len: 9, max: 8 })
        ));
        assert!(codec.is_failed());
        assert!(matches!(codec.decode(&mut src), Err(DecodeError::Poisoned)));
    }

    #[test]
    fn eof_mid_body_is_truncation() {
        let full = encoded(Frame::new(FrameKind::Event, 0, &b"abcdef"[..]));
        let mut src = BytesMut::from(&full[..HEADER_LEN + 2]);
        let mut codec = FrameCodec::new();

        assert!(codec.decode(&mut src).unwrap().is_none());
        assert!(matches!(
            codec.decode_eof(&mut src),
            Err(DecodeError::TruncatedFrame { buffered: 2 })
        ));
    }

    #[test]
    fn clean_eof_between_frames() {
        let mut src = BytesMut::new();
        assert!(FrameCodec::new().decode_eof(&mut src).unwrap().is_none());
    }

    #[test]
    fn encode_rejects_oversized_body() {
        let mut codec = FrameCodec::with_max_body(4);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Frame::new(FrameKind::Command, 1, &b"12345"[..]), &mut dst)
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(dst.is_empty());
    }

    #[tokio::test]
    async fn framed_read_over_chunked_socket() {
        let a = encoded(Frame::new(FrameKind::Event, 0, &br#"{"type":"power","watts":3}"#[..]));
        let b = encoded(Frame::new(FrameKind::Reply, 7, &br#"{"status":200}"#[..]));
        let mut joined = a.to_vec();
        joined.extend_from_slice(&b);
        let (first, rest) = joined.split_at(HEADER_LEN + 5);

        let mock = tokio_test::io::Builder::new().read(first).read(rest).build();
        let mut framed = FramedRead::new(mock, FrameCodec::new());

        let f1 = framed.next().await.unwrap().unwrap();
        let f2 = framed.next().await.unwrap().unwrap();
        assert_eq!(f1.kind, FrameKind::Event);
        assert_eq!(f2.kind, FrameKind::Reply);
        assert_eq!(f2.seq, 7);
        assert!(framed.next().await.is_none());
    }
}
