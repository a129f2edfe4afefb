//! Byte encodings for [`Frame`]s.
//!
//! Both codecs are incremental: feed arbitrary chunks as they arrive and pull
//! complete frames out. A frame that fails to decode is consumed, so decoding
//! resumes with the frame after it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::messages::Frame;

/// Largest frame either codec will buffer.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Incremental frame encoder/decoder.
pub trait FrameCodec {
    /// Encode one frame.
    fn encode(&self, frame: &Frame) -> Result<Bytes>;

    /// Append received bytes.
    fn feed(&mut self, chunk: &[u8]);

    /// Next complete frame, if one is buffered.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Decode every complete frame buffered so far.
    fn drain(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

fn classify(value: Value) -> Result<Frame> {
    Frame::from_value(value).map_err(SyncError::from)
}

fn trim(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

/// One JSON document per `\n`-terminated line.
#[derive(Debug, Clone, Default)]
pub struct JsonLinesCodec {
    buffer: BytesMut,
    /// Dropping the rest of an oversized line.
    discarding: bool,
}

impl JsonLinesCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl FrameCodec for JsonLinesCodec {
    fn encode(&self, frame: &Frame) -> Result<Bytes> {
        let mut line = serde_json::to_vec(&frame.to_value()?)
            .map_err(|e| SyncError::Codec(e.to_string()))?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }

    fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let Some(end) = self.buffer.iter().position(|b| *b == b'\n') else {
                if self.discarding {
                    self.buffer.clear();
                } else if self.buffer.len() > MAX_FRAME_LEN {
                    self.buffer.clear();
                    self.discarding = true;
                    return Err(SyncError::Codec(format!(
                        "line exceeds {MAX_FRAME_LEN} bytes"
                    )));
                }
                return Ok(None);
            };
            let line = self.buffer.split_to(end + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let line = trim(&line[..end]);
            if line.is_empty() {
                continue;
            }
            let value: Value =
                serde_json::from_slice(line).map_err(|e| SyncError::Codec(e.to_string()))?;
            return classify(value).map(Some);
        }
    }
}

/// CBOR body behind a big-endian `u32` length prefix.
#[derive(Debug, Clone)]
pub struct CborCodec {
    buffer: BytesMut,
    max_frame_len: usize,
    /// Bytes of an oversized frame still to drop.
    skip: usize,
}

impl Default for CborCodec {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_len: MAX_FRAME_LEN,
            skip: 0,
        }
    }
}

impl CborCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl FrameCodec for CborCodec {
    fn encode(&self, frame: &Frame) -> Result<Bytes> {
        let mut body = Vec::new();
        ciborium::into_writer(&frame.to_value()?, &mut body)
            .map_err(|e| SyncError::Codec(e.to_string()))?;
        if body.len() > self.max_frame_len {
            return Err(SyncError::Codec(format!(
                "frame of {} bytes exceeds {}",
                body.len(),
                self.max_frame_len
            )));
        }
        let mut out = BytesMut::with_capacity(4 + body.len());
        out.put_u32(body.len() as u32);
        out.extend_from_slice(&body);
        Ok(out.freeze())
    }

    fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.skip > 0 {
            let n = self.skip.min(self.buffer.len());
            self.buffer.advance(n);
            self.skip -= n;
            if self.skip > 0 {
                return Ok(None);
            }
        }
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if len > self.max_frame_len {
            self.buffer.advance(4);
            self.skip = len;
            return Err(SyncError::Codec(format!(
                "frame of {len} bytes exceeds {}",
                self.max_frame_len
            )));
        }
        if self.buffer.len() < 4 + len {
            return Ok(None);
        }
        self.buffer.advance(4);
        let body = self.buffer.split_to(len);
        let value: Value =
            ciborium::from_reader(&body[..]).map_err(|e| SyncError::Codec(e.to_string()))?;
        classify(value).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Digest;
    use proptest::prelude::*;
    use scuttle_core::{SourceId, Sources, Timestamp, Update};
    use serde_json::json;

    fn frames() -> Vec<Frame> {
        let a = SourceId::new("A").unwrap();
        let mut clock = Sources::new();
        clock.advance(&a, Timestamp(7));
        vec![
            Frame::Digest(Digest::new(a.clone(), clock)),
            Frame::Update(
                Update::new(json!(["k", {"nested": [1, 2]}]), Timestamp(7), a.clone())
                    .forwarded(&SourceId::new("B").unwrap()),
            ),
            Frame::Update(Update::new(json!(["e", "x", null]), Timestamp(8), a)),
            Frame::Sync,
        ]
    }

    fn encode_all(codec: &impl FrameCodec) -> Vec<u8> {
        let mut wire = Vec::new();
        for frame in frames() {
            wire.extend_from_slice(&codec.encode(&frame).unwrap());
        }
        wire
    }

    #[test]
    fn test_json_lines_wire_format() {
        let codec = JsonLinesCodec::new();
        let bytes = codec.encode(&Frame::Sync).unwrap();
        assert_eq!(&bytes[..], b"\"SYNC\"\n");
    }

    #[test]
    fn test_json_lines_skips_blank_lines() {
        let mut codec = JsonLinesCodec::new();
        codec.feed(b"\n\r\n\"SYNC\"\r\n");
        assert_eq!(codec.next_frame().unwrap(), Some(Frame::Sync));
        assert_eq!(codec.next_frame().unwrap(), None);
        assert_eq!(codec.pending(), 0);
    }

    #[test]
    fn test_json_lines_rejects_garbage() {
        let mut codec = JsonLinesCodec::new();
        codec.feed(b"{not json\n");
        assert!(matches!(codec.next_frame(), Err(SyncError::Codec(_))));

        let mut codec = JsonLinesCodec::new();
        codec.feed(b"42\n");
        assert!(matches!(codec.next_frame(), Err(SyncError::Core(_))));
    }

    #[test]
    fn test_cbor_length_prefix() {
        let codec = CborCodec::new();
        let bytes = codec.encode(&Frame::Sync).unwrap();
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - 4);
    }

    #[test]
    fn test_cbor_rejects_oversized_frames() {
        let mut codec = CborCodec::new().with_max_frame_len(16);
        codec.feed(&1024u32.to_be_bytes());
        assert!(matches!(codec.next_frame(), Err(SyncError::Codec(_))));
    }

    #[test]
    fn test_cbor_resumes_after_oversized_frame() {
        let mut codec = CborCodec::new().with_max_frame_len(16);
        codec.feed(&32u32.to_be_bytes());
        codec.feed(&[0u8; 20]);
        assert!(codec.next_frame().is_err());
        assert_eq!(codec.next_frame().unwrap(), None);
        codec.feed(&[0u8; 12]);
        let sync = codec.encode(&Frame::Sync).unwrap();
        codec.feed(&sync);
        assert_eq!(codec.next_frame().unwrap(), Some(Frame::Sync));
        assert_eq!(codec.pending(), 0);
    }

    #[test]
    fn test_json_lines_resumes_after_bad_line() {
        let mut codec = JsonLinesCodec::new();
        codec.feed(b"{not json\n\"SYNC\"\n");
        assert!(codec.next_frame().is_err());
        assert_eq!(codec.next_frame().unwrap(), Some(Frame::Sync));

        codec.feed(&vec![b'x'; MAX_FRAME_LEN + 1]);
        assert!(codec.next_frame().is_err());
        codec.feed(b"still the same line\n\"SYNC\"\n");
        assert_eq!(codec.next_frame().unwrap(), Some(Frame::Sync));
        assert_eq!(codec.pending(), 0);
    }

    proptest! {
        #[test]
        fn test_json_lines_any_chunking(cuts in prop::collection::vec(1usize..17, 1..40)) {
            let mut codec = JsonLinesCodec::new();
            let wire = encode_all(&codec);
            let mut decoded = Vec::new();
            let mut rest = &wire[..];
            for cut in cuts.iter().cycle() {
                if rest.is_empty() {
                    break;
                }
                let n = (*cut).min(rest.len());
                codec.feed(&rest[..n]);
                rest = &rest[n..];
                decoded.extend(codec.drain().unwrap());
            }
            prop_assert_eq!(decoded, frames());
        }

        #[test]
        fn test_cbor_any_chunking(cuts in prop::collection::vec(1usize..17, 1..40)) {
            let mut codec = CborCodec::new();
            let wire = encode_all(&codec);
            let mut decoded = Vec::new();
            let mut rest = &wire[..];
            for cut in cuts.iter().cycle() {
                if rest.is_empty() {
                    break;
                }
                let n = (*cut).min(rest.len());
                codec.feed(&rest[..n]);
                rest = &rest[n..];
                decoded.extend(codec.drain().unwrap());
            }
            prop_assert_eq!(decoded, frames());
        }
    }
}
