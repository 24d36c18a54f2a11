use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::error::{FrameError, Result};

/// Process-facing size header: reserved (4) + length (4) = 8 bytes.
pub const SIZE_HEADER_SIZE: usize = 8;

/// Connection-facing length header: length (4) only.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Default maximum frame size in size-header mode: 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Read buffer used in binary mode: 10 MiB.
pub const BINARY_READ_BUFFER: usize = 10 * 1024 * 1024;

const LINE_READ_BUFFER: usize = 8 * 1024;

/// One unit of payload crossing an endpoint boundary.
///
/// The payload is owned by the frame: it is either a region split off a read
/// buffer or a copy out of one, so consumers may hold it past the producer's
/// next read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Build a frame from a copy of `data`.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(data),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        self.payload.as_ref()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<&'static [u8]> for Frame {
    fn from(payload: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(payload))
    }
}

/// How process standard output is cut into frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FramingMode {
    /// One frame per line; `\n` and a preceding `\r` are stripped.
    #[default]
    Text,
    /// One frame per read call.
    Binary,
    /// Explicit 8-byte header per frame; lengths `>= max_frame_size` are rejected.
    SizeHeader { max_frame_size: usize },
}

impl FramingMode {
    /// Pick the mode for an endpoint configuration. Size-header wins over
    /// both binary and text.
    pub fn select(binary: bool, size_header: bool, max_frame_size: usize) -> Self {
        if size_header {
            FramingMode::SizeHeader { max_frame_size }
        } else if binary {
            FramingMode::Binary
        } else {
            FramingMode::Text
        }
    }

    /// Initial read buffer capacity for this mode.
    pub fn read_capacity(self) -> usize {
        match self {
            FramingMode::Binary => BINARY_READ_BUFFER,
            FramingMode::Text | FramingMode::SizeHeader { .. } => LINE_READ_BUFFER,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FramingMode::Text => "text",
            FramingMode::Binary => "binary",
            FramingMode::SizeHeader { .. } => "size-header",
        }
    }
}

/// Strip a trailing `\n`, and a `\r` before it, from `line`.
pub fn trim_eol(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
    }
    &line[..end]
}

/// Build the connection-facing length header frame for a payload of `len` bytes.
///
/// Wire format:
/// ```text
/// ┌─────────────────┐
/// │ Length (4B BE)  │
/// └─────────────────┘
/// ```
pub fn length_header(len: usize) -> Result<Frame> {
    let len32 = u32::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;
    Ok(Frame::new(Bytes::copy_from_slice(&len32.to_be_bytes())))
}

/// Encode a payload in the process-facing size-header format.
///
/// Wire format:
/// ```text
/// ┌───────────────┬─────────────────┬─────────────────┐
/// │ Reserved (4B) │ Length (4B BE)  │ Payload         │
/// │ zero on write │                 │ (Length bytes)  │
/// └───────────────┴─────────────────┴─────────────────┘
/// ```
pub fn encode_size_header_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len32 = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(SIZE_HEADER_SIZE + payload.len());
    dst.put_u32(0);
    dst.put_u32(len32);
    dst.put_slice(payload);
    Ok(())
}

/// Decoder for process standard output in any [`FramingMode`].
#[derive(Debug, Clone, Default)]
pub struct ProcessCodec {
    mode: FramingMode,
    // Text mode: bytes already scanned for `\n` without a match.
    next_index: usize,
    max_line_length: Option<usize>,
    // Text mode: dropping the rest of an overlong line.
    discarding: bool,
}

impl ProcessCodec {
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Cap text-mode lines at `max` bytes. Longer lines are truncated to
    /// `max` and the remainder up to the next `\n` is dropped.
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = Some(max);
        self
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    fn decode_line(&mut self, src: &mut BytesMut) -> Option<Frame> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match newline {
                Some(end) if self.discarding => {
                    src.advance(end + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                None if self.discarding => {
                    src.clear();
                    self.next_index = 0;
                    return None;
                }
                Some(end) => {
                    self.next_index = 0;
                    let line = src.split_to(end + 1).freeze();
                    let mut kept = trim_eol(&line).len();
                    if let Some(max) = self.max_line_length.filter(|max| kept > *max) {
                        warn!(length = kept, max, "line exceeds maximum length, truncated");
                        kept = max;
                    }
                    return Some(Frame::new(line.slice(..kept)));
                }
                None => match self.max_line_length {
                    Some(max) if src.len() > max => {
                        warn!(max, "line exceeds maximum length, truncated");
                        self.next_index = 0;
                        self.discarding = true;
                        return Some(Frame::new(src.split_to(max).freeze()));
                    }
                    _ => {
                        self.next_index = src.len();
                        return None;
                    }
                },
            }
        }
    }
}

fn decode_chunk(src: &mut BytesMut) -> Option<Frame> {
    if src.is_empty() {
        return None;
    }
    // The read buffer is reused for the next read; the frame gets its own copy.
    let frame = Frame::copy_from_slice(src);
    src.clear();
    Some(frame)
}

fn decode_size_header(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Frame>> {
    if src.len() < SIZE_HEADER_SIZE {
        return Ok(None);
    }

    // Bytes 0..4 are reserved and ignored.
    let declared = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

    if declared >= max_frame_size {
        return Err(FrameError::PayloadTooLarge {
            size: declared,
            max: max_frame_size,
        });
    }

    let total = SIZE_HEADER_SIZE + declared;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(SIZE_HEADER_SIZE);
    debug!(size = declared, "size-header frame received");
    Ok(Some(Frame::new(src.split_to(declared).freeze())))
}

impl Decoder for ProcessCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.mode {
            FramingMode::Text => Ok(self.decode_line(src)),
            FramingMode::Binary => Ok(decode_chunk(src)),
            FramingMode::SizeHeader { max_frame_size } => decode_size_header(src, max_frame_size),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let buffered = src.len();
        src.clear();
        self.next_index = 0;
        self.discarding = false;
        match self.mode {
            FramingMode::SizeHeader { .. } => Err(FrameError::Truncated { buffered }),
            FramingMode::Text | FramingMode::Binary => {
                debug!(discarded = buffered, "dropping unterminated trailing line");
                Ok(None)
            }
        }
    }
}
