//! Framing for the process side of the bridge.
//!
//! Process standard output is decoded in one of three disciplines:
//! - text: one frame per `\n`-terminated line, terminator stripped
//! - binary: one frame per read call
//! - size-header: 4 reserved bytes, a 4-byte big-endian length, then the payload
//!
//! The connection side uses a narrower 4-byte length header, produced by
//! [`length_header`].

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    encode_size_header_frame, length_header, trim_eol, Frame, FramingMode, ProcessCodec,
    BINARY_READ_BUFFER, DEFAULT_MAX_FRAME_SIZE, LENGTH_HEADER_SIZE, SIZE_HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
