//! Wire codec and frame reassembly for the MTL debugger IPC protocol.
//!
//! Every message on the remote controller's stdio is framed with:
//! - A 36-byte ASCII UUID message id (all zeroes for unsolicited events)
//! - A 4-byte little-endian command code
//! - A 4-byte little-endian kind (response kind, or the command for requests)
//! - A 4-byte little-endian payload length
//!
//! The [`Reassembler`] turns arbitrarily chunked output into whole frames.

pub mod codec;
pub mod command;
pub mod error;
pub mod reassembler;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, decode_header, encode_frame, encode_response, Frame, FrameConfig, FrameHeader,
    MessageId, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MESSAGE_ID_LEN,
};
pub use command::{Command, ParseCommandError, ResponseKind};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use reassembler::Reassembler;
pub use writer::FrameWriter;
