//! # FileBeam Protocol
//!
//! This crate defines the wire-level contract between the FileBeam daemon
//! and its clients:
//!
//! - **Messages**: JSON request/response shapes for the command channel
//! - **Virtual paths**: normalization and join utilities for the
//!   forward-slash virtual namespace shared by all mounts
//! - **Codec**: message encoding with size limits
//!
//! Bundle *metadata* always travels over the command channel as small JSON
//! messages; bundle *bytes* travel out-of-band over whichever transport the
//! client negotiated.

pub mod codec;
pub mod error;
pub mod messages;
pub mod vpath;

pub use codec::{decode_request, decode_response, encode_request, encode_response, MAX_MESSAGE_SIZE};
pub use error::{ProtocolError, Result};
pub use messages::{
    BundleInfo, CommandResult, ErrorCode, ErrorMessage, FileKind, FileRecord, Listing, Request,
    Response, COMMAND_FETCH, COMMAND_LIST, PROTOCOL_VERSION,
};
