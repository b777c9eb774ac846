//! Message codec for the command channel.
//!
//! Commands travel as single JSON messages over a transport that already
//! provides message framing (WebSocket). The codec only enforces a size
//! ceiling so one oversized message cannot exhaust the peer.

use crate::error::{ProtocolError, Result};
use crate::messages::{Request, Response};

/// Maximum encoded message size (1 MB). Command messages carry metadata
/// only; bundle bytes never travel over the command channel.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Encode a request into JSON bytes.
pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    encode(serde_json::to_vec(request)?)
}

/// Encode a response into JSON bytes.
pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    encode(serde_json::to_vec(response)?)
}

/// Decode a request from JSON bytes.
pub fn decode_request(data: &[u8]) -> Result<Request> {
    check_size(data.len())?;
    Ok(serde_json::from_slice(data)?)
}

/// Decode a response from JSON bytes.
pub fn decode_response(data: &[u8]) -> Result<Response> {
    check_size(data.len())?;
    Ok(serde_json::from_slice(data)?)
}

fn encode(bytes: Vec<u8>) -> Result<Vec<u8>> {
    check_size(bytes.len())?;
    Ok(bytes)
}

fn check_size(size: usize) -> Result<()> {
    if size > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}
