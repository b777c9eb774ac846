//! Protocol message definitions for FileBeam.
//!
//! This module defines the command-channel message types exchanged between
//! the daemon and clients. All messages are serialized as JSON; field names
//! use camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Command name for fetching a bundle.
pub const COMMAND_FETCH: &str = "fetch";

/// Command name for listing a virtual directory.
pub const COMMAND_LIST: &str = "list";

/// A command request sent from a client to the daemon.
///
/// The command tag is carried as a plain string rather than an enum so the
/// daemon can name unrecognized commands in its error result instead of
/// failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Request identifier for response pairing, unique per connection.
    pub id: u64,
    /// Command tag: `"fetch"`, `"list"`, or anything else (rejected).
    pub name: String,
    /// Virtual path argument. Absent means the namespace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Named transport for bundle delivery. Absent means the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
}

impl Request {
    /// Create a `fetch` request.
    pub fn fetch(id: u64, path: Option<String>, transport: Option<String>) -> Self {
        Self {
            id,
            name: COMMAND_FETCH.to_string(),
            path,
            transport,
        }
    }

    /// Create a `list` request.
    pub fn list(id: u64, path: Option<String>) -> Self {
        Self {
            id,
            name: COMMAND_LIST.to_string(),
            path,
            transport: None,
        }
    }
}

/// A response paired to a request by id. Exactly one of `result` and
/// `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Identifier of the request this response answers.
    pub id: u64,
    /// Successful command result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
    /// Error result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMessage>,
}

impl Response {
    /// Build a success response.
    pub fn ok(id: u64, result: CommandResult) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn err(id: u64, error: ErrorMessage) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Successful result payload of a command.
///
/// Untagged on the wire: a bundle result carries an `id`, a listing does
/// not, so the two shapes are unambiguous. `Bundle` must be tried first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandResult {
    /// Result of a `fetch` command.
    Bundle(BundleInfo),
    /// Result of a `list` command.
    Listing(Listing),
}

/// Bundle metadata returned by a `fetch` command.
///
/// Only metadata travels here; the bytes are delivered by the transport
/// the bundle was served through, addressed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleInfo {
    /// Opaque bundle identifier (64 hex characters, 256 bits).
    pub id: String,
    /// Records of the files in the bundle, in delivery order.
    pub files: Vec<FileRecord>,
}

/// Directory listing returned by a `list` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Entries of the listed virtual directory.
    pub files: Vec<FileRecord>,
}

/// A single file or directory record.
///
/// Records are produced fresh for every request and never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Entry name (virtual, relative to the listed or fetched path).
    pub name: String,
    /// Entry kind.
    pub kind: FileKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds).
    pub modified_at: u64,
    /// Child records, present only when `kind` is `directory`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileRecord>>,
}

impl FileRecord {
    /// Create a file record.
    pub fn file(name: impl Into<String>, size: u64, modified_at: u64) -> Self {
        Self {
            name: name.into(),
            kind: FileKind::File,
            size,
            modified_at,
            children: None,
        }
    }

    /// Create a directory record with no children attached.
    pub fn directory(name: impl Into<String>, modified_at: u64) -> Self {
        Self {
            name: name.into(),
            kind: FileKind::Directory,
            size: 0,
            modified_at,
            children: None,
        }
    }
}

/// Kind of a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// Machine-readable error code carried in an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No mount endpoint is a prefix of the requested path.
    NoSuchMount,
    /// The backend has no entry at the resolved path.
    NotFound,
    /// The backend refused access to the resolved path.
    AccessDenied,
    /// A transport was named but is not registered.
    UnknownTransport,
    /// The command tag is not recognized.
    InvalidCommand,
    /// Unexpected server-side failure.
    Internal,
}

/// Error payload of a failed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error classification.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl ErrorMessage {
    /// Create an error message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let req = Request::fetch(7, Some("docs/readme.txt".to_string()), None);
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn test_request_optional_fields_omitted() {
        let req = Request::list(1, None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("path"));
        assert!(!json.contains("transport"));
    }

    #[test]
    fn test_unknown_command_still_deserializes() {
        let json = r#"{"id": 3, "name": "delete"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        assert_eq!(req.name, "delete");
        assert_eq!(req.path, None);
    }

    #[test]
    fn test_file_record_wire_shape() {
        let record = FileRecord::file("readme.txt", 42, 1704067200);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "file");
        assert_eq!(json["modifiedAt"], 1704067200);
        assert!(json.get("children").is_none());
    }

    #[test]
    fn test_result_disambiguation() {
        let bundle = CommandResult::Bundle(BundleInfo {
            id: "ab".repeat(32),
            files: vec![FileRecord::file("a", 1, 0)],
        });
        let listing = CommandResult::Listing(Listing {
            files: vec![FileRecord::directory("a", 0)],
        });

        let bundle_json = serde_json::to_string(&bundle).unwrap();
        let listing_json = serde_json::to_string(&listing).unwrap();

        assert!(matches!(
            serde_json::from_str::<CommandResult>(&bundle_json).unwrap(),
            CommandResult::Bundle(_)
        ));
        assert!(matches!(
            serde_json::from_str::<CommandResult>(&listing_json).unwrap(),
            CommandResult::Listing(_)
        ));
    }

    #[test]
    fn test_error_response() {
        let resp = Response::err(
            9,
            ErrorMessage::new(ErrorCode::InvalidCommand, "Invalid command: delete"),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], "invalid_command");
        assert_eq!(json["error"]["message"], "Invalid command: delete");
        assert!(json.get("result").is_none());
    }
}
