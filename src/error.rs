use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::repo::persistence::{RepoFile, DATASET_ARTIFACT};

/// Errors returned by a dsrepo node, whether it runs in-process or behind RPC.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested profile, ref or dataset does not exist.
    #[error("not found")]
    NotFound,
    /// A content address is not present in the content store.
    #[error("content not found: {0}")]
    ContentNotFound(String),
    /// The caller supplied incomplete or malformed arguments.
    #[error("{0}")]
    InvalidInput(String),
    /// A profile carries no private key material.
    #[error("missing private key")]
    MissingPrivateKey,
    /// Stored private key material is not valid base64.
    #[error("decoding private key: {0}")]
    PrivateKeyDecode(String),
    /// Private key bytes decoded but do not form a key.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("error decoding peer id: {0}")]
    InvalidPeerId(String),
    #[error("error decoding profile id: {0}")]
    InvalidProfileId(String),
    #[error("invalid content address: {0}")]
    InvalidPath(String),
    /// A persisted artifact exists but could not be decoded.
    #[error("error decoding {artifact}: {source}")]
    Corrupt {
        artifact: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// Bytes returned for an address do not hash to that address.
    #[error("content at {0} failed verification")]
    Integrity(String),
    /// A ref names content the store cannot produce.
    #[error("dangling ref {0}: content is not retrievable")]
    DanglingRef(String),
    /// No search index is configured for this repo.
    #[error("search not supported")]
    SearchUnsupported,
    /// A peer is unreachable or the transport failed.
    #[error("network error: {0}")]
    Network(String),
    /// An error reported by a remote node, carrying its original kind.
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// An I/O error occurred during persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for dsrepo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], stable across the RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Decode,
    Unsupported,
    Network,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::NotFound => "not found",
            ErrorKind::Decode => "decode",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Network => "network",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound | Error::ContentNotFound(_) => ErrorKind::NotFound,
            Error::InvalidInput(_) | Error::InvalidPeerId(_) | Error::InvalidProfileId(_) => {
                ErrorKind::InvalidInput
            }
            Error::MissingPrivateKey
            | Error::PrivateKeyDecode(_)
            | Error::InvalidPrivateKey(_)
            | Error::InvalidPath(_)
            | Error::Corrupt { .. }
            | Error::Integrity(_)
            | Error::DanglingRef(_)
            | Error::Serialization(_) => ErrorKind::Decode,
            Error::SearchUnsupported => ErrorKind::Unsupported,
            Error::Network(_) => ErrorKind::Network,
            Error::Io(_) => ErrorKind::Io,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Remote { kind, .. } => *kind,
        }
    }

    /// True for errors caused by the caller rather than the node.
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::InvalidInput
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn network(e: impl fmt::Display) -> Self {
        Error::Network(e.to_string())
    }
}

/// The serialized form of an [`Error`] carried in `ERR` responses.
///
/// `code` names the variant and `detail` holds its payload, so the receiving
/// side rebuilds the same variant the sender returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    #[serde(default)]
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Error {
    /// Stable name of the variant, used as [`WireError::code`].
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound => "not_found",
            Error::ContentNotFound(_) => "content_not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::MissingPrivateKey => "missing_private_key",
            Error::PrivateKeyDecode(_) => "private_key_decode",
            Error::InvalidPrivateKey(_) => "invalid_private_key",
            Error::InvalidPeerId(_) => "invalid_peer_id",
            Error::InvalidProfileId(_) => "invalid_profile_id",
            Error::InvalidPath(_) => "invalid_path",
            Error::Corrupt { .. } => "corrupt",
            Error::Integrity(_) => "integrity",
            Error::DanglingRef(_) => "dangling_ref",
            Error::SearchUnsupported => "search_unsupported",
            Error::Network(_) => "network",
            Error::Remote { .. } => "remote",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Error::ContentNotFound(s)
            | Error::InvalidInput(s)
            | Error::PrivateKeyDecode(s)
            | Error::InvalidPrivateKey(s)
            | Error::InvalidPeerId(s)
            | Error::InvalidProfileId(s)
            | Error::InvalidPath(s)
            | Error::Integrity(s)
            | Error::DanglingRef(s)
            | Error::Network(s)
            | Error::Internal(s) => Some(s.clone()),
            Error::Corrupt { source, .. } | Error::Serialization(source) => Some(source.to_string()),
            Error::Io(e) => Some(e.to_string()),
            Error::NotFound
            | Error::MissingPrivateKey
            | Error::SearchUnsupported
            | Error::Remote { .. } => None,
        }
    }
}

impl From<&Error> for WireError {
    fn from(e: &Error) -> Self {
        WireError {
            kind: e.kind(),
            code: e.code().to_string(),
            message: e.to_string(),
            detail: e.detail(),
        }
    }
}

impl From<WireError> for Error {
    fn from(w: WireError) -> Self {
        let WireError {
            kind,
            code,
            message,
            detail,
        } = w;
        let rebuilt = match (code.as_str(), detail) {
            ("not_found", _) => Some(Error::NotFound),
            ("missing_private_key", _) => Some(Error::MissingPrivateKey),
            ("search_unsupported", _) => Some(Error::SearchUnsupported),
            ("content_not_found", Some(d)) => Some(Error::ContentNotFound(d)),
            ("invalid_input", Some(d)) => Some(Error::InvalidInput(d)),
            ("private_key_decode", Some(d)) => Some(Error::PrivateKeyDecode(d)),
            ("invalid_private_key", Some(d)) => Some(Error::InvalidPrivateKey(d)),
            ("invalid_peer_id", Some(d)) => Some(Error::InvalidPeerId(d)),
            ("invalid_profile_id", Some(d)) => Some(Error::InvalidProfileId(d)),
            ("invalid_path", Some(d)) => Some(Error::InvalidPath(d)),
            ("integrity", Some(d)) => Some(Error::Integrity(d)),
            ("dangling_ref", Some(d)) => Some(Error::DanglingRef(d)),
            ("network", Some(d)) => Some(Error::Network(d)),
            ("internal", Some(d)) => Some(Error::Internal(d)),
            ("io", Some(d)) => Some(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, d))),
            ("serialization", Some(d)) => Some(Error::Serialization(serde_json::Error::custom(d))),
            ("corrupt", Some(d)) => corrupt_artifact(&message, &d).map(|artifact| Error::Corrupt {
                artifact,
                source: serde_json::Error::custom(d),
            }),
            _ => None,
        };
        rebuilt.unwrap_or(Error::Remote { kind, message })
    }
}

/// Recovers the artifact name from a rendered [`Error::Corrupt`] message.
fn corrupt_artifact(message: &str, detail: &str) -> Option<&'static str> {
    let name = message
        .strip_prefix("error decoding ")?
        .strip_suffix(detail)?
        .strip_suffix(": ")?;
    RepoFile::ALL
        .iter()
        .map(RepoFile::artifact)
        .chain([DATASET_ARTIFACT])
        .find(|a| *a == name)
}
