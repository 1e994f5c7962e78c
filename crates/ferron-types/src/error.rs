//! Shared error types for the Ferron system.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the Ferron system.
#[derive(Error, Debug)]
pub enum FerronError {
    /// Unknown member name in a get/set, or unknown context name.
    #[error("'{0}' not exists")]
    NotExists(String),

    /// Write to a read-only property.
    #[error("'{0}' is not writable")]
    InvalidAccess(String),

    /// A reference or parent id pointing at an unregistered definition.
    #[error("Unknown definition: {0}")]
    UnknownDefinition(u64),

    /// Attempt to build a definition from an object that is not exposable.
    #[error("Not a valid context: {0}")]
    NotAContext(String),

    /// Dial/listen/handshake failure from the transport.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Call issued against (or pending on) a torn-down peer.
    #[error("Peer gone: {0}")]
    PeerGone(String),

    /// A context name or peer is already registered.
    #[error("Already exists: {0}")]
    Exists(String),

    /// Arguments or configuration failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No response arrived within the configured timeout.
    #[error("Response timeout {0}ms exceeded")]
    Timeout(u64),

    /// A context method or accessor failed.
    #[error("Context error: {0}")]
    Context(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for Result with FerronError.
pub type FerronResult<T> = Result<T, FerronError>;

/// Error categories that survive a trip across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotExists,
    InvalidAccess,
    UnknownDefinition,
    NotAContext,
    Exists,
    InvalidArgument,
    Context,
    Connection,
    PeerGone,
    Timeout,
    Serialization,
    Internal,
}

/// Error envelope sent in place of a result when a remote call fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub def_id: Option<u64>,
}

impl FerronError {
    /// Encode for transmission to the caller.
    pub fn to_remote(&self) -> RemoteError {
        let (kind, message, def_id) = match self {
            FerronError::NotExists(m) => (ErrorKind::NotExists, m.clone(), None),
            FerronError::InvalidAccess(m) => (ErrorKind::InvalidAccess, m.clone(), None),
            FerronError::UnknownDefinition(id) => {
                (ErrorKind::UnknownDefinition, self.to_string(), Some(*id))
            }
            FerronError::NotAContext(m) => (ErrorKind::NotAContext, m.clone(), None),
            FerronError::Exists(m) => (ErrorKind::Exists, m.clone(), None),
            FerronError::InvalidArgument(m) => (ErrorKind::InvalidArgument, m.clone(), None),
            FerronError::Context(m) => (ErrorKind::Context, m.clone(), None),
            FerronError::Connection(m) => (ErrorKind::Connection, m.clone(), None),
            FerronError::Io(e) => (ErrorKind::Connection, e.to_string(), None),
            FerronError::PeerGone(id) => (ErrorKind::PeerGone, id.clone(), None),
            FerronError::Timeout(ms) => (ErrorKind::Timeout, ms.to_string(), None),
            FerronError::Serialization(m) => (ErrorKind::Serialization, m.clone(), None),
            FerronError::Internal(m) => (ErrorKind::Internal, m.clone(), None),
        };
        RemoteError {
            kind,
            message,
            def_id,
        }
    }

    /// Rebuild the caller-side error from a remote envelope.
    pub fn from_remote(err: RemoteError) -> Self {
        match err.kind {
            ErrorKind::NotExists => FerronError::NotExists(err.message),
            ErrorKind::InvalidAccess => FerronError::InvalidAccess(err.message),
            ErrorKind::UnknownDefinition => match err.def_id {
                Some(id) => FerronError::UnknownDefinition(id),
                None => FerronError::Internal(err.message),
            },
            ErrorKind::NotAContext => FerronError::NotAContext(err.message),
            ErrorKind::Exists => FerronError::Exists(err.message),
            ErrorKind::InvalidArgument => FerronError::InvalidArgument(err.message),
            ErrorKind::Context => FerronError::Context(err.message),
            ErrorKind::Connection => FerronError::Connection(err.message),
            ErrorKind::PeerGone => FerronError::PeerGone(err.message),
            ErrorKind::Timeout => match err.message.parse() {
                Ok(ms) => FerronError::Timeout(ms),
                Err(_) => FerronError::Internal(err.message),
            },
            ErrorKind::Serialization => FerronError::Serialization(err.message),
            ErrorKind::Internal => FerronError::Internal(err.message),
        }
    }
}

impl From<serde_json::Error> for FerronError {
    fn from(e: serde_json::Error) -> Self {
        FerronError::Serialization(e.to_string())
    }
}
