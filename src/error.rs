//! Error types shared across the archive engine.

use std::time::Duration;

use thiserror::Error;

/// Failure to open a single relay connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure to publish one event on one relay connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The relay answered `OK` with `false`.
    #[error("relay rejected event: {0}")]
    Rejected(String),
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
    #[error("connection closed before acknowledgement")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Malformed or unusable key material.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("secret key is not a valid secp256k1 scalar")]
    InvalidSecretKey,
    #[error("event author {event} does not match signing key {key}")]
    KeyMismatch { event: String, key: String },
    #[error("could not serialize event: {0}")]
    Encoding(String),
}

/// Reason a record failed integrity checks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("id does not match event contents")]
    IdMismatch,
    #[error("signature does not verify")]
    BadSignature,
    #[error("malformed field `{0}`")]
    MalformedField(&'static str),
}

/// Pool initialization failed outright.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no relays available ({} endpoint(s) failed)", failures.len())]
    NoRelaysAvailable {
        failures: Vec<(String, ConnectError)>,
    },
}

/// Failure of a whole archive action.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("every relay failed to accept the archive ({} attempt(s))", failures.len())]
    Publish {
        failures: Vec<(String, PublishError)>,
    },
}

/// Failure loading or persisting an identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("secret store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("secret store write: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error(transparent)]
    Key(#[from] SigningError),
}

/// Failure opening a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Init(#[from] InitError),
}

/// Failure fetching a document to archive.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("document is empty")]
    Empty,
}
