//! Error types for the streaming core.

use std::fmt;

use cadstream_decode::DecodeError;
use thiserror::Error;

use crate::metadata::{ModelId, SectorKey};

/// Result alias for streaming operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a manifest version was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedVersion {
    /// The manifest has no integer `version` field.
    Missing,
    /// A known format that is no longer supported.
    Retired(u64),
    /// A version newer than any known format.
    Unknown(u64),
}

impl fmt::Display for UnsupportedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "manifest has no version field"),
            Self::Retired(v) => write!(
                f,
                "version {v} is no longer supported, reconvert the model to version 8 or 9"
            ),
            Self::Unknown(v) => write!(f, "version {v} is newer than any supported format"),
        }
    }
}

/// Errors produced by the streaming core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported manifest: {0}")]
    UnsupportedVersion(UnsupportedVersion),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse sector payload: {0}")]
    SectorParse(#[from] DecodeError),

    #[error("sector fetch was cancelled")]
    FetchCancelled,

    #[error("malformed geometry: {0}")]
    MalformedGeometry(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown model {0}")]
    UnknownModel(ModelId),

    #[error("unknown sector {0}")]
    UnknownSector(SectorKey),
}

impl Error {
    /// Whether a failed load should be attempted again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SectorParse(_) | Self::Fetch(_) | Self::Http(_) | Self::Io(_)
        )
    }

    /// Whether the error makes the whole model unusable.
    #[must_use]
    pub fn is_model_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion(_) | Self::InvalidManifest(_) | Self::Json(_)
        )
    }
}
