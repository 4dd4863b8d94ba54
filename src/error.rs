//! Error types for the verification pipeline.

use std::path::PathBuf;

/// Result type alias for verifier operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the verification pipeline.
///
/// Every variant carries an HTTP-style status hint (see [`Error::status`])
/// so a serving layer can map errors without inspecting messages:
/// conflicts and bad input are 4xx, capacity is 429, everything that
/// indicates a fault in this process is 500.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Admission Errors
    // =========================================================================
    /// Job is in a state that conflicts with the requested transition
    /// (already verified, already staged, already processing, or a state
    /// directory unexpectedly exists).
    #[error("{0}")]
    Conflict(String),

    /// The concurrency ceiling for build containers is saturated.
    ///
    /// Transient by nature; callers should retry after backoff.
    #[error("workload limit reached, please retry later")]
    Capacity,

    // =========================================================================
    // Upload Errors
    // =========================================================================
    /// The uploaded bytes match none of the supported archive formats.
    ///
    /// Never guessed around: the extension decides the decompression
    /// strategy inside the sandbox, so an unknown head is terminal for
    /// this upload.
    #[error("unknown archive type for bytes: {head}")]
    UnknownArchive {
        /// Hex rendering of the peeked head bytes.
        head: String,
    },

    /// Upload exceeded the configured package size ceiling.
    ///
    /// The partial archive and its staging directory have already been
    /// removed when this is returned.
    #[error("package exceeds the maximum allowed size")]
    PayloadTooLarge,

    /// A network name or code hash did not survive sanitization.
    #[error("invalid {what}: {reason}")]
    InvalidIdentity {
        what: &'static str,
        reason: &'static str,
    },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// A chain or signature collaborator failed (endpoint resolution,
    /// missing pristine bytecode, invalid owner signature).
    #[error("{0}")]
    Upstream(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    // =========================================================================
    // Process Errors
    // =========================================================================
    /// Spawning the build container failed.
    #[error("failed to launch build container '{engine}': {reason}")]
    SpawnFailed { engine: String, reason: String },

    /// A directory operation failed on a concrete path.
    #[error("filesystem operation failed on {path}: {reason}")]
    DirOperation { path: PathBuf, reason: String },

    // =========================================================================
    // I/O and Internal Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status hint for this error.
    ///
    /// Conflicts, classification failures, and upstream faults are client
    /// errors in the sense of the upload protocol: the request as given can
    /// never succeed. Capacity is the only retryable rejection.
    pub fn status(&self) -> u16 {
        match self {
            Self::Conflict(_) => 400,
            Self::Capacity => 429,
            Self::UnknownArchive { .. } => 400,
            Self::PayloadTooLarge => 413,
            Self::InvalidIdentity { .. } => 400,
            Self::Upstream(_) => 400,
            Self::NotFound(_) => 404,
            Self::SpawnFailed { .. } => 500,
            Self::DirOperation { .. } => 500,
            Self::Io(_) => 500,
            Self::Internal(_) => 500,
        }
    }

    /// True when the caller may retry the identical request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Capacity)
    }
}
