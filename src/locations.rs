//! # Job Location Resolver
//!
//! Maps a sanitized (network, code hash) pair to the four well-known
//! directories a verification job can occupy, and derives the job's status
//! by probing which of them exist.
//!
//! ## Directory States
//!
//! ```text
//! <base>/staging/<network>/<codeHash>/      upload being written
//! <base>/processing/<network>/<codeHash>/   build container running
//! <base>/error/<network>/<codeHash>/        last failed build (log + cid)
//! <publish>/<codeHash>/                     verified source + artifact
//! ```
//!
//! The publish directory is keyed by code hash only: the hash is
//! content-addressable, so a successful verification for one network
//! satisfies lookups for any network using that hash.
//!
//! ## Status Derivation
//!
//! Status is recomputed from disk on every query, never cached. This is
//! what makes the directory tree the single source of truth: after a crash
//! or a concurrent transition, the next probe simply reports whatever the
//! filesystem says.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::VerifierConfig;
use crate::constants::{
    sanitize_component, ERROR_DIR, METADATA_FILE, PROCESSING_DIR, SRC_DIR, STAGING_DIR,
};
use crate::error::{Error, Result};

// =============================================================================
// Verification Status
// =============================================================================

/// Lifecycle status of a code hash, derived from directory presence.
///
/// Probed in fixed priority order: a published source tree wins over a
/// metadata-only publication, which wins over any in-flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    /// No trace of the code hash on disk.
    Unverified,
    /// The publish directory holds a signed `metadata.json` but no sources.
    Metadata,
    /// The publish directory holds a full verified source tree.
    Verified,
    /// A build container is running (or pending reconciliation).
    Processing,
    /// An upload is being written.
    Staging,
    /// The last build attempt failed; log and container id are retained.
    Error,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unverified => write!(f, "unverified"),
            Self::Metadata => write!(f, "metadata"),
            Self::Verified => write!(f, "verified"),
            Self::Processing => write!(f, "processing"),
            Self::Staging => write!(f, "staging"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Status plus the modification time of the marker that produced it.
///
/// The timestamp is RFC 3339; empty when the code hash is unverified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationInfo {
    pub status: VerificationStatus,
    pub timestamp: String,
}

// =============================================================================
// Location Resolver
// =============================================================================

/// Resolved directory set for one verification job.
///
/// Construction sanitizes both identity components; every path below is
/// therefore safe to create, rename, or delete. The resolver itself never
/// touches the filesystem except to probe existence and mtimes.
#[derive(Debug, Clone)]
pub struct VerifierLocations {
    /// Sanitized network name.
    pub network: String,
    /// Sanitized code hash.
    pub code_hash: String,
    /// Upload staging directory for this job.
    pub staging_dir: PathBuf,
    /// Build processing directory for this job.
    pub processing_dir: PathBuf,
    /// Failed-build record directory for this job.
    pub error_dir: PathBuf,
    /// Publish directory, keyed by code hash only.
    pub publish_dir: PathBuf,
}

impl VerifierLocations {
    /// Resolves the location set for `(network, code_hash)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] when either component is empty or
    /// invalid after sanitization.
    pub fn new(config: &VerifierConfig, network: &str, code_hash: &str) -> Result<Self> {
        let network = sanitize_component(network).map_err(|reason| Error::InvalidIdentity {
            what: "network",
            reason,
        })?;
        let code_hash = sanitize_component(code_hash).map_err(|reason| Error::InvalidIdentity {
            what: "code hash",
            reason,
        })?;

        let staging_dir = config
            .base_dir
            .join(STAGING_DIR)
            .join(&network)
            .join(&code_hash);
        let processing_dir = config
            .base_dir
            .join(PROCESSING_DIR)
            .join(&network)
            .join(&code_hash);
        let error_dir = config
            .base_dir
            .join(ERROR_DIR)
            .join(&network)
            .join(&code_hash);
        // Code hash is content addressable, so it works for any network.
        let publish_dir = config.publish_dir.join(&code_hash);

        Ok(Self {
            network,
            code_hash,
            staging_dir,
            processing_dir,
            error_dir,
            publish_dir,
        })
    }

    /// "network/codeHash" path key used in user-facing messages.
    pub fn code_hash_path(&self) -> String {
        format!("{}/{}", self.network, self.code_hash)
    }

    /// True when the publish directory contains a verified source tree.
    pub fn is_verified(&self) -> bool {
        self.publish_dir.join(SRC_DIR).exists()
    }

    /// True when the publish directory contains a signed metadata file.
    pub fn has_metadata(&self) -> bool {
        self.publish_dir.join(METADATA_FILE).exists()
    }

    /// Current status, probed fresh from disk.
    pub fn status(&self) -> VerificationStatus {
        self.info().status
    }

    /// Current status and the mtime of the marker that produced it.
    pub fn info(&self) -> VerificationInfo {
        if self.is_verified() {
            VerificationInfo {
                status: VerificationStatus::Verified,
                timestamp: mtime_rfc3339(&self.publish_dir.join(SRC_DIR)),
            }
        } else if self.has_metadata() {
            VerificationInfo {
                status: VerificationStatus::Metadata,
                timestamp: mtime_rfc3339(&self.publish_dir.join(METADATA_FILE)),
            }
        } else if self.processing_dir.exists() {
            VerificationInfo {
                status: VerificationStatus::Processing,
                timestamp: mtime_rfc3339(&self.processing_dir),
            }
        } else if self.staging_dir.exists() {
            VerificationInfo {
                status: VerificationStatus::Staging,
                timestamp: mtime_rfc3339(&self.staging_dir),
            }
        } else if self.error_dir.exists() {
            VerificationInfo {
                status: VerificationStatus::Error,
                timestamp: mtime_rfc3339(&self.error_dir),
            }
        } else {
            VerificationInfo {
                status: VerificationStatus::Unverified,
                timestamp: String::new(),
            }
        }
    }
}

/// RFC 3339 modification time of `path`, or empty string when unreadable.
fn mtime_rfc3339(path: &Path) -> String {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|mtime| DateTime::<Utc>::from(mtime).to_rfc3339())
        .unwrap_or_default()
}
