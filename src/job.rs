//! # Verification Job Orchestrator
//!
//! Drives one verification job through its directory state machine:
//!
//! ```text
//!   unverified ──admit──► staging ──rename──► processing ──build──┐
//!        ▲                   │                                    │
//!        │              (cleanup on                        exit 0 │ exit != 0
//!        │               any failure)                             ▼
//!        │                                          publish            error
//!        └───────────── re-upload allowed ◄──────────────────────────────┘
//! ```
//!
//! The filesystem is the ledger: a job's state is exactly the set of
//! directories that exist for it, transitions are atomic same-volume
//! renames, and directory creation on an existing path is always a
//! conflict, never an overwrite. This makes the state machine both the
//! durability mechanism and the status API, and lets it self-heal after a
//! crash (see [`sweep_stale`]).
//!
//! ## Per-Job Sequencing
//!
//! Within one job the sequence admit → stage → write upload → write
//! pristine → promote to processing → build → reconcile is strictly
//! sequential. Across jobs there is no ordering at all; jobs are keyed
//! independently by (network, code hash) and real parallelism lives in the
//! build containers.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

use crate::chain::BytecodeSource;
use crate::config::VerifierConfig;
use crate::constants::{
    CID_FILE, LOG_FILE, METADATA_FILE, PACKAGE_DIR, PACKAGE_STEM, PRISTINE_FILE, SRC_DIR,
};
use crate::error::{Error, Result};
use crate::executor::{BuildExecutor, BuildOutcome, RunningBuild};
use crate::locations::VerifierLocations;
use crate::sniff::{peek_head, ArchiveKind};

// =============================================================================
// Verification Job
// =============================================================================

/// Orchestrates the workload for one contract verification.
///
/// A new job instance is expected per verification attempt; directories are
/// in the context of its network and code hash.
pub struct VerificationJob {
    locations: VerifierLocations,
    executor: Arc<BuildExecutor>,
    source: Arc<dyn BytecodeSource>,
}

impl VerificationJob {
    /// Creates a job over resolved locations.
    pub fn new(
        locations: VerifierLocations,
        executor: Arc<BuildExecutor>,
        source: Arc<dyn BytecodeSource>,
    ) -> Self {
        Self {
            locations,
            executor,
            source,
        }
    }

    /// The job's resolved location set.
    pub fn locations(&self) -> &VerifierLocations {
        &self.locations
    }

    /// Checks whether a new upload may be admitted for this job.
    ///
    /// Conflict checks come first: they are job-specific and deterministic,
    /// so the caller gets the most actionable message. The capacity check
    /// is global and transient and therefore last.
    pub fn check_admission(&self) -> Result<()> {
        let locs = &self.locations;

        if locs.is_verified() {
            return Err(Error::Conflict(format!(
                "{} is already verified",
                locs.code_hash_path()
            )));
        }

        if locs.staging_dir.exists() {
            return Err(Error::Conflict(format!(
                "workload for {} is staged for processing",
                locs.code_hash_path()
            )));
        }

        if locs.processing_dir.exists() {
            return Err(Error::Conflict(format!(
                "workload for {} is in processing",
                locs.code_hash_path()
            )));
        }

        if !self.executor.can_admit_more() {
            return Err(Error::Capacity);
        }

        Ok(())
    }

    /// Creates the staging directory for this job.
    ///
    /// The single atomic directory-creation attempt is the sole concurrency
    /// guard for "one in-flight upload per job": a concurrent admission
    /// loses the race here and gets a conflict, with no check-then-create
    /// window.
    pub fn prepare_staging(&self) -> Result<()> {
        prepare_directory(&self.locations.staging_dir)
    }

    /// Classifies and streams an upload into `staging/package.<ext>`.
    ///
    /// The head bytes are peeked for classification and the stream is
    /// reconstructed before writing, so the staged archive is byte-for-byte
    /// the upload. When the upload exceeds the configured size ceiling the
    /// staging directory is removed and [`Error::PayloadTooLarge`] is
    /// returned; no partial archive is retained.
    pub async fn write_to_staging<R: AsyncRead + Unpin>(&self, reader: R) -> Result<ArchiveKind> {
        let (head, stream) = peek_head(reader).await?;
        // Determine the archive type from file content; client-declared
        // types are not trusted.
        let kind = ArchiveKind::sniff(&head)?;

        let dst = self
            .locations
            .staging_dir
            .join(format!("{}.{}", PACKAGE_STEM, kind.extension()));

        let max = self.executor.config().max_package_bytes;
        let mut limited = stream.take(max + 1);
        let mut file = tokio::fs::File::create(&dst).await?;
        let written = tokio::io::copy(&mut limited, &mut file).await?;
        drop(file);

        if written > max {
            self.clean_staging();
            return Err(Error::PayloadTooLarge);
        }

        debug!(
            "staged {} byte {} package for {}",
            written,
            kind,
            self.locations.code_hash_path()
        );

        Ok(kind)
    }

    /// Fetches the reference on-chain bytecode into `staging/pristine.wasm`.
    ///
    /// The sandboxed build compares its artifact against this file.
    pub async fn write_pristine(&self) -> Result<()> {
        let locs = &self.locations;
        let bytes = self
            .source
            .pristine_code(&locs.network, &locs.code_hash)
            .await?;

        tokio::fs::write(locs.staging_dir.join(PRISTINE_FILE), &bytes).await?;
        debug!(
            "wrote {} bytes of pristine code for {}",
            bytes.len(),
            locs.code_hash_path()
        );
        Ok(())
    }

    /// Promotes staging to processing and launches the sandboxed build.
    ///
    /// The promotion is an atomic same-volume rename; the prior creation of
    /// the processing directory doubles as the conflict gate. Once the
    /// build is running, a reconcile task consumes its single outcome and
    /// routes it to [`promote_success`] or [`record_failure`].
    pub async fn start_processing(&self) -> Result<()> {
        let locs = &self.locations;

        prepare_directory(&locs.processing_dir)?;
        info!(
            "moving {} to {}",
            locs.staging_dir.display(),
            locs.processing_dir.display()
        );
        // Same volume assumed; a cross-device move would not be atomic.
        std::fs::rename(&locs.staging_dir, &locs.processing_dir)?;

        let build = match self
            .executor
            .run(&locs.processing_dir, &locs.code_hash_path())
            .await
        {
            Ok(build) => build,
            Err(e) => {
                // The job already owns the processing directory; route the
                // launch failure through the error record so it does not
                // block future admissions.
                if let Err(record_err) = record_failure(locs) {
                    error!(
                        "failed to record launch failure for {}: {}",
                        locs.code_hash_path(),
                        record_err
                    );
                }
                return Err(e);
            }
        };

        let locs = locs.clone();
        tokio::spawn(reconcile(locs, build));

        Ok(())
    }

    /// Runs the complete upload pipeline for `reader`.
    ///
    /// admit → stage → write upload → write pristine → start processing,
    /// removing the staging directory before returning any error so a
    /// half-written upload never blocks future admission.
    pub async fn submit<R: AsyncRead + Unpin>(&self, reader: R) -> Result<()> {
        self.check_admission()?;
        self.prepare_staging()?;

        if let Err(e) = self.run_staged_pipeline(reader).await {
            self.clean_staging();
            return Err(e);
        }

        Ok(())
    }

    async fn run_staged_pipeline<R: AsyncRead + Unpin>(&self, reader: R) -> Result<()> {
        self.write_to_staging(reader).await?;
        self.write_pristine().await?;
        self.start_processing().await
    }

    /// Removes the staging directory tree, if present.
    ///
    /// Used on every failure path during upload handling.
    pub fn clean_staging(&self) {
        clean_directory(&self.locations.staging_dir);
    }
}

// =============================================================================
// Outcome Reconciliation
// =============================================================================

/// Consumes the single build outcome and applies it to the directory state.
async fn reconcile(locs: VerifierLocations, build: RunningBuild) {
    let outcome = match build.outcome.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(
                "build monitor for {} aborted: {}",
                locs.code_hash_path(),
                e
            );
            BuildOutcome::Failure { exit_code: None }
        }
    };

    match outcome {
        BuildOutcome::Success => {
            if let Err(e) = promote_success(&locs) {
                error!("failed to publish {}: {}", locs.code_hash_path(), e);
                // Processing must not linger; keep the log as an error
                // record instead.
                if let Err(record_err) = record_failure(&locs) {
                    error!(
                        "failed to record publish failure for {}: {}",
                        locs.code_hash_path(),
                        record_err
                    );
                }
            }
        }
        BuildOutcome::Failure { exit_code } => {
            warn!(
                "build for {} exited with {:?}",
                locs.code_hash_path(),
                exit_code
            );
            if let Err(e) = record_failure(&locs) {
                error!(
                    "failed to record build failure for {}: {}",
                    locs.code_hash_path(),
                    e
                );
            }
        }
    }
}

/// Publishes a successful build.
///
/// Creates the publish directory (conflict if already present), prunes the
/// build-tool scratch tree, relocates the generated metadata for
/// convenience, and renames the `package/` output into the publish
/// location. Only then are the processing directory and any stale error
/// record for the same job removed.
pub fn promote_success(locs: &VerifierLocations) -> Result<()> {
    prepare_directory(&locs.publish_dir)?;

    if let Err(e) = relocate_package(locs) {
        // The publish directory was created here and is still empty;
        // leaving it behind would block every later attempt.
        clean_directory(&locs.publish_dir);
        return Err(e);
    }

    clean_directory(&locs.processing_dir);
    // A later success clears the record of an earlier failed attempt.
    clean_directory(&locs.error_dir);

    info!("published verified sources for {}", locs.code_hash_path());
    Ok(())
}

fn relocate_package(locs: &VerifierLocations) -> Result<()> {
    let pack_dir = locs.processing_dir.join(PACKAGE_DIR);
    let target_dir = pack_dir.join(SRC_DIR).join("target");

    if target_dir.exists() {
        // Move metadata.json to package/ for convenience.
        let metadata_file = target_dir.join("release").join("ink").join(METADATA_FILE);
        if metadata_file.exists() {
            std::fs::rename(&metadata_file, pack_dir.join(METADATA_FILE))?;
        }
        // Build caches are scratch; only sources and the final artifact
        // are published.
        std::fs::remove_dir_all(&target_dir)?;
    }

    std::fs::rename(&pack_dir, &locs.publish_dir)?;
    Ok(())
}

/// Records a failed build.
///
/// Last error wins: a stale error directory for the job is removed first.
/// Only the build log and the container-id file are preserved; everything
/// else in processing is discarded.
pub fn record_failure(locs: &VerifierLocations) -> Result<()> {
    if locs.error_dir.exists() {
        clean_directory(&locs.error_dir);
    }

    std::fs::create_dir_all(&locs.error_dir)?;

    for name in [LOG_FILE, CID_FILE] {
        let from = locs.processing_dir.join(name);
        if from.exists() {
            std::fs::rename(&from, locs.error_dir.join(name))?;
        }
    }

    clean_directory(&locs.processing_dir);

    info!("recorded build failure for {}", locs.code_hash_path());
    Ok(())
}

// =============================================================================
// Crash Recovery
// =============================================================================

/// Removes stale in-flight work left over from a previous process.
///
/// Anything under `staging/` or `processing/` at startup belongs to jobs
/// whose owning process no longer exists; these directories only ever hold
/// in-flight, non-durable work (completed results live in `publish/`), so
/// removing them wholesale is safe and unblocks re-admission.
///
/// Must run before accepting new work.
pub fn sweep_stale(config: &VerifierConfig) {
    info!("cleaning up staging directories...");
    for dir in [config.staging_root(), config.processing_root()] {
        if dir.exists() {
            info!("- removing {}", dir.display());
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("failed to remove {}: {}", dir.display(), e);
            }
        }
    }
}

// =============================================================================
// Directory Helpers
// =============================================================================

/// Creates `dir`, failing with a conflict when it already exists.
///
/// Parents are created as needed; the final component is a single atomic
/// `mkdir`, which is what enforces the mutual-exclusion invariant at write
/// time rather than just read time.
fn prepare_directory(dir: &Path) -> Result<()> {
    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::create_dir(dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            Error::Conflict(format!("workload {} already exists", dir.display()))
        } else {
            Error::Io(e)
        }
    })?;

    debug!("created directory {}", dir.display());
    Ok(())
}

/// Removes a directory tree, logging instead of failing.
fn clean_directory(dir: &Path) {
    if dir.exists() {
        info!("cleaning up directory {}", dir.display());
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("failed to clean {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_directory_conflicts_on_existing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("job");

        prepare_directory(&dir).unwrap();
        assert!(dir.exists());

        let err = prepare_directory(&dir).unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_clean_directory_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        clean_directory(&temp.path().join("never-created"));
    }
}
