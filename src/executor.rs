//! # Sandboxed Build Executor
//!
//! Drives the container engine CLI (`docker`/`podman`) to run exactly one
//! isolated build per verification job.
//!
//! ## Sandbox Profile
//!
//! Each build container runs with:
//!
//! - the job's processing directory bind-mounted at `/build`,
//! - shared cargo registry and rustup caches bind-mounted read-write so
//!   repeated builds do not re-download dependencies,
//! - `--security-opt=no-new-privileges` and `--cap-drop ALL`,
//! - combined stdout/stderr appended to `out.log` inside the processing
//!   directory, so the log survives relocation on both success and error
//!   paths and is independently tailable,
//! - the container id recorded via `--cidfile` for out-of-band operator
//!   intervention.
//!
//! ## Completion Model
//!
//! [`BuildExecutor::run`] is non-blocking: it registers the spawned engine
//! client in the [`ProcessRegistry`] and returns a [`RunningBuild`] whose
//! `outcome` future resolves to exactly one [`BuildOutcome`] when the
//! container exits. The registry entry is removed before the outcome
//! resolves, whichever way the build ends. Failed builds are never retried
//! here; a retry is a fresh upload by orchestrator design.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::VerifierConfig;
use crate::constants::{BUILD_MOUNT, CARGO_CACHE_MOUNT, CID_FILE, LOG_FILE, RUSTUP_CACHE_MOUNT};
use crate::error::{Error, Result};
use crate::registry::ProcessRegistry;

// =============================================================================
// Build Outcome
// =============================================================================

/// Terminal result of one sandboxed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Container exited with code 0.
    Success,
    /// Container exited nonzero, was killed, or could not be awaited.
    Failure {
        /// Exit code when the container exited on its own; `None` when it
        /// was terminated by a signal or the wait itself failed.
        exit_code: Option<i32>,
    },
}

/// Handle to a running sandboxed build.
#[derive(Debug)]
pub struct RunningBuild {
    /// OS pid of the engine client process.
    pub pid: u32,
    /// Engine-side container name, useful for operator tooling.
    pub container_name: String,
    /// Resolves to the single [`BuildOutcome`] of this build.
    pub outcome: JoinHandle<BuildOutcome>,
}

// =============================================================================
// Build Executor
// =============================================================================

/// Launches sandboxed builds and gates their concurrency.
#[derive(Debug)]
pub struct BuildExecutor {
    config: Arc<VerifierConfig>,
    registry: Arc<ProcessRegistry>,
}

impl BuildExecutor {
    /// Creates an executor over the given configuration and registry.
    pub fn new(config: Arc<VerifierConfig>, registry: Arc<ProcessRegistry>) -> Self {
        Self { config, registry }
    }

    /// The configuration this executor runs with.
    pub fn config(&self) -> &Arc<VerifierConfig> {
        &self.config
    }

    /// The process registry backing admission control.
    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// True while a new build may be admitted.
    ///
    /// Always reads the live registry count; a separately maintained
    /// counter could drift when a process is removed outside the normal
    /// completion path.
    pub fn can_admit_more(&self) -> bool {
        self.registry.count() <= self.config.max_containers
    }

    /// Launches one build container over `processing_dir`.
    ///
    /// Registers the spawned process, then monitors it asynchronously; the
    /// returned handle's `outcome` future resolves once, after the registry
    /// entry has been removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpawnFailed`] when the engine client cannot be
    /// started, and I/O errors when the log file cannot be opened.
    pub async fn run(&self, processing_dir: &Path, label: &str) -> Result<RunningBuild> {
        let log_path = processing_dir.join(LOG_FILE);
        let cid_path = processing_dir.join(CID_FILE);
        let cargo_cache = self.config.caches_dir.join("cargo");
        let rustup_cache = self.config.caches_dir.join("rustup");

        // The engine refuses relative cache paths, and missing host
        // directories would be created root-owned by the daemon.
        std::fs::create_dir_all(&cargo_cache)?;
        std::fs::create_dir_all(&rustup_cache)?;

        // Append mode: the log must survive engine restarts of the same
        // job directory and remain tailable at a stable path.
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let stdout = Stdio::from(log.try_clone()?);
        let stderr = Stdio::from(log);

        let container_name = format!("verify-{}", Uuid::now_v7());

        let mut cmd = Command::new(&self.config.engine);
        cmd.arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(&container_name)
            .arg("--cidfile")
            .arg(&cid_path)
            .arg("-v")
            .arg(format!("{}:{}", processing_dir.display(), BUILD_MOUNT))
            .arg("-v")
            .arg(format!("{}:{}", cargo_cache.display(), CARGO_CACHE_MOUNT))
            .arg("-v")
            .arg(format!("{}:{}", rustup_cache.display(), RUSTUP_CACHE_MOUNT))
            .arg("--security-opt=no-new-privileges")
            .arg("--cap-drop")
            .arg("ALL");

        for param in &self.config.run_params {
            cmd.arg(param);
        }

        cmd.arg(&self.config.image)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(false);

        debug!(
            "launching {} for {} in {}",
            self.config.image,
            label,
            processing_dir.display()
        );

        let mut child = cmd.spawn().map_err(|e| Error::SpawnFailed {
            engine: self.config.engine.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| Error::SpawnFailed {
            engine: self.config.engine.clone(),
            reason: "spawned process has no pid".to_string(),
        })?;

        self.registry.add(pid, label);
        info!("build container started for {} (pid {})", label, pid);

        let registry = Arc::clone(&self.registry);
        let label = label.to_string();
        let outcome = tokio::spawn(async move {
            let status = child.wait().await;
            // Remove first: the count feeds admission control and must not
            // lag behind process exit.
            registry.remove(pid);

            match status {
                Ok(status) if status.success() => {
                    info!("build for {} succeeded", label);
                    BuildOutcome::Success
                }
                Ok(status) => {
                    warn!("build for {} failed: {}", label, status);
                    BuildOutcome::Failure {
                        exit_code: status.code(),
                    }
                }
                Err(e) => {
                    error!("failed to await build for {}: {}", label, e);
                    BuildOutcome::Failure { exit_code: None }
                }
            }
        });

        Ok(RunningBuild {
            pid,
            container_name,
            outcome,
        })
    }
}
