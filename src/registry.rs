//! # Process Registry
//!
//! Process-wide table of running build subprocesses. The registry serves
//! two purposes:
//!
//! 1. **Admission control**: [`ProcessRegistry::count`] is the live input
//!    to the concurrency gate; there is no separately maintained counter
//!    that could drift from reality.
//! 2. **Shutdown hygiene**: [`ProcessRegistry::terminate_all`] guarantees
//!    that no orphaned build containers outlive the host process.
//!
//! The registry is constructed once at the composition root and injected
//! wherever it is needed; it is deliberately not a global, so tests can
//! instantiate independent registries.
//!
//! ## Lifecycle
//!
//! An entry is added the moment the build subprocess is spawned and removed
//! the instant it reports exit, success or failure alike. Entries only
//! survive longer than their process when the monitor task itself dies,
//! and shutdown then deals with the (already gone) pid gracefully.

use std::sync::Mutex;

use tracing::{debug, info, warn};

/// Record of one running build subprocess.
#[derive(Debug, Clone)]
pub struct BuildProcess {
    /// OS process id of the spawned engine client.
    pub pid: u32,
    /// Human-readable job label, e.g. `network/codeHash`.
    pub label: String,
}

/// Table of currently running build subprocesses.
///
/// ## Thread Safety
///
/// All operations take `&self`; the table is protected by an internal
/// mutex. A poisoned lock is recovered rather than propagated, since the
/// table stays structurally valid across a panic in another holder.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    procs: Mutex<Vec<BuildProcess>>,
}

impl ProcessRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a running build subprocess.
    pub fn add(&self, pid: u32, label: impl Into<String>) {
        let label = label.into();
        debug!("registering build process {} ({})", pid, label);
        self.lock().push(BuildProcess { pid, label });
    }

    /// Removes a subprocess record. No-op when the pid is not registered.
    pub fn remove(&self, pid: u32) {
        let mut procs = self.lock();
        if let Some(i) = procs.iter().position(|p| p.pid == pid) {
            let record = procs.swap_remove(i);
            debug!("removed build process {} ({})", record.pid, record.label);
        }
    }

    /// Number of currently registered subprocesses.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of the registered subprocesses.
    pub fn running(&self) -> Vec<BuildProcess> {
        self.lock().clone()
    }

    /// Terminates every registered subprocess and empties the table.
    ///
    /// Each process first gets a graceful SIGTERM; only when that delivery
    /// itself fails (e.g. the signal cannot be sent) is a SIGKILL issued.
    /// Returns the number of processes for which termination was attempted.
    ///
    /// Must run before host-process exit: dropping registered containers
    /// on shutdown leaks orphaned sandboxes.
    pub fn terminate_all(&self) -> usize {
        let procs: Vec<BuildProcess> = self.lock().drain(..).collect();
        if procs.is_empty() {
            return 0;
        }

        info!("{} build process/es running at shutdown", procs.len());

        for proc in &procs {
            if send_signal(proc.pid, Termination::Graceful) {
                info!("SIGTERM {} ({}): OK", proc.pid, proc.label);
            } else {
                warn!("SIGTERM {} ({}): FAIL", proc.pid, proc.label);
                if send_signal(proc.pid, Termination::Forceful) {
                    info!("SIGKILL {} ({}): OK", proc.pid, proc.label);
                } else {
                    warn!("SIGKILL {} ({}): FAIL", proc.pid, proc.label);
                }
            }
        }

        procs.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BuildProcess>> {
        self.procs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy)]
enum Termination {
    Graceful,
    Forceful,
}

#[cfg(unix)]
fn send_signal(pid: u32, termination: Termination) -> bool {
    let signal = match termination {
        Termination::Graceful => libc::SIGTERM,
        Termination::Forceful => libc::SIGKILL,
    };
    // SAFETY: kill(2) with a validated pid; the call only delivers a signal.
    unsafe { libc::kill(pid as libc::pid_t, signal) == 0 }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _termination: Termination) -> bool {
    // Container builds are Unix-hosted; on other platforms there is nothing
    // to deliver a signal to.
    false
}
