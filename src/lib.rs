//! # contract-verifier
//!
//! **Reproducible-Build Verification for On-Chain Contract Bytecode**
//!
//! A contract author submits the source code for a deployed code hash; the
//! service rebuilds it inside an isolated container and publishes the
//! sources only when the build succeeds and reproduces the on-chain
//! bytecode.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                        contract-verifier                           │
//! ├────────────────────────────────────────────────────────────────────┤
//! │   upload stream                                                    │
//! │        │                                                           │
//! │        ▼                                                           │
//! │   ArchiveKind::sniff ──► VerificationJob (state machine)           │
//! │                               │  admit → stage → process           │
//! │                               ▼                                    │
//! │                          BuildExecutor ──► container engine        │
//! │                               │              (tracked in           │
//! │                               │               ProcessRegistry)     │
//! │                               ▼                                    │
//! │                  promote_success / record_failure                  │
//! │                               │                                    │
//! │                               ▼                                    │
//! │                    VerifierLocations::status()                     │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Filesystem as Ledger
//!
//! There is no database. A job's state is the set of directories that
//! exist for its (network, code hash) pair:
//!
//! ```text
//! <base>/staging/<network>/<codeHash>/      upload being written
//! <base>/processing/<network>/<codeHash>/   build container running
//! <base>/error/<network>/<codeHash>/        last failed build
//! <publish>/<codeHash>/                     verified sources + artifact
//! ```
//!
//! At most one of these exists per job in steady state; transitions are
//! atomic same-volume renames and directory creation on an existing path
//! is always a conflict, never an overwrite. Status is recomputed from
//! disk on every query, so the system self-heals after a crash: stale
//! staging/processing trees are swept at startup ([`job::sweep_stale`])
//! and everything durable lives in `publish/` and `error/`.
//!
//! # Security Model
//!
//! - **Untrusted identities**: network names and code hashes are
//!   allowlist-sanitized before any path is built
//!   ([`constants::sanitize_component`]).
//! - **Untrusted uploads**: the archive type is sniffed from magic bytes
//!   ([`sniff::ArchiveKind`]); client-declared content types are ignored.
//! - **Sandboxed builds**: one container per job with a privilege-dropped
//!   profile (`no-new-privileges`, all capabilities dropped), bounded in
//!   number by admission control over the live [`registry::ProcessRegistry`]
//!   count.
//! - **Shutdown hygiene**: registered build processes are terminated
//!   (gracefully, then forcefully) before the host process exits.

pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod executor;
pub mod job;
pub mod locations;
pub mod metadata;
pub mod registry;
pub mod sniff;

// Re-exports
pub use chain::{BytecodeSource, RpcBytecodeSource};
pub use config::VerifierConfig;
pub use error::{Error, Result};
pub use executor::{BuildExecutor, BuildOutcome, RunningBuild};
pub use job::{promote_success, record_failure, sweep_stale, VerificationJob};
pub use locations::{VerificationInfo, VerificationStatus, VerifierLocations};
pub use registry::{BuildProcess, ProcessRegistry};
pub use sniff::{peek_head, ArchiveKind};
