//! End-to-end tests for the verification job orchestrator.
//!
//! A small shell script stands in for the container engine CLI: it records
//! a container id, writes build output to stdout (captured into `out.log`),
//! optionally produces the `package/` tree a real verifier image would
//! build, and exits with a fixed code. This exercises the true pipeline
//! (spawn, registry tracking, monitoring, and directory reconciliation)
//! without a container daemon.

#![cfg(unix)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contract_verifier::{
    job, BuildExecutor, BytecodeSource, Error, ProcessRegistry, Result, VerificationJob,
    VerificationStatus, VerifierConfig, VerifierLocations,
};
use tempfile::TempDir;

// =============================================================================
// Fixtures
// =============================================================================

const PRISTINE_BYTES: &[u8] = b"\x00asm\x01\x00\x00\x00";

/// Chain source returning fixed data; no network involved.
struct StaticSource;

#[async_trait]
impl BytecodeSource for StaticSource {
    async fn pristine_code(&self, _network: &str, _code_hash: &str) -> Result<Vec<u8>> {
        Ok(PRISTINE_BYTES.to_vec())
    }

    async fn owner_of(&self, _network: &str, _code_hash: &str) -> Result<String> {
        Ok("00".repeat(32))
    }
}

/// Writes an executable engine stand-in script.
fn write_stub_engine(dir: &Path, exit_code: i32, make_package: bool) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let make_pkg = if make_package { 1 } else { 0 };
    let body = format!(
        r#"#!/bin/sh
# Engine stand-in: mimics `docker run` for the build executor.
build=""
cid=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--cidfile" ]; then cid="$a"; fi
  case "$a" in
    *:/build) build="${{a%:/build}}" ;;
  esac
  prev="$a"
done
if [ -n "$cid" ]; then echo "stub-container-0001" > "$cid"; fi
echo "verifier image starting"
if [ {make_pkg} -eq 1 ] && [ -n "$build" ]; then
  mkdir -p "$build/package/src/target/release/ink"
  echo '{{"contract":{{"name":"stub"}}}}' > "$build/package/src/target/release/ink/metadata.json"
  echo 'fn main() {{}}' > "$build/package/src/lib.rs"
  echo 'artifact' > "$build/package/stub.contract"
fi
echo "verifier image done"
exit {exit_code}
"#
    );

    let script = dir.join(format!("engine-{}-{}.sh", exit_code, make_pkg));
    fs::write(&script, body).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

struct Fixture {
    _temp: TempDir,
    config: Arc<VerifierConfig>,
    registry: Arc<ProcessRegistry>,
    executor: Arc<BuildExecutor>,
}

impl Fixture {
    fn new(exit_code: i32, make_package: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let engine = write_stub_engine(temp.path(), exit_code, make_package);

        let mut config = VerifierConfig::with_base(temp.path().join("data"));
        config.engine = engine.to_string_lossy().into_owned();
        let config = Arc::new(config);

        let registry = Arc::new(ProcessRegistry::new());
        let executor = Arc::new(BuildExecutor::new(
            Arc::clone(&config),
            Arc::clone(&registry),
        ));

        Self {
            _temp: temp,
            config,
            registry,
            executor,
        }
    }

    fn job(&self, network: &str, code_hash: &str) -> VerificationJob {
        let locations = VerifierLocations::new(&self.config, network, code_hash).unwrap();
        VerificationJob::new(
            locations,
            Arc::clone(&self.executor),
            Arc::new(StaticSource),
        )
    }

    /// Switches the stub engine, e.g. from a failing to a succeeding one.
    fn set_engine(&mut self, exit_code: i32, make_package: bool) {
        let engine = write_stub_engine(self._temp.path(), exit_code, make_package);
        let mut config = (*self.config).clone();
        config.engine = engine.to_string_lossy().into_owned();
        self.config = Arc::new(config);
        self.executor = Arc::new(BuildExecutor::new(
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
        ));
    }
}

fn zip_upload(payload_len: usize) -> Cursor<Vec<u8>> {
    let mut bytes = vec![0x50, 0x4B, 0x03, 0x04];
    bytes.extend(std::iter::repeat(0xAB).take(payload_len));
    Cursor::new(bytes)
}

/// Waits until no in-flight directory remains for the job.
async fn wait_for_resolution(locs: &VerifierLocations) {
    for _ in 0..400 {
        if !locs.staging_dir.exists() && !locs.processing_dir.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job did not resolve in time");
}

// =============================================================================
// End-to-End Tests
// =============================================================================

#[tokio::test]
async fn test_end_to_end_success() {
    let fx = Fixture::new(0, true);
    let job = fx.job("t", "0xabc");
    let locs = job.locations().clone();

    job.submit(zip_upload(64)).await.unwrap();
    wait_for_resolution(&locs).await;

    // Publish holds the source tree and relocated metadata; the build
    // scratch directory was pruned.
    assert!(locs.publish_dir.join("src").join("lib.rs").exists());
    assert!(locs.publish_dir.join("metadata.json").exists());
    assert!(locs.publish_dir.join("stub.contract").exists());
    assert!(!locs.publish_dir.join("src").join("target").exists());

    // Processing and staging are gone, nothing failed.
    assert!(!locs.processing_dir.exists());
    assert!(!locs.staging_dir.exists());
    assert!(!locs.error_dir.exists());

    assert_eq!(locs.status(), VerificationStatus::Verified);
    assert_eq!(fx.registry.count(), 0);
}

#[tokio::test]
async fn test_end_to_end_failure() {
    let fx = Fixture::new(1, false);
    let job = fx.job("t", "0xabc");
    let locs = job.locations().clone();

    job.submit(zip_upload(64)).await.unwrap();
    wait_for_resolution(&locs).await;

    // Only the log and the container id survive, in the error location.
    assert!(locs.error_dir.join("out.log").exists());
    assert!(locs.error_dir.join("cid").exists());

    let log = fs::read_to_string(locs.error_dir.join("out.log")).unwrap();
    assert!(log.contains("verifier image starting"));
    let cid = fs::read_to_string(locs.error_dir.join("cid")).unwrap();
    assert_eq!(cid.trim(), "stub-container-0001");

    assert!(!locs.processing_dir.exists());
    assert!(!locs.staging_dir.exists());
    assert!(!locs.publish_dir.exists());

    assert_eq!(locs.status(), VerificationStatus::Error);
    assert_eq!(fx.registry.count(), 0);
}

#[tokio::test]
async fn test_reupload_after_error_clears_stale_record() {
    let mut fx = Fixture::new(1, false);

    let job = fx.job("t", "0xabc");
    let locs = job.locations().clone();
    job.submit(zip_upload(64)).await.unwrap();
    wait_for_resolution(&locs).await;
    assert_eq!(locs.status(), VerificationStatus::Error);

    // A fresh upload is admitted after an error, and a later success
    // removes the stale error record.
    fx.set_engine(0, true);
    let job = fx.job("t", "0xabc");
    job.submit(zip_upload(64)).await.unwrap();
    wait_for_resolution(&locs).await;

    assert_eq!(locs.status(), VerificationStatus::Verified);
    assert!(!locs.error_dir.exists());
}

#[tokio::test]
async fn test_staged_files_before_processing() {
    let fx = Fixture::new(0, true);
    let job = fx.job("t", "0xabc");
    let locs = job.locations().clone();

    job.check_admission().unwrap();
    job.prepare_staging().unwrap();
    job.write_to_staging(zip_upload(16)).await.unwrap();
    job.write_pristine().await.unwrap();

    let package = fs::read(locs.staging_dir.join("package.zip")).unwrap();
    assert_eq!(&package[..4], &[0x50, 0x4B, 0x03, 0x04]);
    assert_eq!(package.len(), 20);
    assert_eq!(
        fs::read(locs.staging_dir.join("pristine.wasm")).unwrap(),
        PRISTINE_BYTES
    );
    assert_eq!(locs.status(), VerificationStatus::Staging);

    job.start_processing().await.unwrap();
    wait_for_resolution(&locs).await;
    assert_eq!(locs.status(), VerificationStatus::Verified);
}

// =============================================================================
// Admission Tests
// =============================================================================

#[tokio::test]
async fn test_admission_conflicts() {
    let fx = Fixture::new(0, true);

    let staged = fx.job("t", "0xaaa");
    fs::create_dir_all(&staged.locations().staging_dir).unwrap();
    let err = staged.check_admission().unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(err.to_string().contains("staged"));

    let processing = fx.job("t", "0xbbb");
    fs::create_dir_all(&processing.locations().processing_dir).unwrap();
    let err = processing.check_admission().unwrap_err();
    assert!(err.to_string().contains("in processing"));

    let verified = fx.job("t", "0xccc");
    fs::create_dir_all(verified.locations().publish_dir.join("src")).unwrap();
    let err = verified.check_admission().unwrap_err();
    assert!(err.to_string().contains("already verified"));
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn test_capacity_error_when_ceiling_saturated() {
    let mut fx = Fixture::new(0, true);
    {
        let mut config = (*fx.config).clone();
        config.max_containers = 0;
        fx.config = Arc::new(config);
        fx.executor = Arc::new(BuildExecutor::new(
            Arc::clone(&fx.config),
            Arc::clone(&fx.registry),
        ));
    }

    // With ceiling 0 a single registered process saturates admission.
    fx.registry.add(424242, "t/0xother");

    let job = fx.job("t", "0xaaa");
    let err = job.check_admission().unwrap_err();
    assert!(matches!(err, Error::Capacity));
    assert_eq!(err.status(), 429);
    assert!(err.is_retryable());

    // Conflict checks run before the capacity check.
    let conflicted = fx.job("t", "0xbbb");
    fs::create_dir_all(&conflicted.locations().staging_dir).unwrap();
    let err = conflicted.check_admission().unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // Freeing the slot admits again.
    fx.registry.remove(424242);
    job.check_admission().unwrap();
}

#[tokio::test]
async fn test_prepare_staging_is_the_race_guard() {
    let fx = Fixture::new(0, true);
    let job = fx.job("t", "0xabc");

    job.prepare_staging().unwrap();
    let err = job.prepare_staging().unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

// =============================================================================
// Upload Failure Tests
// =============================================================================

#[tokio::test]
async fn test_truncated_upload_is_discarded() {
    let mut fx = Fixture::new(0, true);
    {
        let mut config = (*fx.config).clone();
        config.max_package_bytes = 8;
        fx.config = Arc::new(config);
        fx.executor = Arc::new(BuildExecutor::new(
            Arc::clone(&fx.config),
            Arc::clone(&fx.registry),
        ));
    }

    let job = fx.job("t", "0xabc");
    let locs = job.locations().clone();

    let err = job.submit(zip_upload(64)).await.unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge));
    assert_eq!(err.status(), 413);

    // No partial archive is retained and re-admission works.
    assert!(!locs.staging_dir.exists());
    assert_eq!(locs.status(), VerificationStatus::Unverified);
    job.check_admission().unwrap();
}

#[tokio::test]
async fn test_unknown_archive_is_discarded() {
    let fx = Fixture::new(0, true);
    let job = fx.job("t", "0xabc");
    let locs = job.locations().clone();

    let err = job
        .submit(Cursor::new(b"plain text upload".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownArchive { .. }));

    assert!(!locs.staging_dir.exists());
    assert_eq!(locs.status(), VerificationStatus::Unverified);
}

// =============================================================================
// Reconciliation Tests (direct, no engine)
// =============================================================================

fn make_processing_tree(locs: &VerifierLocations) {
    let pack = locs.processing_dir.join("package");
    fs::create_dir_all(pack.join("src/target/release/ink")).unwrap();
    fs::write(pack.join("src/target/release/ink/metadata.json"), b"{}").unwrap();
    fs::write(pack.join("src/lib.rs"), b"fn main() {}").unwrap();
    fs::write(locs.processing_dir.join("out.log"), b"log line\n").unwrap();
    fs::write(locs.processing_dir.join("cid"), b"cid-0001\n").unwrap();
    fs::write(locs.processing_dir.join("package.zip"), b"PK\x03\x04").unwrap();
}

#[tokio::test]
async fn test_promote_success_semantics() {
    let fx = Fixture::new(0, true);
    let locs = fx.job("t", "0xabc").locations().clone();

    make_processing_tree(&locs);
    fs::create_dir_all(&locs.error_dir).unwrap();

    job::promote_success(&locs).unwrap();

    assert!(locs.publish_dir.join("src/lib.rs").exists());
    assert!(locs.publish_dir.join("metadata.json").exists());
    assert!(!locs.publish_dir.join("src/target").exists());
    assert!(!locs.processing_dir.exists());
    // Success clears a previous failed attempt.
    assert!(!locs.error_dir.exists());
    assert_eq!(locs.status(), VerificationStatus::Verified);
}

#[tokio::test]
async fn test_promote_conflicts_with_occupied_publish() {
    let fx = Fixture::new(0, true);
    let locs = fx.job("t", "0xabc").locations().clone();

    make_processing_tree(&locs);
    fs::create_dir_all(&locs.publish_dir).unwrap();

    let err = job::promote_success(&locs).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn test_record_failure_semantics() {
    let fx = Fixture::new(0, true);
    let locs = fx.job("t", "0xabc").locations().clone();

    make_processing_tree(&locs);
    // Stale record from an earlier attempt: last error wins.
    fs::create_dir_all(&locs.error_dir).unwrap();
    fs::write(locs.error_dir.join("out.log"), b"old log\n").unwrap();

    job::record_failure(&locs).unwrap();

    assert_eq!(
        fs::read(locs.error_dir.join("out.log")).unwrap(),
        b"log line\n"
    );
    assert!(locs.error_dir.join("cid").exists());
    // Only the log and cid are preserved.
    assert!(!locs.error_dir.join("package.zip").exists());
    assert!(!locs.error_dir.join("package").exists());
    assert!(!locs.processing_dir.exists());
    assert_eq!(locs.status(), VerificationStatus::Error);
}

// =============================================================================
// Crash Recovery Tests
// =============================================================================

#[tokio::test]
async fn test_sweep_stale_removes_only_inflight_work() {
    let fx = Fixture::new(0, true);
    let locs = fx.job("t", "0xabc").locations().clone();

    fs::create_dir_all(&locs.staging_dir).unwrap();
    fs::create_dir_all(&locs.processing_dir).unwrap();
    fs::create_dir_all(&locs.error_dir).unwrap();
    fs::create_dir_all(locs.publish_dir.join("src")).unwrap();

    job::sweep_stale(&fx.config);

    // In-flight work is gone; durable results survive.
    assert!(!locs.staging_dir.exists());
    assert!(!locs.processing_dir.exists());
    assert!(locs.error_dir.exists());
    assert!(locs.publish_dir.join("src").exists());

    // The swept job is admissible again.
    fx.job("t", "0xddd").check_admission().unwrap();
}
