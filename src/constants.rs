//! # Verifier Constants
//!
//! Defines the resource limits, directory-layout names, and input validation
//! helpers for the verification pipeline. These constants are the **single
//! source of truth** for security-critical bounds throughout the codebase.
//!
//! ## Security Rationale
//!
//! Every externally supplied string that can end up in a filesystem path
//! goes through [`sanitize_component`] first. Validation is allowlist-based
//! (only listed characters survive) rather than blocklist-based, so path
//! separators, `..` sequences, and null bytes can never reach a path join.
//!
//! ## Cross-References
//!
//! - [`crate::locations`]: Uses the layout names and `sanitize_component`
//! - [`crate::sniff`]: Uses `HEAD_BYTES` for archive classification
//! - [`crate::executor`]: Uses the mount points and marker-file names
//! - [`crate::config`]: Uses the default limits

// =============================================================================
// Concurrency and Size Limits
// =============================================================================

/// Default ceiling for concurrently running build containers.
///
/// **Security**: Each build owns one sandboxed container; without a ceiling a
/// burst of uploads could exhaust host memory and CPU. Admission control
/// rejects new uploads with a retryable capacity error once this is reached.
pub const DEFAULT_MAX_CONTAINERS: usize = 5;

/// Default maximum size of an uploaded source package (10 MB).
///
/// **Security**: Bounds disk usage in the staging area. Uploads exceeding the
/// ceiling are discarded entirely, never kept as partial archives.
pub const DEFAULT_MAX_PACKAGE_BYTES: u64 = 10_000_000;

/// Number of head bytes inspected for archive type classification.
///
/// The longest supported magic sequence (ZIP) is four bytes; gzip and bzip2
/// need three.
pub const HEAD_BYTES: usize = 4;

// =============================================================================
// Directory Layout
// =============================================================================
//
// A verification job moves through four mutually exclusive directory states.
// Transitions are same-volume renames, never copy-then-delete, so at most
// one state directory exists for a job at any time.
// =============================================================================

/// Subdirectory for uploads currently being written.
pub const STAGING_DIR: &str = "staging";

/// Subdirectory for jobs with a running build container.
pub const PROCESSING_DIR: &str = "processing";

/// Subdirectory holding the log and container id of failed builds.
pub const ERROR_DIR: &str = "error";

// =============================================================================
// Job Marker Files
// =============================================================================

/// File stem of the uploaded archive; the sniffed extension is appended.
pub const PACKAGE_STEM: &str = "package";

/// Reference on-chain bytecode, compared against the rebuilt artifact
/// inside the sandbox.
pub const PRISTINE_FILE: &str = "pristine.wasm";

/// Combined stdout/stderr of the build container.
pub const LOG_FILE: &str = "out.log";

/// Container id as written by the engine's `--cidfile`; lets an operator
/// identify and kill a stuck build out-of-band.
pub const CID_FILE: &str = "cid";

/// Contract ABI file, published on success or via the signed-metadata path.
pub const METADATA_FILE: &str = "metadata.json";

/// Build output tree produced by the verifier image inside `/build`.
pub const PACKAGE_DIR: &str = "package";

/// Source subtree inside the package; its presence in the publish directory
/// is what makes a code hash `verified`.
pub const SRC_DIR: &str = "src";

// =============================================================================
// Container Mounts
// =============================================================================

/// Bind-mount target of the processing directory inside the container.
pub const BUILD_MOUNT: &str = "/build";

/// Bind-mount target of the shared cargo registry cache.
pub const CARGO_CACHE_MOUNT: &str = "/usr/local/cargo/registry";

/// Bind-mount target of the shared rustup toolchain cache.
pub const RUSTUP_CACHE_MOUNT: &str = "/usr/local/rustup";

// =============================================================================
// Input Validation
// =============================================================================

/// Characters allowed in a network name or code hash once it is used as a
/// path component.
///
/// **Security**: Excludes `/`, `\`, null bytes, and every other character
/// that could alter path resolution.
pub const COMPONENT_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.";

/// Maximum length of a sanitized path component.
///
/// **Rationale**: 128 characters accommodates `0x`-prefixed 32-byte hashes
/// and descriptive network names while staying well under filesystem limits.
pub const MAX_COMPONENT_LEN: usize = 128;

/// Sanitizes an untrusted string for use as a single path component.
///
/// Characters outside [`COMPONENT_VALID_CHARS`] are stripped. The result is
/// rejected when it is empty, consists only of dots (`.` and `..` would
/// change path resolution), or exceeds [`MAX_COMPONENT_LEN`].
///
/// # Security
///
/// This is a mandatory step, not an optimization: network names and code
/// hashes arrive from unauthenticated clients and are used to build every
/// job directory path.
pub fn sanitize_component(input: &str) -> std::result::Result<String, &'static str> {
    let cleaned: String = input
        .chars()
        .filter(|c| COMPONENT_VALID_CHARS.contains(*c))
        .collect();

    if cleaned.is_empty() {
        return Err("path component is empty after sanitization");
    }
    if cleaned.len() > MAX_COMPONENT_LEN {
        return Err("path component exceeds maximum length");
    }
    if cleaned.chars().all(|c| c == '.') {
        return Err("path component consists only of dots");
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_passes_valid_components() {
        assert_eq!(
            sanitize_component("rococoContracts").unwrap(),
            "rococoContracts"
        );
        assert_eq!(
            sanitize_component("0x5160f95ab8bd6a2d3211a72a4a2d1e95").unwrap(),
            "0x5160f95ab8bd6a2d3211a72a4a2d1e95"
        );
        assert_eq!(sanitize_component("net-1.test_a").unwrap(), "net-1.test_a");
    }

    #[test]
    fn test_sanitize_strips_separators_and_nulls() {
        assert_eq!(sanitize_component("a/b\\c").unwrap(), "abc");
        assert_eq!(sanitize_component("a\0b").unwrap(), "ab");
        assert_eq!(
            sanitize_component("../../etc/passwd").unwrap(),
            "....etcpasswd"
        );
    }

    #[test]
    fn test_sanitize_rejects_empty_and_dot_only() {
        assert!(sanitize_component("").is_err());
        assert!(sanitize_component("///").is_err());
        assert!(sanitize_component(".").is_err());
        assert!(sanitize_component("..").is_err());
    }

    #[test]
    fn test_sanitize_rejects_overlong() {
        let long = "a".repeat(MAX_COMPONENT_LEN + 1);
        assert!(sanitize_component(&long).is_err());
    }
}
