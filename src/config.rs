//! Runtime configuration for the verification service.
//!
//! All knobs are environment-driven with sensible defaults rooted in the
//! user's home directory, so a bare `verifier` invocation works out of the
//! box and a containerized deployment can override everything:
//!
//! | Variable               | Default                        | Purpose                       |
//! |------------------------|--------------------------------|-------------------------------|
//! | `BASE_DIR`             | `~/.contract-verifier`         | staging/processing/error root |
//! | `PUBLISH_DIR`          | `<BASE_DIR>/publish`           | verified artifact root        |
//! | `CACHES_DIR`           | `<BASE_DIR>/caches`            | shared cargo/rustup caches    |
//! | `TMP_DIR`              | OS temp dir                    | metadata upload scratch       |
//! | `MAX_CONTAINERS`       | 5                              | build concurrency ceiling     |
//! | `MAX_PACKAGE_BYTES`    | 10000000                       | upload size ceiling           |
//! | `CONTAINER_ENGINE`     | `docker`                       | engine CLI (docker/podman)    |
//! | `VERIFIER_IMAGE`       | `ink-verifier:develop`         | sandboxed build image         |
//! | `CONTAINER_RUN_PARAMS` | (empty)                        | extra engine args, whitespace split |
//! | `CHAIN_ENDPOINTS`      | `{}`                           | JSON map network -> RPC URL   |

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::constants::{DEFAULT_MAX_CONTAINERS, DEFAULT_MAX_PACKAGE_BYTES};
use crate::error::{Error, Result};

/// Default container image performing the sandboxed reproducible build.
const DEFAULT_IMAGE: &str = "ink-verifier:develop";

/// Default container engine CLI.
const DEFAULT_ENGINE: &str = "docker";

/// Configuration for the verifier process.
///
/// Constructed once at startup and shared behind an `Arc`; nothing mutates
/// it afterwards.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Root of the staging/processing/error job areas.
    pub base_dir: PathBuf,
    /// Root of published (verified) artifacts, keyed by code hash only.
    pub publish_dir: PathBuf,
    /// Root of the cross-job dependency caches mounted into every build.
    pub caches_dir: PathBuf,
    /// Scratch space for the signed-metadata upload path.
    pub tmp_dir: PathBuf,
    /// Ceiling for concurrently running build containers.
    pub max_containers: usize,
    /// Ceiling for the uploaded package size in bytes.
    pub max_package_bytes: u64,
    /// Container engine CLI, e.g. `docker` or `podman`.
    pub engine: String,
    /// Image used for the sandboxed build.
    pub image: String,
    /// Extra arguments inserted into the engine `run` invocation,
    /// e.g. `--user 1000:1000`.
    pub run_params: Vec<String>,
    /// Network name to chain RPC endpoint map.
    pub endpoints: HashMap<String, String>,
}

impl VerifierConfig {
    /// Builds the configuration from the process environment.
    pub fn from_env() -> Self {
        let base_dir = env::var_os("BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_base_dir);

        let publish_dir = env::var_os("PUBLISH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("publish"));

        let caches_dir = env::var_os("CACHES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("caches"));

        let tmp_dir = env::var_os("TMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        let max_containers = parse_env("MAX_CONTAINERS", DEFAULT_MAX_CONTAINERS);
        let max_package_bytes = parse_env("MAX_PACKAGE_BYTES", DEFAULT_MAX_PACKAGE_BYTES);

        let engine = env::var("CONTAINER_ENGINE").unwrap_or_else(|_| DEFAULT_ENGINE.to_string());
        let image = env::var("VERIFIER_IMAGE").unwrap_or_else(|_| DEFAULT_IMAGE.to_string());

        let run_params = env::var("CONTAINER_RUN_PARAMS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let endpoints = env::var("CHAIN_ENDPOINTS")
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        Self {
            base_dir,
            publish_dir,
            caches_dir,
            tmp_dir,
            max_containers,
            max_package_bytes,
            engine,
            image,
            run_params,
            endpoints,
        }
    }

    /// Builds a configuration rooted at `base`, deriving the publish, cache
    /// and tmp directories from it. Primarily for tests and embedders.
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        let base_dir = base.into();
        Self {
            publish_dir: base_dir.join("publish"),
            caches_dir: base_dir.join("caches"),
            tmp_dir: base_dir.join("tmp"),
            max_containers: DEFAULT_MAX_CONTAINERS,
            max_package_bytes: DEFAULT_MAX_PACKAGE_BYTES,
            engine: DEFAULT_ENGINE.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            run_params: Vec::new(),
            endpoints: HashMap::new(),
            base_dir,
        }
    }

    /// Resolves the RPC endpoint for a network name.
    ///
    /// An unknown network is an upstream failure: the request can never
    /// succeed against this deployment's endpoint registry.
    pub fn endpoint_for(&self, network: &str) -> Result<&str> {
        self.endpoints
            .get(network)
            .map(String::as_str)
            .ok_or_else(|| Error::Upstream(format!("no endpoint found for {}", network)))
    }

    /// Root of the staging area (all networks).
    pub fn staging_root(&self) -> PathBuf {
        self.base_dir.join(crate::constants::STAGING_DIR)
    }

    /// Root of the processing area (all networks).
    pub fn processing_root(&self) -> PathBuf {
        self.base_dir.join(crate::constants::PROCESSING_DIR)
    }
}

/// Returns the default base directory.
fn default_base_dir() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        home.join(".contract-verifier")
    } else {
        PathBuf::from(".contract-verifier")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
