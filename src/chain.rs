//! Chain collaborator boundary: reference bytecode and code-hash ownership.
//!
//! The orchestrator only needs two facts from a chain: the pristine
//! bytecode recorded for a code hash (the ground truth a rebuilt artifact
//! is checked against) and the owner address of that code hash (consulted
//! by the signed-metadata path). Both sit behind [`BytecodeSource`] so the
//! pipeline and its tests never depend on a live node.
//!
//! [`RpcBytecodeSource`] is the shipped implementation: a narrow JSON-RPC
//! client over HTTP against a per-network endpoint registry taken from the
//! configuration. Endpoint resolution failures, RPC errors, and empty
//! results all surface as upstream (400-class) errors; nothing here is
//! retried internally.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::VerifierConfig;
use crate::error::{Error, Result};

/// RPC method returning the pristine bytecode for a code hash.
const PRISTINE_CODE_METHOD: &str = "contracts_pristineCode";

/// RPC method returning the owner address for a code hash.
const OWNER_OF_METHOD: &str = "contracts_ownerOf";

// =============================================================================
// Boundary Trait
// =============================================================================

/// Source of on-chain facts about a code hash.
#[async_trait]
pub trait BytecodeSource: Send + Sync {
    /// Fetches the canonical on-chain bytecode for `code_hash`.
    ///
    /// # Errors
    ///
    /// Fails when the network cannot be resolved to an endpoint or the code
    /// hash has no recorded bytecode.
    async fn pristine_code(&self, network: &str, code_hash: &str) -> Result<Vec<u8>>;

    /// Fetches the owner address recorded for `code_hash`.
    async fn owner_of(&self, network: &str, code_hash: &str) -> Result<String>;
}

// =============================================================================
// JSON-RPC Implementation
// =============================================================================

/// JSON-RPC over HTTP implementation of [`BytecodeSource`].
pub struct RpcBytecodeSource {
    endpoints: HashMap<String, String>,
    client: reqwest::Client,
}

impl RpcBytecodeSource {
    /// Creates a source over an explicit network-to-endpoint map.
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self {
            endpoints,
            client: reqwest::Client::new(),
        }
    }

    /// Creates a source from the configured endpoint registry.
    pub fn from_config(config: &VerifierConfig) -> Self {
        Self::new(config.endpoints.clone())
    }

    fn endpoint_for(&self, network: &str) -> Result<&str> {
        self.endpoints
            .get(network)
            .map(String::as_str)
            .ok_or_else(|| Error::Upstream(format!("no endpoint found for {}", network)))
    }

    /// Issues one JSON-RPC call and returns the string result.
    async fn rpc_string(
        &self,
        network: &str,
        method: &str,
        params: serde_json::Value,
        missing: &str,
    ) -> Result<String> {
        let endpoint = self.endpoint_for(network)?;
        debug!("querying {} on {}", method, endpoint);

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("{} request failed: {}", method, e)))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("{} returned malformed response: {}", method, e)))?;

        if let Some(rpc_error) = payload.get("error") {
            return Err(Error::Upstream(format!("{} failed: {}", method, rpc_error)));
        }

        match payload.get("result") {
            Some(serde_json::Value::String(result)) => Ok(result.clone()),
            Some(serde_json::Value::Null) | None => Err(Error::Upstream(missing.to_string())),
            Some(other) => Err(Error::Upstream(format!(
                "{} returned unexpected result: {}",
                method, other
            ))),
        }
    }
}

#[async_trait]
impl BytecodeSource for RpcBytecodeSource {
    async fn pristine_code(&self, network: &str, code_hash: &str) -> Result<Vec<u8>> {
        let result = self
            .rpc_string(
                network,
                PRISTINE_CODE_METHOD,
                json!([code_hash]),
                &format!("pristine code not found for {}", code_hash),
            )
            .await?;

        decode_hex(&result)
            .map_err(|e| Error::Upstream(format!("pristine code is not valid hex: {}", e)))
    }

    async fn owner_of(&self, network: &str, code_hash: &str) -> Result<String> {
        self.rpc_string(
            network,
            OWNER_OF_METHOD,
            json!([code_hash]),
            &format!("owner info not found for {}", code_hash),
        )
        .await
    }
}

/// Decodes a hex string with or without a `0x` prefix.
pub(crate) fn decode_hex(input: &str) -> std::result::Result<Vec<u8>, hex::FromHexError> {
    hex::decode(input.trim_start_matches("0x"))
}
