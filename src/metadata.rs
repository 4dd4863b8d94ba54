//! Signed metadata publication.
//!
//! Alternative, lower-privilege path that makes the contract ABI
//! (`metadata.json`) available for message and event decoding without a
//! full reproducible-build verification.
//!
//! The owner of a code hash is trusted for this: there is no incentive to
//! provide a wrong ABI for one's own deployed bytecode, since the owner
//! could have deployed any bytecode in the first place. The flow is:
//!
//! 1. Stream the uploaded `metadata.json` into a unique scratch directory,
//!    hashing it on the fly.
//! 2. Look up the owner address recorded on chain for the code hash.
//! 3. Verify the provided signature over `sha256(metadata) | code hash`.
//! 4. Only if valid, move the file into the publish directory.
//!
//! The scratch directory is removed on every path, valid or not.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::chain::{decode_hex, BytecodeSource};
use crate::config::VerifierConfig;
use crate::constants::METADATA_FILE;
use crate::error::{Error, Result};
use crate::locations::{VerificationStatus, VerifierLocations};

/// Copy buffer for the streamed upload.
const COPY_BUF: usize = 8 * 1024;

/// Verifies the owner signature for a metadata upload and publishes it.
///
/// Allowed only while the code hash is `unverified` or `metadata` (owners
/// may override their own previous metadata); any other status is a
/// conflict. The publish directory is created if absent; an existing one is
/// tolerated because this path coexists with later full verification.
pub async fn verify_and_publish_metadata<R: AsyncRead + Unpin>(
    locs: &VerifierLocations,
    config: &VerifierConfig,
    source: &dyn BytecodeSource,
    mut reader: R,
    signature: &str,
) -> Result<()> {
    match locs.status() {
        VerificationStatus::Unverified | VerificationStatus::Metadata => {}
        _ => {
            return Err(Error::Conflict(format!(
                "the code hash {} cannot be updated",
                locs.code_hash_path()
            )))
        }
    }

    tokio::fs::create_dir_all(&config.tmp_dir).await?;
    let scratch = tempfile::Builder::new()
        .prefix(&format!("meta-{}-{}-", locs.network, locs.code_hash))
        .tempdir_in(&config.tmp_dir)?;
    let scratch_file = scratch.path().join(METADATA_FILE);

    let mut hasher = Sha256::new();
    let mut file = tokio::fs::File::create(&scratch_file).await?;
    let mut buf = [0u8; COPY_BUF];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
    }
    file.flush().await?;
    drop(file);

    let digest = hex::encode(hasher.finalize());
    let message = format!("{}{}", digest, locs.code_hash.trim_start_matches("0x"));

    let owner = source.owner_of(&locs.network, &locs.code_hash).await?;

    info!(
        "verifying metadata [codeHash={}, owner={}]",
        locs.code_hash, owner
    );
    verify_signature(&message, signature, &owner)?;

    tokio::fs::create_dir_all(&locs.publish_dir).await?;
    tokio::fs::rename(&scratch_file, locs.publish_dir.join(METADATA_FILE)).await?;

    info!(
        "published signed metadata for {}",
        locs.code_hash_path()
    );
    Ok(())
    // scratch dropped here, removing the directory tree
}

/// Verifies an ed25519 `signature` over `message` for the `owner` address.
///
/// The owner address is the hex-encoded 32-byte public key; the signature
/// is 64 hex-encoded bytes. Both accept an optional `0x` prefix.
pub fn verify_signature(message: &str, signature: &str, owner: &str) -> Result<()> {
    let key_bytes = decode_hex(owner)
        .map_err(|e| Error::Upstream(format!("owner address is not valid hex: {}", e)))?;
    let key_bytes: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Upstream(format!("owner address has wrong length: {}", owner)))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| Error::Upstream(format!("owner address is not a valid key: {}", e)))?;

    let sig_bytes = decode_hex(signature)
        .map_err(|e| Error::Upstream(format!("signature is not valid hex: {}", e)))?;
    let sig = Signature::from_slice(&sig_bytes)
        .map_err(|e| Error::Upstream(format!("malformed signature: {}", e)))?;

    key.verify_strict(message.as_bytes(), &sig)
        .map_err(|_| Error::Upstream(format!("invalid signature for owner {}", owner)))
}
