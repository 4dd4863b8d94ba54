//! # Archive Type Sniffer
//!
//! Classifies an uploaded byte stream by its magic bytes, without trusting
//! any client-declared content type and without buffering the whole stream.
//!
//! ## Why Sniffing Is Mandatory
//!
//! Streamed multipart uploads do not expose a trustworthy content type, and
//! the sniffed extension decides the decompression strategy inside the
//! sandboxed build. Trusting a client label would let an upload mislabel an
//! archive to evade or exploit the build pipeline, so an unrecognized head
//! is a terminal classification failure, never a guess.
//!
//! ## Stream Reconstruction
//!
//! [`peek_head`] consumes at most [`HEAD_BYTES`] from the source and hands
//! back both the peeked prefix and a reader that yields the prefix followed
//! by the untouched remainder, byte for byte. The caller can classify and
//! then stream the complete upload to disk with no loss or duplication.

use std::io::Cursor;

use tokio::io::{AsyncRead, AsyncReadExt, Chain};

use crate::constants::HEAD_BYTES;
use crate::error::{Error, Result};

// =============================================================================
// Magic Bytes
// =============================================================================

const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B, 0x08];
const BZIP2_MAGIC: &[u8] = &[0x42, 0x5A, 0x68];

// =============================================================================
// Archive Kind
// =============================================================================

/// Supported compressed archive formats for source packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// ZIP archive (`50 4B 03 04`).
    Zip,
    /// Gzip-compressed tarball (`1F 8B 08`).
    Gzip,
    /// Bzip2-compressed tarball (`42 5A 68`).
    Bzip2,
}

impl ArchiveKind {
    /// Classifies the peeked head bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownArchive`] for any byte pattern that matches
    /// none of the supported magics.
    pub fn sniff(head: &[u8]) -> Result<Self> {
        if head.starts_with(ZIP_MAGIC) {
            Ok(Self::Zip)
        } else if head.starts_with(GZIP_MAGIC) {
            Ok(Self::Gzip)
        } else if head.starts_with(BZIP2_MAGIC) {
            Ok(Self::Bzip2)
        } else {
            Err(Error::UnknownArchive {
                head: hex::encode(head),
            })
        }
    }

    /// File extension used for the staged archive.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Gzip => "gz",
            Self::Bzip2 => "bz2",
        }
    }

    /// IANA media type of the archive.
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Zip => "application/zip",
            Self::Gzip => "application/gzip",
            Self::Bzip2 => "application/x-bzip2",
        }
    }
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

// =============================================================================
// Head Peeking
// =============================================================================

/// Reader returned by [`peek_head`]: the peeked prefix chained with the
/// remainder of the original stream.
pub type PeekedStream<R> = Chain<Cursor<Vec<u8>>, R>;

/// Reads up to [`HEAD_BYTES`] from `reader` and reconstructs the stream.
///
/// Returns the peeked bytes (fewer than [`HEAD_BYTES`] only if the stream
/// ended early) together with a reader producing the original byte sequence
/// in full. The head is owned twice on purpose: once for classification,
/// once inside the reconstructed stream.
pub async fn peek_head<R: AsyncRead + Unpin>(mut reader: R) -> Result<(Vec<u8>, PeekedStream<R>)> {
    let mut head = Vec::with_capacity(HEAD_BYTES);
    let mut buf = [0u8; HEAD_BYTES];

    while head.len() < HEAD_BYTES {
        let n = reader.read(&mut buf[..HEAD_BYTES - head.len()]).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }

    let stream = Cursor::new(head.clone()).chain(reader);
    Ok((head, stream))
}
