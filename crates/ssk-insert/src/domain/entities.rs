//! # Core Domain Entities
//!
//! The key and block types an insert operates on.
//!
//! - [`DsaPublicKey`]: opaque signing key bytes; its SHA-256 digest is the
//!   subspace identity.
//! - [`SskKey`]: routing identity of one slot in a subspace.
//! - [`SskBlock`]: a 1 KiB payload plus signed headers under one key.
//! - [`PeerId`]: 32-byte peer identifier for P2P communication.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::{Hash, Location};
use thiserror::Error;

/// Exact SSK payload length in bytes.
pub const SSK_DATA_LENGTH: usize = 1024;

/// Exact SSK header blob length in bytes (signature + symmetric-crypto
/// material, opaque to this subsystem).
pub const SSK_HEADERS_LENGTH: usize = 136;

/// Structural faults detected when assembling a block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("ssk data must be exactly {SSK_DATA_LENGTH} bytes, got {0}")]
    WrongDataLength(usize),

    #[error("ssk headers must be exactly {SSK_HEADERS_LENGTH} bytes, got {0}")]
    WrongHeadersLength(usize),

    #[error("key carries no public key to verify against")]
    MissingPubKey,

    #[error("public key does not hash to the key's pubkey hash")]
    PubKeyHashMismatch,
}

/// DSA public key identifying a subspace.
///
/// The subsystem never inspects the key material; signature checking belongs
/// to the verification subsystem. Only the SHA-256 digest matters here, as
/// it anchors the routing identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsaPublicKey(Vec<u8>);

impl DsaPublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// SHA-256 digest of the encoded key.
    pub fn hash(&self) -> Hash {
        Sha256::digest(&self.0).into()
    }
}

/// Routing identity of one SSK slot.
///
/// Identity is the pair (pubkey hash, document-name hash); the public key
/// itself is optional because a node can route on the hashes alone. Inserts,
/// however, must be able to hand the key to peers that lack it, so the insert
/// path requires it to be present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SskKey {
    pub_key_hash: Hash,
    doc_name_hash: Hash,
    pub_key: Option<DsaPublicKey>,
}

impl SskKey {
    /// Key known only by its hashes (no public key attached).
    pub fn from_hashes(pub_key_hash: Hash, doc_name_hash: Hash) -> Self {
        Self {
            pub_key_hash,
            doc_name_hash,
            pub_key: None,
        }
    }

    /// Key with the public key attached; the pubkey hash is derived.
    pub fn with_pub_key(pub_key: DsaPublicKey, doc_name_hash: Hash) -> Self {
        Self {
            pub_key_hash: pub_key.hash(),
            doc_name_hash,
            pub_key: Some(pub_key),
        }
    }

    pub fn pub_key(&self) -> Option<&DsaPublicKey> {
        self.pub_key.as_ref()
    }

    pub fn pub_key_hash(&self) -> Hash {
        self.pub_key_hash
    }

    pub fn doc_name_hash(&self) -> Hash {
        self.doc_name_hash
    }

    /// Combined routing key: SHA-256 over pubkey hash and doc-name hash.
    pub fn routing_key(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.pub_key_hash);
        hasher.update(self.doc_name_hash);
        hasher.finalize().into()
    }

    /// Position of this key on the routing ring.
    pub fn location(&self) -> Location {
        Location::from_hash(&self.routing_key())
    }
}

impl fmt::Display for SskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rk = self.routing_key();
        for byte in &rk[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// One SSK block: key, signed headers, and exactly 1 KiB of data.
///
/// Construction always enforces the structural lengths. With `verify` set it
/// additionally checks that the attached public key hashes to the key's
/// pubkey hash; a block adopted from a remote collision is rebuilt without
/// that check, matching how the node treats preexisting remote data as
/// authoritative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SskBlock {
    key: SskKey,
    headers: Vec<u8>,
    data: Vec<u8>,
}

impl SskBlock {
    pub fn new(
        data: Vec<u8>,
        headers: Vec<u8>,
        key: SskKey,
        verify: bool,
    ) -> Result<Self, BlockError> {
        if data.len() != SSK_DATA_LENGTH {
            return Err(BlockError::WrongDataLength(data.len()));
        }
        if headers.len() != SSK_HEADERS_LENGTH {
            return Err(BlockError::WrongHeadersLength(headers.len()));
        }
        if verify {
            let pub_key = key.pub_key().ok_or(BlockError::MissingPubKey)?;
            if pub_key.hash() != key.pub_key_hash() {
                return Err(BlockError::PubKeyHashMismatch);
            }
        }
        Ok(Self { key, headers, data })
    }

    pub fn key(&self) -> &SskKey {
        &self.key
    }

    pub fn raw_headers(&self) -> &[u8] {
        &self.headers
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }
}

/// Peer identifier for P2P network communication.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn new(id: [u8; 32]) -> Self {
        Self(id)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
