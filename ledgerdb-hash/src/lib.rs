//! Canonical hashing of wire values and commutative combination of digests
//! (spec §4.1). The commit hash is the cryptographic backbone of the whole
//! driver: both driver and server fold the same statements into the same
//! rolling digest, in the same order, and compare at commit time.

use serde::Serialize;
use sha2::{Digest as _, Sha256};

use ledgerdb_base::{Error, ErrorKind, Result};

/// An opaque 32-byte SHA-256 digest. `Digest::EMPTY` is the identity element
/// for `combine`, and also the value a freshly-started transaction's commit
/// hash begins at (spec §3: "all digests in a transaction's hash chain are
/// exactly 32 bytes").
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub const EMPTY: Digest = Digest([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        *self == Digest::EMPTY
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::new(ErrorKind::Serialization))?;
        Ok(Digest(arr))
    }
}

/// Canonically serializes `value` to the driver's document format (MessagePack,
/// via `rmp-serde` -- the out-of-scope binary document-serialization library
/// named in spec §1) and hashes the resulting bytes.
pub fn hash<T: Serialize>(value: &T) -> Result<Digest> {
    let bytes = rmp_serde::to_vec(value).map_err(|e| Error::with_cause(ErrorKind::Serialization, e))?;
    Ok(hash_bytes(&bytes))
}

/// Hashes already-encoded bytes directly, for callers (like `ledgerdb-txn`)
/// that need the digest of parameter bytes they've already serialized once,
/// so they can send the identical bytes over the wire.
pub fn hash_bytes(bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Digest(hasher.finalize().into())
}

/// Orders two digests by interpreting their bytes as little-endian
/// two's-complement 256-bit integers, smallest first.
fn order(a: &Digest, b: &Digest) -> (Digest, Digest) {
    for i in (0..32).rev() {
        match a.0[i].cmp(&b.0[i]) {
            std::cmp::Ordering::Less => return (*a, *b),
            std::cmp::Ordering::Greater => return (*b, *a),
            std::cmp::Ordering::Equal => continue,
        }
    }
    (*a, *b)
}

/// Combines two digests order-independently: if either is `Digest::EMPTY`,
/// returns the other unchanged; otherwise orders the two operands and hashes
/// their concatenation. This is the rule both the driver and the server use
/// to fold statement/parameter digests into the transaction's running commit
/// hash, and it is what makes `combine` commutative.
pub fn combine(a: &Digest, b: &Digest) -> Digest {
    if a.is_empty() {
        return *b;
    }
    if b.is_empty() {
        return *a;
    }
    let (lo, hi) = order(a, b);
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&lo.0);
    buf[32..].copy_from_slice(&hi.0);
    hash_bytes(&buf)
}
