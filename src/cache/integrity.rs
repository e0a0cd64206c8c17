//! Keyed integrity tags for cached content.
//!
//! Tags are hex-encoded HMAC-SHA256 over the record content, keyed with a
//! secret supplied at startup. Verification decodes the stored tag and
//! compares it with the recomputed MAC in constant time.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{HuginnError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Process secret used to sign and verify cache records.
///
/// Construct once at startup and share by clone. The keyed MAC state is
/// derived here; signing cannot fail afterwards.
#[derive(Clone)]
pub struct IntegrityKey {
    mac: HmacSha256,
}

impl IntegrityKey {
    /// Shortest secret accepted, in bytes.
    pub const MIN_SECRET_LEN: usize = 32;

    /// Derive a key from a secret of at least [`MIN_SECRET_LEN`](Self::MIN_SECRET_LEN) bytes.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.len() < Self::MIN_SECRET_LEN {
            return Err(HuginnError::Configuration(format!(
                "cache integrity secret must be at least {} bytes (got {})",
                Self::MIN_SECRET_LEN,
                secret.len()
            )));
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|e| {
            HuginnError::Configuration(format!("invalid cache integrity secret: {e}"))
        })?;
        Ok(Self { mac })
    }

    /// Hex tag for `content`.
    pub fn sign(&self, content: &[u8]) -> String {
        hex::encode(self.digest(content))
    }

    /// Whether `tag` is the valid tag for `content`.
    ///
    /// Malformed hex and wrong-length tags are simply invalid.
    pub fn verify(&self, content: &[u8], tag: &str) -> bool {
        let Ok(stored) = hex::decode(tag) else {
            return false;
        };
        let computed = self.digest(content);
        if stored.len() != computed.len() {
            return false;
        }
        computed.as_slice().ct_eq(stored.as_slice()).into()
    }

    fn digest(&self, content: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(content);
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for IntegrityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IntegrityKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn short_secret_is_rejected() {
        let err = IntegrityKey::new(b"too-short").unwrap_err();
        assert!(matches!(err, HuginnError::Configuration(_)));
    }

    #[test]
    fn sign_then_verify() {
        let key = IntegrityKey::new(SECRET).unwrap();
        let tag = key.sign(b"payload");
        assert_eq!(tag.len(), 64);
        assert!(key.verify(b"payload", &tag));
    }

    #[test]
    fn verify_rejects_modified_content() {
        let key = IntegrityKey::new(SECRET).unwrap();
        let tag = key.sign(b"payload");
        assert!(!key.verify(b"payl0ad", &tag));
    }

    #[test]
    fn verify_rejects_malformed_tags() {
        let key = IntegrityKey::new(SECRET).unwrap();
        let tag = key.sign(b"payload");
        assert!(!key.verify(b"payload", "not hex"));
        assert!(!key.verify(b"payload", &tag[..62]));
        assert!(!key.verify(b"payload", ""));
    }

    #[test]
    fn different_secrets_produce_different_tags() {
        let a = IntegrityKey::new(SECRET).unwrap();
        let b = IntegrityKey::new(b"fedcba9876543210fedcba9876543210").unwrap();
        assert!(!b.verify(b"payload", &a.sign(b"payload")));
    }

    #[test]
    fn debug_does_not_print_secret() {
        let key = IntegrityKey::new(SECRET).unwrap();
        assert_eq!(format!("{key:?}"), "IntegrityKey(<redacted>)");
    }
}
