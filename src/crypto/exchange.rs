//! Curve25519 Key Agreement
//!
//! Thin newtypes over raw 32-byte Curve25519 values. The ratchet stores
//! scalars and public points as plain byte arrays so that state snapshots
//! round-trip bit-exactly; the dalek types are only materialized at the
//! point of use.

use rand::{CryptoRng, RngCore};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

/// Size of keys, scalars and DH outputs in bytes
pub const KEY_SIZE: usize = 32;

/// A Curve25519 public value.
///
/// Ordering is lexicographic over the raw bytes, which is what the
/// handshake uses to assign the Alice/Bob roles.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes; `None` unless exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().ok()?;
        Some(PublicKey(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Convert to lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex
    pub fn from_hex(s: &str) -> Option<Self> {
        Self::from_bytes(&hex::decode(s).ok()?)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..16])
    }
}

impl serde::Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom("expected 32 bytes of lowercase hex"))
    }
}

/// A Curve25519 secret scalar.
///
/// Kept as the raw sampled bytes; clamping happens inside the dalek
/// scalar multiplication, so a snapshot restores the identical scalar.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Sample a fresh scalar from the given entropy source.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        SecretKey(bytes)
    }

    /// Wrap caller-supplied scalar bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        SecretKey(bytes)
    }

    /// The all-zero scalar, standing in for a retired ratchet key.
    pub fn zero() -> Self {
        SecretKey([0u8; KEY_SIZE])
    }

    /// Get raw bytes (be careful with this!)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Scalar multiplication by the curve base point.
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(X25519Public::from(&secret).to_bytes())
    }

    /// Compute the shared secret with a peer's public value.
    pub fn diffie_hellman(&self, peer: &PublicKey) -> SharedSecret {
        let secret = StaticSecret::from(self.0);
        let shared = secret.diffie_hellman(&X25519Public::from(peer.0));
        SharedSecret(shared.to_bytes())
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([redacted])")
    }
}

/// Output of a Diffie-Hellman computation.
#[derive(ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEY_SIZE]);

impl SharedSecret {
    /// Get the raw bytes (be careful with this!)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_shared_secret_agreement() {
        let a = SecretKey::generate(&mut OsRng);
        let b = SecretKey::generate(&mut OsRng);

        let ab = a.diffie_hellman(&b.public_key());
        let ba = b.diffie_hellman(&a.public_key());

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_different_peers_different_secrets() {
        let a = SecretKey::generate(&mut OsRng);
        let b = SecretKey::generate(&mut OsRng);
        let c = SecretKey::generate(&mut OsRng);

        let ab = a.diffie_hellman(&b.public_key());
        let ac = a.diffie_hellman(&c.public_key());

        assert_ne!(ab.as_bytes(), ac.as_bytes());
    }

    #[test]
    fn test_public_key_hex_round_trip() {
        let key = SecretKey::generate(&mut OsRng).public_key();
        let restored = PublicKey::from_hex(&key.to_hex()).unwrap();

        assert_eq!(key, restored);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(PublicKey::from_bytes(&[0u8; 31]).is_none());
        assert!(PublicKey::from_bytes(&[0u8; 33]).is_none());
        assert!(PublicKey::from_bytes(&[0u8; 32]).is_some());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let small = PublicKey([0u8; 32]);
        let mut big = [0u8; 32];
        big[0] = 1;

        assert!(small < PublicKey(big));
    }

    #[test]
    fn test_scalar_bytes_survive_round_trip() {
        // The sampled scalar must come back out unmodified, clamped only
        // inside the multiplication.
        let secret = SecretKey::generate(&mut OsRng);
        let copy = SecretKey::from_bytes(*secret.as_bytes());

        assert_eq!(secret.public_key(), copy.public_key());
        assert_eq!(secret.as_bytes(), copy.as_bytes());
    }
}
