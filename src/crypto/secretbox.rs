//! XSalsa20-Poly1305 Secretbox
//!
//! Authenticated symmetric encryption with explicit nonces. Unlike the
//! usual AEAD facade that prepends its own random nonce, the ratchet
//! manages nonces itself (the payload nonce travels inside the sealed
//! header), so `seal` and `open` take the nonce as an argument and the
//! returned ciphertext is exactly `len(plaintext) + OVERHEAD` bytes.

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};

use crate::error::{Error, Result};

/// Size of a secretbox key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of a secretbox nonce in bytes
pub const NONCE_SIZE: usize = 24;

/// Ciphertext expansion: the Poly1305 authentication tag
pub const OVERHEAD: usize = 16;

/// Seal `plaintext` under `key` and `nonce`.
pub fn seal(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .expect("secretbox sealing is infallible")
}

/// Open a sealed box; fails if the key or nonce is wrong or the
/// ciphertext was tampered with.
pub fn open(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], sealed: &[u8]) -> Result<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| Error::Undecryptable)
}
