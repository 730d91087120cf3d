//! Cryptographic primitives for the ratchet
//!
//! This module provides the three building blocks everything else is made
//! of:
//! - `exchange`: Curve25519 Diffie-Hellman over raw 32-byte values
//! - `kdf`: HMAC-SHA256 labelled key derivation
//! - `secretbox`: XSalsa20-Poly1305 authenticated encryption

pub mod exchange;
pub mod kdf;
pub mod secretbox;

pub use exchange::{PublicKey, SecretKey, SharedSecret};
