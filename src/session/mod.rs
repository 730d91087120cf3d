//! Per-contact ratchet sessions
//!
//! A [`Session`] owns everything needed to talk to one peer: the handshake
//! ephemerals, the ratchet keys and counters, and the cache of keys saved
//! for messages that have not arrived yet. Sessions are established by
//! swapping [`KeyExchange`] material in both directions, survive restarts
//! through [`Session::serialize`] / [`Session::deserialize`], and move all
//! message traffic through [`Session::encrypt`] / [`Session::decrypt`].

mod keycache;
mod ratchet;
mod state;

pub use ratchet::{Session, HEADER_SIZE, SEALED_HEADER_SIZE};

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;

/// Public key exchange material, one record per direction.
///
/// The three values are raw Curve25519 publics; the serde representation
/// encodes each as 32 bytes of lowercase hex, which is the form the
/// material travels in when an envelope (JSON in a file, an XMPP stanza,
/// an armored blob) carries it between peers. Decoding enforces the
/// 32-byte length, so a parsed `KeyExchange` is always structurally valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchange {
    /// Long-term identity public key.
    #[serde(rename = "idpub")]
    pub identity_pub: PublicKey,
    /// Ephemeral handshake public; its byte order against the peer's `dh`
    /// decides who plays Alice.
    pub dh: PublicKey,
    /// Second ephemeral public; becomes the responder's first ratchet key.
    pub dh1: PublicKey,
}
