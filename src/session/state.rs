//! Durable session snapshots
//!
//! A session serializes to a single JSON record holding every live key,
//! the counters and flags, the key-exchange ephemerals while they still
//! exist, and the skipped-key cache. Key bytes are lowercase hex. The
//! long-term identity scalar is deliberately absent: the caller owns it
//! and supplies it again on load, exactly as at construction.

use std::collections::BTreeMap;

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, SecretKey};
use crate::error::{Error, Result};
use crate::session::keycache::{KeyCache, SavedKey};
use crate::session::ratchet::Session;

#[derive(Serialize, Deserialize)]
struct SessionState {
    root_key: String,
    send_header_key: String,
    recv_header_key: String,
    next_send_header_key: String,
    next_recv_header_key: String,
    send_chain_key: String,
    recv_chain_key: String,
    send_ratchet_priv: String,
    recv_ratchet_pub: String,
    send_count: u32,
    recv_count: u32,
    prev_send_count: u32,
    ratchet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kx_priv0: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kx_priv1: Option<String>,
    handshake_complete: bool,
    #[serde(default)]
    saved: Vec<SavedGroupState>,
}

#[derive(Serialize, Deserialize)]
struct SavedGroupState {
    header_key: String,
    message_keys: Vec<SavedKeyState>,
}

#[derive(Serialize, Deserialize)]
struct SavedKeyState {
    num: u32,
    key: String,
    created_unix: i64,
}

fn encode_key(key: &[u8; 32]) -> String {
    hex::encode(key)
}

fn decode_key(field: &'static str, value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)
        .map_err(|_| Error::CorruptState(format!("{field} is not valid hex")))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::CorruptState(format!("bad serialized key length for {field}")))
}

impl<R: RngCore + CryptoRng> Session<R> {
    /// Snapshot the full ratchet state.
    ///
    /// The output is deterministic for a given state, so repeated calls on
    /// an untouched session produce identical bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let saved = self
            .saved
            .iter()
            .map(|(header_key, keys)| SavedGroupState {
                header_key: encode_key(header_key),
                message_keys: keys
                    .iter()
                    .map(|(&num, saved)| SavedKeyState {
                        num,
                        key: encode_key(&saved.key),
                        created_unix: saved.created_at,
                    })
                    .collect(),
            })
            .collect();

        let state = SessionState {
            root_key: encode_key(&self.root_key),
            send_header_key: encode_key(&self.send_header_key),
            recv_header_key: encode_key(&self.recv_header_key),
            next_send_header_key: encode_key(&self.next_send_header_key),
            next_recv_header_key: encode_key(&self.next_recv_header_key),
            send_chain_key: encode_key(&self.send_chain_key),
            recv_chain_key: encode_key(&self.recv_chain_key),
            send_ratchet_priv: encode_key(self.send_ratchet_priv.as_bytes()),
            recv_ratchet_pub: encode_key(self.recv_ratchet_pub.as_bytes()),
            send_count: self.send_count,
            recv_count: self.recv_count,
            prev_send_count: self.prev_send_count,
            ratchet: self.ratchet,
            kx_priv0: self
                .kx_priv0
                .as_ref()
                .map(|key| encode_key(key.as_bytes())),
            kx_priv1: self
                .kx_priv1
                .as_ref()
                .map(|key| encode_key(key.as_bytes())),
            handshake_complete: self.handshake_complete,
            saved,
        };

        serde_json::to_vec(&state).expect("session state always serializes")
    }

    /// Restore a session from a snapshot, re-supplying the entropy source
    /// and the long-term identity scalar the snapshot does not carry.
    pub fn deserialize(bytes: &[u8], rng: R, identity_priv: [u8; 32]) -> Result<Self> {
        let state: SessionState = serde_json::from_slice(bytes)
            .map_err(|e| Error::CorruptState(format!("unparseable session state: {e}")))?;

        let (kx_priv0, kx_priv1) = match (&state.kx_priv0, &state.kx_priv1) {
            (Some(kx0), Some(kx1)) => (
                Some(SecretKey::from_bytes(decode_key("kx_priv0", kx0)?)),
                Some(SecretKey::from_bytes(decode_key("kx_priv1", kx1)?)),
            ),
            (None, None) => (None, None),
            _ => {
                return Err(Error::CorruptState(
                    "one half of the key exchange material is missing".into(),
                ))
            }
        };

        let mut saved = KeyCache::default();
        for group in &state.saved {
            let header_key = decode_key("header_key", &group.header_key)?;
            let mut keys = BTreeMap::new();
            for entry in &group.message_keys {
                keys.insert(
                    entry.num,
                    SavedKey {
                        key: decode_key("message key", &entry.key)?,
                        created_at: entry.created_unix,
                    },
                );
            }
            saved.insert_group(header_key, keys);
        }

        Ok(Session {
            rng,
            my_identity_priv: SecretKey::from_bytes(identity_priv),
            their_identity_pub: PublicKey::default(),
            root_key: decode_key("root_key", &state.root_key)?,
            send_header_key: decode_key("send_header_key", &state.send_header_key)?,
            recv_header_key: decode_key("recv_header_key", &state.recv_header_key)?,
            next_send_header_key: decode_key(
                "next_send_header_key",
                &state.next_send_header_key,
            )?,
            next_recv_header_key: decode_key(
                "next_recv_header_key",
                &state.next_recv_header_key,
            )?,
            send_chain_key: decode_key("send_chain_key", &state.send_chain_key)?,
            recv_chain_key: decode_key("recv_chain_key", &state.recv_chain_key)?,
            send_ratchet_priv: SecretKey::from_bytes(decode_key(
                "send_ratchet_priv",
                &state.send_ratchet_priv,
            )?),
            recv_ratchet_pub: PublicKey(decode_key("recv_ratchet_pub", &state.recv_ratchet_pub)?),
            send_count: state.send_count,
            recv_count: state.recv_count,
            prev_send_count: state.prev_send_count,
            ratchet: state.ratchet,
            saved,
            kx_priv0,
            kx_priv1,
            handshake_complete: state.handshake_complete,
        })
    }
}
