//! The double-ratchet state machine
//!
//! One [`Session`] per contact. A two-message key exchange establishes the
//! shared secrets; after that every message advances an HMAC chain
//! (forward secrecy) and every change of direction advances a DH ratchet
//! (future secrecy). Message headers travel encrypted under their own key
//! family so a receiver can try candidate header keys without learning
//! anything from the payload.

use std::collections::BTreeMap;

use rand::{CryptoRng, RngCore};
use tracing::{debug, trace};
use zeroize::Zeroize;

use crate::crypto::{kdf, secretbox, PublicKey, SecretKey};
use crate::error::{Error, Result};
use crate::session::keycache::{unix_now, KeyCache, SavedKey, SavedKeyBatch};
use crate::session::KeyExchange;

/// Size of a header's plaintext contents: message count, previous message
/// count, ratchet public key and the payload nonce.
pub const HEADER_SIZE: usize = 4 + 4 + 32 + 24;

/// Size of an encrypted header with its own nonce prepended.
pub const SEALED_HEADER_SIZE: usize = secretbox::NONCE_SIZE + HEADER_SIZE + secretbox::OVERHEAD;

/// Offset of the payload nonce in the header plaintext.
const NONCE_IN_HEADER_OFFSET: usize = 4 + 4 + 32;

/// Maximum number of missing messages whose keys we will derive and cache
/// in a single receive.
const MAX_MISSING_MESSAGES: u32 = 8;

/// Per-contact ratchet session.
///
/// All operations take `&mut self`, so shared use requires an external
/// lock; the core itself performs no I/O and never blocks. Entropy is read
/// from the injected source at construction and inside [`encrypt`].
///
/// [`encrypt`]: Session::encrypt
pub struct Session<R> {
    pub(super) rng: R,

    /// Long-term Curve25519 identity keys, ours and (after the handshake)
    /// the peer's.
    pub(super) my_identity_priv: SecretKey,
    pub(super) their_identity_pub: PublicKey,

    /// Updated only by DH ratchet steps; seeds each epoch's keys.
    pub(super) root_key: [u8; 32],
    /// Header keys seal message headers for the current epoch in each
    /// direction, the `next_` pair for the epoch after the coming DH step.
    pub(super) send_header_key: [u8; 32],
    pub(super) recv_header_key: [u8; 32],
    pub(super) next_send_header_key: [u8; 32],
    pub(super) next_recv_header_key: [u8; 32],
    /// Chain keys advance once per message and yield the message keys.
    pub(super) send_chain_key: [u8; 32],
    pub(super) recv_chain_key: [u8; 32],
    /// Our current ratchet scalar and the peer's last ratchet public.
    pub(super) send_ratchet_priv: SecretKey,
    pub(super) recv_ratchet_pub: PublicKey,
    /// Messages sent/received in the current epoch, and sent in the
    /// previous send epoch (advertised in headers for skip-ahead).
    pub(super) send_count: u32,
    pub(super) recv_count: u32,
    pub(super) prev_send_count: u32,
    /// True if the next outgoing message must start a new DH epoch.
    pub(super) ratchet: bool,

    /// Message keys saved for messages that have not arrived yet.
    pub(super) saved: KeyCache,

    /// Ephemeral scalars for the key exchange phase; gone once they can no
    /// longer matter.
    pub(super) kx_priv0: Option<SecretKey>,
    pub(super) kx_priv1: Option<SecretKey>,

    /// One-way flag: set by `complete_key_exchange`, never reverts.
    pub(super) handshake_complete: bool,
}

impl<R: RngCore + CryptoRng> Session<R> {
    /// Create a fresh session around a long-term identity scalar, sampling
    /// the handshake ephemerals from `rng`.
    pub fn new(mut rng: R, identity_priv: [u8; 32]) -> Self {
        let kx_priv0 = SecretKey::generate(&mut rng);
        let kx_priv1 = SecretKey::generate(&mut rng);

        Session {
            rng,
            my_identity_priv: SecretKey::from_bytes(identity_priv),
            their_identity_pub: PublicKey::default(),
            root_key: [0u8; 32],
            send_header_key: [0u8; 32],
            recv_header_key: [0u8; 32],
            next_send_header_key: [0u8; 32],
            next_recv_header_key: [0u8; 32],
            send_chain_key: [0u8; 32],
            recv_chain_key: [0u8; 32],
            send_ratchet_priv: SecretKey::zero(),
            recv_ratchet_pub: PublicKey::default(),
            send_count: 0,
            recv_count: 0,
            prev_send_count: 0,
            ratchet: false,
            saved: KeyCache::default(),
            kx_priv0: Some(kx_priv0),
            kx_priv1: Some(kx_priv1),
            handshake_complete: false,
        }
    }

    /// Whether the key exchange has completed in both directions.
    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// The peer's identity public key; all zeros until the handshake
    /// completes. Verifying it out-of-band is the caller's duty.
    pub fn their_identity(&self) -> &PublicKey {
        &self.their_identity_pub
    }

    /// Our public key exchange material, to be delivered to the peer.
    pub fn key_exchange_material(&self) -> Result<KeyExchange> {
        if self.handshake_complete {
            return Err(Error::HandshakeAlreadyComplete);
        }
        let kx_priv0 = self
            .kx_priv0
            .as_ref()
            .ok_or(Error::HandshakeAlreadyComplete)?;
        let kx_priv1 = self
            .kx_priv1
            .as_ref()
            .ok_or(Error::HandshakeAlreadyComplete)?;

        Ok(KeyExchange {
            identity_pub: self.my_identity_priv.public_key(),
            dh: kx_priv0.public_key(),
            dh1: kx_priv1.public_key(),
        })
    }

    /// Take the peer's key exchange material and establish the session.
    ///
    /// Roles fall out of a byte comparison of the ephemeral DH publics:
    /// the smaller side becomes Alice and will open the first DH epoch
    /// with her first send, so no turn-taking message is needed.
    pub fn complete_key_exchange(&mut self, peer: &KeyExchange) -> Result<()> {
        if self.handshake_complete {
            return Err(Error::HandshakeAlreadyComplete);
        }
        let kx_priv0 = self
            .kx_priv0
            .clone()
            .ok_or(Error::HandshakeAlreadyComplete)?;
        let kx_priv1 = self
            .kx_priv1
            .clone()
            .ok_or(Error::HandshakeAlreadyComplete)?;

        let our_dh = kx_priv0.public_key();
        let am_alice = match our_dh.cmp(&peer.dh) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            // The peer echoed our own DH values back.
            std::cmp::Ordering::Equal => return Err(Error::InvalidKeyExchange),
        };

        self.their_identity_pub = peer.identity_pub;

        let mut key_material = Vec::with_capacity(32 * 3);
        key_material.extend_from_slice(kx_priv0.diffie_hellman(&peer.dh).as_bytes());
        if am_alice {
            key_material.extend_from_slice(self.my_identity_priv.diffie_hellman(&peer.dh).as_bytes());
            key_material
                .extend_from_slice(kx_priv0.diffie_hellman(&peer.identity_pub).as_bytes());
        } else {
            key_material
                .extend_from_slice(kx_priv0.diffie_hellman(&peer.identity_pub).as_bytes());
            key_material.extend_from_slice(self.my_identity_priv.diffie_hellman(&peer.dh).as_bytes());
        }

        self.root_key = kdf::derive_key(&key_material, kdf::ROOT_KEY_LABEL);
        if am_alice {
            // The peer is Bob and seals with the "header key" family; our
            // receive side mirrors his send side, label for label.
            self.recv_header_key = kdf::derive_key(&key_material, kdf::HEADER_KEY_LABEL);
            self.next_send_header_key =
                kdf::derive_key(&key_material, kdf::NEXT_SEND_HEADER_KEY_LABEL);
            self.next_recv_header_key =
                kdf::derive_key(&key_material, kdf::NEXT_RECV_HEADER_KEY_LABEL);
            self.recv_chain_key = kdf::derive_key(&key_material, kdf::CHAIN_KEY_LABEL);
            self.recv_ratchet_pub = peer.dh1;
            self.kx_priv0 = None;
            self.kx_priv1 = None;
        } else {
            self.send_header_key = kdf::derive_key(&key_material, kdf::HEADER_KEY_LABEL);
            self.next_recv_header_key =
                kdf::derive_key(&key_material, kdf::NEXT_SEND_HEADER_KEY_LABEL);
            self.next_send_header_key =
                kdf::derive_key(&key_material, kdf::NEXT_RECV_HEADER_KEY_LABEL);
            self.send_chain_key = kdf::derive_key(&key_material, kdf::CHAIN_KEY_LABEL);
            self.send_ratchet_priv = kx_priv1;
        }
        key_material.zeroize();

        // Alice starts a new DH epoch with her first send; Bob answers
        // with the ratchet key he already advertised as dh1.
        self.ratchet = am_alice;
        self.handshake_complete = true;

        let role = if am_alice { "alice" } else { "bob" };
        debug!(role, "key exchange complete");
        Ok(())
    }

    /// Encrypt a message, advancing the send chain (and, when a new epoch
    /// is pending, the DH ratchet).
    ///
    /// Never fails; the handshake must have completed for the output to be
    /// decryptable by the peer.
    pub fn encrypt(&mut self, msg: &[u8]) -> Vec<u8> {
        if self.ratchet {
            self.send_ratchet_priv = SecretKey::generate(&mut self.rng);
            self.send_header_key = self.next_send_header_key;

            let shared = self.send_ratchet_priv.diffie_hellman(&self.recv_ratchet_pub);
            let km = kdf::root_update(&self.root_key, shared.as_bytes());
            self.root_key = kdf::derive_key(&km, kdf::ROOT_KEY_LABEL);
            self.next_send_header_key = kdf::derive_key(&km, kdf::NEXT_SEND_HEADER_KEY_LABEL);
            self.send_chain_key = kdf::derive_key(&km, kdf::CHAIN_KEY_LABEL);

            self.prev_send_count = self.send_count;
            self.send_count = 0;
            self.ratchet = false;
            debug!("send side entered a new epoch");
        }

        let chain_key = self.send_chain_key;
        let message_key = kdf::derive_key(&chain_key, kdf::MESSAGE_KEY_LABEL);
        self.send_chain_key = kdf::derive_key(&chain_key, kdf::CHAIN_KEY_STEP_LABEL);
        trace!(n = self.send_count, "send chain advanced");

        let mut header_nonce = [0u8; secretbox::NONCE_SIZE];
        let mut message_nonce = [0u8; secretbox::NONCE_SIZE];
        self.rng.fill_bytes(&mut header_nonce);
        self.rng.fill_bytes(&mut message_nonce);

        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&self.send_count.to_le_bytes());
        header[4..8].copy_from_slice(&self.prev_send_count.to_le_bytes());
        header[8..NONCE_IN_HEADER_OFFSET]
            .copy_from_slice(self.send_ratchet_priv.public_key().as_bytes());
        header[NONCE_IN_HEADER_OFFSET..].copy_from_slice(&message_nonce);

        let mut out =
            Vec::with_capacity(SEALED_HEADER_SIZE + msg.len() + secretbox::OVERHEAD);
        out.extend_from_slice(&header_nonce);
        out.extend_from_slice(&secretbox::seal(&self.send_header_key, &header_nonce, &header));
        self.send_count += 1;
        out.extend_from_slice(&secretbox::seal(&message_key, &message_nonce, msg));
        out
    }

    /// Decrypt a frame produced by the peer's `encrypt`.
    ///
    /// Tries saved keys for previously skipped messages first, then the
    /// current receive epoch, then a DH step into the next epoch. State is
    /// committed only after the payload authenticates: a failed decrypt
    /// leaves the session exactly as it was.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if !self.handshake_complete {
            return Err(Error::NotYetHandshaken);
        }

        if let Some(msg) = self.try_saved_keys(ciphertext)? {
            return Ok(msg);
        }

        let header_nonce = nonce_from(ciphertext);
        let sealed_header = &ciphertext[secretbox::NONCE_SIZE..SEALED_HEADER_SIZE];
        let sealed_message = &ciphertext[SEALED_HEADER_SIZE..];

        // Current epoch. The zero gate keeps the pre-seeded blank receive
        // key from ever matching.
        let current = secretbox::open(&self.recv_header_key, &header_nonce, sealed_header)
            .ok()
            .filter(|_| !is_zero_key(&self.recv_header_key));
        if let Some(header) = current {
            if header.len() != HEADER_SIZE {
                return Err(Error::MalformedFrame);
            }
            let message_num = read_u32_le(&header[..4]);
            let (provisional_chain_key, message_key, harvest) = save_keys(
                &self.recv_header_key,
                &self.recv_chain_key,
                message_num,
                self.recv_count,
            )?;

            let message_nonce = nonce_from(&header[NONCE_IN_HEADER_OFFSET..]);
            let msg = secretbox::open(&message_key, &message_nonce, sealed_message)
                .map_err(|_| Error::Undecryptable)?;

            self.recv_chain_key = provisional_chain_key;
            self.saved.merge(harvest);
            self.recv_count = message_num + 1;
            return Ok(msg);
        }

        // Next epoch: the peer has taken a DH step.
        let header = secretbox::open(&self.next_recv_header_key, &header_nonce, sealed_header)
            .map_err(|_| Error::Undecryptable)?;
        if header.len() != HEADER_SIZE {
            return Err(Error::MalformedFrame);
        }
        if self.ratchet {
            // The peer sealed to our next header key before we advertised
            // a ratchet key of our own; nothing honest produces this.
            return Err(Error::Undecryptable);
        }

        let message_num = read_u32_le(&header[..4]);
        let prev_message_count = read_u32_le(&header[4..8]);
        let mut dh_pub = [0u8; 32];
        dh_pub.copy_from_slice(&header[8..NONCE_IN_HEADER_OFFSET]);
        let dh_pub = PublicKey(dh_pub);

        // Harvest what remains of the old epoch; its chain ends here.
        let (_, _, old_harvest) = save_keys(
            &self.recv_header_key,
            &self.recv_chain_key,
            prev_message_count,
            self.recv_count,
        )?;

        let shared = self.send_ratchet_priv.diffie_hellman(&dh_pub);
        let km = kdf::root_update(&self.root_key, shared.as_bytes());
        let root_key = kdf::derive_key(&km, kdf::ROOT_KEY_LABEL);
        let chain_key = kdf::derive_key(&km, kdf::CHAIN_KEY_LABEL);

        let (provisional_chain_key, message_key, harvest) =
            save_keys(&self.next_recv_header_key, &chain_key, message_num, 0)?;

        let message_nonce = nonce_from(&header[NONCE_IN_HEADER_OFFSET..]);
        let msg = secretbox::open(&message_key, &message_nonce, sealed_message)
            .map_err(|_| Error::Undecryptable)?;

        self.root_key = root_key;
        self.recv_chain_key = provisional_chain_key;
        self.recv_header_key = self.next_recv_header_key;
        self.next_recv_header_key = kdf::derive_key(&km, kdf::NEXT_SEND_HEADER_KEY_LABEL);
        // Our ratchet scalar is spent; the next send samples a fresh one.
        self.send_ratchet_priv = SecretKey::zero();
        self.recv_ratchet_pub = dh_pub;
        self.recv_count = message_num + 1;
        self.saved.merge(old_harvest);
        self.saved.merge(harvest);
        self.ratchet = true;
        self.kx_priv0 = None;
        self.kx_priv1 = None;

        debug!("receive side entered a new epoch");
        Ok(msg)
    }

    /// Try to open the frame with keys saved for missing messages.
    ///
    /// Returns `Ok(None)` when no saved key applies and the regular paths
    /// should run.
    fn try_saved_keys(&mut self, ciphertext: &[u8]) -> Result<Option<Vec<u8>>> {
        if ciphertext.len() < SEALED_HEADER_SIZE {
            return Err(Error::MalformedFrame);
        }

        let header_nonce = nonce_from(ciphertext);
        let sealed_header = &ciphertext[secretbox::NONCE_SIZE..SEALED_HEADER_SIZE];
        let sealed_message = &ciphertext[SEALED_HEADER_SIZE..];

        let mut hit = None;
        for (header_key, message_keys) in self.saved.iter() {
            let Ok(header) = secretbox::open(header_key, &header_nonce, sealed_header) else {
                continue;
            };
            if header.len() != HEADER_SIZE {
                continue;
            }
            let message_num = read_u32_le(&header[..4]);
            match message_keys.get(&message_num) {
                Some(saved) => {
                    let message_nonce = nonce_from(&header[NONCE_IN_HEADER_OFFSET..]);
                    hit = Some((*header_key, message_num, saved.key, message_nonce));
                    break;
                }
                // Common miss: the key for this number was never saved
                // because it is the next message in the chain.
                None => return Ok(None),
            }
        }

        let Some((header_key, message_num, message_key, message_nonce)) = hit else {
            return Ok(None);
        };

        let msg = secretbox::open(&message_key, &message_nonce, sealed_message)
            .map_err(|_| Error::Undecryptable)?;
        self.saved.remove(&header_key, message_num);
        trace!(n = message_num, "late message recovered from saved keys");
        Ok(Some(msg))
    }
}

impl<R> Drop for Session<R> {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.send_header_key.zeroize();
        self.recv_header_key.zeroize();
        self.next_send_header_key.zeroize();
        self.next_recv_header_key.zeroize();
        self.send_chain_key.zeroize();
        self.recv_chain_key.zeroize();
    }
}

/// Walk the chain from `received_count` up to `message_num`, stashing the
/// keys of any skipped messages. The chain is evolved on a provisional
/// copy; the caller commits it only once the payload opens.
fn save_keys(
    header_key: &[u8; 32],
    chain_key: &[u8; 32],
    message_num: u32,
    received_count: u32,
) -> Result<([u8; 32], [u8; 32], Option<SavedKeyBatch>)> {
    if message_num < received_count {
        // A message from the past with no saved key: either a duplicate or
        // the saved key already expired.
        return Err(Error::DuplicateOrExpired);
    }
    let missing = message_num - received_count;
    if missing > MAX_MISSING_MESSAGES {
        return Err(Error::ReorderLimitExceeded);
    }

    let now = unix_now();
    let mut stash = BTreeMap::new();
    let mut provisional_chain_key = *chain_key;
    let mut message_key = [0u8; 32];

    for n in received_count..=message_num {
        let step = provisional_chain_key;
        message_key = kdf::derive_key(&step, kdf::MESSAGE_KEY_LABEL);
        provisional_chain_key = kdf::derive_key(&step, kdf::CHAIN_KEY_STEP_LABEL);
        if n < message_num {
            stash.insert(
                n,
                SavedKey {
                    key: message_key,
                    created_at: now,
                },
            );
        }
    }

    if missing > 0 {
        debug!(skipped = missing, "caching keys for skipped messages");
    }
    let harvest = (!stash.is_empty()).then(|| SavedKeyBatch {
        header_key: *header_key,
        keys: stash,
    });
    Ok((provisional_chain_key, message_key, harvest))
}

fn is_zero_key(key: &[u8; 32]) -> bool {
    key.iter().fold(0u8, |acc, &b| acc | b) == 0
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn nonce_from(bytes: &[u8]) -> [u8; secretbox::NONCE_SIZE] {
    let mut nonce = [0u8; secretbox::NONCE_SIZE];
    nonce.copy_from_slice(&bytes[..secretbox::NONCE_SIZE]);
    nonce
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::rngs::OsRng;
    use rand::RngCore;

    use super::*;

    fn paired_sessions() -> (Session<OsRng>, Session<OsRng>) {
        let mut priv_a = [0u8; 32];
        let mut priv_b = [0u8; 32];
        OsRng.fill_bytes(&mut priv_a);
        OsRng.fill_bytes(&mut priv_b);

        let mut a = Session::new(OsRng, priv_a);
        let mut b = Session::new(OsRng, priv_b);

        let kx_a = a.key_exchange_material().unwrap();
        let kx_b = b.key_exchange_material().unwrap();
        a.complete_key_exchange(&kx_b).unwrap();
        b.complete_key_exchange(&kx_a).unwrap();

        (a, b)
    }

    #[derive(Clone, Copy)]
    enum Sender {
        A,
        B,
    }

    enum Action {
        /// Send a fresh message and deliver it immediately.
        Deliver(Sender),
        /// Send a fresh message but hold it back under the given id.
        Delay(Sender, u32),
        /// Send a fresh message and lose it.
        Drop(Sender),
        /// Deliver a previously delayed message.
        DeliverDelayed(u32),
    }

    fn run_script(script: &[Action]) {
        let (mut a, mut b) = paired_sessions();
        let mut delayed: HashMap<u32, (Vec<u8>, Vec<u8>, bool)> = HashMap::new();
        let mut counter = 0u8;

        for (i, action) in script.iter().enumerate() {
            match action {
                Action::Deliver(sender) | Action::Delay(sender, _) | Action::Drop(sender) => {
                    counter += 1;
                    let msg = vec![counter; 20];
                    let from_a = matches!(sender, Sender::A);
                    let (tx, rx) = if from_a { (&mut a, &mut b) } else { (&mut b, &mut a) };
                    let encrypted = tx.encrypt(&msg);

                    match action {
                        Action::Deliver(_) => {
                            let result = rx.decrypt(&encrypted).unwrap_or_else(|e| {
                                panic!("step {i}: receiver returned error: {e}")
                            });
                            assert_eq!(result, msg, "step {i}: bad message");
                        }
                        Action::Delay(_, id) => {
                            let prior = delayed.insert(*id, (msg, encrypted, from_a));
                            assert!(prior.is_none(), "step {i}: delayed id {id} reused");
                        }
                        _ => {}
                    }
                }
                Action::DeliverDelayed(id) => {
                    let (msg, encrypted, from_a) =
                        delayed.remove(id).expect("unknown delayed message id");
                    let rx = if from_a { &mut b } else { &mut a };
                    let result = rx
                        .decrypt(&encrypted)
                        .unwrap_or_else(|e| panic!("step {i}: receiver returned error: {e}"));
                    assert_eq!(result, msg, "step {i}: bad delayed message");
                }
            }
        }
    }

    #[test]
    fn test_exchange() {
        let (mut a, mut b) = paired_sessions();

        let msg = b"test message";
        let encrypted = a.encrypt(msg);
        let result = b.decrypt(&encrypted).unwrap();

        assert_eq!(msg.as_slice(), result);
    }

    #[test]
    fn test_ciphertext_length_is_fixed_overhead() {
        let (mut a, _b) = paired_sessions();

        let msg = b"some plaintext";
        let encrypted = a.encrypt(msg);

        assert_eq!(
            encrypted.len(),
            SEALED_HEADER_SIZE + msg.len() + secretbox::OVERHEAD
        );
    }

    #[test]
    fn test_back_and_forth() {
        run_script(&[
            Action::Deliver(Sender::A),
            Action::Deliver(Sender::B),
            Action::Deliver(Sender::A),
            Action::Deliver(Sender::B),
            Action::Deliver(Sender::A),
            Action::Deliver(Sender::B),
        ]);
    }

    #[test]
    fn test_reorder_within_epoch() {
        run_script(&[
            Action::Deliver(Sender::A),
            Action::Delay(Sender::A, 0),
            Action::Deliver(Sender::A),
            Action::DeliverDelayed(0),
        ]);
    }

    #[test]
    fn test_reorder_across_ratchet() {
        run_script(&[
            Action::Deliver(Sender::A),
            Action::Delay(Sender::A, 0),
            Action::Deliver(Sender::B),
            Action::Deliver(Sender::A),
            Action::Deliver(Sender::B),
            Action::DeliverDelayed(0),
        ]);
    }

    #[test]
    fn test_drop_then_recover() {
        run_script(&[
            Action::Drop(Sender::A),
            Action::Drop(Sender::A),
            Action::Drop(Sender::A),
            Action::Drop(Sender::A),
            Action::Deliver(Sender::A),
            Action::Deliver(Sender::B),
        ]);
    }

    #[test]
    fn test_skip_at_the_limit_is_accepted() {
        let (mut a, mut b) = paired_sessions();

        let mut held = Vec::new();
        for i in 0..9u8 {
            held.push((vec![i; 8], a.encrypt(&[i; 8])));
        }

        // Message number 8 arrives first: exactly 8 skipped keys.
        let (msg, encrypted) = held.pop().unwrap();
        assert_eq!(b.decrypt(&encrypted).unwrap(), msg);

        // The rest trickle in from the cache.
        for (msg, encrypted) in held {
            assert_eq!(b.decrypt(&encrypted).unwrap(), msg);
        }
    }

    #[test]
    fn test_skip_beyond_the_limit_is_rejected() {
        let (mut a, mut b) = paired_sessions();

        let mut last = Vec::new();
        for i in 0..10u8 {
            last = a.encrypt(&[i; 8]);
        }

        // Message number 9 first: that would skip 9 > 8 keys.
        assert_eq!(b.decrypt(&last), Err(Error::ReorderLimitExceeded));
    }

    #[test]
    fn test_duplicate_frame_is_rejected_once_consumed() {
        let (mut a, mut b) = paired_sessions();

        let encrypted = a.encrypt(b"only once");
        assert!(b.decrypt(&encrypted).is_ok());

        assert_eq!(b.decrypt(&encrypted), Err(Error::DuplicateOrExpired));
    }

    #[test]
    fn test_duplicate_of_recovered_late_message_is_rejected() {
        let (mut a, mut b) = paired_sessions();

        let delayed = a.encrypt(b"late");
        let second = a.encrypt(b"on time");
        assert!(b.decrypt(&second).is_ok());
        assert!(b.decrypt(&delayed).is_ok());

        // The saved key was consumed with the first delivery.
        assert!(b.decrypt(&delayed).is_err());
    }

    #[test]
    fn test_decrypt_before_handshake() {
        let mut session = Session::new(OsRng, [7u8; 32]);

        assert_eq!(
            session.decrypt(&[0u8; 256]),
            Err(Error::NotYetHandshaken)
        );
    }

    #[test]
    fn test_complete_key_exchange_twice() {
        let (mut a, mut b) = paired_sessions();

        let kx = b.key_exchange_material();
        assert_eq!(kx, Err(Error::HandshakeAlreadyComplete));

        let c = Session::new(OsRng, [9u8; 32]);
        let kx_c = c.key_exchange_material().unwrap();
        assert_eq!(
            a.complete_key_exchange(&kx_c),
            Err(Error::HandshakeAlreadyComplete)
        );

        // The failed call must not have disturbed the established session.
        let encrypted = a.encrypt(b"still fine");
        assert_eq!(b.decrypt(&encrypted).unwrap(), b"still fine");
    }

    #[test]
    fn test_echoed_key_exchange_is_rejected() {
        let mut session = Session::new(OsRng, [7u8; 32]);
        let kx = session.key_exchange_material().unwrap();

        assert_eq!(
            session.complete_key_exchange(&kx),
            Err(Error::InvalidKeyExchange)
        );
        assert!(!session.handshake_complete());
    }

    #[test]
    fn test_truncated_frame() {
        let (mut a, mut b) = paired_sessions();

        let encrypted = a.encrypt(b"short end of the stick");
        assert_eq!(
            b.decrypt(&encrypted[..SEALED_HEADER_SIZE - 1]),
            Err(Error::MalformedFrame)
        );
    }

    #[test]
    fn test_tampered_payload_leaves_state_intact() {
        let (mut a, mut b) = paired_sessions();

        let encrypted = a.encrypt(b"fragile");
        let mut tampered = encrypted.clone();
        *tampered.last_mut().unwrap() ^= 0xff;

        assert_eq!(b.decrypt(&tampered), Err(Error::Undecryptable));
        // The failed attempt committed nothing; the original still opens.
        assert_eq!(b.decrypt(&encrypted).unwrap(), b"fragile");
    }

    #[test]
    fn test_tampered_header_is_undecryptable() {
        let (mut a, mut b) = paired_sessions();

        let mut encrypted = a.encrypt(b"payload");
        encrypted[secretbox::NONCE_SIZE + 1] ^= 0xff;

        assert_eq!(b.decrypt(&encrypted), Err(Error::Undecryptable));
    }

    #[test]
    fn test_streams_stay_consistent_across_many_epochs() {
        let (mut a, mut b) = paired_sessions();

        for round in 0..10u8 {
            let msg = vec![round; 32];
            let encrypted = a.encrypt(&msg);
            assert_eq!(b.decrypt(&encrypted).unwrap(), msg);

            let reply = vec![round ^ 0xff; 32];
            let encrypted = b.encrypt(&reply);
            assert_eq!(a.decrypt(&encrypted).unwrap(), reply);
        }
    }

    #[test]
    fn test_cross_sessions_cannot_decrypt() {
        let (mut a, _b) = paired_sessions();
        let (_c, mut d) = paired_sessions();

        let encrypted = a.encrypt(b"wrong pair");
        assert!(d.decrypt(&encrypted).is_err());
    }
}
