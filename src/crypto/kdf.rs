//! HMAC-SHA256 Key Derivation
//!
//! All session keys descend from a master secret through HMAC-SHA256 with
//! short ASCII labels. The label-to-field mapping is part of the wire
//! contract: both ends must feed the same label into the corresponding
//! field or the streams diverge.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Label for the root key at handshake and after every DH step.
pub const ROOT_KEY_LABEL: &[u8] = b"root key";
/// Label for the first epoch's header key.
pub const HEADER_KEY_LABEL: &[u8] = b"header key";
/// Label for the header key of the epoch after the next send-side DH step.
///
/// Each role derives its *receive* side from the label the peer uses for
/// its *send* side, so this one label serves both directions.
pub const NEXT_SEND_HEADER_KEY_LABEL: &[u8] = b"next send header key";
/// Counterpart to [`NEXT_SEND_HEADER_KEY_LABEL`], used only at handshake.
pub const NEXT_RECV_HEADER_KEY_LABEL: &[u8] = b"next receive header key";
/// Label for a fresh chain key.
pub const CHAIN_KEY_LABEL: &[u8] = b"chain key";
/// Label advancing a chain key by one message.
pub const CHAIN_KEY_STEP_LABEL: &[u8] = b"chain key step";
/// Label producing the per-message key from a chain key.
pub const MESSAGE_KEY_LABEL: &[u8] = b"message key";

const ROOT_KEY_UPDATE_LABEL: &[u8] = b"root key update";

/// Derive a 32-byte key as `HMAC-SHA256(master, label)`.
pub fn derive_key(master: &[u8], label: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(master).expect("HMAC accepts any key length");
    mac.update(label);
    mac.finalize().into_bytes().into()
}

/// Mix a DH result into the root key, producing the master secret that the
/// next epoch's keys are derived from.
///
/// This is a plain SHA-256 over `label ‖ root ‖ shared`; the result then
/// keys the HMAC in [`derive_key`].
pub fn root_update(root_key: &[u8; 32], shared: &[u8; 32]) -> [u8; 32] {
    let mut sha = Sha256::new();
    sha.update(ROOT_KEY_UPDATE_LABEL);
    sha.update(root_key);
    sha.update(shared);
    sha.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_produce_independent_keys() {
        let master = [7u8; 32];

        let chain = derive_key(&master, CHAIN_KEY_LABEL);
        let header = derive_key(&master, HEADER_KEY_LABEL);
        let root = derive_key(&master, ROOT_KEY_LABEL);

        assert_ne!(chain, header);
        assert_ne!(chain, root);
        assert_ne!(header, root);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let master = [1u8; 32];

        assert_eq!(
            derive_key(&master, MESSAGE_KEY_LABEL),
            derive_key(&master, MESSAGE_KEY_LABEL)
        );
    }

    #[test]
    fn test_chain_step_moves_the_chain() {
        let chain = [2u8; 32];
        let next = derive_key(&chain, CHAIN_KEY_STEP_LABEL);

        assert_ne!(chain, next);
        assert_ne!(
            derive_key(&chain, MESSAGE_KEY_LABEL),
            derive_key(&next, MESSAGE_KEY_LABEL)
        );
    }

    #[test]
    fn test_root_update_depends_on_both_inputs() {
        let root = [3u8; 32];
        let shared = [4u8; 32];

        let km = root_update(&root, &shared);

        assert_ne!(km, root_update(&root, &[5u8; 32]));
        assert_ne!(km, root_update(&[5u8; 32], &shared));
    }
}
