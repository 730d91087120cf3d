//! # Axolotl
//!
//! Per-contact double-ratchet sessions with encrypted headers.
//!
//! A [`Session`] establishes a shared secret from a two-message key
//! exchange and from then on provides authenticated, forward-secret,
//! future-secret encryption of a bidirectional message stream. Messages
//! may arrive out of order within a bounded window; duplicates and
//! replays are detected. Given the same inputs and the same injected
//! entropy source, a session behaves deterministically, and its full
//! state serializes so conversations survive restarts.
//!
//! ## Quick start
//!
//! ```
//! use axolotl::Session;
//! use rand::rngs::OsRng;
//!
//! # fn identity() -> [u8; 32] {
//! #     use rand::RngCore;
//! #     let mut bytes = [0u8; 32];
//! #     OsRng.fill_bytes(&mut bytes);
//! #     bytes
//! # }
//! // Each side owns a long-term identity scalar and a fresh session.
//! let mut alice = Session::new(OsRng, identity());
//! let mut bob = Session::new(OsRng, identity());
//!
//! // Swap key exchange material over any channel, in any order.
//! let from_alice = alice.key_exchange_material()?;
//! let from_bob = bob.key_exchange_material()?;
//! alice.complete_key_exchange(&from_bob)?;
//! bob.complete_key_exchange(&from_alice)?;
//!
//! // From here on the wire frames are opaque bytes.
//! let frame = alice.encrypt(b"hello, bob");
//! assert_eq!(bob.decrypt(&frame)?, b"hello, bob");
//! # Ok::<(), axolotl::Error>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 CALLER                      │
//! │   transport · persistence · UI · armor      │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               SESSION LAYER                 │
//! │  handshake | ratchet | skipped-key cache    │
//! │            | state snapshots                │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               CRYPTO LAYER                  │
//! │  X25519 | HMAC-SHA256 | XSalsa20-Poly1305   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The crate performs no I/O of its own. Transport and persistence sit
//! above it: wherever the frames and snapshots travel, the session only
//! ever consumes and produces byte slices.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crypto;
pub mod error;
pub mod session;

// Re-export main types at crate root
pub use crypto::exchange::PublicKey;
pub use error::{Error, Result};
pub use session::{KeyExchange, Session};
