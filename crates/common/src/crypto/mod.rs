//! Cryptographic primitives for Keel
//!
//! - **Identity**: Ed25519 keypairs whose public-key hashes name owners
//!   and writers. An owner is the quota-bearing identity; a writer
//!   names a mutable-pointer namespace and the subtree of blocks it may
//!   legitimately write. A writer may be delegated (differ from its
//!   owner) but all usage is charged against the owner.
//! - **Content encryption**: ChaCha20-Poly1305 with a per-item
//!   [`Secret`], so ciphertexts remain content-addressable.
//! - **Access tokens**: opaque [`Bat`] credentials authorizing
//!   cross-node block reads without exposing raw identifiers broadly.

mod bat;
mod keys;
mod secret;

pub use bat::{Bat, BatId, BatWithId, BAT_SIZE};
pub use keys::{
    KeyHash, KeyError, PublicKey, SecretKey, SigningWriter, KEY_HASH_SIZE, PUBLIC_KEY_SIZE,
};
pub use secret::{Secret, SecretError, NONCE_SIZE, SECRET_SIZE};
