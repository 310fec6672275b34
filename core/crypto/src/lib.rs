//! Cryptographic primitives for plexaccess.
//!
//! This module provides:
//! - Authenticated encryption using XChaCha20-Poly1305
//! - App secret generation from the OS random number generator
//! - Sealing of the upstream token into a text-safe stored form
//!
//! # Security Guarantees
//! - Tampered or foreign ciphertexts fail authentication instead of decrypting
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod keys;
pub mod token;

pub use aead::{decrypt, encrypt};
pub use keys::{generate_secret, KEY_LENGTH};
pub use token::{open_token, seal_token};
