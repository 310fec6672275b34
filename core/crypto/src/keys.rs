//! App secret generation.

use chacha20poly1305::{
    aead::{KeyInit, OsRng},
    XChaCha20Poly1305,
};

use plexaccess_common::SensitiveBytes;

/// Length of the app secret in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Generate a fresh random app secret.
///
/// # Postconditions
/// - Returns exactly KEY_LENGTH bytes drawn from the OS RNG
/// - The returned bytes are zeroized on drop
pub fn generate_secret() -> SensitiveBytes {
    let key = XChaCha20Poly1305::generate_key(&mut OsRng);
    SensitiveBytes::new(key.to_vec())
}
