//! Sealing primitive for the upstream token.
//!
//! XChaCha20-Poly1305 keyed by the app secret. Every stored value carries its
//! own random 24-byte nonce up front, so the same token saved twice never
//! produces the same bytes, and a value that was edited on disk or sealed
//! under an older secret fails authentication instead of opening.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use plexaccess_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Build the cipher for an app secret, or report a bad secret through `fail`.
fn cipher_for(secret: &[u8], fail: fn(String) -> Error) -> Result<XChaCha20Poly1305> {
    if secret.len() != KEY_LENGTH {
        return Err(fail(format!(
            "app secret must be {} bytes, got {}",
            KEY_LENGTH,
            secret.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(secret)))
}

/// Seal `plaintext` under the app secret.
///
/// Returns `nonce || ciphertext || tag`.
///
/// # Errors
/// - `Error::Encryption` if the secret is not KEY_LENGTH bytes
pub fn encrypt(secret: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(secret, Error::Encryption)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Encryption(format!("sealing failed: {}", e)))?;

    let mut out = nonce.to_vec();
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a value produced by `encrypt`.
///
/// # Errors
/// - `Error::Decryption` if the secret is not KEY_LENGTH bytes, the value
///   is shorter than a nonce plus tag, or authentication fails
pub fn decrypt(secret: &[u8], stored: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(secret, Error::Decryption)?;

    if stored.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Decryption(format!(
            "stored value is {} bytes, shorter than nonce and tag",
            stored.len()
        )));
    }

    let (nonce, sealed) = stored.split_at(NONCE_SIZE);
    cipher
        .decrypt(GenericArray::from_slice(nonce), sealed)
        .map_err(|_| Error::Decryption("wrong app secret or tampered value".to_string()))
}
