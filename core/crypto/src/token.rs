//! Envelope encryption of the upstream token.
//!
//! The sealed form is `base64(nonce || ciphertext || tag)`, which keeps the
//! stored value printable ASCII.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::Zeroizing;

use crate::aead::{decrypt, encrypt};
use plexaccess_common::{Error, Result};

/// Seal a plaintext token under the app secret.
///
/// # Errors
/// - `Error::Encryption` if the secret has the wrong length
pub fn seal_token(secret: &[u8], token: &str) -> Result<Vec<u8>> {
    let sealed = encrypt(secret, token.as_bytes())?;
    Ok(STANDARD.encode(sealed).into_bytes())
}

/// Open a sealed token with the app secret.
///
/// # Errors
/// - `Error::Decryption` if the representation is not valid base64,
///   the secret is wrong, the data was tampered with, or the plaintext
///   is not UTF-8
pub fn open_token(secret: &[u8], sealed: &[u8]) -> Result<String> {
    let raw = STANDARD
        .decode(sealed)
        .map_err(|e| Error::Decryption(format!("Malformed token representation: {}", e)))?;

    let plaintext = Zeroizing::new(decrypt(secret, &raw)?);

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| Error::Decryption("Token is not valid UTF-8".to_string()))
}
