//! Standalone decode endpoint for out-of-band ciphertext.
//!
//! Some producers encrypt a payload and push it through a text-safe
//! transform stream instead of the container writer.  Decoding such a blob
//! is a pure function of the encoded bytes, the target plaintext length and
//! the passphrase — no container is involved.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::cipher::{Aes128Ecb, Cipher, CipherError};

/// Decode a base64 blob and decrypt it to exactly `target_len` bytes.
///
/// The target length is explicit because base64 framing and block padding
/// both change the payload length; it cannot be inferred from the blob.
pub fn decode_external(
    encoded: &[u8],
    target_len: u64,
    passphrase: &str,
) -> Result<Vec<u8>, CipherError> {
    let trimmed = trim_ascii_whitespace(encoded);
    let ciphertext = STANDARD
        .decode(trimmed)
        .map_err(|e| CipherError::Encoding(format!("base64 decode failed: {e}")))?;
    Aes128Ecb::from_passphrase(passphrase).decrypt(&ciphertext, target_len)
}

// Transform streams commonly append a trailing newline.
fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}
