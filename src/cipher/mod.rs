//! Cipher strategies applied to file bodies at pack time and reversed on read.
//!
//! Two strategies exist, selected archive-wide and recorded in the header:
//!
//! * [`StreamXor`] — byte-wise XOR with a single repeating key byte.
//!   Self-inverse and length preserving, so a packed container keeps the
//!   exact offsets and sizes of its unencrypted source.
//! * [`Aes128Ecb`] — AES-128 in ECB mode, key = MD5(passphrase).  PKCS#7
//!   padded on encrypt, so the stored size exceeds the plaintext length;
//!   the header's `len` field carries the true length.
//!
//! Neither is a security boundary: both keys ship with the reader.  The
//! point is that container bodies are not recoverable by a naive scan.
//!
//! Every file is its own cipher unit.  No state crosses file boundaries, so
//! truncating one body can never corrupt a neighbour's plaintext.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

type Aes128EcbEnc = ecb::Encryptor<aes::Aes128>;
type Aes128EcbDec = ecb::Decryptor<aes::Aes128>;

/// AES block size; ciphertext from [`Aes128Ecb`] is always a multiple of it.
pub const BLOCK_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("cipher failure: {0}")]
    Cipher(String),
    #[error("decrypted length mismatch: expected {expected} bytes, produced {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("entry is encrypted but the header names no cipher strategy")]
    MissingStrategy,
}

// ── Strategy identity ─────────────────────────────────────────────────────────

/// Names the strategy an archive was packed with.  Serialized into the
/// header so readers never have to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyId {
    StreamXor,
    Aes128Ecb,
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyId::StreamXor => write!(f, "stream-xor"),
            StrategyId::Aes128Ecb => write!(f, "aes-128-ecb"),
        }
    }
}

impl FromStr for StrategyId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xor" | "stream-xor" => Ok(StrategyId::StreamXor),
            "aes" | "ecb" | "aes-128-ecb" => Ok(StrategyId::Aes128Ecb),
            other => Err(format!("unknown cipher strategy: {other}")),
        }
    }
}

// ── Keying configuration ──────────────────────────────────────────────────────

/// Key material for both strategies, passed explicitly into reader and
/// writer construction.  Nothing in the core reads key material from
/// globals; embedders source this from their configuration.
#[derive(Debug, Clone)]
pub struct CipherContext {
    pub xor_key: u8,
    pub passphrase: String,
}

impl Default for CipherContext {
    /// Compatibility keys understood by containers from existing producers.
    fn default() -> Self {
        Self { xor_key: 193, passphrase: "testtesttesttest".to_string() }
    }
}

/// Derive the fixed-size AES key from a passphrase.
pub fn derive_key(passphrase: &str) -> [u8; BLOCK_LEN] {
    Md5::digest(passphrase.as_bytes()).into()
}

// ── Strategy trait ────────────────────────────────────────────────────────────

/// A byte transform from plaintext to ciphertext and back.
///
/// `decrypt` is told the target plaintext length explicitly because the
/// stored size may be an encoded length; it must produce exactly
/// `plain_len` bytes or fail — partial or padded plaintext never escapes.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;
    fn decrypt(&self, ciphertext: &[u8], plain_len: u64) -> Result<Vec<u8>, CipherError>;
}

/// Instantiate the strategy `id` names, keyed from `ctx`.
pub fn get_cipher(id: StrategyId, ctx: &CipherContext) -> Box<dyn Cipher> {
    match id {
        StrategyId::StreamXor => Box::new(StreamXor { key: ctx.xor_key }),
        StrategyId::Aes128Ecb => Box::new(Aes128Ecb::from_passphrase(&ctx.passphrase)),
    }
}

// ── StreamXor ─────────────────────────────────────────────────────────────────

/// XOR every byte with a fixed key byte.  Stateless and self-inverse.
#[derive(Debug, Clone, Copy)]
pub struct StreamXor {
    pub key: u8,
}

impl Cipher for StreamXor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(plaintext.iter().map(|b| b ^ self.key).collect())
    }

    fn decrypt(&self, ciphertext: &[u8], plain_len: u64) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() as u64 != plain_len {
            return Err(CipherError::LengthMismatch {
                expected: plain_len,
                actual: ciphertext.len() as u64,
            });
        }
        self.encrypt(ciphertext)
    }
}

// ── Aes128Ecb ─────────────────────────────────────────────────────────────────

/// AES-128-ECB with an MD5-derived key.  No IV, no chaining.
#[derive(Debug, Clone, Copy)]
pub struct Aes128Ecb {
    key: [u8; BLOCK_LEN],
}

impl Aes128Ecb {
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self { key: derive_key(passphrase) }
    }

    pub fn with_key(key: [u8; BLOCK_LEN]) -> Self {
        Self { key }
    }
}

impl Cipher for Aes128Ecb {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let enc = Aes128EcbEnc::new(&self.key.into());
        Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    /// Decrypt every whole block, then cut the result down to `plain_len`.
    ///
    /// Trailing partial blocks are ignored rather than rejected: external
    /// producers route ciphertext through text-safe encodings whose decoded
    /// output is not always block aligned.
    fn decrypt(&self, ciphertext: &[u8], plain_len: u64) -> Result<Vec<u8>, CipherError> {
        let aligned = ciphertext.len() - ciphertext.len() % BLOCK_LEN;
        let dec = Aes128EcbDec::new(&self.key.into());
        let mut plaintext = dec
            .decrypt_padded_vec_mut::<NoPadding>(&ciphertext[..aligned])
            .map_err(|e| CipherError::Cipher(format!("block decrypt failed: {e}")))?;
        if (plaintext.len() as u64) < plain_len {
            return Err(CipherError::LengthMismatch {
                expected: plain_len,
                actual: plaintext.len() as u64,
            });
        }
        plaintext.truncate(plain_len as usize);
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn xor_known_bytes() {
        let xor = StreamXor { key: 193 };
        let ct = xor.encrypt(b"hi").unwrap();
        assert_eq!(ct, vec![0x68 ^ 193, 0x69 ^ 193]);
        assert_eq!(xor.decrypt(&ct, 2).unwrap(), b"hi");
    }

    #[test]
    fn xor_length_mismatch() {
        let xor = StreamXor { key: 7 };
        let err = xor.decrypt(b"abc", 5).unwrap_err();
        assert!(matches!(err, CipherError::LengthMismatch { expected: 5, actual: 3 }));
    }

    #[test]
    fn ecb_roundtrip_various_lengths() {
        let cipher = Aes128Ecb::from_passphrase("testtesttesttest");
        for n in [0usize, 1, 15, 16, 17, 255, 4096] {
            let plaintext: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();
            let ct = cipher.encrypt(&plaintext).unwrap();
            assert_eq!(ct.len() % BLOCK_LEN, 0);
            assert!(ct.len() > plaintext.len() - plaintext.len() % BLOCK_LEN);
            let pt = cipher.decrypt(&ct, n as u64).unwrap();
            assert_eq!(pt, plaintext, "length {n}");
        }
    }

    #[test]
    fn ecb_length_mismatch() {
        let cipher = Aes128Ecb::from_passphrase("pw");
        let ct = cipher.encrypt(b"short").unwrap();
        let err = cipher.decrypt(&ct, 1000).unwrap_err();
        assert!(matches!(err, CipherError::LengthMismatch { .. }));
    }

    #[test]
    fn derive_key_is_md5() {
        // MD5 of the empty string is a published constant.
        assert_eq!(hex::encode(derive_key("")), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn strategy_id_parse_and_display() {
        assert_eq!("xor".parse::<StrategyId>().unwrap(), StrategyId::StreamXor);
        assert_eq!("aes-128-ecb".parse::<StrategyId>().unwrap(), StrategyId::Aes128Ecb);
        assert_eq!(StrategyId::StreamXor.to_string(), "stream-xor");
        assert!("rot13".parse::<StrategyId>().is_err());
    }

    proptest! {
        #[test]
        fn xor_is_an_involution(data in proptest::collection::vec(any::<u8>(), 0..512), key in any::<u8>()) {
            let xor = StreamXor { key };
            let once = xor.encrypt(&data).unwrap();
            let twice = xor.encrypt(&once).unwrap();
            prop_assert_eq!(&twice, &data);
            prop_assert_eq!(xor.decrypt(&once, data.len() as u64).unwrap(), data);
        }

        #[test]
        fn ecb_roundtrip(data in proptest::collection::vec(any::<u8>(), 1..512), pass in "[a-z]{0,24}") {
            let cipher = Aes128Ecb::from_passphrase(&pass);
            let ct = cipher.encrypt(&data).unwrap();
            prop_assert_eq!(cipher.decrypt(&ct, data.len() as u64).unwrap(), data);
        }
    }
}
