//! Credential encryption — AES-256-GCM with a hex-encoded secret.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::DecryptionError;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Loaded once and cached by the embedding application; re-validated on
/// change. Wraps the derived 32-byte key so callers never handle raw key
/// bytes directly.
#[derive(Clone)]
pub struct CredentialCipher {
    key: Key<Aes256Gcm>,
}

impl CredentialCipher {
    /// `secret` must be exactly 64 hex characters (32 bytes decoded).
    pub fn new(secret: &str) -> Result<Self, DecryptionError> {
        if secret.len() != 64 || !secret.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DecryptionError("secret must be 64 hex characters"));
        }
        let bytes = hex::decode(secret).map_err(|_| DecryptionError("secret is not valid hex"))?;
        Ok(Self {
            key: *Key::<Aes256Gcm>::from_slice(&bytes),
        })
    }

    /// `encrypt(plaintext) -> iv:authTag:ciphertext`, all lowercase hex,
    /// colon-separated, using the crate's standard 12-byte nonce and
    /// 16-byte tag.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        // `encrypt` panics only on buffer allocation failure, never on valid input.
        let mut ciphertext_and_tag = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .expect("AES-GCM encryption of valid UTF-8 cannot fail");
        let tag = ciphertext_and_tag.split_off(ciphertext_and_tag.len() - TAG_LEN);

        format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(ciphertext_and_tag)
        )
    }

    /// Validates the 3-part structure, hex charset, component lengths, and
    /// GCM authenticity; any mismatch raises `DecryptionError`.
    pub fn decrypt(&self, stored: &str) -> Result<String, DecryptionError> {
        let parts: Vec<&str> = stored.split(':').collect();
        let [iv_hex, tag_hex, ciphertext_hex] = parts[..] else {
            return Err(DecryptionError("expected iv:tag:ciphertext"));
        };

        let iv = hex::decode(iv_hex).map_err(|_| DecryptionError("iv is not valid hex"))?;
        let tag = hex::decode(tag_hex).map_err(|_| DecryptionError("tag is not valid hex"))?;
        let ciphertext = hex::decode(ciphertext_hex).map_err(|_| DecryptionError("ciphertext is not valid hex"))?;

        if iv.len() != IV_LEN {
            return Err(DecryptionError("iv must be 12 bytes"));
        }
        if tag.len() != TAG_LEN {
            return Err(DecryptionError("tag must be 16 bytes"));
        }

        let nonce = Nonce::from_slice(&iv);
        let mut combined = ciphertext;
        combined.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new(&self.key);
        let plaintext_bytes = cipher
            .decrypt(nonce, combined.as_ref())
            .map_err(|_| DecryptionError("authentication failed"))?;

        String::from_utf8(plaintext_bytes).map_err(|_| DecryptionError("decrypted payload is not valid UTF-8"))
    }
}
