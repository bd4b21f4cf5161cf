//! AES-256-GCM sealing for pattern-memory solution blobs.
//!
//! Every solution payload is sealed with a fresh random 96-bit nonce before
//! it reaches the store; nonce and tag travel alongside the ciphertext so a
//! record is self-contained. The key itself never touches disk: it is read
//! once from `CORTEXDX_PATTERN_KEY` (64 hex chars, i.e. 32 bytes) or, outside
//! production, generated once per process and held in memory only.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use std::sync::OnceLock;

use crate::error::{CortexDxError, Result};

/// Name of the environment variable carrying the 64 hex-char pattern key.
pub const PATTERN_KEY_ENV: &str = "CORTEXDX_PATTERN_KEY";

/// A sealed record as persisted: nonce and ciphertext (tag appended by the
/// AEAD) each hex-encoded so they sit comfortably in TEXT columns.
#[derive(Debug, Clone)]
pub struct SealedBlob {
    pub nonce_hex: String,
    pub ciphertext_hex: String,
}

/// Holds the resolved 256-bit key for the process lifetime.
pub struct PatternCipher {
    cipher: Aes256Gcm,
    /// True when the key was generated rather than supplied, so callers can
    /// gate the "ephemeral key in use" warning to once.
    pub is_ephemeral: bool,
}

fn parse_hex_key(hex: &str) -> Result<[u8; 32]> {
    if hex.len() != 64 {
        return Err(anyhow::anyhow!(CortexDxError::Crypto(format!(
            "{PATTERN_KEY_ENV} must be exactly 64 hex characters, got {}",
            hex.len()
        ))));
    }
    let mut key = [0u8; 32];
    for (i, chunk) in key.iter_mut().enumerate() {
        let byte_str = &hex[i * 2..i * 2 + 2];
        *chunk = u8::from_str_radix(byte_str, 16)
            .map_err(|e| anyhow::anyhow!(CortexDxError::Crypto(format!("invalid hex key: {e}"))))?;
    }
    Ok(key)
}

fn random_hex_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

static EPHEMERAL_KEY: OnceLock<String> = OnceLock::new();

impl PatternCipher {
    /// Resolve the cipher from environment. `dev_mode` governs whether a
    /// missing key is fatal (production) or falls back to a process-lifetime
    /// ephemeral key (development), per the configuration document's
    /// dev-mode flag.
    pub fn from_env(dev_mode: bool) -> Result<Self> {
        match std::env::var(PATTERN_KEY_ENV) {
            Ok(hex) => {
                let key_bytes = parse_hex_key(&hex)?;
                let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
                Ok(Self {
                    cipher: Aes256Gcm::new(key),
                    is_ephemeral: false,
                })
            }
            Err(_) if dev_mode => {
                let hex = EPHEMERAL_KEY.get_or_init(|| {
                    tracing::warn!(
                        "{PATTERN_KEY_ENV} not set; generating an ephemeral pattern-memory key for this process only"
                    );
                    random_hex_key()
                });
                let key_bytes = parse_hex_key(hex)?;
                let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
                Ok(Self {
                    cipher: Aes256Gcm::new(key),
                    is_ephemeral: true,
                })
            }
            Err(_) => Err(anyhow::anyhow!(CortexDxError::Crypto(format!(
                "{PATTERN_KEY_ENV} must be set in a production environment"
            )))),
        }
    }

    /// Seal `plaintext`, returning hex-encoded nonce and ciphertext (tag
    /// appended).
    pub fn seal(&self, plaintext: &str) -> Result<SealedBlob> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!(CortexDxError::Crypto(format!("seal failed: {e}"))))?;
        Ok(SealedBlob {
            nonce_hex: hex_encode(&nonce),
            ciphertext_hex: hex_encode(&ciphertext),
        })
    }

    /// Open a sealed blob back to plaintext. Returns `Err` on tag mismatch or
    /// malformed hex, leaving the decision of how to surface that (a
    /// `legacy-` placeholder pattern) to the caller.
    pub fn open(&self, blob: &SealedBlob) -> Result<String> {
        let nonce_bytes = hex_decode(&blob.nonce_hex)?;
        let ciphertext = hex_decode(&blob.ciphertext_hex)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|e| anyhow::anyhow!(CortexDxError::Crypto(format!("decrypt failed: {e}"))))?;
        String::from_utf8(plaintext)
            .map_err(|e| anyhow::anyhow!(CortexDxError::Crypto(format!("sealed plaintext was not utf8: {e}"))))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(anyhow::anyhow!(CortexDxError::Crypto("odd-length hex string".into())));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| anyhow::anyhow!(CortexDxError::Crypto(format!("invalid hex: {e}"))))
        })
        .collect()
}
