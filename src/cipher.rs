//! Relay envelope decryption.
//!
//! Wire format: `base64(iv[16] || AES-CTR(CBOR(payload)))`, no padding.
//! The counter block starts at the IV and only its low 32 bits advance
//! (wrapping), which is what the extension-side cipher does.
//!
//! One symmetric key is active at a time. It arrives once through QR
//! pairing and a new pairing simply replaces it.

use crate::error::DecryptionError;
use crate::payload::{Eip712SafeTx, EoaTx, RawPayload};

use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use ciborium::Value;
use ctr::cipher::{KeyIvInit, StreamCipher};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

type Aes128Ctr = ctr::Ctr32BE<Aes128>;
type Aes192Ctr = ctr::Ctr32BE<Aes192>;
type Aes256Ctr = ctr::Ctr32BE<Aes256>;

pub const IV_LEN: usize = 16;

/// AES key material. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(Vec<u8>);

impl SymmetricKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecryptionError> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self(bytes.to_vec())),
            n => Err(DecryptionError::InvalidKey(format!(
                "expected 16, 24 or 32 bytes, got {n}"
            ))),
        }
    }

    /// Accepts standard or URL-safe base64, padded or not. Pairing QR codes
    /// carry the key as a JWK `k` value, which is unpadded URL-safe.
    pub fn from_base64(encoded: &str) -> Result<Self, DecryptionError> {
        let trimmed = encoded.trim();
        let bytes = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(trimmed).ok())
            .ok_or_else(|| DecryptionError::InvalidKey("key is not base64".into()))?;
        Self::from_bytes(&bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn apply_keystream(&self, iv: &[u8], buf: &mut [u8]) -> Result<(), DecryptionError> {
        let bad_len = |_| DecryptionError::InvalidKey("key/iv length mismatch".into());
        match self.0.len() {
            16 => Aes128Ctr::new_from_slices(&self.0, iv)
                .map_err(bad_len)?
                .apply_keystream(buf),
            24 => Aes192Ctr::new_from_slices(&self.0, iv)
                .map_err(bad_len)?
                .apply_keystream(buf),
            _ => Aes256Ctr::new_from_slices(&self.0, iv)
                .map_err(bad_len)?
                .apply_keystream(buf),
        }
        Ok(())
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey(<{} bytes>)", self.0.len())
    }
}

/// The single active decryption key. Last write wins.
#[derive(Debug, Default)]
pub struct KeySlot {
    active: RwLock<Option<SymmetricKey>>,
}

impl KeySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, key: SymmetricKey) {
        if let Ok(mut slot) = self.active.write() {
            if slot.is_some() {
                info!("Replacing active decryption key with newly paired key");
            } else {
                info!(key_len = key.len(), "Decryption key installed");
            }
            *slot = Some(key);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.active.write() {
            *slot = None;
        }
    }

    /// Fails closed: a poisoned lock reads as "no key".
    pub fn current(&self) -> Option<SymmetricKey> {
        match self.active.read() {
            Ok(slot) => slot.clone(),
            Err(_) => {
                warn!("Key slot lock poisoned; treating device as unpaired");
                None
            }
        }
    }

    pub fn is_provisioned(&self) -> bool {
        self.current().is_some()
    }
}

/// Decrypts relay envelopes with whatever key the slot currently holds.
#[derive(Debug, Clone)]
pub struct PayloadCipher {
    slot: Arc<KeySlot>,
}

impl PayloadCipher {
    pub fn new(slot: Arc<KeySlot>) -> Self {
        Self { slot }
    }

    pub fn key_slot(&self) -> &Arc<KeySlot> {
        &self.slot
    }

    pub fn open(&self, envelope: &str) -> Result<RawPayload, DecryptionError> {
        let key = self.slot.current().ok_or(DecryptionError::NoKey)?;
        Self::open_with_key(envelope, &key)
    }

    pub fn open_with_key(
        envelope: &str,
        key: &SymmetricKey,
    ) -> Result<RawPayload, DecryptionError> {
        let plaintext = Self::decrypt_envelope(envelope, key)?;
        Self::decode_payload(&plaintext)
    }

    pub fn decrypt_envelope(
        envelope: &str,
        key: &SymmetricKey,
    ) -> Result<Vec<u8>, DecryptionError> {
        let raw = STANDARD
            .decode(envelope.trim())
            .map_err(|e| DecryptionError::MalformedEnvelope(format!("not base64: {e}")))?;
        if raw.len() <= IV_LEN {
            return Err(DecryptionError::MalformedEnvelope(format!(
                "envelope is {} bytes, shorter than IV plus ciphertext",
                raw.len()
            )));
        }

        let (iv, ciphertext) = raw.split_at(IV_LEN);
        let mut buf = ciphertext.to_vec();
        key.apply_keystream(iv, &mut buf)?;
        debug!(plaintext_len = buf.len(), "Envelope decrypted");
        Ok(buf)
    }

    /// Decodes the CBOR map and picks the payload shape by `safeAddress`.
    pub fn decode_payload(buf: &[u8]) -> Result<RawPayload, DecryptionError> {
        let value: Value = ciborium::de::from_reader(buf)
            .map_err(|e| DecryptionError::Undecodable(e.to_string()))?;

        let map = value
            .as_map()
            .ok_or_else(|| DecryptionError::Undecodable("expected a CBOR map".into()))?;
        let is_safe = map
            .iter()
            .any(|(k, _)| k.as_text() == Some(RawPayload::SAFE_DISCRIMINATOR));

        let payload = if is_safe {
            value.deserialized::<Eip712SafeTx>().map(RawPayload::Safe)
        } else {
            value.deserialized::<EoaTx>().map(RawPayload::Eoa)
        };
        payload.map_err(|e| DecryptionError::Undecodable(e.to_string()))
    }

    /// Inverse of [`PayloadCipher::open_with_key`].
    pub fn seal(
        payload: &RawPayload,
        key: &SymmetricKey,
        iv: [u8; IV_LEN],
    ) -> Result<String, DecryptionError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(payload, &mut buf)
            .map_err(|e| DecryptionError::Encode(e.to_string()))?;
        key.apply_keystream(&iv, &mut buf)?;

        let mut envelope = iv.to_vec();
        envelope.extend_from_slice(&buf);
        Ok(STANDARD.encode(envelope))
    }
}
