//! Master-key management and per-thread DEK lifecycle: the wrap/unwrap
//! shape follows the fetch-decrypt-cache pattern used for enclave DEKs
//! elsewhere in this corpus, adapted from an external KMS round-trip to an
//! in-process AES-256-GCM KEK.

pub mod field_policy;

use std::collections::HashMap;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CResult, Error};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEK_LEN: usize = 32;

struct KekState {
    bytes: Zeroizing<[u8; KEK_LEN]>,
    id: String,
    version: u32,
    /// Raw pointer bookkeeping so a locked page can be unlocked before the
    /// buffer is replaced. `None` when mlock was unavailable or skipped.
    locked: bool,
}

/// Master key-encryption key plus the registry of per-thread wrapped DEKs.
/// DEK plaintexts never persist past the call that needs them; the wrapped
/// bytes are the only thing kept around, and those live in `Thread.kms` on
/// disk (the registry here just caches them for decrypt/rotate).
pub struct Kms {
    kek: Mutex<Option<KekState>>,
    registry: Mutex<HashMap<String, Vec<u8>>>,
}

impl Kms {
    pub fn new() -> Self {
        Kms { kek: Mutex::new(None), registry: Mutex::new(HashMap::new()) }
    }

    /// Decodes `hex` as the 32-byte KEK, attempts to mlock it, and replaces
    /// (munlocking) any prior key. An empty string clears the key.
    pub fn set_key_hex(&self, hex: &str) -> CResult<()> {
        let mut guard = self.kek.lock().unwrap();

        if hex.is_empty() {
            if let Some(prev) = guard.take() {
                self.unlock(&prev);
            }
            return Ok(());
        }

        let decoded = hex::decode(hex).map_err(|_| Error::KMSInvalidKey)?;
        if decoded.len() != KEK_LEN {
            return Err(Error::KMSInvalidKey);
        }

        let mut bytes = [0u8; KEK_LEN];
        bytes.copy_from_slice(&decoded);
        let bytes = Zeroizing::new(bytes);

        let locked = unsafe { libc::mlock(bytes.as_ptr() as *const libc::c_void, KEK_LEN) == 0 };
        if !locked {
            log::warn!("mlock failed for KEK material, continuing without memory lock");
        }

        let version = guard.as_ref().map_or(1, |prev| prev.version + 1);
        if let Some(prev) = guard.take() {
            self.unlock(&prev);
        }

        *guard = Some(KekState { bytes, id: format!("kek-{}", version), version, locked });
        Ok(())
    }

    fn unlock(&self, state: &KekState) {
        if state.locked {
            unsafe {
                libc::munlock(state.bytes.as_ptr() as *const libc::c_void, KEK_LEN);
            }
        }
    }

    fn cipher(bytes: &[u8; KEK_LEN]) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(bytes))
    }

    /// Generates a random 32-byte DEK, wraps it with the KEK, registers the
    /// wrapped bytes under a fresh key-id, and returns both.
    pub fn create_dek_for_thread(&self, thread_id: &str) -> CResult<(String, Vec<u8>)> {
        let guard = self.kek.lock().unwrap();
        let kek = guard.as_ref().ok_or(Error::KMSNoProvider)?;

        let mut dek = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(dek.as_mut());

        let wrapped = Self::seal(&Self::cipher(&kek.bytes), &dek[..])?;

        let mut rand_suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut rand_suffix);
        let key_id = format!("dek-{}-{}", thread_id, hex::encode(rand_suffix));

        self.registry.lock().unwrap().insert(key_id.clone(), wrapped.clone());
        Ok((key_id, wrapped))
    }

    /// Registers an already-wrapped DEK loaded back from a `Thread.kms`
    /// record, so subsequent encrypt/decrypt calls can find it.
    pub fn register_wrapped_dek(&self, key_id: &str, wrapped: Vec<u8>) {
        self.registry.lock().unwrap().insert(key_id.to_string(), wrapped);
    }

    fn unwrap_dek(&self, key_id: &str) -> CResult<Zeroizing<Vec<u8>>> {
        let wrapped = self
            .registry
            .lock()
            .unwrap()
            .get(key_id)
            .cloned()
            .ok_or(Error::NoThreadKey)?;

        let guard = self.kek.lock().unwrap();
        let kek = guard.as_ref().ok_or(Error::KMSNoProvider)?;
        Self::open(&Self::cipher(&kek.bytes), &wrapped).map(Zeroizing::new)
    }

    /// AES-GCM-encrypts `plaintext` under the DEK named by `key_id`, with
    /// `aad` bound into the tag. Returns `nonce || ciphertext || tag`.
    pub fn encrypt_with_dek(&self, key_id: &str, plaintext: &[u8], aad: &[u8]) -> CResult<Vec<u8>> {
        let dek = self.unwrap_dek(key_id)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek));
        Self::seal_aad(&cipher, plaintext, aad)
    }

    pub fn decrypt_with_dek(&self, key_id: &str, ciphertext: &[u8], aad: &[u8]) -> CResult<Vec<u8>> {
        let dek = self.unwrap_dek(key_id)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek));
        Self::open_aad(&cipher, ciphertext, aad)
    }

    fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> CResult<Vec<u8>> {
        Self::seal_aad(cipher, plaintext, b"")
    }

    fn seal_aad(cipher: &Aes256Gcm, plaintext: &[u8], aad: &[u8]) -> CResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = aes_gcm::aead::Payload { msg: plaintext, aad };
        let ciphertext = cipher.encrypt(nonce, payload).map_err(|_| Error::EncryptFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(cipher: &Aes256Gcm, sealed: &[u8]) -> CResult<Vec<u8>> {
        Self::open_aad(cipher, sealed, b"")
    }

    fn open_aad(cipher: &Aes256Gcm, sealed: &[u8], aad: &[u8]) -> CResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::DecryptFailed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let payload = aes_gcm::aead::Payload { msg: ciphertext, aad };
        cipher.decrypt(nonce, payload).map_err(|_| Error::DecryptFailed)
    }

    /// Re-wraps every registered DEK under a freshly set KEK, only switching
    /// the active key once every re-wrap succeeds. Keeps the prior wrapped
    /// bytes as a backup until the loop commits, so a mid-rotation failure
    /// leaves the old KEK fully valid.
    pub fn rotate_kek(&self, new_hex: &str) -> CResult<()> {
        let decoded = hex::decode(new_hex).map_err(|_| Error::KMSInvalidKey)?;
        if decoded.len() != KEK_LEN {
            return Err(Error::KMSInvalidKey);
        }
        let mut new_bytes = [0u8; KEK_LEN];
        new_bytes.copy_from_slice(&decoded);
        let new_cipher = Self::cipher(&new_bytes);

        let registry = self.registry.lock().unwrap();
        let old_guard = self.kek.lock().unwrap();
        let old_kek = old_guard.as_ref().ok_or(Error::KMSNoProvider)?;
        let old_cipher = Self::cipher(&old_kek.bytes);

        let mut rewrapped = HashMap::with_capacity(registry.len());
        for (key_id, wrapped) in registry.iter() {
            let dek = Self::open(&old_cipher, wrapped).map(Zeroizing::new)?;
            rewrapped.insert(key_id.clone(), Self::seal(&new_cipher, &dek)?);
        }
        drop(old_guard);
        drop(registry);

        *self.registry.lock().unwrap() = rewrapped;
        self.set_key_hex(new_hex)
    }

    pub fn kek_meta(&self) -> Option<(String, u32)> {
        self.kek.lock().unwrap().as_ref().map(|k| (k.id.clone(), k.version))
    }
}

impl Default for Kms {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Kms {
    fn drop(&mut self) {
        if let Some(state) = self.kek.lock().unwrap().take() {
            self.unlock(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_key() -> String {
        hex::encode([7u8; 32])
    }

    #[test]
    fn round_trips_plaintext_through_a_thread_dek() {
        let kms = Kms::new();
        kms.set_key_hex(&hex_key()).unwrap();

        let (key_id, _wrapped) = kms.create_dek_for_thread("t1").unwrap();
        let ciphertext = kms.encrypt_with_dek(&key_id, b"hello", b"").unwrap();
        assert_ne!(ciphertext, b"hello".to_vec());

        let plaintext = kms.decrypt_with_dek(&key_id, &ciphertext, b"").unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn rejects_operations_without_a_kek() {
        let kms = Kms::new();
        assert!(matches!(kms.create_dek_for_thread("t1"), Err(Error::KMSNoProvider)));
    }

    #[test]
    fn rejects_wrong_length_key() {
        let kms = Kms::new();
        assert!(matches!(kms.set_key_hex("abcd"), Err(Error::KMSInvalidKey)));
    }

    #[test]
    fn rotation_preserves_decryptability() {
        let kms = Kms::new();
        kms.set_key_hex(&hex_key()).unwrap();
        let (key_id, _) = kms.create_dek_for_thread("t1").unwrap();
        let ciphertext = kms.encrypt_with_dek(&key_id, b"rotate-me", b"").unwrap();

        kms.rotate_kek(&hex::encode([9u8; 32])).unwrap();

        let plaintext = kms.decrypt_with_dek(&key_id, &ciphertext, b"").unwrap();
        assert_eq!(plaintext, b"rotate-me");
    }

    #[test]
    fn unknown_key_id_is_an_error() {
        let kms = Kms::new();
        kms.set_key_hex(&hex_key()).unwrap();
        assert!(matches!(kms.decrypt_with_dek("missing", b"x", b""), Err(Error::NoThreadKey)));
    }
}
