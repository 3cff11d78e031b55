//! At-rest encryption of host-folder passwords.
//!
//! Stored form is `base64(nonce || AES-256-GCM ciphertext)` under a fixed
//! application key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;
const KEY_SEED: &[u8] = b"hostlink/hostfolder/password/v1";

fn cipher() -> Aes256Gcm {
    let key = Sha256::digest(KEY_SEED);
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
}

pub fn encrypt(plaintext: &str) -> HostlinkResult<String> {
    let nonce: [u8; NONCE_LEN] = rand::random();
    let ciphertext = cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| HostlinkError::Internal("password encryption failed".to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

pub fn decrypt(sealed: &str) -> HostlinkResult<String> {
    let undecryptable =
        || HostlinkError::Config("stored host folder password cannot be decrypted".to_string());

    let raw = STANDARD.decode(sealed).map_err(|_| undecryptable())?;
    if raw.len() <= NONCE_LEN {
        return Err(undecryptable());
    }
    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
    let plaintext = cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| undecryptable())?;
    String::from_utf8(plaintext).map_err(|_| undecryptable())
}
