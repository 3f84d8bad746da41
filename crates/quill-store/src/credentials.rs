// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-user secrets (Git tokens), encrypted at rest.
//!
//! # Security model
//!
//! Values are sealed with ChaCha20-Poly1305 under a 32-byte key supplied via
//! the `QUILL_CREDENTIAL_KEY` environment variable (64 hex chars).  The file
//! on disk holds only `{nonce, ciphertext}` pairs; a leaked file without the
//! key reveals nothing.  Decrypted values travel inside [`SecretString`],
//! whose `Debug`/`Display` are redacted so a stray log line can never leak
//! them.  Equality checks are constant-time.

use std::collections::HashMap;

use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::jsonfile::LockedJsonFile;
use crate::StoreError;

pub const KEY_ENV: &str = "QUILL_CREDENTIAL_KEY";

/// A decrypted secret.  Redacted in all text output.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The only way to reach the cleartext.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretString(***)")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedValue {
    nonce: String,
    ciphertext: String,
}

type CredDoc = HashMap<String, HashMap<String, SealedValue>>;

/// Encrypted, file-locked credential store.
#[derive(Clone)]
pub struct CredentialStore {
    file: LockedJsonFile,
    key: [u8; 32],
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The key must never appear in debug output.
        f.debug_struct("CredentialStore")
            .field("path", &self.file.path())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(path: impl Into<std::path::PathBuf>, key: [u8; 32]) -> Self {
        Self {
            file: LockedJsonFile::new(path),
            key,
        }
    }

    /// Build a store with the key taken from `QUILL_CREDENTIAL_KEY`.
    pub fn from_env(path: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let hex_key = std::env::var(KEY_ENV)
            .map_err(|_| StoreError::Key(format!("{KEY_ENV} is not set")))?;
        let bytes = hex::decode(hex_key.trim())
            .map_err(|_| StoreError::Key(format!("{KEY_ENV} is not valid hex")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StoreError::Key(format!("{KEY_ENV} must be 32 bytes (64 hex chars)")))?;
        Ok(Self::new(path, key))
    }

    /// Store a secret under `(user_id, name)`, replacing any previous value.
    pub fn set(&self, user_id: i64, name: &str, secret: &SecretString) -> Result<(), StoreError> {
        let sealed = self.seal(secret)?;
        let name = name.to_string();
        self.file.update(move |doc: &mut CredDoc| {
            doc.entry(user_id.to_string())
                .or_default()
                .insert(name.clone(), sealed);
        })?;
        debug!(user_id, "credential stored");
        Ok(())
    }

    /// Retrieve and decrypt a secret.
    pub fn get(&self, user_id: i64, name: &str) -> Result<Option<SecretString>, StoreError> {
        let doc: CredDoc = self.file.read()?;
        let sealed = match doc.get(&user_id.to_string()).and_then(|m| m.get(name)) {
            Some(s) => s.clone(),
            None => return Ok(None),
        };
        Ok(Some(self.open(name, &sealed)?))
    }

    /// Delete one named secret, or all of a user's secrets when `name` is
    /// `None`.  Returns whether anything was removed.
    pub fn delete(&self, user_id: i64, name: Option<&str>) -> Result<bool, StoreError> {
        let name = name.map(str::to_string);
        self.file.update(move |doc: &mut CredDoc| {
            let uid = user_id.to_string();
            match name {
                Some(n) => {
                    let removed = doc.get_mut(&uid).map_or(false, |m| m.remove(&n).is_some());
                    if doc.get(&uid).is_some_and(HashMap::is_empty) {
                        doc.remove(&uid);
                    }
                    removed
                }
                None => doc.remove(&uid).is_some(),
            }
        })
    }

    /// Names of the secrets a user has stored.  Values are never returned
    /// here; this backs the `/creds show` surface.
    pub fn names(&self, user_id: i64) -> Result<Vec<String>, StoreError> {
        let doc: CredDoc = self.file.read()?;
        let mut names: Vec<String> = doc
            .get(&user_id.to_string())
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    fn seal(&self, secret: &SecretString) -> Result<SealedValue, StoreError> {
        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, secret.expose().as_bytes())
            .map_err(|_| StoreError::Key("encryption failed".to_string()))?;
        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(SealedValue {
            nonce: b64.encode(nonce),
            ciphertext: b64.encode(ciphertext),
        })
    }

    fn open(&self, name: &str, sealed: &SealedValue) -> Result<SecretString, StoreError> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let decrypt_err = || StoreError::Decrypt {
            name: name.to_string(),
        };
        let nonce_bytes = b64.decode(&sealed.nonce).map_err(|_| decrypt_err())?;
        let ct = b64.decode(&sealed.ciphertext).map_err(|_| decrypt_err())?;
        if nonce_bytes.len() != 12 {
            return Err(decrypt_err());
        }
        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let plain = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ct.as_ref())
            .map_err(|_| decrypt_err())?;
        let text = String::from_utf8(plain).map_err(|_| decrypt_err())?;
        Ok(SecretString::new(text))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"), [7u8; 32]);
        (dir, store)
    }

    #[test]
    fn set_then_get_round_trips() {
        let (_d, s) = store();
        s.set(1, "git_token", &SecretString::new("ghp_abc123")).unwrap();
        let got = s.get(1, "git_token").unwrap().unwrap();
        assert_eq!(got.expose(), "ghp_abc123");
    }

    #[test]
    fn get_missing_is_none() {
        let (_d, s) = store();
        assert!(s.get(1, "nope").unwrap().is_none());
    }

    #[test]
    fn secrets_are_scoped_per_user() {
        let (_d, s) = store();
        s.set(1, "git_token", &SecretString::new("one")).unwrap();
        assert!(s.get(2, "git_token").unwrap().is_none());
    }

    #[test]
    fn ciphertext_on_disk_does_not_contain_plaintext() {
        let (_d, s) = store();
        s.set(1, "git_token", &SecretString::new("super-secret-value"))
            .unwrap();
        let raw = std::fs::read_to_string(s.file.path()).unwrap();
        assert!(!raw.contains("super-secret-value"));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let a = CredentialStore::new(&path, [1u8; 32]);
        a.set(1, "t", &SecretString::new("x")).unwrap();
        let b = CredentialStore::new(&path, [2u8; 32]);
        assert!(matches!(b.get(1, "t"), Err(StoreError::Decrypt { .. })));
    }

    #[test]
    fn delete_single_name() {
        let (_d, s) = store();
        s.set(1, "a", &SecretString::new("1")).unwrap();
        s.set(1, "b", &SecretString::new("2")).unwrap();
        assert!(s.delete(1, Some("a")).unwrap());
        assert!(s.get(1, "a").unwrap().is_none());
        assert!(s.get(1, "b").unwrap().is_some());
    }

    #[test]
    fn delete_all_for_user() {
        let (_d, s) = store();
        s.set(1, "a", &SecretString::new("1")).unwrap();
        s.set(1, "b", &SecretString::new("2")).unwrap();
        assert!(s.delete(1, None).unwrap());
        assert!(s.names(1).unwrap().is_empty());
    }

    #[test]
    fn delete_missing_reports_false() {
        let (_d, s) = store();
        assert!(!s.delete(1, Some("ghost")).unwrap());
    }

    #[test]
    fn names_lists_without_values() {
        let (_d, s) = store();
        s.set(1, "b", &SecretString::new("2")).unwrap();
        s.set(1, "a", &SecretString::new("1")).unwrap();
        assert_eq!(s.names(1).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn secret_string_redacts_debug_and_display() {
        let s = SecretString::new("token");
        assert_eq!(format!("{s}"), "***");
        assert!(!format!("{s:?}").contains("token"));
    }

    #[test]
    fn store_debug_omits_key() {
        let (_d, s) = store();
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("key"));
    }

    #[test]
    fn from_env_rejects_bad_key() {
        std::env::set_var(KEY_ENV, "not-hex");
        let r = CredentialStore::from_env("/tmp/unused.json");
        std::env::remove_var(KEY_ENV);
        assert!(matches!(r, Err(StoreError::Key(_))));
    }
}
