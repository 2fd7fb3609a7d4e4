//! Encrypted-at-rest persistence of the session credential.
//!
//! The credential is written to `$XDG_CONFIG_HOME/earth2/session.enc`
//! (`~/.config/earth2/session.enc` otherwise) as `E2S1 || nonce || ciphertext`,
//! sealed with XChaCha20-Poly1305. Key material comes from
//! `EARTH2_MASTER_KEY` or, failing that, the system keychain.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::session::SessionCredential;

/// Environment variable holding explicit key material.
pub const MASTER_KEY_ENV: &str = "EARTH2_MASTER_KEY";

const APP_DIR_NAME: &str = "earth2";
const SESSION_FILE_NAME: &str = "session.enc";
const KEYRING_SERVICE: &str = "earth2";
const KEYRING_USER: &str = "session-master-key-v1";
const MAGIC: &[u8; 4] = b"E2S1";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// Errors from session persistence.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Neither `XDG_CONFIG_HOME`, `HOME` nor `APPDATA` is set.
    #[error("unable to determine config directory (set XDG_CONFIG_HOME or HOME)")]
    ConfigDirUnavailable,
    /// Filesystem I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The decrypted payload is not a stored session.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// No key in the environment and the keychain is unusable.
    #[error("system keychain unavailable for the session key\n  Suggestion: set {MASTER_KEY_ENV}")]
    KeychainUnavailable,
    /// The file does not start with the expected header.
    #[error("stored session file is not an earth2 session")]
    InvalidPayload,
    /// Sealing failed.
    #[error("failed to encrypt the session")]
    EncryptionFailed,
    /// Opening failed; usually a different key was used to write the file.
    #[error("failed to decrypt the stored session\n  Suggestion: run `e2 logout` and log in again")]
    DecryptionFailed,
}

/// A credential as read back from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    /// The persisted credential.
    pub credential: SessionCredential,
    /// Unix seconds when the credential was written.
    pub saved_at: u64,
}

impl StoredSession {
    fn now(credential: SessionCredential) -> Self {
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        Self {
            credential,
            saved_at,
        }
    }

    /// Seconds since the credential was written.
    #[must_use]
    pub fn age_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
            .saturating_sub(self.saved_at)
    }
}

/// Directory for earth2 config and session files.
///
/// # Errors
///
/// Returns [`StorageError::ConfigDirUnavailable`] when no base directory is known.
pub fn config_dir() -> Result<PathBuf, StorageError> {
    resolve_config_dir(
        non_blank_path(env::var_os("XDG_CONFIG_HOME")),
        non_blank_path(env::var_os("HOME")),
        non_blank_path(env::var_os("APPDATA")),
    )
}

/// Path of the encrypted session file.
///
/// # Errors
///
/// Returns [`StorageError::ConfigDirUnavailable`] when no base directory is known.
pub fn session_path() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join(SESSION_FILE_NAME))
}

/// Encrypts and writes `credential`, returning the file path.
///
/// # Errors
///
/// Returns [`StorageError`] when the key, encryption or write fails.
pub fn store_session(credential: &SessionCredential) -> Result<PathBuf, StorageError> {
    let path = session_path()?;
    let key = master_key()?;
    write_session(&path, &StoredSession::now(credential.clone()), &key)?;
    debug!(path = %path.display(), "session stored");
    Ok(path)
}

/// Reads and decrypts the stored session; `Ok(None)` when there is none.
///
/// # Errors
///
/// Returns [`StorageError`] when the key, decryption or parsing fails.
pub fn load_session() -> Result<Option<StoredSession>, StorageError> {
    let path = session_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let key = master_key()?;
    read_session(&path, &key).map(Some)
}

/// Deletes the session file and, without an env key, the keychain entry.
///
/// Returns `true` when a file was removed.
///
/// # Errors
///
/// Returns [`StorageError`] when the file exists but cannot be removed.
pub fn clear_session() -> Result<bool, StorageError> {
    let path = session_path()?;
    let removed = match fs::remove_file(&path) {
        Ok(()) => true,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => false,
        Err(error) => return Err(error.into()),
    };

    if env_master_key().is_none()
        && let Err(error) = keychain_entry().and_then(|entry| {
            guarded(AssertUnwindSafe(|| entry.delete_credential()))
        })
    {
        debug!(%error, "no keychain entry removed");
    }
    Ok(removed)
}

fn non_blank_path(value: Option<OsString>) -> Option<PathBuf> {
    value
        .filter(|raw| !raw.to_string_lossy().trim().is_empty())
        .map(PathBuf::from)
}

fn resolve_config_dir(
    xdg_config_home: Option<PathBuf>,
    home: Option<PathBuf>,
    app_data: Option<PathBuf>,
) -> Result<PathBuf, StorageError> {
    xdg_config_home
        .or_else(|| home.map(|home| home.join(".config")))
        .or(app_data)
        .map(|base| base.join(APP_DIR_NAME))
        .ok_or(StorageError::ConfigDirUnavailable)
}

fn env_master_key() -> Option<String> {
    env::var_os(MASTER_KEY_ENV)
        .map(|raw| raw.to_string_lossy().trim().to_string())
        .filter(|key| !key.is_empty())
}

fn master_key() -> Result<String, StorageError> {
    if let Some(key) = env_master_key() {
        return Ok(key);
    }

    let entry = keychain_entry()?;
    if let Ok(existing) = guarded(AssertUnwindSafe(|| entry.get_password()))
        && !existing.trim().is_empty()
    {
        return Ok(existing);
    }

    warn!("creating a new session key in the system keychain");
    let generated = random_key_material();
    guarded(AssertUnwindSafe(|| entry.set_password(&generated)))?;
    Ok(generated)
}

fn keychain_entry() -> Result<keyring::Entry, StorageError> {
    guarded(|| keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER))
}

// Keychain backends can panic in headless sandboxes; treat that as unavailable.
fn guarded<T, F>(call: F) -> Result<T, StorageError>
where
    F: FnOnce() -> keyring::Result<T> + std::panic::UnwindSafe,
{
    match catch_unwind(call) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) | Err(_) => Err(StorageError::KeychainUnavailable),
    }
}

fn random_key_material() -> String {
    let mut bytes = [0_u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn cipher_for(key_material: &str) -> XChaCha20Poly1305 {
    let digest = Sha256::digest(key_material.as_bytes());
    XChaCha20Poly1305::new(Key::from_slice(&digest[..KEY_LEN]))
}

fn write_session(path: &Path, session: &StoredSession, key_material: &str) -> Result<(), StorageError> {
    let sealed = seal(&serde_json::to_vec(session)?, key_material)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, sealed)?;
    restrict_to_owner(path)
}

fn read_session(path: &Path, key_material: &str) -> Result<StoredSession, StorageError> {
    let plaintext = open(&fs::read(path)?, key_material)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

fn seal(plaintext: &[u8], key_material: &str) -> Result<Vec<u8>, StorageError> {
    let mut nonce = [0_u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher_for(key_material)
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| StorageError::EncryptionFailed)?;

    let mut payload = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(MAGIC);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    Ok(payload)
}

fn open(payload: &[u8], key_material: &str) -> Result<Vec<u8>, StorageError> {
    let Some(rest) = payload.strip_prefix(MAGIC.as_slice()) else {
        return Err(StorageError::InvalidPayload);
    };
    if rest.len() < NONCE_LEN {
        return Err(StorageError::InvalidPayload);
    }
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    cipher_for(key_material)
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| StorageError::DecryptionFailed)
}
