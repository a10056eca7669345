//! Credential storage
//!
//! `CredentialStore` is the key/value capability the analysis client reads its
//! bearer token from. The default store keeps every cobra credential in a
//! single OS keychain entry (serialized as JSON) so the user sees at most one
//! keychain prompt, with environment variables taking precedence.

use keyring::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use tracing::warn;

/// Key under which the chat-completion API key is stored.
pub const API_KEY: &str = "openai_api_key";

const KEYRING_SERVICE: &str = "cobra-credentials";
const KEYRING_USERNAME: &str = "default";

/// Key/value credential capability.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
}

type StoredCredentials = BTreeMap<String, String>;
type KeyringResult<T> = Result<T, String>;

static CREDENTIALS_CACHE: OnceLock<Mutex<Option<StoredCredentials>>> = OnceLock::new();
static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn credentials_cache() -> &'static Mutex<Option<StoredCredentials>> {
    CREDENTIALS_CACHE.get_or_init(|| Mutex::new(None))
}

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("COBRA_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

/// Warn about keychain errors only once per session
fn warn_keychain_error_once(err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    warn!(
        error = %err,
        "couldn't access system keychain; set OPENAI_API_KEY to bypass it"
    );
}

fn read_credentials_uncached() -> KeyringResult<StoredCredentials> {
    if keyring_disabled() {
        return Ok(StoredCredentials::default());
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(json) => {
            serde_json::from_str(&json).map_err(|e| format!("Failed to parse credentials: {}", e))
        }
        Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
        Err(err) => Err(err.to_string()),
    }
}

fn write_credentials(creds: &StoredCredentials) -> Result<(), String> {
    if keyring_disabled() {
        return Err("System keychain is disabled (COBRA_DISABLE_KEYRING)".to_string());
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    let json = serde_json::to_string(creds).map_err(|e| e.to_string())?;
    entry.set_password(&json).map_err(|e| e.to_string())
}

fn read_credentials_cached() -> KeyringResult<StoredCredentials> {
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(ref creds) = *guard {
        return Ok(creds.clone());
    }
    let creds = read_credentials_uncached()?;
    *guard = Some(creds.clone());
    Ok(creds)
}

fn update_cache(creds: StoredCredentials) {
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(creds);
}

/// The OS keychain.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringStore;

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Option<String> {
        match read_credentials_cached() {
            Ok(creds) => creds.get(key).cloned(),
            Err(err) => {
                warn_keychain_error_once(&err);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut creds = read_credentials_cached().unwrap_or_default();
        creds.insert(key.to_string(), value.to_string());
        write_credentials(&creds)?;
        update_cache(creds);
        Ok(())
    }
}

/// Process-local store that never touches the keychain.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<StoredCredentials>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(key: &str, value: &str) -> Self {
        let store = Self::new();
        let _ = store.set(key, value);
        store
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Checks `COBRA_<KEY>` and then `<KEY>` in the environment before falling
/// back to the wrapped store. Writes always go to the wrapped store.
#[derive(Debug, Default)]
pub struct EnvOverride<S> {
    inner: S,
}

impl<S: CredentialStore> EnvOverride<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn env_candidates(key: &str) -> [String; 2] {
    let upper = key.to_uppercase();
    [format!("COBRA_{}", upper), upper]
}

impl<S: CredentialStore> CredentialStore for EnvOverride<S> {
    fn get(&self, key: &str) -> Option<String> {
        env_candidates(key)
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .or_else(|| self.inner.get(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.inner.set(key, value)
    }
}
