//! Anonymous account/user ids attached to every studio API call.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, RwLock},
};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const ACCOUNT_ID_KEY: &str = "gle_account_id";
pub const USER_ID_KEY: &str = "gle_user_id";
pub const ACCOUNT_ID_HEADER: &str = "x-gle-account-id";
pub const USER_ID_HEADER: &str = "x-gle-user-id";
/// Bring-your-own-key header passed through to the backend.
pub const OPENAI_KEY_HEADER: &str = "x-openai-key";

/// Headers a caller may set on its own behalf. Everything else is dropped
/// before a request is proxied upstream.
const FORWARDED_HEADERS: [&str; 3] = [ACCOUNT_ID_HEADER, USER_ID_HEADER, OPENAI_KEY_HEADER];

const MAX_ID_LEN: usize = 48;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("identity store lock poisoned")]
    Poisoned,
    #[error("no data directory available")]
    NoDataDir,
}

/// Key/value persistence for ids.
pub trait IdentityStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, IdentityError>;
    fn set(&self, key: &str, value: &str) -> Result<(), IdentityError>;
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    values: RwLock<HashMap<String, String>>,
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, key: &str) -> Result<Option<String>, IdentityError> {
        let values = self.values.read().map_err(|_| IdentityError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        let mut values = self.values.write().map_err(|_| IdentityError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON object on disk, one entry per key.
#[derive(Debug)]
pub struct FileIdentityStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<data dir>/prompt-studio/identity.json`
    pub fn default_location() -> Result<Self, IdentityError> {
        let dir = dirs::data_dir().ok_or(IdentityError::NoDataDir)?;
        Ok(Self::new(dir.join("prompt-studio").join("identity.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl IdentityStore for FileIdentityStore {
    fn get(&self, key: &str) -> Result<Option<String>, IdentityError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        let _guard = self.write_lock.lock().map_err(|_| IdentityError::Poisoned)?;
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&values)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Random id restricted to `[A-Za-z0-9_-]`, at most 48 chars.
pub fn safe_id() -> String {
    sanitize_id(&Uuid::new_v4().to_string())
}

fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_ID_LEN)
        .collect()
}

pub fn get_or_create_id(store: &dyn IdentityStore, key: &str, prefix: &str) -> String {
    match store.get(key) {
        Ok(Some(existing)) if !existing.trim().is_empty() => return existing.trim().to_string(),
        Ok(_) => {}
        Err(e) => {
            warn!(key, error = %e, "Identity store read failed, using fallback id");
            return format!("{prefix}_fallback");
        }
    }

    let created = format!("{prefix}_{}", safe_id());
    if let Err(e) = store.set(key, &created) {
        warn!(key, error = %e, "Identity store write failed, using fallback id");
        return format!("{prefix}_fallback");
    }
    created
}

/// Caller-supplied identity and key headers, blank values skipped.
pub fn forwarded_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        let Some(value) = incoming.get(name) else {
            continue;
        };
        if value.to_str().is_ok_and(|v| !v.trim().is_empty()) {
            headers.insert(HeaderName::from_static(name), value.clone());
        }
    }
    headers
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: String,
    pub user_id: String,
}

impl Identity {
    pub fn load(store: &dyn IdentityStore) -> Self {
        Self {
            account_id: get_or_create_id(store, ACCOUNT_ID_KEY, "acc"),
            user_id: get_or_create_id(store, USER_ID_KEY, "u"),
        }
    }

    /// Identity headers; entries in `extra` win over the defaults.
    pub fn headers(&self, extra: HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            (ACCOUNT_ID_HEADER, &self.account_id),
            (USER_ID_HEADER, &self.user_id),
        ] {
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.insert(HeaderName::from_static(name), v);
                }
                Err(_) => warn!(header = name, "Skipping identity header with invalid value"),
            }
        }
        for (name, value) in extra.iter() {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}
