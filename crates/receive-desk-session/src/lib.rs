#![warn(missing_docs)]
//! # receive-desk-session
//!
//! ## Purpose
//! Owns the durable session record: who is signed in, what they may do, and
//! which tenant/database they signed in to.
//!
//! ## Responsibilities
//! - Persist identity and permissions together, never one without the other.
//! - Persist the login context independently of identity.
//! - Serve infallible [`SessionState`] snapshots to any reader.
//! - Clear every session entry on logout.
//!
//! ## Data flow
//! Auth flow -> [`SessionStore::put`] / [`SessionStore::put_login_context`] ->
//! [`SessionStorage::commit`] -> durable medium. Readers call
//! [`SessionStore::get`] and never touch the medium format.
//!
//! ## Ownership and lifetimes
//! The store holds an `Arc<dyn SessionStorage>` and is itself shared as
//! `Arc<SessionStore>` by the auth flow, navigator, and API client. Only the
//! auth flow and logout mutate it.
//!
//! ## Error model
//! Reads never fail: a missing or undecodable entry reads as absent.
//! Mutations return [`StorageError`] when the medium rejects a commit, which
//! callers treat as fatal.
//!
//! ## Security and privacy notes
//! Passwords are never handed to this crate. Stored identity columns are kept
//! verbatim and are not logged.
//!
//! ## Example
//! ```rust
//! use receive_desk_core::{PermissionSet, UserIdentity};
//! use receive_desk_session::SessionStore;
//!
//! let store = SessionStore::in_memory();
//! store
//!     .put(&UserIdentity::new("U1"), &PermissionSet::from_iter([("receive_screen", "1")]))
//!     .unwrap();
//! assert!(store.is_authenticated());
//! store.clear().unwrap();
//! assert!(!store.is_authenticated());
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use receive_desk_core::{LoginContext, PermissionSet, SessionState, UserIdentity};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

/// Storage key of the serialized [`UserIdentity`].
pub const USER_KEY: &str = "user";
/// Storage key of the serialized [`PermissionSet`].
pub const PERMISSIONS_KEY: &str = "userPermissions";
/// Storage key of the tenant selector.
pub const PROVIDER_KEY: &str = "provider_name";
/// Storage key of the database selector.
pub const DATABASE_KEY: &str = "database_name";

const ALL_KEYS: [&str; 4] = [USER_KEY, PERMISSIONS_KEY, PROVIDER_KEY, DATABASE_KEY];

/// One write applied as part of a storage commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Sets `key` to `value`.
    Set {
        /// Entry key.
        key: String,
        /// Entry value.
        value: String,
    },
    /// Removes `key` if present.
    Remove {
        /// Entry key.
        key: String,
    },
}

impl StorageOp {
    fn set(key: &str, value: String) -> Self {
        Self::Set {
            key: key.to_string(),
            value,
        }
    }

    fn remove(key: &str) -> Self {
        Self::Remove {
            key: key.to_string(),
        }
    }
}

/// Durable string key/value medium backing the session store.
///
/// `commit` applies every op or none and is durable when it returns.
pub trait SessionStorage: Send + Sync {
    /// Reads one entry.
    fn get(&self, key: &str) -> Option<String>;

    /// Applies a batch of writes atomically.
    fn commit(&self, ops: &[StorageOp]) -> Result<(), StorageError>;
}

fn apply_ops(entries: &mut BTreeMap<String, String>, ops: &[StorageOp]) {
    for op in ops {
        match op {
            StorageOp::Set { key, value } => {
                entries.insert(key.clone(), value.clone());
            }
            StorageOp::Remove { key } => {
                entries.remove(key);
            }
        }
    }
}

/// Process-local storage; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn commit(&self, ops: &[StorageOp]) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        apply_ops(&mut entries, ops);
        Ok(())
    }
}

/// JSON-file storage that survives process restarts.
///
/// The file is read once at open. Each commit writes a sibling temp file and
/// renames it over the original, so a crash leaves either the old or the new
/// contents on disk.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Opens storage at `path`, starting empty when the file does not exist.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] when the file cannot be read and
    /// [`StorageError::Corrupt`] when it is not a JSON string map.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        debug!(path = %path.display(), entries = entries.len(), "opened session file");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling path the next commit is staged in; always distinct from
    /// `path` whatever its extension.
    fn next_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".next");
        PathBuf::from(name)
    }

    fn write_file(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec_pretty(entries).map_err(StorageError::Encode)?;
        let temp_path = self.next_path();
        let io_error = |source| StorageError::Io {
            path: temp_path.clone(),
            source,
        };

        let mut file = fs::File::create(&temp_path).map_err(io_error)?;
        file.write_all(&encoded).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn commit(&self, ops: &[StorageOp]) -> Result<(), StorageError> {
        // Held across the file write so commits land on disk in order.
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = entries.clone();
        apply_ops(&mut next, ops);
        self.write_file(&next)?;
        *entries = next;
        Ok(())
    }
}

/// Single-writer session record over a [`SessionStorage`] medium.
///
/// Not `Clone`: share one store as `Arc<SessionStore>`.
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
}

impl SessionStore {
    /// Creates a store over `storage`.
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self { storage }
    }

    /// Creates a store over fresh [`MemoryStorage`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Opens a store persisted at `path`.
    ///
    /// # Errors
    /// Propagates [`FileStorage::open`] failures.
    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(FileStorage::open(path)?)))
    }

    /// Writes identity and permissions in one commit, replacing any prior
    /// session.
    ///
    /// # Errors
    /// Returns [`StorageError`] when encoding or the commit fails; nothing is
    /// written in that case.
    pub fn put(
        &self,
        identity: &UserIdentity,
        permissions: &PermissionSet,
    ) -> Result<(), StorageError> {
        let user = serde_json::to_string(identity).map_err(StorageError::Encode)?;
        let permissions = serde_json::to_string(permissions).map_err(StorageError::Encode)?;

        self.storage.commit(&[
            StorageOp::set(USER_KEY, user),
            StorageOp::set(PERMISSIONS_KEY, permissions),
        ])?;
        debug!("session identity committed");
        Ok(())
    }

    /// Writes the tenant/database selectors in one commit.
    ///
    /// # Errors
    /// Returns [`StorageError`] when the commit fails.
    pub fn put_login_context(&self, login_context: &LoginContext) -> Result<(), StorageError> {
        self.storage.commit(&[
            StorageOp::set(PROVIDER_KEY, login_context.tenant_selector.clone()),
            StorageOp::set(DATABASE_KEY, login_context.database_selector.clone()),
        ])?;
        debug!(
            tenant = %login_context.tenant_selector,
            database = %login_context.database_selector,
            "login context committed"
        );
        Ok(())
    }

    /// Returns the current session snapshot.
    ///
    /// A session whose identity or permission entry is missing or undecodable
    /// reads as anonymous, keeping the both-or-neither invariant for readers.
    pub fn get(&self) -> SessionState {
        let identity = self.decode::<UserIdentity>(USER_KEY);
        let permissions = self.decode::<PermissionSet>(PERMISSIONS_KEY);
        let (identity, permissions) = match (identity, permissions) {
            (Some(identity), Some(permissions)) => (Some(identity), Some(permissions)),
            _ => (None, None),
        };

        SessionState {
            identity,
            permissions,
            login_context: self.login_context(),
        }
    }

    /// Returns the stored login context when both selectors are present.
    pub fn login_context(&self) -> Option<LoginContext> {
        Some(LoginContext::new(
            self.storage.get(PROVIDER_KEY)?,
            self.storage.get(DATABASE_KEY)?,
        ))
    }

    /// Returns `true` iff an identity is stored.
    pub fn is_authenticated(&self) -> bool {
        self.get().is_authenticated()
    }

    /// Returns `true` when the stored permission record grants `key`.
    pub fn has_permission(&self, key: &str) -> bool {
        self.get().has_permission(key)
    }

    /// Returns `true` when the stored identity is the SUPERADMIN sentinel.
    pub fn is_super_admin(&self) -> bool {
        self.get().is_super_admin()
    }

    /// Removes identity, permissions, and login context in one commit.
    ///
    /// # Errors
    /// Returns [`StorageError`] when the commit fails.
    pub fn clear(&self) -> Result<(), StorageError> {
        let ops: Vec<StorageOp> = ALL_KEYS.into_iter().map(StorageOp::remove).collect();
        self.storage.commit(&ops)?;
        debug!("session cleared");
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.storage.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(key, %error, "ignoring undecodable session entry");
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// Errors produced by the durable session medium.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("session storage i/o failure at {path}: {source}")]
    Io {
        /// File involved in the failure.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The backing file is not a JSON string map.
    #[error("session storage at {path} is corrupt: {source}")]
    Corrupt {
        /// File that failed to decode.
        path: PathBuf,
        /// Decode error.
        source: serde_json::Error,
    },
    /// A session value could not be encoded.
    #[error("session value encoding failure: {0}")]
    Encode(serde_json::Error),
}

#[cfg(test)]
mod tests {
    //! Unit tests for commit batching and half-written sessions.

    use super::*;

    #[test]
    fn half_written_session_reads_as_anonymous() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .commit(&[StorageOp::set(USER_KEY, r#"{"user_code":"U1"}"#.to_string())])
            .expect("commit should succeed");

        let store = SessionStore::new(storage);
        let state = store.get();
        assert!(state.identity.is_none());
        assert!(state.permissions.is_none());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn undecodable_permissions_read_as_anonymous() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .commit(&[
                StorageOp::set(USER_KEY, r#"{"user_code":"U1"}"#.to_string()),
                StorageOp::set(PERMISSIONS_KEY, "not json".to_string()),
            ])
            .expect("commit should succeed");

        assert!(!SessionStore::new(storage).is_authenticated());
    }

    #[test]
    fn login_context_needs_both_selectors() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .commit(&[StorageOp::set(PROVIDER_KEY, "T1".to_string())])
            .expect("commit should succeed");

        assert_eq!(SessionStore::new(storage).login_context(), None);
    }
}
