//! Two-scope persistence for login material
//!
//! The session scope (ephemeral key, randomness) is meant to die with the
//! login session; the durable scope (salt, max-epoch) survives restarts.
//! Salt and address are inseparable, so there is no partial clear: reset
//! wipes both scopes.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, WalletError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Session,
    Durable,
}

/// The four persisted entries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entry {
    EphemeralKey,
    Randomness,
    UserSalt,
    MaxEpoch,
}

impl Entry {
    pub const ALL: [Entry; 4] = [
        Entry::EphemeralKey,
        Entry::Randomness,
        Entry::UserSalt,
        Entry::MaxEpoch,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Entry::EphemeralKey => "ephemeral_key_pair",
            Entry::Randomness => "randomness",
            Entry::UserSalt => "user_salt",
            Entry::MaxEpoch => "max_epoch",
        }
    }

    pub fn scope(self) -> Scope {
        match self {
            Entry::EphemeralKey | Entry::Randomness => Scope::Session,
            Entry::UserSalt | Entry::MaxEpoch => Scope::Durable,
        }
    }
}

/// Key/value storage for one scope
pub trait ScopeStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryScope {
    entries: BTreeMap<String, String>,
}

impl ScopeStore for MemoryScope {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// One JSON object per scope, rewritten on every change
#[derive(Debug, Clone)]
pub struct FileScope {
    path: PathBuf,
}

impl FileScope {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!("{} is unreadable, treating as empty: {}", self.path.display(), e);
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ScopeStore for FileScope {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct SessionStore {
    session: Box<dyn ScopeStore>,
    durable: Box<dyn ScopeStore>,
}

impl SessionStore {
    pub fn new(session: Box<dyn ScopeStore>, durable: Box<dyn ScopeStore>) -> Self {
        Self { session, durable }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::<MemoryScope>::default(), Box::<MemoryScope>::default())
    }

    /// `session_dir/session.json` and `state_dir/durable.json`
    pub fn on_disk(session_dir: &Path, state_dir: &Path) -> Self {
        Self::new(
            Box::new(FileScope::new(session_dir.join("session.json"))),
            Box::new(FileScope::new(state_dir.join("durable.json"))),
        )
    }

    fn scope(&self, scope: Scope) -> &dyn ScopeStore {
        match scope {
            Scope::Session => self.session.as_ref(),
            Scope::Durable => self.durable.as_ref(),
        }
    }

    fn scope_mut(&mut self, scope: Scope) -> &mut dyn ScopeStore {
        match scope {
            Scope::Session => self.session.as_mut(),
            Scope::Durable => self.durable.as_mut(),
        }
    }

    pub fn save(&mut self, scope: Scope, key: &str, value: &str) -> Result<()> {
        self.scope_mut(scope).set(key, value)
    }

    pub fn load(&self, scope: Scope, key: &str) -> Result<Option<String>> {
        self.scope(scope).get(key)
    }

    pub fn save_entry(&mut self, entry: Entry, value: &str) -> Result<()> {
        tracing::debug!("persisting {} ({:?} scope)", entry.key(), entry.scope());
        self.save(entry.scope(), entry.key(), value)
    }

    /// Read and parse an entry. Unreadable or unparseable values are absent.
    pub fn load_entry<T: FromStr>(&self, entry: Entry) -> Option<T> {
        let raw = match self.load(entry.scope(), entry.key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("could not read {}: {}", entry.key(), e);
                return None;
            }
        };
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring unparseable {} entry", entry.key());
                None
            }
        }
    }

    pub fn contains(&self, entry: Entry) -> bool {
        matches!(self.load(entry.scope(), entry.key()), Ok(Some(_)))
    }

    /// Wipe both scopes. Both are attempted even if the first fails.
    pub fn clear_all(&mut self) -> Result<()> {
        let session = self.session.clear();
        let durable = self.durable.clear();
        session.and(durable).map_err(|e| WalletError::Storage(format!("reset failed: {}", e)))
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}
