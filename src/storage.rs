//! Preference Storage
//!
//! Validated, fallback-safe key/value persistence over a platform storage
//! backend. Every read is total: a failing backend (private browsing, quota,
//! no backend at all) degrades to the in-memory fallback and notifies the
//! registered error handlers, never the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::ConnectorError;
use crate::session::{is_connector_id, ConnectorId};
use crate::types::{is_base58_address, Cluster};

/// Failure reported by a storage backend operation
#[derive(Debug, Clone, thiserror::Error)]
#[error("storage backend: {0}")]
pub struct BackendError(pub String);

/// Synchronous platform storage, `localStorage`-shaped
///
/// Any method may fail (quota exceeded, storage disabled); adapters recover
/// from every failure locally.
pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError>;
    fn remove_item(&self, key: &str) -> Result<(), BackendError>;
}

/// In-memory backend for tests and storage-less environments
#[derive(Default)]
pub struct MemoryBackend {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.remove(key);
        Ok(())
    }
}

type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&ConnectorError) + Send + Sync>;

/// One validated, versioned persisted value
///
/// Values are stored as JSON under a single key. Validators gate both reads
/// and writes; the in-memory value doubles as the fallback whenever the
/// backend misbehaves. Clones share the in-memory value.
#[derive(Clone)]
pub struct StorageAdapter<T> {
    key: String,
    backend: Option<Arc<dyn StorageBackend>>,
    value: Arc<Mutex<T>>,
    initial: T,
    validators: Vec<Validator<T>>,
    handlers: Vec<ErrorHandler>,
}

impl<T> StorageAdapter<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(key: &str, backend: Option<Arc<dyn StorageBackend>>, initial: T) -> Self {
        Self {
            key: key.to_string(),
            backend,
            value: Arc::new(Mutex::new(initial.clone())),
            initial,
            validators: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// An adapter with no backend at all; everything lives in memory
    pub fn detached(key: &str, initial: T) -> Self {
        Self::new(key, None, initial)
    }

    /// Append a validator; a value is accepted only if all validators pass
    pub fn add_validator(mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Append an error handler, invoked on every recovered backend failure
    pub fn on_error(mut self, handler: impl Fn(&ConnectorError) + Send + Sync + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the current value; total
    ///
    /// A successful, validated backend read refreshes the in-memory value;
    /// anything else (missing backend, read failure, parse failure, rejected
    /// value) returns the last known-good value.
    pub fn get(&self) -> T {
        let backend = match self.backend.as_ref() {
            Some(backend) => backend,
            None => return self.memory(),
        };
        match backend.get_item(&self.key) {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) if self.validate(&value) => {
                    self.remember(value.clone());
                    value
                }
                Ok(_) => {
                    self.notify(&ConnectorError::Validation(format!(
                        "stored value for {} rejected by validator",
                        self.key
                    )));
                    self.memory()
                }
                Err(err) => {
                    self.notify(&ConnectorError::Validation(err.to_string()));
                    self.memory()
                }
            },
            Ok(None) => self.memory(),
            Err(err) => {
                self.notify(&ConnectorError::Storage(err.to_string()));
                self.memory()
            }
        }
    }

    /// Write a value; returns whether it was accepted
    ///
    /// Rejected values mutate nothing. Accepted values always land in the
    /// memory fallback; a backend write failure is recovered and reported
    /// through the handlers.
    pub fn set(&self, value: T) -> bool {
        if !self.validate(&value) {
            debug!(key = %self.key, "value rejected by validator");
            return false;
        }
        self.remember(value.clone());
        let backend = match self.backend.as_ref() {
            Some(backend) => backend,
            None => return true,
        };
        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(err) = backend.set_item(&self.key, &raw) {
                    self.notify(&ConnectorError::Storage(err.to_string()));
                }
            }
            Err(err) => self.notify(&ConnectorError::Storage(err.to_string())),
        }
        true
    }

    /// Remove the backend key and reset to the initial value
    pub fn clear(&self) {
        if let Some(backend) = self.backend.as_ref() {
            if let Err(err) = backend.remove_item(&self.key) {
                self.notify(&ConnectorError::Storage(err.to_string()));
            }
        }
        self.remember(self.initial.clone());
    }

    /// Probe the backend with a throwaway write+delete
    pub fn is_available(&self) -> bool {
        let backend = match self.backend.as_ref() {
            Some(backend) => backend,
            None => return false,
        };
        let probe = format!("{}:probe", self.key);
        backend
            .set_item(&probe, "1")
            .and_then(|_| backend.remove_item(&probe))
            .is_ok()
    }

    /// One-shot migration from a legacy key
    ///
    /// Reads `old_key`, forwards the parsed value through [`Self::set`] and
    /// deletes the legacy key on success. Returns whether a migration
    /// occurred; never panics.
    pub fn migrate_from(&self, old_key: &str) -> bool {
        let backend = match self.backend.as_ref() {
            Some(backend) => backend.clone(),
            None => return false,
        };
        let raw = match backend.get_item(old_key) {
            Ok(Some(raw)) => raw,
            Ok(None) | Err(_) => return false,
        };
        let value: T = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(_) => return false,
        };
        if !self.set(value) {
            return false;
        }
        let _ = backend.remove_item(old_key);
        debug!(from = old_key, to = %self.key, "migrated stored preference");
        true
    }

    fn validate(&self, value: &T) -> bool {
        self.validators.iter().all(|validator| validator(value))
    }

    fn remember(&self, value: T) {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    fn memory(&self) -> T {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn notify(&self, err: &ConnectorError) {
        debug!(key = %self.key, error = %err, "storage fallback engaged");
        for handler in &self.handlers {
            handler(err);
        }
    }
}

/// Hook receiving `(key, error)` for every recovered storage failure
pub type StorageErrorHook = Arc<dyn Fn(&'static str, &ConnectorError) + Send + Sync>;

/// Persisted key for the last selected wallet
pub const WALLET_KEY: &str = "solana-connector:selected-wallet:v1";
/// Persisted key for the last selected cluster
pub const CLUSTER_KEY: &str = "solana-connector:selected-cluster:v1";
/// Persisted key for the last selected account
pub const ACCOUNT_KEY: &str = "solana-connector:selected-account:v1";

const LEGACY_WALLET_KEY: &str = "solana-connector:selected-wallet";
const LEGACY_CLUSTER_KEY: &str = "solana-connector:selected-cluster";
const LEGACY_ACCOUNT_KEY: &str = "solana-connector:selected-account";

/// The three independently validated persisted preferences
///
/// Corruption or failure of one key never affects recovery of the others.
#[derive(Clone)]
pub struct PreferenceStore {
    wallet: StorageAdapter<Option<ConnectorId>>,
    cluster: StorageAdapter<Cluster>,
    account: StorageAdapter<Option<String>>,
}

impl PreferenceStore {
    pub fn new(backend: Option<Arc<dyn StorageBackend>>) -> Self {
        Self::with_error_hook(backend, Arc::new(|_, _| {}))
    }

    /// Build the store, routing recovered storage failures into `hook`
    pub fn with_error_hook(
        backend: Option<Arc<dyn StorageBackend>>,
        hook: StorageErrorHook,
    ) -> Self {
        let wallet_hook = hook.clone();
        let wallet = StorageAdapter::new(WALLET_KEY, backend.clone(), None)
            .add_validator(|value: &Option<ConnectorId>| {
                value
                    .as_ref()
                    .map(|id| is_connector_id(id.as_str()))
                    .unwrap_or(true)
            })
            .on_error(move |err| wallet_hook(WALLET_KEY, err));

        let cluster_hook = hook.clone();
        let cluster = StorageAdapter::new(CLUSTER_KEY, backend.clone(), Cluster::default())
            .on_error(move |err| cluster_hook(CLUSTER_KEY, err));

        let account_hook = hook;
        let account = StorageAdapter::new(ACCOUNT_KEY, backend, None)
            .add_validator(|value: &Option<String>| {
                value
                    .as_ref()
                    .map(|address| is_base58_address(address))
                    .unwrap_or(true)
            })
            .on_error(move |err| account_hook(ACCOUNT_KEY, err));

        let store = Self {
            wallet,
            cluster,
            account,
        };
        store.wallet.migrate_from(LEGACY_WALLET_KEY);
        store.cluster.migrate_from(LEGACY_CLUSTER_KEY);
        store.account.migrate_from(LEGACY_ACCOUNT_KEY);
        store
    }

    pub fn wallet(&self) -> &StorageAdapter<Option<ConnectorId>> {
        &self.wallet
    }

    pub fn cluster(&self) -> &StorageAdapter<Cluster> {
        &self.cluster
    }

    pub fn account(&self) -> &StorageAdapter<Option<String>> {
        &self.account
    }

    pub fn is_available(&self) -> bool {
        self.wallet.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that fails every call, like storage in private browsing.
    struct FailingBackend;

    impl StorageBackend for FailingBackend {
        fn get_item(&self, _key: &str) -> Result<Option<String>, BackendError> {
            Err(BackendError("disabled".to_string()))
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), BackendError> {
            Err(BackendError("disabled".to_string()))
        }

        fn remove_item(&self, _key: &str) -> Result<(), BackendError> {
            Err(BackendError("disabled".to_string()))
        }
    }

    #[test]
    fn test_roundtrip_through_backend() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let adapter = StorageAdapter::new("test:value", Some(backend.clone()), 0u32);
        assert!(adapter.set(7));
        assert_eq!(adapter.get(), 7);

        // A second adapter over the same backend sees the persisted value.
        let reloaded = StorageAdapter::new("test:value", Some(backend), 0u32);
        assert_eq!(reloaded.get(), 7);
    }

    #[test]
    fn test_failing_backend_never_panics() {
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        let adapter = StorageAdapter::new(
            "test:value",
            Some(Arc::new(FailingBackend)),
            "fallback".to_string(),
        )
        .on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(adapter.get(), "fallback");
        assert!(adapter.set("written".to_string()));
        // The write landed in the memory fallback despite the backend.
        assert_eq!(adapter.get(), "written");
        adapter.clear();
        assert_eq!(adapter.get(), "fallback");
        assert!(!adapter.is_available());
        assert!(errors.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_validator_gate() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let adapter = StorageAdapter::new("test:value", Some(backend), 1u32)
            .add_validator(|v| *v > 0)
            .add_validator(|v| *v < 100);

        assert!(!adapter.set(0));
        assert!(!adapter.set(100));
        assert_eq!(adapter.get(), 1);
        assert!(adapter.set(42));
        assert_eq!(adapter.get(), 42);
    }

    #[test]
    fn test_corrupt_stored_value_falls_back() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set_item("test:value", "not json")
            .expect("memory write");
        let adapter =
            StorageAdapter::new("test:value", Some(backend as Arc<dyn StorageBackend>), 5u32);
        assert_eq!(adapter.get(), 5);
    }

    #[test]
    fn test_rejected_stored_value_falls_back() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_item("test:value", "-3").expect("memory write");
        let adapter =
            StorageAdapter::new("test:value", Some(backend as Arc<dyn StorageBackend>), 5i32)
                .add_validator(|v| *v >= 0);
        assert_eq!(adapter.get(), 5);
    }

    #[test]
    fn test_migration() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_item("old:key", "9").expect("memory write");
        let adapter =
            StorageAdapter::new("new:key", Some(backend.clone() as Arc<dyn StorageBackend>), 0u32);

        assert!(adapter.migrate_from("old:key"));
        assert_eq!(adapter.get(), 9);
        assert_eq!(backend.get_item("old:key").expect("read"), None);

        // Second migration finds nothing.
        assert!(!adapter.migrate_from("old:key"));
    }

    #[test]
    fn test_preference_keys_are_isolated() {
        let backend = Arc::new(MemoryBackend::new());
        // Corrupt the wallet slot only.
        backend
            .set_item(WALLET_KEY, "\"not a connector id\"")
            .expect("memory write");
        let store = PreferenceStore::new(Some(backend as Arc<dyn StorageBackend>));

        store.cluster().set(Cluster::Devnet);
        assert_eq!(store.wallet().get(), None);
        assert_eq!(store.cluster().get(), Cluster::Devnet);
    }

    #[test]
    fn test_account_preference_requires_base58() {
        let store = PreferenceStore::new(None);
        assert!(!store.account().set(Some("not-an-address".to_string())));
        assert!(store
            .account()
            .set(Some("11111111111111111111111111111111".to_string())));
    }
}
