//! Wallet Provider Discovery
//!
//! The capability boundary between the connector and concrete wallets, plus
//! the registry that tracks which providers are currently injected. The
//! registry is an owned instance handed to the client by reference, never an
//! ambient global, so tests can substitute fakes.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConnectorError;
use crate::events::Subscription;
use crate::session::{ConnectorId, SessionAccount};
use crate::types::{WalletDescriptor, WalletFeature};

/// Callback invoked when the wallet reports a changed account list
pub type AccountChangeListener = Box<dyn Fn(Vec<SessionAccount>) + Send + Sync>;

/// Capability interface implemented by every wallet provider
///
/// Discovered at runtime but type-checked at this boundary: the feature set
/// a provider advertises is matched against the operation before the call is
/// delegated. Sign operations default to an unsupported-feature error so
/// minimal providers only implement what they advertise.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Unique display name
    fn name(&self) -> &str;

    /// Opaque icon URI
    fn icon(&self) -> Option<String> {
        None
    }

    /// Supported chain identifiers
    fn chains(&self) -> Vec<String> {
        Vec::new()
    }

    /// Advertised capability set
    fn features(&self) -> Vec<WalletFeature>;

    /// Request a session; resolves to the offered accounts
    async fn connect(&self) -> Result<Vec<SessionAccount>, ConnectorError>;

    /// Tear down the provider side of the session
    async fn disconnect(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn sign_message(
        &self,
        address: &str,
        message: &[u8],
    ) -> Result<Vec<u8>, ConnectorError> {
        let _ = (address, message);
        Err(self.unsupported(WalletFeature::SignMessage))
    }

    async fn sign_transaction(
        &self,
        address: &str,
        transaction: &[u8],
    ) -> Result<Vec<u8>, ConnectorError> {
        let _ = (address, transaction);
        Err(self.unsupported(WalletFeature::SignTransaction))
    }

    /// Sign and submit in one call; resolves to the transaction signature
    async fn sign_and_send(
        &self,
        address: &str,
        transaction: &[u8],
    ) -> Result<String, ConnectorError> {
        let _ = (address, transaction);
        Err(self.unsupported(WalletFeature::SignAndSend))
    }

    /// Register for account-change notifications
    fn subscribe_account_changes(&self, listener: AccountChangeListener) -> Subscription {
        let _ = listener;
        Subscription::noop()
    }

    /// The error reported for a capability the provider does not advertise
    fn unsupported(&self, feature: WalletFeature) -> ConnectorError {
        ConnectorError::UnsupportedFeature {
            wallet: self.name().to_string(),
            feature: feature.to_string(),
        }
    }
}

/// A wallet the application knows about but which is not currently injected
///
/// Surfaces as an `installed: false` descriptor for upsell UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownWallet {
    pub name: String,
    pub icon: Option<String>,
    pub chains: Vec<String>,
}

impl KnownWallet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            icon: None,
            chains: Vec::new(),
        }
    }
}

type ChangeListener = Arc<dyn Fn(&[WalletDescriptor]) + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    providers: Vec<Arc<dyn WalletProvider>>,
    known: Vec<KnownWallet>,
    listeners: Vec<(u64, ChangeListener)>,
    next_listener_id: u64,
}

/// Registry of injected wallet providers
///
/// Cheap to clone; clones share state. An empty registry (no discovery
/// mechanism in the environment) simply discovers an empty list.
#[derive(Clone, Default)]
pub struct WalletRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry with known-but-not-installed placeholder wallets
    pub fn with_known_wallets(known: Vec<KnownWallet>) -> Self {
        let registry = Self::new();
        lock(&registry.inner).known = known;
        registry
    }

    /// Add or replace a provider; re-registering under the same name swaps
    /// the handle
    pub fn register(&self, provider: Arc<dyn WalletProvider>) {
        let snapshot = {
            let mut inner = lock(&self.inner);
            let name = provider.name().to_string();
            inner
                .providers
                .retain(|p| !p.name().eq_ignore_ascii_case(&name));
            inner.providers.push(provider);
            build_snapshot(&inner)
        };
        debug!(wallets = snapshot.len(), "wallet registered");
        self.notify(&snapshot);
    }

    /// Remove a provider by name; returns whether anything was removed
    pub fn unregister(&self, name: &str) -> bool {
        let (removed, snapshot) = {
            let mut inner = lock(&self.inner);
            let before = inner.providers.len();
            inner
                .providers
                .retain(|p| !p.name().eq_ignore_ascii_case(name));
            (inner.providers.len() != before, build_snapshot(&inner))
        };
        if removed {
            debug!(wallet = name, "wallet unregistered");
            self.notify(&snapshot);
        }
        removed
    }

    /// Re-derive the current descriptor snapshot
    pub fn discover(&self) -> Vec<WalletDescriptor> {
        build_snapshot(&lock(&self.inner))
    }

    /// Look up an installed provider by display name (case-insensitive)
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn WalletProvider>> {
        lock(&self.inner)
            .providers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Look up an installed provider by its normalized connector id
    pub fn resolve_id(&self, id: &ConnectorId) -> Option<Arc<dyn WalletProvider>> {
        lock(&self.inner)
            .providers
            .iter()
            .find(|p| &ConnectorId::from_wallet_name(p.name()) == id)
            .cloned()
    }

    /// Subscribe to snapshot changes; the listener receives the fresh
    /// descriptor set after every register/unregister
    pub fn on_change(
        &self,
        listener: impl Fn(&[WalletDescriptor]) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_listener_id;
            inner.next_listener_id += 1;
            inner.listeners.push((id, Arc::new(listener)));
            id
        };
        let weak: Weak<Mutex<RegistryInner>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).listeners.retain(|(lid, _)| *lid != id);
            }
        })
    }

    fn notify(&self, snapshot: &[WalletDescriptor]) {
        let listeners: Vec<ChangeListener> = lock(&self.inner)
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }
}

fn lock(inner: &Arc<Mutex<RegistryInner>>) -> std::sync::MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

fn build_snapshot(inner: &RegistryInner) -> Vec<WalletDescriptor> {
    let mut wallets: Vec<WalletDescriptor> = inner
        .providers
        .iter()
        .map(|provider| WalletDescriptor {
            name: provider.name().to_string(),
            icon: provider.icon(),
            chains: provider.chains(),
            features: provider.features(),
            installed: true,
        })
        .collect();
    for known in &inner.known {
        let shadowed = inner
            .providers
            .iter()
            .any(|p| p.name().eq_ignore_ascii_case(&known.name));
        if !shadowed {
            wallets.push(WalletDescriptor {
                name: known.name.clone(),
                icon: known.icon.clone(),
                chains: known.chains.clone(),
                features: Vec::new(),
                installed: false,
            });
        }
    }
    wallets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeWallet {
        name: &'static str,
    }

    #[async_trait]
    impl WalletProvider for FakeWallet {
        fn name(&self) -> &str {
            self.name
        }

        fn chains(&self) -> Vec<String> {
            vec!["solana:mainnet".to_string()]
        }

        fn features(&self) -> Vec<WalletFeature> {
            vec![WalletFeature::Connect, WalletFeature::Disconnect]
        }

        async fn connect(&self) -> Result<Vec<SessionAccount>, ConnectorError> {
            Ok(vec![SessionAccount::new("Addr1")])
        }
    }

    #[test]
    fn test_empty_registry_discovers_nothing() {
        assert!(WalletRegistry::new().discover().is_empty());
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = WalletRegistry::new();
        registry.register(Arc::new(FakeWallet { name: "Phantom" }));

        let wallets = registry.discover();
        assert_eq!(wallets.len(), 1);
        assert!(wallets[0].installed);
        assert!(wallets[0].supports(WalletFeature::Connect));

        assert!(registry.resolve("phantom").is_some());
        assert!(registry.resolve("Solflare").is_none());
        let id = ConnectorId::from_wallet_name("Phantom");
        assert!(registry.resolve_id(&id).is_some());
    }

    #[test]
    fn test_reregister_replaces_by_name() {
        let registry = WalletRegistry::new();
        registry.register(Arc::new(FakeWallet { name: "Phantom" }));
        registry.register(Arc::new(FakeWallet { name: "phantom" }));
        assert_eq!(registry.discover().len(), 1);
    }

    #[test]
    fn test_known_wallet_placeholder() {
        let registry =
            WalletRegistry::with_known_wallets(vec![KnownWallet::new("Solflare")]);
        let wallets = registry.discover();
        assert_eq!(wallets.len(), 1);
        assert!(!wallets[0].installed);

        // Installing the real provider shadows the placeholder.
        registry.register(Arc::new(FakeWallet { name: "Solflare" }));
        let wallets = registry.discover();
        assert_eq!(wallets.len(), 1);
        assert!(wallets[0].installed);
    }

    #[test]
    fn test_change_notifications() {
        let registry = WalletRegistry::new();
        let notifications = Arc::new(AtomicUsize::new(0));

        let counter = notifications.clone();
        let sub = registry.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.register(Arc::new(FakeWallet { name: "Phantom" }));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);

        // Unregistering something absent notifies nobody.
        assert!(!registry.unregister("Solflare"));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);

        assert!(registry.unregister("Phantom"));
        assert_eq!(notifications.load(Ordering::SeqCst), 2);

        drop(sub);
        registry.register(Arc::new(FakeWallet { name: "Phantom" }));
        assert_eq!(notifications.load(Ordering::SeqCst), 2);
    }
}
