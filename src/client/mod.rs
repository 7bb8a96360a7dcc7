//! Connector Client
//!
//! The central orchestrator over the wallet connection state machine. The
//! client owns the current `WalletStatus`, executes connect / disconnect /
//! select-account operations against the registry, persists selections
//! through the preference store, tracks submitted transactions and publishes
//! the typed event stream.
//!
//! Concurrent connect attempts are serialized with a generation counter:
//! every attempt (and every disconnect) bumps the generation, and a result is
//! only applied to state when its generation is still current. A superseded
//! attempt resolves to `ConnectionCancelled`, which is never surfaced as an
//! error event.

mod tracker;

pub use tracker::{TransactionTracker, DEFAULT_TRANSACTION_CAPACITY};

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ConnectorError;
use crate::events::{ConnectorEvent, EventDispatcher, EventPayload, EventStream, Subscription};
use crate::registry::{WalletProvider, WalletRegistry};
use crate::session::{
    ConnectorId, LegacyWalletState, SessionAccount, WalletSession, WalletStatus,
};
use crate::storage::{PreferenceStore, StorageBackend};
use crate::types::{
    Cluster, SubmissionMethod, TrackedTransaction, TxStatus, WalletDescriptor, WalletFeature,
};

/// Connector client configuration
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Bound on the tracked-transaction list
    pub transaction_capacity: usize,
    /// Whether disconnect also forgets the persisted wallet/account
    /// preference, disabling auto-reconnect on the next load
    pub clear_preferences_on_disconnect: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            transaction_capacity: DEFAULT_TRANSACTION_CAPACITY,
            clear_preferences_on_disconnect: true,
        }
    }
}

struct ClientState {
    status: WalletStatus,
    generation: u64,
    account_watch: Option<Subscription>,
    tracker: TransactionTracker,
}

/// Read-only diagnostic projection for devtools consumption
#[derive(Debug, Clone, Serialize)]
pub struct DebugState {
    pub status: &'static str,
    pub connector_id: Option<ConnectorId>,
    pub accounts: Vec<SessionAccount>,
    pub selected_account: Option<String>,
    pub last_error: Option<String>,
    pub cluster: Cluster,
    pub transactions: Vec<TrackedTransaction>,
    pub wallets: Vec<WalletDescriptor>,
    pub generation: u64,
}

/// The connector state machine
///
/// All state transitions happen under one lock and are atomic from the
/// perspective of observers; events are emitted after the lock is released,
/// so listeners may synchronously call back into the client.
pub struct ConnectorClient {
    registry: WalletRegistry,
    prefs: PreferenceStore,
    events: EventDispatcher,
    state: Arc<Mutex<ClientState>>,
    config: ConnectorConfig,
    _registry_watch: Subscription,
}

impl ConnectorClient {
    pub fn new(registry: WalletRegistry, backend: Option<Arc<dyn StorageBackend>>) -> Self {
        Self::with_config(registry, backend, ConnectorConfig::default())
    }

    pub fn with_config(
        registry: WalletRegistry,
        backend: Option<Arc<dyn StorageBackend>>,
        config: ConnectorConfig,
    ) -> Self {
        let events = EventDispatcher::new();

        // Recovered storage failures surface on the event stream, never as
        // operation errors.
        let storage_events = events.clone();
        let prefs = PreferenceStore::with_error_hook(
            backend,
            Arc::new(move |key, err| {
                storage_events.emit(EventPayload::StorageFallback {
                    key: key.to_string(),
                    error: err.clone(),
                });
            }),
        );

        let registry_events = events.clone();
        let registry_watch = registry.on_change(move |wallets| {
            registry_events.emit(EventPayload::WalletsChanged {
                wallets: wallets.to_vec(),
            });
        });

        Self {
            registry,
            prefs,
            events,
            state: Arc::new(Mutex::new(ClientState {
                status: WalletStatus::Disconnected,
                generation: 0,
                account_watch: None,
                tracker: TransactionTracker::new(config.transaction_capacity),
            })),
            config,
            _registry_watch: registry_watch,
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Select a wallet by display name and establish a session
    ///
    /// A pending attempt is superseded: its eventual result is discarded and
    /// it resolves to `ConnectionCancelled`. Provider failures transition the
    /// status to `Error` and emit an `error` event in addition to being
    /// returned.
    pub async fn connect(&self, wallet_name: &str) -> Result<WalletSession, ConnectorError> {
        self.connect_with(wallet_name, false).await
    }

    /// Reconnect to the persisted wallet, when it is installed
    ///
    /// Failures are silent: the status lands on `Disconnected` and no error
    /// event is emitted.
    pub async fn auto_connect(&self) -> Option<WalletSession> {
        let stored = self.prefs.wallet().get()?;
        let provider = match self.registry.resolve_id(&stored) {
            Some(provider) => provider,
            None => {
                debug!(connector_id = %stored, "auto-connect skipped: wallet not installed");
                return None;
            }
        };
        let name = provider.name().to_string();
        match self.connect_with(&name, true).await {
            Ok(session) => Some(session),
            Err(err) => {
                debug!(error = %err, "auto-connect failed");
                None
            }
        }
    }

    /// Tear down the current session; safe to call from any state
    ///
    /// From `Connecting` this cancels the in-flight attempt without emitting
    /// anything. Provider-side disconnect failures are logged, not surfaced.
    pub async fn disconnect(&self) -> Result<(), ConnectorError> {
        let (previous, watch) = {
            let mut state = self.lock_state();
            state.generation += 1;
            let watch = state.account_watch.take();
            let previous =
                std::mem::replace(&mut state.status, WalletStatus::Disconnected);
            (previous, watch)
        };
        drop(watch);

        match previous {
            WalletStatus::Connected(session) => {
                if let Err(err) = session.provider().disconnect().await {
                    warn!(error = %err, "provider disconnect failed");
                }
                if self.config.clear_preferences_on_disconnect {
                    self.prefs.wallet().clear();
                    self.prefs.account().clear();
                }
                info!(connector_id = %session.connector_id(), "wallet disconnected");
                self.events.emit(EventPayload::WalletDisconnected {
                    connector_id: session.connector_id().clone(),
                });
            }
            WalletStatus::Connecting { connector_id } => {
                debug!(%connector_id, "connect attempt cancelled");
            }
            WalletStatus::Disconnected | WalletStatus::Error { .. } => {}
        }
        Ok(())
    }

    /// Switch the selected account within the active session
    pub fn select_account(&self, address: &str) -> Result<SessionAccount, ConnectorError> {
        let account = {
            let mut state = self.lock_state();
            match &mut state.status {
                WalletStatus::Connected(session) => session.select(address)?,
                _ => return Err(ConnectorError::NotConnected),
            }
        };
        self.prefs.account().set(Some(account.address.clone()));
        self.events.emit(EventPayload::AccountChanged {
            address: account.address.clone(),
        });
        Ok(account)
    }

    /// Persist the cluster preference; returns whether it was accepted
    pub fn select_cluster(&self, cluster: Cluster) -> bool {
        if !self.prefs.cluster().set(cluster) {
            return false;
        }
        self.events.emit(EventPayload::ClusterChanged { cluster });
        true
    }

    pub fn cluster(&self) -> Cluster {
        self.prefs.cluster().get()
    }

    // =========================================================================
    // Signing passthrough
    // =========================================================================

    /// Sign an arbitrary message with the selected account
    pub async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, ConnectorError> {
        let session = self.active_session()?;
        self.require_feature(&session, WalletFeature::SignMessage)?;
        let address = session.selected_account().address.clone();
        session.provider().sign_message(&address, message).await
    }

    /// Sign a serialized transaction with the selected account
    pub async fn sign_transaction(&self, transaction: &[u8]) -> Result<Vec<u8>, ConnectorError> {
        let session = self.active_session()?;
        self.require_feature(&session, WalletFeature::SignTransaction)?;
        let address = session.selected_account().address.clone();
        session
            .provider()
            .sign_transaction(&address, transaction)
            .await
    }

    /// Sign and submit in one wallet call, tracking the returned signature
    pub async fn sign_and_send_transaction(
        &self,
        transaction: &[u8],
    ) -> Result<String, ConnectorError> {
        let session = self.active_session()?;
        self.require_feature(&session, WalletFeature::SignAndSend)?;
        let fee_payer = session.selected_account().address.clone();
        let signature = session
            .provider()
            .sign_and_send(&fee_payer, transaction)
            .await?;
        self.track_transaction(TrackedTransaction::pending(
            &signature,
            SubmissionMethod::SignAndSend,
            &fee_payer,
        ));
        Ok(signature)
    }

    // =========================================================================
    // Transaction tracking
    // =========================================================================

    pub fn track_transaction(&self, entry: TrackedTransaction) {
        let signature = entry.signature.clone();
        {
            let mut state = self.lock_state();
            state.tracker.track(entry);
        }
        self.events
            .emit(EventPayload::TransactionTracked { signature });
    }

    /// Update a tracked signature; unknown signatures are a silent no-op
    pub fn update_transaction_status(
        &self,
        signature: &str,
        status: TxStatus,
        error: Option<String>,
    ) {
        let found = {
            let mut state = self.lock_state();
            state.tracker.update_status(signature, status, error)
        };
        if found {
            self.events.emit(EventPayload::TransactionUpdated {
                signature: signature.to_string(),
                status,
            });
        }
    }

    /// Newest-first snapshot of tracked transactions
    pub fn transactions(&self) -> Vec<TrackedTransaction> {
        self.lock_state().tracker.snapshot()
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Snapshot of the current status
    pub fn get_status(&self) -> WalletStatus {
        self.lock_state().status.clone()
    }

    /// Flat projection for consumers predating the status sum type
    pub fn legacy_state(&self) -> LegacyWalletState {
        self.lock_state().status.legacy_view()
    }

    /// Subscribe to the event stream; drop the handle to unsubscribe
    pub fn on(
        &self,
        listener: impl Fn(&ConnectorEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.on(listener)
    }

    /// Async view of the event stream
    pub fn events(&self) -> EventStream {
        self.events.stream()
    }

    pub fn registry(&self) -> &WalletRegistry {
        &self.registry
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.prefs
    }

    /// Diagnostic snapshot of status, transactions and registry contents
    pub fn get_debug_state(&self) -> DebugState {
        let (status, connector_id, accounts, selected_account, last_error, transactions, generation) = {
            let state = self.lock_state();
            let (connector_id, accounts, selected_account, last_error) = match &state.status {
                WalletStatus::Connected(session) => (
                    Some(session.connector_id().clone()),
                    session.accounts().to_vec(),
                    Some(session.selected_account().address.clone()),
                    None,
                ),
                WalletStatus::Connecting { connector_id } => {
                    (Some(connector_id.clone()), Vec::new(), None, None)
                }
                WalletStatus::Error { error, .. } => {
                    (None, Vec::new(), None, Some(error.to_string()))
                }
                WalletStatus::Disconnected => (None, Vec::new(), None, None),
            };
            (
                state.status.variant_name(),
                connector_id,
                accounts,
                selected_account,
                last_error,
                state.tracker.snapshot(),
                state.generation,
            )
        };
        DebugState {
            status,
            connector_id,
            accounts,
            selected_account,
            last_error,
            cluster: self.prefs.cluster().get(),
            transactions,
            wallets: self.registry.discover(),
            generation,
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn connect_with(
        &self,
        wallet_name: &str,
        silent: bool,
    ) -> Result<WalletSession, ConnectorError> {
        let connector_id = ConnectorId::from_wallet_name(wallet_name);

        // Supersede whatever was in flight and enter `connecting`.
        let (generation, previous, watch) = {
            let mut state = self.lock_state();
            state.generation += 1;
            let generation = state.generation;
            let watch = state.account_watch.take();
            let previous = std::mem::replace(
                &mut state.status,
                WalletStatus::Connecting {
                    connector_id: connector_id.clone(),
                },
            );
            (generation, previous, watch)
        };
        drop(watch);

        match previous {
            WalletStatus::Connected(old) => {
                info!(connector_id = %old.connector_id(), "superseding live session");
                let old_provider = old.provider().clone();
                tokio::spawn(async move {
                    if let Err(err) = old_provider.disconnect().await {
                        warn!(error = %err, "provider disconnect failed");
                    }
                });
                self.events.emit(EventPayload::WalletDisconnected {
                    connector_id: old.connector_id().clone(),
                });
            }
            WalletStatus::Connecting {
                connector_id: old_id,
            } => {
                debug!(connector_id = %old_id, "superseding pending connect attempt");
            }
            WalletStatus::Disconnected | WalletStatus::Error { .. } => {}
        }

        let provider = match self.registry.resolve(wallet_name) {
            Some(provider) => provider,
            None => {
                return self.fail_attempt(
                    generation,
                    &connector_id,
                    ConnectorError::WalletNotFound(wallet_name.to_string()),
                    silent,
                )
            }
        };

        debug!(%connector_id, generation, silent, "connecting");
        match provider.connect().await {
            Ok(accounts) if accounts.is_empty() => self.fail_attempt(
                generation,
                &connector_id,
                ConnectorError::Provider("wallet offered no accounts".to_string()),
                silent,
            ),
            Ok(accounts) => self.complete_attempt(generation, connector_id, provider, accounts),
            Err(err) => self.fail_attempt(generation, &connector_id, err, silent),
        }
    }

    fn complete_attempt(
        &self,
        generation: u64,
        connector_id: ConnectorId,
        provider: Arc<dyn WalletProvider>,
        accounts: Vec<SessionAccount>,
    ) -> Result<WalletSession, ConnectorError> {
        let mut session = WalletSession::new(connector_id.clone(), accounts, provider.clone());
        // Restore the persisted account selection when it is still offered.
        if let Some(preferred) = self.prefs.account().get() {
            let _ = session.select(&preferred);
        }

        let mut watch = Some(self.watch_accounts(&provider, &connector_id));
        let stale = {
            let mut state = self.lock_state();
            if state.generation != generation {
                true
            } else {
                state.status = WalletStatus::Connected(session.clone());
                state.account_watch = watch.take();
                false
            }
        };
        if stale {
            debug!(%connector_id, "discarding stale connect success");
            drop(watch);
            // The provider did establish a session; tear its side down.
            tokio::spawn(async move {
                if let Err(err) = provider.disconnect().await {
                    debug!(error = %err, "stale session teardown failed");
                }
            });
            return Err(ConnectorError::ConnectionCancelled);
        }

        self.prefs.wallet().set(Some(connector_id.clone()));
        self.prefs
            .account()
            .set(Some(session.selected_account().address.clone()));
        info!(%connector_id, accounts = session.accounts().len(), "wallet connected");
        self.events.emit(EventPayload::WalletConnected {
            connector_id,
            accounts: session.accounts().to_vec(),
        });
        self.events.emit(EventPayload::AccountChanged {
            address: session.selected_account().address.clone(),
        });
        Ok(session)
    }

    fn fail_attempt(
        &self,
        generation: u64,
        connector_id: &ConnectorId,
        err: ConnectorError,
        silent: bool,
    ) -> Result<WalletSession, ConnectorError> {
        {
            let mut state = self.lock_state();
            if state.generation != generation {
                debug!(%connector_id, "discarding stale connect failure");
                return Err(ConnectorError::ConnectionCancelled);
            }
            state.status = if silent {
                WalletStatus::Disconnected
            } else {
                WalletStatus::Error {
                    error: err.clone(),
                    recoverable: err.is_recoverable(),
                }
            };
        }
        if silent {
            debug!(%connector_id, error = %err, "silent connect attempt failed");
        } else {
            warn!(%connector_id, error = %err, "connect failed");
            self.events.emit(EventPayload::Error {
                error: err.clone(),
                recoverable: err.is_recoverable(),
            });
        }
        Err(err)
    }

    /// Wire the provider's account-change notifications into client state
    fn watch_accounts(
        &self,
        provider: &Arc<dyn WalletProvider>,
        connector_id: &ConnectorId,
    ) -> Subscription {
        let state = Arc::downgrade(&self.state);
        let events = self.events.clone();
        let prefs = self.prefs.clone();
        let connector_id = connector_id.clone();
        provider.subscribe_account_changes(Box::new(move |accounts| {
            let state = match state.upgrade() {
                Some(state) => state,
                None => return,
            };
            let selected = {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                match &mut state.status {
                    WalletStatus::Connected(session)
                        if session.connector_id() == &connector_id =>
                    {
                        session.replace_accounts(accounts);
                        Some(session.selected_account().address.clone())
                    }
                    _ => None,
                }
            };
            if let Some(address) = selected {
                prefs.account().set(Some(address.clone()));
                events.emit(EventPayload::AccountChanged { address });
            }
        }))
    }

    fn active_session(&self) -> Result<WalletSession, ConnectorError> {
        let state = self.lock_state();
        match &state.status {
            WalletStatus::Connected(session) => Ok(session.clone()),
            _ => Err(ConnectorError::NotConnected),
        }
    }

    fn require_feature(
        &self,
        session: &WalletSession,
        feature: WalletFeature,
    ) -> Result<(), ConnectorError> {
        let provider = session.provider();
        if provider.features().contains(&feature) {
            Ok(())
        } else {
            Err(provider.unsupported(feature))
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
