//! Wallet connector core for Solana web applications
//!
//! This crate implements the client-side state machine that mediates between
//! an application and the user's chosen wallet:
//! - Wallet discovery through an injected provider registry
//! - Connection lifecycle tracking (disconnected → connecting →
//!   connected/error) with cancellation of superseded attempts
//! - Validated, fallback-safe persistence of wallet/cluster/account
//!   selections across reloads
//! - Bounded tracking of in-flight transactions
//! - A typed event stream for UI and devtools subscribers
//!
//! Rendering, signing cryptography and RPC transport are external
//! collaborators: wallets plug in behind [`registry::WalletProvider`] and
//! persistence behind [`storage::StorageBackend`].

pub mod client;
pub mod error;
pub mod events;
pub mod registry;
pub mod session;
pub mod storage;
pub mod types;

// Re-export commonly used items
pub use client::{
    ConnectorClient, ConnectorConfig, DebugState, TransactionTracker,
    DEFAULT_TRANSACTION_CAPACITY,
};
pub use error::ConnectorError;
pub use events::{ConnectorEvent, EventDispatcher, EventPayload, EventStream, Subscription};
pub use registry::{AccountChangeListener, KnownWallet, WalletProvider, WalletRegistry};
pub use session::{
    is_connector_id, ConnectorId, LegacyWalletState, SessionAccount, WalletSession, WalletStatus,
};
pub use storage::{
    BackendError, MemoryBackend, PreferenceStore, StorageAdapter, StorageBackend,
    StorageErrorHook,
};
pub use types::{
    Cluster, SubmissionMethod, TrackedTransaction, TxStatus, WalletDescriptor, WalletFeature,
};
