//! Session and Status Model
//!
//! Pure data and transition helpers for the wallet connection lifecycle:
//! the `WalletStatus` sum type, the live `WalletSession`, connector id
//! normalization, and the legacy flat projection kept for older consumers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::registry::WalletProvider;

/// Prefix for wallets discovered through the standard injection protocol
pub const WALLET_STANDARD_PREFIX: &str = "wallet-standard:";
/// Prefix for mobile-wallet-adapter wallets
pub const MWA_PREFIX: &str = "mwa:";

const WALLETCONNECT_ID: &str = "walletconnect";

/// Normalized wallet identity used as the persistence key for the last
/// connected wallet
///
/// Normalization is deterministic and idempotent; the reversal in
/// [`ConnectorId::wallet_name`] is a documented best effort (original casing
/// and punctuation are not recoverable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorId(String);

impl ConnectorId {
    /// Derive the connector id from a raw wallet display name
    ///
    /// Lowercases, collapses runs of non-alphanumeric characters into single
    /// hyphens, strips edge hyphens, and prefixes with `wallet-standard:`.
    /// `WalletConnect` maps to the bare `walletconnect` id and
    /// mobile-wallet-adapter names take the `mwa:` prefix.
    pub fn from_wallet_name(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(WALLETCONNECT_ID) {
            return ConnectorId(WALLETCONNECT_ID.to_string());
        }
        let slug = slugify(trimmed);
        if trimmed.to_ascii_lowercase().contains("mobile wallet adapter") {
            ConnectorId(format!("{}{}", MWA_PREFIX, slug))
        } else {
            ConnectorId(format!("{}{}", WALLET_STANDARD_PREFIX, slug))
        }
    }

    /// Validate an already-normalized id string
    pub fn parse(value: &str) -> Option<Self> {
        if is_connector_id(value) {
            Some(ConnectorId(value.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Best-effort reversal of the normalization: hyphens become spaces and
    /// each word is capitalized
    pub fn wallet_name(&self) -> String {
        if self.0 == WALLETCONNECT_ID {
            return "WalletConnect".to_string();
        }
        let slug = self
            .0
            .strip_prefix(WALLET_STANDARD_PREFIX)
            .or_else(|| self.0.strip_prefix(MWA_PREFIX))
            .unwrap_or(&self.0);
        slug.split('-')
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// True when `value` is a well-formed connector id
pub fn is_connector_id(value: &str) -> bool {
    if value == WALLETCONNECT_ID {
        return true;
    }
    value
        .strip_prefix(WALLET_STANDARD_PREFIX)
        .or_else(|| value.strip_prefix(MWA_PREFIX))
        .map(is_valid_slug)
        .unwrap_or(false)
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// One selectable account within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAccount {
    /// Base58 public key
    pub address: String,
    /// Human label, when the wallet provides one
    pub label: Option<String>,
}

impl SessionAccount {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            label: None,
        }
    }

    pub fn labeled(address: &str, label: &str) -> Self {
        Self {
            address: address.to_string(),
            label: Some(label.to_string()),
        }
    }
}

/// A live connection to one wallet
///
/// Created when a connect attempt succeeds and destroyed on disconnect or
/// fatal error. The account list is non-empty and exactly one account is
/// selected at a time; the provider handle is used for signing capabilities.
#[derive(Clone)]
pub struct WalletSession {
    connector_id: ConnectorId,
    accounts: Vec<SessionAccount>,
    selected: usize,
    provider: Arc<dyn WalletProvider>,
}

impl WalletSession {
    /// `accounts` must be non-empty; the first account starts selected.
    pub(crate) fn new(
        connector_id: ConnectorId,
        accounts: Vec<SessionAccount>,
        provider: Arc<dyn WalletProvider>,
    ) -> Self {
        debug_assert!(!accounts.is_empty());
        Self {
            connector_id,
            accounts,
            selected: 0,
            provider,
        }
    }

    pub fn connector_id(&self) -> &ConnectorId {
        &self.connector_id
    }

    pub fn accounts(&self) -> &[SessionAccount] {
        &self.accounts
    }

    pub fn selected_account(&self) -> &SessionAccount {
        &self.accounts[self.selected]
    }

    pub fn provider(&self) -> &Arc<dyn WalletProvider> {
        &self.provider
    }

    pub(crate) fn select(&mut self, address: &str) -> Result<SessionAccount, ConnectorError> {
        match self.accounts.iter().position(|a| a.address == address) {
            Some(index) => {
                self.selected = index;
                Ok(self.accounts[index].clone())
            }
            None => Err(ConnectorError::InvalidAccount(address.to_string())),
        }
    }

    /// Apply an account-change notification from the provider, keeping the
    /// current selection when its address is still offered. Empty updates are
    /// ignored.
    pub(crate) fn replace_accounts(&mut self, accounts: Vec<SessionAccount>) {
        if accounts.is_empty() {
            return;
        }
        let current = self.selected_account().address.clone();
        self.selected = accounts
            .iter()
            .position(|a| a.address == current)
            .unwrap_or(0);
        self.accounts = accounts;
    }
}

impl fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSession")
            .field("connector_id", &self.connector_id)
            .field("accounts", &self.accounts)
            .field("selected", &self.selected)
            .finish()
    }
}

/// Connection lifecycle state
///
/// Exactly one variant is active at any time; transitions are applied
/// atomically by the connector client.
#[derive(Debug, Clone, Default)]
pub enum WalletStatus {
    /// Initial and terminal state
    #[default]
    Disconnected,
    /// A connect attempt is in flight
    Connecting { connector_id: ConnectorId },
    /// A session is live
    Connected(WalletSession),
    /// The last attempt failed; terminal until retry
    Error {
        error: ConnectorError,
        recoverable: bool,
    },
}

impl WalletStatus {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, WalletStatus::Disconnected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, WalletStatus::Connecting { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, WalletStatus::Connected(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, WalletStatus::Error { .. })
    }

    /// Connector id of the connecting or connected wallet
    pub fn connector_id(&self) -> Option<&ConnectorId> {
        match self {
            WalletStatus::Connecting { connector_id } => Some(connector_id),
            WalletStatus::Connected(session) => Some(session.connector_id()),
            WalletStatus::Disconnected | WalletStatus::Error { .. } => None,
        }
    }

    pub fn session(&self) -> Option<&WalletSession> {
        match self {
            WalletStatus::Connected(session) => Some(session),
            _ => None,
        }
    }

    /// Stable lowercase label, used by the diagnostic snapshot
    pub fn variant_name(&self) -> &'static str {
        match self {
            WalletStatus::Disconnected => "disconnected",
            WalletStatus::Connecting { .. } => "connecting",
            WalletStatus::Connected(_) => "connected",
            WalletStatus::Error { .. } => "error",
        }
    }

    /// Project into the flat shape older consumers expect
    ///
    /// Lossy by design: errors are not representable, so disconnected,
    /// connecting and error all collapse to the empty shape.
    pub fn legacy_view(&self) -> LegacyWalletState {
        match self {
            WalletStatus::Connected(session) => LegacyWalletState {
                connected: true,
                connecting: false,
                selected_account: Some(session.selected_account().address.clone()),
                accounts: session.accounts().to_vec(),
            },
            other => LegacyWalletState {
                connected: false,
                connecting: other.is_connecting(),
                selected_account: None,
                accounts: Vec::new(),
            },
        }
    }
}

/// Compatibility shim for consumers predating the status sum type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyWalletState {
    pub connected: bool,
    pub connecting: bool,
    pub selected_account: Option<String>,
    pub accounts: Vec<SessionAccount>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WalletFeature;
    use async_trait::async_trait;

    struct NullProvider;

    #[async_trait]
    impl WalletProvider for NullProvider {
        fn name(&self) -> &str {
            "Null"
        }

        fn features(&self) -> Vec<WalletFeature> {
            vec![WalletFeature::Connect]
        }

        async fn connect(&self) -> Result<Vec<SessionAccount>, ConnectorError> {
            Ok(vec![SessionAccount::new("Addr1")])
        }
    }

    fn session_with(accounts: Vec<SessionAccount>) -> WalletSession {
        WalletSession::new(
            ConnectorId::from_wallet_name("Null"),
            accounts,
            Arc::new(NullProvider),
        )
    }

    #[test]
    fn test_trust_wallet_id() {
        let id = ConnectorId::from_wallet_name("Trust Wallet");
        assert_eq!(id.as_str(), "wallet-standard:trust-wallet");
    }

    #[test]
    fn test_special_case_ids() {
        assert_eq!(
            ConnectorId::from_wallet_name("WalletConnect").as_str(),
            "walletconnect"
        );
        assert_eq!(
            ConnectorId::from_wallet_name("Mobile Wallet Adapter").as_str(),
            "mwa:mobile-wallet-adapter"
        );
    }

    #[test]
    fn test_normalization_collapses_punctuation() {
        let id = ConnectorId::from_wallet_name("  My--Fancy  (Wallet) 2 ");
        assert_eq!(id.as_str(), "wallet-standard:my-fancy-wallet-2");
    }

    #[test]
    fn test_normalization_idempotence() {
        for raw in ["Trust Wallet", "WalletConnect", "Mobile Wallet Adapter", "Solflare!"] {
            let id = ConnectorId::from_wallet_name(raw);
            let roundtripped = ConnectorId::from_wallet_name(&id.wallet_name());
            assert_eq!(roundtripped, id, "round-trip failed for {:?}", raw);
        }
    }

    #[test]
    fn test_connector_id_validation() {
        assert!(is_connector_id("wallet-standard:trust-wallet"));
        assert!(is_connector_id("walletconnect"));
        assert!(is_connector_id("mwa:mobile-wallet-adapter"));
        assert!(!is_connector_id("wallet-standard:"));
        assert!(!is_connector_id("wallet-standard:Trust-Wallet"));
        assert!(!is_connector_id("wallet-standard:trust--wallet"));
        assert!(!is_connector_id("phantom"));
        assert!(ConnectorId::parse("wallet-standard:phantom").is_some());
        assert!(ConnectorId::parse("-phantom").is_none());
    }

    #[test]
    fn test_wallet_name_reversal() {
        let id = ConnectorId::from_wallet_name("Trust Wallet");
        assert_eq!(id.wallet_name(), "Trust Wallet");
        assert_eq!(
            ConnectorId::from_wallet_name("walletconnect").wallet_name(),
            "WalletConnect"
        );
    }

    #[test]
    fn test_selection_updates() {
        let mut session = session_with(vec![
            SessionAccount::new("Addr1"),
            SessionAccount::labeled("Addr2", "Savings"),
        ]);
        assert_eq!(session.selected_account().address, "Addr1");
        session.select("Addr2").expect("valid account");
        assert_eq!(session.selected_account().address, "Addr2");
        assert!(matches!(
            session.select("Addr3"),
            Err(ConnectorError::InvalidAccount(_))
        ));
        assert_eq!(session.selected_account().address, "Addr2");
    }

    #[test]
    fn test_replace_accounts_keeps_selection() {
        let mut session = session_with(vec![
            SessionAccount::new("Addr1"),
            SessionAccount::new("Addr2"),
        ]);
        session.select("Addr2").expect("valid account");

        session.replace_accounts(vec![
            SessionAccount::new("Addr2"),
            SessionAccount::new("Addr3"),
        ]);
        assert_eq!(session.selected_account().address, "Addr2");

        // Selected account withdrawn: fall back to the first offered one.
        session.replace_accounts(vec![SessionAccount::new("Addr9")]);
        assert_eq!(session.selected_account().address, "Addr9");

        // Empty updates are ignored.
        session.replace_accounts(Vec::new());
        assert_eq!(session.selected_account().address, "Addr9");
    }

    #[test]
    fn test_legacy_view_connected() {
        let session = session_with(vec![SessionAccount::labeled("Addr1", "Main")]);
        let view = WalletStatus::Connected(session).legacy_view();
        assert!(view.connected);
        assert!(!view.connecting);
        assert_eq!(view.selected_account.as_deref(), Some("Addr1"));
        assert_eq!(view.accounts.len(), 1);
    }

    #[test]
    fn test_legacy_view_collapses_non_connected_states() {
        for status in [
            WalletStatus::Disconnected,
            WalletStatus::Connecting {
                connector_id: ConnectorId::from_wallet_name("Phantom"),
            },
            WalletStatus::Error {
                error: ConnectorError::Provider("boom".to_string()),
                recoverable: true,
            },
        ] {
            let view = status.legacy_view();
            assert!(!view.connected);
            assert_eq!(view.connecting, status.is_connecting());
            assert!(view.selected_account.is_none());
            assert!(view.accounts.is_empty());
        }
    }
}
