//! Common types for the connector core
//!
//! These types provide a unified representation for wallet descriptors,
//! clusters and tracked transactions shared across the client, registry and
//! event stream.

use serde::{Deserialize, Serialize};

/// Current unix timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// True when `value` is a base58 string that decodes to a 32-byte public key
pub fn is_base58_address(value: &str) -> bool {
    bs58::decode(value)
        .into_vec()
        .map(|bytes| bytes.len() == 32)
        .unwrap_or(false)
}

/// Capability advertised by a wallet provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalletFeature {
    Connect,
    Disconnect,
    SignTransaction,
    SignAllTransactions,
    SignMessage,
    SignAndSend,
}

impl std::fmt::Display for WalletFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletFeature::Connect => write!(f, "connect"),
            WalletFeature::Disconnect => write!(f, "disconnect"),
            WalletFeature::SignTransaction => write!(f, "sign-transaction"),
            WalletFeature::SignAllTransactions => write!(f, "sign-all-transactions"),
            WalletFeature::SignMessage => write!(f, "sign-message"),
            WalletFeature::SignAndSend => write!(f, "sign-and-send"),
        }
    }
}

/// Immutable snapshot describing one discoverable wallet
///
/// Regenerated whenever the registry re-probes; `installed` distinguishes a
/// currently registered provider from a known-but-absent placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletDescriptor {
    /// Unique display name
    pub name: String,
    /// Opaque icon URI
    pub icon: Option<String>,
    /// Supported chain identifiers (e.g. "solana:mainnet")
    pub chains: Vec<String>,
    /// Advertised capability set
    pub features: Vec<WalletFeature>,
    /// Whether the provider is currently registered
    pub installed: bool,
}

impl WalletDescriptor {
    /// Whether the wallet advertises the given capability
    pub fn supports(&self, feature: WalletFeature) -> bool {
        self.features.contains(&feature)
    }
}

/// Named Solana network endpoint grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Cluster {
    Mainnet,
    Devnet,
    Testnet,
    Localnet,
}

impl Cluster {
    /// Chain identifier in the `solana:<network>` form
    pub fn id(&self) -> &'static str {
        match self {
            Cluster::Mainnet => "solana:mainnet",
            Cluster::Devnet => "solana:devnet",
            Cluster::Testnet => "solana:testnet",
            Cluster::Localnet => "solana:localnet",
        }
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Cluster::Mainnet
    }
}

impl std::fmt::Display for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for Cluster {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solana:mainnet" | "solana:mainnet-beta" => Ok(Cluster::Mainnet),
            "solana:devnet" => Ok(Cluster::Devnet),
            "solana:testnet" => Ok(Cluster::Testnet),
            "solana:localnet" => Ok(Cluster::Localnet),
            _ => Err(format!("Unknown cluster id: {}", s)),
        }
    }
}

impl From<Cluster> for String {
    fn from(cluster: Cluster) -> Self {
        cluster.id().to_string()
    }
}

impl TryFrom<String> for Cluster {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How a tracked transaction was submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionMethod {
    /// Signed and sent by the wallet in one call
    SignAndSend,
    /// Signed by the wallet, sent by the application
    SignThenSend,
    /// Submitted outside the connector, tracked after the fact
    External,
}

impl std::fmt::Display for SubmissionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionMethod::SignAndSend => write!(f, "sign-and-send"),
            SubmissionMethod::SignThenSend => write!(f, "sign-then-send"),
            SubmissionMethod::External => write!(f, "external"),
        }
    }
}

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Submitted, not yet confirmed
    Pending,
    /// Confirmed by the cluster
    Confirmed,
    /// Dropped or reverted
    Failed,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStatus::Pending => write!(f, "pending"),
            TxStatus::Confirmed => write!(f, "confirmed"),
            TxStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One tracked transaction, keyed by signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTransaction {
    /// Base58 transaction signature (primary key)
    pub signature: String,
    /// Lifecycle status
    pub status: TxStatus,
    /// Submission timestamp (unix ms)
    pub timestamp: i64,
    /// How the transaction was submitted
    pub method: SubmissionMethod,
    /// Fee payer address
    pub fee_payer: String,
    /// Error message for failed transactions
    pub error: Option<String>,
    /// Free-form metadata attached by the caller
    pub metadata: Option<serde_json::Value>,
}

impl TrackedTransaction {
    /// Create a pending entry stamped with the current time
    pub fn pending(signature: &str, method: SubmissionMethod, fee_payer: &str) -> Self {
        Self {
            signature: signature.to_string(),
            status: TxStatus::Pending,
            timestamp: now_ms(),
            method,
            fee_payer: fee_payer.to_string(),
            error: None,
            metadata: None,
        }
    }

    /// Attach a metadata bag
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_roundtrip() {
        for cluster in [
            Cluster::Mainnet,
            Cluster::Devnet,
            Cluster::Testnet,
            Cluster::Localnet,
        ] {
            assert_eq!(cluster.id().parse::<Cluster>(), Ok(cluster));
        }
        assert!("solana:mainnet-beta".parse::<Cluster>().is_ok());
        assert!("ethereum:mainnet".parse::<Cluster>().is_err());
    }

    #[test]
    fn test_cluster_persisted_form() {
        let raw = serde_json::to_string(&Cluster::Devnet).expect("serialize");
        assert_eq!(raw, "\"solana:devnet\"");
        let back: Cluster = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back, Cluster::Devnet);
    }

    #[test]
    fn test_base58_address_validation() {
        // The system program id decodes to 32 zero bytes.
        assert!(is_base58_address("11111111111111111111111111111111"));
        assert!(!is_base58_address("not-base58-0OIl"));
        assert!(!is_base58_address("abc"));
    }

    #[test]
    fn test_pending_transaction_defaults() {
        let tx = TrackedTransaction::pending("sig1", SubmissionMethod::SignAndSend, "Addr1");
        assert_eq!(tx.status, TxStatus::Pending);
        assert!(tx.error.is_none());
        assert!(tx.timestamp > 0);
    }
}
