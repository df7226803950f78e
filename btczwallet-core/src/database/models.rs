//! Database models for the local cache store.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Pairing credential for the wallet server.
///
/// Replaced wholesale when the user re-pairs.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    pub host: String,
    pub api_key: String,
    pub secret_key: String,
}

impl Credential {
    pub fn new(host: &str, api_key: &str, secret_key: &str) -> Self {
        Self {
            host: host.trim().to_string(),
            api_key: api_key.trim().to_string(),
            secret_key: secret_key.trim().to_string(),
        }
    }

    /// Base URL of the wallet server; bare onion hosts get `http://`.
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Server-reported chain height and price. Single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub height: i64,
    pub currency: String,
    pub price: f64,
}

/// The wallet's address pair and their balances. Single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressPair {
    pub transparent_address: String,
    pub shielded_address: String,
    pub transparent_balance: f64,
    pub shielded_balance: f64,
}

/// Pool a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Transparent,
    Shielded,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transparent => "transparent",
            Self::Shielded => "shielded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "shielded" => Self::Shielded,
            _ => Self::Transparent,
        }
    }
}

/// Direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxCategory {
    Send,
    Receive,
}

impl TxCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "receive" => Self::Receive,
            _ => Self::Send,
        }
    }
}

/// A wallet transaction. `txid` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TxKind,
    pub category: TxCategory,
    pub address: String,
    pub txid: String,
    pub amount: f64,
    /// Height the transaction was mined at; 0 while unconfirmed.
    pub confirmation_height: i64,
    pub fee: f64,
    pub timestamp: i64,
}

/// A named address in the address book. `address` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactBookEntry {
    pub name: String,
    pub address: String,
}

/// A messaging contact, or a pending contact request. `contact_id` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub category: String,
    pub contact_id: String,
    pub username: String,
}

/// Pending requests share the contact shape.
pub type PendingContactRequest = Contact;

/// A chat message. `timestamp` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub contact_id: String,
    pub author: String,
    pub body: String,
    pub amount: f64,
    pub timestamp: i64,
}
