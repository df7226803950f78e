//! Wire types for wallet server responses.
//!
//! The server is loose about numeric types: amounts and heights may arrive
//! as JSON numbers or as strings, and absent fields mean zero.

use crate::database::{
    AddressPair, ChainInfo, Contact, ContactBookEntry, Message, Transaction, TxCategory, TxKind,
};
use serde::{Deserialize, Deserializer, Serialize};

fn flexible_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Null,
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if s.trim().is_empty() => Ok(0.0),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
        Raw::Null => Ok(0.0),
    }
}

fn flexible_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
        Null,
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Float(f) => Ok(f as i64),
        Raw::Text(s) if s.trim().is_empty() => Ok(0),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
        Raw::Null => Ok(0),
    }
}

/// `/status`
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "flexible_i64")]
    pub height: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub price: f64,
}

impl StatusReport {
    pub fn chain_info(&self) -> ChainInfo {
        ChainInfo {
            height: self.height,
            currency: self.currency.clone(),
            price: self.price,
        }
    }
}

/// `/addresses`
#[derive(Debug, Clone, Deserialize)]
pub struct AddressesReport {
    pub transparent: String,
    pub shielded: String,
}

impl AddressesReport {
    pub fn into_pair(self) -> AddressPair {
        AddressPair {
            transparent_address: self.transparent,
            shielded_address: self.shielded,
            transparent_balance: 0.0,
            shielded_balance: 0.0,
        }
    }
}

/// `/balances`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BalancesReport {
    #[serde(default, deserialize_with = "flexible_f64")]
    pub transparent: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub shielded: f64,
}

/// One entry of `/transactions`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub address: String,
    pub txid: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub amount: f64,
    #[serde(
        rename = "blocks",
        alias = "confirmation_height",
        default,
        deserialize_with = "flexible_i64"
    )]
    pub confirmation_height: i64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub fee: f64,
    #[serde(default, deserialize_with = "flexible_i64")]
    pub timestamp: i64,
}

impl From<TransactionRecord> for Transaction {
    fn from(record: TransactionRecord) -> Self {
        Transaction {
            kind: TxKind::parse(&record.kind),
            category: TxCategory::parse(&record.category),
            address: record.address,
            txid: record.txid,
            amount: record.amount,
            confirmation_height: record.confirmation_height,
            fee: record.fee,
            timestamp: record.timestamp,
        }
    }
}

/// One entry of `/book`.
#[derive(Debug, Clone, Deserialize)]
pub struct BookRecord {
    #[serde(default)]
    pub name: String,
    pub address: String,
}

impl From<BookRecord> for ContactBookEntry {
    fn from(record: BookRecord) -> Self {
        ContactBookEntry {
            name: record.name,
            address: record.address,
        }
    }
}

/// One entry of `/contacts` (`get=contacts` or `get=pending`).
#[derive(Debug, Clone, Deserialize)]
pub struct ContactRecord {
    #[serde(default)]
    pub category: String,
    #[serde(rename = "id", alias = "contact_id")]
    pub contact_id: String,
    #[serde(default)]
    pub username: String,
}

impl From<ContactRecord> for Contact {
    fn from(record: ContactRecord) -> Self {
        Contact {
            category: record.category,
            contact_id: record.contact_id,
            username: record.username,
        }
    }
}

/// `/contacts?get=identity`
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityReport {
    #[serde(alias = "identity", default)]
    pub address: Option<String>,
}

/// One entry of `/messages` (`get=read` or `get=unread`).
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecord {
    #[serde(rename = "id", alias = "contact_id")]
    pub contact_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(rename = "message", alias = "body", default)]
    pub body: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub amount: f64,
    #[serde(deserialize_with = "flexible_i64")]
    pub timestamp: i64,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Message {
            contact_id: record.contact_id,
            author: record.author,
            body: record.body,
            amount: record.amount,
            timestamp: record.timestamp,
        }
    }
}

/// `/balance` for the messaging identity.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IdentityBalanceReport {
    #[serde(default, deserialize_with = "flexible_f64")]
    pub balance: f64,
}

/// `/mining`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiningStats {
    #[serde(default)]
    pub miner: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub pool: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub worker: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub shares: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub balance: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub immature: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub paid: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub solutions: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub reward: f64,
}

/// `/cashout` acknowledgement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CashoutReceipt {
    #[serde(default)]
    pub txid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_accepts_string_price() {
        let status: StatusReport = serde_json::from_str(
            r#"{"version":"1.4.9","height":100,"currency":"usd","price":"0.00002"}"#,
        )
        .unwrap();
        assert_eq!(
            status.chain_info(),
            ChainInfo {
                height: 100,
                currency: "usd".to_string(),
                price: 0.00002,
            }
        );
        assert_eq!(status.version.as_deref(), Some("1.4.9"));
    }

    #[test]
    fn status_without_version() {
        let status: StatusReport = serde_json::from_str(r#"{"height":"7"}"#).unwrap();
        assert!(status.version.is_none());
        assert_eq!(status.height, 7);
        assert_eq!(status.price, 0.0);
    }

    #[test]
    fn transaction_record_maps_wire_names() {
        let record: TransactionRecord = serde_json::from_str(
            r#"{"type":"shielded","category":"receive","address":"zs1x","txid":"ab",
                "amount":"2.5","blocks":99,"fee":0.0001,"timestamp":1700000000}"#,
        )
        .unwrap();
        let tx = Transaction::from(record);
        assert_eq!(tx.kind, TxKind::Shielded);
        assert_eq!(tx.category, TxCategory::Receive);
        assert_eq!(tx.amount, 2.5);
        assert_eq!(tx.confirmation_height, 99);
    }

    #[test]
    fn transaction_record_accepts_null_height() {
        let record: TransactionRecord =
            serde_json::from_str(r#"{"type":"transparent","category":"send","txid":"cd","blocks":null}"#)
                .unwrap();
        assert_eq!(record.confirmation_height, 0);
    }

    #[test]
    fn message_and_contact_use_id_key() {
        let message: MessageRecord = serde_json::from_str(
            r#"{"id":"c1","author":"bob","message":"hi","amount":0.0002,"timestamp":42}"#,
        )
        .unwrap();
        assert_eq!(message.contact_id, "c1");
        assert_eq!(message.body, "hi");

        let contact: ContactRecord =
            serde_json::from_str(r#"{"category":"individual","contact_id":"c2","username":"eve"}"#)
                .unwrap();
        assert_eq!(contact.contact_id, "c2");
    }
}
