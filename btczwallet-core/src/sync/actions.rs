//! Foreground user actions.
//!
//! Unlike the background loops these never swallow failures: a
//! `NoResponse` or `ServerError` goes straight back to the caller, which
//! owns presenting it. Local cache updates happen only after the server
//! accepted the action.

use super::client::params;
use super::engine::SyncContext;
use super::events::SessionEvent;
use super::models::CashoutReceipt;
use super::{Result, SyncError};
use crate::crypto::RequestParams;
use crate::database::{ContactBookEntry, Inbox, Roster, Transaction, TxCategory, TxKind};
use crate::units::format_param_amount;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Longest message body the server accepts, in characters.
pub const MAX_MESSAGE_CHARS: usize = 325;

/// Smallest fee attached to a message.
pub const MIN_MESSAGE_FEE: f64 = 0.0002;

#[derive(Clone)]
pub struct WalletActions {
    ctx: Arc<SyncContext>,
}

impl WalletActions {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    async fn call(&self, path: &str, params: &RequestParams) -> Result<Value> {
        if !self.ctx.bootstrap().is_ready() {
            return Err(SyncError::TransportNotReady);
        }
        self.ctx
            .client()
            .request(self.ctx.credential(), path, params)
            .await
    }

    /// Add an address book entry on the server, then cache it.
    pub async fn add_book_entry(&self, name: &str, address: &str) -> Result<()> {
        let entry = ContactBookEntry {
            name: name.trim().to_string(),
            address: address.trim().to_string(),
        };
        if entry.name.is_empty() || entry.address.is_empty() {
            return Err(SyncError::InvalidInput(
                "Name and address are required".to_string(),
            ));
        }

        self.call(
            "/book",
            &params([("name", entry.name.as_str()), ("address", entry.address.as_str())]),
        )
        .await?;
        self.ctx.with_db(|db| db.insert_book_entry(&entry))?;
        info!("Added address book entry");
        Ok(())
    }

    /// Send funds. Returns the txid when the server reports one.
    pub async fn cashout(
        &self,
        kind: TxKind,
        address: &str,
        amount: f64,
        fee: f64,
    ) -> Result<Option<String>> {
        let address = address.trim();
        if address.is_empty() {
            return Err(SyncError::InvalidInput("Destination address is required".to_string()));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(SyncError::InvalidInput("Amount must be positive".to_string()));
        }
        if !fee.is_finite() || fee < 0.0 {
            return Err(SyncError::InvalidInput("Fee must not be negative".to_string()));
        }
        if let Some(pair) = self.ctx.with_db(|db| db.load_addresses())? {
            let balance = match kind {
                TxKind::Transparent => pair.transparent_balance,
                TxKind::Shielded => pair.shielded_balance,
            };
            let total = amount + fee;
            if total > balance {
                return Err(SyncError::InvalidInput(format!(
                    "Total {} exceeds your {} balance ({})",
                    format_param_amount(total),
                    kind.as_str(),
                    format_param_amount(balance)
                )));
            }
        }

        let value = self
            .call(
                "/cashout",
                &params([
                    ("type", kind.as_str().to_string()),
                    ("address", address.to_string()),
                    ("amount", format_param_amount(amount)),
                    ("fee", format_param_amount(fee)),
                ]),
            )
            .await?;
        let receipt: CashoutReceipt = serde_json::from_value(value).unwrap_or_default();

        if let Some(txid) = &receipt.txid {
            let tx = Transaction {
                kind,
                category: TxCategory::Send,
                address: address.to_string(),
                txid: txid.clone(),
                amount,
                confirmation_height: 0,
                fee,
                timestamp: chrono::Utc::now().timestamp(),
            };
            if self.ctx.with_db(|db| db.insert_transaction(&tx))? {
                self.ctx.hub().emit(SessionEvent::TransactionObserved(tx));
            }
        }
        info!("Cashout accepted by server");
        Ok(receipt.txid)
    }

    pub async fn request_contact(&self, address: &str) -> Result<()> {
        let address = address.trim();
        if address.is_empty() {
            return Err(SyncError::InvalidInput("Contact address is required".to_string()));
        }
        self.call("/contacts", &params([("request", address)])).await?;
        Ok(())
    }

    /// Accept a pending request and move it into the contact roster.
    pub async fn accept_contact(&self, contact_id: &str) -> Result<()> {
        self.call("/contacts", &params([("accept", contact_id)])).await?;
        self.ctx.with_db(|db| db.promote_pending(contact_id))?;
        self.ctx.hub().emit(SessionEvent::ContactRosterChanged);
        Ok(())
    }

    pub async fn reject_contact(&self, contact_id: &str) -> Result<()> {
        self.call("/contacts", &params([("reject", contact_id)])).await?;
        self.ctx
            .with_db(|db| db.delete_roster_entry(Roster::Pending, contact_id))?;
        self.ctx.hub().emit(SessionEvent::ContactRosterChanged);
        Ok(())
    }

    pub async fn ban_contact(&self, contact_id: &str) -> Result<()> {
        self.call("/contacts", &params([("ban", contact_id)])).await?;
        self.ctx
            .with_db(|db| db.delete_roster_entry(Roster::Contacts, contact_id))?;
        self.ctx.hub().emit(SessionEvent::ContactRosterChanged);
        Ok(())
    }

    /// Send a chat message. The body is trimmed before validation.
    pub async fn send_message(&self, contact_id: &str, body: &str, fee: f64) -> Result<()> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SyncError::InvalidInput(
                "Enter a message before sending".to_string(),
            ));
        }
        if body.chars().count() > MAX_MESSAGE_CHARS {
            return Err(SyncError::InvalidInput(format!(
                "Message exceeds the maximum length of {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        if !fee.is_finite() || fee < MIN_MESSAGE_FEE {
            return Err(SyncError::InvalidInput(format!(
                "The minimum fee per message is {}",
                format_param_amount(MIN_MESSAGE_FEE)
            )));
        }

        self.call(
            "/messages",
            &params([
                ("send", contact_id.to_string()),
                ("message", body.to_string()),
                ("amount", format_param_amount(fee)),
            ]),
        )
        .await?;
        Ok(())
    }

    /// Clear a contact's unread messages. Returns how many were promoted.
    pub async fn mark_read(&self, contact_id: &str) -> Result<usize> {
        self.call("/messages", &params([("clean", contact_id)])).await?;
        let promoted = self.ctx.with_db(|db| db.promote_unread(contact_id))?;
        Ok(promoted)
    }

    /// Unread messages for one contact, read from the cache only.
    pub fn unread_for(&self, contact_id: &str) -> Result<Vec<crate::database::Message>> {
        self.ctx
            .with_db(|db| db.list_messages(Inbox::Unread, contact_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::database::{AddressPair, Contact, Message};
    use crate::sync::events::{EventHub, SurfaceState};
    use crate::sync::test_support::{
        idle_bootstrap, paired_database, test_context, test_credential, FakeServer, Reply,
    };
    use crate::sync::RequestClient;
    use serde_json::json;

    async fn actions(server: Arc<FakeServer>) -> WalletActions {
        WalletActions::new(
            test_context(server, EventHub::default(), Arc::new(SurfaceState::new())).await,
        )
    }

    fn contact(id: &str) -> Contact {
        Contact {
            category: "individual".to_string(),
            contact_id: id.to_string(),
            username: "carol".to_string(),
        }
    }

    #[tokio::test]
    async fn test_actions_require_ready_transport() {
        let server = FakeServer::new();
        let ctx = Arc::new(SyncContext::new(
            paired_database(),
            RequestClient::new(server.clone()),
            test_credential(),
            Arc::new(EventHub::default()),
            Arc::new(SurfaceState::new()),
            idle_bootstrap(),
            WalletConfig::default(),
        ));
        let actions = WalletActions::new(ctx);

        let err = actions.request_contact("identity-b").await.unwrap_err();
        assert!(matches!(err, SyncError::TransportNotReady));
        assert!(server.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_book_entry_cached_after_success() {
        let server = FakeServer::new();
        server.route("/book", None, Reply::Data(json!({"result": "ok"})));
        let actions = actions(server.clone()).await;

        actions.add_book_entry(" alice ", "t1alice").await.unwrap();

        let sent = server.last_params("/book").unwrap();
        assert_eq!(sent.get("name").map(String::as_str), Some("alice"));
        let book = actions.ctx.with_db(|db| db.list_book()).unwrap();
        assert_eq!(book.len(), 1);
        assert_eq!(book[0].address, "t1alice");
    }

    #[tokio::test]
    async fn test_server_error_propagates_without_caching() {
        let server = FakeServer::new();
        server.route("/book", None, Reply::Error("Address already exists".into()));
        let actions = actions(server).await;

        let err = actions.add_book_entry("alice", "t1alice").await.unwrap_err();
        assert_eq!(err.to_string(), "Address already exists");
        assert!(actions.ctx.with_db(|db| db.list_book()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_validation_precedes_network() {
        let server = FakeServer::new();
        let actions = actions(server.clone()).await;

        let too_long = "x".repeat(326);
        for (body, fee) in [
            ("   ", 0.0002),
            (too_long.as_str(), 0.0002),
            ("hi", 0.0001),
            ("hi", f64::NAN),
            ("hi", f64::INFINITY),
        ] {
            let err = actions.send_message("c1", body, fee).await.unwrap_err();
            assert!(matches!(err, SyncError::InvalidInput(_)));
        }
        assert_eq!(server.calls("/messages"), 0);
    }

    #[tokio::test]
    async fn test_send_message_params() {
        let server = FakeServer::new();
        server.route("/messages", None, Reply::Data(json!({"result": "sent"})));
        let actions = actions(server.clone()).await;

        let body = "y".repeat(325);
        actions.send_message("c1", &body, 0.0002).await.unwrap();

        let sent = server.last_params("/messages").unwrap();
        assert_eq!(sent.get("send").map(String::as_str), Some("c1"));
        assert_eq!(sent.get("message"), Some(&body));
        assert_eq!(sent.get("amount").map(String::as_str), Some("0.00020000"));
    }

    #[tokio::test]
    async fn test_accept_promotes_pending() {
        let server = FakeServer::new();
        server.route("/contacts", None, Reply::Data(json!({"result": "accepted"})));
        let actions = actions(server).await;
        actions
            .ctx
            .with_db(|db| db.insert_roster_entry(Roster::Pending, &contact("p1")))
            .unwrap();

        actions.accept_contact("p1").await.unwrap();

        let (contacts, pending) = actions
            .ctx
            .with_db(|db| Ok((db.list_roster(Roster::Contacts)?, db.list_roster(Roster::Pending)?)))
            .unwrap();
        assert_eq!(contacts, vec![contact("p1")]);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_ban_removes_contact() {
        let server = FakeServer::new();
        server.route("/contacts", None, Reply::Data(json!({"result": "banned"})));
        let actions = actions(server.clone()).await;
        actions
            .ctx
            .with_db(|db| db.insert_roster_entry(Roster::Contacts, &contact("c1")))
            .unwrap();

        actions.ban_contact("c1").await.unwrap();

        assert_eq!(
            server.last_params("/contacts").unwrap().get("ban").map(String::as_str),
            Some("c1")
        );
        assert!(actions
            .ctx
            .with_db(|db| db.list_roster(Roster::Contacts))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_promotes_unread() {
        let server = FakeServer::new();
        server.route("/messages", None, Reply::Data(json!({"result": "cleaned"})));
        let actions = actions(server).await;
        actions
            .ctx
            .with_db(|db| {
                db.insert_message(
                    Inbox::Unread,
                    &Message {
                        contact_id: "c1".to_string(),
                        author: "bob".to_string(),
                        body: "hi".to_string(),
                        amount: 0.0002,
                        timestamp: 42,
                    },
                )
            })
            .unwrap();

        assert_eq!(actions.unread_for("c1").unwrap().len(), 1);
        assert_eq!(actions.mark_read("c1").await.unwrap(), 1);
        assert!(actions.unread_for("c1").unwrap().is_empty());
        assert_eq!(
            actions
                .ctx
                .with_db(|db| db.list_messages(Inbox::Read, "c1"))
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_cashout_records_local_send() {
        let server = FakeServer::new();
        server.route("/cashout", None, Reply::Data(json!({"txid": "abc123"})));
        let actions = actions(server.clone()).await;
        actions
            .ctx
            .with_db(|db| {
                db.insert_addresses(&AddressPair {
                    transparent_address: "t1self".to_string(),
                    shielded_address: "zs1self".to_string(),
                    transparent_balance: 10.0,
                    shielded_balance: 0.0,
                })
            })
            .unwrap();

        let txid = actions
            .cashout(TxKind::Transparent, "t1dest", 1.5, 0.0001)
            .await
            .unwrap();
        assert_eq!(txid.as_deref(), Some("abc123"));

        let sent = server.last_params("/cashout").unwrap();
        assert_eq!(sent.get("type").map(String::as_str), Some("transparent"));
        assert_eq!(sent.get("amount").map(String::as_str), Some("1.50000000"));
        assert_eq!(sent.get("fee").map(String::as_str), Some("0.00010000"));

        let tx = actions
            .ctx
            .with_db(|db| db.get_transaction("abc123"))
            .unwrap()
            .unwrap();
        assert_eq!(tx.category, TxCategory::Send);
        assert_eq!(tx.address, "t1dest");
    }

    #[tokio::test]
    async fn test_cashout_rejects_insufficient_balance() {
        let server = FakeServer::new();
        let actions = actions(server.clone()).await;
        actions
            .ctx
            .with_db(|db| {
                db.insert_addresses(&AddressPair {
                    transparent_address: "t1self".to_string(),
                    shielded_address: "zs1self".to_string(),
                    transparent_balance: 10.0,
                    shielded_balance: 1.0,
                })
            })
            .unwrap();

        let err = actions
            .cashout(TxKind::Shielded, "zs1dest", 1.0, 0.0001)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(ref m) if m.contains("shielded balance")));
        assert_eq!(server.calls("/cashout"), 0);
    }

    #[tokio::test]
    async fn test_cashout_rejects_non_finite_values() {
        let server = FakeServer::new();
        let actions = actions(server.clone()).await;

        for (amount, fee) in [
            (f64::INFINITY, 0.0001),
            (f64::NAN, 0.0001),
            (1.0, f64::NAN),
            (1.0, f64::INFINITY),
            (1.0, -0.0001),
        ] {
            let err = actions
                .cashout(TxKind::Transparent, "t1dest", amount, fee)
                .await
                .unwrap_err();
            assert!(matches!(err, SyncError::InvalidInput(_)));
        }
        assert_eq!(server.calls("/cashout"), 0);
    }
}
