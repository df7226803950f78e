//! Local cache store.
//!
//! One SQLite file holds every entity family the server reports. The store
//! has no merge logic of its own; reconciliation lives in [`crate::sync`].

pub mod book_ops;
pub mod contact_ops;
pub mod device_ops;
pub mod message_ops;
pub mod models;
pub mod schema;
pub mod wallet_ops;

pub use contact_ops::Roster;
pub use message_ops::Inbox;
pub use models::{
    AddressPair, ChainInfo, Contact, ContactBookEntry, Credential, Message, PendingContactRequest,
    Transaction, TxCategory, TxKind,
};
pub use schema::{Database, Table};

/// Result type for cache store operations
pub type Result<T> = std::result::Result<T, crate::DatabaseError>;
