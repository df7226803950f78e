//! Database connection and table management.
//!
//! There is no migration step. Every table is created with
//! `CREATE TABLE IF NOT EXISTS` right before it is written, so the first-run
//! and n-th-run code paths are the same.

use super::Result;
use crate::DatabaseError;
use rusqlite::Connection;
use std::path::Path;

/// Local cache store for server-reported wallet state
pub struct Database {
    conn: Connection,
}

/// Tables owned by the cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    DeviceAuth,
    ServerInfo,
    Addresses,
    Transactions,
    AddressBook,
    Contacts,
    PendingContacts,
    Identity,
    Messages,
    UnreadMessages,
}

impl Table {
    pub const ALL: [Table; 10] = [
        Table::DeviceAuth,
        Table::ServerInfo,
        Table::Addresses,
        Table::Transactions,
        Table::AddressBook,
        Table::Contacts,
        Table::PendingContacts,
        Table::Identity,
        Table::Messages,
        Table::UnreadMessages,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::DeviceAuth => "device_auth",
            Table::ServerInfo => "server_info",
            Table::Addresses => "addresses",
            Table::Transactions => "transactions",
            Table::AddressBook => "address_book",
            Table::Contacts => "contacts",
            Table::PendingContacts => "pending_contacts",
            Table::Identity => "identity",
            Table::Messages => "messages",
            Table::UnreadMessages => "unread_messages",
        }
    }

    fn create_sql(&self) -> &'static str {
        match self {
            Table::DeviceAuth => {
                "CREATE TABLE IF NOT EXISTS device_auth (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    host TEXT NOT NULL,
                    api_key TEXT NOT NULL,
                    secret_key TEXT NOT NULL
                )"
            }
            Table::ServerInfo => {
                "CREATE TABLE IF NOT EXISTS server_info (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    height INTEGER NOT NULL,
                    currency TEXT NOT NULL,
                    price REAL NOT NULL
                )"
            }
            Table::Addresses => {
                "CREATE TABLE IF NOT EXISTS addresses (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    transparent_address TEXT NOT NULL,
                    shielded_address TEXT NOT NULL,
                    transparent_balance REAL NOT NULL DEFAULT 0,
                    shielded_balance REAL NOT NULL DEFAULT 0
                )"
            }
            Table::Transactions => {
                "CREATE TABLE IF NOT EXISTS transactions (
                    txid TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    category TEXT NOT NULL,
                    address TEXT NOT NULL,
                    amount REAL NOT NULL,
                    confirmation_height INTEGER NOT NULL DEFAULT 0,
                    fee REAL NOT NULL DEFAULT 0,
                    timestamp INTEGER NOT NULL,
                    confirmed INTEGER NOT NULL DEFAULT 0
                )"
            }
            Table::AddressBook => {
                "CREATE TABLE IF NOT EXISTS address_book (
                    address TEXT PRIMARY KEY,
                    name TEXT NOT NULL
                )"
            }
            Table::Contacts => {
                "CREATE TABLE IF NOT EXISTS contacts (
                    contact_id TEXT PRIMARY KEY,
                    category TEXT NOT NULL,
                    username TEXT NOT NULL
                )"
            }
            Table::PendingContacts => {
                "CREATE TABLE IF NOT EXISTS pending_contacts (
                    contact_id TEXT PRIMARY KEY,
                    category TEXT NOT NULL,
                    username TEXT NOT NULL
                )"
            }
            Table::Identity => {
                "CREATE TABLE IF NOT EXISTS identity (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    address TEXT NOT NULL
                )"
            }
            Table::Messages => {
                "CREATE TABLE IF NOT EXISTS messages (
                    timestamp INTEGER NOT NULL UNIQUE,
                    contact_id TEXT NOT NULL,
                    author TEXT NOT NULL,
                    body TEXT NOT NULL,
                    amount REAL NOT NULL DEFAULT 0
                )"
            }
            Table::UnreadMessages => {
                "CREATE TABLE IF NOT EXISTS unread_messages (
                    timestamp INTEGER NOT NULL UNIQUE,
                    contact_id TEXT NOT NULL,
                    author TEXT NOT NULL,
                    body TEXT NOT NULL,
                    amount REAL NOT NULL DEFAULT 0
                )"
            }
        }
    }
}

impl Database {
    /// Open a database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(DatabaseError::Sqlite)?;
        Ok(Self { conn })
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Sqlite)?;
        Ok(Self { conn })
    }

    /// Create a table if it is absent. Safe to call before every write.
    pub fn ensure_table(&self, table: Table) -> Result<()> {
        self.conn
            .execute(table.create_sql(), [])
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    /// Create every table. Reads call this so a fresh store reads as empty.
    pub fn ensure_all(&self) -> Result<()> {
        for table in Table::ALL {
            self.ensure_table(table)?;
        }
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Whether a table currently exists.
    pub fn table_exists(&self, table: Table) -> Result<bool> {
        let exists: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
                [table.name()],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(exists)
    }
}
