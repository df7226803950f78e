//! Address pair, balances and transactions.

use super::models::{AddressPair, Transaction, TxCategory, TxKind};
use super::schema::{Database, Table};
use super::Result;
use crate::DatabaseError;
use rusqlite::{OptionalExtension, Row};
use std::collections::HashSet;

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let kind: String = row.get(1)?;
    let category: String = row.get(2)?;
    Ok(Transaction {
        txid: row.get(0)?,
        kind: TxKind::parse(&kind),
        category: TxCategory::parse(&category),
        address: row.get(3)?,
        amount: row.get(4)?,
        confirmation_height: row.get(5)?,
        fee: row.get(6)?,
        timestamp: row.get(7)?,
    })
}

const TRANSACTION_COLUMNS: &str =
    "txid, kind, category, address, amount, confirmation_height, fee, timestamp";

impl Database {
    /// Store the address pair. A pair that already exists is kept as is.
    pub fn insert_addresses(&self, pair: &AddressPair) -> Result<()> {
        self.ensure_table(Table::Addresses)?;
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO addresses
                    (id, transparent_address, shielded_address, transparent_balance, shielded_balance)
                 VALUES (1, ?1, ?2, ?3, ?4)",
                rusqlite::params![
                    pair.transparent_address,
                    pair.shielded_address,
                    pair.transparent_balance,
                    pair.shielded_balance,
                ],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    pub fn load_addresses(&self) -> Result<Option<AddressPair>> {
        self.ensure_table(Table::Addresses)?;
        let pair = self
            .conn()
            .query_row(
                "SELECT transparent_address, shielded_address, transparent_balance, shielded_balance
                 FROM addresses WHERE id = 1",
                [],
                |row| {
                    Ok(AddressPair {
                        transparent_address: row.get(0)?,
                        shielded_address: row.get(1)?,
                        transparent_balance: row.get(2)?,
                        shielded_balance: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(DatabaseError::Sqlite)?;
        Ok(pair)
    }

    /// Overwrite both balances. Returns false when no address pair exists yet.
    pub fn update_balances(&self, transparent: f64, shielded: f64) -> Result<bool> {
        self.ensure_table(Table::Addresses)?;
        let updated = self
            .conn()
            .execute(
                "UPDATE addresses SET transparent_balance = ?1, shielded_balance = ?2 WHERE id = 1",
                rusqlite::params![transparent, shielded],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(updated > 0)
    }

    pub fn transaction_ids(&self) -> Result<HashSet<String>> {
        self.ensure_table(Table::Transactions)?;
        let mut stmt = self
            .conn()
            .prepare("SELECT txid FROM transactions")
            .map_err(DatabaseError::Sqlite)?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(DatabaseError::Sqlite)?
            .collect::<std::result::Result<HashSet<String>, _>>()
            .map_err(DatabaseError::Sqlite)?;
        Ok(ids)
    }

    /// Insert a transaction unless its txid is already stored.
    ///
    /// Returns true when a row was inserted.
    pub fn insert_transaction(&self, tx: &Transaction) -> Result<bool> {
        self.ensure_table(Table::Transactions)?;
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO transactions
                    (txid, kind, category, address, amount, confirmation_height, fee, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    tx.txid,
                    tx.kind.as_str(),
                    tx.category.as_str(),
                    tx.address,
                    tx.amount,
                    tx.confirmation_height,
                    tx.fee,
                    tx.timestamp,
                ],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(inserted > 0)
    }

    /// Update the only mutable transaction field. Returns true when it changed.
    pub fn update_confirmation_height(&self, txid: &str, height: i64) -> Result<bool> {
        self.ensure_table(Table::Transactions)?;
        let updated = self
            .conn()
            .execute(
                "UPDATE transactions SET confirmation_height = ?2
                 WHERE txid = ?1 AND confirmation_height != ?2",
                rusqlite::params![txid, height],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(updated > 0)
    }

    /// Latch the confirmed flag. It is never cleared.
    pub fn mark_confirmed(&self, txid: &str) -> Result<bool> {
        self.ensure_table(Table::Transactions)?;
        let updated = self
            .conn()
            .execute(
                "UPDATE transactions SET confirmed = 1 WHERE txid = ?1 AND confirmed = 0",
                [txid],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(updated > 0)
    }

    pub fn is_confirmed(&self, txid: &str) -> Result<bool> {
        self.ensure_table(Table::Transactions)?;
        let confirmed: Option<bool> = self
            .conn()
            .query_row(
                "SELECT confirmed FROM transactions WHERE txid = ?1",
                [txid],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Sqlite)?;
        Ok(confirmed.unwrap_or(false))
    }

    pub fn get_transaction(&self, txid: &str) -> Result<Option<Transaction>> {
        self.ensure_table(Table::Transactions)?;
        let sql = format!(
            "SELECT {} FROM transactions WHERE txid = ?1",
            TRANSACTION_COLUMNS
        );
        let tx = self
            .conn()
            .query_row(&sql, [txid], transaction_from_row)
            .optional()
            .map_err(DatabaseError::Sqlite)?;
        Ok(tx)
    }

    /// Most recent transactions first.
    pub fn list_transactions(&self, limit: usize) -> Result<Vec<Transaction>> {
        self.ensure_table(Table::Transactions)?;
        let sql = format!(
            "SELECT {} FROM transactions ORDER BY timestamp DESC LIMIT ?1",
            TRANSACTION_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql).map_err(DatabaseError::Sqlite)?;
        let txs = stmt
            .query_map([limit as i64], transaction_from_row)
            .map_err(DatabaseError::Sqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DatabaseError::Sqlite)?;
        Ok(txs)
    }
}
