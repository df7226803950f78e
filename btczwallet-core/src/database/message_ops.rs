//! Read and unread chat messages.

use super::models::Message;
use super::schema::{Database, Table};
use super::Result;
use crate::DatabaseError;
use std::collections::HashSet;

/// Which message table a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbox {
    Read,
    Unread,
}

impl Inbox {
    fn table(&self) -> Table {
        match self {
            Inbox::Read => Table::Messages,
            Inbox::Unread => Table::UnreadMessages,
        }
    }
}

impl Database {
    pub fn message_timestamps(&self, inbox: Inbox) -> Result<HashSet<i64>> {
        let table = inbox.table();
        self.ensure_table(table)?;
        let sql = format!("SELECT timestamp FROM {}", table.name());
        let mut stmt = self.conn().prepare(&sql).map_err(DatabaseError::Sqlite)?;
        let timestamps = stmt
            .query_map([], |row| row.get(0))
            .map_err(DatabaseError::Sqlite)?
            .collect::<std::result::Result<HashSet<i64>, _>>()
            .map_err(DatabaseError::Sqlite)?;
        Ok(timestamps)
    }

    /// Insert unless a message with the same timestamp is stored.
    pub fn insert_message(&self, inbox: Inbox, message: &Message) -> Result<bool> {
        let table = inbox.table();
        self.ensure_table(table)?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} (timestamp, contact_id, author, body, amount)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            table.name()
        );
        let inserted = self
            .conn()
            .execute(
                &sql,
                rusqlite::params![
                    message.timestamp,
                    message.contact_id,
                    message.author,
                    message.body,
                    message.amount,
                ],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(inserted > 0)
    }

    /// Messages for one contact, oldest first.
    pub fn list_messages(&self, inbox: Inbox, contact_id: &str) -> Result<Vec<Message>> {
        let table = inbox.table();
        self.ensure_table(table)?;
        let sql = format!(
            "SELECT contact_id, author, body, amount, timestamp FROM {}
             WHERE contact_id = ?1 ORDER BY timestamp",
            table.name()
        );
        let mut stmt = self.conn().prepare(&sql).map_err(DatabaseError::Sqlite)?;
        let messages = stmt
            .query_map([contact_id], |row| {
                Ok(Message {
                    contact_id: row.get(0)?,
                    author: row.get(1)?,
                    body: row.get(2)?,
                    amount: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })
            .map_err(DatabaseError::Sqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DatabaseError::Sqlite)?;
        Ok(messages)
    }

    pub fn unread_count(&self) -> Result<usize> {
        self.ensure_table(Table::UnreadMessages)?;
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM unread_messages", [], |row| row.get(0))
            .map_err(DatabaseError::Sqlite)?;
        Ok(count as usize)
    }

    /// Move every unread message of a contact into the read table.
    ///
    /// Returns the number of promoted rows.
    pub fn promote_unread(&self, contact_id: &str) -> Result<usize> {
        self.ensure_table(Table::Messages)?;
        self.ensure_table(Table::UnreadMessages)?;
        let tx = self
            .conn()
            .unchecked_transaction()
            .map_err(DatabaseError::Sqlite)?;
        tx.execute(
            "INSERT OR IGNORE INTO messages (timestamp, contact_id, author, body, amount)
             SELECT timestamp, contact_id, author, body, amount
             FROM unread_messages WHERE contact_id = ?1",
            [contact_id],
        )
        .map_err(DatabaseError::Sqlite)?;
        let moved = tx
            .execute(
                "DELETE FROM unread_messages WHERE contact_id = ?1",
                [contact_id],
            )
            .map_err(DatabaseError::Sqlite)?;
        tx.commit().map_err(DatabaseError::Sqlite)?;
        Ok(moved)
    }
}
