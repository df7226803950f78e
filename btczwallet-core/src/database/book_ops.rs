//! Address book rows.

use super::models::ContactBookEntry;
use super::schema::{Database, Table};
use super::Result;
use crate::DatabaseError;

impl Database {
    pub fn list_book(&self) -> Result<Vec<ContactBookEntry>> {
        self.ensure_table(Table::AddressBook)?;
        let mut stmt = self
            .conn()
            .prepare("SELECT name, address FROM address_book ORDER BY name")
            .map_err(DatabaseError::Sqlite)?;
        let entries = stmt
            .query_map([], |row| {
                Ok(ContactBookEntry {
                    name: row.get(0)?,
                    address: row.get(1)?,
                })
            })
            .map_err(DatabaseError::Sqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DatabaseError::Sqlite)?;
        Ok(entries)
    }

    /// Insert an entry unless its address is already present.
    pub fn insert_book_entry(&self, entry: &ContactBookEntry) -> Result<bool> {
        self.ensure_table(Table::AddressBook)?;
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO address_book (address, name) VALUES (?1, ?2)",
                rusqlite::params![entry.address, entry.name],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(inserted > 0)
    }

    pub fn delete_book_entry(&self, address: &str) -> Result<bool> {
        self.ensure_table(Table::AddressBook)?;
        let deleted = self
            .conn()
            .execute("DELETE FROM address_book WHERE address = ?1", [address])
            .map_err(DatabaseError::Sqlite)?;
        Ok(deleted > 0)
    }
}
