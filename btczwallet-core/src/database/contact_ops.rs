//! Contact roster and pending contact requests.

use super::models::Contact;
use super::schema::{Database, Table};
use super::Result;
use crate::DatabaseError;
use rusqlite::OptionalExtension;

/// The two roster tables share a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Roster {
    Contacts,
    Pending,
}

impl Roster {
    fn table(&self) -> Table {
        match self {
            Roster::Contacts => Table::Contacts,
            Roster::Pending => Table::PendingContacts,
        }
    }
}

impl Database {
    pub fn list_roster(&self, roster: Roster) -> Result<Vec<Contact>> {
        let table = roster.table();
        self.ensure_table(table)?;
        let sql = format!(
            "SELECT category, contact_id, username FROM {} ORDER BY username",
            table.name()
        );
        let mut stmt = self.conn().prepare(&sql).map_err(DatabaseError::Sqlite)?;
        let contacts = stmt
            .query_map([], |row| {
                Ok(Contact {
                    category: row.get(0)?,
                    contact_id: row.get(1)?,
                    username: row.get(2)?,
                })
            })
            .map_err(DatabaseError::Sqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DatabaseError::Sqlite)?;
        Ok(contacts)
    }

    pub fn get_roster_entry(&self, roster: Roster, contact_id: &str) -> Result<Option<Contact>> {
        let table = roster.table();
        self.ensure_table(table)?;
        let sql = format!(
            "SELECT category, contact_id, username FROM {} WHERE contact_id = ?1",
            table.name()
        );
        let contact = self
            .conn()
            .query_row(&sql, [contact_id], |row| {
                Ok(Contact {
                    category: row.get(0)?,
                    contact_id: row.get(1)?,
                    username: row.get(2)?,
                })
            })
            .optional()
            .map_err(DatabaseError::Sqlite)?;
        Ok(contact)
    }

    /// Insert unless the contact id is already present.
    pub fn insert_roster_entry(&self, roster: Roster, contact: &Contact) -> Result<bool> {
        let table = roster.table();
        self.ensure_table(table)?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} (contact_id, category, username) VALUES (?1, ?2, ?3)",
            table.name()
        );
        let inserted = self
            .conn()
            .execute(
                &sql,
                rusqlite::params![contact.contact_id, contact.category, contact.username],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(inserted > 0)
    }

    pub fn delete_roster_entry(&self, roster: Roster, contact_id: &str) -> Result<bool> {
        let table = roster.table();
        self.ensure_table(table)?;
        let sql = format!("DELETE FROM {} WHERE contact_id = ?1", table.name());
        let deleted = self
            .conn()
            .execute(&sql, [contact_id])
            .map_err(DatabaseError::Sqlite)?;
        Ok(deleted > 0)
    }

    /// Move an accepted request into the contact roster.
    ///
    /// Returns false when no pending row exists for the id.
    pub fn promote_pending(&self, contact_id: &str) -> Result<bool> {
        let pending = match self.get_roster_entry(Roster::Pending, contact_id)? {
            Some(pending) => pending,
            None => return Ok(false),
        };
        self.insert_roster_entry(Roster::Contacts, &pending)?;
        self.delete_roster_entry(Roster::Pending, contact_id)?;
        Ok(true)
    }
}
