//! Idempotent merges of server snapshots into the local cache.
//!
//! Roster entities (address book, contacts, pending requests) converge to
//! the server set exactly. Transactions and messages are append-only:
//! nothing is ever deleted by a merge.

use super::confirmations::{confirmations, CONFIRMED_DEPTH};
use crate::database::{
    Contact, ContactBookEntry, Database, Inbox, Message, Result, Roster, Transaction,
};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct TransactionMerge {
    /// Transactions seen for the first time, in server order.
    pub inserted: Vec<Transaction>,
    pub heights_updated: usize,
    pub newly_confirmed: usize,
}

/// Insert unseen txids, refresh confirmation heights of known ones, and
/// latch the confirmed flag once depth passes [`CONFIRMED_DEPTH`].
pub fn merge_transactions(
    db: &Database,
    batch: Vec<Transaction>,
    chain_height: Option<i64>,
) -> Result<TransactionMerge> {
    let mut known = db.transaction_ids()?;
    let mut merge = TransactionMerge::default();

    for tx in batch {
        if known.contains(&tx.txid) {
            if db.update_confirmation_height(&tx.txid, tx.confirmation_height)? {
                merge.heights_updated += 1;
            }
        } else if db.insert_transaction(&tx)? {
            known.insert(tx.txid.clone());
            merge.inserted.push(tx.clone());
        }

        if let Some(height) = chain_height {
            let depth = confirmations(height, tx.confirmation_height, tx.kind);
            if depth > CONFIRMED_DEPTH && db.mark_confirmed(&tx.txid)? {
                merge.newly_confirmed += 1;
            }
        }
    }

    Ok(merge)
}

#[derive(Debug)]
pub struct RosterMerge<T> {
    pub added: Vec<T>,
    pub removed: Vec<String>,
}

impl<T> RosterMerge<T> {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Converge the address book to `server`, keyed by address.
pub fn merge_book(
    db: &Database,
    server: Vec<ContactBookEntry>,
) -> Result<RosterMerge<ContactBookEntry>> {
    let server_keys: HashSet<&str> = server.iter().map(|e| e.address.as_str()).collect();
    let mut removed = Vec::new();
    for local in db.list_book()? {
        if !server_keys.contains(local.address.as_str()) && db.delete_book_entry(&local.address)? {
            removed.push(local.address);
        }
    }

    let mut added = Vec::new();
    for entry in server {
        if db.insert_book_entry(&entry)? {
            added.push(entry);
        }
    }
    Ok(RosterMerge { added, removed })
}

/// Converge a contact roster to `server`, keyed by contact id.
pub fn merge_roster(
    db: &Database,
    roster: Roster,
    server: Vec<Contact>,
) -> Result<RosterMerge<Contact>> {
    let server_keys: HashSet<&str> = server.iter().map(|c| c.contact_id.as_str()).collect();
    let mut removed = Vec::new();
    for local in db.list_roster(roster)? {
        if !server_keys.contains(local.contact_id.as_str())
            && db.delete_roster_entry(roster, &local.contact_id)?
        {
            removed.push(local.contact_id);
        }
    }

    let mut added = Vec::new();
    for contact in server {
        if db.insert_roster_entry(roster, &contact)? {
            added.push(contact);
        }
    }
    Ok(RosterMerge { added, removed })
}

/// Store read messages whose timestamp is new. Returns the number stored.
pub fn merge_read_messages(db: &Database, batch: Vec<Message>) -> Result<usize> {
    let mut stored = 0;
    for message in batch {
        if db.insert_message(Inbox::Read, &message)? {
            stored += 1;
        }
    }
    Ok(stored)
}

fn known_timestamps(db: &Database) -> Result<HashSet<i64>> {
    let mut known = db.message_timestamps(Inbox::Read)?;
    known.extend(db.message_timestamps(Inbox::Unread)?);
    Ok(known)
}

/// An unread message stored by a merge, and the table it landed in.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub message: Message,
    pub inbox: Inbox,
}

/// Stage new unread messages. Messages for `foreground_contact` go straight
/// to the read table since their chat is open.
pub fn merge_unread_messages(
    db: &Database,
    batch: Vec<Message>,
    foreground_contact: Option<&str>,
) -> Result<Vec<Arrival>> {
    let mut known = known_timestamps(db)?;
    let mut arrivals = Vec::new();

    for message in batch {
        if !known.insert(message.timestamp) {
            continue;
        }
        let inbox = if foreground_contact == Some(message.contact_id.as_str()) {
            Inbox::Read
        } else {
            Inbox::Unread
        };
        if db.insert_message(inbox, &message)? {
            arrivals.push(Arrival { message, inbox });
        }
    }
    Ok(arrivals)
}
