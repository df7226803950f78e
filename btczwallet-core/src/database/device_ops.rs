//! Pairing credential, server chain info and messaging identity.

use super::models::{ChainInfo, Credential};
use super::schema::{Database, Table};
use super::Result;
use crate::DatabaseError;
use rusqlite::OptionalExtension;

impl Database {
    /// Store the pairing credential, replacing any previous pairing.
    pub fn save_credential(&self, credential: &Credential) -> Result<()> {
        self.ensure_table(Table::DeviceAuth)?;
        self.conn()
            .execute(
                "INSERT INTO device_auth (id, host, api_key, secret_key)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    host = excluded.host,
                    api_key = excluded.api_key,
                    secret_key = excluded.secret_key",
                rusqlite::params![credential.host, credential.api_key, credential.secret_key],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    pub fn load_credential(&self) -> Result<Option<Credential>> {
        self.ensure_table(Table::DeviceAuth)?;
        let credential = self
            .conn()
            .query_row(
                "SELECT host, api_key, secret_key FROM device_auth WHERE id = 1",
                [],
                |row| {
                    Ok(Credential {
                        host: row.get(0)?,
                        api_key: row.get(1)?,
                        secret_key: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(DatabaseError::Sqlite)?;
        Ok(credential)
    }

    /// Overwrite the single chain info row.
    pub fn save_chain_info(&self, info: &ChainInfo) -> Result<()> {
        self.ensure_table(Table::ServerInfo)?;
        self.conn()
            .execute(
                "INSERT INTO server_info (id, height, currency, price)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    height = excluded.height,
                    currency = excluded.currency,
                    price = excluded.price",
                rusqlite::params![info.height, info.currency, info.price],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    pub fn load_chain_info(&self) -> Result<Option<ChainInfo>> {
        self.ensure_table(Table::ServerInfo)?;
        let info = self
            .conn()
            .query_row(
                "SELECT height, currency, price FROM server_info WHERE id = 1",
                [],
                |row| {
                    Ok(ChainInfo {
                        height: row.get(0)?,
                        currency: row.get(1)?,
                        price: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(DatabaseError::Sqlite)?;
        Ok(info)
    }

    /// Store the messaging identity address. Written once at provisioning.
    pub fn save_identity(&self, address: &str) -> Result<()> {
        self.ensure_table(Table::Identity)?;
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO identity (id, address) VALUES (1, ?1)",
                [address],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    pub fn load_identity(&self) -> Result<Option<String>> {
        self.ensure_table(Table::Identity)?;
        let address = self
            .conn()
            .query_row("SELECT address FROM identity WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(DatabaseError::Sqlite)?;
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_replaced_wholesale() {
        let db = Database::in_memory().unwrap();
        assert!(db.load_credential().unwrap().is_none());

        db.save_credential(&Credential::new("old.onion", "k1", "s1"))
            .unwrap();
        db.save_credential(&Credential::new("new.onion", "k2", "s2"))
            .unwrap();

        let loaded = db.load_credential().unwrap().unwrap();
        assert_eq!(loaded, Credential::new("new.onion", "k2", "s2"));
    }

    #[test]
    fn test_chain_info_overwritten_in_place() {
        let db = Database::in_memory().unwrap();
        let first = ChainInfo {
            height: 100,
            currency: "usd".to_string(),
            price: 0.00002,
        };
        let second = ChainInfo {
            height: 101,
            currency: "eur".to_string(),
            price: 0.00003,
        };
        db.save_chain_info(&first).unwrap();
        db.save_chain_info(&second).unwrap();

        assert_eq!(db.load_chain_info().unwrap(), Some(second));
        let rows: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM server_info", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_identity_written_once() {
        let db = Database::in_memory().unwrap();
        db.save_identity("zs1first").unwrap();
        db.save_identity("zs1second").unwrap();
        assert_eq!(db.load_identity().unwrap().as_deref(), Some("zs1first"));
    }
}
