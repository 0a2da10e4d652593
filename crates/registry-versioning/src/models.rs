//! Mapped registry models.
//!
//! [`Business`] participates in history tracking; [`Filing`] does not.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{Entity, Versioned};
use crate::error::MissingPrimaryKey;

/// A registered business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    /// Row id; `None` until inserted.
    pub id: Option<i64>,
    /// Registry identifier, e.g. `BC1234567`. Unique and assigned before
    /// the row is written.
    pub identifier: String,
    pub legal_name: String,
    /// Corp type code.
    pub legal_type: String,
    pub state: String,
}

impl Business {
    /// A new active business that has not been written yet.
    pub fn new(
        identifier: impl Into<String>,
        legal_name: impl Into<String>,
        legal_type: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            identifier: identifier.into(),
            legal_name: legal_name.into(),
            legal_type: legal_type.into(),
            state: "ACTIVE".to_string(),
        }
    }

    /// Loads a business by registry identifier.
    pub fn find_by_identifier(
        conn: &Connection,
        identifier: &str,
    ) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            "SELECT id, identifier, legal_name, legal_type, state
             FROM businesses WHERE identifier = ?1",
            params![identifier],
            |row| {
                Ok(Self {
                    id: Some(row.get(0)?),
                    identifier: row.get(1)?,
                    legal_name: row.get(2)?,
                    legal_type: row.get(3)?,
                    state: row.get(4)?,
                })
            },
        )
        .optional()
    }
}

impl Entity for Business {
    fn entity_name(&self) -> &'static str {
        "business"
    }

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn insert(&mut self, conn: &Connection) -> rusqlite::Result<()> {
        let id = conn.query_row(
            "INSERT INTO businesses (identifier, legal_name, legal_type, state)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING id",
            params![self.identifier, self.legal_name, self.legal_type, self.state],
            |row| row.get(0),
        )?;
        self.id = Some(id);
        Ok(())
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<()> {
        let id = self.id.ok_or(MissingPrimaryKey("business"))?;
        conn.execute(
            "UPDATE businesses SET identifier = ?1, legal_name = ?2, legal_type = ?3, state = ?4
             WHERE id = ?5",
            params![self.identifier, self.legal_name, self.legal_type, self.state, id],
        )?;
        Ok(())
    }

    fn delete(&self, conn: &Connection) -> rusqlite::Result<()> {
        let id = self.id.ok_or(MissingPrimaryKey("business"))?;
        conn.execute("DELETE FROM businesses WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn versioned(&self) -> Option<&dyn Versioned> {
        Some(self)
    }
}

impl Versioned for Business {
    fn version_key(&self) -> String {
        self.identifier.clone()
    }

    fn snapshot(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Whether a filing of this type is kept out of the public ledger.
pub fn hidden_in_ledger(filing_type: &str, filing_sub_type: Option<&str>) -> bool {
    filing_type == "adminFreeze"
        || (filing_type == "dissolution" && filing_sub_type == Some("involuntary"))
}

/// A filing against a business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filing {
    pub id: Option<i64>,
    pub business_id: Option<i64>,
    pub filing_type: String,
    pub filing_sub_type: Option<String>,
    pub status: String,
    pub hide_in_ledger: bool,
}

impl Filing {
    /// A new draft filing; `hide_in_ledger` follows the filing type.
    pub fn new(
        business_id: Option<i64>,
        filing_type: impl Into<String>,
        filing_sub_type: Option<&str>,
    ) -> Self {
        let filing_type = filing_type.into();
        Self {
            id: None,
            business_id,
            hide_in_ledger: hidden_in_ledger(&filing_type, filing_sub_type),
            filing_type,
            filing_sub_type: filing_sub_type.map(str::to_string),
            status: "DRAFT".to_string(),
        }
    }
}

impl Entity for Filing {
    fn entity_name(&self) -> &'static str {
        "filing"
    }

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn insert(&mut self, conn: &Connection) -> rusqlite::Result<()> {
        let id = conn.query_row(
            "INSERT INTO filings (business_id, filing_type, filing_sub_type, status, hide_in_ledger)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id",
            params![
                self.business_id,
                self.filing_type,
                self.filing_sub_type,
                self.status,
                self.hide_in_ledger
            ],
            |row| row.get(0),
        )?;
        self.id = Some(id);
        Ok(())
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<()> {
        let id = self.id.ok_or(MissingPrimaryKey("filing"))?;
        conn.execute(
            "UPDATE filings SET business_id = ?1, filing_type = ?2, filing_sub_type = ?3,
                status = ?4, hide_in_ledger = ?5
             WHERE id = ?6",
            params![
                self.business_id,
                self.filing_type,
                self.filing_sub_type,
                self.status,
                self.hide_in_ledger,
                id
            ],
        )?;
        Ok(())
    }

    fn delete(&self, conn: &Connection) -> rusqlite::Result<()> {
        let id = self.id.ok_or(MissingPrimaryKey("filing"))?;
        conn.execute("DELETE FROM filings WHERE id = ?1", params![id])?;
        Ok(())
    }
}
