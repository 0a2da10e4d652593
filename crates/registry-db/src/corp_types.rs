//! Read-only access to the `corp_types` reference table.
//!
//! Rows are inserted only by the `bffab2daa2c1` ledger step. There is
//! deliberately no write API here.

use registry_types::CorpType;
use rusqlite::{params, Connection, OptionalExtension, Row};

const COLUMNS: &str =
    "corp_type_cd, colin_ind, corp_class, short_desc, full_desc, legislation, version";

fn from_row(row: &Row<'_>) -> rusqlite::Result<CorpType> {
    Ok(CorpType {
        corp_type_cd: row.get(0)?,
        colin_ind: row.get(1)?,
        corp_class: row.get(2)?,
        short_desc: row.get(3)?,
        full_desc: row.get(4)?,
        legislation: row.get(5)?,
        version: row.get(6)?,
    })
}

/// Returns every corp type, ordered by code.
pub fn list_corp_types(conn: &Connection) -> rusqlite::Result<Vec<CorpType>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM corp_types ORDER BY corp_type_cd ASC"
    ))?;
    let types = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(types)
}

/// Looks up a single corp type by its code.
pub fn get_corp_type(conn: &Connection, code: &str) -> rusqlite::Result<Option<CorpType>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM corp_types WHERE corp_type_cd = ?1"),
        params![code],
        from_row,
    )
    .optional()
}
