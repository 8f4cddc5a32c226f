//! Singleton assistant bio storage
use crate::error::Result;
use crate::memory_db::schema::ChatBio;
use rusqlite::{params, Row};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

const BIO_SLOT: &str = "active";

pub struct BioStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl BioStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn get_bio(&self) -> Result<Option<ChatBio>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, content, created_at, updated_at FROM bio WHERE slot = ?1",
        )?;
        let mut rows = stmt.query([BIO_SLOT])?;

        if let Some(row) = rows.next()? {
            Ok(Some(self.row_to_bio(row)?))
        } else {
            Ok(None)
        }
    }

    /// Replace the stored bio with `bio`
    pub fn save_bio(&self, bio: &ChatBio) -> Result<()> {
        let conn = self.get_conn()?;

        debug!("Storing bio '{}' ({} chars)", bio.name, bio.content.len());

        conn.execute(
            "INSERT OR REPLACE INTO bio (slot, id, name, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                BIO_SLOT,
                &bio.id,
                &bio.name,
                &bio.content,
                bio.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                bio.updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;

        info!("Saved bio {}", bio.id);
        Ok(())
    }

    pub fn delete_bio(&self) -> Result<bool> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM bio WHERE slot = ?1", [BIO_SLOT])?;
        Ok(deleted > 0)
    }

    fn row_to_bio(&self, row: &Row) -> Result<ChatBio> {
        let created_at: String = row.get(3)?;
        let updated_at: String = row.get(4)?;

        Ok(ChatBio {
            id: row.get(0)?,
            name: row.get(1)?,
            content: row.get(2)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
