use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use time::OffsetDateTime;
use tracing::debug;

use crate::contact::Contact;
use crate::search;

/// Local record store for contacts, keyed by email.
///
/// Implementations are owned by the sync controller and only touched from the
/// controller's task.
pub trait ContactStore {
    /// Insert or replace the contact stored under `contact.email`.
    fn upsert_contact(&mut self, contact: &Contact) -> Result<()>;

    /// `limit` contacts starting at `offset`, ordered by family name.
    fn fetch_window(&self, offset: usize, limit: usize) -> Result<Vec<Contact>>;

    /// Contacts whose first name, last name or email contains `query`,
    /// case-insensitively, ordered by family name.
    fn search(&self, query: &str) -> Result<Vec<Contact>>;

    fn get_contact(&self, email: &str) -> Result<Option<CachedContact>>;

    fn count(&self) -> Result<usize>;

    fn clear_all(&mut self) -> Result<()>;
}

/// A contact as read back from the cache, with the time it was last written.
#[derive(Debug, Clone)]
pub struct CachedContact {
    pub contact: Contact,
    pub last_updated: i64,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create cache directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open cache database {}", path.display()))?;
        let mut db = Self { conn };
        db.setup()?;
        debug!(path = %path.display(), "opened contact cache");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.setup()?;
        Ok(db)
    }

    fn setup(&mut self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
              email        TEXT PRIMARY KEY,
              first_name   TEXT NOT NULL,
              last_name    TEXT NOT NULL,
              first_norm   TEXT NOT NULL,
              last_norm    TEXT NOT NULL,
              email_norm   TEXT NOT NULL,
              data         TEXT NOT NULL,
              last_updated INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_contacts_last_name ON contacts(last_name COLLATE NOCASE);
        "#,
        )?;
        Ok(())
    }

    pub fn import<'a, I>(&mut self, contacts: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Contact>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut imported = 0;
        for contact in contacts {
            upsert_in(&tx, contact)?;
            imported += 1;
        }
        tx.commit()?;
        Ok(imported)
    }
}

impl ContactStore for Database {
    fn upsert_contact(&mut self, contact: &Contact) -> Result<()> {
        upsert_in(&self.conn, contact)
    }

    fn fetch_window(&self, offset: usize, limit: usize) -> Result<Vec<Contact>> {
        let mut stmt = self.conn.prepare(
            "SELECT data FROM contacts
             ORDER BY last_name COLLATE NOCASE, email
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], data_column)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(decode_data(&row?)?);
        }
        Ok(out)
    }

    fn search(&self, query: &str) -> Result<Vec<Contact>> {
        let Some(normalized) = search::normalize_query(query) else {
            return self.fetch_window(0, usize::MAX >> 1);
        };
        let pattern = search::like_pattern(&normalized);

        let mut stmt = self.conn.prepare(
            r#"SELECT data FROM contacts
               WHERE first_norm LIKE ?1 ESCAPE '\'
                  OR last_norm LIKE ?1 ESCAPE '\'
                  OR email_norm LIKE ?1 ESCAPE '\'
               ORDER BY last_name COLLATE NOCASE, email"#,
        )?;
        let rows = stmt.query_map([pattern.as_str()], data_column)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(decode_data(&row?)?);
        }
        Ok(out)
    }

    fn get_contact(&self, email: &str) -> Result<Option<CachedContact>> {
        let row = self
            .conn
            .query_row(
                "SELECT data, last_updated FROM contacts WHERE email = ?1",
                [email],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        match row {
            Some((data, last_updated)) => Ok(Some(CachedContact {
                contact: decode_data(&data)?,
                last_updated,
            })),
            None => Ok(None),
        }
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn clear_all(&mut self) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM contacts", [])?;
        tx.commit()?;
        Ok(())
    }
}

/// `Transaction` derefs to `Connection`, so this serves both single upserts
/// and batched imports.
fn upsert_in(conn: &Connection, contact: &Contact) -> Result<()> {
    let data = serde_json::to_string(contact).context("failed to serialize contact")?;
    let now = OffsetDateTime::now_utc().unix_timestamp();

    conn.execute(
        r#"
        INSERT INTO contacts (email, first_name, last_name, first_norm, last_norm, email_norm, data, last_updated)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(email) DO UPDATE SET
          first_name=excluded.first_name,
          last_name=excluded.last_name,
          first_norm=excluded.first_norm,
          last_norm=excluded.last_norm,
          email_norm=excluded.email_norm,
          data=excluded.data,
          last_updated=excluded.last_updated
    "#,
        params![
            contact.email,
            contact.name.first,
            contact.name.last,
            search::normalize(&contact.name.first),
            search::normalize(&contact.name.last),
            search::normalize(&contact.email),
            data,
            now,
        ],
    )
    .with_context(|| format!("failed to upsert contact {}", contact.email))?;
    Ok(())
}

fn data_column(row: &Row<'_>) -> rusqlite::Result<String> {
    row.get(0)
}

fn decode_data(data: &str) -> Result<Contact> {
    serde_json::from_str(data).context("cached contact is not valid JSON")
}
