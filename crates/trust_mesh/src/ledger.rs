//! Trust Ledger Module
//!
//! Keeps the latest trust link per (issuer, subject) pair, optionally
//! persisted to SQLite so the web of trust survives restarts.

use hypercorn_core::{current_timestamp_secs, FeedKey};
use hypercorn_crypto::TrustLink;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::store::{Result, TrustStore, TrustStoreError};

/// A recorded trust link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub issuer: FeedKey,
    pub subject: FeedKey,
    /// Unix seconds
    pub expires_at: u64,
    /// Encoded link as issued
    pub link: Vec<u8>,
    /// Unix seconds at which this node recorded the link
    pub recorded_at: u64,
}

impl TrustRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// State of the trust ledger
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    /// Records indexed by (issuer, subject)
    records: HashMap<(FeedKey, FeedKey), TrustRecord>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `record` would replace what is stored for its pair
    fn supersedes(&self, record: &TrustRecord) -> bool {
        self.records
            .get(&(record.issuer, record.subject))
            .map_or(true, |current| record.expires_at > current.expires_at)
    }

    /// Insert unless an equal or longer-lived record exists
    pub fn insert(&mut self, record: TrustRecord) -> bool {
        if !self.supersedes(&record) {
            return false;
        }
        self.records.insert((record.issuer, record.subject), record);
        true
    }

    pub fn get(&self, issuer: &FeedKey, subject: &FeedKey) -> Option<&TrustRecord> {
        self.records.get(&(*issuer, *subject))
    }

    /// All records issued by `issuer`, ordered by subject
    pub fn links_from(&self, issuer: &FeedKey) -> Vec<&TrustRecord> {
        let mut links: Vec<_> = self
            .records
            .values()
            .filter(|r| r.issuer == *issuer)
            .collect();
        links.sort_by_key(|r| r.subject);
        links
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Trust store backed by an in-memory index and an optional SQLite table
pub struct TrustLedger {
    state: Mutex<LedgerState>,
    db: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

impl TrustLedger {
    /// Ledger without persistence
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LedgerState::new()),
            db: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Create or open a persistent ledger at `path`, loading stored links.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trust_links (
                issuer BLOB NOT NULL,
                subject BLOB NOT NULL,
                expires_at INTEGER NOT NULL,
                link BLOB NOT NULL,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (issuer, subject)
            );
            "#,
        )?;

        let state = Self::load(&conn)?;
        info!(path = %path.display(), links = state.len(), "Opened trust ledger");

        Ok(Self {
            state: Mutex::new(state),
            db: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
        })
    }

    fn load(conn: &Connection) -> Result<LedgerState> {
        let mut stmt =
            conn.prepare("SELECT issuer, subject, expires_at, link, recorded_at FROM trust_links")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut state = LedgerState::new();
        for row in rows {
            let (issuer, subject, expires_at, link, recorded_at) = row?;
            match (FeedKey::from_slice(&issuer), FeedKey::from_slice(&subject)) {
                (Ok(issuer), Ok(subject)) => {
                    state.insert(TrustRecord {
                        issuer,
                        subject,
                        expires_at: expires_at as u64,
                        link,
                        recorded_at: recorded_at as u64,
                    });
                }
                _ => warn!("Skipping stored trust link with malformed keys"),
            }
        }
        Ok(state)
    }

    fn state(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state.lock().map_err(|_| TrustStoreError::Poisoned)
    }

    fn persist(&self, record: &TrustRecord) -> Result<()> {
        let db = self.db.lock().map_err(|_| TrustStoreError::Poisoned)?;
        if let Some(conn) = db.as_ref() {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO trust_links (issuer, subject, expires_at, link, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.issuer.as_bytes().as_slice(),
                    record.subject.as_bytes().as_slice(),
                    record.expires_at as i64,
                    record.link,
                    record.recorded_at as i64,
                ],
            )?;
        }
        Ok(())
    }

    pub fn get(&self, issuer: &FeedKey, subject: &FeedKey) -> Option<TrustRecord> {
        self.state().ok()?.get(issuer, subject).cloned()
    }

    pub fn links_from(&self, issuer: &FeedKey) -> Vec<TrustRecord> {
        self.state()
            .map(|state| state.links_from(issuer).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `issuer` currently vouches for `subject`
    pub fn is_trusted(&self, issuer: &FeedKey, subject: &FeedKey, now: u64) -> bool {
        self.get(issuer, subject)
            .is_some_and(|record| !record.is_expired(now))
    }

    /// Subjects `issuer` vouches for at `now`
    pub fn trusted_by(&self, issuer: &FeedKey, now: u64) -> Vec<FeedKey> {
        self.links_from(issuer)
            .into_iter()
            .filter(|record| !record.is_expired(now))
            .map(|record| record.subject)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state().map(|state| state.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TrustStore for TrustLedger {
    fn add_link(&self, issuer: FeedKey, link: &TrustLink) -> Result<bool> {
        if self.is_closed() {
            return Err(TrustStoreError::Closed);
        }

        link.verify()?;
        if link.issuer() != issuer {
            return Err(TrustStoreError::IssuerMismatch {
                attributed: issuer,
                signer: link.issuer(),
            });
        }

        let record = TrustRecord {
            issuer,
            subject: link.subject(),
            expires_at: link.expires_at(),
            link: link.to_bytes(),
            recorded_at: current_timestamp_secs(),
        };

        let mut state = self.state()?;
        if !state.supersedes(&record) {
            debug!(issuer = %issuer, subject = %record.subject, "Trust link already recorded");
            return Ok(false);
        }
        self.persist(&record)?;

        info!(
            issuer = %issuer,
            subject = %record.subject,
            expires_at = record.expires_at,
            "Trust link recorded"
        );
        state.insert(record);
        Ok(true)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let conn = self
            .db
            .lock()
            .map_err(|_| TrustStoreError::Poisoned)?
            .take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| TrustStoreError::Database(e))?;
        }
        debug!("Trust ledger closed");
        Ok(())
    }
}
