//! SQLite feed storage - one append-only database per feed
//!
//! Layout: `<root>/<hex feed key>/log.db`, opened in WAL mode.
//!
//! # Guarantees
//!
//! - Strict ordering: entry indexes start at 0 and increase by 1
//! - Append-only: no updates or deletes of entries
//! - Reply annotations are deduplicated by (target, feed, index)

use hypercorn_core::{FeedKey, ReplyRef};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::backend::{LogBackend, LogStorage};
use crate::error::{FeedError, Result};

/// Log storage for one feed
pub struct SqliteLog {
    conn: Connection,
    key: FeedKey,
}

impl SqliteLog {
    pub fn open(path: impl AsRef<Path>, key: FeedKey) -> Result<Self> {
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

        Self::init_schema(&conn)?;

        debug!(feed = %key, path = %path.display(), "Opened feed log");
        Ok(Self { conn, key })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS feed_entries (
                seq INTEGER PRIMARY KEY,
                payload BLOB NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS feed_replies (
                target_seq INTEGER NOT NULL,
                reply_feed BLOB NOT NULL,
                reply_seq INTEGER NOT NULL,
                PRIMARY KEY (target_seq, reply_feed, reply_seq)
            );
            "#,
        )?;
        Ok(())
    }
}

impl LogStorage for SqliteLog {
    fn len(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM feed_entries", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn append(&mut self, entry: &[u8]) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM feed_entries",
            [],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO feed_entries (seq, payload) VALUES (?1, ?2)",
            params![next, entry],
        )?;
        tx.commit()?;

        debug!(feed = %self.key, seq = next, "Entry appended");
        Ok(next as u64)
    }

    fn get(&self, index: u64) -> Result<Option<Vec<u8>>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM feed_entries WHERE seq = ?1",
                [index as i64],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn add_reply(&mut self, index: u64, reply: ReplyRef) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO feed_replies (target_seq, reply_feed, reply_seq) VALUES (?1, ?2, ?3)",
            params![
                index as i64,
                reply.feed_key.as_bytes().as_slice(),
                reply.index as i64
            ],
        )?;
        Ok(inserted > 0)
    }

    fn replies(&self, index: u64) -> Result<Vec<ReplyRef>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT reply_feed, reply_seq FROM feed_replies
            WHERE target_seq = ?1
            ORDER BY rowid
            "#,
        )?;
        let rows = stmt.query_map([index as i64], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut replies = Vec::new();
        for row in rows {
            let (feed, seq) = row?;
            let feed_key =
                FeedKey::from_slice(&feed).map_err(|e| FeedError::Backend(e.to_string()))?;
            replies.push(ReplyRef::new(feed_key, seq as u64));
        }
        Ok(replies)
    }
}

/// SQLite-backed log storage rooted at a directory
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    root: PathBuf,
}

impl SqliteBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!(path = %root.display(), "Using SQLite feed storage");
        Self { root }
    }

    pub fn log_path(&self, key: &FeedKey) -> PathBuf {
        self.root.join(key.to_hex()).join("log.db")
    }
}

impl LogBackend for SqliteBackend {
    fn open_log(&self, key: &FeedKey) -> Result<Box<dyn LogStorage>> {
        Ok(Box::new(SqliteLog::open(self.log_path(key), *key)?))
    }

    fn open_existing(&self, key: &FeedKey) -> Result<Option<Box<dyn LogStorage>>> {
        let path = self.log_path(key);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Box::new(SqliteLog::open(path, *key)?)))
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("hypercorn_feeds_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_layout_uses_hex_key() {
        let root = temp_root();
        let backend = SqliteBackend::new(&root);
        let key = FeedKey::from_bytes([0xab; 32]);

        backend.open_log(&key).unwrap();
        assert!(root.join(key.to_hex()).join("log.db").exists());

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_open_existing_leaves_no_files() {
        let root = temp_root();
        let backend = SqliteBackend::new(&root);
        let key = FeedKey::from_bytes([0xcd; 32]);

        assert!(backend.open_existing(&key).unwrap().is_none());
        assert!(!root.join(key.to_hex()).exists());

        backend.open_log(&key).unwrap();
        assert!(backend.open_existing(&key).unwrap().is_some());

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_append_is_contiguous_and_durable() {
        let root = temp_root();
        let backend = SqliteBackend::new(&root);
        let key = FeedKey::from_bytes([1; 32]);

        {
            let mut log = backend.open_log(&key).unwrap();
            for i in 0..5u64 {
                assert_eq!(log.append(format!("entry-{}", i).as_bytes()).unwrap(), i);
            }
        }

        let log = backend.open_log(&key).unwrap();
        assert_eq!(log.len().unwrap(), 5);
        assert_eq!(log.get(3).unwrap().unwrap(), b"entry-3".to_vec());
        assert!(log.get(5).unwrap().is_none());

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_replies_round_trip_in_order() {
        let root = temp_root();
        let backend = SqliteBackend::new(&root);
        let mut log = backend.open_log(&FeedKey::from_bytes([2; 32])).unwrap();

        let first = ReplyRef::new(FeedKey::from_bytes([7; 32]), 4);
        let second = ReplyRef::new(FeedKey::from_bytes([8; 32]), 0);
        assert!(log.add_reply(5, first).unwrap());
        assert!(log.add_reply(5, second).unwrap());
        assert!(!log.add_reply(5, first).unwrap());

        assert_eq!(log.replies(5).unwrap(), vec![first, second]);

        std::fs::remove_dir_all(root).ok();
    }
}
