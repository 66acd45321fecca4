use crate::error::LoadError;
use chrono::Utc;
use log::debug;
use rusqlite::{Connection, OptionalExtension, Result as SqlResult};
use std::path::PathBuf;
use std::sync::Mutex;

/// One durable row per successfully cached image, used to rehydrate the feed
/// offline and to look up disk-cache paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    pub author: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub cache_path: String,
    pub starred: bool,
}

/// The PhotoIndex manages the SQLite catalog of cached photos.
///
/// `url` is unique: inserting an already-indexed photo is a no-op. Worker
/// threads share one connection behind a mutex, so writes serialize in the
/// store.
pub struct PhotoIndex {
    conn: Mutex<Connection>,
}

impl PhotoIndex {
    /// Open (or create) the index at `db_path` and initialize the schema.
    /// Failure to create the parent directory is fatal for the instance.
    pub fn open(db_path: PathBuf) -> Result<Self, LoadError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LoadError::Persistence(format!("create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(&db_path)?;
        debug!("PhotoIndex: database at {}", db_path.display());
        Self::init_schema(&conn)?;
        Ok(PhotoIndex {
            conn: Mutex::new(conn),
        })
    }

    /// Open the index in the user's data directory,
    /// e.g. ~/.local/share/photofeed/photofeed.db on Linux
    pub fn open_default() -> Result<Self, LoadError> {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| LoadError::State("could not determine user data directory".into()))?;
        path.push("photofeed");
        path.push("photofeed.db");
        Self::open(path)
    }

    /// In-memory index, used by tests
    pub fn open_in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(PhotoIndex {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> SqlResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS photos (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                author      TEXT NOT NULL,
                url         TEXT NOT NULL UNIQUE,
                width       INTEGER NOT NULL,
                height      INTEGER NOT NULL,
                cache_path  TEXT NOT NULL,
                starred     INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_photos_created_at
             ON photos(created_at DESC)",
            [],
        )?;
        Ok(())
    }

    /// Record a cached photo. A no-op when the URL is already indexed.
    pub fn add_if_absent(
        &self,
        author: &str,
        url: &str,
        width: u32,
        height: u32,
        cache_path: &str,
    ) -> Result<(), LoadError> {
        if author.is_empty() || url.is_empty() || cache_path.is_empty() || width == 0 || height == 0
        {
            return Err(LoadError::State(
                "author, url and cache_path must be non-empty and dimensions non-zero".into(),
            ));
        }
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO photos (author, url, width, height, cache_path, starred, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            rusqlite::params![author, url, width, height, cache_path, Utc::now().timestamp()],
        )?;
        if inserted == 0 {
            debug!("PhotoIndex: {} already indexed", url);
        }
        Ok(())
    }

    /// Whether a row exists for the URL
    pub fn exists(&self, url: &str) -> SqlResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM photos WHERE url = ?1",
            [url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Disk-cache path recorded for the URL, if any
    pub fn cache_path(&self, url: &str) -> SqlResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT cache_path FROM photos WHERE url = ?1",
            [url],
            |row| row.get(0),
        )
        .optional()
    }

    /// All indexed photos, newest first (offline rehydration)
    pub fn all_photos(&self) -> SqlResult<Vec<PhotoRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT author, url, width, height, cache_path, starred
             FROM photos ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PhotoRecord {
                author: row.get(0)?,
                url: row.get(1)?,
                width: row.get(2)?,
                height: row.get(3)?,
                cache_path: row.get(4)?,
                starred: row.get::<_, i64>(5)? != 0,
            })
        })?;

        let mut photos = Vec::new();
        for record in rows {
            photos.push(record?);
        }
        Ok(photos)
    }

    /// Flip the starred flag for a URL
    pub fn set_starred(&self, url: &str, starred: bool) -> SqlResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE photos SET starred = ?1 WHERE url = ?2",
            rusqlite::params![starred as i64, url],
        )?;
        Ok(())
    }

    /// Drop the row for a URL, if present
    pub fn remove(&self, url: &str) -> SqlResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM photos WHERE url = ?1", [url])?;
        Ok(())
    }

    /// Number of indexed photos
    pub fn count(&self) -> SqlResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))
    }
}

impl std::fmt::Debug for PhotoIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoIndex")
            .field("photos", &self.count().unwrap_or(-1))
            .finish()
    }
}
