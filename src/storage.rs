use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::Coordinates;

const LAST_LOCATION_KEY: &str = "last_location";

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoUrlEntry {
    pub post_id: String,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private database, gone when the store is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("storage: open in-memory database")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn add_blacklisted(&self, post_id: &str) -> Result<()> {
        if post_id.trim().is_empty() {
            bail!("storage: post id required");
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO blacklist (post_id, added_at) VALUES (?1, ?2)",
            params![post_id, Utc::now().timestamp()],
        )
        .context("storage: insert blacklist entry")?;
        Ok(())
    }

    pub fn remove_blacklisted(&self, post_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM blacklist WHERE post_id = ?1", params![post_id])
            .context("storage: delete blacklist entry")?;
        Ok(())
    }

    /// Blacklisted post ids, oldest first.
    pub fn blacklisted_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT post_id FROM blacklist ORDER BY added_at ASC, rowid ASC")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
    }

    pub fn put_video_url(&self, post_id: &str, url: &str, ttl: Duration) -> Result<()> {
        if post_id.is_empty() || url.is_empty() {
            bail!("storage: post id and url required");
        }
        let fetched_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let expires_at = fetched_at + ttl;
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO video_urls (post_id, url, fetched_at, expires_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(post_id) DO UPDATE SET
  url = excluded.url,
  fetched_at = excluded.fetched_at,
  expires_at = excluded.expires_at
"#,
            params![
                post_id,
                url,
                fetched_at.timestamp(),
                expires_at.timestamp()
            ],
        )
        .context("storage: upsert video url")?;
        Ok(())
    }

    /// Cached URL for `post_id` unless it expired at or before `now`.
    pub fn get_video_url(&self, post_id: &str, now: DateTime<Utc>) -> Result<Option<VideoUrlEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT post_id, url, fetched_at, expires_at
FROM video_urls
WHERE post_id = ?1 AND expires_at > ?2
"#,
            params![post_id, now.timestamp()],
            video_url_from_row,
        )
        .optional()
        .context("storage: query video url")
    }

    pub fn purge_expired_video_urls(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM video_urls WHERE expires_at <= ?1",
                params![now.timestamp()],
            )
            .context("storage: purge expired video urls")?;
        Ok(removed)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
"#,
            params![key, value, Utc::now().timestamp()],
        )
        .context("storage: upsert setting")?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("storage: query setting")
    }

    pub fn save_last_location(&self, location: Coordinates) -> Result<()> {
        let encoded = serde_json::to_string(&location).context("storage: encode location")?;
        self.set_setting(LAST_LOCATION_KEY, &encoded)
    }

    pub fn last_location(&self) -> Result<Option<Coordinates>> {
        let Some(raw) = self.get_setting(LAST_LOCATION_KEY)? else {
            return Ok(None);
        };
        let location = serde_json::from_str(&raw).context("storage: decode location")?;
        Ok(Some(location))
    }
}

fn video_url_from_row(row: &Row<'_>) -> rusqlite::Result<VideoUrlEntry> {
    let fetched: i64 = row.get(2)?;
    let expires: i64 = row.get(3)?;
    Ok(VideoUrlEntry {
        post_id: row.get(0)?,
        url: row.get(1)?,
        fetched_at: Utc
            .timestamp_opt(fetched, 0)
            .single()
            .unwrap_or_else(Utc::now),
        expires_at: Utc
            .timestamp_opt(expires, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .with_context(|| format!("storage: apply migration {version}"))?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS blacklist (
  post_id TEXT PRIMARY KEY,
  added_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS video_urls (
  post_id TEXT PRIMARY KEY,
  url TEXT NOT NULL,
  fetched_at INTEGER NOT NULL,
  expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_video_urls_expires_at ON video_urls(expires_at);
"#,
        r#"
CREATE TABLE IF NOT EXISTS settings (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("reelfeed").join("state.db"))
}
