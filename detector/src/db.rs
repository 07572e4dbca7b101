use rusqlite::{params, Connection, Result as SqlResult};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Per-camera SQLite database of capture metadata.
///
/// One file per camera: `{db_dir}/{camera_id}.db`. The detector writes it,
/// the history api reads it; WAL mode lets both run at once.
pub struct CaptureDb {
    conn: Mutex<Connection>,
    camera_id: String,
}

/// Metadata of one stored capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub trigger: String,
    pub side: Option<String>,
    pub angle_deg: Option<f64>,
    pub captured_at_ms: i64,
    pub frame_seq: u64,
    pub object_key: String,
    pub size_bytes: u64,
}

impl CaptureDb {
    /// Open (or create) the SQLite database for a given camera.
    /// Creates `db_dir` if it does not exist.
    pub fn open(db_dir: &Path, camera_id: &str) -> SqlResult<Self> {
        std::fs::create_dir_all(db_dir)
            .map_err(|_e| rusqlite::Error::InvalidPath(db_dir.into()))?;

        let db_path = db_dir.join(format!("{camera_id}.db"));
        let conn = Connection::open(&db_path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS captures (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                camera_id       TEXT    NOT NULL,
                trigger_kind    TEXT    NOT NULL CHECK(trigger_kind IN ('arm_angle','full_body','manual')),
                side            TEXT,
                angle_deg       REAL,
                captured_at_ms  INTEGER NOT NULL,
                frame_seq       INTEGER NOT NULL,
                object_key      TEXT    NOT NULL,
                size_bytes      INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_captures_time
                ON captures(camera_id, captured_at_ms);",
        )?;

        info!(path = db_path.display().to_string(), camera_id, "SQLite database opened");

        Ok(Self {
            conn: Mutex::new(conn),
            camera_id: camera_id.to_string(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Insert one capture. Returns the new row id.
    pub fn insert_capture(&self, record: &CaptureRecord) -> SqlResult<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO captures
             (camera_id, trigger_kind, side, angle_deg, captured_at_ms, frame_seq, object_key, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.camera_id,
                record.trigger,
                record.side,
                record.angle_deg,
                record.captured_at_ms,
                record.frame_seq as i64,
                record.object_key,
                record.size_bytes as i64
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, key = record.object_key, trigger = record.trigger, "inserted capture");
        Ok(id)
    }

    /// Drop the rows of captures whose objects were evicted.
    pub fn delete_by_keys(&self, keys: &[String]) -> SqlResult<usize> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("DELETE FROM captures WHERE object_key = ?1 AND camera_id = ?2")?;
        let mut deleted = 0;
        for key in keys {
            deleted += stmt.execute(params![key, self.camera_id])?;
        }
        Ok(deleted)
    }

    pub fn count(&self) -> SqlResult<i64> {
        let conn = self.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM captures WHERE camera_id = ?1",
            params![self.camera_id],
            |row| row.get(0),
        )
    }

    /// Most recent capture, newest first.
    pub fn latest(&self) -> SqlResult<Option<CaptureRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT trigger_kind, side, angle_deg, captured_at_ms, frame_seq, object_key, size_bytes
             FROM captures WHERE camera_id = ?1
             ORDER BY captured_at_ms DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![self.camera_id], |row| {
            Ok(CaptureRecord {
                trigger: row.get(0)?,
                side: row.get(1)?,
                angle_deg: row.get(2)?,
                captured_at_ms: row.get(3)?,
                frame_seq: row.get::<_, i64>(4)? as u64,
                object_key: row.get(5)?,
                size_bytes: row.get::<_, i64>(6)? as u64,
            })
        })?;
        Ok(rows.next().transpose()?)
    }
}
