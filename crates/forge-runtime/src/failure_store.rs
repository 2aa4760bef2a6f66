//! `FailureStore` (§4.3): signature-normalized failure memory, backed by
//! `failures.db` (SQLite via `rusqlite`), indexed on `signature_hash`,
//! `tool`, `last_seen`.
//!
//! The normalization algorithm has no teacher analogue (the teacher's
//! `patterns` module tracks phase-type statistics, not error-message
//! signatures) — authored fresh to §4.3's 7 ordered rules using `regex`
//! + `sha2`, both already teacher dependencies.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use forge_common::FailureRecord;
use regex::Regex;
use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};

/// §4.3's `success_probability` penalty looks at occurrences within this
/// trailing window, not the all-time total.
const OCCURRENCE_WINDOW_DAYS: i64 = 30;

use once_cell_lite::Lazy;

mod once_cell_lite {
    use std::sync::OnceLock;

    /// Minimal lazy-static substitute: the teacher's dependency set has
    /// no `once_cell`/`lazy_static`, so this mirrors `std::sync::OnceLock`
    /// directly rather than pulling in a new crate for three regexes.
    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self { cell: OnceLock::new(), init }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}

static PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:/[A-Za-z0-9_.\-]+){2,}").unwrap());
static LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)line\s+\d+").unwrap());
static PORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)port\s+\d+").unwrap());
static INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3,}\b").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Apply the 7 ordered normalization rules (§4.3) and return the final
/// sha256 hex digest. Order matters: path substitution must run before
/// the generic integer-collapse rule or path components with 3+ digits
/// would be half-replaced.
pub fn normalize_signature(message: &str) -> String {
    let mut s = message.to_lowercase();
    s = PATH_RE.replace_all(&s, "<path>").to_string();
    s = LINE_RE.replace_all(&s, "line <n>").to_string();
    s = PORT_RE.replace_all(&s, "port <num>").to_string();
    s = INT_RE.replace_all(&s, "<num>").to_string();
    s = WS_RE.replace_all(&s, " ").trim().to_string();

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct FailureStore {
    conn: Mutex<Connection>,
}

impl FailureStore {
    pub fn open(state_root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(state_root)?;
        let conn = Connection::open(state_root.join("failures.db"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS failures (
                signature_hash TEXT PRIMARY KEY,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                occurrences INTEGER NOT NULL,
                tool TEXT NOT NULL,
                error_kind TEXT NOT NULL,
                suggested_remedy TEXT,
                remedy_success_count INTEGER NOT NULL,
                remedy_attempt_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_failures_tool ON failures(tool);
            CREATE INDEX IF NOT EXISTS idx_failures_last_seen ON failures(last_seen);
            CREATE TABLE IF NOT EXISTS failure_events (
                signature_hash TEXT NOT NULL,
                ts TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_failure_events_sig ON failure_events(signature_hash);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE failures (
                signature_hash TEXT PRIMARY KEY,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                occurrences INTEGER NOT NULL,
                tool TEXT NOT NULL,
                error_kind TEXT NOT NULL,
                suggested_remedy TEXT,
                remedy_success_count INTEGER NOT NULL,
                remedy_attempt_count INTEGER NOT NULL
            );
            CREATE TABLE failure_events (
                signature_hash TEXT NOT NULL,
                ts TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Upsert on signature hash: increment occurrences + bump last_seen
    /// if present, insert fresh otherwise. Called after every failed
    /// Observation.
    pub fn record_failure(&self, tool: &str, error_kind: &str, message: &str) -> anyhow::Result<String> {
        let sig = normalize_signature(message);
        let conn = self.conn.lock().expect("failures db poisoned");
        let now = Utc::now().to_rfc3339();
        let existing: Option<u64> = conn
            .query_row(
                "SELECT occurrences FROM failures WHERE signature_hash = ?1",
                params![sig],
                |r| r.get(0),
            )
            .ok();
        match existing {
            Some(count) => {
                conn.execute(
                    "UPDATE failures SET occurrences = ?1, last_seen = ?2 WHERE signature_hash = ?3",
                    params![count + 1, now, sig],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO failures (signature_hash, first_seen, last_seen, occurrences, tool,
                     error_kind, suggested_remedy, remedy_success_count, remedy_attempt_count)
                     VALUES (?1, ?2, ?2, 1, ?3, ?4, NULL, 0, 0)",
                    params![sig, now, tool, error_kind],
                )?;
            }
        }
        conn.execute(
            "INSERT INTO failure_events (signature_hash, ts) VALUES (?1, ?2)",
            params![sig, now],
        )?;
        Ok(sig)
    }

    /// Occurrences of `signature_hash` within the trailing
    /// `OCCURRENCE_WINDOW_DAYS` (§4.3) — what `success_probability`'s
    /// penalty is actually based on, unlike the lifetime `occurrences`
    /// counter on the `failures` row.
    fn occurrences_in_window(&self, conn: &Connection, signature_hash: &str) -> anyhow::Result<i64> {
        let cutoff = (Utc::now() - Duration::days(OCCURRENCE_WINDOW_DAYS)).to_rfc3339();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM failure_events WHERE signature_hash = ?1 AND ts >= ?2",
            params![signature_hash, cutoff],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Record that a remedy was attempted (and whether it succeeded) for
    /// a given signature — called on the next execution with the same
    /// signature in the same session.
    pub fn record_remedy_outcome(&self, signature_hash: &str, succeeded: bool) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("failures db poisoned");
        if succeeded {
            conn.execute(
                "UPDATE failures SET remedy_attempt_count = remedy_attempt_count + 1,
                 remedy_success_count = remedy_success_count + 1 WHERE signature_hash = ?1",
                params![signature_hash],
            )?;
        } else {
            conn.execute(
                "UPDATE failures SET remedy_attempt_count = remedy_attempt_count + 1
                 WHERE signature_hash = ?1",
                params![signature_hash],
            )?;
        }
        Ok(())
    }

    pub fn set_suggested_remedy(&self, signature_hash: &str, remedy: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("failures db poisoned");
        conn.execute(
            "UPDATE failures SET suggested_remedy = ?1 WHERE signature_hash = ?2",
            params![remedy, signature_hash],
        )?;
        Ok(())
    }

    /// Records similar to `(tool, user_input)`'s normalized signature,
    /// sorted by occurrences descending.
    pub fn similar(&self, tool: &str, user_input: &str) -> anyhow::Result<Vec<FailureRecord>> {
        let sig = normalize_signature(user_input);
        let conn = self.conn.lock().expect("failures db poisoned");
        let mut stmt = conn.prepare(
            "SELECT signature_hash, first_seen, last_seen, occurrences, tool, error_kind,
             suggested_remedy, remedy_success_count, remedy_attempt_count
             FROM failures WHERE tool = ?1 OR signature_hash = ?2
             ORDER BY occurrences DESC",
        )?;
        let rows = stmt.query_map(params![tool, sig], row_to_record)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// `success_probability` per §4.3's exact formula.
    pub fn success_probability(&self, tool: &str, user_input: &str) -> anyhow::Result<f64> {
        let sig = normalize_signature(user_input);
        let conn = self.conn.lock().expect("failures db poisoned");
        let row: Option<(Option<String>, i64, i64)> = conn
            .query_row(
                "SELECT suggested_remedy, remedy_success_count, remedy_attempt_count
                 FROM failures WHERE tool = ?1 AND signature_hash = ?2",
                params![tool, sig],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .ok();

        let Some((remedy, success, attempt)) = row else {
            return Ok(0.95);
        };
        let occurrences = self.occurrences_in_window(&conn, &sig)?;

        let base = 0.95_f64;
        let penalty = 0.15 * (occurrences as f64).min(4.0);
        let mut prob = (base - penalty).max(0.05);

        if remedy.is_some() && attempt > 0 && (success as f64 / attempt as f64) >= 0.5 {
            prob = (prob * 1.2).min(0.95);
        }
        Ok(prob)
    }
}

fn row_to_record(r: &rusqlite::Row) -> rusqlite::Result<FailureRecord> {
    let first_seen: String = r.get(1)?;
    let last_seen: String = r.get(2)?;
    Ok(FailureRecord {
        signature_hash: r.get(0)?,
        first_seen: DateTime::parse_from_rfc3339(&first_seen)
            .unwrap()
            .with_timezone(&Utc),
        last_seen: DateTime::parse_from_rfc3339(&last_seen)
            .unwrap()
            .with_timezone(&Utc),
        occurrences: r.get::<_, i64>(3)? as u64,
        tool: r.get(4)?,
        error_kind: r.get(5)?,
        suggested_remedy: r.get(6)?,
        remedy_success_count: r.get::<_, i64>(7)? as u64,
        remedy_attempt_count: r.get::<_, i64>(8)? as u64,
    })
}
