// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use lovkit_core::{ControlId, ScopedStorage, StorageScope};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

pub const APP_NAME: &str = "lovkit";
pub const DB_PATH_ENV: &str = "LOVKIT_DB_PATH";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ui_state (
  scope_key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ui_state_updated_at ON ui_state (updated_at);
";

const REQUIRED_COLUMNS: [&str; 3] = ["scope_key", "value", "updated_at"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub scope_key: String,
    pub value: String,
    pub updated_at: OffsetDateTime,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    pub fn bootstrap(&self) -> Result<()> {
        if table_exists(&self.conn, "ui_state")? {
            validate_schema(&self.conn)?;
        }
        self.conn.execute_batch(SCHEMA).context("create schema")?;
        Ok(())
    }

    pub fn get_state(&self, scope_key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM ui_state WHERE scope_key = ?",
                params![scope_key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("read ui state {scope_key}"))
    }

    pub fn put_state(&self, scope_key: &str, value: &str) -> Result<()> {
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "
                INSERT INTO ui_state (scope_key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(scope_key) DO UPDATE SET
                  value = excluded.value,
                  updated_at = excluded.updated_at
                ",
                params![scope_key, value, now],
            )
            .with_context(|| format!("upsert ui state {scope_key}"))?;
        debug!(scope_key, "ui state written");
        Ok(())
    }

    pub fn list_state(&self, prefix: &str) -> Result<Vec<StateEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT scope_key, value, updated_at
                FROM ui_state
                WHERE substr(scope_key, 1, length(?1)) = ?1
                ORDER BY scope_key ASC
                ",
            )
            .context("prepare ui state listing")?;
        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("list ui state")?;

        let mut entries = Vec::new();
        for row in rows {
            let (scope_key, value, updated_at) = row.context("decode ui state row")?;
            entries.push(StateEntry {
                updated_at: parse_datetime(&updated_at)
                    .with_context(|| format!("parse updated_at for {scope_key}"))?,
                scope_key,
                value,
            });
        }
        Ok(entries)
    }

    // Drops everything remembered for one control, or for the whole page
    // when no control is given.
    pub fn forget(&self, scope: &StorageScope, control: Option<&ControlId>) -> Result<usize> {
        let prefix = scope_prefix(scope, control);
        let removed = self
            .conn
            .execute(
                "DELETE FROM ui_state WHERE substr(scope_key, 1, length(?1)) = ?1",
                params![prefix],
            )
            .with_context(|| format!("delete ui state under {prefix}"))?;
        debug!(prefix = %prefix, removed, "ui state forgotten");
        Ok(removed)
    }
}

impl ScopedStorage for Store {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.get_state(key)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.put_state(key, value)
    }
}

impl ScopedStorage for &Store {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.get_state(key)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.put_state(key, value)
    }
}

pub fn scope_prefix(scope: &StorageScope, control: Option<&ControlId>) -> String {
    match control {
        Some(control) => {
            let key = scope.key(control, "");
            key.trim_end_matches('.').to_owned() + "."
        }
        None => format!("lovkit.{}.{}.{}.", scope.app, scope.page, scope.user),
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os(DB_PATH_ENV) {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set {DB_PATH_ENV} to a writable database path")
    })?;

    let app_dir = data_root.join(APP_NAME);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!("create data directory {}", app_dir.display()))?;
    Ok(app_dir.join("lovkit.db"))
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!(
            "database path {path:?} contains '?'; remove query parameters and use a plain file path"
        );
    }

    Ok(())
}

fn validate_schema(conn: &Connection) -> Result<()> {
    let columns = table_columns(conn, "ui_state")?;
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !columns.contains(*column))
        .collect();
    if !missing.is_empty() {
        bail!(
            "table `ui_state` is missing required columns: {}; delete the database file or point storage.db_path elsewhere",
            missing.join(", ")
        );
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "
            SELECT EXISTS(
              SELECT 1
              FROM sqlite_master
              WHERE type = 'table' AND name = ?
            )
            ",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("check table existence for {table}"))?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("inspect columns for {table}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("query column info for {table}"))?;
    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .with_context(|| format!("collect columns for {table}"))
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format current timestamp")
}

fn parse_datetime(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).with_context(|| format!("invalid timestamp {raw:?}"))
}
