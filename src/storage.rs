//! Storage layer for Tangle: a single SQLite database plus row-level helpers.
//!
//! Every helper takes a `&Connection` so the same code runs against the bare
//! connection or inside a `Transaction` (which derefs to `Connection`).

use crate::types::{Dependency, DependencyInfo, Item, ItemType, LogEntry, Status};
use chrono::{DateTime, SecondsFormat, Utc};
use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::fs;
use std::path::{Path, PathBuf};

/// Storage directory name.
pub const TANGLE_DIR: &str = ".tangle";

/// SQLite database file.
pub const DB_FILE: &str = "tangle.db";

/// Bumped whenever the schema below changes shape.
const SCHEMA_VERSION: &str = "1";

/// Storage handle for reading/writing tangle data.
pub struct Storage {
    root: PathBuf,
    db: Connection,
}

impl Storage {
    /// Initialize storage in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        let tangle_dir = root.join(TANGLE_DIR);
        fs::create_dir_all(&tangle_dir).context("Failed to create .tangle directory")?;

        let db_path = tangle_dir.join(DB_FILE);
        let db = Connection::open(&db_path).context("Failed to open SQLite database")?;

        let storage = Self {
            root: root.to_path_buf(),
            db,
        };
        storage.init_schema()?;

        Ok(storage)
    }

    /// Open existing storage.
    pub fn open(root: &Path) -> Result<Self> {
        let tangle_dir = root.join(TANGLE_DIR);
        if !tangle_dir.exists() {
            eyre::bail!("No .tangle directory found. Run 'tg init' first.");
        }

        let db_path = tangle_dir.join(DB_FILE);
        let db = Connection::open(&db_path).context("Failed to open SQLite database")?;

        let storage = Self {
            root: root.to_path_buf(),
            db,
        };
        storage.init_schema()?;

        Ok(storage)
    }

    /// Store root (the directory holding `.tangle`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read access for queries that need no transaction.
    pub fn conn(&self) -> &Connection {
        &self.db
    }

    /// Run `f` inside one transaction. Commits only when `f` returns `Ok`;
    /// on `Err` the transaction is dropped, which rolls it back.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let tx = self.db.transaction().context("Failed to begin transaction")?;
        let value = f(&tx)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }

    /// Initialize SQLite schema.
    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch(
                r#"
                PRAGMA busy_timeout = 5000;

                CREATE TABLE IF NOT EXISTS items (
                    id TEXT PRIMARY KEY,
                    project TEXT NOT NULL,
                    item_type TEXT NOT NULL CHECK (item_type IN ('task', 'epic')),
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL CHECK (status IN ('open', 'in_progress', 'blocked', 'done', 'canceled')),
                    priority INTEGER NOT NULL CHECK (priority BETWEEN 0 AND 4),
                    parent_id TEXT,
                    agent_id TEXT,
                    agent_last_active TEXT,
                    results TEXT,
                    shared_context TEXT,
                    closing_instructions TEXT,
                    worktree_path TEXT,
                    worktree_branch TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_items_project ON items(project);
                CREATE INDEX IF NOT EXISTS idx_items_parent ON items(parent_id);

                CREATE TABLE IF NOT EXISTS dependencies (
                    item_id TEXT NOT NULL,
                    depends_on TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (item_id, depends_on),
                    CHECK (item_id != depends_on)
                );
                CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on);

                CREATE TABLE IF NOT EXISTS item_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    item_id TEXT NOT NULL,
                    message TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_item_logs_item ON item_logs(item_id);

                CREATE TABLE IF NOT EXISTS item_labels (
                    item_id TEXT NOT NULL,
                    label TEXT NOT NULL,
                    PRIMARY KEY (item_id, label)
                );
                CREATE INDEX IF NOT EXISTS idx_item_labels_label ON item_labels(label);

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
            "#,
            )
            .context("Failed to initialize schema")?;

        self.db
            .execute(
                "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?)",
                params![SCHEMA_VERSION],
            )
            .context("Failed to record schema version")?;

        Ok(())
    }
}

/// Filter for listing items. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub project: Option<String>,
    pub status: Option<Status>,
    pub item_type: Option<ItemType>,
    pub parent_id: Option<String>,
}

impl ItemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn item_type(mut self, item_type: ItemType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

const ITEM_COLUMNS: &str = "id, project, item_type, title, description, status, priority, parent_id, \
     agent_id, agent_last_active, results, shared_context, closing_instructions, \
     worktree_path, worktree_branch, created_at, updated_at";

/// Fixed-width timestamps so TEXT ordering matches time ordering.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            log::warn!("Unparseable timestamp {:?} in database", raw);
            DateTime::<Utc>::UNIX_EPOCH
        })
}

fn text_enum<T: std::str::FromStr>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Convert a database row to an Item.
fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<Item> {
    let item_type: ItemType = text_enum(2, row.get(2)?)?;
    let status: Status = text_enum(5, row.get(5)?)?;
    let agent_last_active: Option<String> = row.get(9)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    Ok(Item {
        id: row.get(0)?,
        project: row.get(1)?,
        item_type,
        title: row.get(3)?,
        description: row.get(4)?,
        status,
        priority: row.get(6)?,
        parent_id: row.get(7)?,
        agent_id: row.get(8)?,
        agent_last_active: agent_last_active.as_deref().map(parse_ts),
        results: row.get(10)?,
        shared_context: row.get(11)?,
        closing_instructions: row.get(12)?,
        worktree_path: row.get(13)?,
        worktree_branch: row.get(14)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

fn row_to_info(row: &rusqlite::Row) -> rusqlite::Result<DependencyInfo> {
    Ok(DependencyInfo {
        id: row.get(0)?,
        title: row.get(1)?,
        status: text_enum(2, row.get(2)?)?,
        item_type: text_enum(3, row.get(3)?)?,
    })
}

// =============================================================================
// Items
// =============================================================================

pub fn get_item(conn: &Connection, id: &str) -> Result<Option<Item>> {
    let sql = format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS);
    let item = conn
        .query_row(&sql, params![id], row_to_item)
        .optional()
        .with_context(|| format!("Failed to load item {}", id))?;
    Ok(item)
}

pub fn insert_item(conn: &Connection, item: &Item) -> Result<()> {
    let sql = format!(
        "INSERT INTO items ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        ITEM_COLUMNS
    );
    conn.execute(
        &sql,
        params![
            item.id,
            item.project,
            item.item_type.as_str(),
            item.title,
            item.description,
            item.status.as_str(),
            item.priority,
            item.parent_id,
            item.agent_id,
            item.agent_last_active.map(fmt_ts),
            item.results,
            item.shared_context,
            item.closing_instructions,
            item.worktree_path,
            item.worktree_branch,
            fmt_ts(item.created_at),
            fmt_ts(item.updated_at),
        ],
    )
    .with_context(|| format!("Failed to insert item {}", item.id))?;
    Ok(())
}

/// Write every mutable column of an existing row.
pub fn update_item(conn: &Connection, item: &Item) -> Result<()> {
    conn.execute(
        r#"
        UPDATE items SET
            project = ?, item_type = ?, title = ?, description = ?, status = ?, priority = ?,
            parent_id = ?, agent_id = ?, agent_last_active = ?, results = ?, shared_context = ?,
            closing_instructions = ?, worktree_path = ?, worktree_branch = ?, updated_at = ?
        WHERE id = ?
        "#,
        params![
            item.project,
            item.item_type.as_str(),
            item.title,
            item.description,
            item.status.as_str(),
            item.priority,
            item.parent_id,
            item.agent_id,
            item.agent_last_active.map(fmt_ts),
            item.results,
            item.shared_context,
            item.closing_instructions,
            item.worktree_path,
            item.worktree_branch,
            fmt_ts(item.updated_at),
            item.id,
        ],
    )
    .with_context(|| format!("Failed to update item {}", item.id))?;
    Ok(())
}

pub fn list_items(conn: &Connection, filter: &ItemFilter) -> Result<Vec<Item>> {
    let mut clauses = Vec::new();
    let mut values: Vec<String> = Vec::new();

    if let Some(project) = &filter.project {
        clauses.push("project = ?");
        values.push(project.clone());
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(status.as_str().to_string());
    }
    if let Some(item_type) = filter.item_type {
        clauses.push("item_type = ?");
        values.push(item_type.as_str().to_string());
    }
    if let Some(parent) = &filter.parent_id {
        clauses.push("parent_id = ?");
        values.push(parent.clone());
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM items {} ORDER BY priority ASC, created_at ASC, id ASC",
        ITEM_COLUMNS, where_clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), row_to_item)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to list items")?;
    Ok(items)
}

pub fn children(conn: &Connection, parent_id: &str) -> Result<Vec<Item>> {
    list_items(conn, &ItemFilter::new().parent(parent_id))
}

pub fn delete_item_row(conn: &Connection, id: &str) -> Result<bool> {
    let rows = conn
        .execute("DELETE FROM items WHERE id = ?", params![id])
        .with_context(|| format!("Failed to delete item {}", id))?;
    Ok(rows > 0)
}

pub fn reparent_children(conn: &Connection, from_parent: &str, to_parent: &str, now: DateTime<Utc>) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE items SET parent_id = ?, updated_at = ? WHERE parent_id = ? AND id != ?",
        params![to_parent, fmt_ts(now), from_parent, to_parent],
    )?;
    Ok(rows)
}

// =============================================================================
// Dependencies
// =============================================================================

/// Insert an edge; returns false when it already existed.
pub fn insert_dependency(conn: &Connection, item_id: &str, depends_on: &str, now: DateTime<Utc>) -> Result<bool> {
    let rows = conn
        .execute(
            "INSERT OR IGNORE INTO dependencies (item_id, depends_on, created_at) VALUES (?, ?, ?)",
            params![item_id, depends_on, fmt_ts(now)],
        )
        .with_context(|| format!("Failed to insert dependency {} -> {}", item_id, depends_on))?;
    Ok(rows > 0)
}

/// Delete an edge; returns false when there was nothing to delete.
pub fn delete_dependency(conn: &Connection, item_id: &str, depends_on: &str) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM dependencies WHERE item_id = ? AND depends_on = ?",
        params![item_id, depends_on],
    )?;
    Ok(rows > 0)
}

pub fn dependency_exists(conn: &Connection, item_id: &str, depends_on: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dependencies WHERE item_id = ? AND depends_on = ?",
        params![item_id, depends_on],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// IDs `item_id` depends on.
pub fn dependency_ids(conn: &Connection, item_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT depends_on FROM dependencies WHERE item_id = ? ORDER BY depends_on")?;
    let ids = stmt
        .query_map(params![item_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// IDs that depend on `item_id`.
pub fn dependent_ids(conn: &Connection, item_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT item_id FROM dependencies WHERE depends_on = ? ORDER BY item_id")?;
    let ids = stmt
        .query_map(params![item_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Items `item_id` depends on, joined for display.
pub fn dependencies_of(conn: &Connection, item_id: &str) -> Result<Vec<DependencyInfo>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT i.id, i.title, i.status, i.item_type
        FROM dependencies d
        JOIN items i ON i.id = d.depends_on
        WHERE d.item_id = ?
        ORDER BY i.priority ASC, i.created_at ASC, i.id ASC
        "#,
    )?;
    let infos = stmt
        .query_map(params![item_id], row_to_info)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(infos)
}

/// Items that depend on `item_id`, joined for display.
pub fn dependents_of(conn: &Connection, item_id: &str) -> Result<Vec<DependencyInfo>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT i.id, i.title, i.status, i.item_type
        FROM dependencies d
        JOIN items i ON i.id = d.item_id
        WHERE d.depends_on = ?
        ORDER BY i.priority ASC, i.created_at ASC, i.id ASC
        "#,
    )?;
    let infos = stmt
        .query_map(params![item_id], row_to_info)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(infos)
}

pub fn all_dependencies(conn: &Connection) -> Result<Vec<Dependency>> {
    let mut stmt =
        conn.prepare("SELECT item_id, depends_on, created_at FROM dependencies ORDER BY item_id, depends_on")?;
    let edges = stmt
        .query_map([], |row| {
            let created_at: String = row.get(2)?;
            Ok(Dependency {
                item_id: row.get(0)?,
                depends_on: row.get(1)?,
                created_at: parse_ts(&created_at),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(edges)
}

/// Delete every edge touching `item_id`, in either direction.
pub fn delete_edges_for(conn: &Connection, item_id: &str) -> Result<usize> {
    let rows = conn.execute(
        "DELETE FROM dependencies WHERE item_id = ?1 OR depends_on = ?1",
        params![item_id],
    )?;
    Ok(rows)
}

// =============================================================================
// Logs
// =============================================================================

pub fn insert_log(conn: &Connection, item_id: &str, message: &str, now: DateTime<Utc>) -> Result<LogEntry> {
    conn.execute(
        "INSERT INTO item_logs (item_id, message, created_at) VALUES (?, ?, ?)",
        params![item_id, message, fmt_ts(now)],
    )
    .with_context(|| format!("Failed to append log for {}", item_id))?;

    Ok(LogEntry {
        id: conn.last_insert_rowid(),
        item_id: item_id.to_string(),
        message: message.to_string(),
        created_at: now,
    })
}

pub fn logs_for(conn: &Connection, item_id: &str) -> Result<Vec<LogEntry>> {
    let mut stmt =
        conn.prepare("SELECT id, item_id, message, created_at FROM item_logs WHERE item_id = ? ORDER BY id ASC")?;
    let logs = stmt
        .query_map(params![item_id], |row| {
            let created_at: String = row.get(3)?;
            Ok(LogEntry {
                id: row.get(0)?,
                item_id: row.get(1)?,
                message: row.get(2)?,
                created_at: parse_ts(&created_at),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(logs)
}

pub fn move_logs(conn: &Connection, from_id: &str, to_id: &str) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE item_logs SET item_id = ? WHERE item_id = ?",
        params![to_id, from_id],
    )?;
    Ok(rows)
}

pub fn delete_logs_for(conn: &Connection, item_id: &str) -> Result<usize> {
    let rows = conn.execute("DELETE FROM item_logs WHERE item_id = ?", params![item_id])?;
    Ok(rows)
}

// =============================================================================
// Labels
// =============================================================================

pub fn labels_for(conn: &Connection, item_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT label FROM item_labels WHERE item_id = ? ORDER BY label")?;
    let labels = stmt
        .query_map(params![item_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(labels)
}

pub fn insert_label(conn: &Connection, item_id: &str, label: &str) -> Result<bool> {
    let rows = conn.execute(
        "INSERT OR IGNORE INTO item_labels (item_id, label) VALUES (?, ?)",
        params![item_id, label],
    )?;
    Ok(rows > 0)
}

pub fn delete_label(conn: &Connection, item_id: &str, label: &str) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM item_labels WHERE item_id = ? AND label = ?",
        params![item_id, label],
    )?;
    Ok(rows > 0)
}

/// Copy labels onto another item, skipping ones it already has.
pub fn copy_labels(conn: &Connection, from_id: &str, to_id: &str) -> Result<usize> {
    let rows = conn.execute(
        "INSERT OR IGNORE INTO item_labels (item_id, label) SELECT ?, label FROM item_labels WHERE item_id = ?",
        params![to_id, from_id],
    )?;
    Ok(rows)
}

pub fn delete_labels_for(conn: &Connection, item_id: &str) -> Result<usize> {
    let rows = conn.execute("DELETE FROM item_labels WHERE item_id = ?", params![item_id])?;
    Ok(rows)
}
