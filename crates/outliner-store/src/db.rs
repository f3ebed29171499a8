//! SQLite schema and row mapping for tenant databases.
//!
//! One file per tenant. Pages own block trees through `page_id`; the parent
//! pointer is a deferred foreign key so reparents and cascades only have to be
//! consistent at commit.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use outliner_types::{
    Block, BlockId, Color, DEFAULT_WORKSPACE_COLOR, DEFAULT_WORKSPACE_NAME, Page, PageId,
    Workspace, WorkspaceId,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};

use tracing::{info, warn};

use crate::error::{Result, StoreError};

/// Tenant schema. Idempotent, so it also upgrades imported files that only
/// carry part of it.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workspaces (
    workspace_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    color TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pages (
    page_id TEXT PRIMARY KEY,
    title TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS blocks (
    block_id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    block_type TEXT NOT NULL DEFAULT 'text',
    page_id TEXT NOT NULL REFERENCES pages(page_id) ON DELETE CASCADE,
    parent_block_id TEXT REFERENCES blocks(block_id) DEFERRABLE INITIALLY DEFERRED,
    position INTEGER NOT NULL CHECK (position >= 0),
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blocks_scope ON blocks(page_id, parent_block_id, position);
CREATE INDEX IF NOT EXISTS idx_blocks_parent ON blocks(parent_block_id);
CREATE INDEX IF NOT EXISTS idx_pages_created ON pages(created_at);
"#;

/// Columns every tenant `blocks` table must carry.
const BLOCK_COLUMNS: &[&str] = &[
    "block_id",
    "content",
    "block_type",
    "page_id",
    "parent_block_id",
    "position",
    "created_at",
];

pub(crate) const BLOCK_SELECT: &str = "SELECT block_id, content, block_type, page_id, \
     parent_block_id, position, created_at FROM blocks";

// ============================================================================
// Connections
// ============================================================================

/// Open (or create) a tenant file as the writer connection and apply the schema.
pub(crate) fn open_tenant(path: &Path, busy_timeout: Duration, create: bool) -> Result<Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    let mut conn = Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    if detect_layout(&conn)? == Layout::Legacy {
        migrate_legacy(&mut conn, path)?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT OR IGNORE INTO workspaces (workspace_id, name, color) VALUES (?1, ?2, ?3)",
        params![
            WorkspaceId::DEFAULT.get(),
            DEFAULT_WORKSPACE_NAME,
            DEFAULT_WORKSPACE_COLOR.to_string()
        ],
    )?;
    Ok(conn)
}

/// Read-only connection used for index rebuilds.
pub(crate) fn open_reader(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
    /// No `blocks` table yet; the schema creates it.
    Empty,
    Current,
    /// The older layout: no `block_type`, `page_id` only on root blocks,
    /// hex ids, SQLite timestamps, blob colors and FTS5 shadow tables.
    Legacy,
}

/// Classify an existing file by its `blocks` columns. Anything that is neither
/// the current nor the legacy layout is rejected.
fn detect_layout(conn: &Connection) -> Result<Layout> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('blocks')")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if columns.is_empty() {
        return Ok(Layout::Empty);
    }
    let missing: Vec<&str> = BLOCK_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.iter().any(|have| have == c))
        .collect();
    match missing.as_slice() {
        [] => Ok(Layout::Current),
        ["block_type"] => Ok(Layout::Legacy),
        [first, ..] => Err(StoreError::validation(
            "database",
            format!("blocks table has no `{first}` column"),
        )),
    }
}

/// Hyphenated lower-case form of a 32-digit hex id held in `col`.
fn uuid_sql(col: &str) -> String {
    let hex = format!("lower(replace({col}, '-', ''))");
    format!(
        "substr({hex}, 1, 8) || '-' || substr({hex}, 9, 4) || '-' || substr({hex}, 13, 4) \
         || '-' || substr({hex}, 17, 4) || '-' || substr({hex}, 21, 12)"
    )
}

/// Epoch milliseconds from an integer or a SQLite `CURRENT_TIMESTAMP` string.
fn millis_sql(col: &str) -> String {
    format!(
        "CASE WHEN typeof({col}) = 'integer' THEN {col} \
         ELSE COALESCE(CAST(strftime('%s', {col}) AS INTEGER) * 1000, 0) END"
    )
}

const LEGACY_BAD_IDS: &str = "SELECT COUNT(*) FROM (
    SELECT page_id AS id FROM pages
    UNION ALL SELECT block_id FROM blocks
    UNION ALL SELECT page_id FROM blocks WHERE page_id IS NOT NULL
    UNION ALL SELECT parent_block_id FROM blocks WHERE parent_block_id IS NOT NULL
) WHERE typeof(id) != 'text'
    OR length(replace(id, '-', '')) != 32
    OR replace(id, '-', '') GLOB '*[^0-9A-Fa-f]*'";

const LEGACY_STAGE: &str = "
DROP TABLE IF EXISTS pages_fts;
DROP TABLE IF EXISTS blocks_fts;
CREATE TEMP TABLE legacy_pages AS
    SELECT rowid AS legacy_rowid, page_id, title, created_at FROM main.pages;
CREATE TEMP TABLE legacy_blocks AS
    SELECT rowid AS legacy_rowid, block_id, content, page_id, parent_block_id, position, created_at
    FROM main.blocks;
CREATE TEMP TABLE legacy_workspaces AS SELECT workspace_id, name, color FROM main.workspaces;
DROP TABLE main.blocks;
DROP TABLE main.pages;
DROP TABLE main.workspaces;
";

/// Rewrite a legacy file in place into the current layout.
///
/// Children get the `page_id` of their root, sibling positions are renumbered
/// `0..n` in their stored order, and blocks that cannot reach a page are
/// dropped. Runs in one transaction; on error the file is left as it was.
fn migrate_legacy(conn: &mut Connection, path: &Path) -> Result<()> {
    let bad_ids: i64 = conn.query_row(LEGACY_BAD_IDS, [], |row| row.get(0))?;
    if bad_ids > 0 {
        return Err(StoreError::validation(
            "database",
            format!("{bad_ids} page or block ids are not 32-digit hex"),
        ));
    }
    let has_workspaces = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'workspaces'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
    let tx = conn.transaction()?;
    if !has_workspaces {
        tx.execute_batch("CREATE TABLE workspaces (workspace_id INTEGER PRIMARY KEY, name TEXT, color)")?;
    }
    tx.execute_batch(LEGACY_STAGE)?;
    tx.execute_batch(SCHEMA)?;

    let pages = tx.execute(
        &format!(
            "INSERT INTO pages (page_id, title, created_at)
             SELECT {}, title, {} FROM temp.legacy_pages ORDER BY legacy_rowid",
            uuid_sql("page_id"),
            millis_sql("created_at"),
        ),
        [],
    )?;
    let blocks = tx.execute(
        &format!(
            "WITH RECURSIVE owner(block_id, page_id) AS (
                 SELECT block_id, page_id FROM temp.legacy_blocks
                 WHERE parent_block_id IS NULL
                   AND page_id IN (SELECT page_id FROM temp.legacy_pages)
                 UNION
                 SELECT b.block_id, o.page_id FROM temp.legacy_blocks b
                 JOIN owner o ON b.parent_block_id = o.block_id
             )
             INSERT INTO blocks
                 (block_id, content, block_type, page_id, parent_block_id, position, created_at)
             SELECT {}, b.content, 'text', {}, {},
                    ROW_NUMBER() OVER (
                        PARTITION BY o.page_id, b.parent_block_id
                        ORDER BY b.position, b.legacy_rowid
                    ) - 1,
                    {}
             FROM temp.legacy_blocks b JOIN owner o ON o.block_id = b.block_id",
            uuid_sql("b.block_id"),
            uuid_sql("o.page_id"),
            uuid_sql("b.parent_block_id"),
            millis_sql("b.created_at"),
        ),
        [],
    )?;
    tx.execute(
        "INSERT INTO workspaces (workspace_id, name, color)
         SELECT workspace_id,
                COALESCE(NULLIF(trim(name), ''), 'Workspace ' || workspace_id),
                CASE
                    WHEN typeof(color) = 'blob' AND length(color) = 3 THEN '#' || hex(color)
                    WHEN typeof(color) = 'text' AND length(ltrim(color, '#')) = 6
                         AND ltrim(color, '#') NOT GLOB '*[^0-9A-Fa-f]*'
                        THEN '#' || upper(ltrim(color, '#'))
                    ELSE ?1
                END
         FROM temp.legacy_workspaces WHERE typeof(workspace_id) = 'integer'",
        params![DEFAULT_WORKSPACE_COLOR.to_string()],
    )?;
    let legacy_blocks: i64 =
        tx.query_row("SELECT COUNT(*) FROM temp.legacy_blocks", [], |row| row.get(0))?;
    tx.execute_batch(
        "DROP TABLE temp.legacy_pages;
         DROP TABLE temp.legacy_blocks;
         DROP TABLE temp.legacy_workspaces;",
    )?;
    tx.commit()?;

    let dropped = usize::try_from(legacy_blocks).unwrap_or(0).saturating_sub(blocks);
    if dropped > 0 {
        warn!(path = %path.display(), dropped, "legacy blocks not reachable from a page were dropped");
    }
    info!(path = %path.display(), pages, blocks, "migrated legacy tenant layout");
    Ok(())
}

/// Delete a tenant file with its WAL and shared-memory siblings.
pub(crate) fn remove_files(path: &Path) -> Result<()> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut sibling = path.as_os_str().to_owned();
        sibling.push(suffix);
        targets.push(sibling.into());
    }
    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

// ============================================================================
// Row mapping
// ============================================================================

/// Parse a TEXT column into a typed value.
pub(crate) fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

pub(crate) fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        block_id: parse_col(row, 0)?,
        content: row.get(1)?,
        block_type: row.get(2)?,
        page_id: parse_col(row, 3)?,
        parent_block_id: parse_opt_col(row, 4)?,
        position: row.get(5)?,
        created_at: row.get::<_, i64>(6)? as u64,
    })
}

pub(crate) fn page_from_row(row: &Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        page_id: parse_col(row, 0)?,
        title: row.get(1)?,
        created_at: row.get::<_, i64>(2)? as u64,
    })
}

pub(crate) fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        workspace_id: WorkspaceId(row.get(0)?),
        name: row.get(1)?,
        color: parse_col::<Color>(row, 2)?,
    })
}

// ============================================================================
// Pages
// ============================================================================

pub(crate) fn find_page(conn: &Connection, id: &PageId) -> Result<Option<Page>> {
    Ok(conn
        .query_row(
            "SELECT page_id, title, created_at FROM pages WHERE page_id = ?1",
            params![id.to_string()],
            page_from_row,
        )
        .optional()?)
}

pub(crate) fn get_page(conn: &Connection, id: &PageId) -> Result<Page> {
    find_page(conn, id)?.ok_or(StoreError::PageNotFound(*id))
}

pub(crate) fn list_pages(conn: &Connection) -> Result<Vec<Page>> {
    let mut stmt = conn.prepare(
        "SELECT page_id, title, created_at FROM pages ORDER BY created_at, rowid",
    )?;
    let pages = stmt
        .query_map([], page_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(pages)
}

/// Whether another page already carries `title`.
pub(crate) fn title_taken(conn: &Connection, title: &str, except: Option<&PageId>) -> Result<bool> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT page_id FROM pages WHERE title = ?1",
            params![title],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match (owner, except) {
        (Some(owner), Some(except)) => owner != except.to_string(),
        (Some(_), None) => true,
        (None, _) => false,
    })
}

pub(crate) fn insert_page(conn: &Connection, page: &Page) -> Result<()> {
    conn.execute(
        "INSERT INTO pages (page_id, title, created_at) VALUES (?1, ?2, ?3)",
        params![page.page_id.to_string(), page.title, page.created_at as i64],
    )?;
    Ok(())
}

pub(crate) fn set_page_title(conn: &Connection, id: &PageId, title: &str) -> Result<()> {
    conn.execute(
        "UPDATE pages SET title = ?1 WHERE page_id = ?2",
        params![title, id.to_string()],
    )?;
    Ok(())
}

/// Remove a page and every block on it. Returns the removed block ids.
pub(crate) fn delete_page(conn: &Connection, id: &PageId) -> Result<Vec<BlockId>> {
    let mut stmt = conn.prepare("SELECT block_id FROM blocks WHERE page_id = ?1")?;
    let blocks = stmt
        .query_map(params![id.to_string()], |row| parse_col(row, 0))?
        .collect::<rusqlite::Result<Vec<BlockId>>>()?;
    conn.execute("DELETE FROM blocks WHERE page_id = ?1", params![id.to_string()])?;
    conn.execute("DELETE FROM pages WHERE page_id = ?1", params![id.to_string()])?;
    Ok(blocks)
}

// ============================================================================
// Blocks
// ============================================================================

pub(crate) fn find_block(conn: &Connection, id: &BlockId) -> Result<Option<Block>> {
    Ok(conn
        .query_row(
            &format!("{BLOCK_SELECT} WHERE block_id = ?1"),
            params![id.to_string()],
            block_from_row,
        )
        .optional()?)
}

pub(crate) fn get_block(conn: &Connection, id: &BlockId) -> Result<Block> {
    find_block(conn, id)?.ok_or(StoreError::BlockNotFound(*id))
}

/// Every block on a page, grouped by parent and ordered by position.
pub(crate) fn list_blocks(conn: &Connection, page: &PageId) -> Result<Vec<Block>> {
    let mut stmt = conn.prepare(&format!(
        "{BLOCK_SELECT} WHERE page_id = ?1 ORDER BY parent_block_id, position"
    ))?;
    let blocks = stmt
        .query_map(params![page.to_string()], block_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

/// Direct children of a block, ordered by position.
pub(crate) fn list_children(conn: &Connection, parent: &BlockId) -> Result<Vec<Block>> {
    let mut stmt = conn.prepare(&format!(
        "{BLOCK_SELECT} WHERE parent_block_id = ?1 ORDER BY position"
    ))?;
    let blocks = stmt
        .query_map(params![parent.to_string()], block_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

pub(crate) fn insert_block(conn: &Connection, block: &Block) -> Result<()> {
    conn.execute(
        "INSERT INTO blocks (block_id, content, block_type, page_id, parent_block_id, position, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            block.block_id.to_string(),
            block.content,
            block.block_type,
            block.page_id.to_string(),
            block.parent_block_id.map(|p| p.to_string()),
            block.position,
            block.created_at as i64,
        ],
    )?;
    Ok(())
}

// ============================================================================
// Workspaces
// ============================================================================

pub(crate) fn get_workspace(conn: &Connection, id: WorkspaceId) -> Result<Workspace> {
    conn.query_row(
        "SELECT workspace_id, name, color FROM workspaces WHERE workspace_id = ?1",
        params![id.get()],
        workspace_from_row,
    )
    .optional()?
    .ok_or(StoreError::WorkspaceNotFound(id))
}

pub(crate) fn list_workspaces(conn: &Connection) -> Result<Vec<Workspace>> {
    let mut stmt =
        conn.prepare("SELECT workspace_id, name, color FROM workspaces ORDER BY workspace_id")?;
    let workspaces = stmt
        .query_map([], workspace_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(workspaces)
}

/// Insert with the next integer id.
pub(crate) fn insert_workspace(conn: &Connection, name: &str, color: Color) -> Result<Workspace> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(workspace_id) + 1, 0) FROM workspaces",
        [],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO workspaces (workspace_id, name, color) VALUES (?1, ?2, ?3)",
        params![next, name, color.to_string()],
    )?;
    Ok(Workspace {
        workspace_id: WorkspaceId(next),
        name: name.to_string(),
        color,
    })
}

pub(crate) fn update_workspace(
    conn: &Connection,
    id: WorkspaceId,
    name: &str,
    color: Color,
) -> Result<Workspace> {
    let changed = conn.execute(
        "UPDATE workspaces SET name = ?1, color = ?2 WHERE workspace_id = ?3",
        params![name, color.to_string(), id.get()],
    )?;
    if changed == 0 {
        return Err(StoreError::WorkspaceNotFound(id));
    }
    Ok(Workspace {
        workspace_id: id,
        name: name.to_string(),
        color,
    })
}

pub(crate) fn delete_workspace(conn: &Connection, id: WorkspaceId) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM workspaces WHERE workspace_id = ?1",
        params![id.get()],
    )?;
    if changed == 0 {
        return Err(StoreError::WorkspaceNotFound(id));
    }
    Ok(())
}
