//! Per-database store: pages, blocks, workspaces and search.
//!
//! # Concurrency Model
//!
//! - One writer connection behind a `parking_lot::Mutex`; every read and write
//!   on this database goes through it, so mutations are serialized and readers
//!   never see a half-applied reorder, reparent or cascade
//! - Each mutation is a single `IMMEDIATE` transaction; index deltas are applied
//!   after commit while the connection lock is still held
//! - Search queries run against an `Arc` snapshot of the index without touching
//!   the connection until hits are resolved to rows
//! - `destroy` takes the connection out of its slot; handles that outlive it
//!   fail with `DatabaseNotFound`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use outliner_types::{
    Block, BlockId, Color, DatabaseId, Page, PageId, Workspace, WorkspaceId, now_millis, validate,
};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::db;
use crate::error::{Result, StoreError};
use crate::hierarchy::{self, NewBlock};
use crate::query::Query;
use crate::search::{DocKey, IndexDelta, IndexDoc, SearchCell, SearchResults, SearchScope};

/// Shared handle to a tenant store.
pub type SharedTenantStore = Arc<TenantStore>;

pub struct TenantStore {
    id: DatabaseId,
    path: PathBuf,
    /// `None` once the database has been destroyed.
    conn: Mutex<Option<Connection>>,
    search: SearchCell,
    /// Serializes rebuilds; mutations never take it.
    rebuild_lock: Mutex<()>,
    busy_timeout: Duration,
    search_limit: usize,
    max_tree_depth: usize,
}

impl TenantStore {
    /// Create a fresh tenant file at `path`.
    pub(crate) fn create(id: DatabaseId, path: PathBuf, config: &StoreConfig) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Self::open_with(id, path, config, true)
    }

    /// Open an existing tenant file.
    pub(crate) fn open(id: DatabaseId, path: PathBuf, config: &StoreConfig) -> Result<Self> {
        if !path.exists() {
            warn!(db = %id, path = %path.display(), "tenant file missing");
            return Err(StoreError::database_not_found(id));
        }
        Self::open_with(id, path, config, false)
    }

    fn open_with(id: DatabaseId, path: PathBuf, config: &StoreConfig, create: bool) -> Result<Self> {
        let conn = db::open_tenant(&path, config.busy_timeout(), create)?;
        let store = Self {
            id,
            path,
            conn: Mutex::new(Some(conn)),
            search: SearchCell::default(),
            rebuild_lock: Mutex::new(()),
            busy_timeout: config.busy_timeout(),
            search_limit: config.search_limit,
            max_tree_depth: config.max_tree_depth,
        };
        let docs = store.rebuild_search()?;
        info!(db = %id, path = %store.path.display(), docs, "opened tenant store");
        Ok(store)
    }

    pub fn id(&self) -> DatabaseId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the store still has a live connection.
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn gone(&self) -> StoreError {
        StoreError::database_not_found(self.id)
    }

    /// Run a read under the connection lock.
    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(|| self.gone())?;
        f(conn)
    }

    /// Run a mutation in one immediate transaction, then feed its index deltas
    /// to the search cell before releasing the connection.
    fn write<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Transaction<'_>, &mut Vec<IndexDelta>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or_else(|| self.gone())?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut deltas = Vec::new();
        let outcome = f(&tx, &mut deltas);
        match outcome {
            Ok(value) => {
                tx.commit()?;
                debug!(db = %self.id, op, deltas = deltas.len(), "committed");
                self.search.apply(deltas);
                Ok(value)
            }
            Err(e) => {
                debug!(db = %self.id, op, error = %e, "rolled back");
                Err(e)
            }
        }
    }

    // ========================================================================
    // Pages
    // ========================================================================

    pub fn create_page(&self, title: &str) -> Result<Page> {
        let title = validate::name("title", title)?;
        self.write("create_page", |tx, deltas| {
            if db::title_taken(tx, &title, None)? {
                return Err(StoreError::duplicate("page", title.clone()));
            }
            let page = Page {
                page_id: PageId::new(),
                title: title.clone(),
                created_at: now_millis(),
            };
            db::insert_page(tx, &page)?;
            deltas.push(IndexDelta::Upsert(DocKey::Page(page.page_id), page.title.clone()));
            Ok(page)
        })
    }

    pub fn get_page(&self, id: &PageId) -> Result<Page> {
        self.read(|conn| db::get_page(conn, id))
    }

    /// Pages in creation order.
    pub fn list_pages(&self) -> Result<Vec<Page>> {
        self.read(db::list_pages)
    }

    pub fn rename_page(&self, id: &PageId, title: &str) -> Result<Page> {
        let title = validate::name("title", title)?;
        self.write("rename_page", |tx, deltas| {
            let mut page = db::get_page(tx, id)?;
            if page.title == title {
                return Ok(page);
            }
            if db::title_taken(tx, &title, Some(id))? {
                return Err(StoreError::duplicate("page", title.clone()));
            }
            db::set_page_title(tx, id, &title)?;
            page.title = title.clone();
            deltas.push(IndexDelta::Upsert(DocKey::Page(*id), page.title.clone()));
            Ok(page)
        })
    }

    /// Delete a page with all of its blocks.
    pub fn delete_page(&self, id: &PageId) -> Result<()> {
        self.write("delete_page", |tx, deltas| {
            db::get_page(tx, id)?;
            let removed = db::delete_page(tx, id)?;
            deltas.push(IndexDelta::Remove(DocKey::Page(*id)));
            deltas.extend(removed.into_iter().map(|b| IndexDelta::Remove(DocKey::Block(b))));
            Ok(())
        })
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Insert a block. An occupied position pushes it and every later sibling
    /// up by one.
    pub fn insert_block(&self, new: NewBlock) -> Result<Block> {
        let max_depth = self.max_tree_depth;
        self.write("insert_block", |tx, deltas| {
            hierarchy::insert(tx, new, max_depth, deltas)
        })
    }

    pub fn get_block(&self, id: &BlockId) -> Result<Block> {
        self.read(|conn| db::get_block(conn, id))
    }

    pub fn update_content(&self, id: &BlockId, content: &str) -> Result<Block> {
        self.write("update_content", |tx, deltas| {
            hierarchy::update_content(tx, *id, content, deltas)
        })
    }

    /// Move a block within its sibling list.
    pub fn update_position(&self, id: &BlockId, position: i64) -> Result<Block> {
        self.write("update_position", |tx, _| {
            hierarchy::update_position(tx, *id, position)
        })
    }

    /// Move a block and its subtree under `parent` (None = page root).
    /// Without a position it goes after the last sibling.
    pub fn update_parent(
        &self,
        id: &BlockId,
        parent: Option<BlockId>,
        position: Option<i64>,
    ) -> Result<Block> {
        let max_depth = self.max_tree_depth;
        self.write("update_parent", |tx, _| {
            hierarchy::update_parent(tx, *id, parent, position, max_depth)
        })
    }

    /// Delete a block and its descendants. Returns every removed id.
    pub fn delete_block(&self, id: &BlockId) -> Result<Vec<BlockId>> {
        self.write("delete_block", |tx, deltas| hierarchy::delete(tx, *id, deltas))
    }

    /// Every block on the page, grouped by parent and ordered by position.
    pub fn list_blocks(&self, page: &PageId) -> Result<Vec<Block>> {
        self.read(|conn| {
            db::get_page(conn, page)?;
            db::list_blocks(conn, page)
        })
    }

    /// Direct children of a block in position order.
    pub fn list_children(&self, id: &BlockId) -> Result<Vec<Block>> {
        self.read(|conn| {
            db::get_block(conn, id)?;
            db::list_children(conn, id)
        })
    }

    // ========================================================================
    // Workspaces
    // ========================================================================

    pub fn create_workspace(&self, name: &str, color: Color) -> Result<Workspace> {
        let name = validate::name("name", name)?;
        self.write("create_workspace", |tx, _| db::insert_workspace(tx, &name, color))
    }

    pub fn get_workspace(&self, id: WorkspaceId) -> Result<Workspace> {
        self.read(|conn| db::get_workspace(conn, id))
    }

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        self.read(db::list_workspaces)
    }

    /// Rename and recolor.
    pub fn update_workspace(&self, id: WorkspaceId, name: &str, color: Color) -> Result<Workspace> {
        let name = validate::name("name", name)?;
        self.write("update_workspace", |tx, _| {
            db::update_workspace(tx, id, &name, color)
        })
    }

    pub fn delete_workspace(&self, id: WorkspaceId) -> Result<()> {
        self.write("delete_workspace", |tx, _| db::delete_workspace(tx, id))
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Ranked pages and blocks matching every token of `query` as a prefix.
    ///
    /// `limit` applies to each kind separately and defaults to the configured
    /// search limit.
    pub fn search(&self, query: &str, scope: SearchScope, limit: Option<usize>) -> Result<SearchResults> {
        self.run_query(Query::simple(query), scope, limit)
    }

    /// Like [`TenantStore::search`], but `query` uses the advanced syntax:
    /// exact terms, `term*` prefixes, `"quoted phrases"`, `AND`, `OR`, `NOT`
    /// and parentheses. Malformed queries fail with `Validation`.
    pub fn search_advanced(
        &self,
        query: &str,
        scope: SearchScope,
        limit: Option<usize>,
    ) -> Result<SearchResults> {
        self.run_query(Query::parse(query)?, scope, limit)
    }

    fn run_query(
        &self,
        query: Option<Query>,
        scope: SearchScope,
        limit: Option<usize>,
    ) -> Result<SearchResults> {
        let Some(query) = query else {
            return Ok(SearchResults::default());
        };
        let limit = limit.unwrap_or(self.search_limit);
        let index = self.search.snapshot();

        let page_hits = match scope {
            SearchScope::Pages | SearchScope::All => {
                index.query_expr(&query, SearchScope::Pages, limit)
            }
            SearchScope::Blocks => Vec::new(),
        };
        let block_hits = match scope {
            SearchScope::Blocks | SearchScope::All => {
                index.query_expr(&query, SearchScope::Blocks, limit)
            }
            SearchScope::Pages => Vec::new(),
        };

        self.read(|conn| {
            let mut results = SearchResults::default();
            for hit in page_hits {
                if let DocKey::Page(id) = hit.key {
                    if let Some(page) = db::find_page(conn, &id)? {
                        results.pages.push(page);
                    }
                }
            }
            for hit in block_hits {
                if let DocKey::Block(id) = hit.key {
                    if let Some(block) = db::find_block(conn, &id)? {
                        results.blocks.push(block);
                    }
                }
            }
            Ok(results)
        })
    }

    /// Rebuild the search index from a consistent snapshot and swap it in.
    ///
    /// Mutations keep committing while the scan runs; they are replayed onto
    /// the new index before the swap. On failure the old index stays live.
    /// Returns the number of indexed documents.
    pub fn rebuild_search(&self) -> Result<usize> {
        let _serial = self.rebuild_lock.lock();
        let started = std::time::Instant::now();

        let reader = db::open_reader(&self.path, self.busy_timeout)
            .map_err(|e| StoreError::RebuildFailed(e.to_string()))?;

        // Pin the read snapshot and start journaling with no commit in between.
        let rebuild = {
            let guard = self.conn.lock();
            if guard.is_none() {
                return Err(self.gone());
            }
            reader
                .execute_batch("BEGIN DEFERRED")
                .and_then(|_| {
                    reader.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get::<_, i64>(0))
                })
                .map_err(|e| StoreError::RebuildFailed(e.to_string()))?;
            self.search.begin_rebuild()
        };

        let count = scan(&reader, |docs| rebuild.finish(docs))
            .map_err(|e| match e {
                _ if self.search.is_closed() => self.gone(),
                StoreError::RebuildFailed(_) => e,
                other => StoreError::RebuildFailed(other.to_string()),
            })
            .inspect_err(|e| warn!(db = %self.id, error = %e, "search rebuild failed"))?;

        if let Err(e) = reader.execute_batch("COMMIT") {
            debug!(db = %self.id, error = %e, "closing rebuild snapshot");
        }
        debug!(
            db = %self.id,
            docs = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search index rebuilt"
        );
        Ok(count)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close the connection, remove the files and drop the index.
    ///
    /// Waits for any in-flight operation to finish. Afterwards every call on
    /// this handle fails with `DatabaseNotFound`.
    pub(crate) fn destroy(&self) -> Result<()> {
        let mut guard = self.conn.lock();
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                warn!(db = %self.id, error = %e, "error closing tenant connection");
            }
        }
        self.search.close();
        db::remove_files(&self.path)?;
        info!(db = %self.id, path = %self.path.display(), "destroyed tenant store");
        Ok(())
    }
}

impl std::fmt::Debug for TenantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantStore")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Stream every page title and block body from `reader` into `sink`.
fn scan<T>(
    reader: &Connection,
    sink: impl FnOnce(&mut dyn Iterator<Item = Result<IndexDoc>>) -> Result<T>,
) -> Result<T> {
    let mut pages = reader.prepare("SELECT page_id, title FROM pages")?;
    let mut blocks = reader.prepare("SELECT block_id, content FROM blocks")?;
    let page_docs = pages.query_map([], |row| {
        Ok(IndexDoc {
            key: DocKey::Page(db::parse_col(row, 0)?),
            text: row.get(1)?,
        })
    })?;
    let block_docs = blocks.query_map([], |row| {
        Ok(IndexDoc {
            key: DocKey::Block(db::parse_col(row, 0)?),
            text: row.get(1)?,
        })
    })?;
    let mut docs = page_docs.chain(block_docs).map(|r| r.map_err(StoreError::from));
    sink(&mut docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temp_store() -> (tempfile::TempDir, TenantStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::with_data_dir(dir.path());
        let store = TenantStore::create(DatabaseId::new(), dir.path().join("t.db"), &config).unwrap();
        (dir, store)
    }

    #[test]
    fn test_page_titles_unique() {
        let (_dir, store) = temp_store();
        let inbox = store.create_page("Inbox").unwrap();
        let err = store.create_page("  Inbox ").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName { kind: "page", .. }));

        let other = store.create_page("Other").unwrap();
        assert!(store.rename_page(&other.page_id, "Inbox").is_err());
        assert_eq!(store.rename_page(&inbox.page_id, "Inbox").unwrap(), inbox);
        assert_eq!(store.list_pages().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_page_removes_blocks_and_index() {
        let (_dir, store) = temp_store();
        let page = store.create_page("Trip").unwrap();
        let root = store
            .insert_block(NewBlock::new(page.page_id, None, 0, "pack passport"))
            .unwrap();
        store
            .insert_block(NewBlock::new(page.page_id, Some(root.block_id), 0, "check visa"))
            .unwrap();

        store.delete_page(&page.page_id).unwrap();
        assert!(matches!(
            store.list_blocks(&page.page_id),
            Err(StoreError::PageNotFound(_))
        ));
        assert!(matches!(
            store.get_block(&root.block_id),
            Err(StoreError::BlockNotFound(_))
        ));
        let hits = store.search("passport", SearchScope::All, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let (_dir, store) = temp_store();
        let page = store.create_page("Inbox").unwrap();
        let a = store.insert_block(NewBlock::new(page.page_id, None, 0, "a")).unwrap();
        let b = store
            .insert_block(NewBlock::new(page.page_id, Some(a.block_id), 0, "b"))
            .unwrap();
        let before = store.list_blocks(&page.page_id).unwrap();

        let err = store.update_parent(&a.block_id, Some(b.block_id), None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::CycleDetected);
        assert_eq!(store.list_blocks(&page.page_id).unwrap(), before);
    }

    #[test]
    fn test_workspace_crud() {
        let (_dir, store) = temp_store();
        let work = store.create_workspace("Work", Color([0, 0x80, 0])).unwrap();
        assert_eq!(store.list_workspaces().unwrap().len(), 2);

        let renamed = store
            .update_workspace(work.workspace_id, "Job", Color([1, 1, 1]))
            .unwrap();
        assert_eq!(store.get_workspace(work.workspace_id).unwrap(), renamed);

        store.delete_workspace(work.workspace_id).unwrap();
        assert!(matches!(
            store.get_workspace(work.workspace_id),
            Err(StoreError::WorkspaceNotFound(_))
        ));
        assert!(store.create_workspace("  ", Color([0, 0, 0])).is_err());
    }

    #[test]
    fn test_search_resolves_rows() {
        let (_dir, store) = temp_store();
        let page = store.create_page("Reading list").unwrap();
        let block = store
            .insert_block(NewBlock::new(page.page_id, None, 0, "Read the reading guide"))
            .unwrap();

        let results = store.search("read", SearchScope::All, None).unwrap();
        assert_eq!(results.pages, vec![page.clone()]);
        assert_eq!(results.blocks, vec![block.clone()]);

        let pages_only = store.search("read", SearchScope::Pages, None).unwrap();
        assert!(pages_only.blocks.is_empty());

        store.update_content(&block.block_id, "something else").unwrap();
        let results = store.search("read", SearchScope::Blocks, None).unwrap();
        assert!(results.blocks.is_empty());
    }

    #[test]
    fn test_index_loaded_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::with_data_dir(dir.path());
        let path = dir.path().join("t.db");
        let id = DatabaseId::new();
        {
            let store = TenantStore::create(id, path.clone(), &config).unwrap();
            store.create_page("Persistent thoughts").unwrap();
        }
        let store = TenantStore::open(id, path, &config).unwrap();
        assert_eq!(store.search("persist", SearchScope::Pages, None).unwrap().pages.len(), 1);
    }

    #[test]
    fn test_destroyed_handle_reports_not_found() {
        let (_dir, store) = temp_store();
        let page = store.create_page("Inbox").unwrap();
        store.destroy().unwrap();

        assert!(!store.is_open());
        assert!(!store.path().exists());
        assert!(matches!(
            store.get_page(&page.page_id),
            Err(StoreError::DatabaseNotFound(_))
        ));
        assert!(matches!(
            store.create_page("Again"),
            Err(StoreError::DatabaseNotFound(_))
        ));
        assert!(matches!(
            store.rebuild_search(),
            Err(StoreError::DatabaseNotFound(_)) | Err(StoreError::RebuildFailed(_))
        ));
    }
}
