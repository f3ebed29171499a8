//! The catalog: registry of tenant databases and owner of their open handles.
//!
//! The registry is a small SQLite file (`catalog.db`) in the data directory.
//! Each entry names one tenant file under `databases/`, whose file name is
//! derived from the database id, so renames never touch the disk layout.
//!
//! # Flow
//!
//! ```text
//! create("notes")
//!       │  registry lock: name check, new id
//!       ▼
//! TenantStore::create(<data>/databases/<id>.db) ──► INSERT databases row
//!       │
//!       ▼
//! tenants[id] = Arc<TenantStore>
//!
//! delete(id)
//!       │  registry lock
//!       ▼
//! take tenants[id] (or open it) ──► destroy() ──► DELETE databases row
//! ```
//!
//! Catalog operations serialize on the registry lock. Tenant operations never
//! take it. Opening a handle the first time takes it only to look up the entry
//! and to register the result; the open itself runs outside.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use outliner_types::{Database, DatabaseId, now_millis, validate};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::db::parse_col;
use crate::error::{Result, StoreError};
use crate::tenant::{SharedTenantStore, TenantStore};

const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS databases (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    path TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_databases_created ON databases(created_at);
"#;

/// File extensions accepted by [`Catalog::import`].
pub const IMPORT_EXTENSIONS: &[&str] = &["db", "sqlite", "sqlite3"];

fn database_from_row(row: &Row<'_>) -> rusqlite::Result<Database> {
    Ok(Database {
        id: parse_col(row, 0)?,
        name: row.get(1)?,
        path: PathBuf::from(row.get::<_, String>(2)?),
        created_at: row.get::<_, i64>(3)? as u64,
    })
}

const DATABASE_SELECT: &str = "SELECT id, name, path, created_at FROM databases";

/// Registry of tenant databases.
pub struct Catalog {
    config: StoreConfig,
    registry: Mutex<Connection>,
    tenants: DashMap<DatabaseId, SharedTenantStore>,
}

impl Catalog {
    /// Open the catalog under `config.data_dir`, creating the directory layout
    /// on first use.
    pub fn open(config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(config.databases_dir())?;
        let conn = Connection::open(config.catalog_path())?;
        conn.busy_timeout(config.busy_timeout())?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(CATALOG_SCHEMA)?;
        info!(data_dir = %config.data_dir.display(), "opened catalog");
        Ok(Self {
            config,
            registry: Mutex::new(conn),
            tenants: DashMap::new(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn tenant_path(&self, id: &DatabaseId) -> PathBuf {
        self.config.databases_dir().join(format!("{}.db", id.to_hex()))
    }

    fn find(conn: &Connection, id: &DatabaseId) -> Result<Option<Database>> {
        Ok(conn
            .query_row(
                &format!("{DATABASE_SELECT} WHERE id = ?1"),
                params![id.to_string()],
                database_from_row,
            )
            .optional()?)
    }

    fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Database>> {
        Ok(conn
            .query_row(
                &format!("{DATABASE_SELECT} WHERE name = ?1"),
                params![name],
                database_from_row,
            )
            .optional()?)
    }

    /// Register a new tenant file and row under the registry lock.
    ///
    /// `materialize` produces the tenant file at the given path; if the row
    /// insert fails afterwards the file is removed again.
    fn register(
        &self,
        name: String,
        materialize: impl FnOnce(DatabaseId, PathBuf) -> Result<TenantStore>,
    ) -> Result<Database> {
        let registry = self.registry.lock();
        if Self::find_by_name(&registry, &name)?.is_some() {
            return Err(StoreError::duplicate("database", name));
        }

        let id = DatabaseId::new();
        let path = self.tenant_path(&id);
        let store = materialize(id, path.clone())?;

        let db = Database {
            id,
            name,
            path,
            created_at: now_millis(),
        };
        let inserted = registry.execute(
            "INSERT INTO databases (id, name, path, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                db.id.to_string(),
                db.name,
                db.path.to_string_lossy(),
                db.created_at as i64
            ],
        );
        if let Err(e) = inserted {
            if let Err(cleanup) = store.destroy() {
                warn!(db = %id, error = %cleanup, "failed to remove orphaned tenant file");
            }
            return Err(e.into());
        }

        self.tenants.insert(id, Arc::new(store));
        info!(db = %id, name = %db.name, "registered database");
        Ok(db)
    }

    /// Create an empty database. Fails `DuplicateName` when the name is taken.
    #[tracing::instrument(skip(self), name = "catalog.create")]
    pub fn create(&self, name: &str) -> Result<Database> {
        let name = validate::name("name", name)?;
        let config = &self.config;
        self.register(name, |id, path| TenantStore::create(id, path, config))
    }

    /// Register a copy of an existing outliner SQLite file.
    ///
    /// The name defaults to the file stem. The source is copied into the data
    /// directory and left untouched.
    #[tracing::instrument(skip(self), name = "catalog.import")]
    pub fn import(&self, name: Option<&str>, source: &Path) -> Result<Database> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !IMPORT_EXTENSIONS.contains(&ext.as_str()) {
            return Err(StoreError::validation(
                "file",
                format!("expected one of .db, .sqlite, .sqlite3, got {}", source.display()),
            ));
        }
        if !source.is_file() {
            return Err(StoreError::validation(
                "file",
                format!("{} is not a readable file", source.display()),
            ));
        }
        let raw_name = match name {
            Some(n) => n.to_string(),
            None => source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let name = validate::name("name", &raw_name)?;

        let config = &self.config;
        self.register(name, |id, path| {
            std::fs::copy(source, &path)?;
            TenantStore::open(id, path.clone(), config).inspect_err(|_| {
                if let Err(e) = crate::db::remove_files(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove rejected import");
                }
            })
        })
    }

    /// All databases, oldest first.
    pub fn list(&self) -> Result<Vec<Database>> {
        let registry = self.registry.lock();
        let mut stmt = registry.prepare(&format!("{DATABASE_SELECT} ORDER BY created_at, rowid"))?;
        let all = stmt
            .query_map([], database_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(all)
    }

    pub fn get(&self, id: &DatabaseId) -> Result<Database> {
        let registry = self.registry.lock();
        Self::find(&registry, id)?.ok_or_else(|| StoreError::database_not_found(id))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Database> {
        let registry = self.registry.lock();
        Self::find_by_name(&registry, name.trim())?
            .ok_or_else(|| StoreError::database_not_found(name.trim()))
    }

    /// Rename a database. Renaming to the current name succeeds unchanged.
    #[tracing::instrument(skip(self), name = "catalog.rename")]
    pub fn rename(&self, id: &DatabaseId, new_name: &str) -> Result<Database> {
        let new_name = validate::name("name", new_name)?;
        let registry = self.registry.lock();
        let mut db = Self::find(&registry, id)?.ok_or_else(|| StoreError::database_not_found(id))?;
        if db.name == new_name {
            return Ok(db);
        }
        if Self::find_by_name(&registry, &new_name)?.is_some() {
            return Err(StoreError::duplicate("database", new_name));
        }
        registry.execute(
            "UPDATE databases SET name = ?1 WHERE id = ?2",
            params![new_name, id.to_string()],
        )?;
        info!(db = %id, from = %db.name, to = %new_name, "renamed database");
        db.name = new_name;
        Ok(db)
    }

    /// Delete a database: its tenant store and index first, then the entry.
    ///
    /// Waits for in-flight operations on that database. Handles held elsewhere
    /// fail with `DatabaseNotFound` from then on.
    #[tracing::instrument(skip(self), name = "catalog.delete")]
    pub fn delete(&self, id: &DatabaseId) -> Result<()> {
        let registry = self.registry.lock();
        let db = Self::find(&registry, id)?.ok_or_else(|| StoreError::database_not_found(id))?;

        match self.tenants.remove(id) {
            Some((_, store)) => store.destroy()?,
            None => crate::db::remove_files(&db.path)?,
        }

        registry.execute("DELETE FROM databases WHERE id = ?1", params![id.to_string()])?;
        info!(db = %id, name = %db.name, "deleted database");
        Ok(())
    }

    /// Handle to a tenant store, opening it on first use.
    ///
    /// The open (schema check and index build) runs without the registry
    /// lock. Concurrent first calls may each open the file; the first to
    /// register wins and the others drop their handle.
    pub fn store(&self, id: &DatabaseId) -> Result<SharedTenantStore> {
        if let Some(store) = self.tenants.get(id) {
            return Ok(store.clone());
        }

        let db = {
            let registry = self.registry.lock();
            Self::find(&registry, id)?.ok_or_else(|| StoreError::database_not_found(id))?
        };
        let opened = TenantStore::open(db.id, db.path, &self.config);

        let registry = self.registry.lock();
        let still_listed = Self::find(&registry, id)?.is_some();
        let store = match opened {
            Ok(store) if still_listed => store,
            Ok(store) => {
                // Deleted while we were opening; drop whatever the open recreated.
                store.destroy()?;
                return Err(StoreError::database_not_found(id));
            }
            Err(_) if !still_listed => return Err(StoreError::database_not_found(id)),
            Err(e) => return Err(e),
        };
        let shared = self
            .tenants
            .entry(db.id)
            .or_insert_with(|| Arc::new(store))
            .clone();
        Ok(shared)
    }

    /// Handle to a tenant store by database name.
    pub fn store_by_name(&self, name: &str) -> Result<SharedTenantStore> {
        let db = self.get_by_name(name)?;
        self.store(&db.id)
    }

    /// Number of tenant handles currently open.
    pub fn open_stores(&self) -> usize {
        self.tenants.len()
    }

    /// Release every open handle and the registry connection.
    pub fn close(self) {
        let open = self.tenants.len();
        self.tenants.clear();
        info!(open, "closed catalog");
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("data_dir", &self.config.data_dir)
            .field("open_stores", &self.tenants.len())
            .finish_non_exhaustive()
    }
}
