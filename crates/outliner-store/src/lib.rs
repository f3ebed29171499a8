//! Multi-tenant outline store.
//!
//! A [`Catalog`] owns any number of named databases. Each database is one
//! SQLite file served by a [`TenantStore`]: pages, the block hierarchy under
//! each page, workspaces, and an in-memory search index kept in step with every
//! committed mutation.
//!
//! # Example
//!
//! ```no_run
//! use outliner_store::{Catalog, NewBlock, SearchScope, StoreConfig};
//!
//! # fn main() -> outliner_store::Result<()> {
//! let catalog = Catalog::open(StoreConfig::load_default()?)?;
//! let db = catalog.create("notes")?;
//! let store = catalog.store(&db.id)?;
//!
//! let page = store.create_page("Inbox")?;
//! let first = store.insert_block(NewBlock::new(page.page_id, None, 0, "buy milk"))?;
//! store.insert_block(NewBlock::new(page.page_id, Some(first.block_id), 0, "oat"))?;
//!
//! let hits = store.search("milk", SearchScope::Blocks, None)?;
//! assert_eq!(hits.blocks.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Ordering rules
//!
//! | Operation         | Effect on siblings                                  |
//! |-------------------|-----------------------------------------------------|
//! | `insert_block`    | occupied slot: everything at or after it moves +1   |
//! | `update_position` | earlier: `[new, old)` +1; later: `(old, new]` -1    |
//! | `update_parent`   | old scope closes the gap; new scope as insert       |
//! | `delete_block`    | subtree removed; later siblings move -1             |

pub mod catalog;
pub mod config;
mod db;
pub mod error;
mod hierarchy;
pub mod query;
pub mod search;
pub mod tenant;

pub use catalog::{Catalog, IMPORT_EXTENSIONS};
pub use config::{StoreConfig, default_config_path, default_data_dir};
pub use error::{ErrorKind, Result, StoreError};
pub use hierarchy::NewBlock;
pub use query::Query;
pub use search::{SearchIndex, SearchResults, SearchScope};
pub use tenant::{SharedTenantStore, TenantStore};
