//! Shared identity and outline types for the outliner store.
//!
//! This crate is the leaf of the workspace: typed IDs, catalog records, pages,
//! blocks, workspaces, and field validation. It has **no internal
//! dependencies**, so the store, the CLI, and any other caller agree on the same
//! vocabulary.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Catalog
//!     └── Database (DatabaseId, unique name, one SQLite file)
//!             ├── Workspace (WorkspaceId, integer sequence)
//!             └── Page (PageId, unique title)
//!                     └── Block (BlockId, parent pointer + position)
//!                             └── Block ...
//! ```
//!
//! # Key Types
//!
//! |-----------------|-------------------------------------------------|
//! | Type            | Purpose                                         |
//! |-----------------|-------------------------------------------------|
//! | [`Database`]    | Catalog entry (id, name, path, created_at)      |
//! | [`Page`]        | Root container for a block tree                 |
//! | [`Block`]       | Outline node with content, type tag, position   |
//! | [`BlockTree`]   | Caller-side grouping of a flat block list       |
//! | [`Workspace`]   | Partition label with a display color            |
//! |-----------------|-------------------------------------------------|

pub mod block;
pub mod ids;
pub mod page;
pub mod validate;
pub mod workspace;

// Re-export primary types at crate root for convenience.
pub use block::{Block, BlockTree, DEFAULT_BLOCK_TYPE, MAX_POSITION, MAX_TREE_DEPTH};
pub use ids::{BlockId, DatabaseId, PageId, WorkspaceId};
pub use page::{Database, Page};
pub use validate::InvalidField;
pub use workspace::{Color, DEFAULT_WORKSPACE_COLOR, DEFAULT_WORKSPACE_NAME, Workspace};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
