//! Pages and catalog database records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::{DatabaseId, PageId};

/// A catalog entry for one tenant database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub id: DatabaseId,
    /// Unique across the catalog.
    pub name: String,
    /// Location of the tenant's SQLite file.
    pub path: PathBuf,
    /// Unix millis.
    pub created_at: u64,
}

/// A page: the root container for one block tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_id: PageId,
    /// Unique within the tenant database.
    pub title: String,
    /// Unix millis.
    pub created_at: u64,
}
