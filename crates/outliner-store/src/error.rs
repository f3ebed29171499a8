//! Store error types.

use std::io;

use outliner_types::{BlockId, InvalidField, MAX_POSITION, PageId, WorkspaceId};
use strum::{Display, EnumString};
use thiserror::Error;

/// Errors returned by the catalog and tenant stores.
///
/// Every hierarchy failure is reported before anything commits, so an `Err`
/// always means the store is unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No catalog entry for this id or name, or the database was deleted.
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("page not found: {0}")]
    PageNotFound(PageId),

    #[error("block not found: {0}")]
    BlockNotFound(BlockId),

    /// The parent named in an insert or reparent does not exist.
    #[error("parent block not found: {0}")]
    ParentNotFound(BlockId),

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(WorkspaceId),

    /// A database name or page title is already taken.
    #[error("{kind} already exists: {name}")]
    DuplicateName { kind: &'static str, name: String },

    /// Reparenting would make a block its own ancestor, or the stored parent
    /// chain already loops.
    #[error("moving block {block} under {parent} would create a cycle")]
    CycleDetected { block: BlockId, parent: BlockId },

    /// Inserting or reparenting under `parent` would nest deeper than allowed.
    #[error("tree under {parent} would exceed {max} levels")]
    DepthExceeded { parent: BlockId, max: usize },

    /// A position outside `0..=MAX_POSITION`, given or produced by a shift.
    #[error("invalid position {0}: positions must be between 0 and {MAX_POSITION}")]
    InvalidPosition(i64),

    /// A missing or malformed field.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Parent and child would sit on different pages.
    #[error("block {block} cannot move under {parent}: they belong to different pages")]
    SamePageViolation { block: BlockId, parent: BlockId },

    /// A search rebuild did not complete; the previous index is still live.
    #[error("search index rebuild failed: {0}")]
    RebuildFailed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The coarse failure taxonomy callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    DuplicateName,
    CycleDetected,
    InvalidPosition,
    Validation,
    SamePageViolation,
    /// Storage, I/O, rebuild, or configuration faults.
    Storage,
}

impl StoreError {
    /// Map onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseNotFound(_)
            | Self::PageNotFound(_)
            | Self::BlockNotFound(_)
            | Self::ParentNotFound(_)
            | Self::WorkspaceNotFound(_) => ErrorKind::NotFound,
            Self::DuplicateName { .. } => ErrorKind::DuplicateName,
            Self::CycleDetected { .. } => ErrorKind::CycleDetected,
            Self::InvalidPosition(_) => ErrorKind::InvalidPosition,
            Self::Validation { .. } | Self::DepthExceeded { .. } => ErrorKind::Validation,
            Self::SamePageViolation { .. } => ErrorKind::SamePageViolation,
            Self::RebuildFailed(_) | Self::Config(_) | Self::Sql(_) | Self::Io(_) => {
                ErrorKind::Storage
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Create a DatabaseNotFound error.
    pub fn database_not_found(id_or_name: impl ToString) -> Self {
        Self::DatabaseNotFound(id_or_name.to_string())
    }

    /// Create a DuplicateName error.
    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            kind,
            name: name.into(),
        }
    }

    /// Create a Validation error.
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

impl From<InvalidField> for StoreError {
    fn from(e: InvalidField) -> Self {
        Self::Validation {
            field: e.field,
            reason: e.reason,
        }
    }
}

/// Store result type.
pub type Result<T> = std::result::Result<T, StoreError>;
