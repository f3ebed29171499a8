//! Outliner command-line front end.
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.
//!
//! Usage:
//!   outliner db create notes
//!   outliner page create --db notes "Inbox"
//!   outliner block insert --db notes --page <PAGE_ID> "buy milk"
//!   outliner search --db notes milk
//!   outliner search --db notes --advanced 'milk OR "oat drink"'
//!
//! The data directory comes from `--data-dir`, then `OUTLINER_DATA_DIR`, then
//! the config file, then the platform default.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use outliner_store::SearchScope;
use outliner_types::{BlockId, PageId, WorkspaceId};
use tracing_subscriber::{EnvFilter, fmt};

/// Multi-database outliner store.
#[derive(Parser, Debug)]
#[command(name = "outliner")]
#[command(about = "Pages, nested blocks and search across named outline databases")]
struct Args {
    /// Data directory (overrides config and OUTLINER_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (RON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage databases
    #[command(subcommand)]
    Db(DbCommand),

    /// Manage pages within a database
    #[command(subcommand)]
    Page(PageCommand),

    /// Manage blocks within a database
    #[command(subcommand)]
    Block(BlockCommand),

    /// Manage workspaces within a database
    #[command(subcommand)]
    Workspace(WorkspaceCommand),

    /// Search page titles and block content
    Search {
        /// Database name or id
        #[arg(long)]
        db: String,
        /// Query text; every word must prefix-match unless --advanced
        query: String,
        /// Parse OR, NOT, "quoted phrases" and `term*` prefixes
        #[arg(long)]
        advanced: bool,
        /// pages, blocks or all
        #[arg(long, default_value_t = SearchScope::All)]
        scope: SearchScope,
        /// Results per kind (defaults to the configured limit)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Rebuild a database's search index from its contents
    RebuildSearch {
        #[arg(long)]
        db: String,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommand {
    Create {
        name: String,
    },
    List,
    Rename {
        /// Database name or id
        db: String,
        new_name: String,
    },
    Delete {
        /// Database name or id
        db: String,
    },
    /// Register a copy of an existing .db/.sqlite/.sqlite3 file
    Import {
        file: PathBuf,
        /// Name for the new database (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum PageCommand {
    Create {
        #[arg(long)]
        db: String,
        title: String,
    },
    List {
        #[arg(long)]
        db: String,
    },
    Rename {
        #[arg(long)]
        db: String,
        page: PageId,
        title: String,
    },
    Delete {
        #[arg(long)]
        db: String,
        page: PageId,
    },
}

#[derive(Subcommand, Debug)]
enum BlockCommand {
    Insert {
        #[arg(long)]
        db: String,
        #[arg(long)]
        page: PageId,
        /// Parent block (omit for a page-root block)
        #[arg(long)]
        parent: Option<BlockId>,
        /// Position among siblings; an occupied slot pushes later siblings down
        #[arg(long, default_value_t = 0)]
        position: i64,
        /// Block type tag
        #[arg(long = "type", default_value = outliner_types::DEFAULT_BLOCK_TYPE)]
        block_type: String,
        content: String,
    },
    /// Replace a block's content
    Content {
        #[arg(long)]
        db: String,
        block: BlockId,
        content: String,
    },
    /// Move a block within its sibling list
    Move {
        #[arg(long)]
        db: String,
        block: BlockId,
        position: i64,
    },
    /// Move a block (with its subtree) under another parent
    Reparent {
        #[arg(long)]
        db: String,
        block: BlockId,
        /// New parent (omit to move to the page root)
        #[arg(long)]
        parent: Option<BlockId>,
        /// Target position (defaults to after the last sibling)
        #[arg(long)]
        position: Option<i64>,
    },
    /// Delete a block and its descendants
    Delete {
        #[arg(long)]
        db: String,
        block: BlockId,
    },
    /// List a page's blocks
    List {
        #[arg(long)]
        db: String,
        page: PageId,
        /// Emit depth-first outline order with depths instead of the flat list
        #[arg(long)]
        tree: bool,
    },
}

#[derive(Subcommand, Debug)]
enum WorkspaceCommand {
    Create {
        #[arg(long)]
        db: String,
        name: String,
        /// Hex color, e.g. #4285F4
        #[arg(long, default_value = "#4285F4")]
        color: String,
    },
    List {
        #[arg(long)]
        db: String,
    },
    /// Rename and recolor a workspace
    Update {
        #[arg(long)]
        db: String,
        id: WorkspaceId,
        name: String,
        color: String,
    },
    Delete {
        #[arg(long)]
        db: String,
        id: WorkspaceId,
    },
}

fn main() -> Result<()> {
    // Logs on stderr; stdout carries JSON results.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let output = commands::run(&args)?;
    if args.pretty {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", serde_json::to_string(&output)?);
    }
    Ok(())
}
