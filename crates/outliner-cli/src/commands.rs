//! Command execution: open the catalog, run one operation, return JSON.

use anyhow::{Context, Result};
use outliner_store::{Catalog, SharedTenantStore, StoreConfig};
use outliner_types::{BlockTree, Color, DatabaseId};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{Args, BlockCommand, Command, DbCommand, PageCommand, WorkspaceCommand};

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn load_config(args: &Args) -> Result<StoreConfig> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => StoreConfig::load_default()?,
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

/// Accept either a database id or its name.
fn resolve_id(catalog: &Catalog, db: &str) -> Result<DatabaseId> {
    match db.parse::<DatabaseId>() {
        Ok(id) => Ok(id),
        Err(_) => Ok(catalog.get_by_name(db)?.id),
    }
}

fn open_store(catalog: &Catalog, db: &str) -> Result<SharedTenantStore> {
    let id = resolve_id(catalog, db)?;
    Ok(catalog.store(&id)?)
}

pub fn run(args: &Args) -> Result<Value> {
    let config = load_config(args)?;
    tracing::debug!(data_dir = %config.data_dir.display(), "using data directory");
    let catalog = Catalog::open(config)?;

    let output = match &args.command {
        Command::Db(cmd) => run_db(&catalog, cmd)?,
        Command::Page(cmd) => run_page(&catalog, cmd)?,
        Command::Block(cmd) => run_block(&catalog, cmd)?,
        Command::Workspace(cmd) => run_workspace(&catalog, cmd)?,
        Command::Search {
            db,
            query,
            scope,
            limit,
            advanced,
        } => {
            let store = open_store(&catalog, db)?;
            let results = if *advanced {
                store.search_advanced(query, *scope, *limit)?
            } else {
                store.search(query, *scope, *limit)?
            };
            to_json(&results)?
        }
        Command::RebuildSearch { db } => {
            let store = open_store(&catalog, db)?;
            let documents = store.rebuild_search()?;
            json!({ "documents": documents })
        }
    };

    catalog.close();
    Ok(output)
}

fn run_db(catalog: &Catalog, cmd: &DbCommand) -> Result<Value> {
    match cmd {
        DbCommand::Create { name } => to_json(&catalog.create(name)?),
        DbCommand::List => to_json(&catalog.list()?),
        DbCommand::Rename { db, new_name } => {
            let id = resolve_id(catalog, db)?;
            to_json(&catalog.rename(&id, new_name)?)
        }
        DbCommand::Delete { db } => {
            let id = resolve_id(catalog, db)?;
            catalog.delete(&id)?;
            Ok(json!({ "deleted": id }))
        }
        DbCommand::Import { file, name } => to_json(&catalog.import(name.as_deref(), file)?),
    }
}

fn run_page(catalog: &Catalog, cmd: &PageCommand) -> Result<Value> {
    match cmd {
        PageCommand::Create { db, title } => to_json(&open_store(catalog, db)?.create_page(title)?),
        PageCommand::List { db } => to_json(&open_store(catalog, db)?.list_pages()?),
        PageCommand::Rename { db, page, title } => {
            to_json(&open_store(catalog, db)?.rename_page(page, title)?)
        }
        PageCommand::Delete { db, page } => {
            open_store(catalog, db)?.delete_page(page)?;
            Ok(json!({ "deleted": page }))
        }
    }
}

fn run_block(catalog: &Catalog, cmd: &BlockCommand) -> Result<Value> {
    match cmd {
        BlockCommand::Insert {
            db,
            page,
            parent,
            position,
            block_type,
            content,
        } => {
            let new = outliner_store::NewBlock::new(*page, *parent, *position, content.as_str())
                .with_type(block_type.as_str());
            to_json(&open_store(catalog, db)?.insert_block(new)?)
        }
        BlockCommand::Content { db, block, content } => {
            to_json(&open_store(catalog, db)?.update_content(block, content)?)
        }
        BlockCommand::Move {
            db,
            block,
            position,
        } => to_json(&open_store(catalog, db)?.update_position(block, *position)?),
        BlockCommand::Reparent {
            db,
            block,
            parent,
            position,
        } => to_json(&open_store(catalog, db)?.update_parent(block, *parent, *position)?),
        BlockCommand::Delete { db, block } => {
            let removed = open_store(catalog, db)?.delete_block(block)?;
            Ok(json!({ "deleted": removed }))
        }
        BlockCommand::List { db, page, tree } => {
            let blocks = open_store(catalog, db)?.list_blocks(page)?;
            if !*tree {
                return to_json(&blocks);
            }
            let tree = BlockTree::from_blocks(blocks);
            let outline: Vec<Value> = tree
                .walk()
                .into_iter()
                .map(|(depth, block)| json!({ "depth": depth, "block": block }))
                .collect();
            Ok(Value::Array(outline))
        }
    }
}

fn run_workspace(catalog: &Catalog, cmd: &WorkspaceCommand) -> Result<Value> {
    match cmd {
        WorkspaceCommand::Create { db, name, color } => {
            let color = Color::parse(color)?;
            to_json(&open_store(catalog, db)?.create_workspace(name, color)?)
        }
        WorkspaceCommand::List { db } => to_json(&open_store(catalog, db)?.list_workspaces()?),
        WorkspaceCommand::Update {
            db,
            id,
            name,
            color,
        } => {
            let color = Color::parse(color)?;
            to_json(&open_store(catalog, db)?.update_workspace(*id, name, color)?)
        }
        WorkspaceCommand::Delete { db, id } => {
            open_store(catalog, db)?.delete_workspace(*id)?;
            Ok(json!({ "deleted": id }))
        }
    }
}
