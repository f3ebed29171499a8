//! Shared fixtures and invariant checks for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use outliner_store::{Catalog, SharedTenantStore, StoreConfig};
use outliner_types::{BlockId, BlockTree, PageId};
use tempfile::TempDir;

/// A catalog rooted in a fresh temporary directory.
pub fn temp_catalog() -> (TempDir, Catalog) {
    let dir = tempfile::tempdir().expect("tempdir");
    let catalog = Catalog::open(StoreConfig::with_data_dir(dir.path())).expect("open catalog");
    (dir, catalog)
}

/// A catalog with one database and one page.
pub fn single_page(name: &str) -> (TempDir, Catalog, SharedTenantStore, PageId) {
    let (dir, catalog) = temp_catalog();
    let db = catalog.create(name).expect("create database");
    let store = catalog.store(&db.id).expect("open store");
    let page = store.create_page("Inbox").expect("create page");
    (dir, catalog, store, page.page_id)
}

/// Contents of one sibling list in position order.
pub fn contents(store: &SharedTenantStore, page: &PageId, parent: Option<BlockId>) -> Vec<String> {
    let tree = BlockTree::from_blocks(store.list_blocks(page).expect("list blocks"));
    tree.children_of(parent)
        .into_iter()
        .map(|b| b.content.clone())
        .collect()
}

/// Every structural invariant of a page's block tree.
pub fn assert_invariants(store: &SharedTenantStore, page: &PageId) {
    let blocks = store.list_blocks(page).expect("list blocks");
    let ids: HashSet<BlockId> = blocks.iter().map(|b| b.block_id).collect();

    let mut scopes: HashMap<Option<BlockId>, HashSet<i64>> = HashMap::new();
    for block in &blocks {
        assert_eq!(block.page_id, *page, "block {} on wrong page", block.block_id);
        assert!(block.position >= 0, "negative position on {}", block.block_id);
        if let Some(parent) = block.parent_block_id {
            assert!(ids.contains(&parent), "dangling parent under {}", block.block_id);
        }
        let fresh = scopes
            .entry(block.parent_block_id)
            .or_default()
            .insert(block.position);
        assert!(fresh, "duplicate position {} in scope", block.position);
    }

    let tree = BlockTree::from_blocks(blocks.clone());
    for block in &blocks {
        assert!(
            tree.ancestry(block.block_id).is_some(),
            "block {} does not reach the page root",
            block.block_id
        );
    }
    assert_eq!(tree.walk().len(), blocks.len());
}
