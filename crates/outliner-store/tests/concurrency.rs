//! Concurrent access across and within tenant databases.

mod common;

use std::sync::Arc;

use common::{assert_invariants, temp_catalog};
use outliner_store::{Catalog, ErrorKind, NewBlock, SearchScope, StoreConfig};
use outliner_types::BlockTree;
use pretty_assertions::assert_eq;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_on_one_page() {
    let (_dir, catalog) = temp_catalog();
    let db = catalog.create("shared").unwrap();
    let store = catalog.store(&db.id).unwrap();
    let page = store.create_page("Inbox").unwrap().page_id;

    let mut tasks = JoinSet::new();
    let num_tasks = 4;
    let ops_per_task = 25;
    for i in 0..num_tasks {
        let store = Arc::clone(&store);
        tasks.spawn_blocking(move || {
            for j in 0..ops_per_task {
                // Everyone fights over the front of the list.
                store
                    .insert_block(NewBlock::new(page, None, 0, format!("task-{i}-op-{j}")))
                    .expect("insert");
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("Task panicked");
    }

    assert_eq!(
        store.list_blocks(&page).unwrap().len(),
        num_tasks * ops_per_task
    );
    assert_invariants(&store, &page);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_moves_stay_acyclic() {
    let (_dir, catalog) = temp_catalog();
    let db = catalog.create("shared").unwrap();
    let store = catalog.store(&db.id).unwrap();
    let page = store.create_page("Inbox").unwrap().page_id;

    let mut ids = Vec::new();
    for i in 0..12 {
        ids.push(
            store
                .insert_block(NewBlock::new(page, None, i, format!("b{i}")))
                .unwrap()
                .block_id,
        );
    }
    let ids = Arc::new(ids);

    let mut tasks = JoinSet::new();
    for t in 0..4usize {
        let store = Arc::clone(&store);
        let ids = Arc::clone(&ids);
        tasks.spawn_blocking(move || {
            for round in 0..30usize {
                let child = ids[(t * 7 + round * 5) % ids.len()];
                let parent = ids[(t * 3 + round * 11 + 1) % ids.len()];
                match store.update_parent(&child, Some(parent), None) {
                    Ok(_) => {}
                    Err(e) => assert_eq!(e.kind(), ErrorKind::CycleDetected, "{e}"),
                }
                if round % 4 == 0 {
                    let _ = store.update_position(&child, (round % 3) as i64);
                }
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("Task panicked");
    }

    assert_invariants(&store, &page);
    let tree = BlockTree::from_blocks(store.list_blocks(&page).unwrap());
    assert_eq!(tree.walk().len(), ids.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_databases_are_independent() {
    let (_dir, catalog) = temp_catalog();
    let catalog = Arc::new(catalog);

    let mut tasks = JoinSet::new();
    for i in 0..4 {
        let catalog = Arc::clone(&catalog);
        tasks.spawn_blocking(move || {
            let db = catalog.create(&format!("tenant-{i}")).expect("create");
            let store = catalog.store(&db.id).expect("store");
            let page = store.create_page("Inbox").expect("page").page_id;
            for j in 0..20 {
                store
                    .insert_block(NewBlock::new(page, None, j, format!("tenant {i} item {j}")))
                    .expect("insert");
            }
            (db.id, page)
        });
    }

    let mut created = Vec::new();
    while let Some(result) = tasks.join_next().await {
        created.push(result.expect("Task panicked"));
    }

    assert_eq!(catalog.list().unwrap().len(), 4);
    for (id, page) in created {
        let store = catalog.store(&id).unwrap();
        let blocks = store.list_blocks(&page).unwrap();
        assert_eq!(blocks.len(), 20);
        let tenant = blocks[0].content.split(' ').nth(1).unwrap().to_string();
        assert!(blocks.iter().all(|b| b.content.contains(&format!("tenant {tenant} "))));
        assert_invariants(&store, &page);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rebuild_during_writes_loses_nothing() {
    let (_dir, catalog) = temp_catalog();
    let db = catalog.create("busy").unwrap();
    let store = catalog.store(&db.id).unwrap();
    let page = store.create_page("Inbox").unwrap().page_id;
    for i in 0..200 {
        store
            .insert_block(NewBlock::new(page, None, i, format!("seed {i}")))
            .unwrap();
    }

    let mut tasks = JoinSet::new();
    {
        let store = Arc::clone(&store);
        tasks.spawn_blocking(move || {
            for i in 0..100 {
                store
                    .insert_block(NewBlock::new(page, None, 0, format!("latecomer {i}")))
                    .expect("insert");
            }
        });
    }
    {
        let store = Arc::clone(&store);
        tasks.spawn_blocking(move || {
            for _ in 0..5 {
                store.rebuild_search().expect("rebuild");
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("Task panicked");
    }

    let hits = store
        .search("latecomer", SearchScope::Blocks, Some(1_000))
        .unwrap();
    assert_eq!(hits.blocks.len(), 100);

    let before = store.search("seed", SearchScope::Blocks, Some(1_000)).unwrap();
    store.rebuild_search().unwrap();
    let after = store.search("seed", SearchScope::Blocks, Some(1_000)).unwrap();
    assert_eq!(before, after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_fences_inflight_writers() {
    let (_dir, catalog) = temp_catalog();
    let catalog = Arc::new(catalog);
    let db = catalog.create("doomed").unwrap();
    let store = catalog.store(&db.id).unwrap();
    let page = store.create_page("Inbox").unwrap().page_id;

    let mut tasks = JoinSet::new();
    {
        let store = Arc::clone(&store);
        tasks.spawn_blocking(move || {
            let mut failures = 0;
            for i in 0..200 {
                match store.insert_block(NewBlock::new(page, None, i, "x")) {
                    Ok(_) => assert_eq!(failures, 0, "write succeeded after deletion"),
                    Err(e) => {
                        assert!(e.is_not_found(), "{e}");
                        failures += 1;
                    }
                }
            }
        });
    }
    {
        let catalog = Arc::clone(&catalog);
        tasks.spawn_blocking(move || catalog.delete(&db.id).expect("delete"));
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("Task panicked");
    }

    assert!(store.list_pages().unwrap_err().is_not_found());
    assert!(catalog.list().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_opens_share_one_handle() {
    let (dir, catalog) = temp_catalog();
    let db = catalog.create("lazy").unwrap();
    {
        let store = catalog.store(&db.id).unwrap();
        let page = store.create_page("Inbox").unwrap().page_id;
        for i in 0..50 {
            store
                .insert_block(NewBlock::new(page, None, i, format!("item {i}")))
                .unwrap();
        }
    }
    catalog.close();

    let catalog = Arc::new(Catalog::open(StoreConfig::with_data_dir(dir.path())).unwrap());
    assert_eq!(catalog.open_stores(), 0);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let catalog = Arc::clone(&catalog);
        tasks.spawn_blocking(move || {
            // Registry reads keep working while handles are being opened.
            assert_eq!(catalog.list().expect("list").len(), 1);
            catalog.store(&db.id).expect("store")
        });
    }
    let mut handles = Vec::new();
    while let Some(result) = tasks.join_next().await {
        handles.push(result.expect("Task panicked"));
    }

    assert_eq!(catalog.open_stores(), 1);
    let live = catalog.store(&db.id).unwrap();
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &live)));
    assert_eq!(
        live.search("item", SearchScope::Blocks, Some(100)).unwrap().blocks.len(),
        50
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_open_racing_delete_leaves_nothing_behind() {
    let (dir, catalog) = temp_catalog();
    let db = catalog.create("short-lived").unwrap();
    catalog.close();
    let catalog = Arc::new(Catalog::open(StoreConfig::with_data_dir(dir.path())).unwrap());

    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let catalog = Arc::clone(&catalog);
        tasks.spawn_blocking(move || {
            for _ in 0..20 {
                if let Err(e) = catalog.store(&db.id) {
                    assert!(e.is_not_found(), "{e}");
                }
            }
        });
    }
    {
        let catalog = Arc::clone(&catalog);
        tasks.spawn_blocking(move || catalog.delete(&db.id).expect("delete"));
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("Task panicked");
    }

    assert_eq!(catalog.open_stores(), 0);
    assert!(catalog.store(&db.id).unwrap_err().is_not_found());
    let leftovers: Vec<_> = std::fs::read_dir(catalog.config().databases_dir())
        .unwrap()
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}
