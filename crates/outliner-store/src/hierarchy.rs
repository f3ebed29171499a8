//! Block hierarchy engine.
//!
//! Every function here runs inside the caller's write transaction and either
//! completes all of its row changes or returns an error before the caller
//! commits. Sibling order lives in `position`: unique within a scope, within
//! `0..=MAX_POSITION`, gaps allowed.
//!
//! A *scope* is one sibling list: `(page_id, parent_block_id)`, with a `NULL`
//! parent for the page's root blocks. Scope queries use `parent_block_id IS ?`
//! so the root scope matches on `NULL`.
//!
//! Depth counts levels: a page-root block is at depth 1. Inserts and reparents
//! that would push any block below `max_depth` fail with `DepthExceeded`.

use std::collections::HashSet;

use outliner_types::{Block, BlockId, MAX_POSITION, PageId, now_millis, validate};
use rusqlite::{Connection, OptionalExtension, params};

use crate::db;
use crate::error::{Result, StoreError};
use crate::search::{DocKey, IndexDelta};

/// One sibling list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Scope {
    pub page_id: PageId,
    pub parent: Option<BlockId>,
}

impl Scope {
    pub fn of(block: &Block) -> Self {
        Self {
            page_id: block.page_id,
            parent: block.parent_block_id,
        }
    }

    fn page_param(&self) -> String {
        self.page_id.to_string()
    }

    fn parent_param(&self) -> Option<String> {
        self.parent.map(|p| p.to_string())
    }
}

// ============================================================================
// Scope primitives
// ============================================================================

fn position_taken(conn: &Connection, scope: Scope, position: i64) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM blocks
             WHERE page_id = ?1 AND parent_block_id IS ?2 AND position = ?3
             LIMIT 1",
            params![scope.page_param(), scope.parent_param(), position],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Highest position in the scope, ignoring `exclude`.
fn max_position(conn: &Connection, scope: Scope, exclude: Option<BlockId>) -> Result<Option<i64>> {
    Ok(conn.query_row(
        "SELECT MAX(position) FROM blocks
         WHERE page_id = ?1 AND parent_block_id IS ?2 AND block_id IS NOT ?3",
        params![
            scope.page_param(),
            scope.parent_param(),
            exclude.map(|b| b.to_string())
        ],
        |row| row.get(0),
    )?)
}

/// Add `delta` to every position in `from..=to` (`to = None` is unbounded),
/// skipping `exclude`.
fn shift(
    conn: &Connection,
    scope: Scope,
    from: i64,
    to: Option<i64>,
    delta: i64,
    exclude: Option<BlockId>,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE blocks SET position = position + ?1
         WHERE page_id = ?2 AND parent_block_id IS ?3
           AND position >= ?4 AND (?5 IS NULL OR position <= ?5)
           AND block_id IS NOT ?6",
        params![
            delta,
            scope.page_param(),
            scope.parent_param(),
            from,
            to,
            exclude.map(|b| b.to_string())
        ],
    )?)
}

fn check_position(position: i64) -> Result<()> {
    if !(0..=MAX_POSITION).contains(&position) {
        return Err(StoreError::InvalidPosition(position));
    }
    Ok(())
}

/// The slot after `position`, if that is still a legal position.
fn next_slot(position: i64) -> Result<i64> {
    position
        .checked_add(1)
        .filter(|next| *next <= MAX_POSITION)
        .ok_or(StoreError::InvalidPosition(position.saturating_add(1)))
}

/// Insert-collision rule: if `position` is occupied, everything at or after
/// it moves up one.
fn make_room(conn: &Connection, scope: Scope, position: i64) -> Result<()> {
    if position_taken(conn, scope, position)? {
        // The highest sibling moves too, so it must have room above it.
        if let Some(top) = max_position(conn, scope, None)? {
            next_slot(top)?;
        }
        shift(conn, scope, position, None, 1, None)?;
    }
    Ok(())
}

/// Close the slot `vacated` left behind in `scope`.
fn compact_after(conn: &Connection, scope: Scope, vacated: i64) -> Result<()> {
    let Some(from) = vacated.checked_add(1) else {
        return Ok(());
    };
    shift(conn, scope, from, None, -1, None)?;
    Ok(())
}

fn set_position(conn: &Connection, block: BlockId, position: i64) -> Result<()> {
    conn.execute(
        "UPDATE blocks SET position = ?1 WHERE block_id = ?2",
        params![position, block.to_string()],
    )?;
    Ok(())
}

// ============================================================================
// Tree walks
// ============================================================================

/// `start` followed by its ancestors up to the page root.
///
/// The chain length is the depth of `start`. A chain that revisits a block
/// means the stored tree already loops, which is reported as a cycle.
fn ancestors(conn: &Connection, start: BlockId) -> Result<Vec<BlockId>> {
    let mut stmt = conn.prepare_cached("SELECT parent_block_id FROM blocks WHERE block_id = ?1")?;
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(start);
    while let Some(id) = current {
        if !seen.insert(id) {
            tracing::warn!(block = %id, "stored parent chain loops");
            return Err(StoreError::CycleDetected {
                block: id,
                parent: start,
            });
        }
        chain.push(id);
        current = stmt
            .query_row(params![id.to_string()], |row| db::parse_opt_col(row, 0))
            .optional()?
            .flatten();
    }
    Ok(chain)
}

/// `root` and all of its descendants, parents before children, each with its
/// distance below `root`.
fn subtree(conn: &Connection, root: BlockId) -> Result<Vec<(BlockId, usize)>> {
    let mut stmt = conn.prepare_cached("SELECT block_id FROM blocks WHERE parent_block_id = ?1")?;
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut pending = vec![(root, 0)];
    while let Some((id, below)) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        out.push((id, below));
        let children = stmt
            .query_map(params![id.to_string()], |row| db::parse_col::<BlockId>(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        pending.extend(children.into_iter().map(|child| (child, below + 1)));
    }
    Ok(out)
}

/// Fail when hanging `height` levels under a parent at `parent_depth` would
/// exceed `max_depth`.
fn check_depth(parent: BlockId, parent_depth: usize, height: usize, max_depth: usize) -> Result<()> {
    if parent_depth + height > max_depth {
        return Err(StoreError::DepthExceeded {
            parent,
            max: max_depth,
        });
    }
    Ok(())
}

/// Load a prospective parent, checking it lives on `page`.
fn load_parent(conn: &Connection, parent: BlockId, page: PageId, block: Option<BlockId>) -> Result<Block> {
    let parent_block = db::find_block(conn, &parent)?.ok_or(StoreError::ParentNotFound(parent))?;
    if parent_block.page_id != page {
        return Err(StoreError::SamePageViolation {
            block: block.unwrap_or_else(BlockId::nil),
            parent,
        });
    }
    Ok(parent_block)
}

// ============================================================================
// Operations
// ============================================================================

/// Arguments for [`insert`].
#[derive(Clone, Debug)]
pub struct NewBlock {
    pub page_id: PageId,
    pub parent: Option<BlockId>,
    pub position: i64,
    pub content: String,
    pub block_type: String,
}

impl NewBlock {
    /// A text block at `position` under `parent` (None = page root).
    pub fn new(page_id: PageId, parent: Option<BlockId>, position: i64, content: impl Into<String>) -> Self {
        Self {
            page_id,
            parent,
            position,
            content: content.into(),
            block_type: outliner_types::DEFAULT_BLOCK_TYPE.to_string(),
        }
    }

    pub fn with_type(mut self, block_type: impl Into<String>) -> Self {
        self.block_type = block_type.into();
        self
    }
}

pub(crate) fn insert(
    conn: &Connection,
    new: NewBlock,
    max_depth: usize,
    deltas: &mut Vec<IndexDelta>,
) -> Result<Block> {
    check_position(new.position)?;
    let block_type = validate::block_type(&new.block_type)?;
    db::get_page(conn, &new.page_id)?;
    if let Some(parent) = new.parent {
        load_parent(conn, parent, new.page_id, None)?;
        let depth = ancestors(conn, parent)?.len();
        check_depth(parent, depth, 1, max_depth)?;
    }

    let scope = Scope {
        page_id: new.page_id,
        parent: new.parent,
    };
    make_room(conn, scope, new.position)?;

    let block = Block {
        block_id: BlockId::new(),
        content: new.content,
        block_type,
        page_id: new.page_id,
        parent_block_id: new.parent,
        position: new.position,
        created_at: now_millis(),
    };
    db::insert_block(conn, &block)?;
    deltas.push(IndexDelta::Upsert(DocKey::Block(block.block_id), block.content.clone()));
    Ok(block)
}

pub(crate) fn update_content(
    conn: &Connection,
    id: BlockId,
    content: &str,
    deltas: &mut Vec<IndexDelta>,
) -> Result<Block> {
    let mut block = db::get_block(conn, &id)?;
    conn.execute(
        "UPDATE blocks SET content = ?1 WHERE block_id = ?2",
        params![content, id.to_string()],
    )?;
    block.content = content.to_string();
    deltas.push(IndexDelta::Upsert(DocKey::Block(id), block.content.clone()));
    Ok(block)
}

/// Move within the current scope. Only siblings between the old and new slot
/// change position.
pub(crate) fn update_position(conn: &Connection, id: BlockId, new_position: i64) -> Result<Block> {
    check_position(new_position)?;
    let mut block = db::get_block(conn, &id)?;
    let old = block.position;
    if new_position == old {
        return Ok(block);
    }
    let scope = Scope::of(&block);

    if new_position < old {
        // [new, old) moves up one
        shift(conn, scope, new_position, Some(old - 1), 1, Some(id))?;
    } else {
        // (old, new] moves down one
        shift(conn, scope, old + 1, Some(new_position), -1, Some(id))?;
    }
    set_position(conn, id, new_position)?;
    block.position = new_position;
    Ok(block)
}

/// Move a block (and its subtree) under `new_parent`.
///
/// `position = None` appends after the last sibling in the target scope.
pub(crate) fn update_parent(
    conn: &Connection,
    id: BlockId,
    new_parent: Option<BlockId>,
    position: Option<i64>,
    max_depth: usize,
) -> Result<Block> {
    if let Some(p) = position {
        check_position(p)?;
    }
    let mut block = db::get_block(conn, &id)?;
    let mut parent_depth = 0;
    if let Some(parent) = new_parent {
        load_parent(conn, parent, block.page_id, Some(id))?;
        let chain = ancestors(conn, parent)?;
        if chain.contains(&id) {
            return Err(StoreError::CycleDetected { block: id, parent });
        }
        parent_depth = chain.len();
    }

    let old_scope = Scope::of(&block);
    let old_position = block.position;
    let new_scope = Scope {
        page_id: block.page_id,
        parent: new_parent,
    };

    if new_scope == old_scope {
        return match position {
            Some(p) => update_position(conn, id, p),
            None => match max_position(conn, old_scope, Some(id))? {
                Some(last) if last > old_position => update_position(conn, id, last),
                _ => Ok(block),
            },
        };
    }

    if let Some(parent) = new_parent {
        let height = subtree(conn, id)?
            .iter()
            .map(|(_, below)| below + 1)
            .max()
            .unwrap_or(1);
        check_depth(parent, parent_depth, height, max_depth)?;
    }

    // The block is still in its old scope here, so the target shift skips it.
    let target = match position {
        Some(p) => {
            make_room(conn, new_scope, p)?;
            p
        }
        None => match max_position(conn, new_scope, None)? {
            Some(last) => next_slot(last)?,
            None => 0,
        },
    };
    conn.execute(
        "UPDATE blocks SET parent_block_id = ?1, position = ?2 WHERE block_id = ?3",
        params![new_parent.map(|p| p.to_string()), target, id.to_string()],
    )?;
    compact_after(conn, old_scope, old_position)?;

    block.parent_block_id = new_parent;
    block.position = target;
    Ok(block)
}

/// Delete a block with its whole subtree and close the gap it leaves.
///
/// Returns the ids removed, the block itself first.
pub(crate) fn delete(conn: &Connection, id: BlockId, deltas: &mut Vec<IndexDelta>) -> Result<Vec<BlockId>> {
    let block = db::get_block(conn, &id)?;
    let doomed: Vec<BlockId> = subtree(conn, id)?.into_iter().map(|(b, _)| b).collect();

    let mut stmt = conn.prepare_cached("DELETE FROM blocks WHERE block_id = ?1")?;
    for victim in doomed.iter().rev() {
        stmt.execute(params![victim.to_string()])?;
    }
    compact_after(conn, Scope::of(&block), block.position)?;

    deltas.extend(doomed.iter().map(|b| IndexDelta::Remove(DocKey::Block(*b))));
    tracing::debug!(block = %id, removed = doomed.len(), "deleted block subtree");
    Ok(doomed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use outliner_types::Page;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const DEPTH: usize = 100;

    struct Fixture {
        _dir: tempfile::TempDir,
        conn: Connection,
        page: PageId,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let conn = db::open_tenant(&dir.path().join("t.db"), Duration::from_secs(1), true).unwrap();
        let page = Page {
            page_id: PageId::new(),
            title: "Inbox".into(),
            created_at: now_millis(),
        };
        db::insert_page(&conn, &page).unwrap();
        Fixture {
            _dir: dir,
            conn,
            page: page.page_id,
        }
    }

    impl Fixture {
        fn add(&self, parent: Option<BlockId>, position: i64, content: &str) -> BlockId {
            let mut deltas = Vec::new();
            insert(
                &self.conn,
                NewBlock::new(self.page, parent, position, content),
                DEPTH,
                &mut deltas,
            )
            .unwrap()
            .block_id
        }

        /// Contents of one scope in position order, with positions.
        fn scope(&self, parent: Option<BlockId>) -> Vec<(i64, String)> {
            let mut blocks: Vec<Block> = db::list_blocks(&self.conn, &self.page)
                .unwrap()
                .into_iter()
                .filter(|b| b.parent_block_id == parent)
                .collect();
            blocks.sort_by_key(|b| b.position);
            blocks.into_iter().map(|b| (b.position, b.content)).collect()
        }
    }

    fn owned(items: &[(i64, &str)]) -> Vec<(i64, String)> {
        items.iter().map(|(p, s)| (*p, s.to_string())).collect()
    }

    #[test]
    fn test_insert_collision_shifts_tail() {
        let f = fixture();
        f.add(None, 0, "a");
        f.add(None, 1, "b");
        f.add(None, 0, "c");
        assert_eq!(f.scope(None), owned(&[(0, "c"), (1, "a"), (2, "b")]));
    }

    #[test]
    fn test_insert_into_gap_leaves_others() {
        let f = fixture();
        f.add(None, 0, "a");
        f.add(None, 5, "b");
        f.add(None, 3, "c");
        assert_eq!(f.scope(None), owned(&[(0, "a"), (3, "c"), (5, "b")]));
    }

    #[test]
    fn test_insert_validates_references() {
        let f = fixture();
        let mut deltas = Vec::new();
        let missing_page = insert(
            &f.conn,
            NewBlock::new(PageId::new(), None, 0, "x"),
            DEPTH,
            &mut deltas,
        );
        assert!(matches!(missing_page, Err(StoreError::PageNotFound(_))));

        let missing_parent = insert(
            &f.conn,
            NewBlock::new(f.page, Some(BlockId::new()), 0, "x"),
            DEPTH,
            &mut deltas,
        );
        assert!(matches!(missing_parent, Err(StoreError::ParentNotFound(_))));

        let negative = insert(&f.conn, NewBlock::new(f.page, None, -1, "x"), DEPTH, &mut deltas);
        assert!(matches!(negative, Err(StoreError::InvalidPosition(-1))));

        let bad_type = insert(
            &f.conn,
            NewBlock::new(f.page, None, 0, "x").with_type("Not A Type"),
            DEPTH,
            &mut deltas,
        );
        assert!(matches!(bad_type, Err(StoreError::Validation { .. })));
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_insert_rejects_parent_on_other_page() {
        let f = fixture();
        let other = Page {
            page_id: PageId::new(),
            title: "Other".into(),
            created_at: 0,
        };
        db::insert_page(&f.conn, &other).unwrap();
        let mut deltas = Vec::new();
        let foreign = insert(
            &f.conn,
            NewBlock::new(other.page_id, None, 0, "foreign"),
            DEPTH,
            &mut deltas,
        )
        .unwrap();

        let err = insert(
            &f.conn,
            NewBlock::new(f.page, Some(foreign.block_id), 0, "x"),
            DEPTH,
            &mut deltas,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::SamePageViolation { .. }));
    }

    #[test]
    fn test_move_earlier_shifts_range_up() {
        let f = fixture();
        f.add(None, 0, "a");
        f.add(None, 1, "b");
        let c = f.add(None, 2, "c");
        update_position(&f.conn, c, 0).unwrap();
        assert_eq!(f.scope(None), owned(&[(0, "c"), (1, "a"), (2, "b")]));
    }

    #[test]
    fn test_move_later_shifts_range_down() {
        let f = fixture();
        let a = f.add(None, 0, "a");
        f.add(None, 1, "b");
        f.add(None, 2, "c");
        f.add(None, 3, "d");
        update_position(&f.conn, a, 2).unwrap();
        assert_eq!(
            f.scope(None),
            owned(&[(0, "b"), (1, "c"), (2, "a"), (3, "d")])
        );
    }

    #[test]
    fn test_move_past_end_keeps_unique() {
        let f = fixture();
        let a = f.add(None, 0, "a");
        f.add(None, 1, "b");
        update_position(&f.conn, a, 9).unwrap();
        assert_eq!(f.scope(None), owned(&[(0, "b"), (9, "a")]));
    }

    #[test]
    fn test_move_into_gap_touches_nothing_else() {
        let f = fixture();
        let a = f.add(None, 0, "a");
        f.add(None, 4, "b");
        f.add(None, 5, "c");
        update_position(&f.conn, a, 2).unwrap();
        assert_eq!(f.scope(None), owned(&[(2, "a"), (4, "b"), (5, "c")]));

        update_position(&f.conn, a, 4).unwrap();
        assert_eq!(f.scope(None), owned(&[(3, "b"), (4, "a"), (5, "c")]));
    }

    #[test]
    fn test_reparent_appends_and_compacts() {
        let f = fixture();
        let a = f.add(None, 0, "a");
        let b = f.add(None, 1, "b");
        f.add(None, 2, "c");
        f.add(Some(a), 0, "a0");

        let moved = update_parent(&f.conn, b, Some(a), None, 100).unwrap();
        assert_eq!(moved.parent_block_id, Some(a));
        assert_eq!(moved.position, 1);
        assert_eq!(f.scope(None), owned(&[(0, "a"), (1, "c")]));
        assert_eq!(f.scope(Some(a)), owned(&[(0, "a0"), (1, "b")]));
    }

    #[test]
    fn test_reparent_explicit_position_collides() {
        let f = fixture();
        let a = f.add(None, 0, "a");
        let b = f.add(None, 1, "b");
        f.add(Some(a), 0, "a0");
        f.add(Some(a), 1, "a1");

        update_parent(&f.conn, b, Some(a), Some(0), 100).unwrap();
        assert_eq!(
            f.scope(Some(a)),
            owned(&[(0, "b"), (1, "a0"), (2, "a1")])
        );
    }

    #[test]
    fn test_reparent_to_root_and_empty_scope() {
        let f = fixture();
        let a = f.add(None, 0, "a");
        let b = f.add(None, 1, "b");
        let x = f.add(Some(a), 0, "x");

        update_parent(&f.conn, b, Some(x), None, 100).unwrap();
        assert_eq!(f.scope(Some(x)), owned(&[(0, "b")]));

        update_parent(&f.conn, b, None, None, 100).unwrap();
        assert_eq!(f.scope(None), owned(&[(0, "a"), (1, "b")]));
        assert!(f.scope(Some(x)).is_empty());
    }

    #[test]
    fn test_reparent_cycle_rejected_unchanged() {
        let f = fixture();
        let a = f.add(None, 0, "a");
        let b = f.add(Some(a), 0, "b");
        let c = f.add(Some(b), 0, "c");
        let before = db::list_blocks(&f.conn, &f.page).unwrap();

        for (block, parent) in [(a, c), (a, b), (a, a)] {
            let err = update_parent(&f.conn, block, Some(parent), None, 100).unwrap_err();
            assert!(matches!(err, StoreError::CycleDetected { .. }), "{err:?}");
        }
        assert_eq!(db::list_blocks(&f.conn, &f.page).unwrap(), before);
    }

    #[test]
    fn test_reparent_within_same_scope_is_a_move() {
        let f = fixture();
        let a = f.add(None, 0, "a");
        let b = f.add(None, 1, "b");
        update_parent(&f.conn, a, None, None, 100).unwrap();
        assert_eq!(f.scope(None), owned(&[(0, "b"), (1, "a")]));

        // Already last: nothing moves.
        update_parent(&f.conn, a, None, None, 100).unwrap();
        update_parent(&f.conn, b, None, Some(1), 100).unwrap();
        assert_eq!(f.scope(None), owned(&[(0, "a"), (1, "b")]));
    }

    #[test]
    fn test_depth_bound_is_not_a_cycle() {
        let f = fixture();
        let mut chain = Vec::new();
        let mut parent = None;
        for i in 0..4 {
            let id = f.add(parent, 0, &format!("level {i}"));
            chain.push(id);
            parent = Some(id);
        }
        let loose = f.add(None, 1, "loose");
        let loose_child = f.add(Some(loose), 0, "loose child");

        // Four levels plus a two-level subtree do not fit in five.
        let err = update_parent(&f.conn, loose, Some(chain[3]), None, 5).unwrap_err();
        assert!(matches!(err, StoreError::DepthExceeded { max: 5, .. }), "{err:?}");
        assert_eq!(f.scope(Some(chain[3])), Vec::new());

        // One level up it fits exactly.
        update_parent(&f.conn, loose, Some(chain[2]), None, 5).unwrap();
        assert_eq!(
            f.scope(Some(chain[2])),
            owned(&[(0, "level 3"), (1, "loose")])
        );

        let mut deltas = Vec::new();
        let err = insert(
            &f.conn,
            NewBlock::new(f.page, Some(loose_child), 0, "too deep"),
            5,
            &mut deltas,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::DepthExceeded { .. }), "{err:?}");
        insert(
            &f.conn,
            NewBlock::new(f.page, Some(loose_child), 0, "fits"),
            6,
            &mut deltas,
        )
        .unwrap();
    }

    #[test]
    fn test_looping_parent_chain_reported_as_cycle() {
        let f = fixture();
        let a = f.add(None, 0, "a");
        let b = f.add(Some(a), 0, "b");
        let loose = f.add(None, 1, "loose");
        f.conn
            .execute(
                "UPDATE blocks SET parent_block_id = ?1 WHERE block_id = ?2",
                params![b.to_string(), a.to_string()],
            )
            .unwrap();

        let err = update_parent(&f.conn, loose, Some(b), None, DEPTH).unwrap_err();
        assert!(matches!(err, StoreError::CycleDetected { .. }), "{err:?}");
    }

    #[test]
    fn test_positions_stop_at_ceiling() {
        let f = fixture();
        let mut deltas = Vec::new();
        for bad in [MAX_POSITION + 1, i64::MAX] {
            let err = insert(
                &f.conn,
                NewBlock::new(f.page, None, bad, "x"),
                DEPTH,
                &mut deltas,
            )
            .unwrap_err();
            assert!(matches!(err, StoreError::InvalidPosition(p) if p == bad), "{err:?}");
        }

        let top = f.add(None, MAX_POSITION, "top");
        f.add(None, 0, "bottom");
        // Both collisions would push `top` past the ceiling.
        for at in [MAX_POSITION, 0] {
            let err = insert(
                &f.conn,
                NewBlock::new(f.page, None, at, "again"),
                DEPTH,
                &mut deltas,
            )
            .unwrap_err();
            assert!(matches!(err, StoreError::InvalidPosition(_)), "{err:?}");
        }
        assert_eq!(
            f.scope(None),
            owned(&[(0, "bottom"), (MAX_POSITION, "top")])
        );

        // No slot after `top` for an appended block.
        let child = f.add(Some(top), 0, "child");
        let err = update_parent(&f.conn, child, None, None, DEPTH).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPosition(_)), "{err:?}");
        assert_eq!(f.scope(Some(top)), owned(&[(0, "child")]));
        assert!(matches!(
            update_position(&f.conn, child, MAX_POSITION + 1),
            Err(StoreError::InvalidPosition(_))
        ));

        // Deleting the block at the ceiling leaves nothing to compact.
        delete(&f.conn, top, &mut deltas).unwrap();
        assert_eq!(f.scope(None), owned(&[(0, "bottom")]));
        assert_eq!(db::list_blocks(&f.conn, &f.page).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_cascades_and_compacts() {
        let f = fixture();
        let a = f.add(None, 0, "a");
        let b = f.add(None, 1, "b");
        f.add(None, 2, "c");
        let b0 = f.add(Some(b), 0, "b0");
        f.add(Some(b0), 0, "b00");
        f.add(Some(a), 0, "a0");

        let mut deltas = Vec::new();
        let removed = delete(&f.conn, b, &mut deltas).unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(removed[0], b);
        assert_eq!(deltas.len(), 3);
        assert_eq!(f.scope(None), owned(&[(0, "a"), (1, "c")]));
        assert_eq!(f.scope(Some(a)), owned(&[(0, "a0")]));
        assert_eq!(db::list_blocks(&f.conn, &f.page).unwrap().len(), 3);

        assert!(matches!(
            delete(&f.conn, b, &mut deltas),
            Err(StoreError::BlockNotFound(_))
        ));
    }
}
