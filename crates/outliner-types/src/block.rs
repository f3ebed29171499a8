//! Blocks and caller-side tree reconstruction.
//!
//! The store hands out flat block lists: every block carries its page, its
//! parent pointer, and a position among its siblings. [`BlockTree`] groups such
//! a list into ordered sibling scopes so callers can walk the outline without
//! the store having to return nested structures.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ids::{BlockId, PageId};

/// Type tag given to blocks when the caller does not pick one.
pub const DEFAULT_BLOCK_TYPE: &str = "text";

/// Default bound on how many levels a page's block tree may have.
///
/// Outlines nest a few dozen levels at most. The store refuses inserts and
/// reparents that would go deeper, and caller-side walks stop here.
pub const MAX_TREE_DEPTH: usize = 10_000;

/// Largest sibling position the store accepts.
///
/// Also the largest integer a JSON client can hold exactly, and far enough
/// below `i64::MAX` that shifting a scope by one can never overflow.
pub const MAX_POSITION: i64 = (1 << 53) - 1;

/// A block row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub block_id: BlockId,
    pub content: String,
    pub block_type: String,
    /// The page this block's tree hangs from. Set on every block, root or not.
    pub page_id: PageId,
    /// `None` for page-root blocks.
    pub parent_block_id: Option<BlockId>,
    /// Order key within the sibling scope. Unique per scope, gaps allowed.
    pub position: i64,
    /// Unix millis.
    pub created_at: u64,
}

impl Block {
    /// Whether the block sits directly under its page.
    pub fn is_root(&self) -> bool {
        self.parent_block_id.is_none()
    }
}

/// A flat block list grouped into ordered sibling scopes.
#[derive(Clone, Debug, Default)]
pub struct BlockTree {
    blocks: HashMap<BlockId, Block>,
    /// Parent (None = page root) → children sorted by position.
    children: HashMap<Option<BlockId>, Vec<BlockId>>,
}

impl BlockTree {
    /// Group blocks by parent and sort each group by position.
    pub fn from_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let mut tree = BlockTree::default();
        for block in blocks {
            tree.children
                .entry(block.parent_block_id)
                .or_default()
                .push(block.block_id);
            tree.blocks.insert(block.block_id, block);
        }
        let blocks = &tree.blocks;
        for ids in tree.children.values_mut() {
            ids.sort_by_key(|id| (blocks[id].position, *id));
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    /// Page-root blocks in position order.
    pub fn roots(&self) -> Vec<&Block> {
        self.children_of(None)
    }

    /// Direct children of `parent` (None = page root) in position order.
    pub fn children_of(&self, parent: Option<BlockId>) -> Vec<&Block> {
        self.children
            .get(&parent)
            .map(|ids| ids.iter().filter_map(|id| self.blocks.get(id)).collect())
            .unwrap_or_default()
    }

    /// Depth-first pre-order walk yielding `(depth, block)`.
    ///
    /// Uses an explicit stack, so deep outlines cannot overflow. Blocks whose
    /// parent is missing from the list are unreachable and not yielded.
    pub fn walk(&self) -> Vec<(usize, &Block)> {
        let mut out = Vec::with_capacity(self.blocks.len());
        let mut seen = HashSet::new();
        let mut stack: Vec<(usize, BlockId)> = self
            .children
            .get(&None)
            .map(|ids| ids.iter().rev().map(|id| (0, *id)).collect())
            .unwrap_or_default();

        while let Some((depth, id)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(block) = self.blocks.get(&id) else {
                continue;
            };
            out.push((depth, block));
            if let Some(kids) = self.children.get(&Some(id)) {
                stack.extend(kids.iter().rev().map(|k| (depth + 1, *k)));
            }
        }
        out
    }

    /// Chain from `start` up to its page root (inclusive), or None if the
    /// chain is broken, cyclic, or deeper than [`MAX_TREE_DEPTH`].
    pub fn ancestry(&self, start: BlockId) -> Option<Vec<BlockId>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if !seen.insert(id) || chain.len() >= MAX_TREE_DEPTH {
                return None;
            }
            let block = self.blocks.get(&id)?;
            chain.push(id);
            current = block.parent_block_id;
        }
        Some(chain)
    }
}
