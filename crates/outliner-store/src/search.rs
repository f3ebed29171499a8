//! In-memory full-text index over page titles and block content.
//!
//! The index is kept in ordered maps so that two indexes holding the same
//! documents are structurally equal and score queries identically, whether
//! they were built in one pass or updated incrementally.
//!
//! # Lifecycle
//!
//! ```text
//! commit ──► SearchCell::apply(deltas) ──► Arc::make_mut(current)
//!              │
//!              └─ rebuild running? also push deltas onto the journal
//!
//! rebuild:  begin_rebuild()  ──►  scan snapshot off-lock  ──►  finish()
//!                                                               │
//!                            replay journal onto new index ◄────┘
//!                            swap Arc under the write lock
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use outliner_types::{Block, BlockId, Page, PageId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Result, StoreError};
use crate::query::Query;

/// Which document kinds a query covers.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Pages,
    Blocks,
    #[default]
    All,
}

impl SearchScope {
    fn admits(self, key: &DocKey) -> bool {
        match (self, key) {
            (SearchScope::All, _) => true,
            (SearchScope::Pages, DocKey::Page(_)) => true,
            (SearchScope::Blocks, DocKey::Block(_)) => true,
            _ => false,
        }
    }
}

/// Identity of an indexed document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocKey {
    Page(PageId),
    Block(BlockId),
}

/// A document handed to [`SearchIndex::build`].
#[derive(Clone, Debug)]
pub struct IndexDoc {
    pub key: DocKey,
    pub text: String,
}

/// A committed change the index must follow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexDelta {
    Upsert(DocKey, String),
    Remove(DocKey),
}

/// A ranked query result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchHit {
    pub key: DocKey,
    pub score: f64,
}

/// Resolved search results, best match first within each kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    pub pages: Vec<Page>,
    pub blocks: Vec<Block>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.blocks.is_empty()
    }
}

/// Lower-case alphanumeric tokens of `text`, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct DocEntry {
    terms: BTreeSet<String>,
    len: u32,
}

/// document → ascending token positions
type Postings = BTreeMap<DocKey, Vec<u32>>;

/// Weight of an exact token match relative to a prefix match.
const EXACT_BOOST: f64 = 2.0;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchIndex {
    docs: BTreeMap<DocKey, DocEntry>,
    /// term → document → positions; term frequency is the position count
    postings: BTreeMap<String, Postings>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a fallible document stream. The first error aborts the build.
    pub fn build<I>(docs: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<IndexDoc>>,
    {
        let mut index = Self::new();
        for doc in docs {
            let doc = doc?;
            index.insert(doc.key, &doc.text);
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, key: &DocKey) -> bool {
        self.docs.contains_key(key)
    }

    pub fn apply(&mut self, delta: &IndexDelta) {
        match delta {
            IndexDelta::Upsert(key, text) => self.insert(*key, text),
            IndexDelta::Remove(key) => self.remove(key),
        }
    }

    fn insert(&mut self, key: DocKey, text: &str) {
        self.remove(&key);
        let mut positions: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        let mut len = 0u32;
        for token in tokenize(text) {
            positions.entry(token).or_default().push(len);
            len = len.saturating_add(1);
        }
        let entry = DocEntry {
            terms: positions.keys().cloned().collect(),
            len,
        };
        for (term, at) in positions {
            self.postings.entry(term).or_default().insert(key, at);
        }
        self.docs.insert(key, entry);
    }

    fn remove(&mut self, key: &DocKey) {
        let Some(entry) = self.docs.remove(key) else {
            return;
        };
        for term in &entry.terms {
            if let Some(list) = self.postings.get_mut(term) {
                list.remove(key);
                if list.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }

    /// Ranked documents matching every query token as a prefix.
    ///
    /// Ties are broken by key, so the result is a pure function of the index
    /// contents and the arguments.
    pub fn query(&self, text: &str, scope: SearchScope, limit: usize) -> Vec<SearchHit> {
        match Query::simple(text) {
            Some(query) => self.query_expr(&query, scope, limit),
            None => Vec::new(),
        }
    }

    /// Ranked documents matching a parsed [`Query`], with the same scoring and
    /// tie-break as [`SearchIndex::query`].
    pub fn query_expr(&self, query: &Query, scope: SearchScope, limit: usize) -> Vec<SearchHit> {
        if limit == 0 {
            return Vec::new();
        }
        let mut hits: Vec<SearchHit> = self
            .eval(query, scope)
            .into_iter()
            .map(|(key, score)| {
                let len = self.docs.get(&key).map_or(1, |d| d.len.max(1));
                SearchHit {
                    key,
                    score: score / (1.0 + f64::from(len).ln()),
                }
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        hits.truncate(limit);
        hits
    }

    /// Unnormalized scores of every admitted document matching `query`.
    fn eval(&self, query: &Query, scope: SearchScope) -> BTreeMap<DocKey, f64> {
        match query {
            Query::Phrase { tokens, prefix } => self.phrase_scores(tokens, *prefix, scope),
            Query::And(parts) => {
                let mut parts = parts.iter();
                let Some(first) = parts.next() else {
                    return BTreeMap::new();
                };
                let mut scores = self.eval(first, scope);
                for part in parts {
                    if scores.is_empty() {
                        break;
                    }
                    let next = self.eval(part, scope);
                    scores = scores
                        .into_iter()
                        .filter_map(|(k, s)| next.get(&k).map(|n| (k, s + n)))
                        .collect();
                }
                scores
            }
            Query::Or(parts) => {
                let mut scores: BTreeMap<DocKey, f64> = BTreeMap::new();
                for part in parts {
                    for (k, s) in self.eval(part, scope) {
                        *scores.entry(k).or_default() += s;
                    }
                }
                scores
            }
            Query::Not(keep, drop) => {
                let mut scores = self.eval(keep, scope);
                if !scores.is_empty() {
                    for k in self.eval(drop, scope).keys() {
                        scores.remove(k);
                    }
                }
                scores
            }
        }
    }

    /// Posting lists for `token`, or for every term it prefixes.
    fn matching(&self, token: &str, prefix: bool) -> Vec<(&str, &Postings)> {
        if prefix {
            self.postings
                .range::<str, _>((Bound::Included(token), Bound::Unbounded))
                .take_while(|(term, _)| term.starts_with(token))
                .map(|(term, list)| (term.as_str(), list))
                .collect()
        } else {
            self.postings
                .get_key_value(token)
                .map(|(term, list)| (term.as_str(), list))
                .into_iter()
                .collect()
        }
    }

    fn phrase_scores(
        &self,
        tokens: &[String],
        prefix: bool,
        scope: SearchScope,
    ) -> BTreeMap<DocKey, f64> {
        let mut weights: BTreeMap<DocKey, f64> = BTreeMap::new();
        let last = tokens.len().saturating_sub(1);

        if let [token] = tokens {
            for (term, list) in self.matching(token, prefix) {
                let boost = if term == token.as_str() { EXACT_BOOST } else { 1.0 };
                for (key, at) in list {
                    if scope.admits(key) {
                        *weights.entry(*key).or_default() += at.len() as f64 * boost;
                    }
                }
            }
        } else {
            let slots: Vec<Vec<(&str, &Postings)>> = tokens
                .iter()
                .enumerate()
                .map(|(i, token)| self.matching(token, prefix && i == last))
                .collect();
            let follows = |key: &DocKey, start: u32| {
                slots.iter().enumerate().skip(1).all(|(offset, slot)| {
                    let want = start.saturating_add(offset as u32);
                    slot.iter().any(|(_, list)| {
                        list.get(key)
                            .is_some_and(|at| at.binary_search(&want).is_ok())
                    })
                })
            };
            for (_, list) in slots.first().map(Vec::as_slice).unwrap_or_default() {
                for (key, starts) in *list {
                    if !scope.admits(key) {
                        continue;
                    }
                    let found = starts.iter().filter(|&&start| follows(key, start)).count();
                    if found > 0 {
                        *weights.entry(*key).or_default() += found as f64 * EXACT_BOOST;
                    }
                }
            }
        }

        if !weights.is_empty() {
            let idf = (1.0 + self.docs.len() as f64 / weights.len() as f64).ln();
            for weight in weights.values_mut() {
                *weight *= idf;
            }
        }
        weights
    }
}

// ============================================================================
// SearchCell: the live index plus rebuild coordination
// ============================================================================

#[derive(Default)]
struct SearchState {
    current: Arc<SearchIndex>,
    /// Deltas committed since the running rebuild took its snapshot.
    journal: Option<Vec<IndexDelta>>,
    /// Set once the tenant is destroyed; nothing is indexed after that.
    closed: bool,
}

/// Holder of a tenant's live index.
///
/// Readers clone the `Arc` and query without holding any lock.
#[derive(Default)]
pub struct SearchCell {
    state: RwLock<SearchState>,
}

impl SearchCell {
    pub fn new(index: SearchIndex) -> Self {
        Self {
            state: RwLock::new(SearchState {
                current: Arc::new(index),
                journal: None,
                closed: false,
            }),
        }
    }

    /// The index as of now.
    pub fn snapshot(&self) -> Arc<SearchIndex> {
        self.state.read().current.clone()
    }

    /// Follow committed mutations.
    pub fn apply(&self, deltas: Vec<IndexDelta>) {
        if deltas.is_empty() {
            return;
        }
        let mut state = self.state.write();
        if state.closed {
            return;
        }
        let index = Arc::make_mut(&mut state.current);
        for delta in &deltas {
            index.apply(delta);
        }
        if let Some(journal) = state.journal.as_mut() {
            journal.extend(deltas);
        }
    }

    /// Drop every document and refuse further updates. Used when the tenant
    /// is destroyed; a rebuild still running will fail to finish.
    pub fn close(&self) {
        let mut state = self.state.write();
        state.current = Arc::new(SearchIndex::new());
        state.journal = None;
        state.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Start journaling. The caller must take its scan snapshot while no
    /// mutation can commit, so the journal covers exactly what the scan misses.
    pub fn begin_rebuild(&self) -> Rebuild<'_> {
        self.state.write().journal = Some(Vec::new());
        Rebuild {
            cell: self,
            finished: false,
        }
    }
}

/// A rebuild in progress. Dropping it without [`Rebuild::finish`] abandons the
/// rebuild and leaves the live index untouched.
#[must_use = "an unfinished rebuild is abandoned on drop"]
pub struct Rebuild<'a> {
    cell: &'a SearchCell,
    finished: bool,
}

impl Rebuild<'_> {
    /// Build the replacement from `docs`, replay the journal and swap it in.
    ///
    /// Returns the number of documents in the new index.
    pub fn finish<I>(mut self, docs: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<IndexDoc>>,
    {
        let built = SearchIndex::build(docs);

        let mut state = self.cell.state.write();
        let journal = state.journal.take().unwrap_or_default();
        self.finished = true;
        if state.closed {
            return Err(StoreError::RebuildFailed("search index closed".into()));
        }

        let mut index = built.map_err(|e| match e {
            StoreError::RebuildFailed(_) => e,
            other => StoreError::RebuildFailed(other.to_string()),
        })?;
        for delta in &journal {
            index.apply(delta);
        }
        let count = index.len();
        state.current = Arc::new(index);
        tracing::debug!(docs = count, replayed = journal.len(), "search index swapped");
        Ok(count)
    }
}

impl Drop for Rebuild<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cell.state.write().journal = None;
            tracing::warn!("search rebuild abandoned; keeping previous index");
        }
    }
}
