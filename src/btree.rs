//! B-tree traversal
//!
//! Every table, index and long value tree in the database is a B+tree of
//! pages. Branch keys are non-inclusive upper bounds: an exact hit on a
//! branch key descends into the *next* slot. Sequential scans follow the
//! leaf sibling links instead of re-descending from the root; because
//! dirty databases are known to contain sibling-link cycles, scans bound
//! the number of visited pages by the store's page count.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::format::PageFlags;
use crate::page::Page;
use crate::store::PageStore;

/// Upper bound on tree depth; anything deeper is a corrupt page graph
const MAX_DEPTH: usize = 64;

/// One (key, value) pair from a leaf page
#[derive(Debug, Clone)]
pub struct Entry {
    /// Full reconstructed key
    pub key: Vec<u8>,
    /// Node payload
    pub data: Vec<u8>,
    /// Flags of the page the entry was read from
    pub page_flags: PageFlags,
}

/// A read-only B-tree rooted at a fixed page
pub struct BTree<'s> {
    store: &'s PageStore,
    root: u32,
}

impl<'s> BTree<'s> {
    /// Open the tree rooted at `root`, verifying the root page is readable
    pub fn open(store: &'s PageStore, root: u32) -> Result<Self> {
        store.page(root).map_err(|e| tree_err(root, e))?;
        Ok(Self { store, root })
    }

    /// Root page number
    pub fn root(&self) -> u32 {
        self.root
    }

    /// Create a cursor positioned before the first entry
    pub fn cursor(&self) -> Cursor<'s> {
        Cursor {
            store: self.store,
            root: self.root,
            page: None,
            node: 0,
            pages_walked: 0,
            exhausted: false,
        }
    }
}

/// Forward-only cursor over the leaf entries of a B-tree
pub struct Cursor<'s> {
    store: &'s PageStore,
    root: u32,
    /// Current leaf page; `None` before the first positioning call
    page: Option<Arc<Page>>,
    node: usize,
    pages_walked: u32,
    exhausted: bool,
}

impl<'s> Cursor<'s> {
    /// Position at the first entry of the tree
    pub fn move_first(&mut self) -> Result<()> {
        self.reset();

        let mut page = self.page(self.root)?;
        for _ in 0..MAX_DEPTH {
            if page.is_leaf() {
                self.page = Some(page);
                self.node = 0;
                // An empty leftmost leaf still may have non-empty siblings
                if self.current_page_exhausted() {
                    self.advance_page()?;
                }
                return Ok(());
            }
            if page.node_count() == 0 {
                self.exhausted = true;
                return Ok(());
            }
            let pgno = page.num;
            let child = page.node(0)?.child(pgno)?;
            page = self.page(child)?;
        }

        Err(tree_depth_err(self.root))
    }

    /// Position at the first entry with key ≥ `key`. Returns whether the
    /// entry is an exact match. A key greater than everything in the tree
    /// leaves the cursor exhausted.
    pub fn seek(&mut self, key: &[u8]) -> Result<bool> {
        if key.is_empty() {
            self.move_first()?;
            return Ok(self.current()?.map(|e| e.key.is_empty()).unwrap_or(false));
        }

        self.reset();

        let mut page = self.page(self.root)?;
        for _ in 0..MAX_DEPTH {
            if page.node_count() == 0 {
                if page.is_leaf() {
                    self.exhausted = true;
                    return Ok(false);
                }
                return Err(tree_err(
                    page.num,
                    Error::CorruptTree { pgno: page.num, details: "empty branch page".into() },
                ));
            }

            if page.is_leaf() {
                break;
            }

            let idx = branch_search(&page, key)?;
            let pgno = page.num;
            let child = page.node(idx)?.child(pgno)?;
            page = self.page(child)?;
        }
        if page.is_branch() {
            return Err(tree_depth_err(self.root));
        }

        // First node on the leaf with key >= target
        let mut lo = 0;
        let mut hi = page.node_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if page.node(mid)?.key.as_slice() < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        self.page = Some(page);
        self.node = lo;
        if self.current_page_exhausted() {
            self.advance_page()?;
        }

        Ok(self.current()?.map(|e| e.key == key).unwrap_or(false))
    }

    /// The entry the cursor is positioned on, if any
    pub fn current(&self) -> Result<Option<Entry>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = match &self.page {
            Some(page) => page,
            None => return Ok(None),
        };
        let node = page.node(self.node)?;
        Ok(Some(Entry {
            key: node.key,
            data: node.data.to_vec(),
            page_flags: page.flags,
        }))
    }

    /// Return the current entry and advance. The first call after
    /// `move_first`/`seek` returns the entry those positioned on.
    pub fn next(&mut self) -> Result<Option<Entry>> {
        if self.page.is_none() && !self.exhausted {
            self.move_first()?;
        }
        let entry = self.current()?;
        if entry.is_some() {
            self.advance()?;
        }
        Ok(entry)
    }

    fn reset(&mut self) {
        self.page = None;
        self.node = 0;
        self.pages_walked = 0;
        self.exhausted = false;
    }

    fn page(&mut self, pgno: u32) -> Result<Arc<Page>> {
        self.pages_walked += 1;
        let bound = self.store.page_count().saturating_add(1);
        if self.pages_walked > bound {
            return Err(Error::CorruptTree {
                pgno,
                details: "page link cycle detected".into(),
            });
        }
        self.store.page(pgno).map_err(|e| tree_err(pgno, e))
    }

    fn current_page_exhausted(&self) -> bool {
        match &self.page {
            Some(page) => self.node >= page.node_count(),
            None => true,
        }
    }

    fn advance(&mut self) -> Result<()> {
        self.node += 1;
        if self.current_page_exhausted() {
            self.advance_page()?;
        }
        Ok(())
    }

    /// Follow sibling links to the next leaf holding at least one node
    fn advance_page(&mut self) -> Result<()> {
        loop {
            let next = match &self.page {
                Some(page) => page.next_page,
                None => 0,
            };
            if next == 0 {
                self.page = None;
                self.exhausted = true;
                return Ok(());
            }
            let page = self.page(next)?;
            self.page = Some(page);
            self.node = 0;
            if !self.current_page_exhausted() {
                return Ok(());
            }
        }
    }
}

/// Find the branch slot whose child covers `key`: the first slot with a
/// key strictly greater than the target, because branch keys are
/// non-inclusive upper bounds. An exact hit therefore hops one slot right.
fn branch_search(page: &Page, key: &[u8]) -> Result<usize> {
    let count = page.node_count();
    let mut lo = 0;
    let mut hi = count;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let node = page.node(mid)?;
        match key.cmp(node.key.as_slice()) {
            std::cmp::Ordering::Less => hi = mid,
            std::cmp::Ordering::Equal => return Ok((mid + 1).min(count - 1)),
            std::cmp::Ordering::Greater => lo = mid + 1,
        }
    }

    Ok(lo.min(count - 1))
}

fn tree_err(pgno: u32, err: Error) -> Error {
    match err {
        e @ Error::CorruptTree { .. } => e,
        e => Error::CorruptTree { pgno, details: e.to_string() },
    }
}

fn tree_depth_err(root: u32) -> Error {
    Error::CorruptTree { pgno: root, details: "tree exceeds maximum depth".into() }
}
