//! Undo journal for the versioned state.
//!
//! Every mutation appends its undo entry before it is applied. A revision
//! remembers the journal length at the time it was taken; reverting pops and
//! undoes entries down to that length.

use primitive_types::{H256, U256};

/// One undoable change to an exchange object.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry<I> {
    /// Undo: remove the order
    InsertOrder { book: H256, order_id: u64 },

    /// Undo: restore the order as it was, back on its price level
    CancelOrder { book: H256, prev: I },

    /// Undo: restore the order's previous quantity
    SubAmount { book: H256, prev: I, amount: U256 },

    NonceChange { book: H256, prev: u64 },

    PriceChange { book: H256, prev: U256 },
}

impl<I> JournalEntry<I> {
    pub fn book(&self) -> H256 {
        match self {
            JournalEntry::InsertOrder { book, .. }
            | JournalEntry::CancelOrder { book, .. }
            | JournalEntry::SubAmount { book, .. }
            | JournalEntry::NonceChange { book, .. }
            | JournalEntry::PriceChange { book, .. } => *book,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub id: usize,
    pub journal_index: usize,
}

#[derive(Debug, Clone)]
pub struct Journal<I> {
    entries: Vec<JournalEntry<I>>,
    revisions: Vec<Revision>,
    next_revision_id: usize,
}

impl<I> Default for Journal<I> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            revisions: Vec::new(),
            next_revision_id: 0,
        }
    }
}

impl<I> Journal<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: JournalEntry<I>) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn valid_revisions(&self) -> usize {
        self.revisions.len()
    }

    pub fn snapshot(&mut self) -> usize {
        let id = self.next_revision_id;
        self.next_revision_id += 1;
        self.revisions.push(Revision {
            id,
            journal_index: self.entries.len(),
        });
        id
    }

    /// Entries recorded after revision `id`, newest first. The revision
    /// and every later one are invalidated.
    pub fn unwind(&mut self, id: usize) -> Option<Vec<JournalEntry<I>>> {
        let idx = self.revisions.binary_search_by_key(&id, |r| r.id).ok()?;
        let journal_index = self.revisions[idx].journal_index;
        self.revisions.truncate(idx);
        let mut undone = self.entries.split_off(journal_index);
        undone.reverse();
        Some(undone)
    }

    /// Forget everything after a commit.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.revisions.clear();
    }
}
