use crate::{
    arena::{Arena, ArenaId},
    context::{Context, LogProb, WordId, CONTEXT_CAPACITY},
    error::LmError,
};
use ::core::mem::size_of;
use debug_unsafe::slice::SliceGetter;

mod entry;

pub use entry::{history_distance, ContextEntry, Successor};

/// Handle to a [`ContextEntry`], invalidated by [`ContextStore::reset`]
pub type EntryId = ArenaId;

const HASH_MULTIPLIERS: [u32; CONTEXT_CAPACITY] = [
    165902236, 220889002, 32510287, 117809592, 165902236, 220889002, 32510287, 117809592,
];

const TABLE_SIZE_SMALL: usize = 8192;
const TABLE_SIZE_MEDIUM: usize = 32768;
const TABLE_SIZE_LARGE: usize = 131072;

/// Expected entry count of caches, selects the large table
pub(crate) const CACHE_EXPECTED_ENTRIES: usize = 250_001;

#[inline]
fn table_size(expected_entries: usize) -> usize {
    if expected_entries < 25_000 {
        TABLE_SIZE_SMALL
    } else if expected_entries < 250_000 {
        TABLE_SIZE_MEDIUM
    } else {
        TABLE_SIZE_LARGE
    }
}

#[inline]
fn hash(context: &Context, table_size: usize) -> usize {
    let mut hash: u32 = 0;
    for (&word, &m) in context.as_slice().iter().zip(HASH_MULTIPLIERS.iter()) {
        hash = hash.wrapping_add(word.wrapping_mul(m));
    }
    ((hash >> 7) as usize) & (table_size - 1)
}

/// Hash table of histories with chained buckets.
///
/// Entries live in an [`Arena`] and are linked by index,
/// so a reset drops all of them at once.
#[derive(Debug)]
pub struct ContextStore {
    arena: Arena<ContextEntry>,
    heads: Box<[Option<u32>]>,
    context_len: usize,
}

impl ContextStore {
    /// Stores histories of up to `context_len` words
    pub fn new(context_len: usize, expected_entries: usize) -> Self {
        debug_assert!(
            context_len <= CONTEXT_CAPACITY,
            "Context length {context_len} exceeds {CONTEXT_CAPACITY}"
        );

        Self {
            arena: Arena::with_capacity(expected_entries.min(TABLE_SIZE_LARGE)),
            heads: vec![None; table_size(expected_entries)].into_boxed_slice(),
            context_len,
        }
    }

    #[inline]
    pub fn context_len(&self) -> usize {
        self.context_len
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.arena.generation()
    }

    #[inline]
    pub fn entry(&self, id: EntryId) -> Option<&ContextEntry> {
        self.arena.get(id)
    }

    #[inline]
    fn key(&self, context: Context) -> Context {
        context.truncated(self.context_len)
    }

    fn find_in_bucket(
        &self,
        key: &Context,
        bucket: usize,
        mut filter: impl FnMut(&ContextEntry) -> bool,
    ) -> Option<u32> {
        let mut next = *self.heads.get_safe_unchecked(bucket);
        while let Some(index) = next {
            let entry = self.arena.at(index);
            if entry.context.truncated(self.context_len) == *key && filter(entry) {
                return Some(index);
            }
            next = entry.link;
        }
        None
    }

    /// Keeps the whole `context`, only its first `context_len` words are the key
    fn insert(&mut self, context: Context, bucket: usize) -> EntryId {
        let head = self.heads.get_safe_unchecked_mut(bucket);
        let id = self.arena.allocate(ContextEntry::new(context, *head));
        *head = Some(id.index);
        id
    }

    #[inline]
    pub fn find(&self, context: Context) -> Option<EntryId> {
        self.find_where(context, |_| true)
    }

    /// Finds an entry of `context` also accepted by `filter`
    pub fn find_where(
        &self,
        context: Context,
        filter: impl FnMut(&ContextEntry) -> bool,
    ) -> Option<EntryId> {
        let key = self.key(context);
        let bucket = hash(&key, self.heads.len());
        self.find_in_bucket(&key, bucket, filter)
            .map(|index| self.arena.id_of(index))
    }

    /// Finds the entry of `context`, creates an empty one if `create` is set.
    /// Never creates two entries for equal contexts.
    pub fn lookup(&mut self, context: Context, create: bool) -> Option<EntryId> {
        if create {
            Some(self.get_or_create(context))
        } else {
            self.find(context)
        }
    }

    #[inline]
    pub fn get_or_create(&mut self, context: Context) -> EntryId {
        self.create_where(context, |_| true).0
    }

    /// Like [`Self::get_or_create`], but only entries accepted by `filter` match,
    /// so one context may own several entries
    pub fn create_where(
        &mut self,
        context: Context,
        filter: impl FnMut(&ContextEntry) -> bool,
    ) -> (EntryId, bool) {
        let key = self.key(context);
        let bucket = hash(&key, self.heads.len());
        match self.find_in_bucket(&key, bucket, filter) {
            Some(index) => (self.arena.id_of(index), false),
            None => (self.insert(context, bucket), true),
        }
    }

    #[inline]
    fn entry_mut(&mut self, id: EntryId) -> Option<&mut ContextEntry> {
        let entry = self.arena.get_mut(id);
        debug_assert!(entry.is_some(), "Stale context entry {id:?}");
        entry
    }

    pub(crate) fn set_backoff_weight(&mut self, id: EntryId, weight: LogProb) {
        if let Some(entry) = self.entry_mut(id) {
            entry.backoff_weight = weight;
        }
    }

    /// Appends an explicit ngram, allowed until the entry is frozen
    pub(crate) fn push_successor(&mut self, id: EntryId, word: WordId, log_prob: LogProb) {
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        debug_assert!(!entry.frozen, "Successors of a frozen entry are immutable");
        entry.successors.push(Successor { word, log_prob });
        self.arena.charge(size_of::<Successor>());
    }

    /// Sorts successors by word, duplicates are rejected
    pub(crate) fn freeze(&mut self, id: EntryId) -> Result<(), LmError> {
        let Some(entry) = self.entry_mut(id) else {
            return Ok(());
        };
        entry.successors.sort_unstable_by_key(|s| s.word);
        if let Some(dup) = entry.successors.windows(2).find(|w| w[0].word == w[1].word) {
            return Err(LmError::DuplicateSuccessor {
                context: entry.context,
                word: dup[0].word,
            });
        }
        entry.successors.shrink_to_fit();
        entry.frozen = true;
        Ok(())
    }

    /// Replaces successors with one per output word `0..log_probs.len()`,
    /// already sorted
    pub(crate) fn set_dense_successors(&mut self, id: EntryId, log_probs: &[LogProb]) {
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        entry.successors = log_probs
            .iter()
            .enumerate()
            .map(|(word, &log_prob)| Successor {
                word: word as WordId,
                log_prob,
            })
            .collect();
        entry.frozen = true;
        self.arena.charge(log_probs.len() * size_of::<Successor>());
    }

    pub(crate) fn set_vectors(&mut self, id: EntryId, current: &[f32], future: Option<&[f32]>) {
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        entry.current = Some(current.into());
        entry.future = future.map(Into::into);
        let floats = current.len() + future.map_or(0, <[f32]>::len);
        self.arena.charge(floats * size_of::<f32>());
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        (0..self.arena.len() as u32).map(|index| self.arena.id_of(index))
    }

    /// Drops every entry, all issued ids become stale
    pub fn reset(&mut self) {
        self.arena.reset();
        self.heads.fill(None);
    }
}
