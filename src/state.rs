use crate::{
    config::HistoryVectorConfig,
    context::{Context, WordId},
    store::{history_distance, ContextEntry, ContextStore, EntryId, CACHE_EXPECTED_ENTRIES},
};

/// Position of a lattice path inside a model.
///
/// Paths with equal [`LmState::merge_key`] can be merged.
/// States outlive store flushes and [`LanguageModel::reset_caches`](crate::LanguageModel::reset_caches), they keep their history.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum LmState {
    /// No history, sentence start or unigram back-off
    #[default]
    Start,
    /// Previous word of a matrix bigram
    Word(WordId),
    /// Store entry of the history
    Entry(StateRef),
    /// Interpolated model, one state per component
    Mix(MixState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StateRef {
    pub(crate) id: EntryId,
    pub(crate) context: Context,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MixState {
    pub(crate) components: Box<[LmState]>,
    pub(crate) representative: usize,
}

impl LmState {
    /// History words carried by this state
    pub fn context(&self) -> Context {
        match self {
            Self::Start => Context::EMPTY,
            Self::Word(word) => Context::from_recent(&[*word]),
            Self::Entry(state) => state.context,
            Self::Mix(mix) => mix.representative().context(),
        }
    }

    #[inline]
    pub fn history_len(&self) -> usize {
        self.context().len()
    }

    /// Handle identifying equivalent lattice paths
    pub fn merge_key(&self) -> &LmState {
        match self {
            Self::Mix(mix) => mix.representative().merge_key(),
            state => state,
        }
    }

    /// State of the `i`th component of an interpolated model
    pub(crate) fn component(&self, i: usize) -> &LmState {
        const START: &LmState = &LmState::Start;
        match self {
            Self::Mix(mix) => mix.components.get(i).unwrap_or(START),
            _ => START,
        }
    }
}

impl MixState {
    #[inline]
    pub fn components(&self) -> &[LmState] {
        &self.components
    }

    #[inline]
    pub fn representative(&self) -> &LmState {
        &self.components[self.representative]
    }
}

#[derive(Clone, Copy, Debug)]
enum StateMode {
    Exact,
    HistoryVector { min_distance: f64 },
}

/// LM state store of a neural model, separate from its probability cache
#[derive(Debug)]
pub struct StateTracker {
    store: ContextStore,
    mode: StateMode,
    capacity_bytes: usize,
    flushes: usize,
}

impl StateTracker {
    /// Paths merge if their last `context_len` words are equal
    pub fn exact(context_len: usize, capacity_bytes: usize) -> Self {
        Self {
            store: ContextStore::new(context_len, CACHE_EXPECTED_ENTRIES),
            mode: StateMode::Exact,
            capacity_bytes,
            flushes: 0,
        }
    }

    /// Paths merge if their last `state_size - 1` words are equal
    /// and their hidden vectors are close enough
    pub fn history_vector(config: HistoryVectorConfig, capacity_bytes: usize) -> Self {
        Self {
            store: ContextStore::new(config.state_size - 1, CACHE_EXPECTED_ENTRIES),
            mode: StateMode::HistoryVector {
                min_distance: config.min_distance,
            },
            capacity_bytes,
            flushes: 0,
        }
    }

    #[inline]
    pub fn uses_history_vector(&self) -> bool {
        matches!(self.mode, StateMode::HistoryVector { .. })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    #[inline]
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    fn flush_if_full(&mut self) {
        if self.store.allocated_bytes() > self.capacity_bytes {
            tracing::debug!(
                "LM state store flushed: {} entries, {} bytes",
                self.store.len(),
                self.store.allocated_bytes()
            );
            self.store.reset();
            self.flushes += 1;
        }
    }

    /// Canonical state of `context`.
    /// `vector` is the hidden state reached after it, required for history vector merging.
    pub fn resolve(&mut self, context: Context, vector: Option<&[f32]>) -> LmState {
        let id = match (self.mode, vector) {
            (StateMode::HistoryVector { min_distance }, Some(vector)) => {
                let close = |entry: &ContextEntry| {
                    entry
                        .current_vector()
                        .is_some_and(|v| history_distance(v, vector) <= min_distance)
                };
                match self.store.find_where(context, close) {
                    Some(id) => id,
                    None => {
                        self.flush_if_full();
                        let (id, _) = self.store.create_where(context, |_| false);
                        self.store.set_vectors(id, vector, None);
                        id
                    }
                }
            }
            _ => {
                debug_assert!(
                    matches!(self.mode, StateMode::Exact),
                    "History vector states require a vector"
                );
                match self.store.find(context) {
                    Some(id) => id,
                    None => {
                        self.flush_if_full();
                        self.store.get_or_create(context)
                    }
                }
            }
        };

        LmState::Entry(StateRef {
            id,
            context: self.stored_context(id, context),
        })
    }

    /// `false` for states issued before the last flush or reset
    #[inline]
    pub(crate) fn contains(&self, state: &StateRef) -> bool {
        self.store.entry(state.id).is_some()
    }

    #[inline]
    fn stored_context(&self, id: EntryId, fallback: Context) -> Context {
        self.store
            .entry(id)
            .map(|e| e.context())
            .unwrap_or(fallback)
    }

    pub fn reset(&mut self) {
        self.store.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_states_merge() {
        let mut tracker = StateTracker::exact(2, usize::MAX);
        let a = tracker.resolve(Context::from_recent(&[1, 2]), None);
        let b = tracker.resolve(Context::from_recent(&[1, 2]), None);
        let c = tracker.resolve(Context::from_recent(&[1, 3]), None);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.context(), Context::from_recent(&[1, 2]));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_history_vector_threshold() {
        let config = HistoryVectorConfig {
            state_size: 2,
            min_distance: 0.25,
        };
        let mut tracker = StateTracker::history_vector(config, usize::MAX);
        let first = tracker.resolve(Context::from_recent(&[4, 1]), Some(&[0.0, 0.0]));

        // mean squared difference is exactly 0.25
        let at = tracker.resolve(Context::from_recent(&[4, 2]), Some(&[0.5, 0.5]));
        assert_eq!(at, first);
        // merged path inherits the history of the first one
        assert_eq!(at.context(), Context::from_recent(&[4, 1]));

        let above = tracker.resolve(Context::from_recent(&[4, 2]), Some(&[0.5, 0.5001]));
        assert_ne!(above, first);

        let other_word = tracker.resolve(Context::from_recent(&[5, 1]), Some(&[0.0, 0.0]));
        assert_ne!(other_word, first);
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_state_store_flush() {
        let mut tracker = StateTracker::exact(2, 0);
        let a = tracker.resolve(Context::from_recent(&[1]), None);
        assert_eq!(tracker.flushes(), 0);
        let _b = tracker.resolve(Context::from_recent(&[2]), None);
        assert_eq!(tracker.flushes(), 1);
        assert_eq!(tracker.len(), 1);
        let a2 = tracker.resolve(Context::from_recent(&[1]), None);
        assert_ne!(a, a2);
    }

    #[test]
    fn test_mix_merge_key() {
        let mut tracker = StateTracker::exact(2, usize::MAX);
        let entry = tracker.resolve(Context::from_recent(&[3, 2]), None);
        let mix = LmState::Mix(MixState {
            components: vec![LmState::Word(3), entry.clone()].into_boxed_slice(),
            representative: 1,
        });
        assert_eq!(mix.merge_key(), &entry);
        assert_eq!(mix.history_len(), 2);
        assert_eq!(mix.component(0), &LmState::Word(3));
        assert_eq!(LmState::Start.component(1), &LmState::Start);
    }
}
