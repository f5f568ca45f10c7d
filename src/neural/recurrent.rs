use super::{CacheStats, NeuralBase, RecurrentScorer};
use crate::{
    config::NeuralConfig,
    context::{Context, LogProb, WordId, CONTEXT_CAPACITY, LZERO, MAX_ORDER},
    error::LmError,
    model::{BackoffNGram, Transition},
    state::{LmState, StateTracker},
    store::EntryId,
    vocab::{ShortList, Vocabulary},
};
use ::core::fmt;
use ::std::rc::Rc;
use arrayvec::ArrayVec;

/// Recurrent neural LM behind a probability cache.
///
/// Every cache entry keeps the hidden vector before its most recent history word
/// was accepted (`current`) and after it (`future`). A miss restores the hidden
/// state from the `future` of the preceding history, rebuilding that one first if needed.
pub struct RecurrentLm {
    scorer: Box<dyn RecurrentScorer>,
    base: NeuralBase,
    current: Box<[f32]>,
    future: Box<[f32]>,
    last_resolved: Option<EntryId>,
}

impl fmt::Debug for RecurrentLm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurrentLm")
            .field("base", &self.base)
            .field("last_resolved", &self.last_resolved)
            .finish_non_exhaustive()
    }
}

impl RecurrentLm {
    /// Histories are always padded with the sentence start word
    pub fn new(
        mut scorer: Box<dyn RecurrentScorer>,
        shortlist: ShortList,
        vocab: &Vocabulary,
        mut config: NeuralConfig,
    ) -> Result<Self, LmError> {
        if !config.pad_start_word {
            tracing::warn!("Start word padding is forced for recurrent models");
            config.pad_start_word = true;
        }
        config.validate()?;

        let states = match config.history_vector {
            Some(hv) => StateTracker::history_vector(hv, config.state_capacity_bytes),
            None => StateTracker::exact(config.order - 1, config.state_capacity_bytes),
        };
        let base = NeuralBase::new(scorer.output_size(), shortlist, vocab, config, states)?;

        scorer.reset();
        let hidden: Box<[f32]> = scorer.hidden().into();
        debug_assert_eq!(hidden.len(), scorer.hidden_size());

        Ok(Self {
            scorer,
            base,
            current: hidden.clone(),
            future: hidden,
            last_resolved: None,
        })
    }

    #[inline]
    pub fn with_companion(mut self, ngram: Rc<BackoffNGram>) -> Result<Self, LmError> {
        self.set_companion(ngram)?;
        Ok(self)
    }

    #[inline]
    pub(crate) fn set_companion(&mut self, ngram: Rc<BackoffNGram>) -> Result<(), LmError> {
        self.base.set_companion(ngram)
    }

    #[inline]
    pub fn config(&self) -> &NeuralConfig {
        &self.base.config
    }

    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.base.vocab_size
    }

    #[inline]
    pub fn cache_stats(&self) -> CacheStats {
        self.base.cache.stats()
    }

    /// Hidden vector before the most recent history word of the last query
    #[inline]
    pub fn current_vector(&self) -> &[f32] {
        &self.current
    }

    /// Hidden vector after the most recent history word of the last query
    #[inline]
    pub fn future_vector(&self) -> &[f32] {
        &self.future
    }

    /// Resets the network, the next query starts a new lattice
    pub fn start_sentence(&mut self) {
        self.scorer.reset();
        self.current.copy_from_slice(self.scorer.hidden());
        self.future.copy_from_slice(self.scorer.hidden());
        self.last_resolved = None;
    }

    /// History padded up to the full window, only the first `order - 1` words are the cache key
    fn history(&self, context: &Context) -> Option<Context> {
        let start = self.base.sentence_start?;
        Some(
            context
                .truncated(self.base.config.order - 1)
                .padded(start, CONTEXT_CAPACITY),
        )
    }

    #[inline]
    fn is_sentence_start(&self, word: Option<WordId>) -> bool {
        word.is_some() && word == self.base.sentence_start
    }

    /// Cache hit: the network continues from the entry
    fn adopt(&mut self, id: EntryId) {
        let Some(entry) = self.base.cache.entry(id) else {
            return;
        };
        if let (Some(current), Some(future)) = (entry.current_vector(), entry.future_vector()) {
            self.scorer.set_hidden(current);
            self.current.copy_from_slice(current);
            self.future.copy_from_slice(future);
        }
        self.last_resolved = Some(id);
    }

    /// Sets the hidden state that precedes the most recent word of `history`
    fn restore_hidden(&mut self, history: Context) {
        if self.base.config.independent_sentences && self.is_sentence_start(history.most_recent())
        {
            self.scorer.reset();
            return;
        }
        // lattice start, the network is already in place
        if self.last_resolved.is_none() {
            return;
        }

        let order = self.base.config.order;
        let mut pending = ArrayVec::<Context, MAX_ORDER>::new();
        let mut history = history;
        loop {
            let preceding = history.preceding();
            let future = self
                .base
                .cache
                .find(preceding)
                .and_then(|id| self.base.cache.entry(id))
                .and_then(|e| e.future_vector());
            if let Some(future) = future.filter(|_| !preceding.is_empty()) {
                self.scorer.set_hidden(future);
                break;
            }
            if preceding.is_empty() || self.is_sentence_start(history.most_recent()) {
                self.scorer.reset();
                break;
            }

            assert!(
                pending.len() < order,
                "Recurrent history rebuild of {history:?} exceeded order {order}"
            );
            pending.push(preceding);
            history = preceding;
        }

        if !pending.is_empty() {
            tracing::trace!("Rebuilding {} preceding histories", pending.len());
        }
        while let Some(preceding) = pending.pop() {
            self.accept(preceding, false);
        }
    }

    /// Feeds the most recent word of `history` and caches the output distribution
    fn accept(&mut self, history: Context, top_level: bool) -> EntryId {
        let prev = history.most_recent().unwrap_or_default();
        let prev_input = self.base.shortlist.input_index(prev);

        self.current.copy_from_slice(self.scorer.hidden());
        self.scorer.accept(prev_input, &mut self.base.outputs);
        self.base.cache.record_scorer_call();
        self.future.copy_from_slice(self.scorer.hidden());

        if top_level {
            self.base.cache.flush_if_full();
        }
        let id = self.base.cache.insert(
            history,
            &self.base.outputs,
            Some((&*self.current, &*self.future)),
        );
        self.last_resolved = Some(id);
        id
    }

    /// `ln P(word | context)`.
    /// The network advances even for words it can't score.
    pub fn probability(&mut self, context: &Context, word: WordId) -> LogProb {
        let Some(history) = self.history(context) else {
            return LZERO;
        };

        let id = match self.base.cache.lookup(history) {
            Some(id) => {
                self.adopt(id);
                id
            }
            None => {
                self.restore_hidden(history);
                self.accept(history, true)
            }
        };

        if !self.base.is_scorable(word) {
            return LZERO;
        }
        let base = &mut self.base;
        base.cache
            .log_prob(id, &history, word, &base.shortlist, &base.oos)
    }

    /// With history vector states, paths merge by the last `state_size - 1` words
    /// and the distance of their future vectors
    pub fn transition(&mut self, src: &LmState, word: WordId) -> Transition {
        let context = self.base.state_context(src);
        let log_prob = self.probability(&context, word);

        let dest = self.base.destination_context(&context, word);
        let vector = self
            .base
            .states
            .uses_history_vector()
            .then_some(&*self.future);
        let state = self.base.states.resolve(dest, vector);
        Transition::new(log_prob, state)
    }

    pub fn reset_caches(&mut self) {
        self.base.reset();
        self.start_sentence();
    }
}
