use super::{CacheStats, FeedForwardScorer, NeuralBase};
use crate::{
    config::NeuralConfig,
    context::{Context, LogProb, WordId, LZERO},
    error::LmError,
    model::{BackoffNGram, Transition},
    state::{LmState, StateTracker},
    vocab::{ShortList, Vocabulary},
};
use ::core::fmt;
use ::std::rc::Rc;

/// Feed-forward neural LM behind a probability cache.
///
/// The scorer runs once per unseen history for the whole output layer.
pub struct FeedForwardLm {
    scorer: Box<dyn FeedForwardScorer>,
    base: NeuralBase,
}

impl fmt::Debug for FeedForwardLm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedForwardLm")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl FeedForwardLm {
    pub fn new(
        scorer: Box<dyn FeedForwardScorer>,
        shortlist: ShortList,
        vocab: &Vocabulary,
        config: NeuralConfig,
    ) -> Result<Self, LmError> {
        if config.history_vector.is_some() {
            return Err(LmError::HistoryVectorUnsupported);
        }

        let states = StateTracker::exact(config.order - 1, config.state_capacity_bytes);
        let base = NeuralBase::new(scorer.output_size(), shortlist, vocab, config, states)?;
        Ok(Self { scorer, base })
    }

    /// Out-of-shortlist words get the output node mass shared by `ngram`
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

    /// `ln P(word | context)`, [`LZERO`] for short histories without padding
    /// and for out-of-shortlist words without renormalization
    pub fn probability(&mut self, context: &Context, word: WordId) -> LogProb {
        let Some(context) = self.base.query_context(context) else {
            return LZERO;
        };

        if !self.base.is_scorable(word) {
            return LZERO;
        }

        let id = match self.base.cache.lookup(context) {
            Some(id) => id,
            None => {
                let inputs = self.base.inputs(&context);
                self.scorer.score_all(&inputs, &mut self.base.outputs);
                self.base.cache.record_scorer_call();
                self.base.cache.flush_if_full();
                self.base.cache.insert(context, &self.base.outputs, None)
            }
        };

        let base = &mut self.base;
        base.cache
            .log_prob(id, &context, word, &base.shortlist, &base.oos)
    }

    /// Destination is the full span history ending with `word`
    pub fn transition(&mut self, src: &LmState, word: WordId) -> Transition {
        let context = self.base.state_context(src);
        let dest = self.base.destination_context(&context, word);
        let state = self.base.states.resolve(dest, None);
        let log_prob = self.probability(&context, word);
        Transition::new(log_prob, state)
    }

    pub fn reset_caches(&mut self) {
        self.base.reset();
    }
}
