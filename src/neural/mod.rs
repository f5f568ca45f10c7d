use crate::{
    config::{NeuralConfig, OosMode},
    context::{Context, WordId},
    error::LmError,
    model::BackoffNGram,
    state::{LmState, StateTracker},
    vocab::{OutputClass, ShortList, Vocabulary, SENTENCE_START},
};
use ::std::rc::Rc;

mod cache;
mod feedforward;
mod recurrent;

pub(crate) use cache::NeuralCache;
pub use feedforward::FeedForwardLm;
pub use recurrent::RecurrentLm;

/// Forward pass of a feed-forward neural LM
pub trait FeedForwardScorer {
    fn output_size(&self) -> usize;

    /// Writes linear probabilities of every output node to `out`.
    /// `inputs` are input layer indices of the history, oldest first.
    fn score_all(&mut self, inputs: &[u32], out: &mut [f32]);

    fn score(&mut self, inputs: &[u32], output: u32) -> f32 {
        let mut out = vec![0.0; self.output_size()];
        self.score_all(inputs, &mut out);
        out.get(output as usize).copied().unwrap_or(0.0)
    }
}

/// Forward pass of a recurrent neural LM with an exposed hidden state
pub trait RecurrentScorer {
    fn hidden_size(&self) -> usize;
    fn output_size(&self) -> usize;
    /// Sentence start hidden state
    fn reset(&mut self);
    fn hidden(&self) -> &[f32];
    fn set_hidden(&mut self, hidden: &[f32]);
    /// Consumes the input layer index of the most recent history word,
    /// advances the hidden state and writes linear probabilities of every output node
    fn accept(&mut self, prev_input: u32, out: &mut [f32]);
}

/// Probability of words outside of the output shortlist
#[derive(Clone, Debug, Default)]
pub enum OosStrategy {
    /// [`LZERO`](crate::LZERO)
    #[default]
    Floor,
    /// Out-of-shortlist node mass shared in proportion to a back-off ngram
    Renormalize(Rc<BackoffNGram>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub flushes: usize,
    pub scorer_calls: usize,
}

/// Settings and stores shared by feed-forward and recurrent models
#[derive(Debug)]
pub(crate) struct NeuralBase {
    pub(crate) config: NeuralConfig,
    pub(crate) shortlist: ShortList,
    pub(crate) vocab_size: usize,
    pub(crate) sentence_start: Option<WordId>,
    pub(crate) oos: OosStrategy,
    pub(crate) cache: NeuralCache,
    pub(crate) states: StateTracker,
    pub(crate) outputs: Box<[f32]>,
}

impl NeuralBase {
    pub(crate) fn new(
        scorer_output_size: usize,
        shortlist: ShortList,
        vocab: &Vocabulary,
        config: NeuralConfig,
        states: StateTracker,
    ) -> Result<Self, LmError> {
        config.validate()?;

        if scorer_output_size != shortlist.output_size() {
            return Err(LmError::OutputSizeMismatch {
                scorer: scorer_output_size,
                shortlist: shortlist.output_size(),
            });
        }

        let sentence_start = vocab.sentence_start();
        if config.pad_start_word && sentence_start.is_none() {
            return Err(LmError::MissingSentenceStart(SENTENCE_START));
        }

        if config.oos_mode == OosMode::Renormalize {
            if shortlist.oos_node().is_none() {
                return Err(LmError::MissingOosNode);
            }
            tracing::info!("Renormalizing out-of-shortlist words once a back-off model is set");
        }

        Ok(Self {
            cache: NeuralCache::new(config.order - 1, scorer_output_size, config.cache_capacity_bytes),
            outputs: vec![0.0; scorer_output_size].into_boxed_slice(),
            vocab_size: vocab.len(),
            config,
            shortlist,
            sentence_start,
            oos: OosStrategy::Floor,
            states,
        })
    }

    /// Renormalizes out-of-shortlist words with `ngram`
    pub(crate) fn set_companion(&mut self, ngram: Rc<BackoffNGram>) -> Result<(), LmError> {
        if self.shortlist.oos_node().is_none() {
            return Err(LmError::MissingOosNode);
        }
        if ngram.vocab_size() != self.vocab_size {
            return Err(LmError::VocabularyMismatch {
                expected: self.vocab_size,
                found: ngram.vocab_size(),
            });
        }
        self.oos = OosStrategy::Renormalize(ngram);
        Ok(())
    }

    /// Full span history, `None` if it's too short and padding is off
    pub(crate) fn query_context(&self, context: &Context) -> Option<Context> {
        let len = self.config.order - 1;
        let context = context.truncated(len);
        if context.len() == len {
            return Some(context);
        }
        match self.sentence_start {
            Some(start) if self.config.pad_start_word => Some(context.padded(start, len)),
            _ => None,
        }
    }

    /// Out-of-shortlist words are scored only with renormalization
    #[inline]
    pub(crate) fn is_scorable(&self, word: WordId) -> bool {
        match self.shortlist.output_class(word) {
            OutputClass::Shortlist(_) => true,
            OutputClass::OutOfShortlist => matches!(self.oos, OosStrategy::Renormalize(_)),
        }
    }

    /// Input layer indices of `context`, oldest first
    pub(crate) fn inputs(&self, context: &Context) -> Vec<u32> {
        let mut inputs: Vec<u32> = context
            .iter()
            .map(|w| self.shortlist.input_index(w))
            .collect();
        inputs.reverse();
        inputs
    }

    /// History of a lattice state issued by this model.
    /// States carry their history, so they outlive flushes of the state store.
    pub(crate) fn state_context(&self, state: &LmState) -> Context {
        if let LmState::Entry(entry) = state {
            if !self.states.contains(entry) {
                tracing::trace!("LM state {:?} was flushed, resolving its history again", entry.id);
            }
        }
        state.context()
    }

    #[inline]
    pub(crate) fn destination_context(&self, src: &Context, word: WordId) -> Context {
        src.extended(word, self.config.order - 1)
    }

    pub(crate) fn reset(&mut self) {
        tracing::debug!("Neural LM caches reset, {:?}", self.cache.stats());
        self.cache.reset();
        self.states.reset();
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use ::std::cell::Cell;

    /// Output distribution depends on the sum of inputs
    #[derive(Debug)]
    pub(crate) struct MockFeedForward {
        pub(crate) output_size: usize,
        pub(crate) calls: Rc<Cell<usize>>,
    }

    impl MockFeedForward {
        pub(crate) fn new(output_size: usize) -> (Self, Rc<Cell<usize>>) {
            let calls = Rc::new(Cell::new(0));
            (
                Self {
                    output_size,
                    calls: calls.clone(),
                },
                calls,
            )
        }

        /// Node `favored` gets half of the mass, the rest is uniform
        pub(crate) fn distribution(output_size: usize, favored: usize) -> Vec<f32> {
            let rest = 0.5 / (output_size - 1) as f32;
            (0..output_size)
                .map(|i| if i == favored { 0.5 } else { rest })
                .collect()
        }
    }

    impl FeedForwardScorer for MockFeedForward {
        fn output_size(&self) -> usize {
            self.output_size
        }

        fn score_all(&mut self, inputs: &[u32], out: &mut [f32]) {
            self.calls.set(self.calls.get() + 1);
            let favored = inputs.iter().sum::<u32>() as usize % self.output_size;
            out.copy_from_slice(&Self::distribution(self.output_size, favored));
        }
    }

    /// Hidden state counts accepted words and sums their inputs,
    /// the output favors the node of that sum
    #[derive(Debug)]
    pub(crate) struct MockRecurrent {
        pub(crate) output_size: usize,
        pub(crate) hidden: Vec<f32>,
        pub(crate) calls: Rc<Cell<usize>>,
    }

    impl MockRecurrent {
        pub(crate) fn new(output_size: usize) -> (Self, Rc<Cell<usize>>) {
            let calls = Rc::new(Cell::new(0));
            (
                Self {
                    output_size,
                    hidden: vec![0.0; 2],
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl RecurrentScorer for MockRecurrent {
        fn hidden_size(&self) -> usize {
            2
        }

        fn output_size(&self) -> usize {
            self.output_size
        }

        fn reset(&mut self) {
            self.hidden.fill(0.0);
        }

        fn hidden(&self) -> &[f32] {
            &self.hidden
        }

        fn set_hidden(&mut self, hidden: &[f32]) {
            self.hidden.copy_from_slice(hidden);
        }

        fn accept(&mut self, prev_input: u32, out: &mut [f32]) {
            self.calls.set(self.calls.get() + 1);
            self.hidden[0] += 1.0;
            self.hidden[1] += prev_input as f32;
            let favored = self.hidden[1] as usize % self.output_size;
            out.copy_from_slice(&MockFeedForward::distribution(self.output_size, favored));
        }
    }
}
