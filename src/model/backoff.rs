use super::Transition;
use crate::{
    context::{Context, LogProb, WordId, LZERO, MAX_ORDER},
    error::LmError,
    state::{LmState, StateRef},
    store::{ContextStore, EntryId},
};

/// Katz back-off ngram model over a native [`ContextStore`].
///
/// Unigrams are the successors of the empty context entry.
#[derive(Debug)]
pub struct BackoffNGram {
    order: usize,
    vocab_size: usize,
    store: ContextStore,
    uniform: LogProb,
}

impl BackoffNGram {
    #[inline]
    pub fn builder(
        order: usize,
        vocab_size: usize,
        expected_entries: usize,
    ) -> Result<BackoffNGramBuilder, LmError> {
        BackoffNGramBuilder::new(order, vocab_size, expected_entries)
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.order
    }

    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Number of stored contexts, including the empty one
    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    #[inline]
    fn in_vocab(&self, word: WordId) -> bool {
        word != 0 && word as usize <= self.vocab_size
    }

    /// `ln P(word | context)` with back-off.
    ///
    /// Contexts that were never stored add a zero back-off weight,
    /// words without a unigram get `ln(1 / vocab_size)`.
    pub fn probability(&self, context: &Context, word: WordId) -> LogProb {
        if !self.in_vocab(word) {
            return LZERO;
        }

        let mut context = context.truncated(self.order - 1);
        let max_steps = context.len() + 1;
        let mut weight = 0.0;
        let mut steps = 0;
        loop {
            steps += 1;
            assert!(
                steps <= max_steps,
                "Back-off of {context:?} exceeded {max_steps} steps"
            );

            if let Some(entry) = self.store.find(context).and_then(|id| self.store.entry(id)) {
                if let Some(log_prob) = entry.successor(word) {
                    return weight + log_prob;
                }
                if context.is_empty() {
                    break;
                }
                weight += entry.backoff_weight();
            } else if context.is_empty() {
                break;
            }

            context = context.without_oldest();
        }

        weight + self.uniform
    }

    fn state_context(&self, state: &LmState) -> Context {
        match state {
            LmState::Entry(StateRef { id, context }) => {
                if self.store.entry(*id).is_none() {
                    tracing::warn!("Stale ngram state {id:?}, using empty history");
                    return Context::EMPTY;
                }
                *context
            }
            LmState::Start => Context::EMPTY,
            state => state.context(),
        }
    }

    /// Longest stored suffix of `context`
    fn longest_stored(&self, context: Context) -> Option<(EntryId, Context)> {
        let mut context = context.truncated(self.order - 1);
        while !context.is_empty() {
            if let Some(id) = self.store.find(context) {
                return Some((id, context));
            }
            context = context.without_oldest();
        }
        None
    }

    /// Destination is the longest stored history ending with `word`,
    /// or [`LmState::Start`] if only the unigram applies
    pub fn transition(&self, src: &LmState, word: WordId) -> Transition {
        if !self.in_vocab(word) {
            tracing::warn!("Word {word} is out of the ngram vocabulary");
            return Transition::new(LZERO, LmState::Start);
        }

        let context = self.state_context(src);
        let log_prob = self.probability(&context, word);
        let state = match self.longest_stored(context.extended(word, self.order - 1)) {
            Some((id, context)) => LmState::Entry(StateRef { id, context }),
            None => LmState::Start,
        };

        Transition::new(log_prob, state)
    }
}

/// Populates a [`BackoffNGram`], contexts are most recent word first
#[derive(Debug)]
pub struct BackoffNGramBuilder {
    order: usize,
    vocab_size: usize,
    store: ContextStore,
}

impl BackoffNGramBuilder {
    pub fn new(order: usize, vocab_size: usize, expected_entries: usize) -> Result<Self, LmError> {
        if !(1..=MAX_ORDER).contains(&order) {
            return Err(LmError::InvalidOrder(order));
        }

        let mut store = ContextStore::new(order - 1, expected_entries);
        store.get_or_create(Context::EMPTY);
        Ok(Self {
            order,
            vocab_size,
            store,
        })
    }

    fn check_word(&self, word: WordId) -> Result<(), LmError> {
        if word == 0 || word as usize > self.vocab_size {
            return Err(LmError::WordOutOfRange {
                word,
                vocab_size: self.vocab_size,
            });
        }
        Ok(())
    }

    fn context_entry(&mut self, context: Context) -> Result<EntryId, LmError> {
        if context.len() >= self.order {
            return Err(LmError::ContextTooLong {
                context,
                order: self.order,
            });
        }
        for word in context.iter() {
            self.check_word(word)?;
        }
        Ok(self.store.get_or_create(context))
    }

    #[inline]
    pub fn unigram(&mut self, word: WordId, log_prob: LogProb) -> Result<&mut Self, LmError> {
        self.ngram(Context::EMPTY, word, log_prob)
    }

    /// Explicit `ln P(word | context)`
    pub fn ngram(
        &mut self,
        context: Context,
        word: WordId,
        log_prob: LogProb,
    ) -> Result<&mut Self, LmError> {
        self.check_word(word)?;
        let id = self.context_entry(context)?;
        self.store.push_successor(id, word, log_prob);
        Ok(self)
    }

    pub fn backoff_weight(
        &mut self,
        context: Context,
        weight: LogProb,
    ) -> Result<&mut Self, LmError> {
        let id = self.context_entry(context)?;
        self.store.set_backoff_weight(id, weight);
        Ok(self)
    }

    pub fn build(mut self) -> Result<BackoffNGram, LmError> {
        let ids: Vec<_> = self.store.ids().collect();
        for id in ids {
            self.store.freeze(id).map_err(|e| match e {
                LmError::DuplicateSuccessor { context, word } if context.is_empty() => {
                    LmError::DuplicateUnigram(word)
                }
                e => e,
            })?;
        }

        tracing::debug!(
            "Built {}-gram model: {} contexts, vocabulary {}",
            self.order,
            self.store.len(),
            self.vocab_size
        );

        Ok(BackoffNGram {
            order: self.order,
            vocab_size: self.vocab_size,
            store: self.store,
            uniform: -(self.vocab_size.max(1) as LogProb).ln(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rstest::{fixture, rstest};

    const A: WordId = 1;
    const B: WordId = 2;
    const C: WordId = 3;

    #[fixture]
    fn trigram() -> BackoffNGram {
        let mut builder = BackoffNGram::builder(3, 3, 10).unwrap();
        builder
            .unigram(A, -1.0)
            .unwrap()
            .unigram(B, -2.0)
            .unwrap()
            .ngram(Context::from_recent(&[A]), B, -0.5)
            .unwrap()
            .backoff_weight(Context::from_recent(&[A]), -0.1)
            .unwrap();
        builder.build().unwrap()
    }

    #[rstest]
    fn test_explicit_bigram(trigram: BackoffNGram) {
        assert_eq!(trigram.probability(&Context::from_recent(&[A]), B), -0.5);
    }

    #[rstest]
    fn test_backoff_to_uniform(trigram: BackoffNGram) {
        assert_approx_eq!(
            f32,
            trigram.probability(&Context::from_recent(&[A]), C),
            -0.1 + (1.0f32 / 3.0).ln(),
            epsilon = 1e-6
        );
    }

    #[rstest]
    #[case(&[A, B], B, -0.5)]
    #[case(&[B, A], A, -1.0)]
    #[case(&[], B, -2.0)]
    #[case(&[A, B, C, A], A, -1.1)]
    fn test_unobserved_contexts(
        trigram: BackoffNGram,
        #[case] recent: &[WordId],
        #[case] word: WordId,
        #[case] expected: LogProb,
    ) {
        assert_approx_eq!(
            f32,
            trigram.probability(&Context::from_recent(recent), word),
            expected,
            epsilon = 1e-6
        );
    }

    #[rstest]
    #[case(0)]
    #[case(4)]
    fn test_out_of_range_word(trigram: BackoffNGram, #[case] word: WordId) {
        assert_eq!(trigram.probability(&Context::EMPTY, word), LZERO);
        let transition = trigram.transition(&LmState::Start, word);
        assert_eq!(transition.log_prob, LZERO);
        assert_eq!(transition.state, LmState::Start);
    }

    #[rstest]
    fn test_transition_states(trigram: BackoffNGram) {
        let to_a = trigram.transition(&LmState::Start, A);
        assert_eq!(to_a.log_prob, -1.0);
        assert_eq!(to_a.state.context(), Context::from_recent(&[A]));

        let to_b = trigram.transition(&to_a.state, B);
        assert_eq!(to_b.log_prob, -0.5);
        assert_eq!(to_b.state, LmState::Start);

        let again = trigram.transition(&LmState::Start, A);
        assert_eq!(again.state, to_a.state);
    }

    #[test]
    fn test_builder_errors() {
        assert_eq!(
            BackoffNGram::builder(MAX_ORDER + 1, 3, 10).err(),
            Some(LmError::InvalidOrder(MAX_ORDER + 1))
        );

        let mut builder = BackoffNGram::builder(2, 3, 10).unwrap();
        assert_eq!(
            builder.unigram(4, -1.0).err(),
            Some(LmError::WordOutOfRange {
                word: 4,
                vocab_size: 3
            })
        );
        let context = Context::from_recent(&[A, B]);
        assert_eq!(
            builder.ngram(context, C, -1.0).err(),
            Some(LmError::ContextTooLong { context, order: 2 })
        );

        builder.unigram(A, -1.0).unwrap().unigram(A, -1.5).unwrap();
        assert_eq!(builder.build().err(), Some(LmError::DuplicateUnigram(A)));
    }

    #[test]
    fn test_unigram_model() {
        let mut builder = BackoffNGram::builder(1, 2, 10).unwrap();
        builder.unigram(A, -0.3).unwrap();
        let model = builder.build().unwrap();
        assert_eq!(model.len(), 1);
        assert_eq!(model.probability(&Context::from_recent(&[B]), A), -0.3);
        assert_eq!(model.transition(&LmState::Start, A).state, LmState::Start);
    }
}
