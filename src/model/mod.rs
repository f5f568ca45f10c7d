use crate::{
    context::{Context, LogProb, WordId},
    error::LmError,
    neural::{FeedForwardLm, RecurrentLm},
    state::LmState,
};
use ::std::rc::Rc;
use ahash::AHashMap;
use compact_str::CompactString;
use strum_macros::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

mod backoff;
mod interpolated;
mod matrix;

pub use backoff::{BackoffNGram, BackoffNGramBuilder};
pub use interpolated::{ComponentSpec, InterpolatedLm, InterpolationSpec};
pub use matrix::MatrixBigram;

/// Model type tags of interpolation descriptions
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumCount,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
pub enum LmKind {
    #[strum(serialize = "NGRAM")]
    Backoff,
    #[strum(serialize = "MATBIGRAM")]
    MatrixBigram,
    #[strum(serialize = "MLP")]
    FeedForward,
    #[strum(to_string = "RNN", serialize = "FRNN")]
    Recurrent,
    #[strum(serialize = "INTERPOLATE")]
    Interpolated,
}

/// Result of moving a lattice path by one word
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub log_prob: LogProb,
    pub state: LmState,
}

impl Transition {
    #[inline]
    pub fn new(log_prob: LogProb, state: LmState) -> Self {
        Self { log_prob, state }
    }
}

/// Any supported model behind one interface
#[derive(Debug)]
pub enum LanguageModel {
    Backoff(Rc<BackoffNGram>),
    MatrixBigram(MatrixBigram),
    FeedForward(FeedForwardLm),
    Recurrent(RecurrentLm),
    Interpolated(InterpolatedLm),
}

impl LanguageModel {
    #[inline]
    pub fn kind(&self) -> LmKind {
        match self {
            Self::Backoff(_) => LmKind::Backoff,
            Self::MatrixBigram(_) => LmKind::MatrixBigram,
            Self::FeedForward(_) => LmKind::FeedForward,
            Self::Recurrent(_) => LmKind::Recurrent,
            Self::Interpolated(_) => LmKind::Interpolated,
        }
    }

    /// Neural models signal words and histories they can't score with the floor
    #[inline]
    pub fn is_neural(&self) -> bool {
        matches!(self, Self::FeedForward(_) | Self::Recurrent(_))
    }

    pub fn vocab_size(&self) -> usize {
        match self {
            Self::Backoff(lm) => lm.vocab_size(),
            Self::MatrixBigram(lm) => lm.vocab_size(),
            Self::FeedForward(lm) => lm.vocab_size(),
            Self::Recurrent(lm) => lm.vocab_size(),
            Self::Interpolated(lm) => lm.vocab_size(),
        }
    }

    /// `ln P(word | context)`, context is most recent word first
    pub fn probability(&mut self, context: &Context, word: WordId) -> LogProb {
        match self {
            Self::Backoff(lm) => lm.probability(context, word),
            Self::MatrixBigram(lm) => lm.probability(context, word),
            Self::FeedForward(lm) => lm.probability(context, word),
            Self::Recurrent(lm) => lm.probability(context, word),
            Self::Interpolated(lm) => lm.probability(context, word),
        }
    }

    /// Probability of `word` after the path in `src`, and the state the path reaches
    pub fn transition(&mut self, src: &LmState, word: WordId) -> Transition {
        match self {
            Self::Backoff(lm) => lm.transition(src, word),
            Self::MatrixBigram(lm) => lm.transition(src, word),
            Self::FeedForward(lm) => lm.transition(src, word),
            Self::Recurrent(lm) => lm.transition(src, word),
            Self::Interpolated(lm) => lm.transition(src, word),
        }
    }

    /// Drops caches and LM states, all previously issued states become invalid.
    /// Call between lattices.
    pub fn reset_caches(&mut self) {
        match self {
            Self::Backoff(_) | Self::MatrixBigram(_) => {}
            Self::FeedForward(lm) => lm.reset_caches(),
            Self::Recurrent(lm) => lm.reset_caches(),
            Self::Interpolated(lm) => lm.reset_caches(),
        }
    }
}

impl From<BackoffNGram> for LanguageModel {
    #[inline]
    fn from(lm: BackoffNGram) -> Self {
        Self::Backoff(Rc::new(lm))
    }
}

impl From<MatrixBigram> for LanguageModel {
    #[inline]
    fn from(lm: MatrixBigram) -> Self {
        Self::MatrixBigram(lm)
    }
}

impl From<FeedForwardLm> for LanguageModel {
    #[inline]
    fn from(lm: FeedForwardLm) -> Self {
        Self::FeedForward(lm)
    }
}

impl From<RecurrentLm> for LanguageModel {
    #[inline]
    fn from(lm: RecurrentLm) -> Self {
        Self::Recurrent(lm)
    }
}

impl From<InterpolatedLm> for LanguageModel {
    #[inline]
    fn from(lm: InterpolatedLm) -> Self {
        Self::Interpolated(lm)
    }
}

/// Loaded models by name, interpolation descriptions refer to them
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: AHashMap<CompactString, LanguageModel>,
}

impl ModelRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a model with the same name
    pub fn insert(&mut self, name: &str, model: impl Into<LanguageModel>) -> &mut Self {
        let model = model.into();
        tracing::debug!("Registered {} model {name:?}", model.kind());
        self.models.insert(name.into(), model);
        self
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&LanguageModel> {
        self.models.get(name)
    }

    /// Back-off models are shared, the others are moved out
    pub(crate) fn take(&mut self, name: &str) -> Result<LanguageModel, LmError> {
        match self.models.get(name) {
            Some(LanguageModel::Backoff(lm)) => Ok(LanguageModel::Backoff(lm.clone())),
            Some(_) => self
                .models
                .remove(name)
                .ok_or_else(|| LmError::UnknownModel(name.to_owned())),
            None => Err(LmError::UnknownModel(name.to_owned())),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
