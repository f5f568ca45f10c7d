//! # Language model evaluation for lattice rescoring
//!
//! Back-off ngram, matrix bigram, feed-forward and recurrent neural models,
//! and weighted interpolations of them, behind one [`LanguageModel`] interface.
//!
//! A lattice driver moves every path by one word with [`LanguageModel::transition`],
//! getting the log probability and the [`LmState`] the path reaches.
//! Paths with equal [`LmState::merge_key`] can be merged.
//!
//! Neural models cache whole output distributions by history, so the scorer
//! runs once per unseen history. Caches are flushed wholesale when they grow
//! over the configured capacity, and by [`LanguageModel::reset_caches`] between lattices.
//! States carry their history, so paths held across a flush keep their scores.
//!
//! # Example
//! ```rust
//! use latlm::{BackoffNGram, Context, LanguageModel, LmState};
//!
//! let mut builder = BackoffNGram::builder(2, 3, 16)?;
//! builder
//!     .unigram(1, -1.0)?
//!     .unigram(2, -1.5)?
//!     .ngram(Context::from_recent(&[1]), 2, -0.2)?;
//! let mut lm = LanguageModel::from(builder.build()?);
//!
//! let first = lm.transition(&LmState::Start, 1);
//! let second = lm.transition(&first.state, 2);
//! assert_eq!(second.log_prob, -0.2);
//! # Ok::<(), latlm::LmError>(())
//! ```

#[allow(unused_macros)]
macro_rules! ahashmap {
    (@single $($x:tt)*) => (());
    (@count $($rest:expr),*) => (<[()]>::len(&[$(ahashmap!(@single $rest)),*]));

    ($($key:expr => $value:expr,)+) => { ahashmap!($($key => $value),+) };
    ($($key:expr => $value:expr),*) => {
        {
            let _cap = ahashmap!(@count $($key),*);
            let mut _map = ::ahash::AHashMap::with_capacity(_cap);
            $(
                let _ = _map.insert($key, $value);
            )*
            _map.into()
        }
    };
}

mod arena;
mod config;
mod context;
mod error;
mod model;
mod neural;
mod state;
mod store;
mod vocab;

pub use arena::{Arena, ArenaId};
pub use config::{HistoryVectorConfig, NeuralConfig, OosMode};
pub use context::{log_natural, Context, LogProb, WordId, LZERO, MAX_ORDER};
pub use error::LmError;
pub use model::{
    BackoffNGram, BackoffNGramBuilder, ComponentSpec, InterpolatedLm, InterpolationSpec,
    LanguageModel, LmKind, MatrixBigram, ModelRegistry, Transition,
};
pub use neural::{
    CacheStats, FeedForwardLm, FeedForwardScorer, OosStrategy, RecurrentLm, RecurrentScorer,
};
pub use state::{LmState, MixState, StateRef, StateTracker};
pub use store::{history_distance, ContextEntry, ContextStore, EntryId, Successor};
pub use vocab::{OutputClass, ShortList, Vocabulary, SENTENCE_END, SENTENCE_START};
