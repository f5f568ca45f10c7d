use crate::{
    context::{Context, WordId, MAX_ORDER},
    model::LmKind,
};
use thiserror::Error;

/// Model construction errors. Queries never fail, they return [`LZERO`](crate::LZERO)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LmError {
    #[error("Unrecognized language model type {0:?}")]
    UnknownModelType(String),
    #[error("Unknown component model {0:?}")]
    UnknownModel(String),
    #[error("Component {name:?} is declared as {declared} but is {actual}")]
    KindMismatch {
        name: String,
        declared: LmKind,
        actual: LmKind,
    },
    #[error("Model order {0} is not in range 1..={max}", max = MAX_ORDER)]
    InvalidOrder(usize),
    #[error("Context {context:?} is too long for a model of order {order}")]
    ContextTooLong { context: Context, order: usize },
    #[error("Duplicate successor word {word} in context {context:?}")]
    DuplicateSuccessor { context: Context, word: WordId },
    #[error("Duplicate unigram for word {0}")]
    DuplicateUnigram(WordId),
    #[error("Word {word} is not in range 1..={vocab_size}")]
    WordOutOfRange { word: WordId, vocab_size: usize },
    #[error("Vocabulary size mismatch: expected {expected}, found {found}")]
    VocabularyMismatch { expected: usize, found: usize },
    #[error("Sentence start symbol {0:?} is missing in the word list")]
    MissingSentenceStart(&'static str),
    #[error("Interpolation weight {0} must be positive")]
    InvalidWeight(f32),
    #[error("Interpolated model requires at least one component")]
    EmptyInterpolation,
    #[error("Probability renormalization requires a back-off ngram component")]
    MissingCompanion,
    #[error("Probability renormalization requires an out-of-shortlist output node")]
    MissingOosNode,
    #[error("Matrix bigram must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
    #[error("History vector state size {state_size} is not in range 2..={order}")]
    InvalidStateSize { state_size: usize, order: usize },
    #[error("History vector states require a recurrent model")]
    HistoryVectorUnsupported,
    #[error("Scorer output size {scorer} differs from shortlist size {shortlist}")]
    OutputSizeMismatch { scorer: usize, shortlist: usize },
}
