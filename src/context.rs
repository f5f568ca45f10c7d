use ::core::fmt;

/// Word identifier, `1..=vocab_size`. `0` marks an empty history slot
pub type WordId = u32;
/// Natural logarithm of a probability
pub type LogProb = f32;

/// Max length of an ngram, 2 == bigram
pub const MAX_ORDER: usize = 9;
pub(crate) const CONTEXT_CAPACITY: usize = MAX_ORDER - 1;

/// Floor probability for words a model can't score
pub const LZERO: LogProb = -1.0e10;
/// Probabilities below `EXP_MIN_ARG` underflow to zero
const EXP_MIN_ARG: LogProb = -46.05;

/// Natural log with a `-99.99` floor for probabilities below `1e-20`
#[inline]
pub fn log_natural(p: f64) -> LogProb {
    if p < 1.0e-20 {
        -99.99
    } else {
        p.ln() as LogProb
    }
}

#[inline]
pub(crate) fn unlog_natural(lp: LogProb) -> f64 {
    if lp < EXP_MIN_ARG {
        0.0
    } else {
        (lp as f64).exp()
    }
}

/// Word history, most recent word first.
/// Unused trailing slots are `0`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Context {
    words: [WordId; CONTEXT_CAPACITY],
}

impl Context {
    pub const EMPTY: Self = Self {
        words: [0; CONTEXT_CAPACITY],
    };

    /// `words` are most recent first, and are cut at the first `0`
    pub fn from_recent(words: &[WordId]) -> Self {
        let mut context = Self::EMPTY;
        for (slot, &word) in context.words.iter_mut().zip(words) {
            if word == 0 {
                break;
            }
            *slot = word;
        }
        context
    }

    /// `words` are in the reading order, oldest first
    pub fn from_sentence(words: &[WordId]) -> Self {
        let mut context = Self::EMPTY;
        for (slot, &word) in context.words.iter_mut().zip(words.iter().rev()) {
            if word == 0 {
                break;
            }
            *slot = word;
        }
        context
    }

    /// Number of filled slots
    #[inline]
    pub fn len(&self) -> usize {
        self.words.iter().position(|&w| w == 0).unwrap_or(CONTEXT_CAPACITY)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words[0] == 0
    }

    #[inline]
    pub fn most_recent(&self) -> Option<WordId> {
        Some(self.words[0]).filter(|&w| w != 0)
    }

    #[inline]
    pub fn get(&self, i: usize) -> WordId {
        self.words.get(i).copied().unwrap_or(0)
    }

    #[inline]
    pub fn as_slice(&self) -> &[WordId; CONTEXT_CAPACITY] {
        &self.words
    }

    /// Filled slots, most recent first
    pub fn iter(&self) -> impl Iterator<Item = WordId> + '_ {
        self.words.iter().copied().take_while(|&w| w != 0)
    }

    /// Keeps at most `len` most recent words
    #[inline]
    pub fn truncated(mut self, len: usize) -> Self {
        for slot in self.words.iter_mut().skip(len) {
            *slot = 0;
        }
        self
    }

    /// Prepends `word` as the most recent one, the oldest falls off at `len`
    pub fn extended(&self, word: WordId, len: usize) -> Self {
        let mut context = Self::EMPTY;
        context.words[0] = word;
        context.words[1..].copy_from_slice(&self.words[..CONTEXT_CAPACITY - 1]);
        context.truncated(len)
    }

    /// One word shorter history: the oldest filled slot is cleared
    #[inline]
    pub fn without_oldest(mut self) -> Self {
        let len = self.len();
        if len > 0 {
            self.words[len - 1] = 0;
        }
        self
    }

    /// History as it was before the most recent word was appended
    #[inline]
    pub fn preceding(&self) -> Self {
        let mut context = Self::EMPTY;
        context.words[..CONTEXT_CAPACITY - 1].copy_from_slice(&self.words[1..]);
        context
    }

    /// Fills empty slots up to `len` with `word`
    pub fn padded(mut self, word: WordId, len: usize) -> Self {
        let filled = self.len();
        for slot in self.words.iter_mut().take(len).skip(filled) {
            *slot = word;
        }
        self
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl From<&[WordId]> for Context {
    #[inline]
    fn from(words: &[WordId]) -> Self {
        Self::from_recent(words)
    }
}
