use crate::context::{Context, LogProb, WordId};

/// Explicit ngram probability
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Successor {
    pub word: WordId,
    pub log_prob: LogProb,
}

/// Store node for one history.
///
/// Successors are appended while the node is populated, then frozen
/// sorted by word. Recurrent models keep the hidden vectors that produced
/// this distribution (`current`) and that follow it (`future`).
#[derive(Clone, Debug)]
pub struct ContextEntry {
    pub(super) context: Context,
    pub(super) backoff_weight: LogProb,
    pub(super) successors: Vec<Successor>,
    pub(super) frozen: bool,
    pub(super) current: Option<Box<[f32]>>,
    pub(super) future: Option<Box<[f32]>>,
    pub(super) link: Option<u32>,
}

impl ContextEntry {
    #[inline]
    pub(super) fn new(context: Context, link: Option<u32>) -> Self {
        Self {
            context,
            backoff_weight: 0.0,
            successors: Vec::new(),
            frozen: false,
            current: None,
            future: None,
            link,
        }
    }

    #[inline]
    pub fn context(&self) -> Context {
        self.context
    }

    #[inline]
    pub fn backoff_weight(&self) -> LogProb {
        self.backoff_weight
    }

    #[inline]
    pub fn successors(&self) -> &[Successor] {
        &self.successors
    }

    #[inline]
    pub fn successor_count(&self) -> usize {
        self.successors.len()
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Binary search once frozen, linear scan while populating.
    /// Dense rows (words `0..n`) resolve by index.
    pub fn successor(&self, word: WordId) -> Option<LogProb> {
        if !self.frozen {
            return self
                .successors
                .iter()
                .find(|s| s.word == word)
                .map(|s| s.log_prob);
        }

        if let Some(s) = self.successors.get(word as usize) {
            if s.word == word {
                return Some(s.log_prob);
            }
        }

        self.successors
            .binary_search_by_key(&word, |s| s.word)
            .ok()
            .map(|i| self.successors[i].log_prob)
    }

    #[inline]
    pub fn current_vector(&self) -> Option<&[f32]> {
        self.current.as_deref()
    }

    #[inline]
    pub fn future_vector(&self) -> Option<&[f32]> {
        self.future.as_deref()
    }
}

/// Mean squared difference of two hidden vectors
pub fn history_distance(v1: &[f32], v2: &[f32]) -> f64 {
    debug_assert_eq!(v1.len(), v2.len(), "History vector sizes differ");
    if v1.is_empty() {
        return 0.0;
    }

    let sum: f64 = v1
        .iter()
        .zip(v2)
        .map(|(&a, &b)| {
            let d = a as f64 - b as f64;
            d * d
        })
        .sum();

    sum / v1.len() as f64
}
