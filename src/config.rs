use crate::{context::MAX_ORDER, error::LmError};
use serde::{Deserialize, Serialize};

/// 1 GiB
const CACHE_CAPACITY_BYTES: usize = 1 << 30;
/// 256 MiB
const STATE_CAPACITY_BYTES: usize = 1 << 28;

/// Handling of words outside of the scorer output shortlist
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OosMode {
    /// Such words get the floor probability
    #[default]
    Floor,
    /// Mass of the out-of-shortlist node is redistributed with a back-off ngram model
    Renormalize,
}

/// Approximate LM state merging of recurrent models
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryVectorConfig {
    /// Ngram size of the state key, 2 is the previous word only
    pub state_size: usize,
    /// Max mean squared difference of hidden vectors to be merged
    pub min_distance: f64,
}

impl Default for HistoryVectorConfig {
    #[inline]
    fn default() -> Self {
        Self {
            state_size: 2,
            min_distance: 0.00001,
        }
    }
}

/// Neural LM settings, shared by feed-forward and recurrent models
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralConfig {
    /// Ngram size, history is `order - 1` words
    pub order: usize,
    /// Pad truncated histories with the sentence start word,
    /// otherwise they get the floor probability
    pub pad_start_word: bool,
    /// Reset the recurrent state at every sentence start
    pub independent_sentences: bool,
    pub cache_capacity_bytes: usize,
    pub state_capacity_bytes: usize,
    pub oos_mode: OosMode,
    pub history_vector: Option<HistoryVectorConfig>,
}

impl Default for NeuralConfig {
    #[inline]
    fn default() -> Self {
        Self {
            order: 4,
            pad_start_word: false,
            independent_sentences: false,
            cache_capacity_bytes: CACHE_CAPACITY_BYTES,
            state_capacity_bytes: STATE_CAPACITY_BYTES,
            oos_mode: OosMode::Floor,
            history_vector: None,
        }
    }
}

impl NeuralConfig {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    #[inline]
    pub fn pad_start_word(mut self, pad: bool) -> Self {
        self.pad_start_word = pad;
        self
    }

    #[inline]
    pub fn independent_sentences(mut self, independent: bool) -> Self {
        self.independent_sentences = independent;
        self
    }

    #[inline]
    pub fn cache_capacity(mut self, bytes: usize) -> Self {
        self.cache_capacity_bytes = bytes;
        self
    }

    #[inline]
    pub fn state_capacity(mut self, bytes: usize) -> Self {
        self.state_capacity_bytes = bytes;
        self
    }

    #[inline]
    pub fn oos_mode(mut self, mode: OosMode) -> Self {
        self.oos_mode = mode;
        self
    }

    /// Merge recurrent LM states by the previous `state_size - 1` words
    /// and hidden vector distance
    #[inline]
    pub fn history_vector(mut self, state_size: usize, min_distance: f64) -> Self {
        self.history_vector = Some(HistoryVectorConfig {
            state_size,
            min_distance,
        });
        self
    }

    pub(crate) fn validate(&self) -> Result<(), LmError> {
        if !(2..=MAX_ORDER).contains(&self.order) {
            return Err(LmError::InvalidOrder(self.order));
        }
        if let Some(hv) = &self.history_vector {
            if !(2..=self.order).contains(&hv.state_size) {
                return Err(LmError::InvalidStateSize {
                    state_size: hv.state_size,
                    order: self.order,
                });
            }
        }
        Ok(())
    }
}
