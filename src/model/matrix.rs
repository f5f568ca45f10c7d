use super::Transition;
use crate::{
    context::{Context, LogProb, WordId, LZERO},
    error::LmError,
    state::LmState,
};
use debug_unsafe::slice::SliceGetter;

/// Dense bigram, `ln P(word | prev)` stored row-major by `prev`
#[derive(Clone, Debug)]
pub struct MatrixBigram {
    vocab_size: usize,
    log_probs: Box<[LogProb]>,
}

impl MatrixBigram {
    /// `rows[prev - 1][word - 1]`
    pub fn new(rows: Vec<Vec<LogProb>>) -> Result<Self, LmError> {
        let vocab_size = rows.len();
        if let Some(row) = rows.iter().find(|row| row.len() != vocab_size) {
            return Err(LmError::NotSquare {
                rows: vocab_size,
                cols: row.len(),
            });
        }

        Ok(Self {
            vocab_size,
            log_probs: rows.into_iter().flatten().collect(),
        })
    }

    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    #[inline]
    fn index(&self, word: WordId) -> Option<usize> {
        (word != 0 && word as usize <= self.vocab_size).then(|| word as usize - 1)
    }

    /// Only the most recent history word is used
    pub fn probability(&self, context: &Context, word: WordId) -> LogProb {
        let Some(prev) = context.most_recent().and_then(|w| self.index(w)) else {
            return LZERO;
        };
        let Some(word) = self.index(word) else {
            return LZERO;
        };

        *self
            .log_probs
            .get_safe_unchecked(prev * self.vocab_size + word)
    }

    pub fn transition(&self, src: &LmState, word: WordId) -> Transition {
        let log_prob = self.probability(&src.context(), word);
        let state = match self.index(word) {
            Some(_) => LmState::Word(word),
            None => LmState::Start,
        };
        Transition::new(log_prob, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bigram() -> MatrixBigram {
        MatrixBigram::new(vec![vec![-1.0, -2.0], vec![-3.0, -4.0]]).unwrap()
    }

    #[test]
    fn test_matrix_lookup() {
        let model = bigram();
        assert_eq!(model.probability(&Context::from_recent(&[2, 1]), 1), -3.0);
        assert_eq!(model.probability(&Context::from_recent(&[1]), 2), -2.0);
        assert_eq!(model.probability(&Context::EMPTY, 1), LZERO);
        assert_eq!(model.probability(&Context::from_recent(&[3]), 1), LZERO);
        assert_eq!(model.probability(&Context::from_recent(&[1]), 3), LZERO);
    }

    #[test]
    fn test_matrix_transition() {
        let model = bigram();
        let first = model.transition(&LmState::Start, 2);
        assert_eq!(first.log_prob, LZERO);
        assert_eq!(first.state, LmState::Word(2));

        let second = model.transition(&first.state, 2);
        assert_eq!(second.log_prob, -4.0);
        assert_eq!(second.state, LmState::Word(2));
    }

    #[test]
    fn test_not_square() {
        assert_eq!(
            MatrixBigram::new(vec![vec![-1.0], vec![-1.0]]).err(),
            Some(LmError::NotSquare { rows: 2, cols: 1 })
        );
    }
}
