use super::{LanguageModel, LmKind, ModelRegistry, Transition};
use crate::{
    config::OosMode,
    context::{log_natural, unlog_natural, Context, LogProb, WordId, LZERO},
    error::LmError,
    state::{LmState, MixState},
};
use ::std::rc::Rc;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Interpolated model description, components refer to [`ModelRegistry`] names
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterpolationSpec {
    pub components: Vec<ComponentSpec>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// [`LmKind`] tag, like `NGRAM` or `RNN`
    pub kind: String,
    pub weight: f32,
    pub model: String,
}

/// Weighted mixture of models.
///
/// Neural components returning the floor are defunct for the query:
/// their weight is excluded from the normalizer.
#[derive(Debug)]
pub struct InterpolatedLm {
    weights: Box<[f32]>,
    components: Box<[LanguageModel]>,
    vocab_size: usize,
}

impl InterpolatedLm {
    pub fn new(components: Vec<(f32, LanguageModel)>) -> Result<Self, LmError> {
        let Some(vocab_size) = components.first().map(|(_, lm)| lm.vocab_size()) else {
            return Err(LmError::EmptyInterpolation);
        };

        for (weight, lm) in &components {
            if !(weight.is_finite() && *weight > 0.0) {
                return Err(LmError::InvalidWeight(*weight));
            }
            if lm.vocab_size() != vocab_size {
                return Err(LmError::VocabularyMismatch {
                    expected: vocab_size,
                    found: lm.vocab_size(),
                });
            }
        }

        let (weights, components): (Vec<_>, Vec<_>) = components.into_iter().unzip();
        Ok(Self {
            weights: weights.into_boxed_slice(),
            components: components.into_boxed_slice(),
            vocab_size,
        })
    }

    /// Takes the named models out of `registry`.
    ///
    /// Neural components configured to renormalize out-of-shortlist words
    /// use the first back-off component.
    pub fn from_spec(
        spec: &InterpolationSpec,
        registry: &mut ModelRegistry,
    ) -> Result<Self, LmError> {
        let mut components = Vec::with_capacity(spec.components.len());
        for component in &spec.components {
            let declared: LmKind = component
                .kind
                .parse()
                .map_err(|_| LmError::UnknownModelType(component.kind.clone()))?;
            let model = registry.take(&component.model)?;
            if model.kind() != declared {
                return Err(LmError::KindMismatch {
                    name: component.model.clone(),
                    declared,
                    actual: model.kind(),
                });
            }
            components.push((component.weight, model));
        }

        let companion = components.iter().find_map(|(_, lm)| match lm {
            LanguageModel::Backoff(ngram) => Some(Rc::clone(ngram)),
            _ => None,
        });
        for (_, lm) in components.iter_mut() {
            let result = match lm {
                LanguageModel::FeedForward(nn) if nn.config().oos_mode == OosMode::Renormalize => {
                    companion
                        .clone()
                        .ok_or(LmError::MissingCompanion)
                        .and_then(|ngram| nn.set_companion(ngram))
                }
                LanguageModel::Recurrent(nn) if nn.config().oos_mode == OosMode::Renormalize => {
                    companion
                        .clone()
                        .ok_or(LmError::MissingCompanion)
                        .and_then(|ngram| nn.set_companion(ngram))
                }
                _ => Ok(()),
            };
            result?;
        }

        let lm = Self::new(components)?;
        tracing::info!(
            "Interpolated {} models: {}",
            lm.components.len(),
            spec.components
                .iter()
                .map(|c| format!("{} {}*{}", c.kind, c.weight, c.model))
                .join(", ")
        );
        Ok(lm)
    }

    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[inline]
    pub fn components(&self) -> &[LanguageModel] {
        &self.components
    }

    /// Neural models return the floor for words they can't score,
    /// tiny but real probabilities still count
    #[inline]
    fn is_defunct(lm: &LanguageModel, log_prob: LogProb) -> bool {
        lm.is_neural() && log_prob <= LZERO
    }

    /// `ln` of the weighted sum, renormalized without defunct components
    fn mix(&self, log_probs: &[LogProb]) -> (LogProb, Vec<bool>) {
        let mut sum = 0.0;
        let mut live_weight = 0.0;
        let mut defunct = Vec::with_capacity(log_probs.len());
        let components = self.components.iter().zip_eq(self.weights.iter());
        for ((lm, &weight), &log_prob) in components.zip_eq(log_probs) {
            let is_defunct = Self::is_defunct(lm, log_prob);
            sum += weight as f64 * unlog_natural(log_prob);
            if !is_defunct {
                live_weight += weight as f64;
            }
            defunct.push(is_defunct);
        }

        if defunct.contains(&true) && live_weight > 0.0 {
            sum /= live_weight;
        }
        (log_natural(sum), defunct)
    }

    pub fn probability(&mut self, context: &Context, word: WordId) -> LogProb {
        let log_probs: Vec<_> = self
            .components
            .iter_mut()
            .map(|lm| lm.probability(context, word))
            .collect();
        self.mix(&log_probs).0
    }

    /// The representative destination is the longest history of a live component,
    /// the first one on ties
    pub fn transition(&mut self, src: &LmState, word: WordId) -> Transition {
        let transitions: Vec<_> = self
            .components
            .iter_mut()
            .enumerate()
            .map(|(i, lm)| lm.transition(src.component(i), word))
            .collect();

        let log_probs: Vec<_> = transitions.iter().map(|t| t.log_prob).collect();
        let (log_prob, defunct) = self.mix(&log_probs);

        let mut representative = 0;
        let mut longest = 0;
        for (i, (t, &is_defunct)) in transitions.iter().zip(&defunct).enumerate() {
            let len = if is_defunct { 0 } else { t.state.history_len() };
            if len > longest {
                longest = len;
                representative = i;
            }
        }

        let components = transitions.into_iter().map(|t| t.state).collect();
        Transition::new(
            log_prob,
            LmState::Mix(MixState {
                components,
                representative,
            }),
        )
    }

    pub fn reset_caches(&mut self) {
        for lm in self.components.iter_mut() {
            lm.reset_caches();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::NeuralConfig,
        model::{BackoffNGram, MatrixBigram},
        neural::{mock::MockFeedForward, FeedForwardLm, FeedForwardScorer},
        vocab::{ShortList, Vocabulary},
    };
    use float_cmp::assert_approx_eq;
    use rstest::{fixture, rstest};

    #[fixture]
    fn vocab() -> Vocabulary {
        ["<s>", "a", "b", "c"].into_iter().collect()
    }

    #[fixture]
    fn ngram() -> BackoffNGram {
        let mut builder = BackoffNGram::builder(2, 4, 10).unwrap();
        for (w, p) in [(1, 0.1f32), (2, 0.4), (3, 0.3), (4, 0.2)] {
            builder.unigram(w, p.ln()).unwrap();
        }
        builder
            .ngram(Context::from_recent(&[2]), 3, 0.6f32.ln())
            .unwrap();
        builder.build().unwrap()
    }

    /// Bigram feed-forward model without `c` in its shortlist
    fn feedforward(vocab: &Vocabulary, config: NeuralConfig) -> FeedForwardLm {
        let (scorer, _) = MockFeedForward::new(3);
        FeedForwardLm::new(
            Box::new(scorer),
            ShortList::identity([1, 2, 3]),
            vocab,
            config.order(2),
        )
        .unwrap()
    }

    #[rstest]
    fn test_defunct_renormalization(vocab: Vocabulary, ngram: BackoffNGram) {
        let mut lm = InterpolatedLm::new(vec![
            (0.7, ngram.into()),
            (0.3, feedforward(&vocab, NeuralConfig::new()).into()),
        ])
        .unwrap();

        // `c` is out of the shortlist, the result is the ngram probability alone
        let lp = lm.probability(&Context::from_recent(&[2]), 4);
        assert_approx_eq!(f32, lp, 0.2f32.ln(), epsilon = 1e-6);
    }

    #[rstest]
    fn test_weighted_sum(vocab: Vocabulary, ngram: BackoffNGram) {
        let mut lm = InterpolatedLm::new(vec![
            (0.7, ngram.into()),
            (0.3, feedforward(&vocab, NeuralConfig::new()).into()),
        ])
        .unwrap();

        // input 1 favors node 1, that is `a`
        let lp = lm.probability(&Context::from_recent(&[2]), 3);
        assert_approx_eq!(f32, lp, (0.7f32 * 0.6 + 0.3 * 0.25).ln(), epsilon = 1e-6);
    }

    /// Next to nothing for the last node
    struct TinyTailScorer;

    impl FeedForwardScorer for TinyTailScorer {
        fn output_size(&self) -> usize {
            3
        }

        fn score_all(&mut self, _inputs: &[u32], out: &mut [f32]) {
            out.copy_from_slice(&[0.5, 0.5, 1.0e-25]);
        }
    }

    #[rstest]
    fn test_tiny_probability_is_not_defunct(vocab: Vocabulary, ngram: BackoffNGram) {
        let nn = FeedForwardLm::new(
            Box::new(TinyTailScorer),
            ShortList::identity([1, 2, 3]),
            &vocab,
            NeuralConfig::new().order(2),
        )
        .unwrap();
        let mut nn = LanguageModel::from(nn);
        let context = Context::from_recent(&[2]);
        let nn_lp = nn.probability(&context, 3);
        assert!(nn_lp > LZERO);
        assert!(!InterpolatedLm::is_defunct(&nn, nn_lp));

        let mut lm = InterpolatedLm::new(vec![(0.7, ngram.into()), (0.3, nn)]).unwrap();
        // plain weighted sum, the neural share is next to nothing
        let lp = lm.probability(&context, 3);
        assert_approx_eq!(f32, lp, (0.7f32 * 0.6).ln(), epsilon = 1e-6);
    }

    #[rstest]
    fn test_representative_state(vocab: Vocabulary, ngram: BackoffNGram) {
        let mut lm = InterpolatedLm::new(vec![
            (0.5, ngram.into()),
            (0.5, feedforward(&vocab, NeuralConfig::new().pad_start_word(true)).into()),
        ])
        .unwrap();

        let first = lm.transition(&LmState::Start, 2);
        let LmState::Mix(mix) = &first.state else {
            panic!("interpolated models return mixed states");
        };
        assert_eq!(mix.components().len(), 2);
        // both have a history of one word, the first wins
        assert_eq!(mix.representative, 0);

        // `c` is defunct in the neural model, the ngram only knows the unigram
        let second = lm.transition(&first.state, 4);
        let LmState::Mix(mix) = &second.state else {
            panic!("interpolated models return mixed states");
        };
        assert_eq!(mix.components()[0], LmState::Start);
        assert_eq!(mix.representative, 0);
        assert_approx_eq!(f32, second.log_prob, 0.2f32.ln(), epsilon = 1e-6);

        let third = lm.transition(&first.state, 3);
        let LmState::Mix(mix) = &third.state else {
            panic!("interpolated models return mixed states");
        };
        assert_eq!(mix.representative, 1);
        assert_eq!(third.state.merge_key(), &mix.components()[1]);
    }

    #[rstest]
    fn test_construction_errors(ngram: BackoffNGram) {
        assert_eq!(
            InterpolatedLm::new(Vec::new()).err(),
            Some(LmError::EmptyInterpolation)
        );

        let ngram = Rc::new(ngram);
        assert_eq!(
            InterpolatedLm::new(vec![(0.0, LanguageModel::Backoff(ngram.clone()))]).err(),
            Some(LmError::InvalidWeight(0.0))
        );

        let bigram = MatrixBigram::new(vec![vec![-1.0; 2]; 2]).unwrap();
        assert_eq!(
            InterpolatedLm::new(vec![
                (0.5, LanguageModel::Backoff(ngram)),
                (0.5, bigram.into()),
            ])
            .err(),
            Some(LmError::VocabularyMismatch {
                expected: 4,
                found: 2
            })
        );
    }

    #[rstest]
    fn test_from_spec_renormalizes(vocab: Vocabulary, ngram: BackoffNGram) {
        let (scorer, _) = MockFeedForward::new(4);
        let shortlist = ShortList::identity([1, 2, 3]).with_oos_node(3);
        let config = NeuralConfig::new().order(2).oos_mode(OosMode::Renormalize);
        let nn = FeedForwardLm::new(Box::new(scorer), shortlist, &vocab, config).unwrap();

        let mut registry = ModelRegistry::new();
        registry.insert("ng", ngram).insert("mlp", nn);
        let spec: InterpolationSpec = serde_json::from_str(
            r#"{"components": [
                {"kind": "NGRAM", "weight": 0.6, "model": "ng"},
                {"kind": "MLP", "weight": 0.4, "model": "mlp"}
            ]}"#,
        )
        .unwrap();
        let mut lm = InterpolatedLm::from_spec(&spec, &mut registry).unwrap();
        assert_eq!(lm.weights(), &[0.6, 0.4]);
        assert_eq!(lm.components()[1].kind(), LmKind::FeedForward);
        assert_eq!(lm.vocab_size(), 4);

        // `c` is the only out-of-shortlist word, it gets the whole node mass
        let lp = lm.probability(&Context::from_recent(&[2]), 4);
        assert_approx_eq!(
            f32,
            lp,
            (0.6f32 * 0.2 + 0.4 * (0.5 / 3.0)).ln(),
            epsilon = 1e-6
        );
    }

    #[rstest]
    #[case("NGRAM", "mb", LmError::KindMismatch { name: "mb".into(), declared: LmKind::Backoff, actual: LmKind::MatrixBigram })]
    #[case("LSTM", "mb", LmError::UnknownModelType("LSTM".into()))]
    #[case("MATBIGRAM", "missing", LmError::UnknownModel("missing".into()))]
    fn test_from_spec_errors(#[case] kind: &str, #[case] model: &str, #[case] expected: LmError) {
        let mut registry = ModelRegistry::new();
        registry.insert("mb", MatrixBigram::new(vec![vec![-1.0; 2]; 2]).unwrap());
        let spec = InterpolationSpec {
            components: vec![ComponentSpec {
                kind: kind.into(),
                weight: 1.0,
                model: model.into(),
            }],
        };
        assert_eq!(
            InterpolatedLm::from_spec(&spec, &mut registry).err(),
            Some(expected)
        );
    }

    #[rstest]
    fn test_missing_companion(vocab: Vocabulary) {
        let (scorer, _) = MockFeedForward::new(4);
        let shortlist = ShortList::identity([1, 2, 3]).with_oos_node(3);
        let config = NeuralConfig::new()
            .order(2)
            .oos_mode(OosMode::Renormalize);
        let nn = FeedForwardLm::new(Box::new(scorer), shortlist, &vocab, config).unwrap();

        let mut registry = ModelRegistry::new();
        registry
            .insert("mlp", nn)
            .insert("mb", MatrixBigram::new(vec![vec![-1.0; 4]; 4]).unwrap());
        let spec = InterpolationSpec {
            components: vec![
                ComponentSpec {
                    kind: "MLP".into(),
                    weight: 0.5,
                    model: "mlp".into(),
                },
                ComponentSpec {
                    kind: "MATBIGRAM".into(),
                    weight: 0.5,
                    model: "mb".into(),
                },
            ],
        };
        assert_eq!(
            InterpolatedLm::from_spec(&spec, &mut registry).err(),
            Some(LmError::MissingCompanion)
        );
    }
}
