use super::{CacheStats, OosStrategy};
use crate::{
    context::{log_natural, unlog_natural, Context, LogProb, LZERO},
    model::BackoffNGram,
    store::{ContextEntry, ContextStore, EntryId, CACHE_EXPECTED_ENTRIES},
    vocab::{OutputClass, ShortList},
};

/// Output distributions of a neural model by history.
///
/// An entry is complete once it holds one successor per output node.
/// The back-off weight memoises the out-of-shortlist normalizer, `NaN` until computed.
#[derive(Debug)]
pub(crate) struct NeuralCache {
    store: ContextStore,
    output_size: usize,
    capacity_bytes: usize,
    stats: CacheStats,
    row: Vec<LogProb>,
}

impl NeuralCache {
    pub(crate) fn new(context_len: usize, output_size: usize, capacity_bytes: usize) -> Self {
        Self {
            store: ContextStore::new(context_len, CACHE_EXPECTED_ENTRIES),
            output_size,
            capacity_bytes,
            stats: CacheStats::default(),
            row: Vec::with_capacity(output_size),
        }
    }

    #[inline]
    pub(crate) fn stats(&self) -> CacheStats {
        self.stats
    }

    #[inline]
    pub(crate) fn entry(&self, id: EntryId) -> Option<&ContextEntry> {
        self.store.entry(id)
    }

    /// Complete entry of `context`
    pub(crate) fn find(&self, context: Context) -> Option<EntryId> {
        self.store.find(context).filter(|&id| {
            self.store
                .entry(id)
                .is_some_and(|e| e.successor_count() == self.output_size)
        })
    }

    /// Complete entry of `context`, counted as a hit or a miss
    pub(crate) fn lookup(&mut self, context: Context) -> Option<EntryId> {
        let found = self.find(context);
        match found {
            Some(_) => self.stats.hits += 1,
            None => self.stats.misses += 1,
        }
        found
    }

    #[inline]
    pub(crate) fn record_scorer_call(&mut self) {
        self.stats.scorer_calls += 1;
    }

    /// Drops every entry once the allocated bytes exceed the capacity
    pub(crate) fn flush_if_full(&mut self) -> bool {
        if self.store.allocated_bytes() <= self.capacity_bytes {
            return false;
        }

        tracing::debug!(
            "Neural LM cache flushed: {} entries, {} bytes",
            self.store.len(),
            self.store.allocated_bytes()
        );
        self.store.reset();
        self.stats.flushes += 1;
        true
    }

    /// Stores the linear probabilities of every output node for `context`
    pub(crate) fn insert(
        &mut self,
        context: Context,
        probs: &[f32],
        vectors: Option<(&[f32], &[f32])>,
    ) -> EntryId {
        debug_assert_eq!(probs.len(), self.output_size);

        self.row.clear();
        self.row
            .extend(probs.iter().map(|&p| log_natural(p as f64)));

        let id = self.store.get_or_create(context);
        self.store.set_dense_successors(id, &self.row);
        self.store.set_backoff_weight(id, LogProb::NAN);
        if let Some((current, future)) = vectors {
            self.store.set_vectors(id, current, Some(future));
        }
        tracing::trace!("Cached {} outputs of {context:?}", probs.len());
        id
    }

    #[inline]
    fn node_log_prob(&self, id: EntryId, node: u32) -> LogProb {
        self.store
            .entry(id)
            .and_then(|e| e.successor(node))
            .unwrap_or(LZERO)
    }

    /// `ln sum P_ng(w | context)` over out-of-shortlist words, computed once per entry
    fn oos_normalizer(
        &mut self,
        id: EntryId,
        context: &Context,
        ngram: &BackoffNGram,
        shortlist: &ShortList,
    ) -> LogProb {
        let memo = self
            .store
            .entry(id)
            .map_or(LogProb::NAN, ContextEntry::backoff_weight);
        if !memo.is_nan() {
            return memo;
        }

        let sum: f64 = (1..=ngram.vocab_size() as u32)
            .filter(|&w| shortlist.output_class(w) == OutputClass::OutOfShortlist)
            .map(|w| unlog_natural(ngram.probability(context, w)))
            .sum();
        let normalizer = if sum > 0.0 {
            sum.ln() as LogProb
        } else {
            LZERO
        };

        self.store.set_backoff_weight(id, normalizer);
        normalizer
    }

    /// `ln P(word | context)` read from the complete entry `id`
    pub(crate) fn log_prob(
        &mut self,
        id: EntryId,
        context: &Context,
        word: u32,
        shortlist: &ShortList,
        oos: &OosStrategy,
    ) -> LogProb {
        match shortlist.output_class(word) {
            OutputClass::Shortlist(node) => self.node_log_prob(id, node),
            OutputClass::OutOfShortlist => {
                let (OosStrategy::Renormalize(ngram), Some(node)) = (oos, shortlist.oos_node())
                else {
                    return LZERO;
                };

                let normalizer = self.oos_normalizer(id, context, ngram, shortlist);
                if normalizer <= LZERO {
                    return LZERO;
                }
                self.node_log_prob(id, node) + ngram.probability(context, word) - normalizer
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.store.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use ::std::rc::Rc;

    #[test]
    fn test_complete_entries_only() {
        let mut cache = NeuralCache::new(1, 3, usize::MAX);
        let context = Context::from_recent(&[1]);
        assert_eq!(cache.lookup(context), None);

        let id = cache.insert(context, &[0.5, 0.25, 0.25], None);
        assert_eq!(cache.lookup(context), Some(id));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                ..Default::default()
            }
        );

        let shortlist = ShortList::identity([1, 2, 3]);
        assert_approx_eq!(
            f32,
            cache.log_prob(id, &context, 1, &shortlist, &OosStrategy::Floor),
            0.5f32.ln()
        );
        assert_eq!(
            cache.log_prob(id, &context, 7, &shortlist, &OosStrategy::Floor),
            LZERO
        );
    }

    #[test]
    fn test_flush_over_capacity() {
        let mut cache = NeuralCache::new(1, 2, 0);
        assert!(!cache.flush_if_full());
        let id = cache.insert(Context::from_recent(&[1]), &[0.5, 0.5], None);
        assert!(cache.flush_if_full());
        assert!(cache.entry(id).is_none());
        assert_eq!(cache.stats().flushes, 1);
    }

    #[test]
    fn test_oos_renormalization() {
        // words 1 and 2 are in the shortlist, 3 and 4 share node 2
        let shortlist = ShortList::identity([1, 2]).with_oos_node(2);
        let mut builder = BackoffNGram::builder(2, 4, 10).unwrap();
        for (w, p) in [(1, 0.4f32), (2, 0.3), (3, 0.2), (4, 0.1)] {
            builder.unigram(w, p.ln()).unwrap();
        }
        let ngram = Rc::new(builder.build().unwrap());
        let oos = OosStrategy::Renormalize(ngram);

        let mut cache = NeuralCache::new(1, 3, usize::MAX);
        let context = Context::from_recent(&[1]);
        let id = cache.insert(context, &[0.3, 0.3, 0.4], None);

        let lp = cache.log_prob(id, &context, 3, &shortlist, &oos);
        assert_approx_eq!(f32, lp, (0.4f32 * 0.2 / 0.3).ln(), epsilon = 1e-5);
        assert_approx_eq!(
            f32,
            cache.entry(id).unwrap().backoff_weight(),
            0.3f32.ln(),
            epsilon = 1e-5
        );

        let lp = cache.log_prob(id, &context, 4, &shortlist, &oos);
        assert_approx_eq!(f32, lp, (0.4f32 * 0.1 / 0.3).ln(), epsilon = 1e-5);
        assert_eq!(
            cache.log_prob(id, &context, 4, &shortlist, &OosStrategy::Floor),
            LZERO
        );
    }
}
