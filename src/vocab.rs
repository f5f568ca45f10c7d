use crate::context::WordId;
use ahash::AHashMap;
use compact_str::CompactString;
use rustc_hash::FxHashMap;

pub const SENTENCE_START: &str = "<s>";
pub const SENTENCE_END: &str = "</s>";

/// Symbol table shared by all models of one rescoring run
#[derive(Clone, Debug, Default)]
pub struct Vocabulary {
    words: Vec<CompactString>,
    ids: AHashMap<CompactString, WordId>,
}

impl Vocabulary {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing id if the symbol is already known
    pub fn insert(&mut self, symbol: &str) -> WordId {
        if let Some(&id) = self.ids.get(symbol) {
            return id;
        }
        let symbol = CompactString::from(symbol);
        self.words.push(symbol.clone());
        let id = self.words.len() as WordId;
        self.ids.insert(symbol, id);
        id
    }

    #[inline]
    pub fn id(&self, symbol: &str) -> Option<WordId> {
        self.ids.get(symbol).copied()
    }

    #[inline]
    pub fn symbol(&self, id: WordId) -> Option<&str> {
        let index = (id as usize).checked_sub(1)?;
        self.words.get(index).map(CompactString::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    pub fn sentence_start(&self) -> Option<WordId> {
        self.id(SENTENCE_START)
    }

    pub fn ids(&self) -> impl Iterator<Item = WordId> {
        1..=self.words.len() as WordId
    }
}

impl<'a> FromIterator<&'a str> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut vocab = Self::new();
        for symbol in iter {
            vocab.insert(symbol);
        }
        vocab
    }
}

/// Output class of a word in a neural LM
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputClass {
    Shortlist(u32),
    OutOfShortlist,
}

/// Neural LM input and output layer maps
#[derive(Clone, Debug, Default)]
pub struct ShortList {
    input: FxHashMap<WordId, u32>,
    output: FxHashMap<WordId, u32>,
    input_unknown: u32,
    output_size: usize,
    oos_node: Option<u32>,
}

impl ShortList {
    /// `input_unknown` is the input node of words missing in `input`
    pub fn new(
        input: impl IntoIterator<Item = (WordId, u32)>,
        output: impl IntoIterator<Item = (WordId, u32)>,
        input_unknown: u32,
    ) -> Self {
        let output: FxHashMap<_, _> = output.into_iter().collect();
        let output_size = output.values().map(|&i| i as usize + 1).max().unwrap_or(0);
        Self {
            input: input.into_iter().collect(),
            output,
            input_unknown,
            output_size,
            oos_node: None,
        }
    }

    /// Same index for input and output, `0..words.len()`
    pub fn identity(words: impl IntoIterator<Item = WordId>) -> Self {
        let pairs: Vec<_> = words
            .into_iter()
            .enumerate()
            .map(|(i, w)| (w, i as u32))
            .collect();
        let input_unknown = pairs.len() as u32;
        Self::new(pairs.iter().copied(), pairs.iter().copied(), input_unknown)
    }

    /// Extra output node collecting the mass of all out-of-shortlist words
    pub fn with_oos_node(mut self, node: u32) -> Self {
        self.output_size = self.output_size.max(node as usize + 1);
        self.oos_node = Some(node);
        self
    }

    #[inline]
    pub fn input_index(&self, word: WordId) -> u32 {
        self.input.get(&word).copied().unwrap_or(self.input_unknown)
    }

    #[inline]
    pub fn output_class(&self, word: WordId) -> OutputClass {
        match self.output.get(&word) {
            Some(&i) => OutputClass::Shortlist(i),
            None => OutputClass::OutOfShortlist,
        }
    }

    #[inline]
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    #[inline]
    pub fn oos_node(&self) -> Option<u32> {
        self.oos_node
    }
}
