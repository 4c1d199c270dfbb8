//! Monolingual corpus reader with wrapping batch iteration.

use std::path::Path;

use crate::data::corpus::read_monolingual_corpus;
use crate::error::{Result, XlitError};
use crate::lang::Lang;
use crate::mapping::Mapping;
use crate::sequence::SequenceBatch;

/// An encoded monolingual corpus.
#[derive(Debug, Clone)]
pub struct MonoDataReader {
    lang: Lang,
    data: SequenceBatch,
    cursor: usize,
}

impl MonoDataReader {
    /// Read and encode `path` with `mapping`. Every token must already be in
    /// the mapping.
    pub fn new(lang: Lang, path: &Path, mapping: &Mapping, max_len: usize) -> Result<Self> {
        let words = read_monolingual_corpus(path)?;
        if words.is_empty() {
            return Err(XlitError::EmptyCorpus(path.to_path_buf()));
        }
        Self::from_words(lang, &words, mapping, max_len)
    }

    pub fn from_words<S: AsRef<str>>(
        lang: Lang,
        words: &[Vec<S>],
        mapping: &Mapping,
        max_len: usize,
    ) -> Result<Self> {
        if words.is_empty() {
            return Err(XlitError::EmptyCorpus(lang.as_str().into()));
        }
        Ok(Self {
            lang,
            data: SequenceBatch::encode_words(words, mapping, max_len)?,
            cursor: 0,
        })
    }

    pub fn lang(&self) -> &Lang {
        &self.lang
    }

    /// Corpus size.
    pub fn num_words(&self) -> usize {
        self.data.len()
    }

    /// The next `min(batch_size, num_words)` sequences, wrapping past the end.
    pub fn get_next_batch(&mut self, batch_size: usize) -> SequenceBatch {
        let count = batch_size.min(self.num_words());
        let batch = self.data.take_wrapping(self.cursor, count);
        self.cursor = (self.cursor + count) % self.num_words();
        batch
    }

    /// The whole corpus in file order.
    pub fn get_data(&self) -> &SequenceBatch {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader() -> MonoDataReader {
        let mut mapping = Mapping::new("hi");
        mapping.register_all(["a", "b", "c", "d", "e"]);
        let words: Vec<Vec<&str>> = ["a", "b", "c", "d", "e"].iter().map(|w| vec![*w]).collect();
        MonoDataReader::from_words(Lang::new("hi"), &words, &mapping, 4).unwrap()
    }

    fn first_ids(batch: &SequenceBatch) -> Vec<u32> {
        batch.sequences().iter().map(|s| s.ids()[0]).collect()
    }

    #[test]
    fn batches_wrap_around() {
        let mut reader = reader();
        assert_eq!(reader.num_words(), 5);
        assert_eq!(first_ids(&reader.get_next_batch(2)), vec![3, 4]);
        assert_eq!(first_ids(&reader.get_next_batch(2)), vec![5, 6]);
        assert_eq!(first_ids(&reader.get_next_batch(2)), vec![7, 3]);
        assert_eq!(first_ids(&reader.get_next_batch(2)), vec![4, 5]);
    }

    #[test]
    fn batch_never_exceeds_corpus() {
        let mut reader = reader();
        assert_eq!(reader.get_next_batch(64).len(), 5);
        assert_eq!(reader.get_data().len(), 5);
    }

    #[test]
    fn empty_corpus_is_rejected() {
        let mapping = Mapping::new("hi");
        let words: Vec<Vec<&str>> = Vec::new();
        assert!(matches!(
            MonoDataReader::from_words(Lang::new("hi"), &words, &mapping, 4),
            Err(XlitError::EmptyCorpus(_))
        ));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hi");
        std::fs::write(&path, "a b\nc\n").unwrap();
        let mut mapping = Mapping::new("hi");
        mapping.register_all(["a", "b", "c"]);
        let reader = MonoDataReader::new(Lang::new("hi"), &path, &mapping, 5).unwrap();
        assert_eq!(reader.get_data().lengths(), vec![3, 2]);
    }
}
