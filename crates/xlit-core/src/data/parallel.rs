//! Parallel corpus reader. Line `i` of the source file and line `i` of the
//! target file always travel together.

use std::path::Path;

use crate::data::corpus::read_monolingual_corpus;
use crate::error::{Result, XlitError};
use crate::lang::LangPair;
use crate::mapping::Mapping;
use crate::sequence::SequenceBatch;

#[derive(Debug, Clone)]
pub struct ParallelDataReader {
    pair: LangPair,
    source: SequenceBatch,
    target: SequenceBatch,
    cursor: usize,
}

impl ParallelDataReader {
    pub fn new(
        pair: LangPair,
        source_path: &Path,
        target_path: &Path,
        source_mapping: &Mapping,
        target_mapping: &Mapping,
        max_len: usize,
    ) -> Result<Self> {
        let source = read_monolingual_corpus(source_path)?;
        let target = read_monolingual_corpus(target_path)?;
        if source.is_empty() {
            return Err(XlitError::EmptyCorpus(source_path.to_path_buf()));
        }
        Self::from_words(pair, &source, &target, source_mapping, target_mapping, max_len)
    }

    pub fn from_words<S: AsRef<str>>(
        pair: LangPair,
        source: &[Vec<S>],
        target: &[Vec<S>],
        source_mapping: &Mapping,
        target_mapping: &Mapping,
        max_len: usize,
    ) -> Result<Self> {
        if source.len() != target.len() {
            return Err(XlitError::ParallelLengthMismatch {
                source_lines: source.len(),
                target_lines: target.len(),
            });
        }
        if source.is_empty() {
            return Err(XlitError::EmptyCorpus(pair.to_string().into()));
        }
        Ok(Self {
            source: SequenceBatch::encode_words(source, source_mapping, max_len)?,
            target: SequenceBatch::encode_words(target, target_mapping, max_len)?,
            pair,
            cursor: 0,
        })
    }

    pub fn pair(&self) -> &LangPair {
        &self.pair
    }

    /// Number of aligned pairs.
    pub fn num_words(&self) -> usize {
        self.source.len()
    }

    /// The next aligned `(source, target)` batches, wrapping past the end.
    pub fn get_next_batch(&mut self, batch_size: usize) -> (SequenceBatch, SequenceBatch) {
        let count = batch_size.min(self.num_words());
        let batch = (
            self.source.take_wrapping(self.cursor, count),
            self.target.take_wrapping(self.cursor, count),
        );
        self.cursor = (self.cursor + count) % self.num_words();
        batch
    }

    /// Both sides of the whole corpus.
    pub fn get_data(&self) -> (&SequenceBatch, &SequenceBatch) {
        (&self.source, &self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Lang;

    fn mappings() -> (Mapping, Mapping) {
        let mut hi = Mapping::new("hi");
        hi.register_all(["a", "b", "c"]);
        let mut kn = Mapping::new("kn");
        kn.register_all(["x", "y", "z"]);
        (hi, kn)
    }

    fn pair() -> LangPair {
        LangPair::new(Lang::new("hi"), Lang::new("kn"))
    }

    #[test]
    fn batches_stay_aligned() {
        let (hi, kn) = mappings();
        let source = vec![vec!["a"], vec!["b"], vec!["c"]];
        let target = vec![vec!["x"], vec!["y"], vec!["z"]];
        let mut reader =
            ParallelDataReader::from_words(pair(), &source, &target, &hi, &kn, 3).unwrap();

        for _ in 0..5 {
            let (src, tgt) = reader.get_next_batch(2);
            assert_eq!(src.len(), tgt.len());
            for (s, t) in src.sequences().iter().zip(tgt.sequences()) {
                let s_tok = hi.get_char(s.ids()[0]).unwrap();
                let t_tok = kn.get_char(t.ids()[0]).unwrap();
                let expected = match s_tok {
                    "a" => "x",
                    "b" => "y",
                    _ => "z",
                };
                assert_eq!(t_tok, expected);
            }
        }
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let (hi, kn) = mappings();
        let source = vec![vec!["a"], vec!["b"]];
        let target = vec![vec!["x"]];
        assert!(matches!(
            ParallelDataReader::from_words(pair(), &source, &target, &hi, &kn, 3),
            Err(XlitError::ParallelLengthMismatch {
                source_lines: 2,
                target_lines: 1
            })
        ));
    }

    #[test]
    fn characters_are_looked_up_per_side() {
        let (hi, kn) = mappings();
        let source = vec![vec!["x"]];
        let target = vec![vec!["a"]];
        assert!(ParallelDataReader::from_words(pair(), &source, &target, &hi, &kn, 3).is_err());
    }
}
