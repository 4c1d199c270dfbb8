//! # Padded Sequences
//!
//! Fixed-length id sequences with an explicit length. The mask is derived
//! from the length, so `mask[i] == 1.0` iff `i < length` always holds.

use crate::error::{Result, XlitError};
use crate::mapping::{EOW_ID, Mapping, PAD_ID};

/// One padded sequence of token ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    ids: Vec<u32>,
    length: usize,
}

impl Sequence {
    /// Encode a word as `tokens + EOW`, padded with `PAD` to `max_len`.
    ///
    /// Words with more than `max_len - 1` tokens are truncated but still end
    /// in `EOW`.
    pub fn encode<S: AsRef<str>>(tokens: &[S], mapping: &Mapping, max_len: usize) -> Result<Self> {
        if max_len == 0 {
            return Err(XlitError::InvalidArgument(
                "max sequence length must be positive".into(),
            ));
        }
        let kept = tokens.len().min(max_len - 1);
        let mut ids = Vec::with_capacity(max_len);
        for token in &tokens[..kept] {
            ids.push(mapping.get_index(token.as_ref())?);
        }
        ids.push(EOW_ID);
        let length = ids.len();
        ids.resize(max_len, PAD_ID);
        Ok(Self { ids, length })
    }

    /// Build a sequence from raw ids, padding to `max_len`.
    pub fn from_ids(mut ids: Vec<u32>, max_len: usize) -> Result<Self> {
        if ids.len() > max_len {
            return Err(XlitError::InvalidArgument(format!(
                "{} ids do not fit in a sequence of length {max_len}",
                ids.len()
            )));
        }
        let length = ids.len();
        ids.resize(max_len, PAD_ID);
        Ok(Self { ids, length })
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Number of valid positions.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn max_len(&self) -> usize {
        self.ids.len()
    }

    pub fn mask(&self) -> Vec<f32> {
        (0..self.ids.len())
            .map(|i| if i < self.length { 1.0 } else { 0.0 })
            .collect()
    }

    /// Shift right by one and put `marker` first. The last position falls off
    /// when the sequence is already full.
    pub fn prefixed(&self, marker: u32) -> Self {
        let max_len = self.ids.len();
        if max_len == 0 {
            return self.clone();
        }
        let mut ids = Vec::with_capacity(max_len);
        ids.push(marker);
        ids.extend_from_slice(&self.ids[..max_len - 1]);
        Self {
            ids,
            length: (self.length + 1).min(max_len),
        }
    }
}

/// An ordered batch of sequences sharing one `max_len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceBatch {
    max_len: usize,
    sequences: Vec<Sequence>,
}

impl SequenceBatch {
    pub fn new(max_len: usize, sequences: Vec<Sequence>) -> Result<Self> {
        if let Some(bad) = sequences.iter().find(|s| s.max_len() != max_len) {
            return Err(XlitError::InvalidArgument(format!(
                "sequence of length {} in a batch of length {max_len}",
                bad.max_len()
            )));
        }
        Ok(Self { max_len, sequences })
    }

    /// Encode every word with `mapping`.
    pub fn encode_words<S: AsRef<str>>(
        words: &[Vec<S>],
        mapping: &Mapping,
        max_len: usize,
    ) -> Result<Self> {
        let sequences = words
            .iter()
            .map(|word| Sequence::encode(word, mapping, max_len))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { max_len, sequences })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.sequences.iter().map(Sequence::length).collect()
    }

    pub fn masks(&self) -> Vec<Vec<f32>> {
        self.sequences.iter().map(Sequence::mask).collect()
    }

    /// Row-major ids, `len() * max_len()` entries.
    pub fn flat_ids(&self) -> Vec<u32> {
        self.sequences
            .iter()
            .flat_map(|s| s.ids().iter().copied())
            .collect()
    }

    /// Row-major mask, `len() * max_len()` entries.
    pub fn flat_mask(&self) -> Vec<f32> {
        self.sequences.iter().flat_map(|s| s.mask()).collect()
    }

    /// Sequences `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            max_len: self.max_len,
            sequences: self.sequences[start..end].to_vec(),
        }
    }

    /// `count` sequences starting at `start`, wrapping around to the front.
    pub fn take_wrapping(&self, start: usize, count: usize) -> Self {
        let n = self.sequences.len();
        let sequences = if n == 0 {
            Vec::new()
        } else {
            (0..count)
                .map(|offset| self.sequences[(start + offset) % n].clone())
                .collect()
        };
        Self {
            max_len: self.max_len,
            sequences,
        }
    }

    /// Prefix every sequence with `marker`.
    pub fn prefixed(&self, marker: u32) -> Self {
        Self {
            max_len: self.max_len,
            sequences: self.sequences.iter().map(|s| s.prefixed(marker)).collect(),
        }
    }

    /// Prefix every sequence with `token`, which must be registered in `mapping`.
    pub fn prefixed_with_token(&self, token: &str, mapping: &Mapping) -> Result<Self> {
        Ok(self.prefixed(mapping.get_index(token)?))
    }
}
