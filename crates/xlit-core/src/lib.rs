//! # xlit Core
//!
//! Building blocks for character-level multi-task transliteration: per-language
//! vocabularies, padded sequence batches, corpus readers, the model capability
//! trait the trainer drives, beam search, and n-best list tooling.
//!
//! ## Quick Start
//!
//! ```rust
//! use xlit_core::beam::{BeamSearch, FnScorer};
//! use xlit_core::mapping::{EOW_ID, Mapping};
//!
//! let mut mapping = Mapping::new("hi");
//! let a = mapping.register("a");
//!
//! // A scorer that always prefers `a`, then ends the word.
//! let scorer = FnScorer(move |_, prefix: &[u32]| {
//!     let mut log_probs = vec![f32::NEG_INFINITY; mapping.vocab_size()];
//!     let next = if prefix.len() < 3 { a } else { EOW_ID };
//!     log_probs[next as usize] = 0.0;
//!     log_probs
//! });
//!
//! let hyps = BeamSearch::greedy(10).search(&scorer, 0).unwrap();
//! assert_eq!(hyps[0].tokens, vec![a, a]);
//! ```
pub mod beam;
pub mod data;
pub mod error;
pub mod lang;
pub mod logscan;
pub mod mapping;
pub mod model;
pub mod nbest;
pub mod sequence;

// Re-export primary API
pub use beam::{BeamSearch, FnScorer, StepScorer};
pub use data::{MonoDataReader, ParallelDataReader};
pub use error::{Result, XlitError};
pub use lang::{Lang, LangPair};
pub use mapping::{Mapping, Representation, SharedMappingClass, Vocabularies};
pub use model::{Hypothesis, Objective, ObjectiveBatch, SequenceModel, Task};
pub use nbest::NbestRecord;
pub use sequence::{Sequence, SequenceBatch};
