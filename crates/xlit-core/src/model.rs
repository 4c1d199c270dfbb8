//! # Sequence Model Capability
//!
//! The training orchestrator and the decoding driver only talk to a model
//! through [`SequenceModel`]. Tasks are what the scheduler iterates over;
//! objectives are what a single parameter update optimizes.

use std::fmt;
use std::path::Path;

use crate::beam::BeamSearch;
use crate::error::Result;
use crate::lang::{Lang, LangPair};
use crate::sequence::SequenceBatch;

/// A unit of round-robin scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Task {
    /// Reconstruction over a monolingual corpus.
    Mono { lang: Lang },
    /// The three objectives over a parallel corpus.
    Parallel { pair: LangPair },
}

impl Task {
    /// Objectives updated, in order, for one minibatch of this task.
    pub fn objectives(&self) -> Vec<Objective> {
        match self {
            Task::Mono { lang } => vec![Objective::Reconstruct { lang: lang.clone() }],
            Task::Parallel { pair } => vec![
                Objective::Transliterate {
                    src: pair.first.clone(),
                    tgt: pair.second.clone(),
                },
                Objective::Transliterate {
                    src: pair.second.clone(),
                    tgt: pair.first.clone(),
                },
                Objective::Align {
                    lang1: pair.first.clone(),
                    lang2: pair.second.clone(),
                },
            ],
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Mono { lang } => write!(f, "mono:{lang}"),
            Task::Parallel { pair } => write!(f, "parallel:{pair}"),
        }
    }
}

/// A single trainable loss.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Objective {
    /// Encode and decode the same language.
    Reconstruct { lang: Lang },
    /// Encode `src`, decode `tgt`.
    Transliterate { src: Lang, tgt: Lang },
    /// Pull the encoder representations of aligned words together.
    Align { lang1: Lang, lang2: Lang },
}

impl Objective {
    /// Language of `ObjectiveBatch::input`.
    pub fn input_lang(&self) -> &Lang {
        match self {
            Objective::Reconstruct { lang } => lang,
            Objective::Transliterate { src, .. } => src,
            Objective::Align { lang1, .. } => lang1,
        }
    }

    /// Language of `ObjectiveBatch::output`.
    pub fn output_lang(&self) -> &Lang {
        match self {
            Objective::Reconstruct { lang } => lang,
            Objective::Transliterate { tgt, .. } => tgt,
            Objective::Align { lang2, .. } => lang2,
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::Reconstruct { lang } => write!(f, "reconstruct:{lang}"),
            Objective::Transliterate { src, tgt } => write!(f, "transliterate:{src}-{tgt}"),
            Objective::Align { lang1, lang2 } => write!(f, "align:{lang1}-{lang2}"),
        }
    }
}

/// Input and output sides of one objective's minibatch.
#[derive(Debug, Clone, Copy)]
pub struct ObjectiveBatch<'a> {
    pub input: &'a SequenceBatch,
    pub output: &'a SequenceBatch,
}

impl<'a> ObjectiveBatch<'a> {
    /// Reconstruction batch: input and output are the same sequences.
    pub fn mono(batch: &'a SequenceBatch) -> Self {
        Self {
            input: batch,
            output: batch,
        }
    }

    pub fn parallel(input: &'a SequenceBatch, output: &'a SequenceBatch) -> Self {
        Self { input, output }
    }
}

/// A decoded candidate: output ids without `GO`/`EOW`, and its raw
/// cumulative log-probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub tokens: Vec<u32>,
    pub score: f32,
}

/// What the orchestration core needs from a trainable sequence model.
pub trait SequenceModel {
    /// Loss of `objective` on `batch`, without updating parameters.
    fn compute_loss(&self, objective: &Objective, batch: ObjectiveBatch<'_>) -> Result<f32>;

    /// One optimizer step on `objective` for `batch`.
    fn apply_update(&mut self, objective: &Objective, batch: ObjectiveBatch<'_>) -> Result<()>;

    /// Top-N hypotheses per input sequence, best first.
    fn beam_decode(
        &self,
        src: &Lang,
        tgt: &Lang,
        batch: &SequenceBatch,
        search: &BeamSearch,
    ) -> Result<Vec<Vec<Hypothesis>>>;

    /// Write all parameters to `path`.
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace all parameters with the ones stored at `path`.
    fn load(&mut self, path: &Path) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_task_expands_to_three_objectives() {
        let pair: LangPair = "hi-kn".parse().unwrap();
        let objectives = Task::Parallel { pair }.objectives();
        let names: Vec<String> = objectives.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec!["transliterate:hi-kn", "transliterate:kn-hi", "align:hi-kn"]
        );
        assert_eq!(objectives[1].input_lang().as_str(), "kn");
        assert_eq!(objectives[1].output_lang().as_str(), "hi");
    }

    #[test]
    fn mono_task_reconstructs() {
        let objectives = Task::Mono {
            lang: Lang::new("hi"),
        }
        .objectives();
        assert_eq!(
            objectives,
            vec![Objective::Reconstruct {
                lang: Lang::new("hi")
            }]
        );
    }
}
