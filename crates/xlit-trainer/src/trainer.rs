//! # Training Orchestrator
//!
//! Round-robin multi-task training: every step runs one minibatch update for
//! each task in order. When every task has seen its whole corpus the epoch is
//! complete, the held-out parallel pairs are scored, and the early-stopping,
//! checkpointing and periodic-inference rules run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tracing::{debug, info, warn};
use xlit_core::beam::BeamSearch;
use xlit_core::data::{
    MonoDataReader, ParallelDataReader, read_monolingual_corpus, write_monolingual_corpus,
};
use xlit_core::lang::{Lang, LangPair};
use xlit_core::mapping::Vocabularies;
use xlit_core::model::{Objective, ObjectiveBatch, SequenceModel, Task};
use xlit_core::sequence::SequenceBatch;

use crate::checkpoint::{CheckpointStore, save_final};
use crate::config::TrainConfig;
use crate::state::TrainingState;

/// Directories of one training run.
#[derive(Debug, Clone)]
pub struct RunLayout {
    pub root: PathBuf,
    pub temp_models: PathBuf,
    pub outputs: PathBuf,
    pub final_output: PathBuf,
    pub mappings: PathBuf,
}

impl RunLayout {
    /// Create the run directory tree under `root`.
    pub fn create(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        let layout = Self {
            temp_models: root.join("temp_models"),
            outputs: root.join("outputs"),
            final_output: root.join("final_output"),
            mappings: root.join("mappings"),
            root,
        };
        for dir in [
            &layout.temp_models,
            &layout.outputs,
            &layout.final_output,
            &layout.mappings,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(layout)
    }

    pub fn run_config(&self) -> PathBuf {
        self.root.join("run_config.json")
    }
}

/// Every encoded corpus of a run.
pub struct TrainingData {
    pub mono: Vec<MonoDataReader>,
    pub parallel: Vec<ParallelDataReader>,
    pub valid: Vec<ParallelDataReader>,
    pub test: Vec<(LangPair, MonoDataReader)>,
}

impl TrainingData {
    /// Read every corpus named by `config`, build the vocabularies from them
    /// and encode.
    pub fn load(config: &TrainConfig) -> anyhow::Result<(Vocabularies, Self)> {
        let mut vocab = Vocabularies::new(config.representation_scheme()?, config.shared_class()?);
        let max_len = config.model.max_seq_len;

        let mut mono_words = Vec::new();
        for lang in &config.mono_langs {
            let path = config.mono_path(lang);
            let words = read_corpus(&path)?;
            register_words(&mut vocab, lang, &words)?;
            mono_words.push((lang.clone(), path, words));
        }

        let mut parallel_words = Vec::new();
        for pair in &config.parallel_train_langs {
            let paths = config.parallel_train_paths(pair);
            parallel_words.push(read_parallel(&mut vocab, pair, paths)?);
        }
        let mut valid_words = Vec::new();
        for pair in &config.parallel_valid_langs {
            let paths = config.parallel_valid_paths(pair);
            valid_words.push(read_parallel(&mut vocab, pair, paths)?);
        }

        let mut test_words = Vec::new();
        for pair in &config.test_langs {
            let path = config.test_path(pair);
            let words = read_corpus(&path)?;
            register_words(&mut vocab, &pair.first, &words)?;
            test_words.push((pair.clone(), path, words));
        }

        if config.prefix_srclang || config.prefix_tgtlang {
            let langs = config.languages();
            for lang in &langs {
                let mapping = vocab.get_mut(lang)?;
                for marker in &langs {
                    mapping.register(&marker.marker_token());
                }
            }
        }

        let mono = mono_words
            .into_iter()
            .map(|(lang, path, words)| {
                let mapping = vocab.get(&lang)?;
                MonoDataReader::from_words(lang, &words, mapping, max_len)
                    .with_context(|| format!("Failed to encode {}", path.display()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let parallel = encode_parallel(&vocab, parallel_words, max_len)?;
        let valid = encode_parallel(&vocab, valid_words, max_len)?;
        let test = test_words
            .into_iter()
            .map(|(pair, path, words)| {
                let mapping = vocab.get(&pair.first)?;
                let reader =
                    MonoDataReader::from_words(pair.first.clone(), &words, mapping, max_len)
                        .with_context(|| format!("Failed to encode {}", path.display()))?;
                Ok((pair, reader))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        for lang in vocab.languages() {
            info!("Vocabulary size {}: {}", lang, vocab.get(lang)?.vocab_size());
        }

        Ok((
            vocab,
            Self {
                mono,
                parallel,
                valid,
                test,
            },
        ))
    }

    /// Scheduling order: monolingual tasks first, then parallel ones.
    pub fn tasks(&self) -> Vec<Task> {
        self.mono
            .iter()
            .map(|r| Task::Mono {
                lang: r.lang().clone(),
            })
            .chain(self.parallel.iter().map(|r| Task::Parallel {
                pair: r.pair().clone(),
            }))
            .collect()
    }
}

type ParallelWords = (LangPair, PathBuf, Vec<Vec<String>>, Vec<Vec<String>>);

fn read_corpus(path: &Path) -> anyhow::Result<Vec<Vec<String>>> {
    read_monolingual_corpus(path)
        .with_context(|| format!("Failed to read corpus {}", path.display()))
}

fn register_words(
    vocab: &mut Vocabularies,
    lang: &Lang,
    words: &[Vec<String>],
) -> anyhow::Result<()> {
    let mapping = vocab.get_mut(lang)?;
    for token in words.iter().flatten() {
        mapping.register(token);
    }
    Ok(())
}

fn read_parallel(
    vocab: &mut Vocabularies,
    pair: &LangPair,
    (source_path, target_path): (PathBuf, PathBuf),
) -> anyhow::Result<ParallelWords> {
    let source = read_corpus(&source_path)?;
    let target = read_corpus(&target_path)?;
    register_words(vocab, &pair.first, &source)?;
    register_words(vocab, &pair.second, &target)?;
    Ok((pair.clone(), source_path, source, target))
}

fn encode_parallel(
    vocab: &Vocabularies,
    words: Vec<ParallelWords>,
    max_len: usize,
) -> anyhow::Result<Vec<ParallelDataReader>> {
    words
        .into_iter()
        .map(|(pair, path, source, target)| {
            let source_mapping = vocab.get(&pair.first)?;
            let target_mapping = vocab.get(&pair.second)?;
            ParallelDataReader::from_words(
                pair,
                &source,
                &target,
                source_mapping,
                target_mapping,
                max_len,
            )
            .with_context(|| format!("Failed to encode parallel corpus {}", path.display()))
        })
        .collect()
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub completed_epochs: usize,
    pub steps: usize,
    pub early_stopped: bool,
    pub validation_losses: Vec<f32>,
    pub final_model: PathBuf,
}

/// Drives a [`SequenceModel`] through a training run.
pub struct Trainer<M: SequenceModel> {
    config: TrainConfig,
    layout: RunLayout,
    vocab: Vocabularies,
    data: TrainingData,
    tasks: Vec<Task>,
    model: M,
    checkpoints: CheckpointStore,
    state: TrainingState,
}

impl<M: SequenceModel> Trainer<M> {
    pub fn new(
        config: TrainConfig,
        layout: RunLayout,
        vocab: Vocabularies,
        data: TrainingData,
        model: M,
    ) -> anyhow::Result<Self> {
        let tasks = data.tasks();
        if tasks.is_empty() {
            bail!("Nothing to train: no monolingual or parallel training data");
        }
        let sizes = data
            .mono
            .iter()
            .map(MonoDataReader::num_words)
            .chain(data.parallel.iter().map(ParallelDataReader::num_words))
            .collect();
        let checkpoints = CheckpointStore::new(&layout.temp_models)?;
        Ok(Self {
            config,
            layout,
            vocab,
            data,
            tasks,
            model,
            checkpoints,
            state: TrainingState::new(sizes),
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn run(&mut self) -> anyhow::Result<TrainingOutcome> {
        if let Some(start_from) = self.config.start_from.clone() {
            self.model
                .load(&start_from)
                .with_context(|| format!("Failed to load {}", start_from.display()))?;
            info!("Resumed parameters from {}", start_from.display());
        }

        info!(
            "Training {} tasks: {}",
            self.tasks.len(),
            self.tasks
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut early_stopped = false;
        loop {
            self.train_step()?;
            if !self.state.finish_step() {
                continue;
            }

            let validation_loss = self.validation_loss()?;
            self.state.record_validation(validation_loss);
            info!(
                "Epochs Completed : {:03}\t Validation loss: {}",
                self.state.completed_epochs(),
                validation_loss
            );

            let mut stop = false;
            if self.state.should_stop_early() {
                let epoch = self.state.roll_back();
                warn!("Validation loss rose for 3 epochs; rolling back to epoch {}", epoch);
                self.checkpoints
                    .restore(&mut self.model, epoch)
                    .context("Early-stopping rollback failed")?;
                stop = true;
                early_stopped = true;
            }
            if self.state.completed_epochs() >= self.config.max_epochs {
                stop = true;
            }

            let completed = self.state.completed_epochs();
            if stop || (self.config.infer_every > 0 && completed % self.config.infer_every == 0) {
                let dir = if stop {
                    self.layout.final_output.clone()
                } else {
                    self.layout.outputs.clone()
                };
                self.infer_test_sets(&dir, completed)?;
            }

            if stop {
                break;
            }
            if self.state.improved() {
                self.checkpoints.save(&self.model, completed)?;
            }
        }

        let completed = self.state.completed_epochs();
        let final_model = save_final(&self.model, &self.layout.root, completed)?;
        info!("Training finished after {} epochs, {} steps", completed, self.state.steps());
        Ok(TrainingOutcome {
            completed_epochs: completed,
            steps: self.state.steps(),
            early_stopped,
            validation_losses: self.state.validation_losses().to_vec(),
            final_model,
        })
    }

    /// One minibatch update for every task.
    fn train_step(&mut self) -> anyhow::Result<()> {
        let batch_size = self.config.batch_size;
        let mono_count = self.data.mono.len();
        for (index, task) in self.tasks.iter().enumerate() {
            match task {
                Task::Mono { lang } => {
                    let batch = self.data.mono[index].get_next_batch(batch_size);
                    let input = self.condition(&batch, lang, lang)?;
                    let objective = Objective::Reconstruct { lang: lang.clone() };
                    self.model
                        .apply_update(&objective, ObjectiveBatch::parallel(&input, &batch))
                        .with_context(|| format!("Update failed for {objective}"))?;
                    self.state.record_batch(index, batch.len());
                }
                Task::Parallel { pair } => {
                    let (src, tgt) =
                        self.data.parallel[index - mono_count].get_next_batch(batch_size);
                    for objective in task.objectives() {
                        let batch = match &objective {
                            Objective::Transliterate { src: from, .. } if *from == pair.first => {
                                (self.condition(&src, &pair.first, &pair.second)?, tgt.clone())
                            }
                            Objective::Transliterate { .. } => {
                                (self.condition(&tgt, &pair.second, &pair.first)?, src.clone())
                            }
                            _ => (
                                self.condition(&src, &pair.first, &pair.second)?,
                                self.condition(&tgt, &pair.second, &pair.first)?,
                            ),
                        };
                        self.model
                            .apply_update(&objective, ObjectiveBatch::parallel(&batch.0, &batch.1))
                            .with_context(|| format!("Update failed for {objective}"))?;
                    }
                    self.state.record_batch(index, src.len());
                }
            }
        }
        debug!(step = self.state.steps() + 1, "training step done");
        Ok(())
    }

    /// Encoder input for `src → tgt`, with the configured language markers.
    fn condition(
        &self,
        batch: &SequenceBatch,
        src: &Lang,
        tgt: &Lang,
    ) -> anyhow::Result<SequenceBatch> {
        let mapping = self.vocab.get(src)?;
        let mut batch = batch.clone();
        if self.config.prefix_tgtlang {
            batch = batch.prefixed_with_token(&tgt.marker_token(), mapping)?;
        }
        if self.config.prefix_srclang {
            batch = batch.prefixed_with_token(&src.marker_token(), mapping)?;
        }
        Ok(batch)
    }

    /// Sum over held-out pairs of both transliteration directions' loss on
    /// the full data.
    fn validation_loss(&self) -> anyhow::Result<f32> {
        let mut total = 0.0;
        for reader in &self.data.valid {
            let pair = reader.pair();
            let (source, target) = reader.get_data();
            let forward = Objective::Transliterate {
                src: pair.first.clone(),
                tgt: pair.second.clone(),
            };
            let backward = Objective::Transliterate {
                src: pair.second.clone(),
                tgt: pair.first.clone(),
            };
            let source_in = self.condition(source, &pair.first, &pair.second)?;
            let target_in = self.condition(target, &pair.second, &pair.first)?;
            total += self
                .model
                .compute_loss(&forward, ObjectiveBatch::parallel(&source_in, target))?;
            total += self
                .model
                .compute_loss(&backward, ObjectiveBatch::parallel(&target_in, source))?;
        }
        Ok(total)
    }

    /// Greedy-decode every test set into `dir/<NNN><src>-<tgt>_`.
    fn infer_test_sets(&self, dir: &Path, epoch: usize) -> anyhow::Result<()> {
        let search = BeamSearch::greedy(self.config.model.max_seq_len);
        for (pair, reader) in &self.data.test {
            let input = self.condition(reader.get_data(), &pair.first, &pair.second)?;
            let hyps = self
                .model
                .beam_decode(&pair.first, &pair.second, &input, &search)
                .with_context(|| format!("Decoding failed for {pair}"))?;
            let target = self.vocab.get(&pair.second)?;
            let words = hyps
                .iter()
                .map(|h| match h.first() {
                    Some(best) => target.words_from_ids(&best.tokens),
                    None => Ok(Vec::new()),
                })
                .collect::<xlit_core::Result<Vec<_>>>()?;
            let path = dir.join(format!("{epoch:03}{pair}_"));
            write_monolingual_corpus(&path, words)?;
            info!("Wrote {} test outputs to {}", reader.num_words(), path.display());
        }
        Ok(())
    }
}
