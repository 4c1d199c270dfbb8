//! # xlit Trainer
//!
//! Multi-task training and batch decoding for character-level
//! transliteration. The orchestrator in [`trainer`] is written against the
//! [`SequenceModel`](xlit_core::SequenceModel) trait; [`model`] supplies a
//! compact candle LSTM encoder–decoder so the `xlit-train` and `xlit-decode`
//! binaries work end to end.

pub mod checkpoint;
pub mod config;
pub mod decode;
pub mod model;
pub mod state;
pub mod trainer;

pub use checkpoint::{CheckpointStore, KEEP_CHECKPOINTS, save_final};
pub use config::{EncoderType, ModelConfig, TrainConfig};
pub use decode::{DecodeOptions, DecodeStats, decode_file, format_interval};
pub use model::Seq2SeqModel;
pub use state::{ROLLBACK_EPOCHS, TrainingState};
pub use trainer::{RunLayout, Trainer, TrainingData, TrainingOutcome};
