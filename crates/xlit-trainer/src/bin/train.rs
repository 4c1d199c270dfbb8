use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use xlit_core::lang::{Lang, LangPair, parse_list};
use xlit_trainer::{
    EncoderType, ModelConfig, RunLayout, Seq2SeqModel, TrainConfig, Trainer, TrainingData,
};

/// Train a multi-task transliteration model
#[derive(Parser)]
#[command(name = "xlit-train")]
#[command(version)]
struct Cli {
    #[arg(long, default_value_t = 256)]
    embedding_size: usize,

    #[arg(long, default_value_t = 512)]
    enc_rnn_size: usize,

    #[arg(long, default_value_t = 512)]
    dec_rnn_size: usize,

    /// cnn, bilstm or simple_lstm_noattn
    #[arg(long, default_value = "bilstm")]
    enc_type: EncoderType,

    /// Separate decoder output embedding
    #[arg(long)]
    separate_output_embedding: bool,

    /// Prefix input sequences with the source language marker
    #[arg(long)]
    prefix_srclang: bool,

    /// Prefix input sequences with the target language marker
    #[arg(long)]
    prefix_tgtlang: bool,

    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    #[arg(long, default_value_t = 32)]
    max_epochs: usize,

    #[arg(long, default_value_t = 0.001)]
    learning_rate: f64,

    #[arg(long = "max-seq-length", default_value_t = 50)]
    max_seq_length: usize,

    /// Decode the test sets every N epochs (0: only at the end)
    #[arg(long, default_value_t = 1)]
    infer_every: usize,

    /// Base name of the output folder; the run signature is appended
    #[arg(long, default_value = "output")]
    output_folder: PathBuf,

    /// Checkpoint to resume from
    #[arg(long)]
    start_from: Option<PathBuf>,

    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, default_value = "hi,kn")]
    mono_langs: String,

    #[arg(long, default_value = "hi-kn")]
    parallel_train_langs: String,

    #[arg(long, default_value = "hi-kn")]
    parallel_valid_langs: String,

    #[arg(long, default_value = "hi-kn,kn-hi")]
    test_langs: String,

    /// onehot, onehot_shared, or per-language `lang:scheme` entries
    #[arg(long, default_value = "onehot")]
    representation: String,

    #[arg(long, default_value = "CharacterMapping")]
    shared_mapping_class: String,
}

impl Cli {
    fn into_config(self) -> Result<TrainConfig> {
        let mono: Vec<Lang> = parse_list(&self.mono_langs).context("Invalid --mono-langs")?;
        let train: Vec<LangPair> =
            parse_list(&self.parallel_train_langs).context("Invalid --parallel-train-langs")?;
        let valid: Vec<LangPair> =
            parse_list(&self.parallel_valid_langs).context("Invalid --parallel-valid-langs")?;
        let test: Vec<LangPair> = parse_list(&self.test_langs).context("Invalid --test-langs")?;

        let model = ModelConfig::new()
            .with_sizes(self.embedding_size, self.enc_rnn_size, self.dec_rnn_size)
            .with_enc_type(self.enc_type)
            .with_max_seq_len(self.max_seq_length)
            .with_learning_rate(self.learning_rate)
            .with_separate_output_embedding(self.separate_output_embedding);

        let mut config = TrainConfig::new()
            .with_data_dir(self.data_dir)
            .with_output_folder(self.output_folder)
            .with_languages(mono, train, valid, test)
            .with_model(model)
            .with_batch_size(self.batch_size)
            .with_max_epochs(self.max_epochs)
            .with_infer_every(self.infer_every)
            .with_start_from(self.start_from)
            .with_prefixes(self.prefix_srclang, self.prefix_tgtlang)
            .with_representation(self.representation);
        config.shared_mapping_class = self.shared_mapping_class;
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Cli::parse().into_config()?;
    let unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the Unix epoch")?
        .as_secs();

    let layout = RunLayout::create(config.run_dir(unix_secs))?;
    let run_config = layout.run_config();
    fs::write(&run_config, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("Failed to write {}", run_config.display()))?;
    info!("Output folder: {}", layout.root.display());

    let (vocab, data) = TrainingData::load(&config)?;
    vocab
        .save_dir(&layout.mappings)
        .context("Failed to save mappings")?;

    let model = Seq2SeqModel::new(&config.model, &vocab).context("Failed to build the model")?;
    info!(
        "Model: {} encoder, {} parameters",
        config.model.enc_type,
        model.num_parameters()
    );

    let mut trainer = Trainer::new(config, layout, vocab, data, model)?;
    let outcome = trainer.run()?;
    if outcome.early_stopped {
        info!("Stopped early at epoch {}", outcome.completed_epochs);
    }
    info!("Final model: {}", outcome.final_model.display());
    Ok(())
}
