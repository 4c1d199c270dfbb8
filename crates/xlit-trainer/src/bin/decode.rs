use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use xlit_core::SequenceModel;
use xlit_core::lang::LangPair;
use xlit_core::mapping::{Vocabularies, parse_representation};
use xlit_trainer::{DecodeOptions, EncoderType, ModelConfig, Seq2SeqModel, decode_file};

/// Decode a corpus with a trained model into an n-best list
#[derive(Parser, Debug)]
#[command(name = "xlit-decode")]
#[command(version)]
struct Cli {
    #[arg(long = "max-seq-length", default_value_t = 30)]
    max_seq_length: usize,

    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    #[arg(long, default_value = "cnn")]
    enc_type: EncoderType,

    #[arg(long)]
    separate_output_embedding: bool,

    #[arg(long)]
    prefix_tgtlang: bool,

    #[arg(long)]
    prefix_srclang: bool,

    #[arg(long, default_value_t = 256)]
    embedding_size: usize,

    #[arg(long, default_value_t = 512)]
    enc_rnn_size: usize,

    #[arg(long, default_value_t = 512)]
    dec_rnn_size: usize,

    #[arg(long, default_value = "onehot")]
    representation: String,

    #[arg(long, default_value = "CharacterMapping")]
    shared_mapping_class: String,

    /// Hypotheses written per input word
    #[arg(long, default_value_t = 10)]
    topn: usize,

    #[arg(long, default_value_t = 5)]
    beam_size: usize,

    /// Source and target language, e.g. `hi-kn`
    #[arg(long)]
    lang_pair: LangPair,

    /// Checkpoint to decode with
    #[arg(long)]
    model_fname: PathBuf,

    /// Directory holding `mapping_<lang>.json` files
    #[arg(long)]
    mapping_dir: PathBuf,

    #[arg(long)]
    in_fname: PathBuf,

    #[arg(long)]
    out_fname: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    println!("Parameters:");
    println!("{cli:#?}");

    let langs = [cli.lang_pair.first.clone(), cli.lang_pair.second.clone()];
    let scheme = parse_representation(&cli.representation, &langs)
        .context("Invalid --representation")?;
    let shared_class = cli
        .shared_mapping_class
        .parse()
        .context("Invalid --shared-mapping-class")?;
    let vocab = Vocabularies::load_dir(&cli.mapping_dir, scheme, shared_class)
        .with_context(|| format!("Failed to load mappings from {}", cli.mapping_dir.display()))?;

    for lang in &langs {
        println!(
            "Vocabulary size for {} ({}): {}",
            lang,
            vocab.scope(lang)?,
            vocab.get(lang)?.vocab_size()
        );
    }

    let config = ModelConfig::new()
        .with_sizes(cli.embedding_size, cli.enc_rnn_size, cli.dec_rnn_size)
        .with_enc_type(cli.enc_type)
        .with_max_seq_len(cli.max_seq_length)
        .with_separate_output_embedding(cli.separate_output_embedding);
    config.validate()?;

    let mut model = Seq2SeqModel::new(&config, &vocab).context("Failed to build the model")?;
    model
        .load(&cli.model_fname)
        .with_context(|| format!("Failed to load model {}", cli.model_fname.display()))?;

    let opts = DecodeOptions::new(cli.lang_pair, cli.in_fname, cli.out_fname)
        .with_beam(cli.beam_size, cli.topn)
        .with_batch_size(cli.batch_size)
        .with_max_seq_len(cli.max_seq_length)
        .with_prefixes(cli.prefix_srclang, cli.prefix_tgtlang);

    let stats = decode_file(&model, &vocab, &opts)?;
    println!("{stats}");
    Ok(())
}
