//! Run configuration for training and for the concrete model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, ensure};
use serde::{Deserialize, Serialize};
use xlit_core::XlitError;
use xlit_core::lang::{Lang, LangPair};
use xlit_core::mapping::{Representation, SharedMappingClass, parse_representation};

/// Encoder architecture of [`crate::model::Seq2SeqModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderType {
    /// Width-3 convolution with masked mean pooling.
    Cnn,
    /// Forward and backward LSTMs, projected to the encoder size.
    Bilstm,
    /// A single forward LSTM; the final state is the representation.
    SimpleLstmNoattn,
}

impl FromStr for EncoderType {
    type Err = XlitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cnn" => Ok(Self::Cnn),
            "bilstm" => Ok(Self::Bilstm),
            "simple_lstm_noattn" => Ok(Self::SimpleLstmNoattn),
            other => Err(XlitError::InvalidArgument(format!(
                "unknown encoder type {other:?}"
            ))),
        }
    }
}

impl fmt::Display for EncoderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cnn => "cnn",
            Self::Bilstm => "bilstm",
            Self::SimpleLstmNoattn => "simple_lstm_noattn",
        })
    }
}

/// Architecture and optimizer settings of the concrete model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub embedding_size: usize,
    pub enc_rnn_size: usize,
    pub dec_rnn_size: usize,
    pub enc_type: EncoderType,
    pub max_seq_len: usize,
    /// Use a second embedding table for decoder inputs.
    pub separate_output_embedding: bool,
    pub learning_rate: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding_size: 256,
            enc_rnn_size: 512,
            dec_rnn_size: 512,
            enc_type: EncoderType::Bilstm,
            max_seq_len: 50,
            separate_output_embedding: false,
            learning_rate: 0.001,
        }
    }
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sizes(mut self, embedding: usize, enc_rnn: usize, dec_rnn: usize) -> Self {
        self.embedding_size = embedding;
        self.enc_rnn_size = enc_rnn;
        self.dec_rnn_size = dec_rnn;
        self
    }

    pub fn with_enc_type(mut self, enc_type: EncoderType) -> Self {
        self.enc_type = enc_type;
        self
    }

    pub fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = max_seq_len;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_separate_output_embedding(mut self, enabled: bool) -> Self {
        self.separate_output_embedding = enabled;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.embedding_size > 0 && self.enc_rnn_size > 0 && self.dec_rnn_size > 0,
            "embedding and RNN sizes must be positive"
        );
        ensure!(
            self.max_seq_len >= 2,
            "max sequence length must leave room for a token and EOW"
        );
        ensure!(
            self.learning_rate > 0.0 && self.learning_rate.is_finite(),
            "learning rate must be a positive number"
        );
        Ok(())
    }
}

/// Everything that defines one training run. Written to `run_config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub data_dir: PathBuf,
    /// Base name of the output folder; the run signature is appended.
    pub output_folder: PathBuf,
    pub mono_langs: Vec<Lang>,
    pub parallel_train_langs: Vec<LangPair>,
    pub parallel_valid_langs: Vec<LangPair>,
    pub test_langs: Vec<LangPair>,
    pub representation: String,
    pub shared_mapping_class: String,
    pub model: ModelConfig,
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Decode the test sets every this many epochs; 0 only at the end.
    pub infer_every: usize,
    pub start_from: Option<PathBuf>,
    pub prefix_srclang: bool,
    pub prefix_tgtlang: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let hi = Lang::new("hi");
        let kn = Lang::new("kn");
        let hi_kn = LangPair::new(hi.clone(), kn.clone());
        Self {
            data_dir: PathBuf::from("data"),
            output_folder: PathBuf::from("output"),
            mono_langs: vec![hi, kn],
            parallel_train_langs: vec![hi_kn.clone()],
            parallel_valid_langs: vec![hi_kn.clone()],
            test_langs: vec![hi_kn.clone(), hi_kn.reversed()],
            representation: "onehot".to_string(),
            shared_mapping_class: "CharacterMapping".to_string(),
            model: ModelConfig::default(),
            batch_size: 64,
            max_epochs: 32,
            infer_every: 1,
            start_from: None,
            prefix_srclang: false,
            prefix_tgtlang: false,
        }
    }
}

impl TrainConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_output_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.output_folder = folder.into();
        self
    }

    pub fn with_languages(
        mut self,
        mono: Vec<Lang>,
        parallel_train: Vec<LangPair>,
        parallel_valid: Vec<LangPair>,
        test: Vec<LangPair>,
    ) -> Self {
        self.mono_langs = mono;
        self.parallel_train_langs = parallel_train;
        self.parallel_valid_langs = parallel_valid;
        self.test_langs = test;
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_infer_every(mut self, infer_every: usize) -> Self {
        self.infer_every = infer_every;
        self
    }

    pub fn with_start_from(mut self, checkpoint: Option<PathBuf>) -> Self {
        self.start_from = checkpoint;
        self
    }

    pub fn with_prefixes(mut self, srclang: bool, tgtlang: bool) -> Self {
        self.prefix_srclang = srclang;
        self.prefix_tgtlang = tgtlang;
        self
    }

    pub fn with_representation(mut self, representation: impl Into<String>) -> Self {
        self.representation = representation.into();
        self
    }

    /// Every language the run touches, in order of first mention.
    pub fn languages(&self) -> Vec<Lang> {
        let pairs = self
            .parallel_train_langs
            .iter()
            .chain(&self.parallel_valid_langs)
            .chain(&self.test_langs)
            .flat_map(|pair| [&pair.first, &pair.second]);
        let mut langs: Vec<Lang> = Vec::new();
        for lang in self.mono_langs.iter().chain(pairs) {
            if !langs.contains(lang) {
                langs.push(lang.clone());
            }
        }
        langs
    }

    pub fn representation_scheme(&self) -> xlit_core::Result<BTreeMap<Lang, Representation>> {
        parse_representation(&self.representation, &self.languages())
    }

    pub fn shared_class(&self) -> xlit_core::Result<SharedMappingClass> {
        self.shared_mapping_class.parse()
    }

    /// `_e<emb>_b<batch>_lr<lr>_<unix-seconds>`.
    pub fn run_signature(&self, unix_secs: u64) -> String {
        format!(
            "_e{}_b{}_lr{}_{}",
            self.model.embedding_size, self.batch_size, self.model.learning_rate, unix_secs
        )
    }

    /// The output folder with the run signature appended to its name.
    pub fn run_dir(&self, unix_secs: u64) -> PathBuf {
        let mut name = self.output_folder.clone().into_os_string();
        name.push(self.run_signature(unix_secs));
        PathBuf::from(name)
    }

    pub fn mono_path(&self, lang: &Lang) -> PathBuf {
        self.data_dir.join("mono_train").join(lang.as_str())
    }

    pub fn parallel_train_paths(&self, pair: &LangPair) -> (PathBuf, PathBuf) {
        parallel_paths(&self.data_dir.join("parallel_train"), pair)
    }

    pub fn parallel_valid_paths(&self, pair: &LangPair) -> (PathBuf, PathBuf) {
        parallel_paths(&self.data_dir.join("parallel_valid"), pair)
    }

    pub fn test_path(&self, pair: &LangPair) -> PathBuf {
        self.data_dir.join("test").join(pair.to_string())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.model.validate()?;
        ensure!(self.batch_size > 0, "batch size must be positive");
        ensure!(self.max_epochs > 0, "max epochs must be positive");
        if let Some(start_from) = &self.start_from {
            ensure!(
                start_from.exists(),
                "checkpoint to start from not found: {}",
                start_from.display()
            );
        }
        ensure!(
            !self.mono_langs.is_empty() || !self.parallel_train_langs.is_empty(),
            "at least one monolingual or parallel training set is required"
        );
        self.representation_scheme()
            .context("Invalid --representation")?;
        self.shared_class()
            .context("Invalid --shared-mapping-class")?;
        Ok(())
    }
}

fn parallel_paths(dir: &Path, pair: &LangPair) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{pair}.{}", pair.first)),
        dir.join(format!("{pair}.{}", pair.second)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let config = TrainConfig::default();
        let pair: LangPair = "hi-kn".parse().unwrap();
        assert_eq!(config.mono_path(&Lang::new("hi")), Path::new("data/mono_train/hi"));
        assert_eq!(
            config.parallel_train_paths(&pair),
            (
                PathBuf::from("data/parallel_train/hi-kn.hi"),
                PathBuf::from("data/parallel_train/hi-kn.kn")
            )
        );
        assert_eq!(config.test_path(&pair.reversed()), Path::new("data/test/kn-hi"));
        assert_eq!(config.languages(), vec![Lang::new("hi"), Lang::new("kn")]);
    }

    #[test]
    fn run_dir_carries_signature() {
        let config = TrainConfig::default().with_output_folder("runs/out");
        assert_eq!(config.run_signature(1700000000), "_e256_b64_lr0.001_1700000000");
        assert_eq!(
            config.run_dir(1700000000),
            PathBuf::from("runs/out_e256_b64_lr0.001_1700000000")
        );
    }

    #[test]
    fn validation() {
        assert!(TrainConfig::default().validate().is_ok());
        assert!(TrainConfig::default().with_batch_size(0).validate().is_err());
        assert!(
            TrainConfig::default()
                .with_representation("phonetic")
                .validate()
                .is_err()
        );
        let no_tasks = TrainConfig::default().with_languages(vec![], vec![], vec![], vec![]);
        assert!(no_tasks.validate().is_err());
    }

    #[test]
    fn start_checkpoint_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = TrainConfig::default()
            .with_output_folder(dir.path().join("out"))
            .with_start_from(Some(dir.path().join("nope.safetensors")));
        assert!(missing.validate().is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let ckpt = dir.path().join("my_model-3.safetensors");
        std::fs::write(&ckpt, b"").unwrap();
        assert!(TrainConfig::default().with_start_from(Some(ckpt)).validate().is_ok());
    }

    #[test]
    fn encoder_type_round_trips_through_str() {
        for enc in [EncoderType::Cnn, EncoderType::Bilstm, EncoderType::SimpleLstmNoattn] {
            assert_eq!(enc.to_string().parse::<EncoderType>().unwrap(), enc);
        }
        assert!("transformer".parse::<EncoderType>().is_err());
    }

    #[test]
    fn config_serializes() {
        let config = TrainConfig::default().with_start_from(Some("ckpt".into()));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"enc_type\":\"bilstm\""));
        let back: TrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
