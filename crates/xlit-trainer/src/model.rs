//! # Seq2Seq Model
//!
//! A compact character-level encoder–decoder on candle. Every parameter scope
//! (a language with its own vocabulary, or `shared`) owns an embedding table,
//! an encoder and a decoder. The encoder reduces an input sequence to one
//! vector; the decoder is an LSTM conditioned on that vector at every step.
//!
//! Each objective keeps its own AdamW state over the full parameter set.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use candle_core::{D, DType, Device, Tensor};
use candle_nn::{
    AdamW, Embedding, Linear, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap, embedding,
    linear, linear_no_bias,
};
use tracing::debug;
use xlit_core::beam::{BeamSearch, StepScorer};
use xlit_core::lang::Lang;
use xlit_core::mapping::{GO_ID, PAD_ID, Vocabularies};
use xlit_core::model::{Hypothesis, Objective, ObjectiveBatch, SequenceModel};
use xlit_core::sequence::SequenceBatch;
use xlit_core::{Result, XlitError};

use crate::config::{EncoderType, ModelConfig};

fn backend(e: candle_core::Error) -> XlitError {
    XlitError::Backend(e.to_string())
}

fn sigmoid(x: &Tensor) -> candle_core::Result<Tensor> {
    candle_nn::ops::sigmoid(&x.contiguous()?)
}

/// Ids `(batch, max_len)` as u32 and mask `(batch, max_len)` as f32.
fn batch_tensors(batch: &SequenceBatch, device: &Device) -> candle_core::Result<(Tensor, Tensor)> {
    let shape = (batch.len(), batch.max_len());
    let ids = Tensor::from_vec(batch.flat_ids(), shape, device)?;
    let mask = Tensor::from_vec(batch.flat_mask(), shape, device)?;
    Ok((ids, mask))
}

struct LstmCell {
    input: Linear,
    hidden: Linear,
    hidden_size: usize,
}

impl LstmCell {
    fn new(in_dim: usize, hidden_size: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            input: linear(in_dim, 4 * hidden_size, vb.pp("input"))?,
            hidden: linear_no_bias(hidden_size, 4 * hidden_size, vb.pp("hidden"))?,
            hidden_size,
        })
    }

    fn zeros(&self, batch: usize, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::zeros((batch, self.hidden_size), DType::F32, device)
    }

    fn step(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        self.step_gates(&self.input.forward(x)?, h, c)
    }

    /// Step from precomputed input gates `(batch, 4 * hidden)`.
    fn step_gates(
        &self,
        input_gates: &Tensor,
        h: &Tensor,
        c: &Tensor,
    ) -> candle_core::Result<(Tensor, Tensor)> {
        let gates = input_gates.add(&self.hidden.forward(h)?)?;
        let chunks = gates.chunk(4, D::Minus1)?;
        let i = sigmoid(&chunks[0])?;
        let f = sigmoid(&chunks[1])?;
        let g = chunks[2].tanh()?;
        let o = sigmoid(&chunks[3])?;
        let c = f.mul(c)?.add(&i.mul(&g)?)?;
        let h = o.mul(&c.tanh()?)?;
        Ok((h, c))
    }

    /// Step only where `keep` (`(batch, 1)`) is 1; elsewhere hold the state.
    fn masked_step(
        &self,
        x: &Tensor,
        h: &Tensor,
        c: &Tensor,
        keep: &Tensor,
    ) -> candle_core::Result<(Tensor, Tensor)> {
        let (h_new, c_new) = self.step(x, h, c)?;
        let hold = keep.affine(-1.0, 1.0)?;
        let h = h_new.broadcast_mul(keep)?.add(&h.broadcast_mul(&hold)?)?;
        let c = c_new.broadcast_mul(keep)?.add(&c.broadcast_mul(&hold)?)?;
        Ok((h, c))
    }

    /// Final state after running over `(batch, time, in)` inputs.
    fn run(&self, xs: &Tensor, mask: &Tensor, reverse: bool) -> candle_core::Result<Tensor> {
        let (batch, time, _) = xs.dims3()?;
        let mut h = self.zeros(batch, xs.device())?;
        let mut c = self.zeros(batch, xs.device())?;
        let order: Box<dyn Iterator<Item = usize>> = if reverse {
            Box::new((0..time).rev())
        } else {
            Box::new(0..time)
        };
        for t in order {
            let x = xs.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            let keep = mask.narrow(1, t, 1)?;
            (h, c) = self.masked_step(&x, &h, &c, &keep)?;
        }
        Ok(h)
    }
}

enum Encoder {
    Cnn { conv: Linear },
    Lstm { cell: LstmCell },
    BiLstm { fwd: LstmCell, bwd: LstmCell, proj: Linear },
}

impl Encoder {
    fn new(config: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let (emb, hid) = (config.embedding_size, config.enc_rnn_size);
        Ok(match config.enc_type {
            EncoderType::Cnn => Self::Cnn {
                conv: linear(3 * emb, hid, vb.pp("conv"))?,
            },
            EncoderType::SimpleLstmNoattn => Self::Lstm {
                cell: LstmCell::new(emb, hid, vb.pp("lstm"))?,
            },
            EncoderType::Bilstm => Self::BiLstm {
                fwd: LstmCell::new(emb, hid, vb.pp("fwd"))?,
                bwd: LstmCell::new(emb, hid, vb.pp("bwd"))?,
                proj: linear(2 * hid, hid, vb.pp("proj"))?,
            },
        })
    }

    /// `(batch, time, emb)` embeddings to `(batch, enc_rnn_size)`.
    fn forward(&self, xs: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Cnn { conv } => {
                let (batch, time, emb) = xs.dims3()?;
                let pad = Tensor::zeros((batch, 1, emb), xs.dtype(), xs.device())?;
                let (left, right) = if time > 1 {
                    (
                        Tensor::cat(&[&pad, &xs.narrow(1, 0, time - 1)?], 1)?,
                        Tensor::cat(&[&xs.narrow(1, 1, time - 1)?, &pad], 1)?,
                    )
                } else {
                    (pad.clone(), pad)
                };
                let window = Tensor::cat(&[&left, xs, &right], 2)?;
                let features = conv.forward(&window)?.tanh()?;
                let weights = mask.unsqueeze(2)?;
                let summed = features.broadcast_mul(&weights)?.sum(1)?;
                let counts = mask.sum_keepdim(1)?.maximum(1.0)?;
                summed.broadcast_div(&counts)
            }
            Self::Lstm { cell } => cell.run(xs, mask, false),
            Self::BiLstm { fwd, bwd, proj } => {
                let forward = fwd.run(xs, mask, false)?;
                let backward = bwd.run(xs, mask, true)?;
                proj.forward(&Tensor::cat(&[&forward, &backward], 1)?)?.tanh()
            }
        }
    }
}

/// Token and representation are projected separately and summed into the
/// LSTM gates; the embedding backward needs a contiguous gradient.
struct Decoder {
    bridge: Linear,
    cell: LstmCell,
    context: Linear,
    out: Linear,
}

impl Decoder {
    fn new(config: &ModelConfig, vocab_size: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            bridge: linear(config.enc_rnn_size, config.dec_rnn_size, vb.pp("bridge"))?,
            cell: LstmCell::new(config.embedding_size, config.dec_rnn_size, vb.pp("lstm"))?,
            context: linear_no_bias(
                config.enc_rnn_size,
                4 * config.dec_rnn_size,
                vb.pp("context"),
            )?,
            out: linear(config.dec_rnn_size, vocab_size, vb.pp("out"))?,
        })
    }

    fn initial_state(&self, rep: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let h = self.bridge.forward(rep)?.tanh()?;
        let c = h.zeros_like()?;
        Ok((h, c))
    }

    /// Feed one embedded token; returns the new state and next-token logits.
    fn step(
        &self,
        token_emb: &Tensor,
        rep: &Tensor,
        h: &Tensor,
        c: &Tensor,
    ) -> candle_core::Result<(Tensor, Tensor, Tensor)> {
        let gates = self
            .cell
            .input
            .forward(token_emb)?
            .add(&self.context.forward(rep)?)?;
        let (h, c) = self.cell.step_gates(&gates, h, c)?;
        let logits = self.out.forward(&h)?;
        Ok((h, c, logits))
    }
}

struct Scope {
    embedding: Embedding,
    output_embedding: Option<Embedding>,
    encoder: Encoder,
    decoder: Decoder,
}

impl Scope {
    fn new(config: &ModelConfig, vocab_size: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let output_embedding = if config.separate_output_embedding {
            Some(embedding(vocab_size, config.embedding_size, vb.pp("out_emb"))?)
        } else {
            None
        };
        Ok(Self {
            embedding: embedding(vocab_size, config.embedding_size, vb.pp("emb"))?,
            output_embedding,
            encoder: Encoder::new(config, vb.pp("encoder"))?,
            decoder: Decoder::new(config, vocab_size, vb.pp("decoder"))?,
        })
    }

    fn decoder_embedding(&self) -> &Embedding {
        self.output_embedding.as_ref().unwrap_or(&self.embedding)
    }

    fn encode(&self, batch: &SequenceBatch, device: &Device) -> candle_core::Result<Tensor> {
        let (ids, mask) = batch_tensors(batch, device)?;
        let xs = self.embedding.forward(&ids)?;
        self.encoder.forward(&xs, &mask)
    }

    /// Mean over the batch of the masked target negative log-likelihood,
    /// decoding with teacher forcing from `GO`.
    fn decode_loss(
        &self,
        rep: &Tensor,
        target: &SequenceBatch,
        device: &Device,
    ) -> candle_core::Result<Tensor> {
        let (ids, mask) = batch_tensors(target, device)?;
        let batch = target.len();
        let (mut h, mut c) = self.decoder.initial_state(rep)?;
        let mut prev = Tensor::full(GO_ID, batch, device)?;
        let mut total = Tensor::zeros((), DType::F32, device)?;
        for t in 0..target.max_len() {
            let emb = self.decoder_embedding().forward(&prev)?;
            let (h_next, c_next, logits) = self.decoder.step(&emb, rep, &h, &c)?;
            (h, c) = (h_next, c_next);
            let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
            let gold = ids.narrow(1, t, 1)?.contiguous()?;
            let picked = log_probs.gather(&gold, 1)?.squeeze(1)?;
            let step_mask = mask.narrow(1, t, 1)?.squeeze(1)?;
            total = total.sub(&picked.mul(&step_mask)?.sum_all()?)?;
            prev = gold.squeeze(1)?;
        }
        total.affine(1.0 / batch.max(1) as f64, 0.0)
    }
}

/// Mean squared distance between the two sides' representations.
fn align_loss(
    input: &Scope,
    output: &Scope,
    batch: ObjectiveBatch<'_>,
    device: &Device,
) -> candle_core::Result<Tensor> {
    let r1 = input.encode(batch.input, device)?;
    let r2 = output.encode(batch.output, device)?;
    r1.sub(&r2)?.sqr()?.sum(1)?.mean_all()
}

/// Candle encoder–decoder implementing [`SequenceModel`].
pub struct Seq2SeqModel {
    config: ModelConfig,
    device: Device,
    varmap: VarMap,
    scopes: BTreeMap<String, Scope>,
    lang_scopes: BTreeMap<Lang, String>,
    optimizers: HashMap<Objective, AdamW>,
}

impl Seq2SeqModel {
    /// Build parameters for every scope of `vocab`, on the CPU.
    pub fn new(config: &ModelConfig, vocab: &Vocabularies) -> Result<Self> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let mut scopes = BTreeMap::new();
        let mut lang_scopes = BTreeMap::new();
        for lang in vocab.languages() {
            let scope = vocab.scope(lang)?;
            if !scopes.contains_key(&scope) {
                let vocab_size = vocab.get(lang)?.vocab_size();
                let modules = Scope::new(config, vocab_size, vb.pp(&scope)).map_err(backend)?;
                debug!(%scope, vocab_size, "built parameter scope");
                scopes.insert(scope.clone(), modules);
            }
            lang_scopes.insert(lang.clone(), scope);
        }

        Ok(Self {
            config: config.clone(),
            device,
            varmap,
            scopes,
            lang_scopes,
            optimizers: HashMap::new(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Total number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }

    fn scope(&self, lang: &Lang) -> Result<&Scope> {
        self.lang_scopes
            .get(lang)
            .and_then(|name| self.scopes.get(name))
            .ok_or_else(|| {
                XlitError::InvalidArgument(format!("model has no parameters for {lang}"))
            })
    }

    fn loss_tensor(&self, objective: &Objective, batch: ObjectiveBatch<'_>) -> Result<Tensor> {
        let input = self.scope(objective.input_lang())?;
        let output = self.scope(objective.output_lang())?;
        let loss = match objective {
            Objective::Reconstruct { .. } | Objective::Transliterate { .. } => input
                .encode(batch.input, &self.device)
                .and_then(|rep| output.decode_loss(&rep, batch.output, &self.device)),
            Objective::Align { .. } => align_loss(input, output, batch, &self.device),
        };
        loss.map_err(backend)
    }
}

impl SequenceModel for Seq2SeqModel {
    fn compute_loss(&self, objective: &Objective, batch: ObjectiveBatch<'_>) -> Result<f32> {
        self.loss_tensor(objective, batch)?
            .to_scalar::<f32>()
            .map_err(backend)
    }

    fn apply_update(&mut self, objective: &Objective, batch: ObjectiveBatch<'_>) -> Result<()> {
        let loss = self.loss_tensor(objective, batch)?;
        if !self.optimizers.contains_key(objective) {
            let params = ParamsAdamW {
                lr: self.config.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            };
            let optimizer = AdamW::new(self.varmap.all_vars(), params).map_err(backend)?;
            self.optimizers.insert(objective.clone(), optimizer);
        }
        let optimizer = self
            .optimizers
            .get_mut(objective)
            .ok_or_else(|| XlitError::Backend(format!("no optimizer for {objective}")))?;
        optimizer.backward_step(&loss).map_err(backend)
    }

    fn beam_decode(
        &self,
        src: &Lang,
        tgt: &Lang,
        batch: &SequenceBatch,
        search: &BeamSearch,
    ) -> Result<Vec<Vec<Hypothesis>>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let representations = self
            .scope(src)?
            .encode(batch, &self.device)
            .map_err(backend)?;
        let scorer = CandleScorer {
            scope: self.scope(tgt)?,
            representations: &representations,
            device: &self.device,
        };
        search.search_batch(&scorer, batch.len())
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path).map_err(backend)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        self.varmap.load(path).map_err(backend)
    }
}

/// Re-runs the decoder over each batch of beam prefixes for one example.
struct CandleScorer<'a> {
    scope: &'a Scope,
    representations: &'a Tensor,
    device: &'a Device,
}

impl CandleScorer<'_> {
    fn next_log_probs(
        &self,
        example: usize,
        prefixes: &[&[u32]],
    ) -> candle_core::Result<Vec<Vec<f32>>> {
        let k = prefixes.len();
        let steps = prefixes.first().map_or(0, |p| p.len());
        let enc = self.representations.dim(1)?;
        let rep = self
            .representations
            .get(example)?
            .unsqueeze(0)?
            .broadcast_as((k, enc))?
            .contiguous()?;

        let flat: Vec<u32> = prefixes.iter().flat_map(|p| p.iter().copied()).collect();
        let ids = Tensor::from_vec(flat, (k, steps), self.device)?;

        let decoder = &self.scope.decoder;
        let (mut h, mut c) = decoder.initial_state(&rep)?;
        let mut logits = None;
        for t in 0..steps {
            let token = ids.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            let emb = self.scope.decoder_embedding().forward(&token)?;
            let (h_next, c_next, step_logits) = decoder.step(&emb, &rep, &h, &c)?;
            (h, c) = (h_next, c_next);
            logits = Some(step_logits);
        }
        match logits {
            Some(logits) => candle_nn::ops::log_softmax(&logits, D::Minus1)?.to_vec2::<f32>(),
            None => Ok(Vec::new()),
        }
    }
}

/// `PAD` and `GO` are never emitted; `EOW` stays available.
fn mask_reserved(mut rows: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    for row in &mut rows {
        for id in [PAD_ID, GO_ID] {
            if let Some(p) = row.get_mut(id as usize) {
                *p = f32::NEG_INFINITY;
            }
        }
    }
    rows
}

impl StepScorer for CandleScorer<'_> {
    fn score(&self, example: usize, prefixes: &[&[u32]]) -> Result<Vec<Vec<f32>>> {
        self.next_log_probs(example, prefixes)
            .map(mask_reserved)
            .map_err(backend)
    }
}
