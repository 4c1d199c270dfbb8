//! Batch beam decoding of a corpus into a Moses-style n-best list.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, ensure};
use tracing::info;
use xlit_core::beam::BeamSearch;
use xlit_core::data::MonoDataReader;
use xlit_core::lang::{Lang, LangPair};
use xlit_core::mapping::{Mapping, Vocabularies};
use xlit_core::model::{Hypothesis, SequenceModel};
use xlit_core::nbest::{DECODER_FEATURES, NbestRecord, write_nbest};
use xlit_core::sequence::SequenceBatch;

/// What to decode and how.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    pub lang_pair: LangPair,
    pub in_fname: PathBuf,
    pub out_fname: PathBuf,
    pub max_seq_len: usize,
    pub batch_size: usize,
    pub beam_size: usize,
    pub topn: usize,
    pub prefix_srclang: bool,
    pub prefix_tgtlang: bool,
}

impl DecodeOptions {
    pub fn new(
        lang_pair: LangPair,
        in_fname: impl Into<PathBuf>,
        out_fname: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lang_pair,
            in_fname: in_fname.into(),
            out_fname: out_fname.into(),
            max_seq_len: 30,
            batch_size: 100,
            beam_size: 5,
            topn: 10,
            prefix_srclang: false,
            prefix_tgtlang: false,
        }
    }

    pub fn with_beam(mut self, beam_size: usize, topn: usize) -> Self {
        self.beam_size = beam_size;
        self.topn = topn;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = max_seq_len;
        self
    }

    pub fn with_prefixes(mut self, srclang: bool, tgtlang: bool) -> Self {
        self.prefix_srclang = srclang;
        self.prefix_tgtlang = tgtlang;
        self
    }

    pub fn search(&self) -> anyhow::Result<BeamSearch> {
        BeamSearch::new(self.beam_size, self.topn, self.max_seq_len)
            .context("Invalid beam search settings")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.batch_size > 0, "batch size must be positive");
        self.search()?;
        Ok(())
    }
}

/// Throughput of a decoding run. Atoms are `sequences * max_seq_len`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeStats {
    pub sequences: usize,
    pub atoms: usize,
    pub elapsed: Duration,
}

impl DecodeStats {
    pub fn atoms_per_sec(&self) -> f64 {
        rate(self.atoms, self.elapsed)
    }

    pub fn sequences_per_sec(&self) -> f64 {
        rate(self.sequences, self.elapsed)
    }
}

fn rate(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

impl fmt::Display for DecodeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of atoms: {}", self.atoms)?;
        writeln!(f, "Number of sequences: {}", self.sequences)?;
        writeln!(f, "Time taken (hh:mm:ss): {}", format_interval(self.elapsed))?;
        write!(
            f,
            "Decoding speed: {:.2} atoms/s, {:.2} sequences/s",
            self.atoms_per_sec(),
            self.sequences_per_sec()
        )
    }
}

/// `hh:mm:ss`, hours unbounded.
pub fn format_interval(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

/// N-best records for consecutive input sentences starting at `first_sent`.
pub fn nbest_records(
    first_sent: usize,
    hyps: &[Vec<Hypothesis>],
    target: &Mapping,
) -> xlit_core::Result<Vec<NbestRecord>> {
    let mut records = Vec::new();
    for (offset, candidates) in hyps.iter().enumerate() {
        for hyp in candidates {
            let tokens = target
                .words_from_ids(&hyp.tokens)?
                .into_iter()
                .map(str::to_string)
                .collect();
            records.push(NbestRecord::new(
                first_sent + offset,
                tokens,
                DECODER_FEATURES,
                f64::from(hyp.score),
            ));
        }
    }
    Ok(records)
}

/// Prefix `<tgt>` and then `<src>` markers as requested.
pub fn prefix_markers(
    batch: &SequenceBatch,
    src: &Lang,
    tgt: &Lang,
    mapping: &Mapping,
    prefix_srclang: bool,
    prefix_tgtlang: bool,
) -> xlit_core::Result<SequenceBatch> {
    let mut batch = batch.clone();
    if prefix_tgtlang {
        batch = batch.prefixed_with_token(&tgt.marker_token(), mapping)?;
    }
    if prefix_srclang {
        batch = batch.prefixed_with_token(&src.marker_token(), mapping)?;
    }
    Ok(batch)
}

/// Decode `opts.in_fname` in batches and write the n-best list.
pub fn decode_file<M: SequenceModel>(
    model: &M,
    vocab: &Vocabularies,
    opts: &DecodeOptions,
) -> anyhow::Result<DecodeStats> {
    opts.validate()?;
    let search = opts.search()?;
    let LangPair { first: src, second: tgt } = &opts.lang_pair;
    let source = vocab.get(src)?;
    let target = vocab.get(tgt)?;

    let reader = MonoDataReader::new(src.clone(), &opts.in_fname, source, opts.max_seq_len)
        .with_context(|| format!("Failed to read input {}", opts.in_fname.display()))?;
    let data = reader.get_data();
    let total = data.len();

    let mut records = Vec::with_capacity(total * opts.topn);
    let mut elapsed = Duration::ZERO;
    for start in (0..total).step_by(opts.batch_size) {
        let end = (start + opts.batch_size).min(total);
        let timer = Instant::now();
        let batch = prefix_markers(
            &data.slice(start, end),
            src,
            tgt,
            source,
            opts.prefix_srclang,
            opts.prefix_tgtlang,
        )?;
        let hyps = model
            .beam_decode(src, tgt, &batch, &search)
            .with_context(|| format!("Decoding failed for sequences {start}..{end}"))?;
        elapsed += timer.elapsed();
        records.extend(nbest_records(start, &hyps, target)?);
        info!("Decoded {} of {} sequences", end, total);
    }

    write_nbest(&opts.out_fname, &records)
        .with_context(|| format!("Failed to write {}", opts.out_fname.display()))?;

    Ok(DecodeStats {
        sequences: total,
        atoms: total * opts.max_seq_len,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use xlit_core::mapping::{SharedMappingClass, parse_representation};
    use xlit_core::model::{Objective, ObjectiveBatch};

    /// Returns each input reversed, then the input as is.
    struct ReverseModel;

    impl SequenceModel for ReverseModel {
        fn compute_loss(&self, _: &Objective, _: ObjectiveBatch<'_>) -> xlit_core::Result<f32> {
            Ok(0.0)
        }

        fn apply_update(&mut self, _: &Objective, _: ObjectiveBatch<'_>) -> xlit_core::Result<()> {
            Ok(())
        }

        fn beam_decode(
            &self,
            _: &Lang,
            _: &Lang,
            batch: &SequenceBatch,
            search: &BeamSearch,
        ) -> xlit_core::Result<Vec<Vec<Hypothesis>>> {
            Ok(batch
                .sequences()
                .iter()
                .map(|s| {
                    let word = s.ids()[..s.length() - 1].to_vec();
                    let mut reversed = word.clone();
                    reversed.reverse();
                    [reversed, word]
                        .into_iter()
                        .take(search.topn())
                        .enumerate()
                        .map(|(rank, tokens)| Hypothesis {
                            tokens,
                            score: -(rank as f32) - 0.5,
                        })
                        .collect()
                })
                .collect())
        }

        fn save(&self, _: &Path) -> xlit_core::Result<()> {
            Ok(())
        }

        fn load(&mut self, _: &Path) -> xlit_core::Result<()> {
            Ok(())
        }
    }

    fn shared_vocab() -> Vocabularies {
        let langs = vec![Lang::new("hi"), Lang::new("kn")];
        let scheme = parse_representation("onehot_shared", &langs).unwrap();
        let mut vocab = Vocabularies::new(scheme, SharedMappingClass::CharacterMapping);
        vocab
            .get_mut(&langs[0])
            .unwrap()
            .register_all(["a", "b", "c", "<hi>", "<kn>"]);
        vocab
    }

    #[test]
    fn writes_nbest_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::write(&input, "a b\nc\nb a c\n").unwrap();

        let opts = DecodeOptions::new("hi-kn".parse().unwrap(), &input, &output)
            .with_beam(2, 2)
            .with_batch_size(2);
        let stats = decode_file(&ReverseModel, &shared_vocab(), &opts).unwrap();
        assert_eq!(stats.sequences, 3);
        assert_eq!(stats.atoms, 90);

        let text = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], format!("0 ||| b a ||| {DECODER_FEATURES} ||| -0.5"));
        assert_eq!(lines[1], format!("0 ||| a b ||| {DECODER_FEATURES} ||| -1.5"));
        assert!(lines[4].starts_with("2 ||| c a b |||"));
    }

    #[test]
    fn markers_are_prefixed_source_first() {
        let vocab = shared_vocab();
        let hi = Lang::new("hi");
        let kn = Lang::new("kn");
        let mapping = vocab.get(&hi).unwrap();
        let batch = SequenceBatch::encode_words(&[vec!["a"]], mapping, 5).unwrap();
        let prefixed = prefix_markers(&batch, &hi, &kn, mapping, true, true).unwrap();
        let words = mapping
            .words_from_ids(&prefixed.sequences()[0].ids()[..3])
            .unwrap();
        assert_eq!(words, vec!["<hi>", "<kn>", "a"]);
    }

    #[test]
    fn unknown_characters_fail() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        fs::write(&input, "a z\n").unwrap();
        let opts = DecodeOptions::new("hi-kn".parse().unwrap(), &input, dir.path().join("out"));
        assert!(decode_file(&ReverseModel, &shared_vocab(), &opts).is_err());
    }

    #[test]
    fn interval_formatting() {
        assert_eq!(format_interval(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_interval(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_interval(Duration::from_secs(100 * 3600)), "100:00:00");
    }

    #[test]
    fn topn_cannot_exceed_beam() {
        let opts = DecodeOptions::new("hi-kn".parse().unwrap(), "in", "out").with_beam(2, 3);
        assert!(opts.validate().is_err());
    }
}
