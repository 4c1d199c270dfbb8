//! Moses-style n-best lists: `sent_no ||| tokens ||| features ||| score`.
//!
//! Candidates for one input sentence sit on consecutive lines sharing the
//! same `sent_no`.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, XlitError};

/// Feature field written by the decoder. Downstream tooling expects the
/// placeholder feature names even though they carry no values.
pub const DECODER_FEATURES: &str = "Distortion0= -1 LM0= -1 WordPenalty0= -1 PhrasePenalty0= -1 TranslationModel0= -1 -1 -1 -1";

/// Feature field written by pivot composition.
pub const PIVOT_FEATURES: &str = "0.0 0.0 0.0 0.0";

const SEPARATOR: &str = "|||";

/// One candidate line of an n-best list.
#[derive(Debug, Clone, PartialEq)]
pub struct NbestRecord {
    pub sent_no: usize,
    pub tokens: Vec<String>,
    pub features: String,
    pub score: f64,
}

impl NbestRecord {
    pub fn new(sent_no: usize, tokens: Vec<String>, features: &str, score: f64) -> Self {
        Self {
            sent_no,
            tokens,
            features: features.to_string(),
            score,
        }
    }

    /// Parse one line. Fields are trimmed; exactly four are required.
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = |reason: String| XlitError::MalformedNbest {
            line: line.to_string(),
            reason,
        };

        let fields: Vec<&str> = line.trim().split(SEPARATOR).map(str::trim).collect();
        let [sent_no, tokens, features, score] = fields.as_slice() else {
            return Err(malformed(format!("expected 4 fields, found {}", fields.len())));
        };

        let sent_no = sent_no
            .parse()
            .map_err(|e| malformed(format!("bad sentence number: {e}")))?;
        let score = score
            .parse()
            .map_err(|e| malformed(format!("bad score: {e}")))?;

        Ok(Self {
            sent_no,
            tokens: tokens.split_whitespace().map(str::to_string).collect(),
            features: features.to_string(),
            score,
        })
    }

    /// The output tokens joined with single spaces.
    pub fn output(&self) -> String {
        self.tokens.join(" ")
    }
}

impl fmt::Display for NbestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {SEPARATOR} {} {SEPARATOR} {} {SEPARATOR} {}",
            self.sent_no,
            self.output(),
            self.features,
            self.score
        )
    }
}

/// Every record of an n-best file in file order. Blank lines are skipped.
pub fn read_nbest(path: &Path) -> Result<Vec<NbestRecord>> {
    let file = File::open(path).map_err(|e| XlitError::io(path, e))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| XlitError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(NbestRecord::parse(&line)?);
    }
    Ok(records)
}

/// Write records one per line.
pub fn write_nbest<'a, I>(path: &Path, records: I) -> Result<()>
where
    I: IntoIterator<Item = &'a NbestRecord>,
{
    let file = File::create(path).map_err(|e| XlitError::io(path, e))?;
    let mut out = BufWriter::new(file);
    for record in records {
        writeln!(out, "{record}").map_err(|e| XlitError::io(path, e))?;
    }
    out.flush().map_err(|e| XlitError::io(path, e))
}

/// Runs of consecutive records sharing a sentence number.
pub fn group_by_sentence(records: &[NbestRecord]) -> impl Iterator<Item = &[NbestRecord]> {
    records.chunk_by(|a, b| a.sent_no == b.sent_no)
}

/// `log(sum(exp(x)))` without overflow. Empty or all `-inf` input gives `-inf`.
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Combine duplicate outputs by summing their probabilities, then order by
/// score, best first. Equal scores stay in output order.
pub fn merge_candidates(mut candidates: Vec<(String, f64)>) -> Vec<(String, f64)> {
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    let mut merged: Vec<(String, f64)> = candidates
        .chunk_by(|a, b| a.0 == b.0)
        .map(|group| {
            let scores: Vec<f64> = group.iter().map(|(_, s)| *s).collect();
            (group[0].0.clone(), logsumexp(&scores))
        })
        .collect();
    merged.sort_by(|a, b| b.1.total_cmp(&a.1));
    merged
}

/// Compose a source→bridge n-best list with a bridge→target one.
///
/// The bridge→target file holds one sentence group per bridge candidate, in
/// the order the candidates appear in the source→bridge file. Each composed
/// candidate scores `bridge score + target score`; duplicates are merged and
/// the best `n` per source sentence are written. Returns the number of lines
/// written.
pub fn transfer_pivot_translate(
    source_bridge: &Path,
    bridge_target: &Path,
    output: &Path,
    n: usize,
) -> Result<usize> {
    let s_b = read_nbest(source_bridge)?;
    let b_t = read_nbest(bridge_target)?;
    let mut target_groups = group_by_sentence(&b_t);

    let mut composed = Vec::new();
    for bridge_group in group_by_sentence(&s_b) {
        let sent_no = bridge_group[0].sent_no;
        let mut candidates = Vec::new();
        for bridge in bridge_group {
            let targets = target_groups.next().ok_or_else(|| {
                XlitError::InvalidArgument(format!(
                    "{bridge_target:?} ran out of candidate groups at source sentence {sent_no}"
                ))
            })?;
            candidates.extend(
                targets
                    .iter()
                    .map(|t| (t.output(), bridge.score + t.score)),
            );
        }

        for (out, score) in merge_candidates(candidates).into_iter().take(n) {
            composed.push(NbestRecord {
                sent_no,
                tokens: out.split_whitespace().map(str::to_string).collect(),
                features: PIVOT_FEATURES.to_string(),
                score,
            });
        }
    }

    debug!(
        "Composed {} pivot candidates from {} + {} lines",
        composed.len(),
        s_b.len(),
        b_t.len()
    );
    write_nbest(output, &composed)?;
    Ok(composed.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_record() {
        let record = NbestRecord::parse("3 ||| a b c ||| f1 f2 ||| -1.23").unwrap();
        assert_eq!(record.sent_no, 3);
        assert_eq!(record.tokens, vec!["a", "b", "c"]);
        assert_eq!(record.features, "f1 f2");
        assert!((record.score + 1.23).abs() < 1e-12);
        assert_eq!(record.to_string(), "3 ||| a b c ||| f1 f2 ||| -1.23");
    }

    #[test]
    fn parse_rejects_bad_lines() {
        assert!(matches!(
            NbestRecord::parse("3 ||| a b ||| -1.0"),
            Err(XlitError::MalformedNbest { .. })
        ));
        assert!(NbestRecord::parse("x ||| a ||| f ||| -1.0").is_err());
        assert!(NbestRecord::parse("0 ||| a ||| f ||| nope").is_err());
    }

    #[test]
    fn logsumexp_handles_extremes() {
        assert!((logsumexp(&[0.0, 0.0]) - 2f64.ln()).abs() < 1e-12);
        assert!((logsumexp(&[-1000.0, -1000.0]) - (-1000.0 + 2f64.ln())).abs() < 1e-9);
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
        assert_eq!(logsumexp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn duplicates_are_merged_in_probability_space() {
        let merged = merge_candidates(vec![
            ("x y".into(), 0.5f64.ln()),
            ("z".into(), 0.4f64.ln()),
            ("x y".into(), 0.25f64.ln()),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].0, "x y");
        assert!((merged[0].1 - 0.75f64.ln()).abs() < 1e-12);
        assert_eq!(merged[1].0, "z");
    }

    #[test]
    fn groups_follow_sentence_numbers() {
        let records: Vec<NbestRecord> = [0, 0, 1, 2, 2, 2]
            .iter()
            .map(|&i| NbestRecord::new(i, vec!["a".into()], PIVOT_FEATURES, -1.0))
            .collect();
        let sizes: Vec<usize> = group_by_sentence(&records).map(<[_]>::len).collect();
        assert_eq!(sizes, vec![2, 1, 3]);
    }

    #[test]
    fn pivot_composition() {
        let dir = tempfile::tempdir().unwrap();
        let s_b = dir.path().join("s_b");
        let b_t = dir.path().join("b_t");
        let out = dir.path().join("out");

        std::fs::write(
            &s_b,
            "0 ||| p ||| f ||| -1.0\n0 ||| q ||| f ||| -2.0\n1 ||| r ||| f ||| -0.5\n",
        )
        .unwrap();
        std::fs::write(
            &b_t,
            "0 ||| x ||| f ||| -1.0\n0 ||| y ||| f ||| -3.0\n\
             1 ||| x ||| f ||| -0.5\n\
             2 ||| z ||| f ||| -0.1\n",
        )
        .unwrap();

        let written = transfer_pivot_translate(&s_b, &b_t, &out, 10).unwrap();
        assert_eq!(written, 3);

        let records = read_nbest(&out).unwrap();
        assert_eq!(records[0].sent_no, 0);
        assert_eq!(records[0].tokens, vec!["x"]);
        let expected = logsumexp(&[-2.0, -2.5]);
        assert!((records[0].score - expected).abs() < 1e-9);
        assert_eq!(records[1].tokens, vec!["y"]);
        assert!((records[1].score + 4.0).abs() < 1e-9);
        assert_eq!(records[2].sent_no, 1);
        assert_eq!(records[2].features, PIVOT_FEATURES);
    }

    #[test]
    fn pivot_composition_requires_enough_bridge_groups() {
        let dir = tempfile::tempdir().unwrap();
        let s_b = dir.path().join("s_b");
        let b_t = dir.path().join("b_t");
        std::fs::write(&s_b, "0 ||| p ||| f ||| -1.0\n0 ||| q ||| f ||| -2.0\n").unwrap();
        std::fs::write(&b_t, "0 ||| x ||| f ||| -1.0\n").unwrap();
        assert!(transfer_pivot_translate(&s_b, &b_t, &dir.path().join("out"), 5).is_err());
    }
}
