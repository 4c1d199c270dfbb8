//! # Beam Search
//!
//! Approximate search for the highest scoring output sequences under a
//! step-wise next-token distribution.
//!
//! Every step expands each live hypothesis over the whole vocabulary and
//! pools the expansions with the hypotheses that already ended in `EOW`; the
//! best `beam_width` of the pool survive. Terminal hypotheses are never
//! expanded again but keep competing for a place in the beam. Search stops
//! after `max_len` steps or once every surviving hypothesis is terminal.
//!
//! Scores are raw cumulative log-probabilities with no length normalization,
//! which favours shorter outputs. Equal scores keep their order of discovery:
//! older terminal hypotheses first, then expansions by parent rank and token
//! id. With `beam_width == 1` this is greedy argmax decoding.

use crate::error::{Result, XlitError};
use crate::mapping::{EOW_ID, GO_ID};
use crate::model::Hypothesis;

/// Step-wise next-token distribution of a decoder.
pub trait StepScorer {
    /// Log-probabilities over the target vocabulary for the token following
    /// each prefix of input `example`. Every prefix starts with `GO`, and all
    /// prefixes in one call have the same length.
    fn score(&self, example: usize, prefixes: &[&[u32]]) -> Result<Vec<Vec<f32>>>;
}

/// Adapts a per-prefix closure into a [`StepScorer`].
pub struct FnScorer<F>(pub F);

impl<F> StepScorer for FnScorer<F>
where
    F: Fn(usize, &[u32]) -> Vec<f32>,
{
    fn score(&self, example: usize, prefixes: &[&[u32]]) -> Result<Vec<Vec<f32>>> {
        Ok(prefixes.iter().map(|p| (self.0)(example, p)).collect())
    }
}

/// Beam search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeamSearch {
    beam_width: usize,
    topn: usize,
    max_len: usize,
}

#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<u32>,
    score: f32,
}

#[derive(Debug, Clone, Copy)]
enum Origin {
    Finished(usize),
    Expand { parent: usize, token: u32 },
}

impl BeamSearch {
    /// Requires `1 <= topn <= beam_width` and `max_len >= 1`.
    pub fn new(beam_width: usize, topn: usize, max_len: usize) -> Result<Self> {
        if beam_width == 0 || topn == 0 {
            return Err(XlitError::InvalidArgument(
                "beam width and top-n must be positive".into(),
            ));
        }
        if topn > beam_width {
            return Err(XlitError::InvalidArgument(format!(
                "top-n ({topn}) cannot exceed the beam width ({beam_width})"
            )));
        }
        if max_len == 0 {
            return Err(XlitError::InvalidArgument(
                "max decoding length must be positive".into(),
            ));
        }
        Ok(Self {
            beam_width,
            topn,
            max_len,
        })
    }

    /// Beam width 1, one result.
    pub fn greedy(max_len: usize) -> Self {
        Self {
            beam_width: 1,
            topn: 1,
            max_len: max_len.max(1),
        }
    }

    pub fn beam_width(&self) -> usize {
        self.beam_width
    }

    pub fn topn(&self) -> usize {
        self.topn
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Search every example `0..examples`.
    pub fn search_batch<S: StepScorer + ?Sized>(
        &self,
        scorer: &S,
        examples: usize,
    ) -> Result<Vec<Vec<Hypothesis>>> {
        (0..examples)
            .map(|example| self.search(scorer, example))
            .collect()
    }

    /// Best `topn` hypotheses for one example, best first. Tokens scored
    /// `-inf` are never expanded, so fewer come back when too few tokens are
    /// possible.
    pub fn search<S: StepScorer + ?Sized>(
        &self,
        scorer: &S,
        example: usize,
    ) -> Result<Vec<Hypothesis>> {
        let mut live = vec![Beam {
            tokens: vec![GO_ID],
            score: 0.0,
        }];
        let mut finished: Vec<Beam> = Vec::new();

        for _ in 0..self.max_len {
            if live.is_empty() {
                break;
            }

            let prefixes: Vec<&[u32]> = live.iter().map(|b| b.tokens.as_slice()).collect();
            let distributions = scorer.score(example, &prefixes)?;
            if distributions.len() != live.len() {
                return Err(XlitError::Decode(format!(
                    "scorer returned {} distributions for {} prefixes",
                    distributions.len(),
                    live.len()
                )));
            }

            let mut pool: Vec<(f32, Origin)> = finished
                .iter()
                .enumerate()
                .map(|(i, b)| (b.score, Origin::Finished(i)))
                .collect();
            for (parent, (beam, log_probs)) in live.iter().zip(&distributions).enumerate() {
                for (token, &log_prob) in log_probs.iter().enumerate() {
                    if log_prob.is_nan() {
                        return Err(XlitError::Decode(format!(
                            "NaN log-probability for token {token} of example {example}"
                        )));
                    }
                    if log_prob == f32::NEG_INFINITY {
                        continue;
                    }
                    pool.push((
                        beam.score + log_prob,
                        Origin::Expand {
                            parent,
                            token: token as u32,
                        },
                    ));
                }
            }

            // Stable: ties keep discovery order.
            pool.sort_by(|a, b| b.0.total_cmp(&a.0));
            pool.truncate(self.beam_width);

            let mut next_live = Vec::with_capacity(self.beam_width);
            let mut next_finished = Vec::with_capacity(self.beam_width);
            for (score, origin) in pool {
                match origin {
                    Origin::Finished(i) => next_finished.push(Beam {
                        tokens: std::mem::take(&mut finished[i].tokens),
                        score,
                    }),
                    Origin::Expand { parent, token } => {
                        let mut tokens = Vec::with_capacity(live[parent].tokens.len() + 1);
                        tokens.extend_from_slice(&live[parent].tokens);
                        tokens.push(token);
                        let beam = Beam { tokens, score };
                        if token == EOW_ID {
                            next_finished.push(beam);
                        } else {
                            next_live.push(beam);
                        }
                    }
                }
            }
            finished = next_finished;
            live = next_live;
        }

        let mut ranked = finished;
        ranked.extend(live);
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ranked
            .into_iter()
            .take(self.topn)
            .map(|beam| Hypothesis {
                tokens: trim(&beam.tokens),
                score: beam.score,
            })
            .collect())
    }
}

/// Drop the leading `GO` and everything from the first `EOW` on.
fn trim(tokens: &[u32]) -> Vec<u32> {
    tokens
        .iter()
        .skip_while(|&&t| t == GO_ID)
        .take_while(|&&t| t != EOW_ID)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: u32 = 3;
    const B: u32 = 4;
    const VOCAB: usize = 5;

    fn dist(probs: &[(u32, f32)]) -> Vec<f32> {
        let mut out = vec![f32::NEG_INFINITY; VOCAB];
        for &(token, p) in probs {
            out[token as usize] = p.ln();
        }
        out
    }

    /// Greedy takes `a` first and ends up worse than `b EOW`.
    fn garden_path(_: usize, prefix: &[u32]) -> Vec<f32> {
        match prefix {
            [GO_ID] => dist(&[(A, 0.5), (B, 0.4), (EOW_ID, 0.1)]),
            [GO_ID, A] => dist(&[(EOW_ID, 0.3), (A, 0.35), (B, 0.35)]),
            [GO_ID, B] => dist(&[(EOW_ID, 0.9), (A, 0.05), (B, 0.05)]),
            _ => dist(&[(EOW_ID, 0.9), (A, 0.05), (B, 0.05)]),
        }
    }

    /// Deterministic pseudo-random distribution keyed on the prefix.
    fn hashed(example: usize, prefix: &[u32]) -> Vec<f32> {
        let mut state = example as u64 * 7919 + 17;
        for &t in prefix {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(t as u64 + 1);
        }
        let raw: Vec<f32> = (0..VOCAB)
            .map(|i| {
                let x = state.wrapping_mul(i as u64 + 3).rotate_left(17) % 1000;
                (x as f32 + 1.0) / 1000.0
            })
            .collect();
        let total: f32 = raw.iter().sum();
        raw.iter().map(|p| (p / total).ln()).collect()
    }

    fn greedy_reference(example: usize, max_len: usize) -> (Vec<u32>, f32) {
        let mut prefix = vec![GO_ID];
        let mut score = 0.0;
        for _ in 0..max_len {
            let log_probs = hashed(example, &prefix);
            let mut best = 0;
            for (i, lp) in log_probs.iter().enumerate() {
                if *lp > log_probs[best] {
                    best = i;
                }
            }
            score += log_probs[best];
            prefix.push(best as u32);
            if best as u32 == EOW_ID {
                break;
            }
        }
        (trim(&prefix), score)
    }

    #[test]
    fn beam_beats_greedy_on_garden_path() {
        let scorer = FnScorer(garden_path);

        let greedy = BeamSearch::greedy(10).search(&scorer, 0).unwrap();
        assert_eq!(greedy.len(), 1);
        assert_eq!(greedy[0].tokens, vec![A, A]);

        let beam = BeamSearch::new(2, 2, 10).unwrap().search(&scorer, 0).unwrap();
        assert_eq!(beam[0].tokens, vec![B]);
        assert!((beam[0].score - 0.36f32.ln()).abs() < 1e-5);
        assert_eq!(beam[1].tokens, vec![A, A]);
        assert!((beam[1].score - (0.5f32 * 0.35 * 0.9).ln()).abs() < 1e-5);
    }

    #[test]
    fn width_one_is_greedy_argmax() {
        let scorer = FnScorer(hashed);
        let search = BeamSearch::greedy(12);
        for example in 0..20 {
            let found = search.search(&scorer, example).unwrap();
            let (tokens, score) = greedy_reference(example, 12);
            assert_eq!(found[0].tokens, tokens);
            assert!((found[0].score - score).abs() < 1e-4);
        }
    }

    #[test]
    fn decoding_is_deterministic() {
        let scorer = FnScorer(hashed);
        let search = BeamSearch::new(4, 3, 8).unwrap();
        let first = search.search_batch(&scorer, 10).unwrap();
        let second = search.search_batch(&scorer, 10).unwrap();
        assert_eq!(first, second);
        for hyps in &first {
            assert_eq!(hyps.len(), 3);
            assert!(hyps.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }

    #[test]
    fn stops_at_max_len_without_eow() {
        let scorer = FnScorer(|_, _: &[u32]| dist(&[(A, 0.6), (B, 0.4)]));
        let hyps = BeamSearch::new(2, 2, 4).unwrap().search(&scorer, 0).unwrap();
        assert_eq!(hyps[0].tokens, vec![A; 4]);
        assert_eq!(hyps[1].tokens.len(), 4);
    }

    #[test]
    fn ties_keep_discovery_order() {
        let scorer = FnScorer(|_, prefix: &[u32]| match prefix {
            [GO_ID] => dist(&[(A, 0.5), (B, 0.5)]),
            _ => dist(&[(EOW_ID, 1.0)]),
        });
        let hyps = BeamSearch::new(2, 2, 5).unwrap().search(&scorer, 0).unwrap();
        assert_eq!(hyps[0].tokens, vec![A]);
        assert_eq!(hyps[1].tokens, vec![B]);
    }

    #[test]
    fn impossible_tokens_never_enter_the_beam() {
        let scorer = FnScorer(|_, _: &[u32]| dist(&[(EOW_ID, 1.0)]));
        let hyps = BeamSearch::new(3, 3, 5).unwrap().search(&scorer, 0).unwrap();
        assert_eq!(hyps.len(), 1);
        assert!(hyps[0].tokens.is_empty());
        assert_eq!(hyps[0].score, 0.0);
    }

    #[test]
    fn nan_scores_are_rejected() {
        let scorer = FnScorer(|_, _: &[u32]| vec![f32::NAN; VOCAB]);
        assert!(matches!(
            BeamSearch::greedy(3).search(&scorer, 0),
            Err(XlitError::Decode(_))
        ));
    }

    #[test]
    fn invalid_parameters() {
        assert!(BeamSearch::new(2, 3, 10).is_err());
        assert!(BeamSearch::new(0, 0, 10).is_err());
        assert!(BeamSearch::new(2, 1, 0).is_err());
        assert!(BeamSearch::new(5, 5, 1).is_ok());
    }
}
