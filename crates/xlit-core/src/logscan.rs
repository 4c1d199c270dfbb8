//! Validation-loss scraping from training logs and offline early-stop
//! selection.
//!
//! The trainer logs one line per completed epoch:
//!
//! ```text
//! Epochs Completed : 003	 Validation loss: 12.5
//! ```
//!
//! Lines may carry arbitrary prefixes (timestamps, levels, targets).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use regex::Regex;
use tracing::warn;

use crate::error::{Result, XlitError};

const EPOCH_MARKER: &str = "Epochs Completed";
const LOSS_MARKER: &str = "Validation loss";

/// One scraped validation line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationRecord {
    pub epoch: usize,
    pub loss: f64,
}

/// Extracts [`ValidationRecord`]s from log text.
pub struct ValidationLogScanner {
    re_record: Regex,
}

impl ValidationLogScanner {
    /// # Errors
    ///
    /// Returns `XlitError::Regex` if the built-in pattern fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            re_record: Regex::new(
                r"Epochs Completed\s*:\s*(\d+)\s+Validation loss\s*:\s*([-+0-9.eEinfINFaN]+)",
            )?,
        })
    }

    /// `None` for lines that are not validation lines.
    pub fn parse_line(&self, line: &str) -> Option<ValidationRecord> {
        if !line.contains(EPOCH_MARKER) || !line.contains(LOSS_MARKER) {
            return None;
        }
        let caps = self.re_record.captures(line)?;
        Some(ValidationRecord {
            epoch: caps[1].parse().ok()?,
            loss: caps[2].parse().ok()?,
        })
    }

    /// All validation records of a log file, in file order.
    pub fn scan(&self, path: &Path) -> Result<Vec<ValidationRecord>> {
        let file = File::open(path).map_err(|e| XlitError::io(path, e))?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| XlitError::io(path, e))?;
            match self.parse_line(&line) {
                Some(record) => records.push(record),
                None if line.contains(EPOCH_MARKER) && line.contains(LOSS_MARKER) => {
                    warn!("Skipping unparseable validation line: {}", line.trim());
                }
                None => {}
            }
        }
        Ok(records)
    }
}

/// Validation losses of a log file, in file order.
pub fn read_validation_losses(path: &Path) -> Result<Vec<f64>> {
    let scanner = ValidationLogScanner::new()?;
    Ok(scanner.scan(path)?.into_iter().map(|r| r.loss).collect())
}

/// 1-based epoch of the lowest loss; the first one on ties.
pub fn early_stop_min(losses: &[f64]) -> Option<usize> {
    first_min(losses).map(|(i, _)| i + 1)
}

/// 1-based epoch chosen by a windowed-minimum walk.
///
/// Starting at the first epoch, look at the next `patience` losses from the
/// current position and move to the window's minimum while that strictly
/// improves on the best loss so far.
pub fn early_stop_patience(losses: &[f64], patience: usize) -> Option<usize> {
    if losses.is_empty() || patience == 0 {
        return None;
    }

    let mut pos = 0;
    let mut best = f64::INFINITY;
    while pos < losses.len() {
        let end = (pos + patience).min(losses.len());
        let (offset, value) = first_min(&losses[pos..end])?;
        if value.is_nan() || value >= best {
            break;
        }
        pos += offset;
        best = value;
    }
    Some(pos + 1)
}

fn first_min(values: &[f64]) -> Option<(usize, f64)> {
    let mut iter = values.iter().copied().enumerate();
    let first = iter.next()?;
    Some(iter.fold(first, |best, cur| if cur.1 < best.1 { cur } else { best }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_lines() {
        let scanner = ValidationLogScanner::new().unwrap();
        let line = "2024-01-01T00:00:00Z  INFO xlit_trainer::trainer: Epochs Completed : 003\t Validation loss: 12.5";
        assert_eq!(
            scanner.parse_line(line),
            Some(ValidationRecord {
                epoch: 3,
                loss: 12.5
            })
        );
        assert_eq!(scanner.parse_line("Epochs Completed : 3"), None);
        assert_eq!(scanner.parse_line("step 10 loss 1.0"), None);
    }

    #[test]
    fn scans_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.log");
        std::fs::write(
            &path,
            "starting\n\
             Epochs Completed : 001\t Validation loss: 5.0\n\
             noise\n\
             INFO Epochs Completed : 002\t Validation loss: 4.25\n",
        )
        .unwrap();
        assert_eq!(read_validation_losses(&path).unwrap(), vec![5.0, 4.25]);
    }

    #[test]
    fn min_picks_first_lowest() {
        assert_eq!(early_stop_min(&[5.0, 4.0, 3.0, 4.5, 3.0]), Some(3));
        assert_eq!(early_stop_min(&[]), None);
    }

    #[test]
    fn patience_walk() {
        let losses = [5.0, 4.0, 3.0, 4.5, 5.0, 5.5];
        assert_eq!(early_stop_patience(&losses, 2), Some(3));
        assert_eq!(early_stop_patience(&losses, 10), Some(3));

        // The walk gives up before reaching the global minimum.
        let losses = [5.0, 3.0, 6.0, 7.0, 2.0];
        assert_eq!(early_stop_patience(&losses, 2), Some(2));
        assert_eq!(early_stop_patience(&losses, 4), Some(5));
        assert_eq!(early_stop_min(&losses), Some(5));
    }

    #[test]
    fn patience_degenerate_inputs() {
        assert_eq!(early_stop_patience(&[], 3), None);
        assert_eq!(early_stop_patience(&[1.0], 0), None);
        assert_eq!(early_stop_patience(&[1.0], 1), Some(1));
        assert_eq!(early_stop_patience(&[f64::NAN, 1.0], 1), Some(1));
    }
}
