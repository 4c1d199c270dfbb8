//! Line-oriented corpus files: one whitespace-tokenized word per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Result, XlitError};
use crate::mapping::{EOW, GO};

/// Read every line of `path` as a list of tokens. Empty lines are kept.
pub fn read_monolingual_corpus(path: &Path) -> Result<Vec<Vec<String>>> {
    let file = File::open(path).map_err(|e| XlitError::io(path, e))?;
    BufReader::new(file)
        .lines()
        .map(|line| {
            let line = line.map_err(|e| XlitError::io(path, e))?;
            Ok(line.split_whitespace().map(str::to_string).collect())
        })
        .collect()
}

/// Write one space-joined word per line.
pub fn write_monolingual_corpus<W, S>(path: &Path, words: W) -> Result<()>
where
    W: IntoIterator<Item = Vec<S>>,
    S: AsRef<str>,
{
    let file = File::create(path).map_err(|e| XlitError::io(path, e))?;
    let mut out = BufWriter::new(file);
    for word in words {
        let line = word
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join(" ");
        writeln!(out, "{line}").map_err(|e| XlitError::io(path, e))?;
    }
    out.flush().map_err(|e| XlitError::io(path, e))
}

/// Drop a leading run of `GO` markers and everything from the first `EOW`.
pub fn strip_markers<S: AsRef<str>>(tokens: &[S]) -> Vec<&str> {
    tokens
        .iter()
        .map(AsRef::as_ref)
        .skip_while(|t| *t == GO)
        .take_while(|t| *t != EOW)
        .collect()
}

/// Rewrite a tokenized output corpus with `GO`/`EOW` markers stripped.
pub fn convert_output_format(input: &Path, output: &Path) -> Result<()> {
    let words = read_monolingual_corpus(input)?;
    write_monolingual_corpus(output, words.iter().map(|w| strip_markers(w)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_markers_trims_both_ends() {
        assert_eq!(strip_markers(&["GO", "GO", "a", "b", "EOW", "c"]), vec!["a", "b"]);
        assert_eq!(strip_markers(&["a", "GO"]), vec!["a", "GO"]);
        assert!(strip_markers::<&str>(&[]).is_empty());
    }

    #[test]
    fn read_keeps_empty_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus");
        std::fs::write(&path, "a b\n\nc\n").unwrap();
        let words = read_monolingual_corpus(&path).unwrap();
        assert_eq!(words.len(), 3);
        assert!(words[1].is_empty());
        assert_eq!(words[2], vec!["c"]);
    }

    #[test]
    fn convert_output_format_strips_markers() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::write(&input, "GO a b EOW PAD\nGO c EOW\n").unwrap();
        convert_output_format(&input, &output).unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "a b\nc\n");
    }

    #[test]
    fn missing_corpus_reports_path() {
        let err = read_monolingual_corpus(Path::new("/nonexistent/corpus")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/corpus"));
    }
}
