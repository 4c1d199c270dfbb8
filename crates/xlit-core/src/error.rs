use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in xlit core operations.
#[derive(Debug, Error)]
pub enum XlitError {
    /// A file could not be read or written.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A built-in pattern failed to compile.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A mapping or configuration file was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A token is not registered in the vocabulary of the given language.
    #[error("token {token:?} is not in the {lang} vocabulary")]
    UnknownToken {
        /// Language whose mapping was consulted.
        lang: String,
        /// The offending token.
        token: String,
    },

    /// An id is outside the vocabulary of the given language.
    #[error("id {id} is not in the {lang} vocabulary")]
    UnknownId {
        /// Language whose mapping was consulted.
        lang: String,
        /// The offending id.
        id: u32,
    },

    /// A persisted mapping failed validation.
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    /// A representation argument could not be parsed or does not cover the
    /// languages in use.
    #[error("malformed representation argument: {0}")]
    MalformedRepresentation(String),

    /// A representation or mapping implementation that this build cannot provide.
    #[error("unsupported {kind}: {name}")]
    Unsupported {
        /// What was requested (e.g. "representation").
        kind: &'static str,
        /// The requested name.
        name: String,
    },

    /// A corpus had no lines.
    #[error("corpus {0:?} is empty")]
    EmptyCorpus(PathBuf),

    /// The two sides of a parallel corpus differ in line count.
    #[error("parallel corpus mismatch: {source_lines} source lines vs {target_lines} target lines")]
    ParallelLengthMismatch {
        /// Lines in the source-side file.
        source_lines: usize,
        /// Lines in the target-side file.
        target_lines: usize,
    },

    /// A line of an n-best list did not have the `idx ||| tokens ||| features ||| score` layout.
    #[error("malformed n-best line {line:?}: {reason}")]
    MalformedNbest {
        /// The offending line.
        line: String,
        /// What was wrong with it.
        reason: String,
    },

    /// An argument was outside its valid range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Beam search could not proceed.
    #[error("decoding error: {0}")]
    Decode(String),

    /// The model or tensor backend failed.
    #[error("model backend error: {0}")]
    Backend(String),

    /// A checkpoint needed for rollback or resume is not on disk.
    #[error("checkpoint for epoch {epoch} not found at {path:?}")]
    CheckpointMissing {
        /// Epoch the checkpoint was saved at.
        epoch: usize,
        /// Expected location.
        path: PathBuf,
    },
}

impl XlitError {
    /// Attach the failing path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for xlit operations.
pub type Result<T> = std::result::Result<T, XlitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = XlitError::UnknownToken {
            lang: "hi".into(),
            token: "x".into(),
        };
        assert_eq!(err.to_string(), "token \"x\" is not in the hi vocabulary");

        let err = XlitError::ParallelLengthMismatch {
            source_lines: 3,
            target_lines: 4,
        };
        assert!(err.to_string().contains("3 source lines"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<XlitError>();
    }
}
