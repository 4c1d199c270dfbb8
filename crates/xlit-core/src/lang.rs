//! Language codes and ordered language pairs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XlitError};

/// A language code such as `hi` or `kn`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lang(String);

impl Lang {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The marker token used to tag a sequence with this language, e.g. `<kn>`.
    pub fn marker_token(&self) -> String {
        format!("<{}>", self.0)
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Lang {
    type Err = XlitError;

    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim();
        if code.is_empty() || code.contains(|c: char| c == '-' || c.is_whitespace()) {
            return Err(XlitError::InvalidArgument(format!(
                "invalid language code {s:?}"
            )));
        }
        Ok(Self(code.to_string()))
    }
}

/// An ordered pair of languages, written `first-second`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LangPair {
    pub first: Lang,
    pub second: Lang,
}

impl LangPair {
    pub fn new(first: Lang, second: Lang) -> Self {
        Self { first, second }
    }

    /// The same pair with its direction flipped.
    pub fn reversed(&self) -> Self {
        Self::new(self.second.clone(), self.first.clone())
    }
}

impl fmt::Display for LangPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

impl FromStr for LangPair {
    type Err = XlitError;

    fn from_str(s: &str) -> Result<Self> {
        let (first, second) = s.trim().split_once('-').ok_or_else(|| {
            XlitError::InvalidArgument(format!("language pair {s:?} is not of the form a-b"))
        })?;
        Ok(Self::new(first.parse()?, second.parse()?))
    }
}

/// Parse a comma separated list such as `hi,kn` or `hi-kn,kn-hi`.
pub fn parse_list<T: FromStr<Err = XlitError>>(list: &str) -> Result<Vec<T>> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::parse)
        .collect()
}
