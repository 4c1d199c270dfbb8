//! # Representation Schemes
//!
//! Decides, per language, whether a language owns its mapping or shares one
//! with the other languages, and loads/saves the whole set from a mapping
//! directory (`mapping_<lang>.json`).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, XlitError};
use crate::lang::Lang;
use crate::mapping::character::Mapping;

/// How a language's characters are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Language-specific one-hot vocabulary.
    Onehot,
    /// One-hot vocabulary shared by every `OnehotShared` language.
    OnehotShared,
}

impl Representation {
    pub fn is_shared(self) -> bool {
        matches!(self, Self::OnehotShared)
    }
}

impl FromStr for Representation {
    type Err = XlitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "onehot" => Ok(Self::Onehot),
            "onehot_shared" => Ok(Self::OnehotShared),
            "phonetic" | "onehot_and_phonetic" => Err(XlitError::Unsupported {
                kind: "representation",
                name: s.to_string(),
            }),
            other => Err(XlitError::MalformedRepresentation(format!(
                "unknown representation {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Onehot => f.write_str("onehot"),
            Self::OnehotShared => f.write_str("onehot_shared"),
        }
    }
}

/// Implementation backing the shared mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharedMappingClass {
    #[default]
    CharacterMapping,
}

impl FromStr for SharedMappingClass {
    type Err = XlitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CharacterMapping" => Ok(Self::CharacterMapping),
            "IndicPhoneticMapping" => Err(XlitError::Unsupported {
                kind: "shared mapping class",
                name: s.to_string(),
            }),
            other => Err(XlitError::MalformedRepresentation(format!(
                "unknown shared mapping class {other:?}"
            ))),
        }
    }
}

/// Parse a representation argument for `langs`.
///
/// Either a single scheme applied to every language (`onehot`) or a
/// per-language list (`hi:onehot,kn:onehot_shared`) that must mention every
/// language in `langs`.
pub fn parse_representation(arg: &str, langs: &[Lang]) -> Result<BTreeMap<Lang, Representation>> {
    if !arg.contains(':') {
        let representation: Representation = arg.trim().parse()?;
        return Ok(langs
            .iter()
            .map(|lang| (lang.clone(), representation))
            .collect());
    }

    let mut scheme = BTreeMap::new();
    for entry in arg.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (lang, representation) = entry.split_once(':').ok_or_else(|| {
            XlitError::MalformedRepresentation(format!("entry {entry:?} is not lang:scheme"))
        })?;
        let lang: Lang = lang.parse()?;
        if scheme.insert(lang.clone(), representation.trim().parse()?).is_some() {
            return Err(XlitError::MalformedRepresentation(format!(
                "language {lang} given twice"
            )));
        }
    }
    if let Some(missing) = langs.iter().find(|lang| !scheme.contains_key(*lang)) {
        return Err(XlitError::MalformedRepresentation(format!(
            "no representation given for {missing}"
        )));
    }
    Ok(scheme)
}

/// Path of the mapping file for `lang` inside `dir`.
pub fn mapping_path(dir: &Path, lang: &Lang) -> PathBuf {
    dir.join(format!("mapping_{lang}.json"))
}

/// The mappings of every language in a run.
#[derive(Debug, Clone)]
pub struct Vocabularies {
    scheme: BTreeMap<Lang, Representation>,
    own: BTreeMap<Lang, Mapping>,
    shared: Mapping,
    shared_class: SharedMappingClass,
}

impl Vocabularies {
    /// Fresh vocabularies holding only the reserved tokens.
    pub fn new(scheme: BTreeMap<Lang, Representation>, shared_class: SharedMappingClass) -> Self {
        let own = scheme
            .iter()
            .filter(|(_, r)| !r.is_shared())
            .map(|(lang, _)| (lang.clone(), Mapping::new(lang.as_str())))
            .collect();
        Self {
            scheme,
            own,
            shared: Mapping::new("shared"),
            shared_class,
        }
    }

    pub fn languages(&self) -> impl Iterator<Item = &Lang> {
        self.scheme.keys()
    }

    pub fn representation(&self, lang: &Lang) -> Result<Representation> {
        self.scheme
            .get(lang)
            .copied()
            .ok_or_else(|| {
                XlitError::MalformedRepresentation(format!("language {lang} is not configured"))
            })
    }

    pub fn shared_class(&self) -> SharedMappingClass {
        self.shared_class
    }

    /// Name of the parameter scope that owns `lang`'s vocabulary: the language
    /// itself, or `shared`.
    pub fn scope(&self, lang: &Lang) -> Result<String> {
        Ok(if self.representation(lang)?.is_shared() {
            "shared".to_string()
        } else {
            lang.to_string()
        })
    }

    pub fn get(&self, lang: &Lang) -> Result<&Mapping> {
        if self.representation(lang)?.is_shared() {
            return Ok(&self.shared);
        }
        self.own
            .get(lang)
            .ok_or_else(|| XlitError::MalformedRepresentation(format!("no mapping for {lang}")))
    }

    pub fn get_mut(&mut self, lang: &Lang) -> Result<&mut Mapping> {
        if self.representation(lang)?.is_shared() {
            return Ok(&mut self.shared);
        }
        self.own
            .get_mut(lang)
            .ok_or_else(|| XlitError::MalformedRepresentation(format!("no mapping for {lang}")))
    }

    /// Load `mapping_<lang>.json` for every configured language. All files of
    /// shared languages must hold the same vocabulary.
    pub fn load_dir(
        dir: &Path,
        scheme: BTreeMap<Lang, Representation>,
        shared_class: SharedMappingClass,
    ) -> Result<Self> {
        let mut vocab = Self::new(scheme, shared_class);
        let mut shared_loaded = false;
        let langs: Vec<(Lang, Representation)> =
            vocab.scheme.iter().map(|(l, r)| (l.clone(), *r)).collect();

        for (lang, representation) in langs {
            let path = mapping_path(dir, &lang);
            if representation.is_shared() {
                let mapping = Mapping::load("shared", &path)?;
                if shared_loaded && !vocab.shared.same_vocabulary(&mapping) {
                    return Err(XlitError::InvalidMapping(format!(
                        "{path:?} disagrees with the other shared mapping files"
                    )));
                }
                vocab.shared = mapping;
                shared_loaded = true;
            } else {
                vocab.own.insert(lang.clone(), Mapping::load(lang.as_str(), &path)?);
            }
            debug!(%lang, path = %path.display(), "loaded mapping");
        }
        Ok(vocab)
    }

    /// Write `mapping_<lang>.json` for every configured language.
    pub fn save_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| XlitError::io(dir, e))?;
        for lang in self.scheme.keys() {
            self.get(lang)?.save(&mapping_path(dir, lang))?;
        }
        Ok(())
    }
}
