//! # Character Mapping
//!
//! Bidirectional token ⇄ id vocabulary. Reserved tokens take the first ids
//! in every mapping so padding and sequence markers mean the same thing in
//! every language.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XlitError};

/// Padding token.
pub const PAD: &str = "PAD";
/// Start-of-sequence token fed to the decoder.
pub const GO: &str = "GO";
/// End-of-word token.
pub const EOW: &str = "EOW";

pub const PAD_ID: u32 = 0;
pub const GO_ID: u32 = 1;
pub const EOW_ID: u32 = 2;

const RESERVED: [&str; 3] = [PAD, GO, EOW];

/// On-disk layout of a mapping file.
#[derive(Debug, Serialize, Deserialize)]
struct MappingFile {
    char_to_id: BTreeMap<String, u32>,
}

/// Token ⇄ id vocabulary for one language (or shared between several).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// Name used in error messages, usually the language code.
    name: String,
    char_to_id: HashMap<String, u32>,
    id_to_char: Vec<String>,
}

impl Mapping {
    /// Create a mapping holding only the reserved tokens.
    pub fn new(name: impl Into<String>) -> Self {
        let mut mapping = Self {
            name: name.into(),
            char_to_id: HashMap::new(),
            id_to_char: Vec::new(),
        };
        for token in RESERVED {
            mapping.register(token);
        }
        mapping
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a token if it is not registered yet and return its id.
    pub fn register(&mut self, token: &str) -> u32 {
        if let Some(&id) = self.char_to_id.get(token) {
            return id;
        }
        let id = self.id_to_char.len() as u32;
        self.char_to_id.insert(token.to_string(), id);
        self.id_to_char.push(token.to_string());
        id
    }

    /// Register every token of a word.
    pub fn register_all<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) {
        for token in tokens {
            self.register(token);
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.char_to_id.contains_key(token)
    }

    /// Look up the id of a registered token.
    pub fn get_index(&self, token: &str) -> Result<u32> {
        self.char_to_id
            .get(token)
            .copied()
            .ok_or_else(|| XlitError::UnknownToken {
                lang: self.name.clone(),
                token: token.to_string(),
            })
    }

    /// Look up the token registered under `id`.
    pub fn get_char(&self, id: u32) -> Result<&str> {
        self.id_to_char
            .get(id as usize)
            .map(String::as_str)
            .ok_or_else(|| XlitError::UnknownId {
                lang: self.name.clone(),
                id,
            })
    }

    /// Number of registered tokens, reserved ones included.
    pub fn vocab_size(&self) -> usize {
        self.id_to_char.len()
    }

    /// Turn decoder output back into tokens: a leading `GO` run is skipped and
    /// everything from the first `EOW` on is dropped.
    pub fn words_from_ids(&self, ids: &[u32]) -> Result<Vec<&str>> {
        ids.iter()
            .skip_while(|&&id| id == GO_ID)
            .take_while(|&&id| id != EOW_ID)
            .map(|&id| self.get_char(id))
            .collect()
    }

    /// Load a mapping from a JSON file written by [`Mapping::save`].
    pub fn load(name: impl Into<String>, path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| XlitError::io(path, e))?;
        let parsed: MappingFile = serde_json::from_reader(BufReader::new(file))?;
        Self::from_char_to_id(name.into(), parsed.char_to_id)
    }

    fn from_char_to_id(name: String, char_to_id: BTreeMap<String, u32>) -> Result<Self> {
        let size = char_to_id.len();
        let mut id_to_char = vec![None; size];
        for (token, &id) in &char_to_id {
            let slot = id_to_char.get_mut(id as usize).ok_or_else(|| {
                XlitError::InvalidMapping(format!(
                    "{name}: id {id} of {token:?} is outside 0..{size}"
                ))
            })?;
            if let Some(previous) = slot.replace(token.clone()) {
                return Err(XlitError::InvalidMapping(format!(
                    "{name}: id {id} is shared by {previous:?} and {token:?}"
                )));
            }
        }
        // Dense ids and a bijection follow from the checks above.
        let id_to_char: Vec<String> = id_to_char.into_iter().flatten().collect();

        for (id, reserved) in RESERVED.iter().enumerate() {
            if id_to_char.get(id).map(String::as_str) != Some(*reserved) {
                return Err(XlitError::InvalidMapping(format!(
                    "{name}: id {id} must be {reserved:?}"
                )));
            }
        }

        Ok(Self {
            name,
            char_to_id: char_to_id.into_iter().collect(),
            id_to_char,
        })
    }

    /// Persist the mapping as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| XlitError::io(path, e))?;
        let contents = MappingFile {
            char_to_id: self
                .char_to_id
                .iter()
                .map(|(token, &id)| (token.clone(), id))
                .collect(),
        };
        serde_json::to_writer_pretty(BufWriter::new(file), &contents)?;
        Ok(())
    }

    /// Same tokens under the same ids, regardless of name.
    pub fn same_vocabulary(&self, other: &Mapping) -> bool {
        self.id_to_char == other.id_to_char
    }
}
