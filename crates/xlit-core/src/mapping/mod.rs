pub mod character;
pub mod vocabularies;

pub use character::{EOW, EOW_ID, GO, GO_ID, Mapping, PAD, PAD_ID};
pub use vocabularies::{
    Representation, SharedMappingClass, Vocabularies, mapping_path, parse_representation,
};
