pub mod corpus;
pub mod mono;
pub mod parallel;

pub use corpus::{
    convert_output_format, read_monolingual_corpus, strip_markers, write_monolingual_corpus,
};
pub use mono::MonoDataReader;
pub use parallel::ParallelDataReader;
