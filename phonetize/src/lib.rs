//! Decoding of written forms into n-best pronunciations with a joint
//! grapheme-phoneme model WFST trained from an `alignfst` corpus.

pub mod decoder;

pub use decoder::{render_paths, Phoneticizer};
