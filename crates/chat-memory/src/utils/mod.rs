//! Utilities module - text shaping and key term extraction

pub mod text_utils;
pub mod term_extractor;

pub use text_utils::TextUtils;
pub use term_extractor::{extract_key_terms, TermExtractor};
