//! Core pipeline for building commit message generation datasets.
//!
//! Commits are read from a raw store (one diff and one metadata file per
//! commit), their diffs reduced to code lines, both sides tokenized, and the
//! resulting corpus turned into a vocabulary plus integer-encoded
//! train/valid/test splits for a sequence-to-sequence model.

use crate::error::Result;
use crate::lexer::LexToken;
use crate::pool::WorkerPool;

/// Tokenizer for raw code lines.
///
/// Lines are raw bytes as they appear in the diff. Tokens whose class is in
/// `ignore` are dropped before they are returned.
pub trait CodeTokenizer: Send + Sync {
    fn language(&self) -> Language;

    /// Tokenize `lines`, keeping the lexical class of every token.
    fn tokenize_with_classes(&self, lines: &[Vec<u8>], ignore: &[TokenClass]) -> Vec<LexToken>;

    /// Tokenize `lines` into token strings.
    fn tokenize(&self, lines: &[Vec<u8>], ignore: &[TokenClass]) -> Vec<String> {
        self.tokenize_with_classes(lines, ignore)
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    /// Tokenize independent chunks on `pool`. Results follow chunk order.
    fn batch_tokenize(
        &self,
        chunks: Vec<Vec<Vec<u8>>>,
        ignore: &[TokenClass],
        pool: &WorkerPool,
    ) -> Result<Vec<Vec<String>>> {
        pool.run(chunks, |chunk| self.tokenize(&chunk, ignore))
    }
}

/// Tokenizer for natural-language commit messages.
pub trait NlTokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

// Forwarding impls for borrowed tokenizers
impl<T: CodeTokenizer + ?Sized> CodeTokenizer for &T {
    fn language(&self) -> Language {
        (*self).language()
    }

    fn tokenize_with_classes(&self, lines: &[Vec<u8>], ignore: &[TokenClass]) -> Vec<LexToken> {
        (*self).tokenize_with_classes(lines, ignore)
    }
}

impl<T: NlTokenizer + ?Sized> NlTokenizer for &T {
    fn tokenize(&self, text: &str) -> Vec<String> {
        (*self).tokenize(text)
    }
}

pub mod code;
pub mod commit;
pub mod dataset;
pub mod diff;
pub mod error;
pub mod extract;
mod helpers;
pub mod lexer;
pub mod nl;
pub mod pipeline;
pub mod pool;
pub mod store;
pub mod vocab;

pub use code::{code_tokenizer_for, CodeChunkTokenizer, CodeLinesTokenizer, TokenizerMode};
pub use commit::{extract_commits, length_filter, CommitParser, ExtractedCommit, ParsedCommit};
pub use dataset::{split_list, write_reference, DatasetEncoder, EncodedExample, LengthBounds, Split};
pub use diff::ParsedDiff;
pub use error::Error;
pub use extract::{build_extractor, AddRemExtractor, ExtractorKind, LineExtractor, PerFileExtractor};
pub use helpers::{ascii_ignore, ascii_replace, clean_text, mean, strip_non_ascii};
pub use lexer::{lexer_for, Language, Lexer, TokenClass, DEFAULT_IGNORE};
pub use nl::TreebankTokenizer;
pub use pipeline::{
    build_dataset, load_corpus, preprocess, study, BuildConfig, BuildResult, PreprocessConfig,
    PreprocessResult, StudyConfig, StudyResult,
};
pub use store::{RawCommit, RawDataset};
pub use vocab::Vocabulary;

/// Padding id.
pub const PAD: u32 = 1;

/// Id of every token outside the dense vocabulary.
pub const UNK: u32 = 2;

/// Id opening every encoded message.
pub const START: u32 = 3;

/// Id closing every encoded message.
pub const END: u32 = 4;

/// Id of the file boundary token, reserved only when the corpus contains it.
pub const NEW_FILE: u32 = 5;

/// Token and marker line used to separate files in a multi-file diff.
pub const NEW_FILE_TOKEN: &str = "NEW_FILE";

/// Default maximum code length, in tokens.
pub const MAX_CODE_LENGTH: usize = 100;

/// Default maximum message length, in tokens.
pub const MAX_NL_LENGTH: usize = 100;

/// Default frequency at or below which a token becomes UNK.
pub const UNK_THRESHOLD: usize = 2;

/// Default share of the corpus used for training.
pub const TRAIN_RATIO: f64 = 0.8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenizer_references_delegate() {
        let code = CodeLinesTokenizer::new(Language::Java).unwrap();
        let by_ref = &code;
        assert_eq!(CodeTokenizer::language(&by_ref), Language::Java);
        let lines = vec![b"int x = 1; // note".to_vec()];
        let classes: Vec<TokenClass> = by_ref
            .tokenize_with_classes(&lines, &DEFAULT_IGNORE)
            .into_iter()
            .map(|t| t.class)
            .collect();
        assert_eq!(
            classes,
            vec![
                TokenClass::Keyword,
                TokenClass::Name,
                TokenClass::Operator,
                TokenClass::Number,
                TokenClass::Punctuation
            ]
        );
        let nl = &TreebankTokenizer;
        assert_eq!(NlTokenizer::tokenize(&nl, "Fix it."), vec!["Fix", "it", "."]);
    }
}
