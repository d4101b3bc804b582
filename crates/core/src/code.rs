//! Source code tokenizers over extracted diff lines.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::helpers::{ascii_ignore, ascii_replace};
use crate::lexer::{lexer_for, LexToken, Language, Lexer, TokenClass};
use crate::CodeTokenizer;

/// How code lines are handed to the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenizerMode {
    /// Every line on its own; a line that does not decode is dropped.
    #[default]
    Lines,
    /// All lines of a chunk joined and lexed together.
    Chunks,
}

impl FromStr for TokenizerMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "lines" => Ok(Self::Lines),
            "chunks" => Ok(Self::Chunks),
            other => Err(Error::Config(format!("unknown lexer mode '{}'", other))),
        }
    }
}

/// Build the code tokenizer for `language` in the given mode.
pub fn code_tokenizer_for(language: Language, mode: TokenizerMode) -> Result<Box<dyn CodeTokenizer>> {
    Ok(match mode {
        TokenizerMode::Lines => Box::new(CodeLinesTokenizer::new(language)?),
        TokenizerMode::Chunks => Box::new(CodeChunkTokenizer::new(language)?),
    })
}

fn keep(token: &LexToken, ignore: &[TokenClass]) -> bool {
    !ignore.contains(&token.class)
}

/// Lexes each code line independently.
///
/// Lines are UTF-8 decoded, trimmed and folded to ASCII (`?` replaces
/// anything else) before lexing. A line that is not valid UTF-8 or fails to
/// lex is dropped with a warning; the rest of the batch is unaffected.
pub struct CodeLinesTokenizer {
    lexer: Box<dyn Lexer>,
}

impl CodeLinesTokenizer {
    pub fn new(language: Language) -> Result<Self> {
        Ok(Self {
            lexer: lexer_for(language)?,
        })
    }
}

impl CodeTokenizer for CodeLinesTokenizer {
    fn language(&self) -> Language {
        self.lexer.language()
    }

    fn tokenize_with_classes(&self, lines: &[Vec<u8>], ignore: &[TokenClass]) -> Vec<LexToken> {
        let mut tokens = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let text = match std::str::from_utf8(line) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(line = index, error = %e, "dropping undecodable code line");
                    continue;
                }
            };
            let folded = ascii_replace(text.trim());
            match self.lexer.lex(&folded) {
                Ok(lexed) => tokens.extend(lexed.into_iter().filter(|t| keep(t, ignore))),
                Err(e) => tracing::warn!(line = index, error = %e, "dropping unlexable code line"),
            }
        }
        tokens
    }
}

/// Lexes a whole chunk of lines as one text.
///
/// Non-ASCII bytes are silently ignored, so multi-line constructs such as
/// block comments are recognised across line boundaries. A chunk that fails
/// to lex yields no tokens.
pub struct CodeChunkTokenizer {
    lexer: Box<dyn Lexer>,
}

impl CodeChunkTokenizer {
    pub fn new(language: Language) -> Result<Self> {
        Ok(Self {
            lexer: lexer_for(language)?,
        })
    }
}

impl CodeTokenizer for CodeChunkTokenizer {
    fn language(&self) -> Language {
        self.lexer.language()
    }

    fn tokenize_with_classes(&self, lines: &[Vec<u8>], ignore: &[TokenClass]) -> Vec<LexToken> {
        let code = lines
            .iter()
            .map(|l| ascii_ignore(l))
            .collect::<Vec<_>>()
            .join("\n");
        match self.lexer.lex(&code) {
            Ok(lexed) => lexed.into_iter().filter(|t| keep(t, ignore)).collect(),
            Err(e) => {
                tracing::warn!(lines = lines.len(), error = %e, "dropping unlexable code chunk");
                Vec::new()
            }
        }
    }
}
