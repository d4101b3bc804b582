//! Lexing source text with tree-sitter grammars.
//!
//! The text is parsed with the grammar of its language and the leaves of the
//! syntax tree become tokens. Literals and comments are taken whole, so a
//! string, regex or raw string never leaks its contents as code tokens.
//! Fragments that do not parse (single diff lines usually don't) still
//! produce their leaves through tree-sitter's error recovery; bytes no leaf
//! covers become whitespace or [`TokenClass::Error`] tokens, so the token
//! texts always concatenate back to the input.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser, Tree};

use crate::error::{Error, Result};

/// Coarse lexical category of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenClass {
    Keyword,
    Name,
    Number,
    String,
    Operator,
    Punctuation,
    /// Comments, including C preprocessor directives.
    Comment,
    Whitespace,
    Text,
    Error,
}

/// Classes dropped from code token streams unless configured otherwise.
pub const DEFAULT_IGNORE: [TokenClass; 4] = [
    TokenClass::Comment,
    TokenClass::String,
    TokenClass::Whitespace,
    TokenClass::Text,
];

/// Source language families with a grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Cpp,
    Java,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Cpp,
        Language::Java,
        Language::JavaScript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::JavaScript => "javascript",
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "cpp" | "c++" | "c" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "javascript" | "js" => Ok(Language::JavaScript),
            _ => Err(Error::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// A lexed token with its class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexToken {
    pub text: String,
    pub class: TokenClass,
}

/// Capability to split source text into classified tokens.
pub trait Lexer: Send + Sync {
    fn language(&self) -> Language;

    fn lex(&self, text: &str) -> Result<Vec<LexToken>>;
}

/// Literal nodes kept as a single token.
const STRING_KINDS: &[&str] = &[
    "string",
    "string_literal",
    "raw_string_literal",
    "char_literal",
    "character_literal",
    "template_string",
    "regex",
    "system_lib_string",
];

const NUMBER_KINDS: &[&str] = &[
    "integer",
    "float",
    "number",
    "number_literal",
    "decimal_integer_literal",
    "hex_integer_literal",
    "octal_integer_literal",
    "binary_integer_literal",
    "decimal_floating_point_literal",
    "hex_floating_point_literal",
];

const COMMENT_KINDS: &[&str] = &[
    "comment",
    "line_comment",
    "block_comment",
    "html_comment",
    "hash_bang_line",
];

/// Single-line preprocessor directives, taken whole.
const DIRECTIVE_KINDS: &[&str] = &[
    "preproc_include",
    "preproc_def",
    "preproc_function_def",
    "preproc_call",
];

/// Named leaves that spell a reserved word.
const KEYWORD_KINDS: &[&str] = &[
    "true",
    "false",
    "none",
    "null",
    "null_literal",
    "undefined",
    "this",
    "super",
    "nullptr",
    "auto",
    "primitive_type",
    "void_type",
    "boolean_type",
];

const PUNCTUATION: &[&str] = &["(", ")", "[", "]", "{", "}", ";", ",", ".", ":"];

fn is_word(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Class of a node that is taken whole, without descending.
fn whole_node_class(node: Node) -> Option<TokenClass> {
    if !node.is_named() {
        return None;
    }
    let kind = node.kind();
    if STRING_KINDS.contains(&kind) {
        Some(TokenClass::String)
    } else if COMMENT_KINDS.contains(&kind) || DIRECTIVE_KINDS.contains(&kind) {
        Some(TokenClass::Comment)
    } else if NUMBER_KINDS.contains(&kind) {
        Some(TokenClass::Number)
    } else if kind == "marker_annotation" {
        Some(TokenClass::Name)
    } else {
        None
    }
}

fn leaf_class(node: Node) -> TokenClass {
    let kind = node.kind();
    if node.is_error() {
        return TokenClass::Error;
    }
    if !node.is_named() {
        // anonymous leaves spell their own text
        return if kind.starts_with('#') {
            TokenClass::Comment
        } else if is_word(kind) {
            TokenClass::Keyword
        } else if PUNCTUATION.contains(&kind) {
            TokenClass::Punctuation
        } else {
            TokenClass::Operator
        };
    }
    if KEYWORD_KINDS.contains(&kind) {
        TokenClass::Keyword
    } else if kind == "line_continuation" {
        TokenClass::Text
    } else {
        TokenClass::Name
    }
}

/// Operands of `#if`/`#ifdef`/`#elif` belong to the directive line.
fn directive_operands(node: Node) -> [Option<Node>; 2] {
    let kind = node.kind();
    if kind.starts_with("preproc_if") || kind.starts_with("preproc_elif") {
        [
            node.child_by_field_name("name"),
            node.child_by_field_name("condition"),
        ]
    } else {
        [None, None]
    }
}

struct TokenWalker<'t> {
    text: &'t str,
    pos: usize,
    tokens: Vec<LexToken>,
}

impl<'t> TokenWalker<'t> {
    fn new(text: &'t str) -> Self {
        Self {
            text,
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn push(&mut self, start: usize, end: usize, class: TokenClass) {
        if let Some(piece) = self.text.get(start..end) {
            self.tokens.push(LexToken {
                text: piece.to_string(),
                class,
            });
        }
    }

    /// Emit the uncovered bytes before `end` as whitespace and error runs.
    fn fill_gap(&mut self, end: usize) {
        let Some(gap) = self.text.get(self.pos..end) else {
            return;
        };
        let base = self.pos;
        let mut run_start = 0;
        let mut run_is_space = None;
        for (offset, ch) in gap.char_indices() {
            let is_space = ch.is_whitespace();
            match run_is_space {
                Some(prev) if prev != is_space => {
                    self.push(base + run_start, base + offset, run_class(prev));
                    run_start = offset;
                }
                _ => {}
            }
            run_is_space = Some(is_space);
        }
        if let Some(prev) = run_is_space {
            self.push(base + run_start, end, run_class(prev));
        }
        self.pos = end;
    }

    fn take(&mut self, node: Node, class: TokenClass) {
        let start = node.start_byte().max(self.pos);
        let end = node.end_byte();
        if end <= start {
            return;
        }
        self.fill_gap(start);
        self.push(start, end, class);
        self.pos = end;
    }

    fn visit(&mut self, node: Node) {
        if node.start_byte() == node.end_byte() {
            return;
        }
        if let Some(class) = whole_node_class(node) {
            self.take(node, class);
            return;
        }
        if node.child_count() == 0 {
            self.take(node, leaf_class(node));
            return;
        }
        let operands = directive_operands(node);
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if operands.contains(&Some(child)) {
                self.take(child, TokenClass::Comment);
            } else {
                self.visit(child);
            }
        }
    }

    fn finish(mut self) -> Vec<LexToken> {
        self.fill_gap(self.text.len());
        self.tokens
    }
}

fn run_class(is_space: bool) -> TokenClass {
    if is_space {
        TokenClass::Whitespace
    } else {
        TokenClass::Error
    }
}

thread_local! {
    static PARSERS: RefCell<HashMap<Language, Parser>> = RefCell::new(HashMap::new());
}

fn new_parser(language: Language) -> Result<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| Error::Grammar {
            language,
            reason: e.to_string(),
        })?;
    Ok(parser)
}

/// Parse `text` with this thread's parser for `language`.
fn parse(language: Language, text: &str) -> Result<Tree> {
    PARSERS.with(|cell| {
        let mut parsers = cell.borrow_mut();
        let parser = match parsers.entry(language) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(new_parser(language)?),
        };
        parser.parse(text, None).ok_or_else(|| Error::Grammar {
            language,
            reason: "parser produced no tree".to_string(),
        })
    })
}

/// Lexer backed by the tree-sitter grammar of one language.
pub struct TreeSitterLexer {
    language: Language,
}

impl TreeSitterLexer {
    /// Fails when the grammar cannot be loaded into a parser.
    pub fn new(language: Language) -> Result<Self> {
        new_parser(language)?;
        Ok(Self { language })
    }
}

impl Lexer for TreeSitterLexer {
    fn language(&self) -> Language {
        self.language
    }

    fn lex(&self, text: &str) -> Result<Vec<LexToken>> {
        let tree = parse(self.language, text)?;
        let mut walker = TokenWalker::new(text);
        walker.visit(tree.root_node());
        Ok(walker.finish())
    }
}

/// Lexer for `language`.
pub fn lexer_for(language: Language) -> Result<Box<dyn Lexer>> {
    Ok(Box::new(TreeSitterLexer::new(language)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(language: Language, text: &str) -> Vec<LexToken> {
        TreeSitterLexer::new(language).unwrap().lex(text).unwrap()
    }

    fn visible(language: Language, text: &str) -> Vec<(String, TokenClass)> {
        lex(language, text)
            .into_iter()
            .filter(|t| !DEFAULT_IGNORE.contains(&t.class))
            .map(|t| (t.text, t.class))
            .collect()
    }

    fn texts(language: Language, text: &str) -> Vec<String> {
        visible(language, text).into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_python_tokens() {
        let tokens = visible(Language::Python, "x = foo(1, \"s\")  # note");
        assert_eq!(
            tokens,
            vec![
                ("x".to_string(), TokenClass::Name),
                ("=".to_string(), TokenClass::Operator),
                ("foo".to_string(), TokenClass::Name),
                ("(".to_string(), TokenClass::Punctuation),
                ("1".to_string(), TokenClass::Number),
                (",".to_string(), TokenClass::Punctuation),
                (")".to_string(), TokenClass::Punctuation),
            ]
        );
    }

    #[test]
    fn test_python_keywords_and_docstrings() {
        assert_eq!(
            texts(Language::Python, "def run(self):\n    \"\"\"Run it.\"\"\"\n    return self.x ** 2"),
            vec!["def", "run", "(", "self", ")", ":", "return", "self", ".", "x", "**", "2"]
        );
        let keyword = lex(Language::Python, "def f(): pass");
        assert_eq!(keyword[0].class, TokenClass::Keyword);
        let name = lex(Language::Python, "define");
        assert_eq!(name[0].class, TokenClass::Name);
    }

    #[test]
    fn test_cpp_preprocessor_is_comment() {
        assert!(texts(Language::Cpp, "#include <stdio.h>").is_empty());
        assert_eq!(
            texts(Language::Cpp, "#ifdef DEBUG\nint y = f(x);\n#endif\n"),
            vec!["int", "y", "=", "f", "(", "x", ")", ";"]
        );
        assert_eq!(
            texts(Language::Cpp, "int a = b->c; /* gone */ // gone"),
            vec!["int", "a", "=", "b", "->", "c", ";"]
        );
    }

    #[test]
    fn test_cpp_raw_string_is_one_string() {
        let tokens = lex(Language::Cpp, "auto s = R\"(say \"hi\" now)\";");
        let strings: Vec<&LexToken> = tokens.iter().filter(|t| t.class == TokenClass::String).collect();
        assert_eq!(strings.len(), 1);
        assert_eq!(strings[0].text, "R\"(say \"hi\" now)\"");
        assert_eq!(
            texts(Language::Cpp, "auto s = R\"(say \"hi\" now)\";"),
            vec!["auto", "s", "=", ";"]
        );
    }

    #[test]
    fn test_java_annotation_and_generics() {
        assert_eq!(
            texts(
                Language::Java,
                "class A { @Override public List<String> get() { return null; } }"
            ),
            vec![
                "class", "A", "{", "@Override", "public", "List", "<", "String", ">", "get", "(",
                ")", "{", "return", "null", ";", "}", "}"
            ]
        );
    }

    #[test]
    fn test_javascript_template_literal_is_string() {
        assert_eq!(
            texts(Language::JavaScript, "const f = (a) => a === `x${a}`;"),
            vec!["const", "f", "=", "(", "a", ")", "=>", "a", "===", ";"]
        );
    }

    #[test]
    fn test_javascript_regex_literal_is_string() {
        let tokens = lex(Language::JavaScript, "var re = /foo bar/g;");
        assert!(tokens
            .iter()
            .any(|t| t.class == TokenClass::String && t.text == "/foo bar/g"));
        assert_eq!(
            texts(Language::JavaScript, "var re = /foo bar/g;"),
            vec!["var", "re", "=", ";"]
        );
    }

    #[test]
    fn test_unknown_characters_become_error_tokens() {
        let tokens = lex(Language::Python, "a $ b");
        let errors: String = tokens
            .iter()
            .filter(|t| t.class == TokenClass::Error)
            .map(|t| t.text.as_str())
            .collect();
        assert!(errors.contains('$'));
        assert!(tokens
            .iter()
            .filter(|t| t.class == TokenClass::Name)
            .all(|t| !t.text.contains('$')));
    }

    #[test]
    fn test_lexing_is_lossless() {
        let source = "for (int i = 0; i < n; ++i) {\n\tsum += v[i];\n}\n";
        let joined: String = lex(Language::Cpp, source).into_iter().map(|t| t.text).collect();
        assert_eq!(joined, source);

        let fragment = "    return self.x[";
        let joined: String = lex(Language::Python, fragment).into_iter().map(|t| t.text).collect();
        assert_eq!(joined, fragment);
    }

    #[test]
    fn test_lexer_for_every_language() {
        for language in Language::ALL {
            let lexer = lexer_for(language).unwrap();
            assert_eq!(lexer.language(), language);
            assert!(!lexer.lex("x").unwrap().is_empty());
        }
    }

    #[test]
    fn test_language_from_str() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("JavaScript".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!("c++".parse::<Language>().unwrap(), Language::Cpp);
        assert!(matches!(
            "cobol".parse::<Language>(),
            Err(Error::UnsupportedLanguage(_))
        ));
        for language in Language::ALL {
            assert_eq!(language.as_str().parse::<Language>().unwrap(), language);
        }
    }
}
