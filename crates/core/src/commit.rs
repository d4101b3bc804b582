//! Turning raw commits into tokenized training pairs.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::extract::{added_lines, removed_lines, LineExtractor};
use crate::helpers::clean_text;
use crate::lexer::TokenClass;
use crate::pool::WorkerPool;
use crate::store::{RawCommit, RawDataset};
use crate::{CodeTokenizer, NlTokenizer, NEW_FILE_TOKEN};

/// Predicate over raw commits, applied before extraction.
pub type CommitFilter = Box<dyn Fn(&RawCommit) -> bool + Send + Sync>;

/// Predicate over parsed commits, applied after tokenization.
pub type ParsedFilter = Box<dyn Fn(&ParsedCommit) -> bool + Send + Sync>;

/// Message and code lines of a commit, before tokenization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCommit {
    pub id: String,
    pub message: String,
    pub code_lines: Vec<Vec<u8>>,
}

/// A commit with both sides tokenized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommit {
    pub id: String,
    /// Extracted code lines joined by newlines, markers included.
    pub code: String,
    pub nl_tokens: Vec<String>,
    pub code_tokens: Vec<String>,
}

/// The diff touches exactly one file.
pub fn is_atomic(commit: &RawCommit) -> bool {
    commit.diff.file_count() == 1
}

/// The diff adds lines but removes none.
pub fn is_only_added(commit: &RawCommit) -> bool {
    removed_lines(&commit.diff, None).is_empty()
}

/// The diff removes lines but adds none.
pub fn is_only_removed(commit: &RawCommit) -> bool {
    added_lines(&commit.diff, None).is_empty()
}

/// Keep commits with `1..=max_code` code tokens and `1..=max_nl` message tokens.
pub fn length_filter(max_code: usize, max_nl: usize) -> ParsedFilter {
    Box::new(move |pc: &ParsedCommit| {
        (1..=max_code).contains(&pc.code_tokens.len()) && (1..=max_nl).contains(&pc.nl_tokens.len())
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub seen: usize,
    pub filtered: usize,
    pub missing_message: usize,
    pub extracted: usize,
}

/// Extract message and code lines of every commit passing all `filters`.
///
/// A commit without a `commit.message` in its metadata is skipped with a
/// warning, never aborting the extraction.
pub fn extract_commits(
    dataset: &RawDataset,
    extractor: &dyn LineExtractor,
    filters: &[CommitFilter],
) -> (Vec<ExtractedCommit>, ExtractStats) {
    let mut stats = ExtractStats::default();
    let mut commits = Vec::new();

    for commit in dataset.commits() {
        stats.seen += 1;
        if !filters.iter().all(|keep| keep(commit)) {
            stats.filtered += 1;
            continue;
        }
        let Some(message) = commit.message() else {
            tracing::warn!(sha = %commit.sha, "commit metadata has no message, skipping");
            stats.missing_message += 1;
            continue;
        };
        commits.push(ExtractedCommit {
            id: commit.sha.clone(),
            message: clean_text(message),
            code_lines: extractor.get_lines(&commit.diff),
        });
    }

    stats.extracted = commits.len();
    tracing::info!(
        extracted = stats.extracted,
        filtered = stats.filtered,
        missing_message = stats.missing_message,
        "extracted commits"
    );
    (commits, stats)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub parsed: usize,
    pub filtered: usize,
}

/// Split code lines into per-file chunks at `marker` lines.
///
/// Lines before the first marker form a chunk of their own only when there
/// are any; a marker followed directly by another marker yields an empty
/// chunk.
fn segment(lines: &[Vec<u8>], marker: &str) -> Vec<Vec<Vec<u8>>> {
    let mut chunks = Vec::new();
    let mut current: Option<Vec<Vec<u8>>> = None;
    for line in lines {
        if line.as_slice() == marker.as_bytes() {
            if let Some(chunk) = current.take() {
                chunks.push(chunk);
            }
            current = Some(Vec::new());
        } else {
            current.get_or_insert_with(Vec::new).push(line.clone());
        }
    }
    if let Some(chunk) = current {
        chunks.push(chunk);
    }
    chunks
}

fn raw_code_text(lines: &[Vec<u8>]) -> String {
    lines
        .iter()
        .map(|l| String::from_utf8_lossy(l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Tokenizes extracted commits into [`ParsedCommit`]s.
///
/// With a marker configured, code lines are split into files at marker
/// lines, each file is tokenized on its own, and `NEW_FILE` precedes every
/// file's tokens.
pub struct CommitParser<'a> {
    nl: &'a dyn NlTokenizer,
    code: &'a dyn CodeTokenizer,
    ignore: Vec<TokenClass>,
    marker: Option<String>,
    filters: Vec<ParsedFilter>,
}

impl<'a> CommitParser<'a> {
    pub fn new(nl: &'a dyn NlTokenizer, code: &'a dyn CodeTokenizer) -> Self {
        Self {
            nl,
            code,
            ignore: Vec::new(),
            marker: None,
            filters: Vec::new(),
        }
    }

    pub fn with_ignore(mut self, ignore: &[TokenClass]) -> Self {
        self.ignore = ignore.to_vec();
        self
    }

    pub fn with_marker(mut self, marker: Option<&str>) -> Self {
        self.marker = marker.map(str::to_string);
        self
    }

    pub fn with_filter(mut self, filter: ParsedFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Code chunks of `commit`, each tokenized independently.
    fn chunks(&self, commit: &ExtractedCommit) -> Vec<Vec<Vec<u8>>> {
        match &self.marker {
            Some(marker) => segment(&commit.code_lines, marker),
            None => vec![commit.code_lines.clone()],
        }
    }

    fn assemble(&self, commit: &ExtractedCommit, chunk_tokens: Vec<Vec<String>>) -> ParsedCommit {
        let mut code_tokens = Vec::new();
        for tokens in chunk_tokens {
            if self.marker.is_some() {
                code_tokens.push(NEW_FILE_TOKEN.to_string());
            }
            code_tokens.extend(tokens);
        }
        ParsedCommit {
            id: commit.id.clone(),
            code: raw_code_text(&commit.code_lines),
            nl_tokens: self.nl.tokenize(&commit.message),
            code_tokens,
        }
    }

    /// Tokenize a single commit. Filters are not applied.
    pub fn parse(&self, commit: &ExtractedCommit) -> ParsedCommit {
        let chunk_tokens = self
            .chunks(commit)
            .iter()
            .map(|chunk| self.code.tokenize(chunk, &self.ignore))
            .collect();
        self.assemble(commit, chunk_tokens)
    }

    fn keep(&self, parsed: &ParsedCommit) -> bool {
        self.filters.iter().all(|keep| keep(parsed))
    }

    /// Tokenize all commits and drop those failing a filter.
    pub fn parse_all(&self, commits: &[ExtractedCommit]) -> (Vec<ParsedCommit>, ParseStats) {
        let parsed = commits.iter().map(|c| self.parse(c)).collect();
        self.finish(parsed)
    }

    /// Same as [`CommitParser::parse_all`], with every code chunk of every
    /// commit tokenized on `pool`.
    pub fn parse_all_parallel(
        &self,
        commits: &[ExtractedCommit],
        pool: &WorkerPool,
    ) -> Result<(Vec<ParsedCommit>, ParseStats)> {
        let mut counts = Vec::with_capacity(commits.len());
        let mut tasks = Vec::new();
        for commit in commits {
            let chunks = self.chunks(commit);
            counts.push(chunks.len());
            tasks.extend(chunks);
        }

        let mut results = self
            .code
            .batch_tokenize(tasks, &self.ignore, pool)?
            .into_iter();
        let parsed = commits
            .iter()
            .zip(counts)
            .map(|(commit, n)| {
                let chunk_tokens: Vec<Vec<String>> = results.by_ref().take(n).collect();
                self.assemble(commit, chunk_tokens)
            })
            .collect();
        Ok(self.finish(parsed))
    }

    fn finish(&self, parsed: Vec<ParsedCommit>) -> (Vec<ParsedCommit>, ParseStats) {
        let total = parsed.len();
        let kept: Vec<ParsedCommit> = parsed.into_iter().filter(|p| self.keep(p)).collect();
        let stats = ParseStats {
            parsed: kept.len(),
            filtered: total - kept.len(),
        };
        tracing::info!(parsed = stats.parsed, filtered = stats.filtered, "parsed commits");
        (kept, stats)
    }
}
