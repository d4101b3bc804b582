//! Unified diff parsing.
//!
//! Turns the text of a (possibly multi-file) diff into files, hunks and
//! tagged lines. Git-format patches, which is what the commit stores hold,
//! are parsed by libgit2. Bare `---`/`+++` diffs without a `diff --git`
//! header are not accepted by libgit2 and go through a small line parser.
//!
//! Line payloads stay as raw bytes: diffs scraped from real repositories
//! contain files in all sorts of encodings, and decoding is deferred to the
//! tokenizer so a bad line only costs that line.

use std::sync::LazyLock;

use git2::{Delta, Diff, Patch};
use regex::Regex;

use crate::error::{Error, Result};

static HUNK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap()
});

/// Path used by unified diffs for the missing side of an added or removed file.
pub const DEV_NULL: &str = "/dev/null";

/// Tag of a single hunk line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Added,
    Removed,
    Context,
}

/// A line inside a hunk, without its `+`/`-`/` ` prefix and line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    pub value: Vec<u8>,
}

impl DiffLine {
    pub fn is_added(&self) -> bool {
        self.kind == LineKind::Added
    }

    pub fn is_removed(&self) -> bool {
        self.kind == LineKind::Removed
    }
}

/// One `@@ ... @@` section of a file diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub source_start: usize,
    pub source_length: usize,
    pub target_start: usize,
    pub target_length: usize,
    pub lines: Vec<DiffLine>,
}

/// Whether a file was created, deleted or changed in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Removed,
    Modified,
}

/// All hunks touching a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedFile {
    /// Repository-relative path, taken from whichever side exists.
    pub path: String,
    pub status: FileStatus,
    pub hunks: Vec<Hunk>,
}

impl PatchedFile {
    /// Iterate over every line of every hunk, in order.
    pub fn lines(&self) -> impl Iterator<Item = &DiffLine> {
        self.hunks.iter().flat_map(|h| h.lines.iter())
    }
}

/// A parsed multi-file diff. Files keep the order they appear in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDiff {
    pub files: Vec<PatchedFile>,
}

impl ParsedDiff {
    /// Parse the raw bytes of a diff.
    pub fn parse(input: &[u8]) -> Result<Self> {
        if is_git_patch(input) {
            parse_git(input)
        } else {
            parse_plain(input)
        }
    }

    pub fn modified_files(&self) -> impl Iterator<Item = &PatchedFile> {
        self.files_with(FileStatus::Modified)
    }

    pub fn added_files(&self) -> impl Iterator<Item = &PatchedFile> {
        self.files_with(FileStatus::Added)
    }

    pub fn removed_files(&self) -> impl Iterator<Item = &PatchedFile> {
        self.files_with(FileStatus::Removed)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn files_with(&self, status: FileStatus) -> impl Iterator<Item = &PatchedFile> {
        self.files.iter().filter(move |f| f.status == status)
    }
}

fn is_git_patch(input: &[u8]) -> bool {
    input
        .split(|&b| b == b'\n')
        .any(|line| line.starts_with(b"diff --git "))
}

fn strip_terminator(content: &[u8]) -> &[u8] {
    let content = content.strip_suffix(b"\n").unwrap_or(content);
    content.strip_suffix(b"\r").unwrap_or(content)
}

fn parse_git(input: &[u8]) -> Result<ParsedDiff> {
    let diff = Diff::from_buffer(input)?;
    let mut files = Vec::with_capacity(diff.deltas().len());

    for (idx, delta) in diff.deltas().enumerate() {
        let status = match delta.status() {
            Delta::Added => FileStatus::Added,
            Delta::Deleted => FileStatus::Removed,
            _ => FileStatus::Modified,
        };
        let side = match status {
            FileStatus::Removed => delta.old_file(),
            _ => delta.new_file(),
        };
        let path = side
            .path()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        // binary and unchanged deltas have no patch
        let mut hunks = Vec::new();
        if let Some(patch) = Patch::from_diff(&diff, idx)? {
            for hunk_idx in 0..patch.num_hunks() {
                let (header, line_count) = patch.hunk(hunk_idx)?;
                let mut lines = Vec::with_capacity(line_count);
                for line_idx in 0..line_count {
                    let line = patch.line_in_hunk(hunk_idx, line_idx)?;
                    let kind = match line.origin() {
                        '+' => LineKind::Added,
                        '-' => LineKind::Removed,
                        ' ' => LineKind::Context,
                        // end-of-file newline markers
                        _ => continue,
                    };
                    lines.push(DiffLine {
                        kind,
                        value: strip_terminator(line.content()).to_vec(),
                    });
                }
                hunks.push(Hunk {
                    source_start: header.old_start() as usize,
                    source_length: header.old_lines() as usize,
                    target_start: header.new_start() as usize,
                    target_length: header.new_lines() as usize,
                    lines,
                });
            }
        }

        files.push(PatchedFile { path, status, hunks });
    }

    Ok(ParsedDiff { files })
}

/// Split on `\n`, dropping the empty remainder after a trailing newline and
/// any `\r` left by CRLF files.
fn split_lines(input: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = input
        .split(|&b| b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .collect();
    if input.ends_with(b"\n") {
        lines.pop();
    }
    lines
}

/// Path from a `---`/`+++` header, without the trailing timestamp.
fn header_path(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.split('\t').next().unwrap_or("").trim().to_string()
}

fn file_from_headers(source: String, target: String) -> PatchedFile {
    let (status, raw) = if source == DEV_NULL {
        (FileStatus::Added, target)
    } else if target == DEV_NULL {
        (FileStatus::Removed, source)
    } else {
        (FileStatus::Modified, target)
    };
    let path = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(&raw)
        .to_string();
    PatchedFile {
        path,
        status,
        hunks: Vec::new(),
    }
}

/// Hunk bodies are consumed according to the counts in their header, so
/// removed lines that happen to start with `---` are not mistaken for a new
/// file header.
fn parse_plain(input: &[u8]) -> Result<ParsedDiff> {
    let lines = split_lines(input);
    let mut files: Vec<PatchedFile> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if line.starts_with(b"--- ")
            && lines.get(i + 1).is_some_and(|next| next.starts_with(b"+++ "))
        {
            let source = header_path(&line[4..]);
            let target = header_path(&lines[i + 1][4..]);
            files.push(file_from_headers(source, target));
            i += 2;
            continue;
        }

        if line.starts_with(b"@@ ") {
            let (hunk, next) = parse_hunk(&lines, i)?;
            let file = files.last_mut().ok_or_else(|| Error::MalformedDiff {
                line: i + 1,
                reason: "hunk before any file header".to_string(),
            })?;
            file.hunks.push(hunk);
            i = next;
            continue;
        }

        // index lines, "Only in ...", preamble
        i += 1;
    }

    Ok(ParsedDiff { files })
}

fn parse_hunk(lines: &[&[u8]], start: usize) -> Result<(Hunk, usize)> {
    let header = String::from_utf8_lossy(lines[start]);
    let caps = HUNK_HEADER_RE
        .captures(&header)
        .ok_or_else(|| Error::MalformedDiff {
            line: start + 1,
            reason: format!("invalid hunk header '{}'", header),
        })?;

    let number = |idx: usize, default: usize| -> usize {
        caps.get(idx)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(default)
    };
    let mut hunk = Hunk {
        source_start: number(1, 0),
        source_length: number(2, 1),
        target_start: number(3, 0),
        target_length: number(4, 1),
        lines: Vec::new(),
    };

    let mut source_left = hunk.source_length;
    let mut target_left = hunk.target_length;
    let mut i = start + 1;

    while source_left > 0 || target_left > 0 {
        let line = lines.get(i).ok_or_else(|| Error::MalformedDiff {
            line: i + 1,
            reason: "hunk ended before its declared length".to_string(),
        })?;
        let (kind, value) = match line.first() {
            Some(b'+') => (Some(LineKind::Added), &line[1..]),
            Some(b'-') => (Some(LineKind::Removed), &line[1..]),
            Some(b' ') => (Some(LineKind::Context), &line[1..]),
            // Some tools strip the single space of an empty context line.
            None => (Some(LineKind::Context), &line[..]),
            Some(b'\\') => (None, &line[..]),
            Some(_) => {
                return Err(Error::MalformedDiff {
                    line: i + 1,
                    reason: "unexpected line inside hunk".to_string(),
                })
            }
        };

        if let Some(kind) = kind {
            let (uses_source, uses_target) = match kind {
                LineKind::Added => (false, true),
                LineKind::Removed => (true, false),
                LineKind::Context => (true, true),
            };
            if (uses_source && source_left == 0) || (uses_target && target_left == 0) {
                return Err(Error::MalformedDiff {
                    line: i + 1,
                    reason: "hunk longer than its header declares".to_string(),
                });
            }
            if uses_source {
                source_left -= 1;
            }
            if uses_target {
                target_left -= 1;
            }
            hunk.lines.push(DiffLine {
                kind,
                value: value.to_vec(),
            });
        }
        i += 1;
    }

    while lines.get(i).is_some_and(|l| l.starts_with(b"\\")) {
        i += 1;
    }

    Ok((hunk, i))
}
