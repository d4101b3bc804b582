//! Code line extraction from parsed diffs.

use std::str::FromStr;

use crate::diff::{PatchedFile, ParsedDiff};
use crate::error::Error;

/// Predicate deciding whether an extracted line is kept.
pub type LineFilter = Box<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Strategy turning a diff into the ordered code lines used for training.
pub trait LineExtractor {
    fn get_lines(&self, diff: &ParsedDiff) -> Vec<Vec<u8>>;
}

/// Which extraction strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractorKind {
    #[default]
    AddRem,
    PerFile,
}

impl FromStr for ExtractorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add_rem" => Ok(Self::AddRem),
            "per_file" => Ok(Self::PerFile),
            other => Err(Error::Config(format!("unknown code extractor '{}'", other))),
        }
    }
}

/// Build the extractor for `kind`, optionally emitting `marker` before each file.
pub fn build_extractor(kind: ExtractorKind, marker: Option<&str>) -> Box<dyn LineExtractor + Send + Sync> {
    let marker = marker.map(str::to_string);
    match kind {
        ExtractorKind::AddRem => Box::new(AddRemExtractor::new(marker)),
        ExtractorKind::PerFile => Box::new(PerFileExtractor::new(marker)),
    }
}

/// Line filter dropping blank and whitespace-only lines.
pub fn non_blank_line(line: &[u8]) -> bool {
    line.iter().any(|b| !b.is_ascii_whitespace())
}

/// Added lines of modified files, then of added files.
pub fn added_lines(diff: &ParsedDiff, marker: Option<&str>) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for file in diff.modified_files().chain(diff.added_files()) {
        push_file(&mut out, file, marker, |l| l.is_added());
    }
    out
}

/// Removed lines of modified files, then of removed files.
pub fn removed_lines(diff: &ParsedDiff, marker: Option<&str>) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for file in diff.modified_files().chain(diff.removed_files()) {
        push_file(&mut out, file, marker, |l| l.is_removed());
    }
    out
}

fn push_file<F>(out: &mut Vec<Vec<u8>>, file: &PatchedFile, marker: Option<&str>, keep: F)
where
    F: Fn(&crate::diff::DiffLine) -> bool,
{
    if let Some(marker) = marker {
        out.push(marker.as_bytes().to_vec());
    }
    out.extend(file.lines().filter(|l| keep(*l)).map(|l| l.value.clone()));
}

fn apply_filter(lines: Vec<Vec<u8>>, filter: Option<&LineFilter>) -> Vec<Vec<u8>> {
    match filter {
        Some(keep) => lines.into_iter().filter(|l| keep(l.as_slice())).collect(),
        None => lines,
    }
}

/// Emits all added lines followed by all removed lines.
pub struct AddRemExtractor {
    marker: Option<String>,
    line_filter: Option<LineFilter>,
}

impl AddRemExtractor {
    pub fn new(marker: Option<String>) -> Self {
        Self {
            marker,
            line_filter: None,
        }
    }

    pub fn with_line_filter(mut self, filter: LineFilter) -> Self {
        self.line_filter = Some(filter);
        self
    }
}

impl LineExtractor for AddRemExtractor {
    fn get_lines(&self, diff: &ParsedDiff) -> Vec<Vec<u8>> {
        let marker = self.marker.as_deref();
        let mut lines = added_lines(diff, marker);
        lines.extend(removed_lines(diff, marker));
        apply_filter(lines, self.line_filter.as_ref())
    }
}

/// Emits every hunk line, context included, file by file.
///
/// Files are visited modified first, then added, then removed.
pub struct PerFileExtractor {
    marker: Option<String>,
    line_filter: Option<LineFilter>,
}

impl PerFileExtractor {
    pub fn new(marker: Option<String>) -> Self {
        Self {
            marker,
            line_filter: None,
        }
    }

    pub fn with_line_filter(mut self, filter: LineFilter) -> Self {
        self.line_filter = Some(filter);
        self
    }
}

impl LineExtractor for PerFileExtractor {
    fn get_lines(&self, diff: &ParsedDiff) -> Vec<Vec<u8>> {
        let marker = self.marker.as_deref();
        let mut lines = Vec::new();
        for file in diff
            .modified_files()
            .chain(diff.added_files())
            .chain(diff.removed_files())
        {
            push_file(&mut lines, file, marker, |_| true);
        }
        apply_filter(lines, self.line_filter.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(lines: &[Vec<u8>]) -> Vec<String> {
        lines
            .iter()
            .map(|l| String::from_utf8_lossy(l).to_string())
            .collect()
    }

    const ADDED_AND_REMOVED: &str = "\
--- /dev/null
+++ b/new.py
@@ -0,0 +1,2 @@
+def f():
+    return 1
--- a/old.py
+++ /dev/null
@@ -1,1 +0,0 @@
-import sys
";

    const MODIFIED: &str = "\
--- a/m.py
+++ b/m.py
@@ -1,2 +1,2 @@
 a = 0
-b = 1
+b = 2
";

    #[test]
    fn test_add_rem_with_marker() {
        let diff = ParsedDiff::parse(ADDED_AND_REMOVED.as_bytes()).unwrap();
        let extractor = AddRemExtractor::new(Some("NEW_FILE".to_string()));
        assert_eq!(
            text(&extractor.get_lines(&diff)),
            vec!["NEW_FILE", "def f():", "    return 1", "NEW_FILE", "import sys"]
        );
    }

    #[test]
    fn test_add_rem_modified_file_contributes_twice() {
        let diff = ParsedDiff::parse(MODIFIED.as_bytes()).unwrap();
        let extractor = AddRemExtractor::new(Some("M".to_string()));
        assert_eq!(text(&extractor.get_lines(&diff)), vec!["M", "b = 2", "M", "b = 1"]);
    }

    #[test]
    fn test_per_file_keeps_context() {
        let diff = ParsedDiff::parse(MODIFIED.as_bytes()).unwrap();
        let extractor = PerFileExtractor::new(None);
        assert_eq!(
            text(&extractor.get_lines(&diff)),
            vec!["a = 0", "b = 1", "b = 2"]
        );
    }

    #[test]
    fn test_line_filter() {
        let diff = ParsedDiff::parse(b"--- a/x\n+++ b/x\n@@ -0,0 +1,3 @@\n+a\n+   \n+b\n").unwrap();
        let extractor = AddRemExtractor::new(None).with_line_filter(Box::new(non_blank_line));
        assert_eq!(text(&extractor.get_lines(&diff)), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_diff_yields_no_lines() {
        let diff = ParsedDiff::default();
        assert!(AddRemExtractor::new(Some("NEW_FILE".into())).get_lines(&diff).is_empty());
        assert!(PerFileExtractor::new(Some("NEW_FILE".into())).get_lines(&diff).is_empty());
    }

    #[test]
    fn test_added_and_removed_helpers() {
        let diff = ParsedDiff::parse(ADDED_AND_REMOVED.as_bytes()).unwrap();
        assert_eq!(added_lines(&diff, None).len(), 2);
        assert_eq!(removed_lines(&diff, None).len(), 1);
        assert_eq!("per_file".parse::<ExtractorKind>().unwrap(), ExtractorKind::PerFile);
        assert!("bogus".parse::<ExtractorKind>().is_err());
    }
}
