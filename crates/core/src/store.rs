//! Reading the raw commit store.
//!
//! A store is a directory with two parallel sub-directories: `diff/` holding
//! `<sha>.diff` files and `json/` holding `<sha>.json` commit metadata as
//! returned by the hosting service's commit API.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde_json::Value;
use walkdir::WalkDir;

use crate::diff::ParsedDiff;
use crate::error::{Error, Result};

/// A commit as read from the store.
#[derive(Debug, Clone)]
pub struct RawCommit {
    pub sha: String,
    pub metadata: Value,
    pub diff: ParsedDiff,
}

impl RawCommit {
    pub fn message(&self) -> Option<&str> {
        self.metadata.pointer("/commit/message")?.as_str()
    }
}

/// All readable commits of a store, ordered by sha.
#[derive(Debug, Default)]
pub struct RawDataset {
    commits: Vec<RawCommit>,
    /// Ids present in only one of the two directories.
    pub unpaired: usize,
    /// Pairs that could not be read or parsed.
    pub unreadable: usize,
}

/// Ids (file stems) of all files with `extension` directly inside `dir`.
fn discover_ids(dir: &Path, extension: &str) -> BTreeSet<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == extension))
        .filter_map(|e| e.path().file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect()
}

fn read_commit(store: &Path, sha: &str) -> Result<RawCommit> {
    let diff_bytes = fs::read(store.join("diff").join(format!("{}.diff", sha)))?;
    let diff = ParsedDiff::parse(&diff_bytes)?;
    let json_bytes = fs::read(store.join("json").join(format!("{}.json", sha)))?;
    let metadata: Value = serde_json::from_slice(&json_bytes)?;
    Ok(RawCommit {
        sha: sha.to_string(),
        metadata,
        diff,
    })
}

impl RawDataset {
    /// Load every commit of the store at `path`.
    ///
    /// A missing store is fatal. Ids without a partner file and pairs that
    /// fail to read are logged, counted and left out.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(Error::MissingStore(path.to_path_buf()));
        }
        for sub in ["diff", "json"] {
            if !path.join(sub).is_dir() {
                return Err(Error::MissingStore(path.join(sub)));
            }
        }

        let diff_ids = discover_ids(&path.join("diff"), "diff");
        let json_ids = discover_ids(&path.join("json"), "json");
        let unpaired = diff_ids.symmetric_difference(&json_ids).count();
        if unpaired > 0 {
            tracing::warn!(
                unpaired,
                diffs = diff_ids.len(),
                metadata = json_ids.len(),
                "diff and metadata stores differ, using their intersection"
            );
        }

        let mut commits = Vec::new();
        let mut unreadable = 0;
        for sha in diff_ids.intersection(&json_ids) {
            match read_commit(path, sha) {
                Ok(commit) => commits.push(commit),
                Err(e) => {
                    tracing::warn!(sha = %sha, error = %e, "skipping unreadable commit");
                    unreadable += 1;
                }
            }
        }

        tracing::info!(
            commits = commits.len(),
            unreadable,
            store = %path.display(),
            "loaded raw commits"
        );
        Ok(Self {
            commits,
            unpaired,
            unreadable,
        })
    }

    pub fn from_commits(commits: Vec<RawCommit>) -> Self {
        Self {
            commits,
            ..Default::default()
        }
    }

    pub fn commits(&self) -> &[RawCommit] {
        &self.commits
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}
