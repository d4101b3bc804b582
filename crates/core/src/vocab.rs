//! Code and message vocabularies.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::commit::ParsedCommit;
use crate::error::Result;
use crate::{END, NEW_FILE, NEW_FILE_TOKEN, PAD, START, UNK};

const UNK_NAME: &str = "UNK";
const START_NAME: &str = "CODE_START";
const END_NAME: &str = "CODE_END";

/// Token frequencies in first-encounter order.
#[derive(Default)]
struct Histogram<'a> {
    order: Vec<&'a str>,
    counts: HashMap<&'a str, usize>,
}

impl<'a> Histogram<'a> {
    fn update(&mut self, tokens: &'a [String]) {
        for token in tokens {
            match self.counts.get_mut(token.as_str()) {
                Some(count) => *count += 1,
                None => {
                    self.order.push(token.as_str());
                    self.counts.insert(token.as_str(), 1);
                }
            }
        }
    }

    fn contains(&self, token: &str) -> bool {
        self.counts.contains_key(token)
    }

    fn iter(&self) -> impl Iterator<Item = (&'a str, usize)> + '_ {
        self.order.iter().map(|t| (*t, self.counts[t]))
    }
}

/// Forward and reverse token mappings for code and messages.
///
/// Forward maps also hold every token that was seen but maps to UNK; reverse
/// maps only hold reserved symbols and learned ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub nl_to_num: BTreeMap<String, u32>,
    pub code_to_num: BTreeMap<String, u32>,
    pub num_to_nl: BTreeMap<u32, String>,
    pub num_to_code: BTreeMap<u32, String>,
    /// Highest code id in use.
    pub max_code: u32,
    /// Highest message id in use.
    pub max_nl: u32,
}

fn reserved(with_new_file: bool) -> (BTreeMap<String, u32>, BTreeMap<u32, String>) {
    let names = [(UNK_NAME, UNK), (START_NAME, START), (END_NAME, END)];
    let mut forward: BTreeMap<String, u32> = names
        .into_iter()
        .map(|(t, id)| (t.to_string(), id))
        .collect();
    let mut reverse: BTreeMap<u32, String> = names
        .into_iter()
        .map(|(t, id)| (id, t.to_string()))
        .collect();
    reverse.insert(PAD, UNK_NAME.to_string());
    if with_new_file {
        forward.insert(NEW_FILE_TOKEN.to_string(), NEW_FILE);
        reverse.insert(NEW_FILE, NEW_FILE_TOKEN.to_string());
    }
    (forward, reverse)
}

/// Assign ids starting at `next` to every token more frequent than
/// `threshold`; returns the highest id in use.
fn assign(
    histogram: &Histogram,
    threshold: usize,
    mut next: u32,
    forward: &mut BTreeMap<String, u32>,
    reverse: &mut BTreeMap<u32, String>,
) -> u32 {
    for (token, count) in histogram.iter() {
        // reserved symbols keep their ids
        if forward.contains_key(token) {
            continue;
        }
        if count > threshold {
            forward.insert(token.to_string(), next);
            reverse.insert(next, token.to_string());
            next += 1;
        } else {
            forward.insert(token.to_string(), UNK);
        }
    }
    next - 1
}

impl Vocabulary {
    /// Build both vocabularies from a parsed corpus.
    ///
    /// A token gets its own id iff it occurs more than `threshold` times.
    /// Learned ids are dense, start right after the reserved range and follow
    /// the order in which tokens are first seen, so identical corpora give
    /// identical vocabularies.
    pub fn build(commits: &[ParsedCommit], code_threshold: usize, nl_threshold: usize) -> Self {
        let mut code = Histogram::default();
        let mut nl = Histogram::default();
        for commit in commits {
            code.update(&commit.code_tokens);
            nl.update(&commit.nl_tokens);
        }

        let with_new_file = code.contains(NEW_FILE_TOKEN);
        let (mut code_to_num, mut num_to_code) = reserved(with_new_file);
        let (mut nl_to_num, mut num_to_nl) = reserved(false);

        let code_start = if with_new_file { NEW_FILE + 1 } else { END + 1 };
        let max_code = assign(&code, code_threshold, code_start, &mut code_to_num, &mut num_to_code);
        let max_nl = assign(&nl, nl_threshold, END + 1, &mut nl_to_num, &mut num_to_nl);

        tracing::info!(
            code_tokens = num_to_code.len(),
            nl_tokens = num_to_nl.len(),
            max_code,
            max_nl,
            "built vocabulary"
        );
        Self {
            nl_to_num,
            code_to_num,
            num_to_nl,
            num_to_code,
            max_code,
            max_nl,
        }
    }

    pub fn code_id(&self, token: &str) -> u32 {
        self.code_to_num.get(token).copied().unwrap_or(UNK)
    }

    pub fn nl_id(&self, token: &str) -> u32 {
        self.nl_to_num.get(token).copied().unwrap_or(UNK)
    }

    #[cfg(test)]
    pub(crate) fn code_token(&self, id: u32) -> Option<&str> {
        self.num_to_code.get(&id).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn nl_token(&self, id: u32) -> Option<&str> {
        self.num_to_nl.get(&id).map(String::as_str)
    }

    /// Look up a code token, recording unseen tokens as UNK.
    pub(crate) fn code_id_or_insert(&mut self, token: &str) -> u32 {
        if let Some(id) = self.code_to_num.get(token) {
            return *id;
        }
        self.code_to_num.insert(token.to_string(), UNK);
        UNK
    }

    /// Look up a message token, recording unseen tokens as UNK.
    pub(crate) fn nl_id_or_insert(&mut self, token: &str) -> u32 {
        if let Some(id) = self.nl_to_num.get(token) {
            return *id;
        }
        self.nl_to_num.insert(token.to_string(), UNK);
        UNK
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn commit(code: &[&str], nl: &[&str]) -> ParsedCommit {
        ParsedCommit {
            id: "c".to_string(),
            code: code.join(" "),
            nl_tokens: nl.iter().map(|s| s.to_string()).collect(),
            code_tokens: code.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_single_commit_zero_threshold() {
        let vocab = Vocabulary::build(&[commit(&["a", "a", "b"], &["fix", "bug"])], 0, 0);
        assert_eq!(vocab.code_id("a"), 5);
        assert_eq!(vocab.code_id("b"), 6);
        assert_eq!(vocab.max_code, 6);
        assert_eq!(vocab.nl_id("fix"), 5);
        assert_eq!(vocab.nl_id("bug"), 6);
        assert_eq!(vocab.max_nl, 6);
        assert_eq!(vocab.code_token(5), Some("a"));
        assert_eq!(vocab.nl_token(PAD), Some("UNK"));
        assert_eq!(vocab.nl_token(START), Some("CODE_START"));
        assert_eq!(vocab.code_id("NEW_FILE"), UNK);
    }

    #[test]
    fn test_threshold_is_strict() {
        let corpus = [
            commit(&["x", "y", "y"], &["add"]),
            commit(&["y", "x", "z"], &["add", "more"]),
        ];
        let vocab = Vocabulary::build(&corpus, 2, 1);
        // x occurs twice, y three times, z once
        assert_eq!(vocab.code_id("x"), UNK);
        assert_eq!(vocab.code_id("y"), 5);
        assert_eq!(vocab.code_id("z"), UNK);
        assert!(vocab.code_to_num.contains_key("z"));
        assert_eq!(vocab.num_to_code.values().filter(|t| *t == "x").count(), 0);
        assert_eq!(vocab.nl_id("add"), 5);
        assert_eq!(vocab.nl_id("more"), UNK);
        assert_eq!(vocab.max_nl, 5);
    }

    #[test]
    fn test_new_file_is_reserved_without_frequency_test() {
        let vocab = Vocabulary::build(&[commit(&["NEW_FILE", "a", "a"], &["m"])], 5, 0);
        assert_eq!(vocab.code_id("NEW_FILE"), NEW_FILE);
        assert_eq!(vocab.code_token(NEW_FILE), Some("NEW_FILE"));
        assert_eq!(vocab.code_id("a"), UNK);
        assert_eq!(vocab.max_code, NEW_FILE);

        let vocab = Vocabulary::build(&[commit(&["NEW_FILE", "a"], &["m"])], 0, 0);
        assert_eq!(vocab.code_id("a"), 6);
    }

    #[test]
    fn test_learned_ids_never_hit_reserved_range() {
        let corpus = [commit(&["UNK", "CODE_START", "q"], &["CODE_END", "w"])];
        let vocab = Vocabulary::build(&corpus, 0, 0);
        for (token, id) in vocab.code_to_num.iter() {
            if *id > END {
                assert_eq!(vocab.code_token(*id), Some(token.as_str()));
            }
        }
        assert_eq!(vocab.code_id("UNK"), UNK);
        assert_eq!(vocab.code_id("CODE_START"), START);
        assert_eq!(vocab.nl_id("CODE_END"), END);
        assert_eq!(vocab.code_id("q"), 5);
        assert_eq!(vocab.nl_id("w"), 5);
    }

    #[test]
    fn test_build_is_reproducible() {
        let corpus = [
            commit(&["d", "c", "b", "a"], &["z", "y"]),
            commit(&["a", "e"], &["y", "x"]),
        ];
        let first = Vocabulary::build(&corpus, 0, 0);
        let second = Vocabulary::build(&corpus, 0, 0);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.code_id("d"), 5);
        assert_eq!(first.code_id("e"), 9);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vocab.json");
        let vocab = Vocabulary::build(&[commit(&["a"], &["b"])], 0, 0);
        vocab.save(&path).unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["num_to_code"]["5"], "a");
        assert_eq!(raw["max_nl"], 5);
        assert_eq!(Vocabulary::load(&path).unwrap(), vocab);
    }
}
