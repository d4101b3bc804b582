//! Integer encoding, length filtering and train/valid/test splitting.

use std::fs;
use std::path::Path;

use csv::{QuoteStyle, WriterBuilder};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::commit::ParsedCommit;
use crate::error::Result;
use crate::helpers::strip_non_ascii;
use crate::vocab::Vocabulary;

/// One training example as written to the dataset files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedExample {
    pub id: String,
    pub code: String,
    /// Number of code tokens.
    pub code_sizes: usize,
    pub code_num: Vec<u32>,
    /// Message ids wrapped in START and END.
    pub nl_num: Vec<u32>,
}

/// `(id, message tokens joined by spaces)` used for scoring.
pub type Reference = (String, String);

/// Exclusive upper bounds on encoded lengths. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LengthBounds {
    pub max_code: Option<usize>,
    pub max_nl: Option<usize>,
}

impl LengthBounds {
    pub fn new(max_code: Option<usize>, max_nl: Option<usize>) -> Self {
        Self { max_code, max_nl }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    fn admits(&self, example: &EncodedExample) -> bool {
        self.max_code.map_or(true, |max| example.code_num.len() < max)
            && self.max_nl.map_or(true, |max| example.nl_num.len() < max)
    }
}

/// Examples kept by [`DatasetEncoder::build`].
#[derive(Debug, Default)]
pub struct Encoded {
    pub examples: Vec<EncodedExample>,
    /// One entry per kept example, in the same order.
    pub references: Vec<Reference>,
    pub skipped: usize,
}

/// Encodes parsed commits against a vocabulary.
///
/// The encoder owns the vocabulary for the duration of a pass: tokens it has
/// never seen are recorded as UNK so later lookups stay consistent.
pub struct DatasetEncoder {
    vocab: Vocabulary,
}

impl DatasetEncoder {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn into_vocabulary(self) -> Vocabulary {
        self.vocab
    }

    pub fn encode(&mut self, commit: &ParsedCommit) -> EncodedExample {
        let code_num = commit
            .code_tokens
            .iter()
            .map(|t| self.vocab.code_id_or_insert(t))
            .collect();

        let mut nl_num = Vec::with_capacity(commit.nl_tokens.len() + 2);
        nl_num.push(self.vocab.nl_id("CODE_START"));
        nl_num.extend(commit.nl_tokens.iter().map(|t| self.vocab.nl_id_or_insert(t)));
        nl_num.push(self.vocab.nl_id("CODE_END"));

        EncodedExample {
            id: commit.id.clone(),
            code: commit.code.clone(),
            code_sizes: commit.code_tokens.len(),
            code_num,
            nl_num,
        }
    }

    /// Encode `commits`, keeping those within `bounds`.
    pub fn build(&mut self, commits: &[ParsedCommit], bounds: LengthBounds) -> Encoded {
        let mut out = Encoded::default();
        for commit in commits {
            let example = self.encode(commit);
            if bounds.admits(&example) {
                out.references.push((commit.id.clone(), commit.nl_tokens.join(" ")));
                out.examples.push(example);
            } else {
                out.skipped += 1;
            }
        }
        tracing::info!(kept = out.examples.len(), skipped = out.skipped, "encoded examples");
        out
    }
}

/// Train, validation and test partitions of a corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct Split<T> {
    pub train: Vec<T>,
    pub valid: Vec<T>,
    pub test: Vec<T>,
}

/// Partition `items` in a single randomized pass.
///
/// Without `generate_test`, items go to train while the draw is at most
/// `ratio` and train is below `floor(n * ratio)`, everything else to valid,
/// and test is a copy of valid. With `generate_test`, up to
/// `floor(n * ratio)` items form a development pool split roughly 90/10 into
/// train and valid (train capped at 90% of the pool); the rest is test.
/// Outcomes depend on item order and on `rng`.
pub fn split_list<T, R>(items: Vec<T>, ratio: f64, generate_test: bool, rng: &mut R) -> Split<T>
where
    T: Clone,
    R: Rng,
{
    let dev_size = (items.len() as f64 * ratio) as usize;
    let mut train = Vec::new();
    let mut valid = Vec::new();
    let mut test = Vec::new();

    if generate_test {
        let train_size = (dev_size as f64 * 0.9) as usize;
        for item in items {
            let r: f64 = rng.gen();
            if r <= ratio && train.len() + valid.len() < dev_size {
                let rr: f64 = rng.gen();
                if rr < 0.9 && train.len() < train_size {
                    train.push(item);
                } else {
                    valid.push(item);
                }
            } else {
                test.push(item);
            }
        }
    } else {
        for item in items {
            let r: f64 = rng.gen();
            if r <= ratio && train.len() < dev_size {
                train.push(item);
            } else {
                valid.push(item);
            }
        }
        test = valid.clone();
    }

    Split { train, valid, test }
}

/// Write references as `id<TAB>message` lines with non-ASCII characters
/// removed. Returns the number of lines written.
pub fn write_reference(path: &Path, references: &[Reference]) -> Result<usize> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .has_headers(false)
        .from_path(path)?;

    let mut written = 0;
    for (id, message) in references {
        let message = strip_non_ascii(message);
        match writer.write_record([id.as_str(), message.as_str()]) {
            Ok(()) => written += 1,
            Err(e) => tracing::warn!(id = %id, error = %e, "skipping reference line"),
        }
    }
    writer.flush()?;
    Ok(written)
}

/// Write encoded examples as a JSON array.
pub fn save_examples(path: &Path, examples: &[EncodedExample]) -> Result<()> {
    fs::write(path, serde_json::to_string(examples)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{END, START, UNK};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn commit(id: &str, code: &[&str], nl: &[&str]) -> ParsedCommit {
        ParsedCommit {
            id: id.to_string(),
            code: code.join(" "),
            nl_tokens: nl.iter().map(|s| s.to_string()).collect(),
            code_tokens: code.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn encoder(corpus: &[ParsedCommit]) -> DatasetEncoder {
        DatasetEncoder::new(Vocabulary::build(corpus, 0, 0))
    }

    #[test]
    fn test_encode_wraps_message() {
        let corpus = [commit("c1", &["a", "b", "a"], &["fix", "it"])];
        let mut enc = encoder(&corpus);
        let example = enc.encode(&corpus[0]);
        assert_eq!(example.code_num, vec![5, 6, 5]);
        assert_eq!(example.nl_num, vec![START, 5, 6, END]);
        assert_eq!(example.code_sizes, 3);
        assert_eq!(example.id, "c1");
    }

    #[test]
    fn test_code_length_bound_skips_exactly_one() {
        let corpus = [
            commit("long", &["a", "b", "c", "d", "e", "f"], &["m"]),
            commit("short", &["a", "b", "c", "d"], &["m"]),
        ];
        let mut enc = encoder(&corpus);
        let out = enc.build(&corpus, LengthBounds::new(Some(5), None));
        assert_eq!(out.skipped, 1);
        assert_eq!(out.examples.len(), 1);
        assert_eq!(out.examples[0].id, "short");
        assert_eq!(out.references, vec![("short".to_string(), "m".to_string())]);
    }

    #[test]
    fn test_bounds_are_exclusive() {
        // nl_num holds three ids: START, m, END
        let corpus = [commit("c", &["a", "b"], &["m"])];
        let mut enc = encoder(&corpus);
        assert_eq!(enc.build(&corpus, LengthBounds::new(Some(2), None)).skipped, 1);
        assert_eq!(enc.build(&corpus, LengthBounds::new(None, Some(3))).skipped, 1);
        let kept = enc.build(&corpus, LengthBounds::new(Some(3), Some(4)));
        assert_eq!(kept.examples.len(), 1);
        for example in &kept.examples {
            assert!(example.code_num.len() < 3 && example.nl_num.len() < 4);
        }
    }

    #[test]
    fn test_unbounded_keeps_everything_with_references() {
        let corpus = [
            commit("x", &["a"; 50], &["add", "stuff"]),
            commit("y", &[], &["empty"]),
        ];
        let mut enc = encoder(&corpus);
        let out = enc.build(&corpus, LengthBounds::unbounded());
        assert_eq!(out.skipped, 0);
        assert_eq!(
            out.references,
            vec![
                ("x".to_string(), "add stuff".to_string()),
                ("y".to_string(), "empty".to_string())
            ]
        );
    }

    #[test]
    fn test_unseen_tokens_become_unk_and_stick() {
        let train = [commit("t", &["a"], &["fix"])];
        let mut enc = encoder(&train);
        let example = enc.encode(&commit("u", &["a", "zzz"], &["fix", "new"]));
        assert_eq!(example.code_num, vec![5, UNK]);
        assert_eq!(example.nl_num, vec![START, 5, UNK, END]);

        let vocab = enc.into_vocabulary();
        assert_eq!(vocab.code_to_num.get("zzz"), Some(&UNK));
        assert_eq!(vocab.nl_to_num.get("new"), Some(&UNK));
        assert!(!vocab.num_to_code.values().any(|t| t == "zzz"));
    }

    #[test]
    fn test_message_round_trip_and_idempotence() {
        let corpus = [
            commit("a", &["x", "=", "1"], &["Set", "x", "to", "one"]),
            commit("b", &["y"], &["Drop", "y"]),
        ];
        let mut enc = encoder(&corpus);
        for pc in &corpus {
            let first = enc.encode(pc);
            let decoded: Vec<&str> = first.nl_num[1..first.nl_num.len() - 1]
                .iter()
                .filter_map(|id| enc.vocabulary().nl_token(*id))
                .collect();
            assert_eq!(decoded, pc.nl_tokens);
            assert_eq!(enc.encode(pc), first);
        }
    }

    #[test]
    fn test_two_way_full_ratio() {
        let items: Vec<u32> = (0..10).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let split = split_list(items.clone(), 1.0, false, &mut rng);
        assert_eq!(split.train, items);
        assert!(split.valid.is_empty());
        assert_eq!(split.valid, split.test);
    }

    #[test]
    fn test_two_way_respects_quota() {
        let items: Vec<u32> = (0..200).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let split = split_list(items, 0.8, false, &mut rng);
        assert!(split.train.len() <= 160);
        assert_eq!(split.train.len() + split.valid.len(), 200);
        assert_eq!(split.valid, split.test);
    }

    #[test]
    fn test_three_way_quotas() {
        let items: Vec<u32> = (0..500).collect();
        for seed in 0..5 {
            let mut rng = StdRng::seed_from_u64(seed);
            let split = split_list(items.clone(), 0.8, true, &mut rng);
            assert!(split.train.len() + split.valid.len() <= 400);
            assert!(split.train.len() <= 360);
            assert_eq!(split.train.len() + split.valid.len() + split.test.len(), 500);
            assert!(!split.test.is_empty());
        }
    }

    #[test]
    fn test_split_is_reproducible_with_seed() {
        let items: Vec<u32> = (0..50).collect();
        let a = split_list(items.clone(), 0.8, true, &mut StdRng::seed_from_u64(3));
        let b = split_list(items, 0.8, true, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_write_reference_drops_non_ascii() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ref.txt");
        let refs = vec![
            ("abc".to_string(), "Fix café bug".to_string()),
            ("def".to_string(), "Add tests".to_string()),
        ];
        assert_eq!(write_reference(&path, &refs).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "abc\tFix caf bug\ndef\tAdd tests\n"
        );
    }
}
