//! Pipeline stages: preprocess a commit store into a parsed corpus, build
//! encoded datasets from corpora, and study the effect of atomic filtering.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::code::{code_tokenizer_for, TokenizerMode};
use crate::commit::{
    extract_commits, is_atomic, is_only_added, is_only_removed, length_filter, CommitFilter, CommitParser,
    ExtractStats, ExtractedCommit, ParseStats, ParsedCommit,
};
use crate::dataset::{save_examples, split_list, write_reference, DatasetEncoder, LengthBounds};
use crate::error::{Error, Result};
use crate::extract::{build_extractor, ExtractorKind};
use crate::helpers::mean;
use crate::lexer::{Language, DEFAULT_IGNORE};
use crate::nl::TreebankTokenizer;
use crate::pool::WorkerPool;
use crate::store::RawDataset;
use crate::vocab::Vocabulary;
use crate::{MAX_CODE_LENGTH, MAX_NL_LENGTH, NEW_FILE_TOKEN, TRAIN_RATIO, UNK_THRESHOLD};

/// Configuration for [`preprocess`].
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    pub language: Language,
    pub extractor: ExtractorKind,
    pub lexer_mode: TokenizerMode,
    /// Keep single-file commits only. Also disables the file marker.
    pub atomic: bool,
    pub only_added: bool,
    pub only_removed: bool,
    /// Drop commits outside `1..=max` tokens on either side.
    pub length_filter: bool,
    pub max_code_length: usize,
    pub max_nl_length: usize,
    /// Tokenize on a worker pool of this size (`0` for the default size).
    pub workers: Option<usize>,
}

impl PreprocessConfig {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            extractor: ExtractorKind::default(),
            lexer_mode: TokenizerMode::default(),
            atomic: false,
            only_added: false,
            only_removed: false,
            length_filter: true,
            max_code_length: MAX_CODE_LENGTH,
            max_nl_length: MAX_NL_LENGTH,
            workers: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.only_added && self.only_removed {
            return Err(Error::Config(
                "only_added and only_removed are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// File name of the corpus written for `project`.
    pub fn corpus_file_name(&self, project: &str) -> String {
        let mut name = project.to_string();
        if self.atomic {
            name.push_str("_atomic");
        }
        if self.only_added {
            name.push_str("_added");
        }
        if self.only_removed {
            name.push_str("_removed");
        }
        name.push_str(".json");
        name
    }

    fn commit_filters(&self) -> Vec<CommitFilter> {
        let mut filters: Vec<CommitFilter> = Vec::new();
        if self.atomic {
            filters.push(Box::new(is_atomic));
        }
        if self.only_added {
            filters.push(Box::new(is_only_added));
        }
        if self.only_removed {
            filters.push(Box::new(is_only_removed));
        }
        filters
    }
}

/// Result of [`preprocess`].
#[derive(Debug, Serialize)]
pub struct PreprocessResult {
    pub loaded: usize,
    pub extract: ExtractStats,
    pub parse: ParseStats,
    pub avg_nl_length: f64,
    pub avg_code_length: f64,
    pub output: PathBuf,
}

/// Project name of a store directory: everything before the first `_`.
pub fn project_name(store: &Path) -> String {
    let dir = store
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dir.split('_').next().unwrap_or_default().to_string()
}

pub fn save_corpus(path: &Path, commits: &[ParsedCommit]) -> Result<()> {
    fs::write(path, serde_json::to_string(commits)?)?;
    Ok(())
}

pub fn load_corpus(path: &Path) -> Result<Vec<ParsedCommit>> {
    if !path.is_file() {
        return Err(Error::MissingCorpus(path.to_path_buf()));
    }
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

fn parse_with(
    parser: &CommitParser,
    commits: &[ExtractedCommit],
    workers: Option<usize>,
) -> Result<(Vec<ParsedCommit>, ParseStats)> {
    match workers {
        Some(size) => {
            let pool = WorkerPool::new(size)?;
            let parsed = parser.parse_all_parallel(commits, &pool);
            pool.shutdown();
            parsed
        }
        None => Ok(parser.parse_all(commits)),
    }
}

/// Parse every commit of the store at `store` and write the corpus to
/// `output_dir`.
pub fn preprocess(store: &Path, output_dir: &Path, config: &PreprocessConfig) -> Result<PreprocessResult> {
    config.validate()?;
    let dataset = RawDataset::load(store)?;

    let marker = if config.atomic { None } else { Some(NEW_FILE_TOKEN) };
    let extractor = build_extractor(config.extractor, marker);
    let (commits, extract) = extract_commits(&dataset, extractor.as_ref(), &config.commit_filters());

    let code = code_tokenizer_for(config.language, config.lexer_mode)?;
    let mut parser = CommitParser::new(&TreebankTokenizer, code.as_ref())
        .with_ignore(&DEFAULT_IGNORE)
        .with_marker(marker);
    if config.length_filter {
        parser = parser.with_filter(length_filter(config.max_code_length, config.max_nl_length));
    }
    let (parsed, parse) = parse_with(&parser, &commits, config.workers)?;

    let avg_nl_length = mean(parsed.iter().map(|pc| pc.nl_tokens.len()));
    let avg_code_length = mean(parsed.iter().map(|pc| pc.code_tokens.len()));
    tracing::info!(avg_nl_length, avg_code_length, "corpus statistics");

    fs::create_dir_all(output_dir)?;
    let output = output_dir.join(config.corpus_file_name(&project_name(store)));
    save_corpus(&output, &parsed)?;
    tracing::info!(commits = parsed.len(), path = %output.display(), "wrote parsed corpus");

    Ok(PreprocessResult {
        loaded: dataset.len(),
        extract,
        parse,
        avg_nl_length,
        avg_code_length,
        output,
    })
}

/// Configuration for [`build_dataset`].
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub language: Language,
    pub max_code_length: Option<usize>,
    pub max_nl_length: Option<usize>,
    pub code_unk_threshold: usize,
    pub nl_unk_threshold: usize,
    /// Split off a separate test set instead of reusing valid.
    pub generate_test: bool,
    pub ratio: f64,
    /// Fixes the split when set.
    pub seed: Option<u64>,
}

impl BuildConfig {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            max_code_length: Some(MAX_CODE_LENGTH),
            max_nl_length: Some(MAX_NL_LENGTH),
            code_unk_threshold: UNK_THRESHOLD,
            nl_unk_threshold: UNK_THRESHOLD,
            generate_test: false,
            ratio: TRAIN_RATIO,
            seed: None,
        }
    }
}

/// Result of [`build_dataset`].
#[derive(Debug, Serialize)]
pub struct BuildResult {
    pub corpora: usize,
    pub commits: usize,
    pub train: usize,
    pub valid: usize,
    pub test: usize,
    pub train_skipped: usize,
    pub valid_skipped: usize,
    pub references: usize,
    pub max_code: u32,
    pub max_nl: u32,
    pub prefix: String,
}

/// Build vocabulary and encoded splits from the corpora named `datasets`
/// inside `dir`, writing all artifacts next to them.
pub fn build_dataset(dir: &Path, datasets: &[String], config: &BuildConfig) -> Result<BuildResult> {
    if datasets.is_empty() {
        return Err(Error::Config("no dataset given".to_string()));
    }
    if !(0.0..=1.0).contains(&config.ratio) {
        return Err(Error::Config(format!("ratio {} is outside [0, 1]", config.ratio)));
    }

    let mut corpora = Vec::with_capacity(datasets.len());
    for name in datasets {
        corpora.push(load_corpus(&dir.join(format!("{}.json", name)))?);
    }
    let all: Vec<ParsedCommit> = corpora.iter().flatten().cloned().collect();

    let vocab = Vocabulary::build(&all, config.code_unk_threshold, config.nl_unk_threshold);
    let prefix = format!("{}.{}", datasets.join("_"), config.language);
    let artifact = |kind: &str| dir.join(format!("{}.{}", prefix, kind));
    vocab.save(&artifact("vocab.json"))?;

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let (mut train, mut valid, mut test) = (Vec::new(), Vec::new(), Vec::new());
    for corpus in corpora {
        let split = split_list(corpus, config.ratio, config.generate_test, &mut rng);
        train.extend(split.train);
        valid.extend(split.valid);
        test.extend(split.test);
    }
    tracing::info!(train = train.len(), valid = valid.len(), test = test.len(), "split corpora");

    let (max_code, max_nl) = (vocab.max_code, vocab.max_nl);
    let mut encoder = DatasetEncoder::new(vocab);
    let bounds = LengthBounds::new(config.max_code_length, config.max_nl_length);
    let train_data = encoder.build(&train, bounds);
    save_examples(&artifact("train.json"), &train_data.examples)?;
    let valid_data = encoder.build(&valid, bounds);
    save_examples(&artifact("valid.json"), &valid_data.examples)?;
    let test_data = encoder.build(&test, LengthBounds::unbounded());
    save_examples(&artifact("test.json"), &test_data.examples)?;
    let references = write_reference(&artifact("ref.txt"), &test_data.references)?;

    Ok(BuildResult {
        corpora: datasets.len(),
        commits: all.len(),
        train: train_data.examples.len(),
        valid: valid_data.examples.len(),
        test: test_data.examples.len(),
        train_skipped: train_data.skipped,
        valid_skipped: valid_data.skipped,
        references,
        max_code,
        max_nl,
        prefix,
    })
}

/// Configuration for [`study`].
#[derive(Debug, Clone)]
pub struct StudyConfig {
    pub language: Language,
    pub only_added: bool,
    pub only_removed: bool,
    pub max_code_length: usize,
    pub max_nl_length: usize,
}

impl StudyConfig {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            only_added: false,
            only_removed: false,
            max_code_length: MAX_CODE_LENGTH,
            max_nl_length: MAX_NL_LENGTH,
        }
    }
}

/// Result of [`study`].
#[derive(Debug, Serialize)]
pub struct StudyResult {
    pub parsed: usize,
    pub atomic_parsed: usize,
    pub filtered: usize,
    pub atomic_filtered: usize,
    /// `filtered / atomic_filtered`, absent when no atomic commit survives.
    pub increase: Option<f64>,
}

/// Compare how many commits survive the length filter with and without the
/// atomic restriction.
pub fn study(store: &Path, config: &StudyConfig) -> Result<StudyResult> {
    if config.only_added && config.only_removed {
        return Err(Error::Config(
            "only_added and only_removed are mutually exclusive".to_string(),
        ));
    }
    let dataset = RawDataset::load(store)?;
    let extractor = build_extractor(ExtractorKind::PerFile, Some(NEW_FILE_TOKEN));

    let mut all_filters: Vec<CommitFilter> = Vec::new();
    let mut atomic_filters: Vec<CommitFilter> = vec![Box::new(is_atomic)];
    if config.only_added {
        all_filters.push(Box::new(is_only_added));
        atomic_filters.push(Box::new(is_only_added));
    } else if config.only_removed {
        all_filters.push(Box::new(is_only_removed));
        atomic_filters.push(Box::new(is_only_removed));
    }
    let (commits, _) = extract_commits(&dataset, extractor.as_ref(), &all_filters);
    let (atomic_commits, _) = extract_commits(&dataset, extractor.as_ref(), &atomic_filters);

    let code = code_tokenizer_for(config.language, TokenizerMode::Lines)?;
    let parser = CommitParser::new(&TreebankTokenizer, code.as_ref())
        .with_ignore(&DEFAULT_IGNORE)
        .with_marker(Some(NEW_FILE_TOKEN));
    let (parsed, _) = parser.parse_all(&commits);
    let (atomic_parsed, _) = parser.parse_all(&atomic_commits);

    let keep = length_filter(config.max_code_length, config.max_nl_length);
    let filtered = parsed.iter().filter(|pc| keep(*pc)).count();
    let atomic_filtered = atomic_parsed.iter().filter(|pc| keep(*pc)).count();
    let increase = (atomic_filtered > 0).then(|| filtered as f64 / atomic_filtered as f64);

    tracing::info!(filtered, atomic_filtered, ?increase, "study finished");
    Ok(StudyResult {
        parsed: parsed.len(),
        atomic_parsed: atomic_parsed.len(),
        filtered,
        atomic_filtered,
        increase,
    })
}
