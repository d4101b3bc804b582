//! CLI tool for building commit message generation datasets.
//!
//! `preprocess` turns a commit store under the work directory into a parsed
//! corpus, `build-data` turns one or more corpora into a vocabulary and
//! encoded train/valid/test files, and `study` reports how much data the
//! atomic-commit restriction throws away.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use commitgen_core::pipeline::{BuildResult, PreprocessResult, StudyResult};
use commitgen_core::{
    build_dataset, preprocess, study, BuildConfig, ExtractorKind, Language, PreprocessConfig,
    StudyConfig, TokenizerMode,
};

/// Build commit message generation datasets from raw commit stores.
#[derive(Parser, Debug)]
#[command(name = "commitgen")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Work directory holding commit stores and the preprocessing folder
    #[arg(long, env = "WORK_DIR")]
    work_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a commit store into a tokenized corpus
    Preprocess(PreprocessArgs),
    /// Build vocabulary and encoded splits from preprocessed corpora
    BuildData(BuildDataArgs),
    /// Compare corpus sizes with and without the atomic restriction
    Study(StudyArgs),
}

#[derive(Args, Debug)]
struct PreprocessArgs {
    /// Name of the commit store inside the work directory
    commits_path: String,

    /// Language: python, cpp, java or javascript
    #[arg(long, short)]
    language: Language,

    /// Code line extraction strategy (add_rem or per_file)
    #[arg(long, default_value = "add_rem")]
    code_extractor: ExtractorKind,

    /// Code lexer mode (lines or chunks)
    #[arg(long, default_value = "lines")]
    lexer: TokenizerMode,

    /// Maximum code length
    #[arg(long, default_value = "100")]
    code_max_length: usize,

    /// Maximum message length
    #[arg(long, default_value = "100")]
    nl_max_length: usize,

    /// Keep commits touching a single file only
    #[arg(long)]
    atomic: bool,

    /// Keep commits with only added lines
    #[arg(long, conflicts_with = "only_removed")]
    only_added: bool,

    /// Keep commits with only removed lines
    #[arg(long)]
    only_removed: bool,

    /// Disable the length filters
    #[arg(long)]
    no_len_filters: bool,

    /// Tokenize on a worker pool of this size (0 for one worker per core)
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args, Debug)]
struct BuildDataArgs {
    /// Name or comma-separated names of preprocessed corpora (without .json)
    dataset: String,

    /// Language label used in output file names
    #[arg(long, short)]
    language: Language,

    /// Maximum code length for train and valid
    #[arg(long, default_value = "100")]
    code_max_length: usize,

    /// Maximum message length for train and valid
    #[arg(long, default_value = "100")]
    nl_max_length: usize,

    /// Code tokens seen this many times or fewer become UNK
    #[arg(long, default_value = "2")]
    code_unk_threshold: usize,

    /// Message tokens seen this many times or fewer become UNK
    #[arg(long, default_value = "2")]
    nl_unk_threshold: usize,

    /// Generate a separate test set (otherwise valid = test)
    #[arg(long, short)]
    test: bool,

    /// Train/test split ratio
    #[arg(long, short, default_value = "0.8")]
    ratio: f64,

    /// Seed for the split (random when omitted)
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct StudyArgs {
    /// Project name; the store read is `<dataset>_commits`
    dataset: String,

    /// Language: python, cpp, java or javascript
    #[arg(long, short)]
    language: Language,

    /// Only commits with added lines
    #[arg(long, conflicts_with = "only_removed")]
    only_added: bool,

    /// Only commits with removed lines
    #[arg(long)]
    only_removed: bool,
}

fn write_metadata<T: Serialize>(
    dir: &Path,
    name: &str,
    config: serde_json::Value,
    result: &T,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = dir.join(name);
    let metadata = serde_json::json!({
        "config": config,
        "stats": result,
    });
    fs::write(&path, serde_json::to_string_pretty(&metadata)?)?;
    tracing::info!(path = %path.display(), "wrote metadata");
    Ok(path)
}

fn run_preprocess(work_dir: &Path, args: PreprocessArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = work_dir.join(&args.commits_path);
    let output_dir = work_dir.join("preprocessing");

    let config = PreprocessConfig {
        extractor: args.code_extractor,
        lexer_mode: args.lexer,
        atomic: args.atomic,
        only_added: args.only_added,
        only_removed: args.only_removed,
        length_filter: !args.no_len_filters,
        max_code_length: args.code_max_length,
        max_nl_length: args.nl_max_length,
        workers: args.workers,
        ..PreprocessConfig::new(args.language)
    };

    println!("Processing commits from {:?}...", store);
    let result: PreprocessResult = preprocess(&store, &output_dir, &config)?;
    if result.parse.parsed == 0 {
        tracing::warn!(store = %store.display(), "no commits survived preprocessing");
    }

    let metadata_path = write_metadata(
        &output_dir,
        "metadata.json",
        serde_json::json!({
            "store": store.to_string_lossy(),
            "language": config.language.to_string(),
            "atomic": config.atomic,
            "only_added": config.only_added,
            "only_removed": config.only_removed,
            "length_filter": config.length_filter,
            "code_max_length": config.max_code_length,
            "nl_max_length": config.max_nl_length,
        }),
        &result,
    )?;

    println!("\n=== Summary ===");
    println!("Loaded commits: {}", result.loaded);
    println!("Extracted commits: {}", result.extract.extracted);
    println!("  filtered: {}", result.extract.filtered);
    println!("  without message: {}", result.extract.missing_message);
    println!("Parsed commits: {}", result.parse.parsed);
    println!("  dropped by length: {}", result.parse.filtered);
    println!("Average NL length: {:.2}", result.avg_nl_length);
    println!("Average code length: {:.2}", result.avg_code_length);
    println!("\nOutput files:");
    println!("  Corpus: {:?}", result.output);
    println!("  Metadata: {:?}", metadata_path);
    Ok(())
}

fn run_build_data(work_dir: &Path, args: BuildDataArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dir = work_dir.join("preprocessing");
    let datasets: Vec<String> = args
        .dataset
        .split(',')
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();

    let config = BuildConfig {
        max_code_length: Some(args.code_max_length),
        max_nl_length: Some(args.nl_max_length),
        code_unk_threshold: args.code_unk_threshold,
        nl_unk_threshold: args.nl_unk_threshold,
        generate_test: args.test,
        ratio: args.ratio,
        seed: args.seed,
        ..BuildConfig::new(args.language)
    };

    println!("Building datasets from {}...", datasets.join(", "));
    let result: BuildResult = build_dataset(&dir, &datasets, &config)?;

    let metadata_path = write_metadata(
        &dir,
        &format!("{}.metadata.json", result.prefix),
        serde_json::json!({
            "datasets": datasets,
            "language": config.language.to_string(),
            "code_max_length": args.code_max_length,
            "nl_max_length": args.nl_max_length,
            "code_unk_threshold": config.code_unk_threshold,
            "nl_unk_threshold": config.nl_unk_threshold,
            "generate_test": config.generate_test,
            "ratio": config.ratio,
            "seed": config.seed,
        }),
        &result,
    )?;

    println!("\n=== Summary ===");
    println!("Corpora: {}", result.corpora);
    println!("Parsed commits: {}", result.commits);
    println!("Train examples: {} ({} skipped)", result.train, result.train_skipped);
    println!("Valid examples: {} ({} skipped)", result.valid, result.valid_skipped);
    println!("Test examples: {}", result.test);
    println!("Max code id: {}", result.max_code);
    println!("Max NL id: {}", result.max_nl);
    println!("\nOutput files:");
    for kind in ["vocab.json", "train.json", "valid.json", "test.json", "ref.txt"] {
        println!("  {:?}", dir.join(format!("{}.{}", result.prefix, kind)));
    }
    println!("  {:?}", metadata_path);
    Ok(())
}

fn run_study(work_dir: &Path, args: StudyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = work_dir.join(format!("{}_commits", args.dataset));
    let config = StudyConfig {
        only_added: args.only_added,
        only_removed: args.only_removed,
        ..StudyConfig::new(args.language)
    };
    if config.only_added {
        println!("Using commits with only added lines");
    } else if config.only_removed {
        println!("Using commits with only removed lines");
    }

    tracing::info!(store = %store.display(), language = %config.language, "studying commit store");
    let result: StudyResult = study(&store, &config)?;

    println!("\n=== Summary ===");
    println!("Parsed commits: {}", result.parsed);
    println!("Atomic parsed commits: {}", result.atomic_parsed);
    println!("Filtered parsed commits: {}", result.filtered);
    println!("Atomic filtered parsed commits: {}", result.atomic_filtered);
    match result.increase {
        Some(ratio) => println!("Increased size: {:.3}", ratio),
        None => println!("Increased size: n/a (no atomic commits left)"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Preprocess(args) => run_preprocess(&cli.work_dir, args),
        Command::BuildData(args) => run_build_data(&cli.work_dir, args),
        Command::Study(args) => run_study(&cli.work_dir, args),
    }
}
