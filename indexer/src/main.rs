use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use simcore::{Config, Engine, MatchResult, SearchError};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build a descriptor store from an image corpus and query it", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Common {
    /// Descriptor store directory
    #[arg(long, default_value = "./features")]
    store: PathBuf,
    /// Optional TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-extract every image under the corpus root, replacing the store
    Build {
        #[command(flatten)]
        common: Common,
        /// Corpus root directory
        #[arg(long, default_value = "./data")]
        corpus: PathBuf,
    },
    /// Rank stored images by similarity to a query image
    Search {
        #[command(flatten)]
        common: Common,
        /// Corpus root, used to build the store when it is empty and to resolve results
        #[arg(long, default_value = "./data")]
        corpus: PathBuf,
        /// Query image path
        #[arg(long)]
        query: PathBuf,
        /// Number of results (defaults to search.top_n)
        #[arg(long)]
        top_n: Option<usize>,
        /// Results must score strictly above this (defaults to search.min_score)
        #[arg(long)]
        min_score: Option<u32>,
        /// Rebuild the store before searching
        #[arg(long, default_value_t = false)]
        rebuild: bool,
        /// Print the outcome as JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show corpus and store counts
    Stats {
        #[command(flatten)]
        common: Common,
        #[arg(long, default_value = "./data")]
        corpus: PathBuf,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { common, corpus } => {
            let engine = open_engine(&common, true)?;
            let report = engine.rebuild_report(&corpus)?;
            println!("indexed {} of {} images ({} skipped)", report.indexed, report.candidates, report.skipped);
            Ok(())
        }
        Commands::Search { common, corpus, query, top_n, min_score, rebuild, json } => {
            // only an explicit rebuild may create the store
            let engine = open_engine(&common, rebuild)?;
            run_search(&engine, &corpus, &query, top_n, min_score, rebuild, json)
        }
        Commands::Stats { common, corpus } => {
            let engine = open_engine(&common, false)?;
            let stats = engine.stats(corpus.is_dir().then_some(corpus.as_path()))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}

/// Open the engine over `common.store`. Without `create` a missing store is
/// an error instead of silently becoming an empty one.
fn open_engine(common: &Common, create: bool) -> Result<Engine> {
    let config = Config::load(common.config.as_deref())?;
    if create {
        return Ok(Engine::open(&common.store, config)?);
    }
    match Engine::open_existing(&common.store, config) {
        Ok(engine) => Ok(engine),
        Err(SearchError::StoreMissing { path }) => {
            bail!("no descriptor store at {}; run `indexer build` or pass --rebuild", path.display())
        }
        Err(e) => Err(e.into()),
    }
}

fn run_search(
    engine: &Engine,
    corpus: &Path,
    query: &Path,
    top_n: Option<usize>,
    min_score: Option<u32>,
    rebuild: bool,
    json: bool,
) -> Result<()> {
    if rebuild {
        let n = engine.rebuild(corpus)?;
        tracing::info!(indexed = n, "store rebuilt");
    } else if let Some(report) = engine.ensure_index(corpus)? {
        tracing::info!(indexed = report.indexed, "store was empty, built it");
    }
    if !query.is_file() {
        bail!("query image not found: {}", query.display());
    }

    let top_n = top_n.unwrap_or(engine.config().search.top_n);
    let min_score = min_score.unwrap_or(engine.config().search.min_score);
    let outcome = match engine.search(query, top_n, min_score) {
        Ok(o) => o,
        Err(SearchError::NoFeatures { reason }) => {
            println!("no features found in query image ({reason})");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    println!("query {}: {} descriptors, {} images scanned", query.display(), outcome.query_descriptors, outcome.scanned);
    if outcome.results.is_empty() {
        println!("no similar images found (every score <= {min_score})");
        return Ok(());
    }
    for (rank, hit) in outcome.results.iter().enumerate() {
        println!("{}", format_hit(rank + 1, hit, corpus));
    }
    Ok(())
}

fn confidence(score: u32) -> &'static str {
    match score {
        0..=9 => "very low (noise)",
        10..=29 => "medium",
        _ => "high",
    }
}

fn format_hit(rank: usize, hit: &MatchResult, corpus: &Path) -> String {
    let full = corpus.join(&hit.identity);
    let missing = if full.is_file() { "" } else { "  [file not found]" };
    format!("#{rank:<3} {:<6} {:<18} {}{missing}", hit.score, confidence(hit.score), hit.identity)
}
