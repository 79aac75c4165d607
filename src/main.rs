use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod corpus;
mod embeddings;
mod import;
mod lock;
mod matcher;
mod records;
mod search;
#[cfg(test)]
mod tests;

use config::Config;
use corpus::EmbeddingStore;
use embeddings::{build_provider, Explainer, OpenAiExplainer};
use import::{ImportOptions, ImportPaths, Importer, MarkerFile};
use lock::ImportLock;
use matcher::CodeMatcher;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging(args.verbose);

    let config = Config::load_with(&args.data_dir)?;

    match args.command {
        cli::Command::Search {
            query,
            limit,
            explain,
        } => run_search(config, &query, limit, explain),
        cli::Command::Import { csv, fresh } => run_import(config, csv, fresh),
        cli::Command::Stats {} => run_stats(config),
    }
}

fn run_search(
    config: Config,
    query: &str,
    limit: Option<usize>,
    explain: bool,
) -> anyhow::Result<()> {
    let provider = build_provider(&config.embedding, config.base_path())
        .context("failed to create embedding provider")?;

    let explain = explain || config.explain.enabled;
    let explainer: Option<Arc<dyn Explainer>> = if explain {
        match OpenAiExplainer::from_config(&config.embedding, &config.explain) {
            Ok(explainer) => Some(Arc::new(explainer)),
            Err(err) => {
                log::warn!("explanations unavailable: {err}");
                None
            }
        }
    } else {
        None
    };

    let mut matcher = CodeMatcher::new(config, provider);
    if let Some(explainer) = explainer {
        matcher = matcher.with_explainer(explainer);
    }

    let matches = matcher.search(query, limit)?;

    if explain {
        let results = matcher.explain(query, matches);
        println!("{}", serde_json::to_string_pretty(&json!({ "results": results }))?);
    } else {
        println!("{}", serde_json::to_string_pretty(&json!({ "results": matches }))?);
    }

    Ok(())
}

fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(err) => log::debug!("progress bar template rejected: {err}"),
    }
    pb.set_message("codes embedded");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn run_import(config: Config, csv: Option<PathBuf>, fresh: bool) -> anyhow::Result<()> {
    let _lock = ImportLock::try_acquire(config.base_path())
        .context("failed to lock the data directory")?;

    if let Some(csv) = csv {
        records::convert_csv(&csv, &config.codes_path())
            .with_context(|| format!("failed to convert {}", csv.display()))?;
    }

    let codes = records::load_codes(&config.codes_path())?;
    let provider = build_provider(&config.embedding, config.base_path())
        .context("failed to create embedding provider")?;

    let mut importer = Importer::new(
        ImportPaths::for_output(&config.embeddings_path()),
        ImportOptions::from(&config.import),
    );
    if fresh {
        importer.discard_progress()?;
    }

    let _span = tracing::info_span!("import", codes = codes.len()).entered();
    log::info!("Generating embeddings for {} codes...", codes.len());
    let pb = create_progress_bar(codes.len() as u64);
    let result = importer.run(&codes, provider.as_ref(), |progress| {
        pb.set_length(progress.total as u64);
        pb.set_position(progress.processed as u64);
        log::debug!("committed batch of {} codes", progress.batch_len);
    });

    match result {
        Ok(report) => {
            pb.finish_and_clear();
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(err) => {
            pb.abandon();
            Err(err).context("import stopped, run it again to resume from the last completed batch")
        }
    }
}

fn run_stats(config: Config) -> anyhow::Result<()> {
    let codes = records::load_codes(&config.codes_path())?;
    let code_count = codes.len();

    let store = EmbeddingStore::build(codes, &config.embeddings_path(), &config.reader, None)?;
    let import_pending = MarkerFile::new(ImportPaths::for_output(&config.embeddings_path()).marker)
        .exists();

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "codes": code_count,
            "embedded": store.len(),
            "dimensions": store.dimensions(),
            "import_pending": import_pending,
        }))?
    );
    Ok(())
}
