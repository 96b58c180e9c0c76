use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use context_retriever_core::{
    assemble_context, directory_info, ContextRetriever, RetrieverConfig, ScoredChunk,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "context-retriever", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

/// Overrides applied on top of the defaults and the optional config file.
#[derive(Args)]
struct Settings {
    /// JSON file with retriever settings
    #[arg(long, env = "RETRIEVER_CONFIG")]
    config: Option<PathBuf>,

    /// Corpus directory
    #[arg(long, env = "RETRIEVER_DATA_DIRECTORY")]
    data_dir: Option<PathBuf>,

    /// Directory holding the persisted index
    #[arg(long, env = "RETRIEVER_PERSIST_DIRECTORY")]
    persist_dir: Option<PathBuf>,

    /// Embedding model identifier (char-ngram, char-ngram-<dims>, ollama/<model>)
    #[arg(long, env = "RETRIEVER_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Base URL for HTTP embedding backends
    #[arg(long, env = "RETRIEVER_EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Expected vector length for HTTP embedding backends
    #[arg(long, env = "RETRIEVER_EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    #[arg(long, env = "RETRIEVER_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    #[arg(long, env = "RETRIEVER_CHUNK_OVERLAP")]
    chunk_overlap: Option<usize>,

    #[arg(long, env = "RETRIEVER_SIMILARITY_THRESHOLD")]
    similarity_threshold: Option<f32>,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "RETRIEVER_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Start with retrieval switched off
    #[arg(long, env = "RETRIEVER_DISABLED", default_value_t = false)]
    disabled: bool,
}

impl Settings {
    fn resolve(&self) -> anyhow::Result<RetrieverConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_str::<RetrieverConfig>(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => RetrieverConfig::default(),
        };

        if let Some(path) = &self.data_dir {
            config.data_directory = path.clone();
        }
        if let Some(path) = &self.persist_dir {
            config.persist_directory = path.clone();
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model = model.clone();
        }
        if let Some(endpoint) = &self.embedding_endpoint {
            config.embedding_endpoint = endpoint.clone();
        }
        if let Some(dimensions) = self.embedding_dimensions {
            config.embedding_dimensions = Some(dimensions);
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            config.chunk_overlap = overlap;
        }
        if let Some(threshold) = self.similarity_threshold {
            config.similarity_threshold = threshold;
        }
        if let Some(timeout) = self.timeout_ms {
            config.request_timeout_ms = timeout;
        }
        if self.disabled {
            config.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the index from the data directory and persist it.
    Index,
    /// Retrieve ranked passages for one or more queries.
    Search {
        /// Search query; repeat for several queries
        #[arg(long, required = true)]
        query: Vec<String>,
        /// Maximum results per query (defaults to the configured value)
        #[arg(long)]
        max_results: Option<usize>,
        /// Print the assembled context block instead of individual hits.
        #[arg(long, default_value_t = false)]
        context: bool,
        /// Print query statistics after the last query.
        #[arg(long, default_value_t = false)]
        stats: bool,
    },
    /// Delete the persisted index.
    Clear,
    /// Report whether the retriever can serve context.
    Health,
    /// Print index statistics and a summary of the data directory.
    Stats,
    /// Read queries from stdin, one per line.
    Repl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.settings.resolve()?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        data_directory = %config.data_directory.display(),
        embedding_model = %config.embedding_model,
        "context-retriever boot"
    );

    let retriever = ContextRetriever::from_config(config)?;

    match cli.command {
        Command::Index => {
            let report = retriever.reload().await?;
            println!(
                "{} documents, {} chunks indexed at {}",
                report.documents,
                report.total_chunks,
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            query,
            max_results,
            context,
            stats,
        } => {
            initialize(&retriever).await;

            for text in query {
                println!("query: {text}");
                match retriever.search(&text, max_results).await {
                    Ok(hits) if context => println!("{}", assemble_context(&hits)),
                    Ok(hits) => print_hits(&hits),
                    Err(error) => println!("  retrieval skipped: {error}"),
                }
            }

            if stats {
                println!("{}", serde_json::to_string_pretty(&retriever.stats().await)?);
            }
        }
        Command::Clear => {
            retriever.clear().await?;
            println!(
                "cleared index in {}",
                retriever.config().persist_directory.display()
            );
        }
        Command::Health => {
            initialize(&retriever).await;
            println!("{}", serde_json::to_string_pretty(&retriever.health().await)?);
        }
        Command::Stats => {
            initialize(&retriever).await;
            let info = directory_info(&retriever.config().data_directory);
            println!(
                "data_directory: exists={} text_files={} pdf_files={} total_bytes={}",
                info.exists, info.text_files, info.pdf_files, info.total_bytes
            );
            println!("{}", serde_json::to_string_pretty(&retriever.stats().await)?);
        }
        Command::Repl => {
            initialize(&retriever).await;
            repl(&retriever).await?;
        }
    }

    Ok(())
}

/// Startup failures are reported and leave retrieval disabled; the command
/// still runs so the operator can inspect health.
async fn initialize(retriever: &ContextRetriever) {
    if let Err(error) = retriever.initialize().await {
        warn!(%error, "retrieval unavailable until the corpus is fixed");
    }
}

fn print_hits(hits: &[ScoredChunk]) {
    if hits.is_empty() {
        println!("  no passages above threshold");
    }
    for hit in hits {
        println!(
            "  score={:.4} chunk={} offset={} source={}",
            hit.score, hit.chunk.chunk_id, hit.chunk.offset, hit.chunk.source_path
        );
        println!("  {}", hit.chunk.text.trim());
    }
}

async fn repl(retriever: &ContextRetriever) -> anyhow::Result<()> {
    println!("enter a query, or :reload :clear :stats :health :on :off :threshold <t> :quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let mut words = line.split_whitespace();
        match words.next() {
            None => continue,
            Some(":quit") | Some(":q") => break,
            Some(":reload") => match retriever.reload().await {
                Ok(report) => println!(
                    "reloaded {} documents, {} chunks",
                    report.documents, report.total_chunks
                ),
                Err(error) => println!("reload failed: {error}"),
            },
            Some(":clear") => match retriever.clear().await {
                Ok(()) => println!("index cleared"),
                Err(error) => println!("clear failed: {error}"),
            },
            Some(":stats") => {
                println!("{}", serde_json::to_string_pretty(&retriever.stats().await)?);
            }
            Some(":health") => {
                println!("{}", serde_json::to_string_pretty(&retriever.health().await)?);
            }
            Some(":on") => retriever.toggle(true),
            Some(":off") => retriever.toggle(false),
            Some(":threshold") => {
                let parsed = words.next().map(str::parse::<f32>);
                match parsed {
                    Some(Ok(value)) => {
                        if let Err(error) = retriever.set_similarity_threshold(value) {
                            println!("{error}");
                        }
                    }
                    _ => println!("usage: :threshold <0.0..=1.0>"),
                }
            }
            Some(_) => {
                let started = std::time::Instant::now();
                let context = retriever.context_for(line).await;
                if context.is_empty() {
                    println!("(no context)");
                } else {
                    println!("{context}");
                }
                println!("-- {:?}", round_millis(started.elapsed()));
            }
        }
    }

    Ok(())
}

fn round_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}
