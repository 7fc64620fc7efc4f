use clap::{Parser, Subcommand};
use docsift_indexer::{
    retrieval::indexing_engine::{EngineConfig, IndexingEngine},
    retrieval::search_engine::ResultSource,
    status::StatusApi,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

/// A CLI tool to build and query a docsift full-text index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Index database file (overrides the config file)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// TOML engine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for skip, indexed and error logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl directories and update the index
    Index {
        /// Root directories to crawl
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Additional glob patterns to exclude
        #[arg(short, long)]
        exclude: Vec<String>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Search file names and indexed content
    Search {
        /// Query; quote phrases for exact matching
        query: String,
        /// Directory to search file names under and to restrict content hits to
        #[arg(short, long)]
        scope: Option<PathBuf>,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show comprehensive status information
    Status {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show index statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show the stored record for a file
    Detail {
        path: PathBuf,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Report whether files are indexed
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List, delete or clear recent search keywords
    History {
        /// Maximum number of entries
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Delete one keyword
        #[arg(long, conflicts_with = "clear")]
        delete: Option<String>,
        /// Delete every keyword
        #[arg(long)]
        clear: bool,
    },
    /// Remove every document from the index
    Clear,
    /// Merge full-text index segments
    Optimize,
    /// Rebuild the database file to reclaim space
    Vacuum,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct CheckOutput {
    path: String,
    indexed: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(db) = &args.db {
        config.db_path = db.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.log_dir = Some(dir.clone());
    }
    Ok(config)
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let engine = IndexingEngine::new(load_config(&args)?).await?;

    let result = execute(&engine, args.command).await;
    engine.shutdown().await?;
    result
}

async fn execute(engine: &IndexingEngine, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Index {
            paths,
            exclude,
            format,
        } => {
            for pattern in &exclude {
                engine.add_exclusion_pattern(pattern).await?;
            }
            engine.start_indexing(paths).await?;

            tokio::select! {
                result = engine.wait_until_idle() => result?,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("Stopping after the current file...");
                    engine.stop_indexing();
                    while engine.is_running() {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }

            let status = engine.get_status().await;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    let run = &status.last_run;
                    println!("Indexing finished:");
                    println!("  Files seen: {}", run.total);
                    println!(
                        "  New: {} | Modified: {} | Unchanged: {}",
                        run.new, run.modified, run.unchanged
                    );
                    println!("  Indexed: {}", run.indexed);
                    println!("  Skipped: {}", run.skipped);
                    println!("  Errors: {}", run.errored);
                    println!("  Removed: {}", run.deleted);
                    println!("  Pending retry: {}", status.retry_worker.pending_count);

                    if format == OutputFormat::Full {
                        println!("\nRecent activity:");
                        for entry in engine.get_logs(50).await.iter().rev() {
                            println!(
                                "  {} [{}] {} {}",
                                entry.time, entry.status, entry.filename, entry.detail
                            );
                        }
                        for record in engine.pending_skips().await {
                            println!(
                                "  pending: {} ({})",
                                record.path.display(),
                                record.reason
                            );
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Search {
            query,
            scope,
            limit,
            format,
        } => {
            let response = engine.search(&query, scope.as_deref(), limit).await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                OutputFormat::Summary => {
                    println!(
                        "Found {} results in {:.3}s:",
                        response.results.len(),
                        response.search_time
                    );
                    for result in &response.results {
                        let source = match result.source {
                            ResultSource::Database => "content",
                            ResultSource::Filesystem => "name",
                        };
                        println!(
                            "  {:>8.3} | {:7} | {} matches | {}",
                            result.rank, source, result.match_count, result.path
                        );
                    }
                }
                OutputFormat::Full => {
                    for result in &response.results {
                        println!("Path: {}", result.path);
                        println!("Source: {:?}", result.source);
                        println!("Rank: {:.3}", result.rank);
                        println!("Matches: {}", result.match_count);
                        println!("Preview: {}", result.preview);
                        println!("---");
                    }
                    println!("Search time: {:.3}s", response.search_time);
                }
            }
            Ok(())
        }
        Commands::Status { format } => {
            let report = StatusApi::full_report(engine).await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("docsift {}", report.version);
                    println!("==========================");

                    println!("\nIndex Statistics:");
                    println!("  Indexed files: {}", report.statistics.total_indexed_files);
                    println!("  Database size: {} bytes", report.statistics.database_size);

                    println!("\nHealth Status:");
                    println!("  Overall status: {:?}", report.health.overall_status);
                    println!(
                        "  Database connected: {}",
                        if report.health.database_connected {
                            "Yes"
                        } else {
                            "No"
                        }
                    );
                    println!(
                        "  Database integrity: {}",
                        if report.health.database_integrity_ok {
                            "OK"
                        } else {
                            "Issues found"
                        }
                    );
                    if let Some(ref error) = report.health.database_error {
                        println!("  Database error: {error}");
                    }

                    let config = &report.configuration;
                    println!("\nConfiguration:");
                    println!("  Database: {}", config.db_path);
                    println!("  Batch size: {}", config.batch_size);
                    println!("  Max file size: {} bytes", config.max_file_size_bytes);
                    println!("  Extraction timeout: {} ms", config.extraction_timeout_ms);
                    println!(
                        "  Retry: every {} ms, up to {} times ({})",
                        config.retry_interval_ms,
                        config.max_retries,
                        config.retry_eligible.join(", ")
                    );

                    if format == OutputFormat::Full {
                        println!("\nDatabase:");
                        let sqlite = &report.database.sqlite_info;
                        println!("  SQLite version: {}", sqlite.version);
                        if let Some(ref mode) = sqlite.journal_mode {
                            println!("  Journal mode: {mode}");
                        }
                        for file in &report.database.database_files {
                            println!(
                                "  {} ({}): {} bytes",
                                file.path, file.file_type, file.size_bytes
                            );
                        }
                        println!("\nExcluded patterns:");
                        for pattern in &config.excluded_file_patterns {
                            println!("  {pattern}");
                        }
                    }

                    println!("\nSupported File Types:");
                    println!("  {}", config.supported_extensions.join(", "));
                }
            }
            Ok(())
        }
        Commands::Stats { format } => {
            let stats = engine.get_statistics().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Database Statistics:");
                    println!("  Indexed files: {}", stats.total_indexed_files);
                    println!("  Database size: {} bytes", stats.database_size);
                }
            }
            Ok(())
        }
        Commands::Detail { path, format } => {
            let Some(detail) = engine.get_indexed_detail(&path).await? else {
                println!("{} is not indexed", path.display());
                return Ok(());
            };
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&detail)?),
                OutputFormat::Summary => {
                    println!("Path: {}", detail.path);
                    println!("Characters: {}", detail.content_length);
                    println!("Tokens: {}", detail.token_count);
                    println!("Modified: {}", detail.mtime);
                    println!(
                        "Content preview: {}",
                        detail.content.chars().take(100).collect::<String>()
                    );
                }
                OutputFormat::Full => {
                    println!("Path: {}", detail.path);
                    println!("Characters: {}", detail.content_length);
                    println!("Tokens: {}", detail.token_count);
                    println!("Modified: {}", detail.mtime);
                    if let Some(ref at) = detail.indexed_at {
                        println!("Indexed at: {at}");
                    }
                    println!("Content:\n{}", detail.content);
                }
            }
            Ok(())
        }
        Commands::Check { paths, format } => {
            let indexed = engine.check_indexed(&paths).await?;
            let output: Vec<CheckOutput> = paths
                .iter()
                .map(|p| {
                    let path = p.display().to_string();
                    CheckOutput {
                        indexed: indexed.get(&path).copied().unwrap_or(false),
                        path,
                    }
                })
                .collect();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::Summary | OutputFormat::Full => {
                    for entry in output {
                        println!(
                            "  {} {}",
                            if entry.indexed { "indexed" } else { "missing" },
                            entry.path
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::History {
            limit,
            delete,
            clear,
        } => {
            if clear {
                engine.clear_search_history().await?;
                println!("Search history cleared");
            } else if let Some(keyword) = delete {
                if engine.delete_search_history(&keyword).await? {
                    println!("Deleted {keyword:?} from search history");
                } else {
                    println!("{keyword:?} is not in search history");
                }
            } else {
                for entry in engine.get_search_history(limit).await? {
                    println!("  {}", entry.keyword);
                }
            }
            Ok(())
        }
        Commands::Clear => {
            engine.clear_index().await?;
            println!("Index cleared");
            Ok(())
        }
        Commands::Optimize => {
            engine.optimize().await?;
            println!("Index optimized");
            Ok(())
        }
        Commands::Vacuum => {
            engine.vacuum().await?;
            let stats = engine.get_statistics().await?;
            println!("Database vacuumed ({} bytes)", stats.database_size);
            Ok(())
        }
    }
}
