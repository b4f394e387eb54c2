mod api;
mod commands;
mod logging;
mod progress;

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use gingko_core::cluster::ClusterCache;
use gingko_core::extraction::ExtractionKind;
use gingko_core::storage::Database;
use gingko_core::{compute_signature, AppConfig, IngestEngine, QueryMatch, QueryService};
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match gingko_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Enqueue) => run_enqueue(&config),
        Some(Commands::Work { drain }) => run_work(&config, drain),
        Some(Commands::Ingest) => run_enqueue(&config).and_then(|_| run_work(&config, true)),
        Some(Commands::Serve { bind }) => run_serve(&config, bind),
        Some(Commands::Query {
            signature,
            file,
            limit,
        }) => run_query(&config, signature, file.as_deref(), limit),
        Some(Commands::Hash { file }) => run_hash(&file),
        Some(Commands::Records {
            path,
            limit,
            offset,
        }) => run_records(&config, path.as_deref(), limit, offset),
        Some(Commands::Extractions { path, kind }) => {
            run_extractions(&config, path.as_deref(), kind.as_deref())
        }
        Some(Commands::Clusters) => run_clusters(&config),
        Some(Commands::QueueStats) => run_queue_stats(&config),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        Some(Commands::TruncateDb) => {
            match prompt_confirm(
                "Are you SURE you want to COMPLETELY DELETE the Database?",
                Some(false),
            ) {
                Ok(true) => match Database::open(&config.db_path) {
                    Ok(db) => match db.truncate_all() {
                        Ok(()) => {
                            println!("All tables truncated");
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    },
                    Err(e) => Err(e.into()),
                },
                _ => process::exit(0),
            }
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {}", err);
        process::exit(1);
    }

    Ok(())
}

fn run_enqueue(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.root_paths.is_empty() {
        return Err("no root_paths configured (set GINGKO_ROOT_PATHS or Config.toml)".into());
    }
    let engine = IngestEngine::new(config.clone());
    cancel_on_ctrl_c(engine.cancel_token());
    let reporter = CliReporter::new();
    let result = engine.enqueue(&reporter)?;

    info!(
        "Walk: {}, {} files found, {} queued, {} unchanged",
        format!("{:.2}s", result.walk_duration.as_secs_f64()).green(),
        format!("{}", result.files_found).cyan(),
        format!("{}", result.queued).green(),
        format!("{}", result.skipped).yellow(),
    );
    Ok(())
}

fn run_work(config: &AppConfig, drain: bool) -> Result<(), Box<dyn std::error::Error>> {
    let engine = IngestEngine::new(config.clone());
    cancel_on_ctrl_c(engine.cancel_token());
    let reporter = CliReporter::new();
    reporter.start_work();
    let result = engine.run_workers(&reporter, drain)?;

    let db = Database::open_with_timeout(&config.db_path, config.store.timeout())?;
    let stats = db.queue_stats()?;
    info!(
        "{} workers handled {} jobs in {}",
        result.workers,
        format!("{}", result.jobs_handled).green(),
        format!("{:.2}s", result.duration.as_secs_f64()).green(),
    );
    info!(
        "Queue: {} pending, {} leased, {} done, {} failed",
        format!("{}", stats.pending).yellow(),
        format!("{}", stats.leased).cyan(),
        format!("{}", stats.done).green(),
        format!("{}", stats.failed).red(),
    );
    Ok(())
}

/// First Ctrl-C stops workers after their current job; a second one exits.
fn cancel_on_ctrl_c(cancel: Arc<AtomicBool>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("Ctrl-C handling unavailable: {}", e);
            return;
        }
    };

    thread::spawn(move || {
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Stopping after the current jobs (Ctrl-C again to abort)");
            cancel.store(true, Ordering::Relaxed);

            if tokio::signal::ctrl_c().await.is_ok() {
                process::exit(130);
            }
        });
    });
}

fn run_serve(config: &AppConfig, bind: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    // Create the schema before accepting requests.
    Database::open_with_timeout(&config.db_path, config.store.timeout())?;

    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let state = Arc::new(api::ApiState::new(config));
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(api::serve(state, &bind))
}

fn run_query(
    config: &AppConfig,
    signature: Option<String>,
    file: Option<&Path>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_with_timeout(&config.db_path, config.store.timeout())?;
    let clusters = Mutex::new(ClusterCache::new(config.similarity.threshold));
    let service = QueryService::new(&db, &clusters, &config.similarity);

    let matches = match (signature, file) {
        (Some(text), _) => service.query_text(&text, limit)?,
        (None, Some(path)) => service.query_bytes(&fs::read(path)?, limit)?,
        (None, None) => return Err("either a signature or --file is required".into()),
    };

    print_matches(&matches);
    Ok(())
}

fn print_matches(matches: &[QueryMatch]) {
    if matches.is_empty() {
        println!("{}", "No similar records".yellow());
        return;
    }
    for m in matches {
        let score = format!("{:>3}", m.score);
        let score = if m.score >= 90 {
            score.green()
        } else if m.score >= 50 {
            score.yellow()
        } else {
            score.normal()
        };
        println!("{}  {}  {}", score, m.record_id.dimmed(), m.path);
    }
}

fn run_hash(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(file)?;
    let signature = compute_signature(&data);
    println!("{}  {}", signature, file.display());
    Ok(())
}

fn run_records(
    config: &AppConfig,
    path: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_with_timeout(&config.db_path, config.store.timeout())?;
    let records = db.list_records(path, offset, limit)?;

    if records.is_empty() {
        println!("{}", "No records".yellow());
        return Ok(());
    }
    for record in &records {
        println!(
            "{}  {}  {}  {}",
            record.ingest_time.dimmed(),
            record.id.cyan(),
            record.signature,
            record.path
        );
    }
    Ok(())
}

fn run_extractions(
    config: &AppConfig,
    path: Option<&str>,
    kind: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind = kind.map(str::parse::<ExtractionKind>).transpose()?;
    let db = Database::open_with_timeout(&config.db_path, config.store.timeout())?;
    let extractions = db.list_extractions(path, kind)?;

    if extractions.is_empty() {
        println!("{}", "No extractions".yellow());
        return Ok(());
    }
    for extraction in &extractions {
        println!(
            "{}  {} files  {} bytes  {}",
            extraction.kind.as_str().cyan(),
            format!("{}", extraction.files).green(),
            extraction.size_on_disk,
            extraction.path
        );
    }
    Ok(())
}

fn run_clusters(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = IngestEngine::new(config.clone());
    let clusters = engine.refresh_clusters()?;

    if clusters.is_empty() {
        println!("{}", "No clusters".yellow());
        return Ok(());
    }
    for (cluster_id, members) in &clusters {
        println!(
            "{} ({} records)",
            cluster_id.cyan(),
            format!("{}", members.len()).green()
        );
        for member in members {
            println!("    {}", member);
        }
    }
    Ok(())
}

fn run_queue_stats(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_with_timeout(&config.db_path, config.store.timeout())?;
    let stats = db.queue_stats()?;
    println!(
        "pending: {}  leased: {}  done: {}  failed: {}  records: {}",
        stats.pending,
        stats.leased,
        stats.done,
        stats.failed,
        db.record_count()?
    );
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
