use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use wenling::archiver::{ArchiveOutcome, ArchiverOrchestrator};
use wenling::config::Settings;
use wenling::db::{self, SqliteSink};
use wenling::fetch::HttpFetcher;
use wenling::images::ImgurUploader;
use wenling::llm::OpenAiStructurer;

#[derive(Parser)]
#[command(name = "wenling", about = "Archive articles and web pages as structured blocks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, structure and store one or more URLs
    Archive {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Free-form notes stored with every document
        #[arg(long)]
        notes: Option<String>,
        /// Print the result as JSON instead of storing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Structure a saved HTML file and print the result as JSON
    Extract {
        file: PathBuf,
        /// URL the page was saved from (selects the archiver)
        #[arg(long, default_value = "file://local")]
        url: String,
    },
    /// Show archived documents, newest first
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Archived on or after this day (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Archived on or before this day (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Only documents carrying this tag (repeatable, all must match)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Print one archived document and its blocks
    Show { id: i64 },
    /// Show archive statistics
    Stats,
}

fn build_orchestrator(settings: &Settings) -> anyhow::Result<ArchiverOrchestrator> {
    let service = Arc::new(OpenAiStructurer::from_env(settings)?);
    let fetcher = Arc::new(HttpFetcher::new(
        settings.request_timeout_secs,
        settings.retry_policy(),
    )?);
    let sink = Arc::new(
        SqliteSink::open(&settings.db_path)
            .with_context(|| format!("Failed to open {}", settings.db_path))?,
    );
    let orchestrator = ArchiverOrchestrator::new(settings, service, fetcher, sink);

    if settings.rehost_images {
        let uploader = Arc::new(ImgurUploader::from_env(settings.retry_policy())?);
        return Ok(orchestrator.with_image_sink(uploader, settings));
    }
    Ok(orchestrator)
}

fn print_outcome(outcome: &ArchiveOutcome) {
    let props = &outcome.result.properties;
    match &outcome.id {
        Some(id) => println!(
            "Stored #{} \"{}\" [{}] {} blocks, tags: {}",
            id,
            props.title,
            props.source.label(),
            outcome.result.children.len(),
            props.tags.join(", ")
        ),
        None => println!(
            "\"{}\" [{}] {} blocks, tags: {}",
            props.title,
            props.source.label(),
            outcome.result.children.len(),
            props.tags.join(", ")
        ),
    }
    if !outcome.warnings.is_empty() {
        println!("  {} warnings", outcome.warnings.len());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Archive {
            urls,
            notes,
            dry_run,
        } => {
            let orchestrator = build_orchestrator(&settings)?;
            let pb = (urls.len() > 1).then(|| ProgressBar::new(urls.len() as u64));
            if let Some(pb) = &pb {
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                        .progress_chars("=> "),
                );
            }

            let mut failed = 0usize;
            for url in &urls {
                match orchestrator.archive(url, notes.as_deref(), dry_run).await {
                    Ok(outcome) if dry_run => {
                        println!("{}", serde_json::to_string_pretty(&outcome.result)?);
                    }
                    Ok(outcome) => print_outcome(&outcome),
                    Err(e) => {
                        failed += 1;
                        eprintln!("Failed to archive {}: {}", url, e);
                    }
                }
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
            }
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }

            println!("Done: {} archived, {} failed.", urls.len() - failed, failed);
            if failed > 0 && failed == urls.len() {
                anyhow::bail!("no URL could be archived");
            }
            Ok(())
        }
        Commands::Extract { file, url } => {
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let orchestrator = build_orchestrator(&settings)?;
            let outcome = orchestrator.extract(&url, &html, None).await?;
            for warning in &outcome.warnings {
                eprintln!("warning: {}", warning);
            }
            println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            Ok(())
        }
        Commands::List {
            limit,
            from,
            to,
            tags,
        } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let rows = db::query_documents(&conn, from, to, &tags, limit)?;
            if rows.is_empty() {
                println!("No matching documents.");
                return Ok(());
            }

            println!(
                "{:>4} | {:<19} | {:<4} | {:<32} | {:>6} | {}",
                "#", "Archived", "Type", "Title", "Blocks", "Tags"
            );
            println!("{}", "-".repeat(96));
            for r in &rows {
                println!(
                    "{:>4} | {:<19} | {:<4} | {:<32} | {:>6} | {}",
                    r.id,
                    r.archived_at,
                    r.source_type,
                    clip(&r.title, 32),
                    r.block_count,
                    r.tags.join(", ")
                );
            }
            println!("\n{} documents", rows.len());
            Ok(())
        }
        Commands::Show { id } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let Some(doc) = db::fetch_document(&conn, id)? else {
                anyhow::bail!("no document with id {}", id);
            };
            println!("{} [{}]", doc.title, doc.source_type);
            println!("URL:       {}", doc.url);
            println!("Archived:  {}", doc.archived_at);
            if let Some(published) = &doc.published {
                println!("Published: {}", published);
            }
            println!("Tags:      {}", doc.tags.join(", "));
            if !doc.notes.is_empty() {
                println!("Notes:     {}", doc.notes);
            }
            println!();
            for block in db::fetch_blocks(&conn, doc.id)? {
                println!("[{}] {}", block.kind(), block.raw());
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Documents: {}", s.documents);
            println!("Blocks:    {}", s.blocks);
            println!("Images:    {}", s.images);
            for (source, count) in &s.by_source {
                println!("  {}: {}", source, count);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_elapsed(elapsed));
    }

    result
}

/// At most `width` characters; longer titles end in `…`.
fn clip(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn format_elapsed(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    match (secs / 3600, secs % 3600 / 60) {
        (0, 0) => format!("{:.1}s", d.as_secs_f64()),
        (0, m) => format!("{}m {}s", m, secs % 60),
        (h, m) => format!("{}h {}m", h, m),
    }
}
