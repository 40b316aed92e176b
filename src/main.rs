//! # kb-retrieval CLI (`kbr`)
//!
//! The `kbr` binary is the operator interface to the retrieval
//! subsystem: database initialization, document ingestion and
//! re-indexing, tenant-scoped hybrid search, and embedding-store
//! migration.
//!
//! ## Usage
//!
//! ```bash
//! kbr --config ./config/kbr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbr init` | Create the SQLite database and schema |
//! | `kbr add <file>` | Ingest a text file as a knowledge base document |
//! | `kbr reindex <id>` | Re-run the pipeline for an existing document |
//! | `kbr search "<query>"` | Tenant-scoped hybrid search |
//! | `kbr migrate <source-db>` | Re-embed a legacy store into this one |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! kbr init
//!
//! # Ingest an organization-scoped document
//! kbr add ./handbook.txt --org org-1 --title "Employee Handbook"
//!
//! # Hybrid search within an organization
//! kbr search "refund policy" --org org-1
//!
//! # Preview a migration, then run it for real
//! kbr migrate ./legacy.sqlite
//! kbr migrate ./legacy.sqlite --execute --delete-after-success
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use kb_retrieval::config::{load_config, Config};
use kb_retrieval::db;
use kb_retrieval::embedding::create_embedder;
use kb_retrieval::reranker::create_reranker;
use kb_retrieval::sqlite_store::{
    SqliteDocumentStore, SqliteKeywordIndex, SqliteRecordSource, SqliteVectorStore,
};
use kb_retrieval_core::capabilities::DocumentStore;
use kb_retrieval_core::migrate::{migrate, MigrationOptions};
use kb_retrieval_core::models::{KnowledgeBaseDocument, ProcessingStatus, Scope, TenantFilter};
use kb_retrieval_core::pipeline::DocumentPipeline;
use kb_retrieval_core::search::SearchEngine;

/// kb-retrieval CLI — hybrid search and embedding-store migration for a
/// multi-tenant knowledge base.
#[derive(Parser)]
#[command(
    name = "kbr",
    about = "Multi-tenant knowledge base retrieval — hybrid search and embedding-store migration",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest a plain-text file as a knowledge base document and index it.
    Add {
        /// Path to the extracted text file.
        file: PathBuf,
        /// Document title.
        #[arg(long)]
        title: String,
        /// Owning organization id.
        #[arg(long)]
        org: Option<String>,
        /// Owning project id (requires --org).
        #[arg(long)]
        project: Option<String>,
        /// Index with global visibility instead of a tenant scope.
        #[arg(long, conflicts_with_all = ["org", "project"])]
        global: bool,
    },

    /// Re-run the indexing pipeline for an existing document.
    Reindex {
        /// Document id.
        document_id: String,
        /// Organization the document belongs to.
        #[arg(long)]
        org: String,
    },

    /// Search indexed content, scoped to one tenant.
    Search {
        /// Query text.
        query: String,
        /// Organization to search within.
        #[arg(long)]
        org: String,
        /// Narrow to one project.
        #[arg(long)]
        project: Option<String>,
        /// Maximum results (default from config, capped at 50).
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Minimum fused score to keep.
        #[arg(long)]
        threshold: Option<f64>,
        /// Vector similarity only; skip the keyword signal.
        #[arg(long)]
        no_hybrid: bool,
        /// Skip reranking even if a reranker is configured.
        #[arg(long)]
        no_rerank: bool,
        /// Extra store filter, repeatable (key=value).
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,
        /// Emit JSON instead of human-readable output.
        #[arg(long)]
        json: bool,
    },

    /// Re-embed every record of a legacy store into this database.
    ///
    /// Runs as a dry run unless --execute is given. Per-group failures
    /// never abort the run; the summary reports them and the command is
    /// safe to re-run.
    Migrate {
        /// Path to the legacy SQLite database.
        source_db: PathBuf,
        /// Actually write (and optionally delete); default is a dry run.
        #[arg(long)]
        execute: bool,
        /// Remove each group's source records after its target upsert
        /// succeeds.
        #[arg(long)]
        delete_after_success: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Add {
            file,
            title,
            org,
            project,
            global,
        } => run_add(&config, file, title, org, project, global).await,
        Commands::Reindex { document_id, org } => run_reindex(&config, &document_id, &org).await,
        Commands::Search {
            query,
            org,
            project,
            limit,
            threshold,
            no_hybrid,
            no_rerank,
            filters,
            json,
        } => {
            run_search(
                &config, &query, &org, project, limit, threshold, no_hybrid, no_rerank, filters,
                json,
            )
            .await
        }
        Commands::Migrate {
            source_db,
            execute,
            delete_after_success,
        } => run_migrate(&config, source_db, execute, delete_after_success).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    db::init_schema(&pool).await?;
    println!("initialized {}", config.db.path.display());
    pool.close().await;
    Ok(())
}

async fn run_add(
    config: &Config,
    file: PathBuf,
    title: String,
    org: Option<String>,
    project: Option<String>,
    global: bool,
) -> Result<()> {
    // Text extraction is an upstream concern; `add` takes already-
    // extracted plain text.
    let text = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let (scope, scope_id, organization_id) = match (global, org, project) {
        (true, _, _) => (Scope::Global, None, None),
        (false, Some(org), Some(project)) => (Scope::Project, Some(project), Some(org)),
        (false, Some(org), None) => (Scope::Organization, Some(org), None),
        (false, None, _) => bail!("either --org or --global is required"),
    };

    let now = chrono::Utc::now();
    let mut document = KnowledgeBaseDocument {
        id: Uuid::new_v4().to_string(),
        scope,
        scope_id,
        organization_id,
        title,
        storage_ref: file.display().to_string(),
        extracted_text: Some(text),
        processing_status: ProcessingStatus::Pending,
        processing_error: None,
        created_at: now,
        updated_at: now,
    };

    let pool = db::connect(&config.db.path).await?;
    db::init_schema(&pool).await?;
    let documents = SqliteDocumentStore::new(pool.clone());
    let vectors = SqliteVectorStore::new(pool.clone());
    let keywords = SqliteKeywordIndex::new(pool.clone());
    let embedder = create_embedder(&config.embedding)?;

    documents.put(&document).await?;
    let pipeline = DocumentPipeline::new(
        embedder.as_ref(),
        &vectors,
        &documents,
        config.chunking.max_tokens,
    )
    .with_keyword_index(&keywords);

    match pipeline.index(&mut document).await {
        Ok(summary) => {
            println!(
                "indexed {} ({} chunks)",
                summary.document_id, summary.chunks_indexed
            );
        }
        Err(err) => {
            println!("indexing failed for {}: {err}", document.id);
            println!("resubmit with: kbr reindex {}", document.id);
        }
    }
    pool.close().await;
    Ok(())
}

async fn run_reindex(config: &Config, document_id: &str, org: &str) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let documents = SqliteDocumentStore::new(pool.clone());
    let vectors = SqliteVectorStore::new(pool.clone());
    let keywords = SqliteKeywordIndex::new(pool.clone());
    let embedder = create_embedder(&config.embedding)?;

    let pipeline = DocumentPipeline::new(
        embedder.as_ref(),
        &vectors,
        &documents,
        config.chunking.max_tokens,
    )
    .with_keyword_index(&keywords);

    match pipeline.reindex(document_id, org).await {
        Ok(()) => println!("reindexed {document_id}"),
        Err(err) => println!("reindex failed: {err}"),
    }
    pool.close().await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_search(
    config: &Config,
    query: &str,
    org: &str,
    project: Option<String>,
    limit: Option<usize>,
    threshold: Option<f64>,
    no_hybrid: bool,
    no_rerank: bool,
    filters: Vec<String>,
    json: bool,
) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let vectors = SqliteVectorStore::new(pool.clone());
    let keywords = SqliteKeywordIndex::new(pool.clone());
    let embedder = create_embedder(&config.embedding)?;
    let reranker = create_reranker(&config.reranker)?;

    let mut options = config.retrieval.search_options();
    if let Some(limit) = limit {
        options.limit = limit;
    }
    if let Some(threshold) = threshold {
        options.score_threshold = threshold;
    }
    options.use_hybrid = !no_hybrid;
    options.use_reranking = !no_rerank;
    options.filters = parse_filters(&filters)?;

    let tenant = match project {
        Some(project) => TenantFilter::project(org, project),
        None => TenantFilter::organization(org),
    };

    let mut engine = SearchEngine::new(embedder.as_ref(), &vectors).with_keyword_index(&keywords);
    if let Some(reranker) = &reranker {
        engine = engine.with_reranker(reranker);
    }

    // Ctrl-C cancels the in-flight embed/store calls; a cancelled search
    // returns no partial results.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let results = engine.search(query, &tenant, &options, &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("No results.");
    } else {
        for (i, result) in results.iter().enumerate() {
            println!("{}. [{:.3}] {}", i + 1, result.score, result.content_id);
            let excerpt: String = result.content_text.chars().take(160).collect();
            println!("   {}", excerpt.replace('\n', " "));
        }
        println!("\n{} result(s)", results.len());
    }
    pool.close().await;
    Ok(())
}

async fn run_migrate(
    config: &Config,
    source_db: PathBuf,
    execute: bool,
    delete_after_success: bool,
) -> Result<()> {
    let source_pool = db::connect(&source_db).await?;
    let target_pool = db::connect(&config.db.path).await?;
    db::init_schema(&target_pool).await?;

    let source = SqliteRecordSource::new(source_pool.clone());
    let target = SqliteVectorStore::new(target_pool.clone());
    let embedder = create_embedder(&config.embedding)?;

    let options = MigrationOptions {
        dry_run: !execute,
        delete_after_success,
        concurrency: config.migration.concurrency,
    };

    let summary = migrate(&source, embedder.as_ref(), &target, &options).await?;
    if options.dry_run {
        println!("dry run (pass --execute to write):");
    }
    print!("{summary}");

    source_pool.close().await;
    target_pool.close().await;
    Ok(())
}

fn parse_filters(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut filters = HashMap::new();
    for entry in raw {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                filters.insert(key.to_string(), value.to_string());
            }
            _ => bail!("invalid filter {entry:?}, expected key=value"),
        }
    }
    Ok(filters)
}
