//! Command implementations

use super::{AskArgs, CardArgs, ConfigArgs, GlossaryArgs, IngestArgs, OutputFormat, RuleArgs, SearchArgs};
use crate::config::{default_config_path, AppConfig};
use crate::extract::rules::is_rule_number;
use crate::index::{IndexError, IndexOrigin, Retriever, SearchHit, VectorIndex};
use crate::ingest::{ingest_sources, write_store, IngestSummary, SourcePaths, StoreCounts};
use crate::query::{QueryOutcome, QueryPipeline};
use crate::storage::{Database, DatabaseStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Configuration and output settings shared by every command
pub struct Session {
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub format: OutputFormat,
}

impl Session {
    /// Load the configuration, falling back to defaults when the file is absent
    pub fn load(config_path: Option<PathBuf>, format: OutputFormat, api_key: Option<&str>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(default_config_path);
        let mut config = AppConfig::load_or_default(&config_path)?;

        if let Some(key) = api_key {
            config.apply_api_key(key);
        }

        Ok(Self {
            config,
            config_path,
            format,
        })
    }

    fn open_database(&self) -> Result<Database> {
        let path = self.config.database_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        Database::open(&path)
    }

    fn open_existing_database(&self) -> Result<Database> {
        let path = self.config.database_path();
        if !path.exists() {
            anyhow::bail!("No database at {:?}. Run 'mtgsage ingest' first.", path);
        }
        Database::open(&path)
    }

    fn load_index(&self) -> Result<VectorIndex> {
        let dir = self.config.index_dir();
        match VectorIndex::load(&dir) {
            Ok(index) => Ok(index),
            Err(IndexError::NotFound(_)) => {
                anyhow::bail!("No index at {:?}. Run 'mtgsage ingest' first.", dir)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn source_paths(&self) -> SourcePaths {
        let sources = &self.config.sources;
        SourcePaths {
            cards: self.config.resolve(&sources.cards),
            rulings: self.config.resolve(&sources.rulings),
            rules: self.config.resolve(&sources.rules),
            glossary: self.config.resolve(&sources.glossary),
        }
    }
}

/// Index facts shown by `ingest` and `stats`
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub collection: String,
    pub entries: usize,
    pub dimension: Option<usize>,
    pub content_hash: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<&'static str>,
}

impl IndexSummary {
    fn new(index: &VectorIndex, origin: Option<IndexOrigin>) -> Self {
        Self {
            collection: index.collection().to_string(),
            entries: index.len(),
            dimension: index.dimension(),
            content_hash: index.content_hash().map(str::to_string),
            built_at: index.built_at(),
            origin: origin.map(|o| match o {
                IndexOrigin::Loaded => "loaded",
                IndexOrigin::Built => "built",
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct IngestOutput {
    sources: IngestSummary,
    store: StoreCounts,
    index: Option<IndexSummary>,
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    database: DatabaseStats,
    index: Option<IndexSummary>,
}

/// Write the default configuration and create the database schema
pub fn init(session: &Session, force: bool) -> Result<()> {
    if session.config_path.exists() && !force {
        anyhow::bail!(
            "Configuration already exists at {:?}. Use --force to overwrite.",
            session.config_path
        );
    }

    session.config.save(&session.config_path)?;
    let db_path = session.config.database_path();
    session.open_database()?;

    println!("✓ Initialized mtgsage");
    println!("  Config: {:?}", session.config_path);
    println!("  Database: {:?}", db_path);
    println!("\nPlace the source files below, then run 'mtgsage ingest':");
    let paths = session.source_paths();
    for path in [&paths.cards, &paths.rulings, &paths.rules, &paths.glossary] {
        println!("  {:?}", path);
    }

    Ok(())
}

/// Parse all sources, write the store and build or reload the index
pub async fn ingest(session: &Session, args: &IngestArgs) -> Result<()> {
    let config = &session.config;
    let report = ingest_sources(&session.source_paths()).await;

    let db = session.open_database()?;
    let store = write_store(&db, &report)?;

    let index = if args.skip_index {
        None
    } else {
        let documents = report.normalized();
        let embedder = config.embedder();
        let dir = config.index_dir();
        let collection = &config.storage.collection;
        let batch_size = config.embedding.batch_size;

        let (index, origin) = if args.rebuild {
            let index =
                VectorIndex::build(collection, &documents, embedder.as_ref(), batch_size).await?;
            index.persist(&dir)?;
            (index, IndexOrigin::Built)
        } else {
            VectorIndex::open_or_build(&dir, collection, &documents, embedder.as_ref(), batch_size)
                .await?
        };

        Some(IndexSummary::new(&index, Some(origin)))
    };

    let output = IngestOutput {
        sources: report.summary(),
        store,
        index,
    };

    match session.format {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Text => print_ingest_text(&output),
    }

    Ok(())
}

/// Answer a question with the full pipeline
pub async fn ask(session: &Session, args: &AskArgs) -> Result<()> {
    let question = args.question.join(" ");
    let config = &session.config;

    let db = session.open_existing_database()?;
    let index = session.load_index()?;
    let embedder = config.embedder();
    let client = config.llm_client();
    if !client.is_available().await {
        tracing::warn!("Generative service at {} is not reachable", client.config().endpoint);
    }

    let pipeline = QueryPipeline::new(&db, &index, embedder.as_ref(), &client)
        .with_config(config.pipeline_config());

    let outcome = pipeline.answer(&question).await?;

    match session.format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => print_answer_text(&outcome, args.show_sources),
    }

    Ok(())
}

/// Raw similarity search
pub async fn search(session: &Session, args: &SearchArgs) -> Result<()> {
    let query = args.query.join(" ");
    let config = &session.config;

    let index = session.load_index()?;
    let embedder = config.embedder();
    let retriever = Retriever::new(
        args.k.unwrap_or(config.retrieval.top_k),
        args.min_score.unwrap_or(config.retrieval.min_score),
    );

    let hits = retriever.retrieve(&index, &query, embedder.as_ref()).await?;

    match session.format {
        OutputFormat::Json => print_json(&hits)?,
        OutputFormat::Text => print_hits_text(&hits),
    }

    Ok(())
}

/// Look up a card by name or oracle id
pub fn card(session: &Session, args: &CardArgs) -> Result<()> {
    let db = session.open_existing_database()?;

    let (cards, key) = match args.oracle_id {
        Some(ref oracle_id) => (
            db.get_card_by_oracle_id(oracle_id)?.into_iter().collect::<Vec<_>>(),
            oracle_id.clone(),
        ),
        None => {
            let name = args.name.join(" ");
            (db.get_cards_by_name(&name)?, name)
        }
    };

    if cards.is_empty() {
        anyhow::bail!("Card not found: {}", key);
    }

    match session.format {
        OutputFormat::Json => print_json(&cards)?,
        OutputFormat::Text => {
            let blocks: Vec<String> = cards.iter().map(|c| c.to_context()).collect();
            println!("{}", blocks.join("\n\n"));
        }
    }

    Ok(())
}

/// Show a rule with its direct sub-rules
pub fn rule(session: &Session, args: &RuleArgs) -> Result<()> {
    let number = args.number.trim().to_lowercase();
    if !is_rule_number(&number) {
        anyhow::bail!("Not a rule number: '{}' (expected something like 702.19b)", args.number);
    }

    let db = session.open_existing_database()?;

    let rule = db
        .get_rule_with_children(&number)?
        .ok_or_else(|| anyhow::anyhow!("Rule not found: {}", number))?;

    match session.format {
        OutputFormat::Json => print_json(&rule)?,
        OutputFormat::Text => println!("{}", rule.render()),
    }

    Ok(())
}

/// Look up a glossary term
pub fn glossary(session: &Session, args: &GlossaryArgs) -> Result<()> {
    let term = args.term.join(" ");
    let db = session.open_existing_database()?;

    let entry = db
        .get_glossary_term(&term)?
        .ok_or_else(|| anyhow::anyhow!("Glossary term not found: {}", term))?;

    match session.format {
        OutputFormat::Json => print_json(&entry)?,
        OutputFormat::Text => {
            println!("{}", entry.term);
            println!("  {}", entry.definition);
            if !entry.rule_refs.is_empty() {
                println!("  See: {}", entry.rule_refs.join(", "));
            }
        }
    }

    Ok(())
}

/// Show row counts and a summary of the stored index
pub fn stats(session: &Session) -> Result<()> {
    let db = session.open_existing_database()?;
    let database = db.get_stats()?;

    let index = match VectorIndex::load(&session.config.index_dir()) {
        Ok(index) => Some(IndexSummary::new(&index, None)),
        Err(IndexError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    let output = StatsOutput { database, index };

    match session.format {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Text => print_stats_text(&output),
    }

    Ok(())
}

/// Show or reset the configuration
pub fn show_config(session: &Session, args: &ConfigArgs) -> Result<()> {
    if args.reset {
        AppConfig::default().save(&session.config_path)?;
        println!("✓ Configuration reset to defaults");
        println!("  Config: {:?}", session.config_path);
        return Ok(());
    }

    match session.format {
        OutputFormat::Json => print_json(&session.config)?,
        OutputFormat::Text => {
            println!("mtgsage Configuration");
            println!("=====================\n");
            println!("File: {:?}", session.config_path);
            if !session.config_path.exists() {
                println!("(not saved yet, showing defaults)");
            }
            println!();
            print!(
                "{}",
                toml::to_string_pretty(&session.config).context("Failed to render configuration")?
            );
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

fn print_ingest_text(output: &IngestOutput) {
    let sources = &output.sources;

    println!("Ingestion Report");
    println!("================\n");
    println!("Cards: {}", sources.cards);
    println!("Rules: {}", sources.rules);
    println!("Glossary terms: {}", sources.glossary_terms);
    println!("New rulings stored: {}", output.store.rulings_inserted);

    if !sources.warnings.is_empty() {
        println!("\nSkipped records: {}", sources.warnings.len());
        for warning in sources.warnings.iter().take(10) {
            println!("  ⚠ {}", warning);
        }
        if sources.warnings.len() > 10 {
            println!("  ... and {} more", sources.warnings.len() - 10);
        }
    }

    for failure in &sources.failures {
        println!("\n✗ Source {} failed: {}", failure.source, failure.error);
    }

    match output.index {
        Some(ref index) => println!(
            "\n✓ Index '{}' {} with {} entries",
            index.collection,
            index.origin.unwrap_or("ready"),
            index.entries
        ),
        None => println!("\nIndex skipped"),
    }
}

fn print_answer_text(outcome: &QueryOutcome, show_sources: bool) {
    println!("{}", outcome.answer.text.trim());

    if !show_sources {
        return;
    }

    let context = &outcome.context;
    println!("\nSources");
    println!("-------");

    if !context.cards.is_empty() {
        let names: Vec<&str> = context.cards.iter().map(|c| c.card.name.as_str()).collect();
        println!("Cards: {}", names.join(", "));
    }
    if !context.unresolved.is_empty() {
        println!("Not found: {}", context.unresolved.join(", "));
    }
    if !context.rules.is_empty() {
        let numbers: Vec<&str> = context
            .rules
            .iter()
            .map(|r| r.rule.rule_number.as_str())
            .collect();
        println!("Rules: {}", numbers.join(", "));
    }
    print_hits_text(&context.passages);
}

fn print_hits_text(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No matching passages.");
        return;
    }

    for (i, hit) in hits.iter().enumerate() {
        let first_line = hit.content.lines().next().unwrap_or("");
        println!("[{}] {:.3} {}", i + 1, hit.score, hit.id);
        println!("    {}", truncate(first_line, 100));
    }
}

fn print_stats_text(output: &StatsOutput) {
    let db = &output.database;

    println!("mtgsage Status");
    println!("==============\n");
    println!("Cards: {} ({} with rulings)", db.cards, db.cards_with_rulings);
    println!("Rulings: {}", db.rulings);
    println!("Rules: {} ({} base rules)", db.rules, db.base_rules);
    println!("Glossary terms: {}", db.glossary_terms);

    match output.index {
        Some(ref index) => {
            println!("\nIndex '{}': {} entries", index.collection, index.entries);
            if let Some(dim) = index.dimension {
                println!("  Dimension: {}", dim);
            }
            if let Some(built_at) = index.built_at {
                println!("  Built: {}", built_at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        None => println!("\nIndex: not built"),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
