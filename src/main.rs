//! CLI entry point for qarag.
//!
//! Runs the pipeline over a file-backed deployment under `data_dir`:
//! a vector snapshot in `vectors/`, one chunk collection per document in
//! `chunks/` and the document catalogue in `documents.json`.

use anyhow::{Context, Result};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use qarag::vector::{LexicalCrossEncoder, create_cross_encoder};
use qarag::{
    ChunkIndex, DocumentId, DocumentRecord, Embedder, FacultyScope, FileChunkStore,
    InMemoryDocumentStore, InMemoryVectorIndex, PipelineOptions, PreparedChunk, RagError,
    RagPipeline, RetrieveOptions, Settings,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Question-anchored retrieval over chunked documents
#[derive(Parser)]
#[command(
    name = "qarag",
    version = env!("CARGO_PKG_VERSION"),
    about = "Question-anchored retrieval over chunked documents",
    long_about = "Index document chunks through candidate questions, retrieve reranked contexts, and keep the vector index consistent with the chunk store.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log pipeline activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up .qarag directory
    #[command(about = "Set up .qarag directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,

    /// Index a document from a manifest file
    #[command(
        about = "Index a document and its pre-generated candidate questions",
        after_help = "Manifest format:\n  {\n    \"document_id\": \"regulations-2024\",\n    \"name\": \"Academic regulations\",\n    \"url\": \"https://example.edu/regulations.pdf\",\n    \"faculty\": \"IT\",\n    \"chunks\": [{ \"text\": \"...\", \"questions\": [\"...\"] }]\n  }"
    )]
    Index {
        /// Path to the manifest JSON file
        manifest: PathBuf,
    },

    /// Retrieve ranked contexts for a question
    #[command(about = "Retrieve reranked contexts for a question")]
    Ask {
        question: String,

        /// Faculty scope of the asker; omit to search globally
        #[arg(short, long)]
        faculty: Option<String>,

        /// Nearest candidate questions to fetch
        #[arg(long)]
        top_k_search: Option<usize>,

        /// Contexts to keep after reranking
        #[arg(long)]
        top_k_rerank: Option<usize>,
    },

    /// Delete a document's vectors and chunk collection
    #[command(about = "Delete a document from the index")]
    Delete {
        document_id: String,

        /// Keep the document in the catalogue
        #[arg(long)]
        keep_document: bool,
    },

    /// Append a candidate question to a chunk
    #[command(name = "add-question")]
    AddQuestion {
        document_id: String,
        chunk_index: ChunkIndex,
        question: String,
    },

    /// Remove the candidate question at a position
    #[command(name = "remove-question")]
    RemoveQuestion {
        document_id: String,
        chunk_index: ChunkIndex,
        position: usize,
    },

    /// List a document's chunks
    Chunks {
        document_id: String,

        #[arg(long, default_value = "1")]
        page: usize,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Re-embed every candidate question and rewrite the vector index
    #[command(about = "Rebuild the vector index from the chunk store")]
    Rebuild,

    /// Show index statistics and consistency
    Stats,
}

/// Document description read by `qarag index`.
#[derive(Debug, Deserialize)]
struct Manifest {
    document_id: String,
    name: String,
    url: String,
    #[serde(default)]
    faculty: Option<String>,
    chunks: Vec<PreparedChunk>,
}

#[derive(Debug, Serialize)]
struct Stats {
    documents: usize,
    vectors: usize,
    embedding_model: String,
    dimension: usize,
    consistency: qarag::ConsistencyReport,
}

/// The pipeline plus what is needed to persist it afterwards.
struct Deployment {
    pipeline: RagPipeline,
    index: Arc<InMemoryVectorIndex>,
    documents: InMemoryDocumentStore,
    data_dir: PathBuf,
}

impl Deployment {
    fn open(settings: &Settings, with_reranker: bool) -> Result<Self> {
        let data_dir = settings.data_dir.clone();

        let embedder = Embedder::from_settings(settings)
            .context("Failed to load the embedding model")?;

        let index = Arc::new(
            InMemoryVectorIndex::open(
                &vectors_dir(&data_dir),
                embedder.dimension(),
                embedder.model_name(),
            )
            .context("Failed to load the vector snapshot")?,
        );
        let chunks = Arc::new(
            FileChunkStore::new(data_dir.join("chunks"))
                .context("Failed to open the chunk store")?,
        );
        let documents = InMemoryDocumentStore::load(&documents_path(&data_dir))
            .context("Failed to load the document catalogue")?;

        // Only retrieval scores contexts; skip loading the model otherwise
        let cross_encoder: Arc<dyn qarag::CrossEncoder> = if with_reranker {
            create_cross_encoder(
                &settings.rerank,
                &settings.embedding.cache_dir,
                settings.embedding.show_download_progress,
            )
            .context("Failed to load the cross-encoder")?
        } else {
            Arc::new(LexicalCrossEncoder)
        };

        let pipeline = RagPipeline::new(
            embedder,
            index.clone(),
            chunks,
            Arc::new(documents.clone()),
            cross_encoder,
        )
        .with_options(PipelineOptions::from_settings(settings));

        Ok(Self {
            pipeline,
            index,
            documents,
            data_dir,
        })
    }

    fn save(&self) -> Result<()> {
        self.index
            .save(
                &vectors_dir(&self.data_dir),
                self.pipeline.embedder().model_name(),
            )
            .context("Failed to save the vector snapshot")?;
        self.documents
            .save(&documents_path(&self.data_dir))
            .context("Failed to save the document catalogue")?;
        Ok(())
    }

    /// Undoes an index run that failed or could not be persisted. The chunk
    /// collection and vectors are deleted and the catalogue entry restored.
    fn roll_back(&self, document_id: &DocumentId, previous: Option<DocumentRecord>) {
        if let Err(e) = self.pipeline.delete_document_index(document_id) {
            tracing::warn!(document = %document_id, error = %e, "rollback left index data behind");
        }
        match previous {
            Some(record) => {
                self.documents.insert(document_id.clone(), record);
            }
            None => {
                self.documents.remove(document_id);
            }
        }
        if let Err(e) = self.save() {
            tracing::warn!(document = %document_id, error = %e, "rollback was not persisted");
        }
    }
}

fn vectors_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("vectors")
}

fn documents_path(data_dir: &Path) -> PathBuf {
    data_dir.join("documents.json")
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error:#}");
            if let Some(rag) = error.downcast_ref::<RagError>() {
                eprintln!("Code: {}", rag.status_code());
                for suggestion in rag.recovery_suggestions() {
                    eprintln!("  - {suggestion}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Configuration error loading from {}", path.display()))?,
        None => Settings::load().context("Configuration error")?,
    };
    init_tracing(cli.verbose || settings.debug);

    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
            Ok(())
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }

        Commands::Index { manifest } => {
            let raw = std::fs::read_to_string(&manifest)
                .with_context(|| format!("Failed to read {}", manifest.display()))?;
            let manifest: Manifest = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid manifest {}", manifest.display()))?;

            let deployment = Deployment::open(&settings, false)?;
            let document_id = DocumentId::new(manifest.document_id);
            let scope = FacultyScope::from_option(manifest.faculty.as_deref());

            let previous = deployment.documents.insert(
                document_id.clone(),
                DocumentRecord {
                    name: manifest.name,
                    url: manifest.url,
                    faculty: manifest.faculty,
                },
            );

            let start = Instant::now();
            let result =
                deployment
                    .pipeline
                    .index_prepared_document(&document_id, &manifest.chunks, &scope);

            let report = match result {
                Ok(report) => report,
                Err(e @ RagError::AlreadyIndexed { .. }) => return Err(e.into()),
                Err(e) => {
                    deployment.roll_back(&document_id, previous);
                    return Err(e.into());
                }
            };
            if let Err(e) = deployment.save() {
                deployment.roll_back(&document_id, previous);
                return Err(e);
            }

            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Indexed '{}': {} chunks, {} candidate questions in {:.2}s",
                    report.document_id,
                    report.chunks,
                    report.vectors,
                    start.elapsed().as_secs_f64()
                );
            }
            Ok(())
        }

        Commands::Ask {
            question,
            faculty,
            top_k_search,
            top_k_rerank,
        } => {
            let deployment = Deployment::open(&settings, true)?;
            let scope = FacultyScope::from_option(faculty.as_deref());
            let options = RetrieveOptions {
                top_k_search,
                top_k_rerank,
                ..Default::default()
            };

            let contexts = deployment
                .pipeline
                .retrieve_ranked(&question, &scope, &options)?;

            if cli.json {
                print_json(&contexts)?;
            } else if contexts.is_empty() {
                println!("No matching context.");
            } else {
                for (rank, context) in contexts.iter().enumerate() {
                    println!(
                        "{:>2}. [{:.4}] {}#{}",
                        rank + 1,
                        context.score,
                        context.document_id,
                        context.chunk_index
                    );
                    println!("    {}", context.context);
                }
            }
            Ok(())
        }

        Commands::Delete {
            document_id,
            keep_document,
        } => {
            let deployment = Deployment::open(&settings, false)?;
            let document_id = DocumentId::new(document_id);

            let report = deployment.pipeline.delete_document_index(&document_id)?;
            if !keep_document {
                deployment.documents.remove(&document_id);
            }
            deployment.save()?;

            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Removed {} vectors; chunk collection {}",
                    report.vectors_removed,
                    if report.collection_removed {
                        "deleted"
                    } else {
                        "was already gone"
                    }
                );
            }
            Ok(())
        }

        Commands::AddQuestion {
            document_id,
            chunk_index,
            question,
        } => {
            let deployment = Deployment::open(&settings, false)?;
            let id = deployment.pipeline.add_candidate_question(
                &DocumentId::new(document_id),
                chunk_index,
                &question,
            )?;
            deployment.save()?;

            if cli.json {
                print_json(&serde_json::json!({ "vector_id": id }))?;
            } else {
                println!("Added question as vector {id}");
            }
            Ok(())
        }

        Commands::RemoveQuestion {
            document_id,
            chunk_index,
            position,
        } => {
            let deployment = Deployment::open(&settings, false)?;
            let removed = deployment.pipeline.remove_candidate_question(
                &DocumentId::new(document_id),
                chunk_index,
                position,
            )?;
            deployment.save()?;

            if cli.json {
                print_json(&serde_json::json!({ "removed": removed }))?;
            } else {
                println!("Removed: {removed}");
            }
            Ok(())
        }

        Commands::Chunks {
            document_id,
            page,
            limit,
        } => {
            let deployment = Deployment::open(&settings, false)?;
            let chunks =
                deployment
                    .pipeline
                    .list_chunks(&DocumentId::new(document_id), page, limit)?;

            if cli.json {
                print_json(&chunks)?;
            } else {
                println!(
                    "Page {}/{} ({} chunks)",
                    chunks.current_page, chunks.total_pages, chunks.total
                );
                for (index, chunk) in &chunks.items {
                    println!("[{index}] {}", chunk.text);
                    for (position, question) in chunk.candidate_questions.iter().enumerate() {
                        println!("    {position}: {question}");
                    }
                }
            }
            Ok(())
        }

        Commands::Rebuild => {
            let deployment = Deployment::open(&settings, false)?;
            let start = Instant::now();
            let report = deployment.pipeline.rebuild_all()?;
            deployment.save()?;

            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Rebuilt {} collections ({} chunks, {} questions) in {:.2}s",
                    report.collections,
                    report.chunks,
                    report.questions_embedded,
                    start.elapsed().as_secs_f64()
                );
                for failure in &report.failures {
                    println!("  failed: {} {:?} {:?}: {}", failure.document_id, failure.chunk_index, failure.position, failure.reason);
                }
                for orphan in &report.orphaned_documents {
                    println!("  orphaned collection: {orphan}");
                }
            }
            Ok(())
        }

        Commands::Stats => {
            let deployment = Deployment::open(&settings, false)?;
            let consistency = deployment.pipeline.check_consistency()?;
            let stats = Stats {
                documents: deployment.documents.len(),
                vectors: deployment.pipeline.vector_count(),
                embedding_model: deployment.pipeline.embedder().model_name().to_string(),
                dimension: deployment.pipeline.embedder().dimension().get(),
                consistency,
            };

            if cli.json {
                print_json(&stats)?;
            } else {
                println!("Documents:        {}", stats.documents);
                println!("Chunks:           {}", stats.consistency.chunks);
                println!("Vectors:          {}", stats.vectors);
                println!("Embedding model:  {} ({}d)", stats.embedding_model, stats.dimension);
                if stats.consistency.is_consistent() {
                    println!("Consistency:      ok");
                } else {
                    println!(
                        "Consistency:      {} inconsistent chunks, {} dangling ids, {} orphaned vectors",
                        stats.consistency.inconsistent_chunks.len(),
                        stats.consistency.dangling_vector_ids,
                        stats.consistency.orphaned_vectors
                    );
                    println!("                  run 'qarag rebuild' to repair");
                }
            }
            Ok(())
        }
    }
}
