use clap::{Parser, Subcommand};
use regqa_chunk::WindowChunker;
use regqa_embed::{EmbeddingProvider, FastEmbedProvider, HashingEmbeddingProvider};
use regqa_retriever::config::Settings;
use regqa_retriever::retrieval::{
    AnswerAssembler, GenerationProvider, HttpGenerationProvider, Indexer, NewDocument, Retriever,
    StaticGenerationProvider,
};
use regqa_retriever::storage::sqlite_store::{DB_FILE_NAME, SqliteStore};
use regqa_retriever::storage::DocumentStore;
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// A CLI tool to ingest regulatory documents and ask grounded questions
/// against the regqa retrieval store.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base directory containing the retrieval database
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Use the deterministic hashing embedder instead of the ONNX model
    /// (offline mode; vectors are not semantic)
    #[arg(long)]
    hash_embedder: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the retrieval database
    Init,
    /// Ingest a document file
    Ingest {
        /// Path to the document text file
        file: PathBuf,
        /// Document title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,
        /// Language code, e.g. "am" or "en"
        #[arg(short, long)]
        language: Option<String>,
        /// Origin URL of the document
        #[arg(short, long)]
        source_url: Option<String>,
    },
    /// Retrieve ranked chunks for a query
    Search {
        query: String,
        /// Restrict to documents in this language (or with no language set)
        #[arg(short, long)]
        language: Option<String>,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 10)]
        top_k: usize,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Retrieve and assemble a grounded answer for a query
    Ask {
        query: String,
        /// Restrict to documents in this language (or with no language set)
        #[arg(short, long)]
        language: Option<String>,
        /// Generation service endpoint (overrides regqa.toml)
        #[arg(short, long)]
        generation_url: Option<String>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List ingested documents
    Documents {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show database statistics
    Stats,
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
struct SearchResultOutput {
    score: f32,
    signal: String,
    document_title: String,
    seq_index: i64,
    page: Option<i64>,
    content: String,
}

#[derive(Serialize)]
struct DocumentOutput {
    id: i64,
    title: String,
    status: String,
    language: Option<String>,
    source_url: Option<String>,
    content_hash: String,
    created_at: i64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args.base_dir)?;

    match args.command {
        Commands::Init => {
            let _store = SqliteStore::open(&args.base_dir).await?;
            println!(
                "Initialized retrieval database at {}/{DB_FILE_NAME}",
                args.base_dir.display()
            );
            Ok(())
        }
        Commands::Ingest {
            file,
            title,
            language,
            source_url,
        } => {
            let bytes = std::fs::read(&file)?;
            let title = title.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "untitled".to_string())
            });

            let store = Arc::new(SqliteStore::open(&args.base_dir).await?);
            let embedder = build_embedder(&settings, args.hash_embedder).await?;
            let chunker = WindowChunker::new(settings.chunker_config())?;
            let indexer = Indexer::new(store.clone(), embedder, chunker);

            let document = indexer
                .ingest(NewDocument {
                    title,
                    source_url,
                    language,
                    bytes,
                })
                .await?;

            let chunk_count = store.get_chunks(document.id).await?.len();
            println!(
                "Document {}: \"{}\" ({}, {} chunks)",
                document.id, document.title, document.status, chunk_count
            );
            Ok(())
        }
        Commands::Search {
            query,
            language,
            top_k,
            format,
        } => {
            let store = Arc::new(SqliteStore::open(&args.base_dir).await?);
            let embedder = build_embedder(&settings, args.hash_embedder).await?;
            let retriever = Retriever::new(store, embedder, settings.retriever_config());

            let results = retriever
                .retrieve(&query, language.as_deref(), top_k)
                .await;

            match format {
                OutputFormat::Json => {
                    let output: Vec<SearchResultOutput> =
                        results.iter().map(search_output).collect();
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} chunks:", results.len());
                    for result in &results {
                        println!(
                            "  Score: {:.3} [{}] | {} #{} | {}",
                            result.score,
                            result.signal,
                            result.document.title,
                            result.chunk.seq_index,
                            preview(&result.chunk.content, 100)
                        );
                    }
                }
                OutputFormat::Full => {
                    for result in &results {
                        println!("Score: {:.3} ({})", result.score, result.signal);
                        println!("Document: {}", result.document.title);
                        println!("Chunk: #{}", result.chunk.seq_index);
                        println!("Content:\n{}", result.chunk.content);
                        println!("---");
                    }
                }
            }
            Ok(())
        }
        Commands::Ask {
            query,
            language,
            generation_url,
            format,
        } => {
            let store = Arc::new(SqliteStore::open(&args.base_dir).await?);
            let embedder = build_embedder(&settings, args.hash_embedder).await?;
            let retriever = Retriever::new(store, embedder, settings.retriever_config());

            let generation: Arc<dyn GenerationProvider> = match generation_url
                .or_else(|| settings.generation_url.clone())
            {
                Some(url) => Arc::new(HttpGenerationProvider::new(url)?),
                None => {
                    eprintln!(
                        "Note: no generation endpoint configured; answers degrade to the insufficient-information template"
                    );
                    Arc::new(StaticGenerationProvider::failing())
                }
            };
            let assembler = AnswerAssembler::new(generation, settings.assembler_config());

            let ranked = retriever
                .retrieve(&query, language.as_deref(), settings.top_k_dense)
                .await;
            let answer = assembler.assemble(&query, &ranked).await;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&answer)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("{}", answer.response_text);
                    println!("\nConfidence: {:.2}", answer.confidence);
                    if !answer.citations.is_empty() {
                        println!("Citations:");
                        for citation in &answer.citations {
                            match citation.page {
                                Some(page) => {
                                    println!("  - {} (page {page})", citation.source_title)
                                }
                                None => println!("  - {}", citation.source_title),
                            }
                            println!("    \"{}\"", preview(&citation.excerpt, 120));
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Documents { format } => {
            let store = SqliteStore::open(&args.base_dir).await?;
            let documents = store.list_documents().await?;

            match format {
                OutputFormat::Json => {
                    let output: Vec<DocumentOutput> = documents
                        .iter()
                        .map(|d| DocumentOutput {
                            id: d.id,
                            title: d.title.clone(),
                            status: d.status.to_string(),
                            language: d.language.clone(),
                            source_url: d.source_url.clone(),
                            content_hash: hex::encode(d.content_hash),
                            created_at: d.created_at,
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("{} documents:", documents.len());
                    for d in &documents {
                        println!(
                            "  {} | {} | {} | {}",
                            d.id,
                            d.status,
                            d.language.as_deref().unwrap_or("-"),
                            d.title
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let store = SqliteStore::open(&args.base_dir).await?;
            let stats = store.stats().await?;

            println!("Database Statistics:");
            println!("  Documents: {}", stats.documents);
            println!("  Indexed documents: {}", stats.indexed_documents);
            println!("  Chunks: {}", stats.chunks);
            println!("  Chunks with embeddings: {}", stats.embedded_chunks);
            Ok(())
        }
    }
}

async fn build_embedder(
    settings: &Settings,
    hash_embedder: bool,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    if hash_embedder {
        Ok(Arc::new(HashingEmbeddingProvider::default()))
    } else {
        Ok(Arc::new(
            FastEmbedProvider::create(settings.embed_config()).await?,
        ))
    }
}

fn search_output(result: &regqa_retriever::retrieval::RetrievalResult) -> SearchResultOutput {
    SearchResultOutput {
        score: result.score,
        signal: result.signal.to_string(),
        document_title: result.document.title.clone(),
        seq_index: result.chunk.seq_index,
        page: result.chunk.metadata.get("page").and_then(|v| v.as_i64()),
        content: result.chunk.content.clone(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let snippet: String = text.chars().take(max_chars).collect();
    let snippet = if snippet.len() < text.len() {
        format!("{snippet}...")
    } else {
        snippet
    };
    snippet.replace('\n', " ")
}
