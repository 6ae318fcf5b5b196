use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::retriever::{DEFAULT_MIN_SCORE, DEFAULT_TOP_K};

#[derive(Parser, Debug)]
#[command(
    name = "certrag",
    version,
    about = "Certificate RAG corpus, index, and retrieval tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the flat text corpus from the data workbook.
    BuildDocs(BuildDocsArgs),
    /// Embed the corpus and write the vector index file.
    BuildIndex(BuildIndexArgs),
    /// Run a top-k similarity query against the index.
    Query(QueryArgs),
    /// Report what the index file currently contains.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BuildDocsArgs {
    #[arg(long, default_value = "data/data.xlsx")]
    pub input: PathBuf,

    #[arg(long, default_value = "data/rag/documents.jsonl")]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct BuildIndexArgs {
    #[arg(long, default_value = "data/rag/documents.jsonl")]
    pub input: PathBuf,

    #[arg(long, default_value = "data/rag/index.json")]
    pub output: PathBuf,

    /// Embedding model name; falls back to RAG_EMBEDDING_MODEL, then the built-in default.
    #[arg(long)]
    pub model: Option<String>,

    /// Embedding API key; falls back to GPT_KEY, then OPENAI_API_KEY.
    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long)]
    pub query: String,

    /// Index file path; falls back to RAG_INDEX_PATH, then the built-in default.
    #[arg(long)]
    pub index_path: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    #[arg(long, default_value_t = DEFAULT_MIN_SCORE)]
    pub min_score: f64,

    /// Embedding API key; falls back to GPT_KEY, then OPENAI_API_KEY.
    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long)]
    pub index_path: Option<PathBuf>,
}
