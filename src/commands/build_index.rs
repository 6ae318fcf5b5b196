use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::cli::BuildIndexArgs;
use crate::config;
use crate::embedding::{EmbeddingProvider, OpenAiEmbeddingClient, DEFAULT_API_BASE_URL};
use crate::model::{Document, IndexFile, IndexedDocument};
use crate::util::write_json;

pub fn run(args: BuildIndexArgs) -> Result<()> {
    if !args.input.exists() {
        bail!("document file not found: {}", args.input.display());
    }

    let documents = load_documents(&args.input)?;
    if documents.is_empty() {
        bail!("no documents with text to embed in {}", args.input.display());
    }

    let api_key = config::resolve_api_key(args.api_key.as_deref())
        .context("no embedding API key; pass --api-key or set GPT_KEY / OPENAI_API_KEY")?;
    let model = config::resolve_embedding_model(args.model.as_deref());
    let client = OpenAiEmbeddingClient::new(&api_key, DEFAULT_API_BASE_URL, &model)?;

    let index = build_index(documents, model, &client, args.batch_size)?;
    write_json(&args.output, &index)?;

    info!(
        documents = index.document_count,
        model = %index.model,
        path = %args.output.display(),
        "wrote vector index"
    );

    Ok(())
}

/// Loads the JSONL corpus, dropping blank lines and documents without text.
fn load_documents(path: &Path) -> Result<Vec<Document>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut documents = Vec::<Document>::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let document: Document = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse line {} of {}", number + 1, path.display())
        })?;
        if document.text.trim().is_empty() {
            continue;
        }
        documents.push(document);
    }

    Ok(documents)
}

/// Embeds the corpus in order-preserving batches and assembles the index.
/// Fails without producing output when the vector count disagrees with the
/// document count; there is no partial or incremental mode.
fn build_index(
    documents: Vec<Document>,
    model: String,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<IndexFile> {
    let batch_size = batch_size.max(1);
    let texts = documents
        .iter()
        .map(|document| document.text.as_str())
        .collect::<Vec<&str>>();

    let mut vectors = Vec::<Vec<f32>>::with_capacity(documents.len());
    for (batch_number, batch) in texts.chunks(batch_size).enumerate() {
        let embedded = provider
            .embed_batch(batch)
            .with_context(|| format!("embedding batch {} failed", batch_number + 1))?;
        vectors.extend(embedded);
        info!(
            embedded = vectors.len(),
            total = documents.len(),
            "embedding batch completed"
        );
    }

    if vectors.len() != documents.len() {
        bail!(
            "embedding count mismatch: {} vectors for {} documents",
            vectors.len(),
            documents.len()
        );
    }

    let document_count = documents.len();
    let indexed = documents
        .into_iter()
        .zip(vectors)
        .map(|(document, embedding)| IndexedDocument {
            document,
            embedding,
        })
        .collect::<Vec<IndexedDocument>>();

    Ok(IndexFile {
        model,
        document_count,
        documents: indexed,
    })
}
