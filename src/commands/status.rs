use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::config;

pub fn run(args: StatusArgs) -> Result<()> {
    let path = config::resolve_index_path(args.index_path.as_deref());

    if !path.exists() {
        warn!(path = %path.display(), "index file missing");
        return Ok(());
    }

    let report = inspect_index(&path)?;

    info!(
        path = %path.display(),
        model = %report.model.as_deref().unwrap_or("<unset>"),
        declared_count = report.declared_count,
        documents = report.documents,
        usable_documents = report.usable_documents,
        embedding_dim = report.embedding_dim.unwrap_or(0),
        count_consistent = report.count_consistent(),
        ragged = report.ragged,
        "index status"
    );

    if !report.count_consistent() {
        warn!(
            declared = report.declared_count,
            actual = report.documents,
            "document_count does not match the stored document list"
        );
    }
    if report.ragged {
        warn!("embedding dimensions are not uniform; the retriever will refuse this index");
    }

    Ok(())
}

#[derive(Debug)]
pub struct IndexStatusReport {
    pub model: Option<String>,
    pub declared_count: usize,
    pub documents: usize,
    pub usable_documents: usize,
    pub embedding_dim: Option<usize>,
    pub ragged: bool,
}

impl IndexStatusReport {
    pub fn count_consistent(&self) -> bool {
        self.declared_count == self.documents
    }
}

/// Summary view of the index file; only the fields status reporting needs.
#[derive(Debug, Deserialize)]
struct IndexSummary {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    document_count: usize,
    #[serde(default)]
    documents: Vec<DocumentSummary>,
}

#[derive(Debug, Deserialize)]
struct DocumentSummary {
    #[serde(default)]
    text: String,
    #[serde(default)]
    embedding: Vec<f32>,
}

pub fn inspect_index(path: &Path) -> Result<IndexStatusReport> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let summary: IndexSummary = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let usable_documents = summary
        .documents
        .iter()
        .filter(|document| !document.text.is_empty() && !document.embedding.is_empty())
        .count();

    let dimensions = summary
        .documents
        .iter()
        .filter(|document| !document.embedding.is_empty())
        .map(|document| document.embedding.len())
        .collect::<BTreeSet<usize>>();

    Ok(IndexStatusReport {
        model: summary.model,
        declared_count: summary.document_count,
        documents: summary.documents.len(),
        usable_documents,
        embedding_dim: dimensions.iter().next().copied(),
        ragged: dimensions.len() > 1,
    })
}
