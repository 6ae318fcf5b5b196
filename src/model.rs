use serde::{Deserialize, Serialize};

/// One flat text document in the retrieval corpus.
///
/// Identity is the `id` field, built deterministically from the source keys:
/// `certificate_profile:<cert_id>` for profiles and
/// `certificate_stats:<cert_id>:<year>` for per-year statistics summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub certificate_id: String,
    #[serde(rename = "type")]
    pub doc_type: DocType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocType {
    #[serde(rename = "certificate_profile")]
    Profile,
    #[serde(rename = "certificate_statistics")]
    Statistics,
}

/// A corpus document merged with its embedding vector, as stored in the index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    #[serde(flatten)]
    pub document: Document,
    pub embedding: Vec<f32>,
}

/// The persisted vector index: `document_count` must equal `documents.len()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    pub model: String,
    pub document_count: usize,
    pub documents: Vec<IndexedDocument>,
}
