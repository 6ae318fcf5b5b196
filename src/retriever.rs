use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config;
use crate::embedding::{
    dot, l2_norm, EmbeddingProvider, OpenAiEmbeddingClient, DEFAULT_API_BASE_URL,
};

pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_MIN_SCORE: f64 = 0.35;

/// Substituted for a zero row norm so cosine division stays finite.
const NORM_EPSILON: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error("index file not found: {0}")]
    IndexMissing(PathBuf),
    #[error("failed to read index file {path}")]
    IndexUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse index file {path}")]
    IndexUnparsable {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("index contains no usable documents")]
    NoUsableDocuments,
    #[error("index embeddings are ragged: expected dimension {expected}, found {found}")]
    RaggedEmbeddings { expected: usize, found: usize },
    #[error("no embedding API key; set GPT_KEY or OPENAI_API_KEY")]
    MissingApiKey,
    #[error("failed to construct embedding client: {0}")]
    ClientConstruction(String),
}

#[derive(Debug, Clone, Default)]
pub struct RetrieverOptions {
    pub index_path: Option<PathBuf>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

/// Everything stored about a document except its text and embedding.
#[derive(Debug, Clone, Serialize)]
pub struct DocMetadata {
    pub id: String,
    pub certificate_id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

/// One ranked search result; produced per query, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub text: String,
    pub metadata: DocMetadata,
    pub score: f64,
}

struct IndexEntry {
    metadata: DocMetadata,
    text: String,
}

/// In-memory nearest-neighbor retriever over the persisted index.
///
/// The embedding matrix and per-row norms are computed once at load and never
/// mutated; matrix row position is the join key to the document list.
pub struct Retriever {
    entries: Vec<IndexEntry>,
    matrix: Vec<Vec<f32>>,
    norms: Vec<f64>,
    embedder: Box<dyn EmbeddingProvider + Send + Sync>,
    model: String,
}

/// Lenient mirror of the index file: unknown fields are ignored and missing
/// fields degrade to defaults so one malformed document cannot poison the load.
#[derive(Debug, Deserialize)]
struct RawIndexFile {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    documents: Vec<RawIndexedDocument>,
}

#[derive(Debug, Deserialize)]
struct RawIndexedDocument {
    #[serde(default)]
    id: String,
    #[serde(default)]
    certificate_id: String,
    #[serde(default, rename = "type")]
    doc_type: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    year: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    embedding: Vec<f32>,
}

impl Retriever {
    /// Loads the persisted index and prepares the similarity matrix.
    ///
    /// Documents without text or an embedding are skipped; the load fails only
    /// when nothing usable remains, when embeddings disagree on dimensionality,
    /// or when no API key is resolvable for later query embedding.
    pub fn from_index(options: &RetrieverOptions) -> Result<Self, RetrieverError> {
        let path = config::resolve_index_path(options.index_path.as_deref());
        if !path.exists() {
            return Err(RetrieverError::IndexMissing(path));
        }

        let raw = fs::read_to_string(&path).map_err(|source| RetrieverError::IndexUnreadable {
            path: path.clone(),
            source,
        })?;
        let parsed: RawIndexFile =
            serde_json::from_str(&raw).map_err(|source| RetrieverError::IndexUnparsable {
                path: path.clone(),
                source,
            })?;

        let model = parsed
            .model
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| config::resolve_embedding_model(options.model.as_deref()));

        let mut entries = Vec::<IndexEntry>::new();
        let mut matrix = Vec::<Vec<f32>>::new();
        let mut skipped = 0usize;
        for document in parsed.documents {
            if document.text.is_empty() || document.embedding.is_empty() {
                skipped += 1;
                continue;
            }
            entries.push(IndexEntry {
                metadata: DocMetadata {
                    id: document.id,
                    certificate_id: document.certificate_id,
                    doc_type: document.doc_type,
                    name: document.name,
                    year: document.year,
                },
                text: document.text,
            });
            matrix.push(document.embedding);
        }
        if skipped > 0 {
            debug!(skipped, "dropped index documents without text or embedding");
        }

        let api_key =
            config::resolve_api_key(options.api_key.as_deref()).ok_or(RetrieverError::MissingApiKey)?;
        let client = OpenAiEmbeddingClient::new(&api_key, DEFAULT_API_BASE_URL, &model)
            .map_err(|err| RetrieverError::ClientConstruction(err.to_string()))?;

        Self::from_parts(entries, matrix, Box::new(client), model)
    }

    fn from_parts(
        entries: Vec<IndexEntry>,
        matrix: Vec<Vec<f32>>,
        embedder: Box<dyn EmbeddingProvider + Send + Sync>,
        model: String,
    ) -> Result<Self, RetrieverError> {
        if entries.is_empty() || matrix.is_empty() {
            return Err(RetrieverError::NoUsableDocuments);
        }

        let expected = matrix[0].len();
        for row in &matrix {
            if row.len() != expected {
                return Err(RetrieverError::RaggedEmbeddings {
                    expected,
                    found: row.len(),
                });
            }
        }

        let norms = matrix
            .iter()
            .map(|row| {
                let norm = l2_norm(row);
                if norm == 0.0 { NORM_EPSILON } else { norm }
            })
            .collect();

        Ok(Self {
            entries,
            matrix,
            norms,
            embedder,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn document_count(&self) -> usize {
        self.entries.len()
    }

    /// Top-k cosine-similarity search. Degrades to an empty result on blank
    /// queries, embedding failures, zero query vectors, and all-NaN scores;
    /// it never mutates the index and never raises past this boundary.
    pub fn search(&self, query: &str, top_k: usize, min_score: f64) -> Vec<Hit> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let query_vector = match self.embedder.embed_query(query) {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, "query embedding failed");
                return Vec::new();
            }
        };

        let query_norm = l2_norm(&query_vector);
        if query_norm == 0.0 {
            return Vec::new();
        }

        let similarities = self
            .matrix
            .iter()
            .zip(self.norms.iter())
            .map(|(row, row_norm)| dot(row, &query_vector) / (row_norm * query_norm))
            .collect::<Vec<f64>>();

        if similarities.iter().all(|score| score.is_nan()) {
            return Vec::new();
        }

        let mut ranked = (0..similarities.len()).collect::<Vec<usize>>();
        ranked.sort_by(|&left, &right| {
            rank_value(similarities[right])
                .partial_cmp(&rank_value(similarities[left]))
                .unwrap_or(Ordering::Equal)
        });

        let mut hits = Vec::<Hit>::new();
        for index in ranked.into_iter().take(top_k) {
            let score = similarities[index];
            if score.is_nan() || score < min_score {
                continue;
            }
            let text = self.entries[index].text.trim();
            if text.is_empty() {
                continue;
            }
            hits.push(Hit {
                text: text.to_string(),
                metadata: self.entries[index].metadata.clone(),
                score,
            });
        }

        hits
    }
}

/// NaN scores rank ahead of everything, mirroring a descending argsort over
/// the raw similarities; they are filtered out after the top-k cut.
fn rank_value(score: f64) -> f64 {
    if score.is_nan() { f64::INFINITY } else { score }
}

enum LoadState {
    Unloaded,
    Ready(Arc<Retriever>),
    Failed,
}

/// Thread-safe, lazily-initialized retriever cell with a sticky failure state.
///
/// The first `get` attempts the index load once; a failure is remembered so
/// later callers get `None` without repeating file or network work. `reset`
/// re-arms the cell, which is how tests and operators recover without a
/// process restart.
pub struct SharedRetriever {
    options: RetrieverOptions,
    state: Mutex<LoadState>,
}

impl SharedRetriever {
    pub fn new(options: RetrieverOptions) -> Self {
        Self {
            options,
            state: Mutex::new(LoadState::Unloaded),
        }
    }

    pub fn get(&self) -> Option<Arc<Retriever>> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match &*state {
            LoadState::Ready(retriever) => return Some(retriever.clone()),
            LoadState::Failed => return None,
            LoadState::Unloaded => {}
        }

        match Retriever::from_index(&self.options) {
            Ok(retriever) => {
                let retriever = Arc::new(retriever);
                info!(
                    model = %retriever.model(),
                    documents = retriever.document_count(),
                    "retriever initialized"
                );
                *state = LoadState::Ready(retriever.clone());
                Some(retriever)
            }
            Err(err) => {
                info!(error = %err, "retrieval disabled for this process");
                *state = LoadState::Failed;
                None
            }
        }
    }

    pub fn reset(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = LoadState::Unloaded;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use anyhow::anyhow;

    use super::*;

    struct StubEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl StubEmbedder {
        fn returning(vector: Vec<f32>) -> Self {
            Self {
                vector,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                vector: Vec::new(),
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    impl EmbeddingProvider for &StubEmbedder {
        fn embed_batch(&self, inputs: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail {
                return Err(anyhow!("stub embedding outage"));
            }
            Ok(inputs.iter().map(|_| self.vector.clone()).collect())
        }
    }

    fn entry(id: &str, text: &str) -> IndexEntry {
        IndexEntry {
            metadata: DocMetadata {
                id: id.to_string(),
                certificate_id: "C1".to_string(),
                doc_type: "certificate_profile".to_string(),
                name: "정보처리기사".to_string(),
                year: None,
            },
            text: text.to_string(),
        }
    }

    /// Unit-length row whose cosine against query [1, 0] equals `target`.
    fn unit_row(target: f32) -> Vec<f32> {
        vec![target, (1.0 - target * target).sqrt()]
    }

    fn retriever_with(
        rows: Vec<(&'static str, &'static str, Vec<f32>)>,
        embedder: &'static StubEmbedder,
    ) -> Retriever {
        let mut entries = Vec::new();
        let mut matrix = Vec::new();
        for (id, text, row) in rows {
            entries.push(entry(id, text));
            matrix.push(row);
        }
        Retriever::from_parts(entries, matrix, Box::new(embedder), "stub-model".to_string())
            .expect("retriever from parts")
    }

    fn leak(embedder: StubEmbedder) -> &'static StubEmbedder {
        Box::leak(Box::new(embedder))
    }

    #[test]
    fn blank_query_short_circuits_before_embedding() {
        let embedder = leak(StubEmbedder::returning(vec![1.0, 0.0]));
        let retriever = retriever_with(vec![("doc-1", "본문", unit_row(0.9))], embedder);

        assert!(retriever.search("", DEFAULT_TOP_K, DEFAULT_MIN_SCORE).is_empty());
        assert!(retriever.search("   ", DEFAULT_TOP_K, DEFAULT_MIN_SCORE).is_empty());
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn embedding_failure_degrades_to_empty_results() {
        let embedder = leak(StubEmbedder::failing());
        let retriever = retriever_with(vec![("doc-1", "본문", unit_row(0.9))], embedder);

        assert!(retriever.search("질문", DEFAULT_TOP_K, DEFAULT_MIN_SCORE).is_empty());
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn identical_vectors_score_one_and_orthogonal_vectors_score_zero() {
        let embedder = leak(StubEmbedder::returning(vec![1.0, 0.0]));
        let retriever = retriever_with(
            vec![
                ("doc-same", "같은 방향", vec![1.0, 0.0]),
                ("doc-orthogonal", "직교 방향", vec![0.0, 1.0]),
            ],
            embedder,
        );

        let hits = retriever.search("질문", 2, -1.0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.id, "doc-same");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert_eq!(hits[1].metadata.id, "doc-orthogonal");
        assert!(hits[1].score.abs() < 1e-9);
    }

    #[test]
    fn min_score_filters_after_the_top_k_cut() {
        let embedder = leak(StubEmbedder::returning(vec![1.0, 0.0]));
        let retriever = retriever_with(
            vec![
                ("doc-high", "첫 번째 문서", unit_row(0.9)),
                ("doc-low", "두 번째 문서", unit_row(0.4)),
                ("doc-mid", "세 번째 문서", unit_row(0.6)),
            ],
            embedder,
        );

        let hits = retriever.search("질문", 3, 0.5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.id, "doc-high");
        assert_eq!(hits[1].metadata.id, "doc-mid");
        assert!((hits[0].score - 0.9).abs() < 1e-3);
        assert!((hits[1].score - 0.6).abs() < 1e-3);
    }

    #[test]
    fn top_k_bounds_the_result_count() {
        let embedder = leak(StubEmbedder::returning(vec![1.0, 0.0]));
        let retriever = retriever_with(
            vec![
                ("doc-1", "하나", unit_row(0.9)),
                ("doc-2", "둘", unit_row(0.8)),
                ("doc-3", "셋", unit_row(0.7)),
            ],
            embedder,
        );

        let hits = retriever.search("질문", 2, 0.0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.id, "doc-1");
        assert_eq!(hits[1].metadata.id, "doc-2");
    }

    #[test]
    fn whitespace_only_document_text_is_dropped_from_hits() {
        let embedder = leak(StubEmbedder::returning(vec![1.0, 0.0]));
        let retriever = retriever_with(
            vec![
                ("doc-blank", "   ", unit_row(0.95)),
                ("doc-real", "실제 본문", unit_row(0.7)),
            ],
            embedder,
        );

        let hits = retriever.search("질문", 2, 0.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.id, "doc-real");
    }

    #[test]
    fn zero_query_vector_returns_empty() {
        let embedder = leak(StubEmbedder::returning(vec![0.0, 0.0]));
        let retriever = retriever_with(vec![("doc-1", "본문", unit_row(0.9))], embedder);
        assert!(retriever.search("질문", DEFAULT_TOP_K, 0.0).is_empty());
    }

    #[test]
    fn all_nan_similarities_return_empty() {
        let embedder = leak(StubEmbedder::returning(vec![f32::NAN, f32::NAN]));
        let retriever = retriever_with(vec![("doc-1", "본문", unit_row(0.9))], embedder);
        assert!(retriever.search("질문", DEFAULT_TOP_K, 0.0).is_empty());
    }

    #[test]
    fn empty_parts_are_rejected() {
        let embedder = leak(StubEmbedder::returning(vec![1.0, 0.0]));
        let result =
            Retriever::from_parts(Vec::new(), Vec::new(), Box::new(embedder), "m".to_string());
        assert!(matches!(result, Err(RetrieverError::NoUsableDocuments)));
    }

    #[test]
    fn ragged_index_file_fails_to_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.json");
        let payload = serde_json::json!({
            "model": "text-embedding-3-small",
            "document_count": 2,
            "documents": [
                {
                    "id": "a", "certificate_id": "C1", "type": "certificate_profile",
                    "name": "하나", "text": "본문",
                    "embedding": [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]
                },
                {
                    "id": "b", "certificate_id": "C2", "type": "certificate_profile",
                    "name": "둘", "text": "본문",
                    "embedding": [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]
                }
            ]
        });
        fs::write(&path, payload.to_string()).expect("write index");

        let options = RetrieverOptions {
            index_path: Some(path),
            api_key: Some("sk-test".to_string()),
            model: None,
        };
        let result = Retriever::from_index(&options);
        assert!(matches!(
            result,
            Err(RetrieverError::RaggedEmbeddings {
                expected: 10,
                found: 8
            })
        ));
    }

    #[test]
    fn documents_without_text_or_vector_are_skipped_at_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.json");
        let payload = serde_json::json!({
            "model": "text-embedding-3-small",
            "document_count": 3,
            "documents": [
                { "id": "a", "certificate_id": "C1", "type": "certificate_profile",
                  "name": "하나", "text": "본문", "embedding": [0.1, 0.2] },
                { "id": "b", "certificate_id": "C2", "type": "certificate_profile",
                  "name": "둘", "text": "", "embedding": [0.3, 0.4] },
                { "id": "c", "certificate_id": "C3", "type": "certificate_profile",
                  "name": "셋", "text": "본문", "embedding": [] }
            ]
        });
        fs::write(&path, payload.to_string()).expect("write index");

        let options = RetrieverOptions {
            index_path: Some(path),
            api_key: Some("sk-test".to_string()),
            model: None,
        };
        let retriever = Retriever::from_index(&options).expect("load index");
        assert_eq!(retriever.document_count(), 1);
    }

    #[test]
    fn missing_index_file_is_a_sticky_failure_until_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.json");
        let shared = SharedRetriever::new(RetrieverOptions {
            index_path: Some(path.clone()),
            api_key: Some("sk-test".to_string()),
            model: None,
        });

        assert!(shared.get().is_none());

        // The file now exists, but the failure is cached: no re-attempt happens.
        let payload = serde_json::json!({
            "model": "text-embedding-3-small",
            "document_count": 1,
            "documents": [
                { "id": "a", "certificate_id": "C1", "type": "certificate_profile",
                  "name": "하나", "text": "본문", "embedding": [0.1, 0.2] }
            ]
        });
        fs::write(&path, payload.to_string()).expect("write index");
        assert!(shared.get().is_none());

        shared.reset();
        let retriever = shared.get().expect("retriever after reset");
        assert_eq!(retriever.document_count(), 1);
    }

    #[test]
    fn successful_load_is_cached_and_shared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.json");
        let payload = serde_json::json!({
            "model": "text-embedding-3-small",
            "document_count": 1,
            "documents": [
                { "id": "a", "certificate_id": "C1", "type": "certificate_profile",
                  "name": "하나", "text": "본문", "embedding": [0.1, 0.2] }
            ]
        });
        fs::write(&path, payload.to_string()).expect("write index");

        let shared = SharedRetriever::new(RetrieverOptions {
            index_path: Some(path),
            api_key: Some("sk-test".to_string()),
            model: None,
        });

        let first = shared.get().expect("first load");
        let second = shared.get().expect("cached load");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
