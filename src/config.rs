use std::env;
use std::path::{Path, PathBuf};

pub const INDEX_PATH_ENV: &str = "RAG_INDEX_PATH";
pub const EMBEDDING_MODEL_ENV: &str = "RAG_EMBEDDING_MODEL";
pub const PRIMARY_API_KEY_ENV: &str = "GPT_KEY";
pub const FALLBACK_API_KEY_ENV: &str = "OPENAI_API_KEY";

pub const DEFAULT_INDEX_PATH: &str = "data/rag/index.json";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Resolves the embedding API key: explicit value, then GPT_KEY, then OPENAI_API_KEY.
pub fn resolve_api_key(explicit: Option<&str>) -> Option<String> {
    non_empty(explicit.map(ToOwned::to_owned))
        .or_else(|| non_empty(env::var(PRIMARY_API_KEY_ENV).ok()))
        .or_else(|| non_empty(env::var(FALLBACK_API_KEY_ENV).ok()))
}

pub fn resolve_index_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match non_empty(env::var(INDEX_PATH_ENV).ok()) {
        Some(configured) => PathBuf::from(configured),
        None => PathBuf::from(DEFAULT_INDEX_PATH),
    }
}

pub fn resolve_embedding_model(explicit: Option<&str>) -> String {
    non_empty(explicit.map(ToOwned::to_owned))
        .or_else(|| non_empty(env::var(EMBEDDING_MODEL_ENV).ok()))
        .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
