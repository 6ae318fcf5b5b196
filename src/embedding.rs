use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Text-to-vector seam. The production implementation talks to an
/// OpenAI-compatible embeddings endpoint; tests substitute stubs.
pub trait EmbeddingProvider {
    /// Embeds a batch of texts, preserving input order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, input: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[input])?;
        vectors
            .pop()
            .context("embedding service returned no vector for the query")
    }
}

/// Blocking embeddings client for OpenAI-compatible endpoints.
pub struct OpenAiEmbeddingClient {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing embedding API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("embedding API key is not a valid header value")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

impl EmbeddingProvider for OpenAiEmbeddingClient {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .context("embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("embedding request failed ({status}): {body}");
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .context("failed to parse embedding response")?;
        parsed.data.sort_by_key(|entry| entry.index);
        anyhow::ensure!(
            parsed.data.len() == inputs.len(),
            "embedding service returned {} vectors for {} inputs",
            parsed.data.len(),
            inputs.len()
        );

        Ok(parsed
            .data
            .into_iter()
            .map(|entry| entry.embedding)
            .collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

pub fn dot(left: &[f32], right: &[f32]) -> f64 {
    left.iter()
        .zip(right.iter())
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum()
}

pub fn l2_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_and_l2_norm_match_hand_computed_values() {
        assert_eq!(dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
        assert_eq!(dot(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(l2_norm(&[3.0, 4.0]), 5.0);
        assert_eq!(l2_norm(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn embed_query_unwraps_single_batch_vector() {
        struct Fixed;
        impl EmbeddingProvider for Fixed {
            fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
                Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }

        let vector = Fixed.embed_query("질문").expect("embed query");
        assert_eq!(vector, vec![1.0, 0.0]);
    }

    #[test]
    fn client_rejects_blank_credentials() {
        assert!(OpenAiEmbeddingClient::new("  ", DEFAULT_API_BASE_URL, "model").is_err());
        assert!(OpenAiEmbeddingClient::new("sk-test", DEFAULT_API_BASE_URL, " ").is_err());
    }
}
