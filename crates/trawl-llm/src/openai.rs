use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedder::Embedder;
use crate::error::LlmError;

const MAX_ERROR_BODY: usize = 1200;

/// Embedding client for any provider exposing the OpenAI `/embeddings` API.
///
/// Settings are optional at construction time so that a half-configured
/// deployment can still start; every call re-validates them.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("client", &"<reqwest::Client>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Clone for OpenAiEmbedder {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

impl OpenAiEmbedder {
    #[must_use]
    pub fn new(base_url: Option<String>, model: Option<String>, api_key: Option<String>) -> Self {
        let base_url = non_blank(base_url).map(|mut url| {
            while url.ends_with('/') {
                url.pop();
            }
            url
        });
        Self {
            client: crate::http::default_client(Duration::from_secs(60)),
            base_url,
            model: non_blank(model),
            api_key: non_blank(api_key),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = crate::http::default_client(timeout);
        self
    }

    fn settings(&self) -> Result<(&str, &str, &str), LlmError> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or(LlmError::Configuration("base_url"))?;
        let model = self
            .model
            .as_deref()
            .ok_or(LlmError::Configuration("model"))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(LlmError::Configuration("api_key"))?;
        Ok((base_url, model, api_key))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let (base_url, model, api_key) = self.settings()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model,
            input: texts,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(format!("{base_url}/embeddings"))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if !status.is_success() {
            tracing::error!("embedding API error {status}: {text}");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let resp: EmbeddingResponse = serde_json::from_str(&text)?;
        parse_vectors(resp, texts.len())
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "openai"
    }
}

fn parse_vectors(resp: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, LlmError> {
    if resp.data.is_empty() {
        return Err(LlmError::InvalidResponse("no data rows".into()));
    }

    let vectors = resp
        .data
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            row.embedding
                .ok_or_else(|| LlmError::InvalidResponse(format!("row {i} has no embedding")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if vectors.len() != expected {
        return Err(LlmError::InvalidResponse(format!(
            "vector count mismatch: expected {expected}, got {}",
            vectors.len()
        )));
    }
    Ok(vectors)
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    fn embedder_for(server: &MockServer) -> OpenAiEmbedder {
        OpenAiEmbedder::new(
            Some(format!("{}/v1/", server.uri())),
            Some("text-embedding-3-small".into()),
            Some("sk-test".into()),
        )
    }

    #[tokio::test]
    async fn embeds_batch_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["a", "b"],
                "encoding_format": "float"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 0, "embedding": [0.1, 0.2]},
                    {"index": 1, "embedding": [0.3, 0.4]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vectors = embedder_for(&server)
            .embed_batch(&texts(&["a", "b"]))
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn missing_settings_is_configuration_error() {
        let embedder = OpenAiEmbedder::new(Some("http://localhost".into()), None, Some("k".into()));
        let err = embedder.embed_batch(&texts(&["x"])).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("model"));

        let embedder = OpenAiEmbedder::new(Some("  ".into()), Some("m".into()), Some("k".into()));
        let err = embedder.embed_batch(&texts(&["x"])).await.unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = embedder_for(&server)
            .embed_batch(&texts(&["a"]))
            .await
            .unwrap_err();
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn count_mismatch_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1]}]
            })))
            .mount(&server)
            .await;

        let err = embedder_for(&server)
            .embed_batch(&texts(&["a", "b"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("count mismatch"));
    }

    #[tokio::test]
    async fn missing_embedding_field_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0}]
            })))
            .mount(&server)
            .await;

        let err = embedder_for(&server)
            .embed_batch(&texts(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_json_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json {{"))
            .mount(&server)
            .await;

        let err = embedder_for(&server)
            .embed_batch(&texts(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Json(_)));
    }

    #[tokio::test]
    async fn empty_data_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let err = embedder_for(&server)
            .embed_batch(&texts(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn empty_input_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let vectors = embedder_for(&server).embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_errors() {
        let embedder = OpenAiEmbedder::new(
            Some("http://127.0.0.1:1".into()),
            Some("m".into()),
            Some("k".into()),
        );
        let err = embedder.embed_batch(&texts(&["a"])).await.unwrap_err();
        assert!(matches!(err, LlmError::Http(_)));
    }

    #[test]
    fn debug_redacts_api_key() {
        let embedder = OpenAiEmbedder::new(None, None, Some("sk-secret".into()));
        let dbg = format!("{embedder:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
