use crate::error::{ConfigError, EmbeddingError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    fn model_id(&self) -> String;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Embedding backend named by the `embedding_model` setting.
///
/// Accepted identifiers are `char-ngram`, `char-ngram-<dimensions>` and
/// `ollama/<model>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingModel {
    CharacterNgram { dimensions: usize },
    Ollama { model: String },
}

impl FromStr for EmbeddingModel {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value == "char-ngram" {
            return Ok(Self::CharacterNgram {
                dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            });
        }

        if let Some(dimensions) = value.strip_prefix("char-ngram-") {
            return match dimensions.parse::<usize>() {
                Ok(dimensions) if dimensions > 0 => Ok(Self::CharacterNgram { dimensions }),
                _ => Err(ConfigError::UnknownEmbeddingModel(value.to_string())),
            };
        }

        match value.strip_prefix("ollama/") {
            Some(model) if !model.trim().is_empty() => Ok(Self::Ollama {
                model: model.trim().to_string(),
            }),
            _ => Err(ConfigError::UnknownEmbeddingModel(value.to_string())),
        }
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CharacterNgram { dimensions } if *dimensions == DEFAULT_EMBEDDING_DIMENSIONS => {
                write!(f, "char-ngram")
            }
            Self::CharacterNgram { dimensions } => write!(f, "char-ngram-{dimensions}"),
            Self::Ollama { model } => write!(f, "ollama/{model}"),
        }
    }
}

impl EmbeddingModel {
    /// `dimensions` pins the vector length of HTTP backends; `None` lets the
    /// first response decide. Character n-gram models carry their own length.
    pub fn build(
        &self,
        endpoint: &str,
        dimensions: Option<usize>,
    ) -> Result<Arc<dyn EmbeddingFunction>, ConfigError> {
        match self {
            Self::CharacterNgram { dimensions } => Ok(Arc::new(CharacterNgramEmbedder {
                dimensions: *dimensions,
            })),
            Self::Ollama { model } => {
                let embedder = OllamaEmbedder::new(endpoint, model.clone())
                    .map_err(|error| ConfigError::InvalidArgument(error.to_string()))?;
                Ok(Arc::new(match dimensions {
                    Some(dimensions) => embedder.with_dimensions(dimensions),
                    None => embedder,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        // Inputs shorter than a trigram still hash as a single token.
        let width = chars.len().min(3);
        for window in chars.windows(width) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingFunction for CharacterNgramEmbedder {
    fn model_id(&self) -> String {
        EmbeddingModel::CharacterNgram {
            dimensions: self.dimensions,
        }
        .to_string()
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

/// Embeddings served by an Ollama instance over HTTP.
pub struct OllamaEmbedder {
    endpoint: Url,
    model: String,
    client: Client,
    dimensions: usize,
}

impl OllamaEmbedder {
    /// `endpoint` may carry a path prefix; requests go to
    /// `<endpoint>/api/embeddings`.
    pub fn new(endpoint: &str, model: impl Into<String>) -> Result<Self, EmbeddingError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            endpoint,
            model: model.into(),
            client: Client::new(),
            dimensions: 0,
        })
    }

    /// Pins the expected vector length; responses of any other length are rejected.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl EmbeddingFunction for OllamaEmbedder {
    fn model_id(&self) -> String {
        EmbeddingModel::Ollama {
            model: self.model.clone(),
        }
        .to_string()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = self.endpoint.join("api/embeddings")?;
        let response = self
            .client
            .post(url)
            .json(&OllamaEmbedRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: OllamaEmbedResponse = response.json().await?;
        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::BackendResponse {
                backend: "ollama".to_string(),
                details: "empty embedding".to_string(),
            });
        }
        if self.dimensions != 0 && parsed.embedding.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: parsed.embedding.len(),
            });
        }

        Ok(parsed.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_sync("Hydraulic pressure and flow");
        let second = embedder.embed_sync("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed_sync("abc");
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn short_inputs_still_produce_a_signal() {
        let embedder = CharacterNgramEmbedder::default();
        let vector = embedder.embed_sync("ok");
        assert!(vector.iter().any(|value| *value > 0.0));
    }

    #[test]
    fn model_identifiers_parse_and_display() {
        assert_eq!(
            "char-ngram".parse::<EmbeddingModel>().ok(),
            Some(EmbeddingModel::CharacterNgram { dimensions: 128 })
        );
        assert_eq!(
            "char-ngram-64".parse::<EmbeddingModel>().ok(),
            Some(EmbeddingModel::CharacterNgram { dimensions: 64 })
        );
        assert_eq!(
            "ollama/all-minilm".parse::<EmbeddingModel>().ok(),
            Some(EmbeddingModel::Ollama {
                model: "all-minilm".to_string()
            })
        );
        assert_eq!(
            EmbeddingModel::CharacterNgram { dimensions: 64 }.to_string(),
            "char-ngram-64"
        );
    }

    #[test]
    fn unknown_model_identifiers_are_rejected() {
        assert!("all-MiniLM-L6-v2".parse::<EmbeddingModel>().is_err());
        assert!("char-ngram-0".parse::<EmbeddingModel>().is_err());
        assert!("ollama/".parse::<EmbeddingModel>().is_err());
    }

    #[tokio::test]
    async fn built_embedder_reports_its_model() {
        let embedder = EmbeddingModel::CharacterNgram { dimensions: 16 }
            .build("http://localhost:11434", Some(32))
            .expect("embedder should build");
        assert_eq!(embedder.model_id(), "char-ngram-16");
        let vectors = embedder
            .embed_batch(&["first", "second"])
            .await
            .expect("batch should embed");
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 16));
    }

    mod ollama {
        use super::*;
        use serde_json::json;
        use wiremock::{
            matchers::{body_json, method, path},
            Mock, MockServer, ResponseTemplate,
        };

        async fn respond_with(server: &MockServer, route: &str, response: ResponseTemplate) {
            Mock::given(method("POST"))
                .and(path(route))
                .respond_with(response)
                .mount(server)
                .await;
        }

        #[tokio::test]
        async fn posts_model_and_prompt() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api/embeddings"))
                .and(body_json(json!({ "model": "all-minilm", "prompt": "hello" })))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(json!({ "embedding": [0.5, 0.25, 0.0] })),
                )
                .expect(1)
                .mount(&server)
                .await;

            let embedder =
                OllamaEmbedder::new(&server.uri(), "all-minilm").expect("endpoint should parse");
            let vector = embedder.embed("hello").await.expect("embedding should succeed");

            assert_eq!(vector, vec![0.5, 0.25, 0.0]);
            assert_eq!(embedder.model_id(), "ollama/all-minilm");
        }

        #[tokio::test]
        async fn endpoint_path_prefix_is_kept() {
            let server = MockServer::start().await;
            respond_with(
                &server,
                "/ollama/api/embeddings",
                ResponseTemplate::new(200).set_body_json(json!({ "embedding": [1.0] })),
            )
            .await;

            let embedder = OllamaEmbedder::new(&format!("{}/ollama", server.uri()), "m")
                .expect("endpoint should parse");
            assert_eq!(embedder.embed("x").await.expect("embedding"), vec![1.0]);
        }

        #[tokio::test]
        async fn server_error_is_a_backend_response_error() {
            let server = MockServer::start().await;
            respond_with(&server, "/api/embeddings", ResponseTemplate::new(500)).await;

            let embedder = OllamaEmbedder::new(&server.uri(), "m").expect("endpoint should parse");
            let result = embedder.embed("x").await;
            assert!(matches!(
                result,
                Err(EmbeddingError::BackendResponse { ref details, .. }) if details.starts_with("500")
            ));
        }

        #[tokio::test]
        async fn empty_embedding_is_rejected() {
            let server = MockServer::start().await;
            respond_with(
                &server,
                "/api/embeddings",
                ResponseTemplate::new(200).set_body_json(json!({ "embedding": [] })),
            )
            .await;

            let embedder = OllamaEmbedder::new(&server.uri(), "m").expect("endpoint should parse");
            assert!(matches!(
                embedder.embed("x").await,
                Err(EmbeddingError::BackendResponse { .. })
            ));
        }

        #[tokio::test]
        async fn pinned_dimensions_reject_other_lengths() {
            let server = MockServer::start().await;
            respond_with(
                &server,
                "/api/embeddings",
                ResponseTemplate::new(200).set_body_json(json!({ "embedding": [0.1, 0.2] })),
            )
            .await;

            let embedder = EmbeddingModel::Ollama {
                model: "m".to_string(),
            }
            .build(&server.uri(), Some(4))
            .expect("embedder should build");
            assert_eq!(embedder.dimensions(), 4);
            assert!(matches!(
                embedder.embed("x").await,
                Err(EmbeddingError::DimensionMismatch {
                    expected: 4,
                    actual: 2
                })
            ));
        }
    }
}
