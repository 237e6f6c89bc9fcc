//! Amazon Bedrock `InvokeModel` embeddings.
//!
//! Two request shapes are supported, chosen by model id:
//!
//! | Model family | Request body | Vector in response |
//! |--------------|--------------|--------------------|
//! | Titan (`amazon.titan-embed-*`) | `{"inputText": ..}` (+ `"dimensions"` on v2) | `embedding` |
//! | Cohere (`cohere.embed-*`) | `{"texts": [..], "input_type": .., "embedding_types": ["float"]}` | `embeddings.float[0]` |

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use super::{classify_status, classify_transport, http_client, parse_vector, EmbedError, EmbeddingProvider, InputKind};
use crate::aws::{self, AwsCredentials, SigningRequest};
use crate::config::EmbeddingConfig;

/// Throttling-type error codes Bedrock reports in `x-amzn-ErrorType`.
const TRANSIENT_ERROR_TYPES: &[&str] = &[
    "ThrottlingException",
    "ServiceUnavailableException",
    "ModelNotReadyException",
    "InternalServerException",
    "ModelTimeoutException",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelFamily {
    Titan,
    TitanV2,
    Cohere,
}

impl ModelFamily {
    fn of(model_id: &str) -> Self {
        if model_id.contains("cohere") {
            ModelFamily::Cohere
        } else if model_id.contains("titan-embed-text-v2") {
            ModelFamily::TitanV2
        } else {
            ModelFamily::Titan
        }
    }
}

pub struct BedrockProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    region: String,
    /// `https://bedrock-runtime.<region>.amazonaws.com` unless overridden.
    endpoint: reqwest::Url,
    creds: AwsCredentials,
}

impl BedrockProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let creds = AwsCredentials::from_env()?;
        Self::with_credentials(config, creds)
    }

    pub fn with_credentials(config: &EmbeddingConfig, creds: AwsCredentials) -> Result<Self> {
        let endpoint = match config.url {
            Some(ref url) => url.clone(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", config.region),
        };
        let endpoint = reqwest::Url::parse(&endpoint)
            .with_context(|| format!("invalid Bedrock endpoint: {}", endpoint))?;

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            dims: config.dims,
            region: config.region.clone(),
            endpoint,
            creds,
        })
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

fn request_body(model: &str, dims: usize, text: &str, kind: InputKind) -> Value {
    match ModelFamily::of(model) {
        ModelFamily::Cohere => json!({
            "texts": [text],
            "input_type": match kind {
                InputKind::Document => "search_document",
                InputKind::Query => "search_query",
            },
            "embedding_types": ["float"],
        }),
        ModelFamily::TitanV2 => json!({ "inputText": text, "dimensions": dims }),
        ModelFamily::Titan => json!({ "inputText": text }),
    }
}

fn parse_response(model: &str, body: &Value) -> Result<Vec<f32>, EmbedError> {
    match ModelFamily::of(model) {
        ModelFamily::Cohere => parse_vector(
            body.get("embeddings")
                .and_then(|e| e.get("float"))
                .and_then(|f| f.get(0)),
            "embeddings.float[0]",
        ),
        ModelFamily::Titan | ModelFamily::TitanV2 => parse_vector(body.get("embedding"), "embedding"),
    }
}

fn classify_error(status: reqwest::StatusCode, error_type: Option<&str>, body: &str) -> EmbedError {
    let transient = error_type
        .map(|t| TRANSIENT_ERROR_TYPES.iter().any(|known| t.starts_with(known)))
        .unwrap_or(false);
    if transient {
        return EmbedError::Unavailable(format!(
            "Bedrock {}: {}",
            error_type.unwrap_or_default(),
            body.chars().take(500).collect::<String>()
        ));
    }
    classify_status("Bedrock", status, body)
}

#[async_trait]
impl EmbeddingProvider for BedrockProvider {
    async fn embed_input(&self, text: &str, kind: InputKind) -> Result<Vec<f32>, EmbedError> {
        let body = serde_json::to_vec(&request_body(&self.model, self.dims, text, kind))
            .map_err(|e| EmbedError::Rejected(format!("failed to encode request: {}", e)))?;

        let path = format!("/model/{}/invoke", aws::uri_encode(&self.model));
        let host = self.host();
        let extra = [
            ("accept".to_string(), "application/json".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ];
        let signed = aws::sign(
            &self.creds,
            &SigningRequest {
                method: "POST",
                host: &host,
                path: &path,
                query: &[],
                payload: &body,
                headers: &extra,
                region: &self.region,
                service: "bedrock",
            },
            Utc::now(),
        )
        .map_err(|e| EmbedError::Rejected(format!("failed to sign request: {}", e)))?;

        let mut url = self.endpoint.clone();
        url.set_path(&path);

        let mut req = self.client.post(url.as_str()).body(body);
        for (k, v) in extra.iter().chain(signed.iter()) {
            req = req.header(k.as_str(), v.as_str());
        }

        debug!(model = %self.model, chars = text.chars().count(), "bedrock invoke");
        let response = req
            .send()
            .await
            .map_err(|e| classify_transport("Bedrock", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_type = response
                .headers()
                .get("x-amzn-ErrorType")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_error(status, error_type.as_deref(), &text));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| classify_transport("Bedrock", e))?;
        parse_response(&self.model, &json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn titan_v2_body_carries_dimensions() {
        let body = request_body("amazon.titan-embed-text-v2:0", 1024, "hello", InputKind::Document);
        assert_eq!(body, json!({ "inputText": "hello", "dimensions": 1024 }));
        let v1 = request_body("amazon.titan-embed-text-v1", 1536, "hello", InputKind::Query);
        assert_eq!(v1, json!({ "inputText": "hello" }));
    }

    #[test]
    fn cohere_body_distinguishes_queries() {
        let doc = request_body("cohere.embed-multilingual-v3", 1024, "hi", InputKind::Document);
        assert_eq!(doc["input_type"], "search_document");
        let query = request_body("cohere.embed-multilingual-v3", 1024, "hi", InputKind::Query);
        assert_eq!(query["input_type"], "search_query");
        assert_eq!(query["texts"], json!(["hi"]));
        assert_eq!(query["embedding_types"], json!(["float"]));
    }

    #[test]
    fn parses_both_response_shapes() {
        let titan = json!({ "embedding": [0.5, -0.25], "inputTextTokenCount": 2 });
        assert_eq!(
            parse_response("amazon.titan-embed-text-v2:0", &titan).unwrap(),
            vec![0.5, -0.25]
        );
        let cohere = json!({ "embeddings": { "float": [[1.0, 2.0]] }, "texts": ["x"] });
        assert_eq!(
            parse_response("cohere.embed-english-v3", &cohere).unwrap(),
            vec![1.0, 2.0]
        );
    }

    #[test]
    fn malformed_response_is_rejected() {
        let err = parse_response("amazon.titan-embed-text-v2:0", &json!({ "oops": 1 })).unwrap_err();
        assert!(matches!(err, EmbedError::Rejected(_)));
    }

    #[test]
    fn throttling_is_transient() {
        let err = classify_error(
            StatusCode::BAD_REQUEST,
            Some("ThrottlingException:http://internal.amazon.com/coral/"),
            "",
        );
        assert!(err.is_retryable());
        let err = classify_error(StatusCode::BAD_REQUEST, Some("ValidationException"), "too long");
        assert!(!err.is_retryable());
        assert!(classify_error(StatusCode::TOO_MANY_REQUESTS, None, "").is_retryable());
    }

    #[test]
    fn endpoint_defaults_to_region() {
        let config = EmbeddingConfig {
            region: "ap-northeast-1".into(),
            ..EmbeddingConfig::default()
        };
        let creds = AwsCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        };
        let provider = BedrockProvider::with_credentials(&config, creds).unwrap();
        assert_eq!(provider.host(), "bedrock-runtime.ap-northeast-1.amazonaws.com");
        assert_eq!(provider.dims(), 1024);
    }
}
