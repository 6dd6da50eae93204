use async_trait::async_trait;
use base64::Engine;
use chime_core::{SynthesisRequest, TtsEngine, TtsError};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    engine: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    cache: bool,
    options: &'a chime_core::Options,
}

#[derive(Deserialize)]
struct TtsResponse {
    audio_base64: String,
}

/// Speech synthesis over a `POST {endpoint}/tts` JSON API answering with
/// base64 encoded audio.
#[derive(Debug, Clone)]
pub struct HttpTtsEngine {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpTtsEngine {
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        let endpoint = endpoint.map(|e| e.trim_end_matches('/').to_string());
        Self { client, endpoint }
    }

    fn endpoint(&self, engine: &str) -> Result<&str, TtsError> {
        self.endpoint
            .as_deref()
            .ok_or_else(|| TtsError::NotConfigured(engine.to_string()))
    }
}

#[async_trait]
impl TtsEngine for HttpTtsEngine {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, TtsError> {
        let url = format!("{}/tts", self.endpoint(&request.engine)?);
        debug!("Requesting '{}' audio from {}", request.engine, url);

        let body = TtsRequest {
            text: &request.text,
            engine: &request.engine,
            language: request.language.as_deref(),
            cache: request.cache,
            options: &request.options,
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TtsError::Failed(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TtsError::NotConfigured(request.engine.clone()));
        }
        let response: TtsResponse = response
            .error_for_status()
            .map_err(|e| TtsError::Failed(e.to_string()))?
            .json()
            .await
            .map_err(|e| TtsError::Failed(format!("invalid response: {e}")))?;

        base64::engine::general_purpose::STANDARD
            .decode(response.audio_base64.as_bytes())
            .map_err(|e| TtsError::Failed(format!("invalid audio_base64: {e}")))
    }

    async fn clear_cache(&self) -> Result<(), TtsError> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Ok(());
        };
        let response = self
            .client
            .post(format!("{endpoint}/clear_cache"))
            .send()
            .await
            .map_err(|e| TtsError::Failed(e.to_string()))?;
        // Engines without a cache simply don't expose the route
        if response.status() != StatusCode::NOT_FOUND {
            response
                .error_for_status()
                .map_err(|e| TtsError::Failed(e.to_string()))?;
        }
        Ok(())
    }
}
