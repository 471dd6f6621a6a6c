//! Google Gemini native provider implementation.
//!
//! Uses the `generateContent` REST endpoint directly:
//! - API key passed as `key` query parameter
//! - System entries become the top-level `systemInstruction`
//! - Assistant turns use the `model` role
//! - Images are fetched and sent as base64 `inline_data` parts

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use threadsage_core::error::ProviderError;
use threadsage_core::message::{ContextEntry, ImageRef, Role};
use threadsage_core::provider::{GenerateRequest, GenerativeProvider, Generation};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini `generateContent` provider.
pub struct GeminiProvider {
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: "gemini".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Split system entries from the conversation.
    fn extract_system(entries: &[ContextEntry]) -> (Option<String>, Vec<&ContextEntry>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut rest: Vec<&ContextEntry> = Vec::new();

        for entry in entries {
            match entry.role {
                Role::System => system_parts.push(&entry.content),
                _ => rest.push(entry),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, rest)
    }

    async fn fetch_inline(&self, image: &ImageRef) -> Result<ApiPart, ProviderError> {
        let response = self
            .client
            .get(&image.url)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("image download: {e}")))?;

        if !response.status().is_success() {
            return Err(ProviderError::ApiError {
                status_code: response.status().as_u16(),
                message: format!("image download failed: {}", image.url),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Network(format!("image download: {e}")))?;

        Ok(ApiPart::InlineData {
            inline_data: ApiBlob {
                mime_type: image.mime_or_default().to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(&bytes),
            },
        })
    }

    async fn to_api_contents(
        &self,
        entries: &[&ContextEntry],
    ) -> Result<Vec<ApiContent>, ProviderError> {
        let mut contents = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut parts = vec![ApiPart::Text {
                text: entry.content.clone(),
            }];
            if let Some(image) = &entry.image {
                parts.push(self.fetch_inline(image).await?);
            }
            contents.push(ApiContent {
                role: Self::api_role(entry.role),
                parts,
            });
        }
        Ok(contents)
    }

    fn api_role(role: Role) -> &'static str {
        match role {
            Role::Assistant => "model",
            Role::User | Role::System => "user",
        }
    }

    fn into_generation(
        response: ApiResponse,
        provider: &str,
        model: String,
    ) -> Result<Generation, ProviderError> {
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse(provider.to_string()));
        }

        Ok(Generation {
            text,
            tokens_used: response.usage_metadata.and_then(|u| u.total_token_count),
            model,
        })
    }
}

#[async_trait]
impl GenerativeProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError> {
        let model = request
            .model_hint
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, model
        );

        let (system, entries) = Self::extract_system(&request.entries);
        let mut body = serde_json::json!({
            "contents": self.to_api_contents(&entries).await?,
            "generationConfig": { "temperature": request.temperature },
        });

        if let Some(system) = system {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["generationConfig"]["maxOutputTokens"] = serde_json::json!(max_tokens);
        }

        debug!(provider = %self.name, model = %model, entries = entries.len(), "Sending generateContent request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 30,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Gemini API key".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gemini returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        Self::into_generation(api_response, &self.name, model)
    }
}

// --- Gemini API types ---

#[derive(Debug, Serialize)]
struct ApiContent {
    role: &'static str,
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiPart {
    Text { text: String },
    InlineData { inline_data: ApiBlob },
}

#[derive(Debug, Serialize)]
struct ApiBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidateContent {
    #[serde(default)]
    parts: Vec<ApiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    total_token_count: Option<u64>,
}
