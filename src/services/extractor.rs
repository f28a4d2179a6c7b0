// src/services/extractor.rs

//! LLM-backed structured extraction.
//!
//! The extractor only returns the model's text. Turning it into a record
//! (fence stripping, JSON validation) is the stage runner's job.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ExtractorConfig;

/// Version of [`SYSTEM_PROMPT`]; bump whenever the prompt text changes.
pub const PROMPT_VERSION: &str = "material-schema-v1";

/// Instruction template sent with every cleaned page.
pub const SYSTEM_PROMPT: &str = r#"You are an expert in metallic materials data extraction. Extract the following information from the provided HTML page and return it as JSON:
{
  "Material": {
    "Name": "18CrMo4",
    "OldName": "18CD4",
    "OtherNames": ["1.7243"],
    "Category": "合金钢",
    "Density": "7.85 g/cm³",
    "BelongsToStandard": { "StandardCode": "NF EN 10084-2008", "Description": "表面硬化结构钢" },
    "AllStandards": [
      { "StandardCode": "NF EN 10084-2008", "Description": "表面硬化结构钢" },
      { "StandardCode": "DIN EN 10084-2008", "Description": "表面硬化钢—技术交货条件" }
    ],
    "Description": "18CrMo4 是一种表面硬化合金结构钢，适用于渗碳处理和高强度要求的零件。"
  },
  "ChemicalComposition": {
    "Elements": {
      "C": { "Min": "0.15", "Max": "0.21" },
      "Si": { "Min": "-", "Max": "0.4" },
      "Mn": { "Min": "0.6", "Max": "0.9" },
      "Cr": { "Min": "0.9", "Max": "1.2" },
      "Mo": { "Min": "0.15", "Max": "0.25" },
      "P": { "Min": "-", "Max": "0.025" },
      "S": { "Min": "-", "Max": "0.035" }
    },
    "Notes": []
  },
  "MechanicalProperties": {
    "Conditions": [
      { "Property": "硬度", "Condition": "软化退火（+A）", "Value": "≤207 HBW" },
      { "Property": "抗拉强度", "Condition": "室温", "Value": "≥500 MPa" }
    ],
    "HeatTreatment": [
      { "Process": "渗碳", "TemperatureRange": "880~980°C", "CoolingMethod": "水冷" },
      { "Process": "回火", "TemperatureRange": "150~200°C", "CoolingMethod": "空气冷却" }
    ],
    "Notes": []
  },
  "PhysicalProperties": {
    "Properties": [
      { "Property": "熔点", "Value": "1420~1460°C" },
      { "Property": "热导率", "Condition": "20°C", "Value": "36 W/(m·K)" }
    ]
  },
  "SimilarGrades": [
    {
      "Field": "合金结构钢",
      "Mappings": [
        { "Standard": "JIS", "Grades": ["SCM418"] },
        { "Standard": "DIN EN/DIN", "Grades": ["18CrMo4", "1.7243"] }
      ]
    }
  ]
}
Notes:
1. Fill MechanicalProperties and PhysicalProperties from the page only; when the page has no such data use an empty array.
2. Return valid JSON only, without comments or markdown."#;

/// Structured-data extraction from cleaned HTML.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Return the raw model answer for one cleaned page.
    async fn extract(&self, cleaned_html: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Extractor calling an OpenAI-compatible chat-completions endpoint.
pub struct LlmExtractor {
    config: ExtractorConfig,
    client: Client,
}

impl LlmExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        if config.api_key.is_none() {
            log::warn!(
                "{} is not set; extractor requests are sent without credentials",
                config.api_key_env
            );
        }
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, cleaned_html: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: cleaned_html,
                },
            ],
            temperature: self.config.temperature,
        };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        log::debug!(
            "Extract request: model={} prompt={} chars={}",
            self.config.model,
            PROMPT_VERSION,
            cleaned_html.chars().count()
        );
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::extractor(format!(
                "HTTP {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::extractor("completion has no content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn extractor(server: &MockServer) -> LlmExtractor {
        LlmExtractor::new(ExtractorConfig {
            base_url: format!("{}/v1/", server.uri()),
            api_key: Some("test-key".into()),
            ..ExtractorConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_extract_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({ "model": "grok-beta" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"Material\":{}}" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = extractor(&server).extract("<p>18CrMo4</p>").await.unwrap();
        assert_eq!(text, "{\"Material\":{}}");
    }

    #[tokio::test]
    async fn test_extract_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = extractor(&server).extract("<p/>").await.unwrap_err();
        assert!(matches!(err, AppError::Extractor(ref m) if m.contains("429")));
    }

    #[tokio::test]
    async fn test_extract_without_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = extractor(&server).extract("<p/>").await.unwrap_err();
        assert!(matches!(err, AppError::Extractor(_)));
    }

    #[test]
    fn test_prompt_asks_for_plain_json() {
        assert!(SYSTEM_PROMPT.contains("BelongsToStandard"));
        assert!(SYSTEM_PROMPT.contains("without comments or markdown"));
    }
}
