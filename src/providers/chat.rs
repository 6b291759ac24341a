use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use log::{debug, trace, error};

// ===== Message Types =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: String
  , pub content: String
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>
  , pub stream: bool
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse
{   pub choices: Vec<Choice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice
{   pub message: ResponseMessage
  , pub finish_reason: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage
{   #[serde(default)]
    pub content: Option<String>
}

// ===== Client =====

/// Client for any OpenAI-compatible `/chat/completions` endpoint
pub struct ChatCompletionsClient
{   name: String
  , api_base: String
  , api_key: Option<String>
  , supports_structured: bool
  , temperature: Option<f32>
  , timeout: Duration
  , http_client: reqwest::Client
}

impl ChatCompletionsClient
{   pub fn new(
      config: &crate::config::ProviderConfig
    , api_key: Option<String>
    ) -> Self
    {   debug!("Creating ChatCompletionsClient {}", config.name);
        ChatCompletionsClient
        {   name: config.name.clone()
          , api_base: config.api_base.trim_end_matches('/').to_string()
          , api_key
          , supports_structured: config.supports_structured
          , temperature: config.temperature
          , timeout: config.timeout()
          , http_client: reqwest::Client::new()
        }
    }

    fn get_api_key(&self) -> Result<&str, crate::error::Error>
    {   self.api_key.as_deref().ok_or_else(|| {
          error!("No API key for provider: {}", self.name);
          crate::error::Error::MissingApiKey(self.name.clone())
        })
    }

    /// Wire body for one generate call
    pub fn build_request(
      &self
    , request: &crate::request::GenerateRequest
    ) -> ChatRequest
    {   let response_format = match &request.mode
        {   crate::request::GenerationMode::Structured { schema } => {
              Some(serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                  "name": "result",
                  "schema": schema
                }
              }))
            }
          , crate::request::GenerationMode::Text { json_object: true } => {
              Some(serde_json::json!({ "type": "json_object" }))
            }
          , crate::request::GenerationMode::Text { json_object: false } => {
              None
            }
        };

        ChatRequest
        {   model: request.model.clone()
          , messages: vec![
              ChatMessage
              {   role: "system".to_string()
                , content: request.system_prompt.clone()
              }
            , ChatMessage
              {   role: "user".to_string()
                , content: request.user_prompt.clone()
              }
            ]
          , temperature: self.temperature
          , response_format
          , stream: false
        }
    }
}

#[async_trait]
impl super::ModelProvider for ChatCompletionsClient
{   fn name(&self) -> &str
    {   &self.name
    }

    fn supports_structured(&self) -> bool
    {   self.supports_structured
    }

    fn timeout(&self) -> Duration
    {   self.timeout
    }

    async fn generate(
      &self
    , request: &crate::request::GenerateRequest
    ) -> Result<crate::ProviderOutput, crate::error::Error>
    {   debug!("{} generate with model {}", self.name, request.model);

        let api_key = self.get_api_key()?;
        let body = self.build_request(request);
        trace!("{} request: {:?}", self.name, body);

        let response = self.http_client
          .post(format!("{}/chat/completions", self.api_base))
          .header("Authorization", format!("Bearer {}", api_key))
          .header("Content-Type", "application/json")
          .json(&body)
          .send()
          .await
          .map_err(|e| {
            error!("HTTP error: {}", e);
            crate::error::Error::HttpError(e.to_string())
          })?;

        let status = response.status();
        trace!("{} response status: {}", self.name, status);

        if !status.is_success()
        {   let error_text = response.text().await
              .unwrap_or_else(|_|
                "Unknown error".to_string()
              );
            error!("{} API error: {}", self.name, error_text);
            return Err(crate::error::Error::ApiError
            {   status: status.as_u16()
              , message: format!("{} error: {}", self.name, error_text)
            });
        }

        let chat_response: ChatResponse
          = response.json().await.map_err(|e| {
            error!("Parse error: {}", e);
            crate::error::Error::ParseError(e.to_string())
          })?;

        let text = chat_response.choices
          .into_iter()
          .next()
          .map(|c| c.message.content.unwrap_or_default())
          .ok_or_else(|| {
            error!("No choices in response");
            crate::error::Error::NoChoicesInResponse
          })?;

        match request.mode
        {   crate::request::GenerationMode::Structured { .. } => {
              serde_json::from_str(&text)
                .map(crate::ProviderOutput::Structured)
                .map_err(|e| {
                  error!("{} structured output is not JSON: {}", self.name, e);
                  crate::error::Error::SchemaViolation(
                    format!("constrained output is not JSON: {}", e)
                  )
                })
            }
          , crate::request::GenerationMode::Text { .. } => {
              Ok(crate::ProviderOutput::Text(text))
            }
        }
    }
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::providers::ModelProvider;
    use crate::request::{GenerateRequest, GenerationMode};

    fn client(api_key: Option<&str>) -> ChatCompletionsClient
    {   let config = crate::config::ProviderConfig
        {   name: "groq".to_string()
          , api_base: "http://127.0.0.1:9/v1/".to_string()
          , api_key_env: "UNUSED".to_string()
          , timeout_secs: 5
          , supports_structured: false
          , temperature: Some(0.1)
        };
        ChatCompletionsClient::new(&config, api_key.map(String::from))
    }

    fn request(mode: GenerationMode) -> GenerateRequest
    {   GenerateRequest
        {   system_prompt: "sys".into()
          , user_prompt: "user".into()
          , model: "llama-3.3-70b-versatile".into()
          , mode
        }
    }

    #[test]
    fn text_mode_with_schema_requests_json_object()
    {   let body = client(Some("k"))
          .build_request(&request(GenerationMode::Text { json_object: true }));
        assert_eq!(
          body.response_format,
          Some(serde_json::json!({ "type": "json_object" }))
        );
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].content, "user");
        assert_eq!(body.temperature, Some(0.1));
    }

    #[test]
    fn structured_mode_attaches_schema()
    {   let schema = serde_json::json!({ "type": "object" });
        let body = client(Some("k")).build_request(&request(
          GenerationMode::Structured { schema: schema.clone() }
        ));
        let format = body.response_format.unwrap();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["schema"], schema);
    }

    #[test]
    fn plain_text_mode_has_no_response_format()
    {   let body = client(Some("k"))
          .build_request(&request(GenerationMode::Text { json_object: false }));
        let wire = serde_json::to_value(&body).unwrap();
        assert!(wire.get("response_format").is_none());
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_network_call()
    {   let result = client(None)
          .generate(&request(GenerationMode::Text { json_object: false }))
          .await;
        assert_eq!(
          result,
          Err(crate::error::Error::MissingApiKey("groq".to_string()))
        );
    }
}
