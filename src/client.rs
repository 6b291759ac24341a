//! Client side of `POST /api/convert` with whole-request retries

use std::sync::Arc;
use log::{debug, error, warn};
use crate::auth::{Credential, CredentialService};
use crate::failover::RetryPolicy;

/// Optional request fields, normalised to empty strings on the wire
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertOptions
{   pub source_lang: Option<String>
  , pub target_lang: Option<String>
  , pub mode: Option<String>
  , pub quality: Option<crate::QualityTier>
}

impl ConvertOptions
{   pub fn source(mut self, lang: &str) -> Self
    {   self.source_lang = Some(lang.to_string());
        self
    }

    pub fn target(mut self, lang: &str) -> Self
    {   self.target_lang = Some(lang.to_string());
        self
    }

    pub fn mode(mut self, mode: &str) -> Self
    {   self.mode = Some(mode.to_string());
        self
    }

    pub fn quality(mut self, tier: crate::QualityTier) -> Self
    {   self.quality = Some(tier);
        self
    }
}

/// Attaches a bearer token, calls the server, retries transient failures
pub struct ConvertClient
{   endpoint: String
  , policy: RetryPolicy
  , retry_content_errors: bool
  , credentials: Arc<dyn CredentialService>
  , registry: crate::registry::Registry
  , http_client: reqwest::Client
}

impl ConvertClient
{   pub fn new(
      config: &crate::config::ClientConfig
    , credentials: Arc<dyn CredentialService>
    ) -> Self
    {   debug!("Creating ConvertClient for {}", config.endpoint);
        ConvertClient
        {   endpoint: config.endpoint.clone()
          , policy: RetryPolicy::from(config)
          , retry_content_errors: config.retry_content_errors
          , credentials
          , registry: crate::registry::Registry::builtin()
          , http_client: reqwest::Client::new()
        }
    }

    /// Build a request from loose arguments and send it
    pub async fn convert(
      &self
    , operation: crate::OperationKind
    , input: &str
    , options: ConvertOptions
    ) -> Result<crate::ConversionResult, crate::error::Error>
    {   let request = crate::ConversionRequest
        {   operation
          , input: input.to_string()
          , source_lang: options.source_lang
          , target_lang: options.target_lang
          , mode: options.mode
          , quality_tier: options.quality.unwrap_or_default()
        };
        self.send(&request).await
    }

    /// Send one request, retrying up to the policy's attempt budget
    pub async fn send(
      &self
    , request: &crate::ConversionRequest
    ) -> Result<crate::ConversionResult, crate::error::Error>
    {   let body = crate::request::ConvertRequestBody::from(request);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts
        {   let outcome = self.attempt(&body)
              .await
              .and_then(|value| self.to_result(request.operation, value));
            match outcome
            {   Ok(result) => {
                  debug!(
                    "{} succeeded on attempt {}",
                    request.operation, attempt + 1
                  );
                  return Ok(result);
                }
              , Err(err) => {
                  error!("Attempt {} failed: {}", attempt + 1, err);
                  if !err.is_retryable(self.retry_content_errors)
                  {   return Err(err);
                  }
                  last_error = Some(err);
                  if attempt + 1 < max_attempts
                  {   debug!("Retrying in {:?}", self.policy.delay);
                      tokio::time::sleep(self.policy.delay).await;
                  }
                }
            }
        }

        let last = last_error.unwrap_or_else(|| {
          crate::error::Error::Other("no attempt was made".to_string())
        });
        warn!("Giving up on {} after {} attempts", request.operation, max_attempts);
        Err(crate::error::Error::RetriesExhausted
        {   attempts: max_attempts
          , last: Box::new(last)
        })
    }

    /// A live identity, signing in anonymously when there is none
    async fn identity(&self)
      -> Result<Arc<dyn Credential>, crate::error::Error>
    {   match self.credentials.current_identity().await
        {   Some(identity) => Ok(identity)
          , None => {
              debug!("No identity, establishing an anonymous one");
              self.credentials.establish_anonymous_identity().await
            }
        }
    }

    async fn attempt(
      &self
    , body: &crate::request::ConvertRequestBody
    ) -> Result<serde_json::Value, crate::error::Error>
    {   let identity = self.identity().await?;
        let token = identity.get_token().await?;
        if token.trim().is_empty()
        {   return Err(crate::error::Error::Credential(
              "Could not retrieve Auth Token.".to_string()
            ));
        }

        let response = self.http_client
          .post(&self.endpoint)
          .header("Authorization", format!("Bearer {}", token))
          .header("Content-Type", "application/json")
          .json(body)
          .send()
          .await
          .map_err(|e| {
            crate::error::Error::HttpError(e.to_string())
          })?;

        let status = response.status();
        let text = response.text().await
          .map_err(|e| crate::error::Error::HttpError(e.to_string()))?;

        let data: serde_json::Value = serde_json::from_str(&text)
          .map_err(|_| {
            crate::error::Error::MalformedResponse
            {   status: status.as_u16()
              , snippet: text.chars().take(100).collect()
            }
          })?;

        if status.is_success()
        {   return Ok(data);
        }

        let body: Option<crate::request::ErrorBody>
          = serde_json::from_value(data).ok();
        Err(crate::error::Error::Server
        {   status: status.as_u16()
          , message: body
              .as_ref()
              .map(|b| b.error.clone())
              .unwrap_or_else(|| "Unknown Server Error".to_string())
          , code: body.and_then(|b| b.code)
        })
    }

    /// Shape a 200 body, holding structured values to the operation's schema
    fn to_result(
      &self
    , operation: crate::OperationKind
    , value: serde_json::Value
    ) -> Result<crate::ConversionResult, crate::error::Error>
    {   let op = self.registry.resolve(operation)?;
        if op.response_kind == crate::ResponseKind::Text
        {   if let Some(code) = value.get("convertedCode").and_then(|v| v.as_str())
            {   return Ok(crate::ConversionResult::Text
                {   converted_code: code.to_string()
                });
            }
        }
        if let Some(schema) = &op.output_schema
        {   schema.validate(&value).map_err(|e| {
              crate::error::Error::UnparseableOutput(format!(
                "server returned a value outside the {} shape ({})",
                schema.name, e
              ))
            })?;
        }
        Ok(crate::ConversionResult::Structured(value))
    }
}
