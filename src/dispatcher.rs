//! Request dispatcher: validate, resolve, execute, normalize
//!
//! Stateless per request. Provider failures are never retried here;
//! a failed attempt only hands over to the next attempt of the plan.

use log::{debug, info, warn};
use crate::failover;
use crate::providers::{ModelProvider, ProviderSet};
use crate::registry::{OperationConfig, PromptContext, Registry};

pub struct Dispatcher
{   registry: Registry
  , providers: ProviderSet
  , tiers: crate::config::TiersConfig
}

impl Dispatcher
{   pub fn new(
      registry: Registry
    , providers: ProviderSet
    , tiers: crate::config::TiersConfig
    ) -> Self
    {   debug!("Creating Dispatcher with {} operations", registry.len());
        Dispatcher
        {   registry
          , providers
          , tiers
        }
    }

    /// Built-in registry and chat-completions providers from config
    pub fn from_config(config: &crate::config::AppConfig) -> Self
    {   Dispatcher::new(
          Registry::builtin()
        , ProviderSet::from_config(config)
        , config.tiers.clone()
        )
    }

    /// Validate a wire body, then dispatch it
    pub async fn dispatch_body(
      &self
    , body: crate::request::ConvertRequestBody
    ) -> Result<crate::ConversionResult, crate::error::Error>
    {   let request = body.into_request()?;
        self.dispatch(&request).await
    }

    /// Run one request to a normalized result or a typed error
    pub async fn dispatch(
      &self
    , request: &crate::ConversionRequest
    ) -> Result<crate::ConversionResult, crate::error::Error>
    {   // Validate
        if request.input.trim().is_empty()
        {   return Err(crate::error::Error::InvalidRequest(
              "input is empty".to_string()
            ));
        }
        let operation = self.registry.resolve(request.operation)?;

        // Resolve
        let ctx = PromptContext::from(request);
        let system_prompt = operation.build_system_prompt(&ctx);
        let user_prompt = operation.build_user_prompt(&request.input);

        let tier_cfg = self.tiers.for_tier(request.quality_tier);
        let provider = self.providers.get(&tier_cfg.provider)?;
        let mut plan = failover::select(
          request.quality_tier
        , &self.tiers
        , operation
        , provider.supports_structured()
        );

        // Execute, then Normalize
        let mut last_error = None;
        while let Some(kind) = plan.attempts.current()
        {   let generate = plan.request_for(
              kind
            , &system_prompt
            , &user_prompt
            , operation.output_schema.as_ref()
            );

            let outcome = run_attempt(provider.as_ref(), &generate)
              .await
              .and_then(|output| normalize(operation, output));

            match outcome
            {   Ok(result) => {
                  info!(
                    "{} succeeded on {:?} attempt ({})",
                    request.operation, kind, plan.model
                  );
                  return Ok(result);
                }
              , Err(err) => {
                  if plan.attempts.has_next()
                  {   warn!(
                        "{:?} attempt for {} failed, falling back: {}",
                        kind, request.operation, err
                      );
                  } else
                  {   warn!(
                        "{:?} attempt for {} failed, no attempts left: {}",
                        kind, request.operation, err
                      );
                  }
                  last_error = Some(err);
                  plan.attempts.advance();
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
          crate::error::Error::Other(
            "generation plan had no attempts".to_string()
          )
        }))
    }
}

/// One provider call bounded by the provider's timeout
async fn run_attempt(
  provider: &dyn ModelProvider
, request: &crate::request::GenerateRequest
) -> Result<crate::ProviderOutput, crate::error::Error>
{   match tokio::time::timeout(
      provider.timeout()
    , provider.generate(request)
    ).await
    {   Ok(result) => result
      , Err(_) => {
          warn!(
            "{} did not answer within {:?}",
            provider.name(), provider.timeout()
          );
          Err(crate::error::Error::Timeout)
        }
    }
}

/// Turn a provider output into the value returned to the caller
pub fn normalize(
  operation: &OperationConfig
, output: crate::ProviderOutput
) -> Result<crate::ConversionResult, crate::error::Error>
{   match (output, operation.output_schema.as_ref())
    {   (crate::ProviderOutput::Structured(value), Some(schema)) => {
          schema.validate(&value)?;
          Ok(crate::ConversionResult::Structured(value))
        }
      , (crate::ProviderOutput::Text(text), Some(schema)) => {
          log::trace!("Raw model output for {}: {}", operation.kind, text);
          let value = crate::recovery::recover(&text).ok_or_else(|| {
            crate::error::Error::UnparseableOutput(
              "no JSON value could be extracted".to_string()
            )
          })?;
          schema.validate(&value).map_err(|e| {
            crate::error::Error::UnparseableOutput(format!(
              "recovered JSON does not match the {} shape ({})",
              schema.name, e
            ))
          })?;
          Ok(crate::ConversionResult::Structured(value))
        }
      , (crate::ProviderOutput::Text(text), None) => {
          Ok(crate::ConversionResult::Text
          {   converted_code: text.trim().to_string()
          })
        }
      , (crate::ProviderOutput::Structured(value), None) => {
          let converted_code = match value
          {   serde_json::Value::String(s) => s.trim().to_string()
            , other => other.to_string()
          };
          Ok(crate::ConversionResult::Text { converted_code })
        }
    }
}
