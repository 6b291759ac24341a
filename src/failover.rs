//! Generation strategy selection and client retry policy

use std::time::Duration;
use log::debug;

/// Appended to the system prompt of a text attempt for schema-bearing ops
pub const PURE_JSON_INSTRUCTION: &str = "\n\nIMPORTANT: Output PURE JSON.";

/// How one generation attempt talks to its provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind
{   /// Schema attached, provider constrains the output
    Structured
  , /// Free text, recovered afterwards when a schema exists
    Text
}

/// Model choice plus ordered attempts for one request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationPlan
{   pub tier: crate::QualityTier
  , pub provider: String
  , pub model: String
  , pub attempts: AttemptSequence
}

/// Pick the model and attempt order for a request.
///
/// Structured generation is tried first only when the operation has a
/// schema, the tier is not the cheapest, and the provider supports it.
/// A text attempt always closes the sequence.
pub fn select(
  tier: crate::QualityTier
, tiers: &crate::config::TiersConfig
, operation: &crate::registry::OperationConfig
, provider_supports_structured: bool
) -> GenerationPlan
{   let tier_cfg = tiers.for_tier(tier);
    let mut attempts = vec![];
    if operation.output_schema.is_some()
      && operation.response_kind == crate::ResponseKind::Structured
      && !tier.is_cheapest()
      && provider_supports_structured
    {   attempts.push(AttemptKind::Structured);
    }
    attempts.push(AttemptKind::Text);

    debug!(
      "Plan for {} on {} tier: {}/{} {:?}",
      operation.kind, tier.as_str(), tier_cfg.provider, tier_cfg.model, attempts
    );

    GenerationPlan
    {   tier
      , provider: tier_cfg.provider.clone()
      , model: tier_cfg.model.clone()
      , attempts: AttemptSequence::new(attempts)
    }
}

impl GenerationPlan
{   /// Provider call for one attempt of this plan
    pub fn request_for(
      &self
    , kind: AttemptKind
    , system_prompt: &str
    , user_prompt: &str
    , schema: Option<&crate::schema::OutputSchema>
    ) -> crate::request::GenerateRequest
    {   let (system_prompt, mode) = match (kind, schema)
        {   (AttemptKind::Structured, Some(schema)) => (
              system_prompt.to_string()
            , crate::request::GenerationMode::Structured
              {   schema: schema.to_json_schema()
              }
            )
          , (_, Some(_)) => (
              format!("{}{}", system_prompt, PURE_JSON_INSTRUCTION)
            , crate::request::GenerationMode::Text
              {   json_object: true
              }
            )
          , (_, None) => (
              system_prompt.to_string()
            , crate::request::GenerationMode::Text
              {   json_object: false
              }
            )
        };
        crate::request::GenerateRequest
        {   system_prompt
          , user_prompt: user_prompt.to_string()
          , model: self.model.clone()
          , mode
        }
    }
}

/// Ordered attempts, consumed front to back
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptSequence
{   pub attempts: Vec<AttemptKind>
  , pub current_index: usize
}

impl AttemptSequence
{   pub fn new(attempts: Vec<AttemptKind>) -> Self
    {   AttemptSequence
        {   attempts
          , current_index: 0
        }
    }

    /// Get the current attempt
    pub fn current(&self) -> Option<AttemptKind>
    {   self.attempts.get(self.current_index).copied()
    }

    /// Move to the next attempt
    pub fn advance(&mut self) -> Option<AttemptKind>
    {   self.current_index += 1;
        self.current()
    }

    /// Check if there is an attempt after the current one
    pub fn has_next(&self) -> bool
    {   self.current_index + 1 < self.attempts.len()
    }
}

/// Retry policy for whole client requests: a fixed delay between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy
{   pub max_attempts: usize
  , pub delay: Duration
}

impl RetryPolicy
{   pub fn new(max_attempts: usize, delay_ms: u64) -> Self
    {   RetryPolicy
        {   max_attempts
          , delay: Duration::from_millis(delay_ms)
        }
    }
}

impl From<&crate::config::ClientConfig> for RetryPolicy
{   fn from(config: &crate::config::ClientConfig) -> Self
    {   RetryPolicy::new(config.max_attempts, config.retry_delay_ms)
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::new(2, 1000)
    }
}
