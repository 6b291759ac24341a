//! Wire types for the HTTP boundary and provider calls

use serde::{Deserialize, Serialize};

/// Body of `POST /api/convert`
///
/// Every field is optional on the wire so a missing field becomes a
/// 400 from validation rather than a body rejection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequestBody
{   #[serde(rename = "type", default)]
    pub kind: Option<String>
  , #[serde(default)]
    pub input: Option<String>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_lang: Option<String>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lang: Option<String>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_mode: Option<String>
}

impl ConvertRequestBody
{   /// Validate the body into a request the dispatcher can run
    pub fn into_request(self)
      -> Result<crate::ConversionRequest, crate::error::Error>
    {   let input = match self.input
        {   Some(input) if !input.trim().is_empty() => input
          , _ => {
              return Err(crate::error::Error::InvalidRequest(
                "input is empty".to_string()
              ));
            }
        };

        let name = self.kind.unwrap_or_default();
        let operation = crate::OperationKind::parse(&name)
          .ok_or(crate::error::Error::UnknownOperation(name))?;

        Ok(crate::ConversionRequest
        {   operation
          , input
          , source_lang: non_empty(self.source_lang)
          , target_lang: non_empty(self.target_lang)
          , mode: non_empty(self.mode)
          , quality_tier: crate::QualityTier::from_name(
              self.quality_mode.as_deref()
            )
        })
    }
}

impl From<&crate::ConversionRequest> for ConvertRequestBody
{   fn from(req: &crate::ConversionRequest) -> Self
    {   ConvertRequestBody
        {   kind: Some(req.operation.as_str().to_string())
          , input: Some(req.input.clone())
          , source_lang: Some(req.source_lang.clone().unwrap_or_default())
          , target_lang: Some(req.target_lang.clone().unwrap_or_default())
          , mode: Some(req.mode.clone().unwrap_or_default())
          , quality_mode: Some(req.quality_tier.as_str().to_string())
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String>
{   value.filter(|v| !v.trim().is_empty())
}

/// Error body returned with every non-200 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody
{   pub error: String
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>
}

impl ErrorBody
{   pub fn from_error(err: &crate::error::Error) -> Self
    {   match err.class()
        {   crate::error::ErrorClass::Client => ErrorBody
            {   error: err.to_string()
              , details: None
              , code: Some(err.code().to_string())
            }
          , crate::error::ErrorClass::Recovery => ErrorBody
            {   error: "The AI model returned output that could not be parsed"
                  .to_string()
              , details: Some(err.to_string())
              , code: Some(err.code().to_string())
            }
          , crate::error::ErrorClass::ProviderTransient => ErrorBody
            {   error: "The AI provider is unavailable, please retry"
                  .to_string()
              , details: Some(err.to_string())
              , code: Some(err.code().to_string())
            }
          , _ => ErrorBody
            {   error: "Internal server error".to_string()
              , details: Some(err.to_string())
              , code: Some(err.code().to_string())
            }
        }
    }
}

/// How one provider call should be constrained
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationMode
{   /// Ask the provider to enforce this JSON schema
    Structured
    {   schema: serde_json::Value
    }
  , /// Free text; `json_object` requests the provider's JSON mode
    Text
    {   json_object: bool
    }
}

/// One provider call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest
{   pub system_prompt: String
  , pub user_prompt: String
  , pub model: String
  , pub mode: GenerationMode
}
