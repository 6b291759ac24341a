pub mod error;
pub mod config;
pub mod request;
pub mod schema;
pub mod registry;
pub mod recovery;
pub mod failover;
pub mod providers;
pub mod dispatcher;
pub mod server;
pub mod auth;
pub mod client;

use serde::{Deserialize, Serialize};

pub use client::ConvertClient;
pub use dispatcher::Dispatcher;
pub use error::Error;

/*

convly: the request path between a code-tools frontend and the
LLM providers behind it.

  client.rs      retries whole requests, attaches a bearer token
  server.rs      axum boundary, POST /api/convert
  dispatcher.rs  validate -> resolve -> execute -> normalize
  registry.rs    operation name -> prompts + output schema
  failover.rs    quality tier -> model + ordered attempts
  recovery.rs    raw model text -> JSON value (or None)

*/

/// CONVLY STRUCTURES:

/// Every operation the service knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OperationKind
{   #[serde(rename = "json")]
    Json
  , #[serde(rename = "refactor")]
    Refactor
  , #[serde(rename = "converter")]
    Converter
  , #[serde(rename = "generator")]
    Generator
  , #[serde(rename = "analysis")]
    Analysis
  , #[serde(rename = "css-framework")]
    CssFramework
  , #[serde(rename = "regex")]
    Regex
  , #[serde(rename = "sql")]
    Sql
}

impl OperationKind
{   pub const ALL: [OperationKind; 8] = [
      OperationKind::Json
    , OperationKind::Refactor
    , OperationKind::Converter
    , OperationKind::Generator
    , OperationKind::Analysis
    , OperationKind::CssFramework
    , OperationKind::Regex
    , OperationKind::Sql
    ];

    /// Wire name used in the `type` field of a request
    pub fn as_str(&self) -> &'static str
    {   match self
        {   OperationKind::Json => "json"
          , OperationKind::Refactor => "refactor"
          , OperationKind::Converter => "converter"
          , OperationKind::Generator => "generator"
          , OperationKind::Analysis => "analysis"
          , OperationKind::CssFramework => "css-framework"
          , OperationKind::Regex => "regex"
          , OperationKind::Sql => "sql"
        }
    }

    /// Look up an operation by wire name
    pub fn parse(name: &str) -> Option<OperationKind>
    {   OperationKind::ALL
          .iter()
          .copied()
          .find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for OperationKind
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>)
      -> std::fmt::Result
    {   f.write_str(self.as_str())
    }
}

/// Caller-selected speed/accuracy tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier
{   /// Cheapest tier, free-text generation only
    Turbo
  , /// Default tier
    Fast
  , /// Slowest, most capable model
    Quality
}

impl QualityTier
{   /// Parse a tier name; anything absent or unknown is `Fast`
    pub fn from_name(name: Option<&str>) -> QualityTier
    {   match name.map(|n| n.trim().to_ascii_lowercase()).as_deref()
        {   Some("turbo") => QualityTier::Turbo
          , Some("quality") => QualityTier::Quality
          , _ => QualityTier::Fast
        }
    }

    pub fn as_str(&self) -> &'static str
    {   match self
        {   QualityTier::Turbo => "turbo"
          , QualityTier::Fast => "fast"
          , QualityTier::Quality => "quality"
        }
    }

    /// Whether this tier is the cheapest one (no structured generation)
    pub fn is_cheapest(&self) -> bool
    {   *self == QualityTier::Turbo
    }
}

impl Default for QualityTier
{   fn default() -> Self
    {   QualityTier::Fast
    }
}

/// How an operation's final result is shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind
{   Structured
  , Text
}

/// One validated conversion request; lives for a single HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest
{   pub operation: OperationKind
  , pub input: String
  , pub source_lang: Option<String>
  , pub target_lang: Option<String>
  , pub mode: Option<String>
  , pub quality_tier: QualityTier
}

/// The value handed back to the caller.
///
/// `Structured` always satisfies the operation's output schema;
/// `Text` serializes as `{ "convertedCode": ... }`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionResult
{   Structured(serde_json::Value)
  , Text
    {   converted_code: String
    }
}

impl ConversionResult
{   /// JSON body sent to the caller
    pub fn to_json(&self) -> serde_json::Value
    {   match self
        {   ConversionResult::Structured(value) => value.clone()
          , ConversionResult::Text { converted_code } => {
              serde_json::json!({ "convertedCode": converted_code })
            }
        }
    }
}

impl Serialize for ConversionResult
{   fn serialize<S>(&self, serializer: S)
      -> Result<S::Ok, S::Error>
    where
      S: serde::Serializer
    {   self.to_json().serialize(serializer)
    }
}

/// What a provider call produced: a constrained value or free text.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutput
{   Structured(serde_json::Value)
  , Text(String)
}
