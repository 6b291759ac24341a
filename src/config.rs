//! Configuration for providers, quality tiers, server and client

use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use log::{debug, warn};

/// Provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig
{   /// Provider name, referenced by tiers
    pub name: String
  , /// OpenAI-compatible API base URL
    pub api_base: String
  , /// Environment variable holding the API key
    pub api_key_env: String
  , /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64
  , /// Whether the provider honours a JSON schema response format
    #[serde(default)]
    pub supports_structured: bool
  , /// Sampling temperature sent with every call
    #[serde(default)]
    pub temperature: Option<f32>
}

impl ProviderConfig
{   pub fn timeout(&self) -> Duration
    {   Duration::from_secs(self.timeout_secs)
    }

    /// Read the API key from the environment
    pub fn api_key(&self) -> Option<String>
    {   std::env::var(&self.api_key_env)
          .ok()
          .filter(|k| !k.trim().is_empty())
    }
}

fn default_timeout_secs() -> u64
{   60
}

/// Which provider and model back one quality tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig
{   pub provider: String
  , pub model: String
}

/// Tier table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiersConfig
{   pub turbo: TierConfig
  , pub fast: TierConfig
  , pub quality: TierConfig
}

impl TiersConfig
{   pub fn for_tier(&self, tier: crate::QualityTier) -> &TierConfig
    {   match tier
        {   crate::QualityTier::Turbo => &self.turbo
          , crate::QualityTier::Fast => &self.fast
          , crate::QualityTier::Quality => &self.quality
        }
    }
}

impl Default for TiersConfig
{   fn default() -> Self
    {   TiersConfig
        {   turbo: TierConfig
            {   provider: "groq".to_string()
              , model: "llama-3.3-70b-versatile".to_string()
            }
          , fast: TierConfig
            {   provider: "gateway".to_string()
              , model: "mistral/devstral-2".to_string()
            }
          , quality: TierConfig
            {   provider: "gateway".to_string()
              , model: "deepseek/deepseek-v3.2-thinking".to_string()
            }
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig
{   /// Socket address to bind
    pub bind: String
  , /// Reject requests without a bearer header
    pub require_bearer: bool
  , /// Largest accepted request body
    pub max_body_bytes: usize
}

impl Default for ServerConfig
{   fn default() -> Self
    {   ServerConfig
        {   bind: "127.0.0.1:3000".to_string()
          , require_bearer: false
          , max_body_bytes: 2 * 1024 * 1024
        }
    }
}

/// Client retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig
{   /// Full URL of the convert endpoint
    pub endpoint: String
  , /// Total attempts per request, at least 2
    pub max_attempts: usize
  , /// Fixed delay between attempts in milliseconds
    pub retry_delay_ms: u64
  , /// Retry when the server reports unparseable model output
    pub retry_content_errors: bool
}

impl Default for ClientConfig
{   fn default() -> Self
    {   ClientConfig
        {   endpoint: "http://127.0.0.1:3000/api/convert".to_string()
          , max_attempts: 2
          , retry_delay_ms: 1000
          , retry_content_errors: true
        }
    }
}

/// Anonymous identity service used by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig
{   /// Base URL of the account sign-up API
    pub identity_base: String
  , /// Base URL of the token refresh API
    pub token_base: String
  , /// Environment variable holding the web API key
    pub api_key_env: String
  , /// Refresh this many seconds before the token expires
    pub refresh_margin_secs: u64
}

impl AuthConfig
{   pub fn api_key(&self) -> Option<String>
    {   std::env::var(&self.api_key_env)
          .ok()
          .filter(|k| !k.trim().is_empty())
    }
}

impl Default for AuthConfig
{   fn default() -> Self
    {   AuthConfig
        {   identity_base: "https://identitytoolkit.googleapis.com/v1"
              .to_string()
          , token_base: "https://securetoken.googleapis.com/v1".to_string()
          , api_key_env: "FIREBASE_API_KEY".to_string()
          , refresh_margin_secs: 60
        }
    }
}

/// convly configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig
{   /// Provider configurations
    pub providers: Vec<ProviderConfig>
  , /// Quality tier table
    #[serde(default)]
    pub tiers: TiersConfig
  , #[serde(default)]
    pub server: ServerConfig
  , #[serde(default)]
    pub client: ClientConfig
  , #[serde(default)]
    pub auth: AuthConfig
}

impl Default for AppConfig
{   fn default() -> Self
    {   AppConfig
        {   providers: vec![
              ProviderConfig
              {   name: "gateway".to_string()
                , api_base: "https://ai-gateway.vercel.sh/v1".to_string()
                , api_key_env: "VERCEL_AI_GATEWAY_KEY".to_string()
                , timeout_secs: default_timeout_secs()
                , supports_structured: true
                , temperature: None
              }
            , ProviderConfig
              {   name: "groq".to_string()
                , api_base: "https://api.groq.com/openai/v1".to_string()
                , api_key_env: "GROQ_API_KEY".to_string()
                , timeout_secs: default_timeout_secs()
                , supports_structured: false
                , temperature: Some(0.1)
              }
            ]
          , tiers: TiersConfig::default()
          , server: ServerConfig::default()
          , client: ClientConfig::default()
          , auth: AuthConfig::default()
        }
    }
}

impl AppConfig
{   /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>)
      -> Result<AppConfig, crate::error::Error>
    {   let path = path.as_ref();
        debug!("Loading config from {}", path.display());
        let raw = std::fs::read_to_string(path)
          .map_err(|e| {
            crate::error::Error::InvalidConfiguration(
              format!("{}: {}", path.display(), e)
            )
          })?;
        let config: AppConfig = serde_json::from_str(&raw)
          .map_err(|e| {
            crate::error::Error::InvalidConfiguration(
              format!("{}: {}", path.display(), e)
            )
          })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `CONVLY_*` environment overrides applied
    pub fn from_env() -> Result<AppConfig, crate::error::Error>
    {   let mut config = match std::env::var("CONVLY_CONFIG")
        {   Ok(path) => AppConfig::load(path)?
          , Err(_) => AppConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from any key lookup (the environment in practice)
    pub fn apply_overrides<F>(&mut self, lookup: F)
      -> Result<(), crate::error::Error>
    where
      F: Fn(&str) -> Option<String>
    {   if let Some(bind) = lookup("CONVLY_BIND")
        {   self.server.bind = bind;
        }
        if let Some(flag) = lookup("CONVLY_REQUIRE_BEARER")
        {   self.server.require_bearer = parse_flag(&flag)?;
        }
        if let Some(endpoint) = lookup("CONVLY_ENDPOINT")
        {   self.client.endpoint = endpoint;
        }
        if let Some(attempts) = lookup("CONVLY_MAX_ATTEMPTS")
        {   self.client.max_attempts = attempts.parse()
              .map_err(|_| {
                crate::error::Error::InvalidConfiguration(
                  format!("CONVLY_MAX_ATTEMPTS: {}", attempts)
                )
              })?;
        }
        if let Some(secs) = lookup("CONVLY_PROVIDER_TIMEOUT_SECS")
        {   let secs: u64 = secs.parse()
              .map_err(|_| {
                crate::error::Error::InvalidConfiguration(
                  format!("CONVLY_PROVIDER_TIMEOUT_SECS: {}", secs)
                )
              })?;
            for provider in self.providers.iter_mut()
            {   provider.timeout_secs = secs;
            }
        }
        Ok(())
    }

    /// Check cross references and bounds
    pub fn validate(&self) -> Result<(), crate::error::Error>
    {   if self.client.max_attempts < 2
        {   return Err(crate::error::Error::InvalidConfiguration(
              "client.max_attempts must be at least 2".to_string()
            ));
        }
        for tier in [
          crate::QualityTier::Turbo
        , crate::QualityTier::Fast
        , crate::QualityTier::Quality
        ]
        {   let tier_cfg = self.tiers.for_tier(tier);
            if self.provider(&tier_cfg.provider).is_none()
            {   return Err(crate::error::Error::InvalidConfiguration(
                  format!(
                    "tier {} references unknown provider {}",
                    tier.as_str(), tier_cfg.provider
                  )
                ));
            }
        }
        for provider in &self.providers
        {   if provider.timeout_secs == 0
            {   warn!("Provider {} has no timeout budget", provider.name);
                return Err(crate::error::Error::InvalidConfiguration(
                  format!("provider {} timeout_secs is 0", provider.name)
                ));
            }
        }
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig>
    {   self.providers.iter().find(|p| p.name == name)
    }
}

fn parse_flag(value: &str) -> Result<bool, crate::error::Error>
{   match value.trim().to_ascii_lowercase().as_str()
    {   "1" | "true" | "yes" | "on" => Ok(true)
      , "0" | "false" | "no" | "off" => Ok(false)
      , other => Err(crate::error::Error::InvalidConfiguration(
          format!("expected a boolean, got {}", other)
        ))
    }
}
