//! LLM provider implementations

pub mod chat;
pub mod scripted;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, warn};

// Re-export for convenience
pub use chat::ChatCompletionsClient;
pub use scripted::ScriptedProvider;

/// A model backend reachable through `generate`
#[async_trait]
pub trait ModelProvider: Send + Sync
{   /// Name tiers refer to
    fn name(&self) -> &str;

    /// Whether `GenerationMode::Structured` is honoured
    fn supports_structured(&self) -> bool;

    /// Time budget for one call
    fn timeout(&self) -> Duration;

    async fn generate(
      &self
    , request: &crate::request::GenerateRequest
    ) -> Result<crate::ProviderOutput, crate::error::Error>;
}

/// Providers by name, constructed once at startup
#[derive(Clone, Default)]
pub struct ProviderSet
{   providers: HashMap<String, Arc<dyn ModelProvider>>
}

impl ProviderSet
{   pub fn new() -> Self
    {   ProviderSet
        {   providers: HashMap::new()
        }
    }

    /// Build chat-completions clients for every configured provider
    pub fn from_config(config: &crate::config::AppConfig) -> Self
    {   let mut set = ProviderSet::new();
        for provider_cfg in &config.providers
        {   let api_key = provider_cfg.api_key();
            if api_key.is_none()
            {   warn!(
                  "No API key in {} for provider {}",
                  provider_cfg.api_key_env, provider_cfg.name
                );
            }
            set.insert(Arc::new(
              ChatCompletionsClient::new(provider_cfg, api_key)
            ));
        }
        set
    }

    pub fn insert(&mut self, provider: Arc<dyn ModelProvider>)
    {   debug!("Registering provider {}", provider.name());
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn ModelProvider>) -> Self
    {   self.insert(provider);
        self
    }

    pub fn get(&self, name: &str)
      -> Result<Arc<dyn ModelProvider>, crate::error::Error>
    {   self.providers
          .get(name)
          .cloned()
          .ok_or_else(|| {
            crate::error::Error::InvalidConfiguration(
              format!("no provider named {}", name)
            )
          })
    }
}
