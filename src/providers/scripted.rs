//! In-process provider that replays canned outputs
//!
//! Used for offline runs and tests; every call is recorded.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use log::debug;

/// One canned reply
#[derive(Debug, Clone)]
pub enum Scripted
{   Output(crate::ProviderOutput)
  , Fail(crate::error::Error)
  , /// Sleep before answering, to exercise timeouts
    Delay(Duration, Box<Scripted>)
}

impl Scripted
{   pub fn text(text: &str) -> Self
    {   Scripted::Output(crate::ProviderOutput::Text(text.to_string()))
    }

    pub fn structured(value: serde_json::Value) -> Self
    {   Scripted::Output(crate::ProviderOutput::Structured(value))
    }

    pub fn fail(err: crate::error::Error) -> Self
    {   Scripted::Fail(err)
    }
}

pub struct ScriptedProvider
{   name: String
  , supports_structured: bool
  , timeout: Duration
  , replies: Mutex<VecDeque<Scripted>>
  , calls: Mutex<Vec<crate::request::GenerateRequest>>
}

impl ScriptedProvider
{   pub fn new(name: &str, supports_structured: bool) -> Self
    {   ScriptedProvider
        {   name: name.to_string()
          , supports_structured
          , timeout: Duration::from_secs(5)
          , replies: Mutex::new(VecDeque::new())
          , calls: Mutex::new(vec![])
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self
    {   self.timeout = timeout;
        self
    }

    /// Queue a reply; replies are served in order
    pub fn then(self, reply: Scripted) -> Self
    {   if let Ok(mut replies) = self.replies.lock()
        {   replies.push_back(reply);
        }
        self
    }

    /// Every request received so far
    pub fn calls(&self) -> Vec<crate::request::GenerateRequest>
    {   self.calls
          .lock()
          .map(|c| c.clone())
          .unwrap_or_default()
    }
}

#[async_trait]
impl super::ModelProvider for ScriptedProvider
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
    {   if let Ok(mut calls) = self.calls.lock()
        {   calls.push(request.clone());
        }
        let next = self.replies
          .lock()
          .ok()
          .and_then(|mut r| r.pop_front());

        let mut reply = match next
        {   Some(reply) => reply
          , None => {
              return Err(crate::error::Error::Other(
                format!("{} has no scripted reply left", self.name)
              ));
            }
        };
        loop
        {   match reply
            {   Scripted::Delay(wait, inner) => {
                  debug!("{} delaying reply by {:?}", self.name, wait);
                  tokio::time::sleep(wait).await;
                  reply = *inner;
                }
              , Scripted::Output(output) => return Ok(output)
              , Scripted::Fail(err) => return Err(err)
            }
        }
    }
}
