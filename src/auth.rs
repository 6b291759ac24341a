//! Bearer credentials for the client
//!
//! `CredentialService` is the identity collaborator the retry loop talks
//! to. `AnonymousSession` implements it against an identity REST API:
//! it signs up an anonymous account once and refreshes the ID token when
//! it is about to expire. All acquisition goes through one session task,
//! so concurrent requests never sign up twice.

use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use log::{debug, error, info, trace};

/// A signed-in identity that can mint bearer tokens
#[async_trait]
pub trait Credential: Send + Sync
{   /// Stable identity id
    fn uid(&self) -> &str;

    /// Current bearer token, refreshed if needed
    async fn get_token(&self) -> Result<String, crate::error::Error>;
}

/// Source of identities for the client
#[async_trait]
pub trait CredentialService: Send + Sync
{   /// Identity already signed in, if any
    async fn current_identity(&self) -> Option<Arc<dyn Credential>>;

    /// Sign in anonymously; returns the existing identity if one is live
    async fn establish_anonymous_identity(&self)
      -> Result<Arc<dyn Credential>, crate::error::Error>;
}

// ===== Static credentials =====

/// Fixed token, for service-to-service use
pub struct StaticCredential
{   uid: String
  , token: String
}

impl StaticCredential
{   pub fn new(uid: &str, token: &str) -> Arc<Self>
    {   Arc::new(StaticCredential
        {   uid: uid.to_string()
          , token: token.to_string()
        })
    }
}

#[async_trait]
impl Credential for StaticCredential
{   fn uid(&self) -> &str
    {   &self.uid
    }

    async fn get_token(&self) -> Result<String, crate::error::Error>
    {   Ok(self.token.clone())
    }
}

#[async_trait]
impl CredentialService for StaticCredential
{   async fn current_identity(&self) -> Option<Arc<dyn Credential>>
    {   Some(StaticCredential::new(&self.uid, &self.token))
    }

    async fn establish_anonymous_identity(&self)
      -> Result<Arc<dyn Credential>, crate::error::Error>
    {   Ok(StaticCredential::new(&self.uid, &self.token))
    }
}

// ===== Identity API wire types =====

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpResponse
{   pub id_token: String
  , pub refresh_token: String
  , pub expires_in: String
  , pub local_id: String
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse
{   pub id_token: String
  , pub refresh_token: String
  , pub expires_in: String
}

fn parse_expiry(expires_in: &str) -> Result<Duration, crate::error::Error>
{   expires_in.trim()
      .parse::<u64>()
      .map(Duration::from_secs)
      .map_err(|_| {
        crate::error::Error::Credential(
          format!("bad expiresIn value: {}", expires_in)
        )
      })
}

// ===== Anonymous identity =====

struct TokenState
{   id_token: String
  , refresh_token: String
  , expires_at: Instant
}

/// Anonymous account with a refreshable ID token
pub struct AnonymousIdentity
{   uid: String
  , token_url: String
  , refresh_margin: Duration
  , http_client: reqwest::Client
  , state: Mutex<TokenState>
}

impl AnonymousIdentity
{   async fn refresh(&self, state: &mut TokenState)
      -> Result<(), crate::error::Error>
    {   debug!("Refreshing ID token for {}", self.uid);
        let response = self.http_client
          .post(&self.token_url)
          .form(&[
            ("grant_type", "refresh_token")
          , ("refresh_token", state.refresh_token.as_str())
          ])
          .send()
          .await
          .map_err(|e| {
            error!("Token refresh failed: {}", e);
            crate::error::Error::Credential(e.to_string())
          })?;

        let status = response.status();
        if !status.is_success()
        {   let error_text = response.text().await
              .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Token refresh rejected ({}): {}", status, error_text);
            return Err(crate::error::Error::Credential(
              format!("token refresh rejected ({})", status)
            ));
        }

        let refreshed: RefreshResponse = response.json().await
          .map_err(|e| crate::error::Error::Credential(e.to_string()))?;
        let lifetime = parse_expiry(&refreshed.expires_in)?;

        state.id_token = refreshed.id_token;
        state.refresh_token = refreshed.refresh_token;
        state.expires_at = Instant::now() + lifetime;
        Ok(())
    }
}

#[async_trait]
impl Credential for AnonymousIdentity
{   fn uid(&self) -> &str
    {   &self.uid
    }

    async fn get_token(&self) -> Result<String, crate::error::Error>
    {   let mut state = self.state.lock().await;
        if Instant::now() + self.refresh_margin >= state.expires_at
        {   self.refresh(&mut state).await?;
        }
        trace!("Handing out token for {}", self.uid);
        Ok(state.id_token.clone())
    }
}

// ===== Session actor =====

/// Commands for the session task
pub enum SessionCommand
{   CurrentIdentity
    {   reply: mpsc::UnboundedSender<Option<Arc<AnonymousIdentity>>>
    }
  , EstablishAnonymous
    {   reply: mpsc::UnboundedSender<
          Result<Arc<AnonymousIdentity>, crate::error::Error>
        >
    }
  , SignOut
  , Shutdown
}

struct SessionState
{   sign_up_url: String
  , token_url: String
  , refresh_margin: Duration
  , http_client: reqwest::Client
  , identity: Option<Arc<AnonymousIdentity>>
}

impl SessionState
{   async fn handle_establish(&mut self)
      -> Result<Arc<AnonymousIdentity>, crate::error::Error>
    {   if let Some(identity) = &self.identity
        {   debug!("Identity {} already established", identity.uid);
            return Ok(identity.clone());
        }

        debug!("Signing up anonymous identity");
        let response = self.http_client
          .post(&self.sign_up_url)
          .json(&serde_json::json!({ "returnSecureToken": true }))
          .send()
          .await
          .map_err(|e| {
            error!("Sign-up failed: {}", e);
            crate::error::Error::Credential(e.to_string())
          })?;

        let status = response.status();
        if !status.is_success()
        {   let error_text = response.text().await
              .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Sign-up rejected ({}): {}", status, error_text);
            return Err(crate::error::Error::Credential(
              format!("anonymous sign-up rejected ({})", status)
            ));
        }

        let signed_up: SignUpResponse = response.json().await
          .map_err(|e| crate::error::Error::Credential(e.to_string()))?;
        let lifetime = parse_expiry(&signed_up.expires_in)?;

        let identity = Arc::new(AnonymousIdentity
        {   uid: signed_up.local_id
          , token_url: self.token_url.clone()
          , refresh_margin: self.refresh_margin
          , http_client: self.http_client.clone()
          , state: Mutex::new(TokenState
            {   id_token: signed_up.id_token
              , refresh_token: signed_up.refresh_token
              , expires_at: Instant::now() + lifetime
            })
        });
        info!("Established anonymous identity {}", identity.uid);
        self.identity = Some(identity.clone());
        Ok(identity)
    }
}

/// Public handle to the session task
pub struct AnonymousSession
{   tx: mpsc::UnboundedSender<SessionCommand>
  , _task: tokio::task::JoinHandle<()>
}

impl AnonymousSession
{   /// Spawn a session for the given identity endpoints
    pub fn new(
      config: &crate::config::AuthConfig
    , api_key: &str
    ) -> Self
    {   debug!("Creating AnonymousSession");
        let state = SessionState
        {   sign_up_url: format!(
              "{}/accounts:signUp?key={}",
              config.identity_base.trim_end_matches('/'), api_key
            )
          , token_url: format!(
              "{}/token?key={}",
              config.token_base.trim_end_matches('/'), api_key
            )
          , refresh_margin: Duration::from_secs(config.refresh_margin_secs)
          , http_client: reqwest::Client::new()
          , identity: None
        };
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let _task = tokio::spawn(async move {
          run_session_loop(cmd_rx, state).await;
        });
        AnonymousSession
        {   tx: cmd_tx
          , _task
        }
    }

    /// Read the API key from the environment named in config
    pub fn from_config(config: &crate::config::AuthConfig)
      -> Result<Self, crate::error::Error>
    {   let api_key = config.api_key().ok_or_else(|| {
          crate::error::Error::MissingApiKey(config.api_key_env.clone())
        })?;
        Ok(AnonymousSession::new(config, &api_key))
    }

    fn send(&self, cmd: SessionCommand) -> Result<(), crate::error::Error>
    {   self.tx.send(cmd).map_err(|_| {
          error!("Session task disconnected");
          crate::error::Error::Credential(
            "session task disconnected".to_string()
          )
        })
    }

    /// Forget the current identity; the next request signs up again
    pub fn sign_out(&self) -> Result<(), crate::error::Error>
    {   self.send(SessionCommand::SignOut)
    }

    /// Stop the session task
    pub fn shutdown(&self) -> Result<(), crate::error::Error>
    {   self.send(SessionCommand::Shutdown)
    }
}

#[async_trait]
impl CredentialService for AnonymousSession
{   async fn current_identity(&self) -> Option<Arc<dyn Credential>>
    {   let (reply, mut reply_rx) = mpsc::unbounded_channel();
        self.send(SessionCommand::CurrentIdentity { reply }).ok()?;
        reply_rx.recv()
          .await
          .flatten()
          .map(|identity| identity as Arc<dyn Credential>)
    }

    async fn establish_anonymous_identity(&self)
      -> Result<Arc<dyn Credential>, crate::error::Error>
    {   let (reply, mut reply_rx) = mpsc::unbounded_channel();
        self.send(SessionCommand::EstablishAnonymous { reply })?;
        match reply_rx.recv().await
        {   Some(result) => result.map(|identity| identity as Arc<dyn Credential>)
          , None => Err(crate::error::Error::Credential(
              "session task dropped the request".to_string()
            ))
        }
    }
}

/// Main session event loop
async fn run_session_loop(
  mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>
, mut state: SessionState
)
{   debug!("Starting session loop");
    loop
    { match cmd_rx.recv().await
      {   Some(SessionCommand::CurrentIdentity { reply }) => {
            let _ = reply.send(state.identity.clone());
          }
        , Some(SessionCommand::EstablishAnonymous { reply }) => {
            let result = state.handle_establish().await;
            let _ = reply.send(result);
          }
        , Some(SessionCommand::SignOut) => {
            debug!("Signing out");
            state.identity = None;
          }
        , Some(SessionCommand::Shutdown) => {
            info!("Session shutting down");
            break;
          }
        , None => {
            debug!("Session channel closed");
            break;
          }
      }
    }
}
