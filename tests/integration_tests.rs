use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde_json::json;
use convly::auth::{Credential, CredentialService, StaticCredential};
use convly::config::{AppConfig, ClientConfig};
use convly::error::{Error, ErrorClass};
use convly::providers::scripted::{Scripted, ScriptedProvider};
use convly::providers::ProviderSet;
use convly::registry::{Registry, JSON_END_MARKER, JSON_START_MARKER};
use convly::{ConversionResult, ConvertClient, Dispatcher, OperationKind, QualityTier};

struct Harness
{   endpoint: String
  , base: String
  , gateway: Arc<ScriptedProvider>
  , groq: Arc<ScriptedProvider>
}

/// Serve a dispatcher backed by scripted providers on an ephemeral port
async fn start_server(
  gateway: ScriptedProvider
, groq: ScriptedProvider
, require_bearer: bool
) -> Harness
{   let mut config = AppConfig::default();
    config.server.require_bearer = require_bearer;
    start_server_with(gateway, groq, config).await
}

async fn start_server_with(
  gateway: ScriptedProvider
, groq: ScriptedProvider
, config: AppConfig
) -> Harness
{   let gateway = Arc::new(gateway);
    let groq = Arc::new(groq);

    let dispatcher = Dispatcher::new(
      Registry::builtin()
    , ProviderSet::new()
        .with(gateway.clone())
        .with(groq.clone())
    , config.tiers.clone()
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
      .await
      .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let _ = convly::server::serve(listener, &config, dispatcher).await;
    });

    Harness
    {   endpoint: format!("http://{}/api/convert", addr)
      , base: format!("http://{}", addr)
      , gateway
      , groq
    }
}

fn client_for(endpoint: &str, credentials: Arc<dyn CredentialService>)
  -> ConvertClient
{   let config = ClientConfig
    {   endpoint: endpoint.to_string()
      , max_attempts: 3
      , retry_delay_ms: 10
      , retry_content_errors: true
    };
    ConvertClient::new(&config, credentials)
}

fn delimited(value: &serde_json::Value) -> String
{   format!(
      "Let me think.\n{}\n{}\n{}\nDone.",
      JSON_START_MARKER, value, JSON_END_MARKER
    )
}

fn regex_value() -> serde_json::Value
{   json!({
      "pattern": "^[a-z]+$",
      "summary": "Lowercase letters only",
      "breakdown": [
        { "token": "^", "description": "start of input" },
        { "token": "[a-z]+", "description": "one or more lowercase letters" },
        { "token": "$", "description": "end of input" }
      ]
    })
}

// ===== Server boundary =====

#[tokio::test]
async fn test_health_endpoint()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
    , ScriptedProvider::new("groq", false)
    , false
    ).await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", h.base))
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_empty_input_is_400_without_provider_call()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
    , ScriptedProvider::new("groq", false)
    , false
    ).await;

    let response = reqwest::Client::new()
      .post(&h.endpoint)
      .json(&json!({ "type": "json", "input": "" }))
      .send()
      .await
      .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
    assert!(h.gateway.calls().is_empty());
    assert!(h.groq.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_type_and_bad_json_are_400()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
    , ScriptedProvider::new("groq", false)
    , false
    ).await;
    let http = reqwest::Client::new();

    let unknown = http
      .post(&h.endpoint)
      .json(&json!({ "type": "haiku", "input": "autumn" }))
      .send()
      .await
      .unwrap();
    assert_eq!(unknown.status().as_u16(), 400);

    let garbled = http
      .post(&h.endpoint)
      .header("Content-Type", "application/json")
      .body("{not json")
      .send()
      .await
      .unwrap();
    assert_eq!(garbled.status().as_u16(), 400);
    let body: serde_json::Value = garbled.json().await.unwrap();
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_oversized_body_is_json_client_error()
{   let mut config = AppConfig::default();
    config.server.max_body_bytes = 1024;
    let h = start_server_with(
      ScriptedProvider::new("gateway", true)
    , ScriptedProvider::new("groq", false)
    , config
    ).await;
    let input = "SELECT 1;\n".repeat(410);

    let response = reqwest::Client::new()
      .post(&h.endpoint)
      .json(&json!({ "type": "sql", "input": input }))
      .send()
      .await
      .unwrap();
    assert_eq!(response.status().as_u16(), 413);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
    assert_eq!(body["code"], "invalid_request");

    let client = client_for(&h.endpoint, StaticCredential::new("svc", "t"));
    let err = client
      .convert(OperationKind::Sql, &input, Default::default())
      .await
      .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Client);
    match err
    {   Error::Server { status, code, .. } => {
          assert_eq!(status, 413);
          assert_eq!(code.as_deref(), Some("invalid_request"));
        }
      , other => panic!("unexpected error: {:?}", other)
    }
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn test_structured_failure_is_hidden_by_text_fallback()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
        .then(Scripted::fail(Error::ApiError
        {   status: 500
          , message: "json_schema not supported".into()
        }))
        .then(Scripted::text(&delimited(&regex_value())))
    , ScriptedProvider::new("groq", false)
    , false
    ).await;

    let response = reqwest::Client::new()
      .post(&h.endpoint)
      .json(&json!({
        "type": "regex",
        "input": "lowercase words",
        "targetLang": "Python",
        "qualityMode": "quality"
      }))
      .send()
      .await
      .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, regex_value());

    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].model, "deepseek/deepseek-v3.2-thinking");
    assert!(calls[0].system_prompt.contains("Target Flavor: Python"));
}

#[tokio::test]
async fn test_unparseable_output_is_500_with_distinct_code()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
    , ScriptedProvider::new("groq", false)
        .then(Scripted::text("Sorry, I only speak prose."))
    , false
    ).await;

    let response = reqwest::Client::new()
      .post(&h.endpoint)
      .json(&json!({ "type": "analysis", "input": "x = 1", "qualityMode": "turbo" }))
      .send()
      .await
      .unwrap();
    assert_eq!(response.status().as_u16(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "unparseable_output");
    assert!(body["details"].is_string());
}

#[tokio::test]
async fn test_provider_outage_is_500_provider_unavailable()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
        .then(Scripted::fail(Error::HttpError("connection refused".into())))
    , ScriptedProvider::new("groq", false)
    , false
    ).await;

    let response = reqwest::Client::new()
      .post(&h.endpoint)
      .json(&json!({ "type": "sql", "input": "count orders" }))
      .send()
      .await
      .unwrap();
    assert_eq!(response.status().as_u16(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "provider_unavailable");
}

#[tokio::test]
async fn test_bearer_required_when_configured()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
        .then(Scripted::text("SELECT 1;"))
    , ScriptedProvider::new("groq", false)
    , true
    ).await;
    let http = reqwest::Client::new();
    let body = json!({ "type": "sql", "input": "one" });

    let anonymous = http.post(&h.endpoint).json(&body).send().await.unwrap();
    assert_eq!(anonymous.status().as_u16(), 401);

    let signed = http
      .post(&h.endpoint)
      .bearer_auth("token-1")
      .json(&body)
      .send()
      .await
      .unwrap();
    assert_eq!(signed.status().as_u16(), 200);
    let result: serde_json::Value = signed.json().await.unwrap();
    assert_eq!(result, json!({ "convertedCode": "SELECT 1;" }));
}

// ===== Client retry controller =====

#[tokio::test]
async fn test_client_round_trip_text_operation()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
        .then(Scripted::text("fn main() {}\n"))
    , ScriptedProvider::new("groq", false)
    , true
    ).await;
    let client = client_for(&h.endpoint, StaticCredential::new("svc", "t0k3n"));

    let result = client
      .convert(
        OperationKind::Converter,
        "print('hi')",
        convly::client::ConvertOptions::default()
          .source("python")
          .target("rust")
      )
      .await
      .unwrap();
    assert_eq!(
      result,
      ConversionResult::Text { converted_code: "fn main() {}".into() }
    );
    assert!(h.gateway.calls()[0].system_prompt.contains("from python to rust"));
}

#[tokio::test]
async fn test_client_retries_unparseable_output()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
    , ScriptedProvider::new("groq", false)
        .then(Scripted::text("no json here"))
        .then(Scripted::text(&delimited(&regex_value())))
    , false
    ).await;
    let client = client_for(&h.endpoint, StaticCredential::new("svc", "t"));

    let result = client
      .convert(
        OperationKind::Regex,
        "lowercase words",
        convly::client::ConvertOptions::default().quality(QualityTier::Turbo)
      )
      .await
      .unwrap();
    assert_eq!(result, ConversionResult::Structured(regex_value()));
    assert_eq!(h.groq.calls().len(), 2);
}

#[tokio::test]
async fn test_client_does_not_retry_client_errors()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
    , ScriptedProvider::new("groq", false)
    , false
    ).await;
    let client = client_for(&h.endpoint, StaticCredential::new("svc", "t"));

    let err = client
      .convert(OperationKind::Json, "   ", Default::default())
      .await
      .unwrap_err();
    match err
    {   Error::Server { status, .. } => assert_eq!(status, 400)
      , other => panic!("unexpected error: {:?}", other)
    }
}

#[tokio::test]
async fn test_client_gives_up_on_html_responses()
{   use axum::{http::StatusCode, response::Html, routing::post, Router};

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route("/api/convert", post(move || {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        (StatusCode::BAD_GATEWAY, Html("<html><body>Bad Gateway</body></html>"))
      }
    }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let _ = axum::serve(listener, app).await;
    });

    let client = client_for(
      &format!("http://{}/api/convert", addr),
      StaticCredential::new("svc", "t")
    );
    let err = client
      .convert(OperationKind::Sql, "one", Default::default())
      .await
      .unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(err.class(), ErrorClass::Transport);
    match err
    {   Error::RetriesExhausted { attempts, last } => {
          assert_eq!(attempts, 3);
          assert!(matches!(*last, Error::MalformedResponse { status: 502, .. }));
          assert!(last.to_string().starts_with("Server Error (502): <html>"));
        }
      , other => panic!("unexpected error: {:?}", other)
    }
}

#[tokio::test]
async fn test_client_rejects_values_outside_the_operation_shape()
{   use axum::{routing::post, Json, Router};

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route("/api/convert", post(move || {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "unexpected": true }))
      }
    }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let _ = axum::serve(listener, app).await;
    });

    let client = client_for(
      &format!("http://{}/api/convert", addr),
      StaticCredential::new("svc", "t")
    );
    let err = client
      .convert(OperationKind::Regex, "digits", Default::default())
      .await
      .unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    match err
    {   Error::RetriesExhausted { last, .. } => {
          assert!(matches!(*last, Error::UnparseableOutput(_)));
        }
      , other => panic!("unexpected error: {:?}", other)
    }
}

/// Signs in lazily and fails the first `failures` acquisitions
struct FlakyCredentials
{   failures: AtomicUsize
  , establishes: AtomicUsize
  , identity: Mutex<Option<Arc<dyn Credential>>>
}

impl FlakyCredentials
{   fn new(failures: usize) -> Arc<Self>
    {   Arc::new(FlakyCredentials
        {   failures: AtomicUsize::new(failures)
          , establishes: AtomicUsize::new(0)
          , identity: Mutex::new(None)
        })
    }
}

#[async_trait]
impl CredentialService for FlakyCredentials
{   async fn current_identity(&self) -> Option<Arc<dyn Credential>>
    {   self.identity.lock().unwrap().clone()
    }

    async fn establish_anonymous_identity(&self)
      -> Result<Arc<dyn Credential>, Error>
    {   self.establishes.fetch_add(1, Ordering::SeqCst);
        if self.failures.load(Ordering::SeqCst) > 0
        {   self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Credential("identity service offline".into()));
        }
        let identity: Arc<dyn Credential> = StaticCredential::new("anon-1", "fresh");
        *self.identity.lock().unwrap() = Some(identity.clone());
        Ok(identity)
    }
}

#[tokio::test]
async fn test_client_acquires_identity_lazily_and_once()
{   let h = start_server(
      ScriptedProvider::new("gateway", true)
        .then(Scripted::text("SELECT 1;"))
        .then(Scripted::text("SELECT 2;"))
    , ScriptedProvider::new("groq", false)
    , true
    ).await;
    let credentials = FlakyCredentials::new(1);
    let client = client_for(&h.endpoint, credentials.clone());

    let first = client
      .convert(OperationKind::Sql, "one", Default::default())
      .await
      .unwrap();
    assert_eq!(first.to_json(), json!({ "convertedCode": "SELECT 1;" }));

    let second = client
      .convert(OperationKind::Sql, "two", Default::default())
      .await
      .unwrap();
    assert_eq!(second.to_json(), json!({ "convertedCode": "SELECT 2;" }));

    // one failed acquisition, one success, then reuse
    assert_eq!(credentials.establishes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
#[ignore]
async fn test_live_providers_round_trip()
{   let config = match AppConfig::from_env()
    {   Ok(c) => c
      , Err(e) => {
          println!("Skipping: {}", e);
          return;
        }
    };
    if config.providers.iter().any(|p| p.api_key().is_none())
    {   println!("Skipping: provider keys not set");
        return;
    }

    let dispatcher = Dispatcher::from_config(&config);
    let request = convly::ConversionRequest
    {   operation: OperationKind::Regex
      , input: "US zip codes".to_string()
      , source_lang: None
      , target_lang: None
      , mode: None
      , quality_tier: QualityTier::Fast
    };
    match dispatcher.dispatch(&request).await
    {   Ok(result) => println!("Result: {}", result.to_json())
      , Err(e) => println!("Live call failed: {}", e)
    }
}
