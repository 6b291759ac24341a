//! HTTP boundary: `POST /api/convert`

use std::sync::Arc;
use axum::{
  body::Bytes,
  extract::{rejection::BytesRejection, DefaultBodyLimit, Request, State},
  http::{header, StatusCode},
  middleware::{self, Next},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use log::{debug, error, info, warn};

/// State shared by every handler
pub struct AppState
{   pub dispatcher: crate::Dispatcher
  , pub require_bearer: bool
}

type AppStateArc = Arc<AppState>;

/// Build the router with body limit and optional bearer check
pub fn router(
  state: AppState
, max_body_bytes: usize
) -> Router
{   let state = Arc::new(state);
    Router::new()
      .route("/api/convert", post(convert))
      .route_layer(middleware::from_fn_with_state(
        state.clone()
      , require_bearer
      ))
      .route("/health", get(health))
      .layer(DefaultBodyLimit::max(max_body_bytes))
      .with_state(state)
}

/// Bind and serve until the listener fails
pub async fn run(
  config: &crate::config::AppConfig
, dispatcher: crate::Dispatcher
) -> Result<(), crate::error::Error>
{   let listener = tokio::net::TcpListener::bind(&config.server.bind)
      .await
      .map_err(|e| {
        error!("Cannot bind {}: {}", config.server.bind, e);
        crate::error::Error::InvalidConfiguration(
          format!("bind {}: {}", config.server.bind, e)
        )
      })?;
    serve(listener, config, dispatcher).await
}

/// Serve on an already bound listener
pub async fn serve(
  listener: tokio::net::TcpListener
, config: &crate::config::AppConfig
, dispatcher: crate::Dispatcher
) -> Result<(), crate::error::Error>
{   if let Ok(addr) = listener.local_addr()
    {   info!("Listening on http://{}", addr);
    }
    let app = router(
      AppState
      {   dispatcher
        , require_bearer: config.server.require_bearer
      }
    , config.server.max_body_bytes
    );
    axum::serve(listener, app)
      .await
      .map_err(|e| crate::error::Error::Other(e.to_string()))
}

async fn health() -> Json<serde_json::Value>
{   Json(serde_json::json!({ "status": "ok" }))
}

async fn convert(
  State(state): State<AppStateArc>
, body: Result<Bytes, BytesRejection>
) -> Response
{   let body = match body
    {   Ok(body) => body
      , Err(rejection) => return rejection_response(rejection)
    };
    let body: crate::request::ConvertRequestBody
      = match serde_json::from_slice(&body)
    {   Ok(body) => body
      , Err(e) => {
          debug!("Rejecting undecodable body: {}", e);
          return error_response(&crate::error::Error::InvalidRequest(
            format!("body is not valid JSON: {}", e)
          ));
        }
    };

    match state.dispatcher.dispatch_body(body).await
    {   Ok(result) => (StatusCode::OK, Json(result)).into_response()
      , Err(err) => {
          if err.http_status() >= 500
          {   error!("Convert failed: {}", err);
          } else
          {   debug!("Convert rejected: {}", err);
          }
          error_response(&err)
        }
    }
}

/// Map an error onto its status and JSON error body
pub fn error_response(err: &crate::error::Error) -> Response
{   let status = StatusCode::from_u16(err.http_status())
      .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(crate::request::ErrorBody::from_error(err))).into_response()
}

/// Body that could not be read (too large, aborted) as a JSON client error
fn rejection_response(rejection: BytesRejection) -> Response
{   let status = rejection.status();
    warn!("Rejecting request body ({}): {}", status, rejection.body_text());
    let body = crate::request::ErrorBody
    {   error: "Request body could not be read".to_string()
      , details: Some(rejection.body_text())
      , code: Some(crate::error::CODE_INVALID_REQUEST.to_string())
    };
    (status, Json(body)).into_response()
}

async fn require_bearer(
  State(state): State<AppStateArc>
, request: Request
, next: Next
) -> Response
{   if state.require_bearer && bearer_token(&request).is_none()
    {   warn!("Rejecting request without bearer token");
        let body = crate::request::ErrorBody
        {   error: "Missing bearer token".to_string()
          , details: None
          , code: Some("unauthorized".to_string())
        };
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }
    next.run(request).await
}

fn bearer_token(request: &Request) -> Option<&str>
{   request.headers()
      .get(header::AUTHORIZATION)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.strip_prefix("Bearer "))
      .map(str::trim)
      .filter(|t| !t.is_empty())
}
