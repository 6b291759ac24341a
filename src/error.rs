use std::fmt;

/// Where an error sits in the failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass
{   /// Malformed or empty request; never retried
    Client
  , /// Network, timeout or provider-side failure
    ProviderTransient
  , /// The model answered but nothing usable could be extracted
    Recovery
  , /// Client side: the server could not be reached or understood
    Transport
  , /// Misconfiguration or a bug
    Internal
}

/// Custom error type for convly operations
/// Implements Clone so one failure can be logged and returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error
{   /// Request failed validation (empty input, bad body)
    InvalidRequest(String)
  , /// Operation name not in the registry
    UnknownOperation(String)
  , /// API key is missing for a provider
    MissingApiKey(String)
  , /// HTTP request error
    HttpError(String)
  , /// Provider answered with a non-success status
    ApiError
    {   status: u16
      , message: String
    }
  , /// Provider response could not be decoded
    ParseError(String)
  , /// No choices in provider response
    NoChoicesInResponse
  , /// Provider call exceeded its time budget
    Timeout
  , /// Structured output did not match the operation schema
    SchemaViolation(String)
  , /// Model output could not be turned into a valid result
    UnparseableOutput(String)
  , /// No bearer credential could be obtained
    Credential(String)
  , /// Server answered with a body that is not JSON
    MalformedResponse
    {   status: u16
      , snippet: String
    }
  , /// Server answered with a JSON error body
    Server
    {   status: u16
      , message: String
      , code: Option<String>
    }
  , /// Client gave up after its retry budget
    RetriesExhausted
    {   attempts: usize
      , last: Box<Error>
    }
  , /// Invalid configuration
    InvalidConfiguration(String)
  , /// Generic error
    Other(String)
}

impl Error
{   /// Map a variant onto the failure taxonomy
    pub fn class(&self) -> ErrorClass
    {   match self
        {   Error::InvalidRequest(_)
          | Error::UnknownOperation(_) => ErrorClass::Client
          , Error::HttpError(_)
          | Error::ApiError { .. }
          | Error::ParseError(_)
          | Error::NoChoicesInResponse
          | Error::Timeout
          | Error::SchemaViolation(_) => ErrorClass::ProviderTransient
          , Error::UnparseableOutput(_) => ErrorClass::Recovery
          , Error::MalformedResponse { status, .. }
              if *status >= 400 && *status < 500 => ErrorClass::Client
          , Error::Credential(_)
          | Error::MalformedResponse { .. }
          | Error::RetriesExhausted { .. } => ErrorClass::Transport
          , Error::Server { status, code, .. } => {
              if *status >= 400 && *status < 500
              {   ErrorClass::Client
              } else if code.as_deref() == Some(CODE_UNPARSEABLE)
              {   ErrorClass::Recovery
              } else
              {   ErrorClass::Transport
              }
            }
          , Error::MissingApiKey(_)
          | Error::InvalidConfiguration(_)
          | Error::Other(_) => ErrorClass::Internal
        }
    }

    /// HTTP status this error is reported with at the server boundary
    pub fn http_status(&self) -> u16
    {   match self.class()
        {   ErrorClass::Client => 400
          , _ => 500
        }
    }

    /// Machine-readable code carried in server error bodies
    pub fn code(&self) -> &'static str
    {   match self.class()
        {   ErrorClass::Client => CODE_INVALID_REQUEST
          , ErrorClass::ProviderTransient => CODE_PROVIDER_UNAVAILABLE
          , ErrorClass::Recovery => CODE_UNPARSEABLE
          , ErrorClass::Transport
          | ErrorClass::Internal => CODE_INTERNAL
        }
    }

    /// Whether the client retry loop should try again after this error
    pub fn is_retryable(&self, retry_content_errors: bool) -> bool
    {   match self.class()
        {   ErrorClass::Client => false
          , ErrorClass::Recovery => retry_content_errors
          , _ => true
        }
    }
}

pub const CODE_INVALID_REQUEST: &str = "invalid_request";
pub const CODE_PROVIDER_UNAVAILABLE: &str = "provider_unavailable";
pub const CODE_UNPARSEABLE: &str = "unparseable_output";
pub const CODE_INTERNAL: &str = "internal";

impl fmt::Display for Error
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Error::InvalidRequest(msg) => {
              write!(f, "Invalid request: {}", msg)
            }
          , Error::UnknownOperation(name) => {
              write!(f, "Unknown operation type: {}", name)
            }
          , Error::MissingApiKey(provider) => {
              write!(f, "Missing API key for: {}", provider)
            }
          , Error::HttpError(msg) => {
              write!(f, "HTTP error: {}", msg)
            }
          , Error::ApiError { status, message } => {
              write!(f, "API error ({}): {}", status, message)
            }
          , Error::ParseError(msg) => {
              write!(f, "Parse error: {}", msg)
            }
          , Error::NoChoicesInResponse => {
              write!(f, "API response contained no choices")
            }
          , Error::Timeout => {
              write!(f, "Request timed out")
            }
          , Error::SchemaViolation(msg) => {
              write!(f, "Output does not match schema: {}", msg)
            }
          , Error::UnparseableOutput(msg) => {
              write!(f,
                "The AI model returned output that could not be parsed: {}",
                msg
              )
            }
          , Error::Credential(msg) => {
              write!(f, "Credential error: {}", msg)
            }
          , Error::MalformedResponse { status, snippet } => {
              write!(f, "Server Error ({}): {}...", status, snippet)
            }
          , Error::Server { message, .. } => {
              write!(f, "{}", message)
            }
          , Error::RetriesExhausted { attempts, last } => {
              write!(f,
                "Request failed after {} attempts: {}",
                attempts, last
              )
            }
          , Error::InvalidConfiguration(msg) => {
              write!(f, "Invalid configuration: {}", msg)
            }
          , Error::Other(msg) => {
              write!(f, "Error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<String> for Error
{   fn from(s: String) -> Self
    {   Error::Other(s)
    }
}

impl From<&str> for Error
{   fn from(s: &str) -> Self
    {   Error::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests
{   use super::*;

    #[test]
    fn client_errors_map_to_400_and_are_terminal()
    {   let err = Error::InvalidRequest("empty input".into());
        assert_eq!(err.class(), ErrorClass::Client);
        assert_eq!(err.http_status(), 400);
        assert!(!err.is_retryable(true));
    }

    #[test]
    fn unparseable_output_is_distinct_from_provider_failure()
    {   let recovery = Error::UnparseableOutput("no json".into());
        let provider = Error::Timeout;
        assert_eq!(recovery.http_status(), 500);
        assert_eq!(provider.http_status(), 500);
        assert_ne!(recovery.code(), provider.code());
        assert_eq!(recovery.code(), CODE_UNPARSEABLE);
        assert_eq!(provider.code(), CODE_PROVIDER_UNAVAILABLE);
    }

    #[test]
    fn server_error_class_follows_status_and_code()
    {   let bad = Error::Server
        {   status: 400
          , message: "Invalid input or type".into()
          , code: None
        };
        assert!(!bad.is_retryable(true));

        let content = Error::Server
        {   status: 500
          , message: "unparseable".into()
          , code: Some(CODE_UNPARSEABLE.into())
        };
        assert!(content.is_retryable(true));
        assert!(!content.is_retryable(false));

        let crash = Error::Server
        {   status: 502
          , message: "bad gateway".into()
          , code: None
        };
        assert!(crash.is_retryable(false));
    }

    #[test]
    fn non_json_client_error_reply_is_not_retried()
    {   let too_large = Error::MalformedResponse
        {   status: 413
          , snippet: "length limit exceeded".into()
        };
        assert_eq!(too_large.class(), ErrorClass::Client);
        assert!(!too_large.is_retryable(true));

        let proxy = Error::MalformedResponse
        {   status: 502
          , snippet: "<html>".into()
        };
        assert_eq!(proxy.class(), ErrorClass::Transport);
        assert!(proxy.is_retryable(false));
    }
}
