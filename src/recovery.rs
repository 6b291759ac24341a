//! Recover a JSON value from unconstrained model text
//!
//! Strategies run in falling order of confidence, each on the original
//! text, and the first one that parses wins:
//!
//! 1. the span between the output markers (last end marker)
//! 2. the whole text as-is
//! 3. the text with markdown fences removed
//! 4. first `{` to last `}`, with trailing commas and control
//!    characters stripped

use std::sync::OnceLock;
use regex::Regex;
use serde_json::Value;
use log::{debug, trace};
use crate::registry::{JSON_END_MARKER, JSON_START_MARKER};

/// Which strategy produced a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy
{   Delimiters
  , Direct
  , FenceStripped
  , Brackets
}

impl Strategy
{   pub const ORDER: [Strategy; 4] = [
      Strategy::Delimiters
    , Strategy::Direct
    , Strategy::FenceStripped
    , Strategy::Brackets
    ];

    /// Run this strategy alone against the raw text
    pub fn attempt(&self, raw: &str) -> RecoveryAttempt
    {   let parsed = match self
        {   Strategy::Delimiters => from_delimiters(raw)
          , Strategy::Direct => parse_strict(raw)
          , Strategy::FenceStripped => from_fence_stripped(raw)
          , Strategy::Brackets => from_brackets(raw)
        };
        match parsed
        {   Some(value) => RecoveryAttempt::Success(value)
          , None => RecoveryAttempt::Failure
        }
    }
}

/// Outcome of one strategy
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAttempt
{   Success(Value)
  , Failure
}

/// Extract a JSON value, or `None` when every strategy fails
pub fn recover(raw: &str) -> Option<Value>
{   recover_with_strategy(raw).map(|(_, value)| value)
}

/// Like `recover`, also reporting the strategy that succeeded
pub fn recover_with_strategy(raw: &str) -> Option<(Strategy, Value)>
{   if raw.is_empty()
    {   return None;
    }
    for strategy in Strategy::ORDER
    {   match strategy.attempt(raw)
        {   RecoveryAttempt::Success(value) => {
              debug!("Recovered JSON with {:?} strategy", strategy);
              return Some((strategy, value));
            }
          , RecoveryAttempt::Failure => {
              trace!("{:?} strategy did not match", strategy);
            }
        }
    }
    debug!("No recovery strategy matched {} bytes of output", raw.len());
    None
}

fn parse_strict(text: &str) -> Option<Value>
{   serde_json::from_str(text).ok()
}

fn from_delimiters(raw: &str) -> Option<Value>
{   let start = raw.find(JSON_START_MARKER)? + JSON_START_MARKER.len();
    let end = raw.rfind(JSON_END_MARKER)?;
    if end < start
    {   return None;
    }
    let parsed = parse_strict(raw[start..end].trim());
    if parsed.is_none()
    {   debug!("Output markers found but enclosed JSON did not parse");
    }
    parsed
}

fn fence_regex() -> &'static Regex
{   static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
      Regex::new(r"```(?:json)?").expect("fence pattern is valid")
    })
}

fn trailing_comma_regex() -> &'static Regex
{   static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();
    TRAILING_COMMA.get_or_init(|| {
      Regex::new(r",\s*\}").expect("trailing comma pattern is valid")
    })
}

fn from_fence_stripped(raw: &str) -> Option<Value>
{   let cleaned = fence_regex().replace_all(raw, "");
    parse_strict(cleaned.trim())
}

fn from_brackets(raw: &str) -> Option<Value>
{   let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start
    {   return None;
    }
    let candidate = &raw[start..=end];
    let repaired = trailing_comma_regex().replace_all(candidate, "}");
    let repaired: String = repaired
      .chars()
      .filter(|c| !is_stripped_control(*c))
      .collect();
    parse_strict(&repaired)
}

/// C0 controls, DEL and C1 controls
fn is_stripped_control(c: char) -> bool
{   matches!(c, '\u{00}'..='\u{1F}' | '\u{7F}'..='\u{9F}')
}
