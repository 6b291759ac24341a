//! Operation registry: prompts and output shapes per operation

use std::collections::HashMap;
use log::debug;
use crate::schema::{Field, OutputSchema, SchemaType};

pub const JSON_START_MARKER: &str = "~~~JSON_OUTPUT_START~~~";
pub const JSON_END_MARKER: &str = "~~~JSON_OUTPUT_END~~~";

/// Request fields a system prompt may depend on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptContext
{   pub source_lang: Option<String>
  , pub target_lang: Option<String>
  , pub mode: Option<String>
}

impl From<&crate::ConversionRequest> for PromptContext
{   fn from(req: &crate::ConversionRequest) -> Self
    {   PromptContext
        {   source_lang: req.source_lang.clone()
          , target_lang: req.target_lang.clone()
          , mode: req.mode.clone()
        }
    }
}

pub type SystemPromptFn = fn(&PromptContext) -> String;
pub type UserPromptFn = fn(&str) -> String;

/// Everything needed to run one operation
#[derive(Clone)]
pub struct OperationConfig
{   pub kind: crate::OperationKind
  , pub system_prompt: SystemPromptFn
  , pub user_prompt: UserPromptFn
  , pub output_schema: Option<OutputSchema>
  , pub response_kind: crate::ResponseKind
}

impl std::fmt::Debug for OperationConfig
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>)
      -> std::fmt::Result
    {   f.debug_struct("OperationConfig")
          .field("kind", &self.kind)
          .field("output_schema", &self.output_schema.as_ref().map(|s| s.name))
          .field("response_kind", &self.response_kind)
          .finish()
    }
}

impl OperationConfig
{   pub fn build_system_prompt(&self, ctx: &PromptContext) -> String
    {   (self.system_prompt)(ctx)
    }

    pub fn build_user_prompt(&self, input: &str) -> String
    {   (self.user_prompt)(input)
    }
}

/// Read-only lookup table built once at startup
#[derive(Debug, Clone)]
pub struct Registry
{   operations: HashMap<crate::OperationKind, OperationConfig>
}

impl Registry
{   /// Registry holding every built-in operation
    pub fn builtin() -> Self
    {   let mut operations = HashMap::new();
        for config in builtin_operations()
        {   operations.insert(config.kind, config);
        }
        debug!("Registry built with {} operations", operations.len());
        Registry { operations }
    }

    /// Empty registry, filled with `insert`
    pub fn empty() -> Self
    {   Registry
        {   operations: HashMap::new()
        }
    }

    pub fn insert(&mut self, config: OperationConfig)
    {   self.operations.insert(config.kind, config);
    }

    /// Pure lookup; an unregistered kind is a client error
    pub fn resolve(&self, kind: crate::OperationKind)
      -> Result<&OperationConfig, crate::error::Error>
    {   self.operations
          .get(&kind)
          .ok_or_else(|| {
            crate::error::Error::UnknownOperation(kind.to_string())
          })
    }

    pub fn len(&self) -> usize
    {   self.operations.len()
    }

    pub fn is_empty(&self) -> bool
    {   self.operations.is_empty()
    }
}

impl Default for Registry
{   fn default() -> Self
    {   Registry::builtin()
    }
}

/// Wrap a base prompt with the output rules every structured op shares
pub fn with_output_rules(base: &str, shape: &str) -> String
{   format!(
      "{base}\n\n\
       CRITICAL OUTPUT RULES:\n\
       1. You MUST return a valid JSON object.\n\
       2. Use this EXACT structure:\n\
       {shape}\n\
       3. WRAP your entire JSON output in these tags:\n\
       {start}\n\
       (your json here)\n\
       {end}\n\
       4. Do NOT use markdown code blocks (```json).\n\
       5. Escape all double quotes inside string values.",
      base = base,
      shape = shape,
      start = JSON_START_MARKER,
      end = JSON_END_MARKER
    )
}

// ===== Schemas =====

fn string() -> SchemaType
{   SchemaType::String
}

fn strings() -> SchemaType
{   SchemaType::array_of(SchemaType::String)
}

pub fn json_schema() -> OutputSchema
{   OutputSchema::object("json", vec![
      Field::required("formattedJson", string())
        .describe("The fixed and valid JSON string")
    , Field::required("explanation", string())
        .describe("Bulleted list of specific syntax errors fixed")
    ])
}

pub fn refactor_schema() -> OutputSchema
{   OutputSchema::object("refactor", vec![
      Field::required("files", SchemaType::array_of(
        SchemaType::Object(vec![
          Field::required("sourceId", SchemaType::OneOf(vec![
            SchemaType::String
          , SchemaType::Number { min: None, max: None }
          ])).describe("The original unique ID provided in the input")
        , Field::required("fileName", string())
        , Field::required("content", string())
            .describe("The full refactored code")
        ])
      ))
    ])
}

pub fn generator_schema() -> OutputSchema
{   OutputSchema::object("generator", vec![
      Field::required("files", SchemaType::array_of(
        SchemaType::Object(vec![
          Field::required("fileName", string())
        , Field::required("content", string())
        ])
      ))
    ])
}

pub fn analysis_schema() -> OutputSchema
{   OutputSchema::object("analysis", vec![
      Field::required("summary", string())
    , Field::required("score", SchemaType::number_between(0.0, 100.0))
    , Field::required("complexity", string())
    , Field::required("security", strings())
    , Field::required("improvements", strings())
    , Field::required("bugs", strings())
    ])
}

pub fn regex_schema() -> OutputSchema
{   OutputSchema::object("regex", vec![
      Field::required("pattern", string())
        .describe("The raw regex string without delimiting slashes")
    , Field::required("summary", string())
        .describe("A one sentence summary of what this does")
    , Field::required("breakdown", SchemaType::array_of(
        SchemaType::Object(vec![
          Field::required("token", string())
        , Field::required("description", string())
        ])
      ))
    ])
}

pub fn css_framework_schema() -> OutputSchema
{   OutputSchema::object("css-framework", vec![
      Field::optional("conversions", SchemaType::array_of(
        SchemaType::Object(vec![
          Field::required("selector", string())
        , Field::required("tailwindClasses", string())
        ])
      ))
    , Field::optional("convertedHtml", string())
        .describe("The full HTML string with framework classes applied")
    , Field::optional("convertedCode", string())
        .describe("The refactored stylesheet code")
    , Field::optional("explanation", string())
    ])
}

// ===== Prompts =====

fn json_system(_: &PromptContext) -> String
{   with_output_rules(
      "You are a Senior Data Engineer specializing in JSON data recovery.\n\
       Your Task: Rescue broken JSON structures.\n\n\
       Guidelines:\n\
       1. Fix trailing commas, missing quotes, mismatched brackets, and data type errors.\n\
       2. If the input is 'loose' JS objects (keys without quotes), standardise them to strict JSON.\n\
       3. In the 'explanation', be specific (e.g., \"Fixed missing comma on line 5\").",
      r#"{ "formattedJson": "string (the strictly valid JSON)", "explanation": "string" }"#
    )
}

fn json_user(input: &str) -> String
{   format!("Repair and prettify this JSON data:\n\n{}", input)
}

fn refactor_goal(mode: Option<&str>) -> &'static str
{   match mode.unwrap_or("clean")
    {   "perf" => "Algorithmic efficiency (reduce Big O), memory management, and loop optimization."
      , "modern" => "Modern syntax features (ES2024+, async/await) and removing deprecated patterns."
      , "comments" => "Comprehensive documentation explaining the 'Why' and 'How'."
      , _ => "Maximum readability, standard naming conventions, and DRY principles."
    }
}

fn refactor_system(ctx: &PromptContext) -> String
{   let base = format!(
      "You are a Principal Software Architect.\n\
       Your Task: Refactor the provided project source code.\n\
       Focus Mode: {}\n\n\
       Guidelines:\n\
       - Input format: An array of objects containing {{ \"sourceId\": ID, \"name\": string, \"content\": string }}.\n\
       - CRITICAL: Every file in the output MUST include the exact \"sourceId\" provided in the input.\n\
       - Dependency Awareness: If you rename a file or an exported member in one file, you MUST update the corresponding imports in all other files in the set.\n\
       - Preserve logic parity unless specifically optimizing for Performance mode.",
      refactor_goal(ctx.mode.as_deref())
    );
    with_output_rules(
      &base,
      r#"{ "files": [ { "sourceId": "string/number", "fileName": "string", "content": "string" } ] }"#
    )
}

fn refactor_user(input: &str) -> String
{   format!("Refactor this project source code:\n{}", input)
}

fn converter_system(ctx: &PromptContext) -> String
{   let source = ctx.source_lang.as_deref().unwrap_or("auto-detect");
    let target = ctx.target_lang.as_deref().unwrap_or("the requested language");
    format!(
      "You are a Polyglot Expert in coding languages.\n\
       Your Task: Translate code from {source} to {target}.\n\n\
       Guidelines:\n\
       - Use idiomatic patterns and best practices for {target}.\n\
       - Convert libraries to their nearest equivalents (e.g., React -> Vue, Pandas -> Dplyr).\n\
       - Output ONLY the raw code. No markdown formatting. No comments about the translation.",
      source = source,
      target = target
    )
}

fn converter_user(input: &str) -> String
{   format!("Code to translate:\n{}", input)
}

fn generator_system(_: &PromptContext) -> String
{   with_output_rules(
      "You are a Lead Developer.\n\
       Your Task: Scaffold a complete, production-ready solution based on requirements.\n\n\
       Guidelines:\n\
       - Architecture: Use industry standards (MVC, MVVM, or Component-based) appropriate for the request.\n\
       - Separation of Concerns: Split code into logical files (e.g., styles.css, App.js, utils.js).\n\
       - Robustness: Include error handling and basic comments.",
      r#"{ "files": [ { "fileName": "string (e.g., main.py)", "content": "string (complete source code)" } ] }"#
    )
}

fn generator_user(input: &str) -> String
{   format!("Generate a project for these requirements: {}", input)
}

fn analysis_system(_: &PromptContext) -> String
{   with_output_rules(
      "You are a Senior Security & Performance Auditor.\n\
       Your Task: Conduct a deep-dive static analysis of the code.\n\n\
       Guidelines:\n\
       - Score: 0 (Critical Failure) to 100 (Flawless).\n\
       - Complexity: Calculate Time and Space complexity (Big O).\n\
       - Security: Look for XSS, SQLi, RCE, insecure deps, and hardcoded secrets, mention them ONLY if they exist. Do not report a vulnerability unless you can trace the exact path from input to sink.\n\
       - Bugs: Find logic errors, race conditions, or unhandled null states.",
      r#"{ "summary": "string (executive summary)", "score": number, "complexity": "string", "security": ["string (specific vulnerability)"], "improvements": ["string (actionable advice)"], "bugs": ["string (potential error)"] }"#
    )
}

fn analysis_user(input: &str) -> String
{   format!("Analyze this code:\n{}", input)
}

const CSS_CONTEXT_RULE: &str =
  "If the user provided 'EXTRA CONTEXT' or a config snippet, prioritize using those specific tokens, colors, or spacing scales.";

fn css_framework_system(ctx: &PromptContext) -> String
{   let target = ctx.target_lang.as_deref().unwrap_or("");
    let mode = ctx.mode.as_deref().unwrap_or("");

    match (target, mode)
    {   ("tailwind", "html") => with_output_rules(
          &format!(
            "You are a Tailwind CSS Expert.\n\
             Task: Rewrite the provided HTML by applying Tailwind utility classes directly to elements.\n\
             - {}\n\
             - Use arbitrary values (e.g., w-[13.5px]) only when standard classes don't fit.\n\
             - Remove original <style> tags and class names that are now redundant.",
            CSS_CONTEXT_RULE
          ),
          r#"{ "convertedHtml": "string", "explanation": "string" }"#
        )
      , ("tailwind", _) => with_output_rules(
          &format!(
            "You are a Tailwind CSS Expert. Convert CSS selectors into utility class strings.\n\
             - {}\n\
             - Handle hover:, focus:, and media queries as Tailwind prefixes.",
            CSS_CONTEXT_RULE
          ),
          r#"{ "conversions": [{ "selector": "string", "tailwindClasses": "string" }], "explanation": "string" }"#
        )
      , ("bootstrap", _) => with_output_rules(
          "You are a Bootstrap 5 Expert.\n\
           - Convert the input to use standard Bootstrap 5 utility classes and components.\n\
           - If mode is 'html', return the full HTML string in 'convertedHtml'.\n\
           - If mode is 'css', provide the mapping in 'conversions'.",
          r#"{ "convertedHtml": "string", "conversions": "array", "explanation": "string" }"#
        )
      , (other, _) => {
          let target = if other.is_empty() { "SASS" } else { other };
          with_output_rules(
            &format!(
              "You are a CSS Architecture Expert. Convert the input to valid {}.\n\
               - Use modern syntax (nesting, variables, mixins).\n\
               - Extract repeated values into a variable block at the top.",
              target
            ),
            r#"{ "convertedCode": "string", "explanation": "string" }"#
          )
        }
    }
}

fn css_framework_user(input: &str) -> String
{   format!("INPUT TO CONVERT:\n{}", input)
}

fn regex_system(ctx: &PromptContext) -> String
{   let base = format!(
      "You are a Regex Architect.\n\
       Your Task: Generate a strictly valid Regular Expression.\n\n\
       Target Flavor: {}\n\n\
       Guidelines:\n\
       1. Return ONLY the pattern string (no bounding slashes).\n\
       2. If \"Refining\", use the previous pattern as context to improve the new one.\n\
       3. Create a granular breakdown of the logic for the 'breakdown' array.",
      ctx.target_lang.as_deref().unwrap_or("JavaScript")
    );
    with_output_rules(
      &base,
      r#"{ "pattern": "string (raw pattern)", "summary": "string (explanation)", "breakdown": [{ "token": "string", "description": "string" }] }"#
    )
}

fn regex_user(input: &str) -> String
{   input.to_string()
}

fn sql_system(_: &PromptContext) -> String
{   "You are a Database Administrator specializing in Query Optimization.\n\
     Your Task: Generate or Optimize SQL queries.\n\n\
     Guidelines:\n\
     - Use standard ANSI SQL unless a specific dialect is requested.\n\
     - Focus on Index usage and avoiding full table scans.\n\
     - Output ONLY the raw SQL code.\n\
     - Add brief \"-- comments\" explaining complex logic."
      .to_string()
}

fn sql_user(input: &str) -> String
{   format!("SQL Requirement:\n{}", input)
}

fn structured(
  kind: crate::OperationKind
, system_prompt: SystemPromptFn
, user_prompt: UserPromptFn
, schema: OutputSchema
) -> OperationConfig
{   OperationConfig
    {   kind
      , system_prompt
      , user_prompt
      , output_schema: Some(schema)
      , response_kind: crate::ResponseKind::Structured
    }
}

fn text(
  kind: crate::OperationKind
, system_prompt: SystemPromptFn
, user_prompt: UserPromptFn
) -> OperationConfig
{   OperationConfig
    {   kind
      , system_prompt
      , user_prompt
      , output_schema: None
      , response_kind: crate::ResponseKind::Text
    }
}

fn builtin_operations() -> Vec<OperationConfig>
{   use crate::OperationKind as K;
    vec![
      structured(K::Json, json_system, json_user, json_schema())
    , structured(K::Refactor, refactor_system, refactor_user, refactor_schema())
    , text(K::Converter, converter_system, converter_user)
    , structured(K::Generator, generator_system, generator_user, generator_schema())
    , structured(K::Analysis, analysis_system, analysis_user, analysis_schema())
    , structured(
        K::CssFramework,
        css_framework_system,
        css_framework_user,
        css_framework_schema()
      )
    , structured(K::Regex, regex_system, regex_user, regex_schema())
    , text(K::Sql, sql_system, sql_user)
    ]
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::OperationKind;

    #[test]
    fn builtin_registry_covers_every_kind()
    {   let registry = Registry::builtin();
        assert_eq!(registry.len(), OperationKind::ALL.len());
        for kind in OperationKind::ALL
        {   let config = registry.resolve(kind).unwrap();
            assert_eq!(config.kind, kind);
            assert_eq!(
              config.output_schema.is_some(),
              config.response_kind == crate::ResponseKind::Structured
            );
        }
    }

    #[test]
    fn missing_kind_is_unknown_operation()
    {   let registry = Registry::empty();
        assert_eq!(
          registry.resolve(OperationKind::Sql).unwrap_err(),
          crate::error::Error::UnknownOperation("sql".to_string())
        );
    }

    #[test]
    fn structured_prompts_carry_both_markers()
    {   let registry = Registry::builtin();
        let ctx = PromptContext::default();
        for kind in OperationKind::ALL
        {   let config = registry.resolve(kind).unwrap();
            let prompt = config.build_system_prompt(&ctx);
            let has_markers = prompt.contains(JSON_START_MARKER)
              && prompt.contains(JSON_END_MARKER);
            assert_eq!(has_markers, config.output_schema.is_some(), "{}", kind);
        }
    }

    #[test]
    fn refactor_mode_selects_goal()
    {   let ctx = PromptContext
        {   mode: Some("perf".into())
          , ..Default::default()
        };
        assert!(refactor_system(&ctx).contains("Algorithmic efficiency"));
        assert!(refactor_system(&PromptContext::default())
          .contains("Maximum readability"));
    }

    #[test]
    fn css_prompt_follows_target_and_mode()
    {   let html = PromptContext
        {   target_lang: Some("tailwind".into())
          , mode: Some("html".into())
          , ..Default::default()
        };
        assert!(css_framework_system(&html).contains("Rewrite the provided HTML"));

        let less = PromptContext
        {   target_lang: Some("less".into())
          , ..Default::default()
        };
        assert!(css_framework_system(&less).contains("valid less"));
        assert!(css_framework_system(&PromptContext::default())
          .contains("valid SASS"));
    }

    #[test]
    fn converter_defaults_source_to_auto_detect()
    {   let ctx = PromptContext
        {   target_lang: Some("Rust".into())
          , ..Default::default()
        };
        let prompt = converter_system(&ctx);
        assert!(prompt.contains("from auto-detect to Rust"));
    }
}
