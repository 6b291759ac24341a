//! Structural validation of model output
//!
//! An `OutputSchema` is checked against a `serde_json::Value` and can be
//! rendered as JSON Schema for providers that constrain generation.

use serde_json::{json, Map, Value};

/// Shape of one JSON value
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaType
{   String
  , Number
    {   min: Option<f64>
      , max: Option<f64>
    }
  , Array(Box<SchemaType>)
  , Object(Vec<Field>)
  , /// Value must match at least one alternative
    OneOf(Vec<SchemaType>)
}

/// One property of an object shape
#[derive(Debug, Clone, PartialEq)]
pub struct Field
{   pub name: &'static str
  , pub ty: SchemaType
  , pub required: bool
  , pub description: Option<&'static str>
}

impl Field
{   pub fn required(name: &'static str, ty: SchemaType) -> Self
    {   Field
        {   name
          , ty
          , required: true
          , description: None
        }
    }

    pub fn optional(name: &'static str, ty: SchemaType) -> Self
    {   Field
        {   name
          , ty
          , required: false
          , description: None
        }
    }

    pub fn describe(mut self, description: &'static str) -> Self
    {   self.description = Some(description);
        self
    }
}

impl SchemaType
{   pub fn number_between(min: f64, max: f64) -> Self
    {   SchemaType::Number
        {   min: Some(min)
          , max: Some(max)
        }
    }

    pub fn array_of(item: SchemaType) -> Self
    {   SchemaType::Array(Box::new(item))
    }

    fn check(&self, value: &Value, path: &str)
      -> Result<(), String>
    {   match (self, value)
        {   (SchemaType::String, Value::String(_)) => Ok(())
          , (SchemaType::Number { min, max }, Value::Number(n)) => {
              let n = n.as_f64().unwrap_or(f64::NAN);
              if let Some(min) = min
              {   if !(n >= *min)
                  {   return Err(format!("{}: {} is below {}", path, n, min));
                  }
              }
              if let Some(max) = max
              {   if !(n <= *max)
                  {   return Err(format!("{}: {} is above {}", path, n, max));
                  }
              }
              Ok(())
            }
          , (SchemaType::Array(item), Value::Array(items)) => {
              for (i, v) in items.iter().enumerate()
              {   item.check(v, &format!("{}[{}]", path, i))?;
              }
              Ok(())
            }
          , (SchemaType::Object(fields), Value::Object(map)) => {
              for field in fields
              {   let field_path = format!("{}.{}", path, field.name);
                  match map.get(field.name)
                  {   Some(v) => field.ty.check(v, &field_path)?
                    , None if field.required => {
                        return Err(format!("{}: missing", field_path));
                      }
                    , None => {}
                  }
              }
              Ok(())
            }
          , (SchemaType::OneOf(alternatives), v) => {
              if alternatives.iter().any(|a| a.check(v, path).is_ok())
              {   Ok(())
              } else
              {   Err(format!("{}: matches no allowed type", path))
              }
            }
          , (expected, v) => Err(format!(
              "{}: expected {}, found {}",
              path, expected.type_name(), json_type_name(v)
            ))
        }
    }

    fn type_name(&self) -> &'static str
    {   match self
        {   SchemaType::String => "string"
          , SchemaType::Number { .. } => "number"
          , SchemaType::Array(_) => "array"
          , SchemaType::Object(_) => "object"
          , SchemaType::OneOf(_) => "one of several types"
        }
    }

    fn to_json_schema(&self) -> Value
    {   match self
        {   SchemaType::String => json!({ "type": "string" })
          , SchemaType::Number { min, max } => {
              let mut out = Map::new();
              out.insert("type".into(), json!("number"));
              if let Some(min) = min
              {   out.insert("minimum".into(), json!(min));
              }
              if let Some(max) = max
              {   out.insert("maximum".into(), json!(max));
              }
              Value::Object(out)
            }
          , SchemaType::Array(item) => json!({
              "type": "array",
              "items": item.to_json_schema()
            })
          , SchemaType::Object(fields) => {
              let mut properties = Map::new();
              let mut required = vec![];
              for field in fields
              {   let mut prop = field.ty.to_json_schema();
                  if let (Some(desc), Value::Object(map))
                    = (field.description, &mut prop)
                  {   map.insert("description".into(), json!(desc));
                  }
                  properties.insert(field.name.to_string(), prop);
                  if field.required
                  {   required.push(json!(field.name));
                  }
              }
              json!({
                "type": "object",
                "properties": properties,
                "required": required
              })
            }
          , SchemaType::OneOf(alternatives) => json!({
              "anyOf": alternatives
                .iter()
                .map(|a| a.to_json_schema())
                .collect::<Vec<_>>()
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str
{   match value
    {   Value::Null => "null"
      , Value::Bool(_) => "boolean"
      , Value::Number(_) => "number"
      , Value::String(_) => "string"
      , Value::Array(_) => "array"
      , Value::Object(_) => "object"
    }
}

/// Named root shape for one operation's output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema
{   pub name: &'static str
  , pub root: SchemaType
}

impl OutputSchema
{   pub fn object(name: &'static str, fields: Vec<Field>) -> Self
    {   OutputSchema
        {   name
          , root: SchemaType::Object(fields)
        }
    }

    /// Check a value, reporting the first mismatch with its path
    pub fn validate(&self, value: &Value)
      -> Result<(), crate::error::Error>
    {   self.root
          .check(value, "$")
          .map_err(crate::error::Error::SchemaViolation)
    }

    /// JSON Schema document for structured generation
    pub fn to_json_schema(&self) -> Value
    {   self.root.to_json_schema()
    }
}
