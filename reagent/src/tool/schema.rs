//! Tool input schemas, argument validation, and schema projections.
//!
//! Schemas are data, not types: a tool declares an ordered map of parameter
//! name to [`ToolParam`], and the validation pass walks it before `forward`
//! ever runs. The same declaration projects into an OpenAI-style function
//! descriptor for the structured tool-call channel and into a call signature
//! for the code agent's prompt.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::ToolError;

/// The authorized type vocabulary for tool parameters and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// A UTF-8 string.
    String,
    /// An integral number.
    Integer,
    /// Any number.
    Number,
    /// A boolean.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
    /// An image payload (base64 at the JSON boundary).
    Image,
    /// An audio payload (base64 at the JSON boundary).
    Audio,
    /// Matches anything.
    Any,
    /// The null type.
    Null,
}

impl ParamType {
    /// Wire-format name of this type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Any => "any",
            Self::Null => "null",
        }
    }

    /// JSON-schema type name; `any`, `image`, and `audio` degrade to
    /// `string` since the structured channel has no richer encoding.
    #[must_use]
    pub const fn json_schema_str(&self) -> &'static str {
        match self {
            Self::Any | Self::Image | Self::Audio => "string",
            other => other.as_str(),
        }
    }

    /// Whether the given JSON value satisfies this type.
    ///
    /// One coercion is permitted: an integer satisfies `number`. Media types
    /// accept strings (base64 payloads after unwrapping).
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Null => value.is_null(),
            Self::String | Self::Image | Self::Audio => value.is_string(),
            Self::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// Declaration of one tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    /// Accepted types; more than one entry forms a union.
    pub types: Vec<ParamType>,
    /// Human-readable description, required for every parameter.
    pub description: String,
    /// Whether `null` (or omission) is acceptable.
    #[serde(default)]
    pub nullable: bool,
    /// Default value used when the argument is omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParam {
    /// Declare a parameter with a single type.
    pub fn new(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            types: vec![param_type],
            description: description.into(),
            nullable: false,
            default: None,
        }
    }

    /// Declare a string parameter.
    pub fn string(description: impl Into<String>) -> Self {
        Self::new(ParamType::String, description)
    }

    /// Declare an integer parameter.
    pub fn integer(description: impl Into<String>) -> Self {
        Self::new(ParamType::Integer, description)
    }

    /// Declare a number parameter.
    pub fn number(description: impl Into<String>) -> Self {
        Self::new(ParamType::Number, description)
    }

    /// Declare a boolean parameter.
    pub fn boolean(description: impl Into<String>) -> Self {
        Self::new(ParamType::Boolean, description)
    }

    /// Declare a union parameter.
    pub fn union(types: Vec<ParamType>, description: impl Into<String>) -> Self {
        Self {
            types,
            description: description.into(),
            nullable: false,
            default: None,
        }
    }

    /// Mark the parameter nullable.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Give the parameter a default value (implies it may be omitted).
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Whether the argument may be omitted entirely.
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        self.nullable || self.default.is_some()
    }

    fn accepts(&self, value: &Value) -> bool {
        if value.is_null() && self.nullable {
            return true;
        }
        self.types.iter().any(|t| {
            t.matches(value)
                // integer satisfies number
                || (*t == ParamType::Number && ParamType::Integer.matches(value))
        })
    }

    fn type_names(&self) -> String {
        self.types
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Ordered map of parameter name to declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInputs(Vec<(String, ToolParam)>);

impl ToolInputs {
    /// Create an empty input declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, preserving declaration order.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, param: ToolParam) -> Self {
        self.0.push((name.into(), param));
        self
    }

    /// Look up a parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolParam> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    /// Iterate parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolParam)> {
        self.0.iter().map(|(n, p)| (n.as_str(), p))
    }

    /// Declared parameter names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of declared parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameters are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Normalize raw call arguments against a declared schema.
///
/// Steps, in order:
/// 1. Promote the argument value to a keyword map: an object whose keys are
///    all declared names is used directly; a single-entry object wrapping
///    such a map is unwrapped; a bare value binds to the sole declared
///    parameter when there is exactly one.
/// 2. Reject unknown argument names.
/// 3. Fill omitted parameters from defaults, or `null` when nullable;
///    reject omission otherwise.
/// 4. Type-check every argument (integer coerces to number, `any` matches
///    everything, unions by membership, `null` passes for nullable).
///
/// # Errors
///
/// [`ToolError::InvalidArguments`] describing the first violation.
pub fn validate_arguments(
    inputs: &ToolInputs,
    arguments: &Value,
) -> Result<Map<String, Value>, ToolError> {
    let mut kwargs = promote_to_kwargs(inputs, arguments)?;

    for key in kwargs.keys() {
        if inputs.get(key).is_none() {
            return Err(ToolError::invalid_args(format!(
                "unexpected argument '{key}'; valid arguments are: {}",
                inputs.names().join(", ")
            )));
        }
    }

    for (name, param) in inputs.iter() {
        match kwargs.get(name) {
            None => {
                if let Some(default) = &param.default {
                    kwargs.insert(name.to_owned(), default.clone());
                } else if param.nullable {
                    kwargs.insert(name.to_owned(), Value::Null);
                } else {
                    return Err(ToolError::invalid_args(format!(
                        "missing required argument '{name}'"
                    )));
                }
            }
            Some(value) => {
                if !param.accepts(value) {
                    return Err(ToolError::invalid_args(format!(
                        "argument '{name}' has invalid type: expected {}, got {}",
                        param.type_names(),
                        json_type_name(value)
                    )));
                }
            }
        }
    }

    Ok(kwargs)
}

fn promote_to_kwargs(
    inputs: &ToolInputs,
    arguments: &Value,
) -> Result<Map<String, Value>, ToolError> {
    match arguments {
        Value::Object(map) => {
            if map.keys().all(|k| inputs.get(k).is_some()) {
                return Ok(map.clone());
            }
            // A single positional mapping whose keys are all declared
            // parameter names is promoted to keyword arguments.
            if map.len() == 1 {
                if let Some(Value::Object(inner)) = map.values().next() {
                    if !inner.is_empty() && inner.keys().all(|k| inputs.get(k).is_some()) {
                        return Ok(inner.clone());
                    }
                }
            }
            Ok(map.clone())
        }
        Value::Null => Ok(Map::new()),
        other => {
            if inputs.len() == 1 {
                let name = inputs.names()[0].to_owned();
                let mut map = Map::new();
                map.insert(name, other.clone());
                Ok(map)
            } else {
                Err(ToolError::invalid_args(format!(
                    "expected an object of keyword arguments, got {}",
                    json_type_name(other)
                )))
            }
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A tool as advertised to the model's structured tool-call channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON-schema parameters object.
    pub parameters: Value,
}

impl ToolDefinition {
    /// The OpenAI-style function descriptor wrapping this definition.
    #[must_use]
    pub fn to_openai_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Project a tool declaration into its JSON-schema parameters object.
#[must_use]
pub fn inputs_to_json_schema(inputs: &ToolInputs) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for (name, param) in inputs.iter() {
        let mut prop = Map::new();
        if param.types.len() == 1 {
            prop.insert(
                "type".to_owned(),
                Value::String(param.types[0].json_schema_str().to_owned()),
            );
        } else {
            prop.insert(
                "type".to_owned(),
                Value::Array(
                    param
                        .types
                        .iter()
                        .map(|t| Value::String(t.json_schema_str().to_owned()))
                        .collect(),
                ),
            );
        }
        prop.insert(
            "description".to_owned(),
            Value::String(param.description.clone()),
        );
        if param.nullable {
            prop.insert("nullable".to_owned(), Value::Bool(true));
        }
        if let Some(default) = &param.default {
            prop.insert("default".to_owned(), default.clone());
        }
        properties.insert(name.to_owned(), Value::Object(prop));

        if !param.is_optional() {
            required.push(Value::String(name.to_owned()));
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Render a call signature for the code agent's prompt.
///
/// The output lists the tool as an ordinary callable with keyword
/// arguments, e.g. `add(a: number, b: number) -> number`.
#[must_use]
pub fn to_code_signature(
    name: &str,
    description: &str,
    inputs: &ToolInputs,
    output_type: ParamType,
) -> String {
    let mut signature = String::new();
    let _ = write!(signature, "{name}(");
    for (i, (param_name, param)) in inputs.iter().enumerate() {
        if i > 0 {
            signature.push_str(", ");
        }
        let _ = write!(signature, "{param_name}: {}", param.type_names());
        if let Some(default) = &param.default {
            let _ = write!(signature, " = {default}");
        }
    }
    let _ = write!(signature, ") -> {}", output_type.as_str());
    let _ = write!(signature, "\n    {description}");
    for (param_name, param) in inputs.iter() {
        let _ = write!(signature, "\n    {param_name}: {}", param.description);
    }
    signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_inputs() -> ToolInputs {
        ToolInputs::new()
            .param("a", ToolParam::number("First operand"))
            .param("b", ToolParam::number("Second operand"))
    }

    #[test]
    fn test_validate_accepts_good_arguments() {
        let kwargs = validate_arguments(&add_inputs(), &json!({"a": 1, "b": 2.5})).unwrap();
        assert_eq!(kwargs["a"], json!(1));
        assert_eq!(kwargs["b"], json!(2.5));
    }

    #[test]
    fn test_validate_rejects_unknown_argument() {
        let err = validate_arguments(&add_inputs(), &json!({"a": 1, "b": 2, "c": 3})).unwrap_err();
        assert!(err.to_string().contains("unexpected argument 'c'"));
    }

    #[test]
    fn test_validate_rejects_missing_argument() {
        let err = validate_arguments(&add_inputs(), &json!({"a": 1})).unwrap_err();
        assert!(err.to_string().contains("missing required argument 'b'"));
    }

    #[test]
    fn test_validate_rejects_type_mismatch() {
        let err = validate_arguments(&add_inputs(), &json!({"a": "x", "b": 2})).unwrap_err();
        assert!(err.to_string().contains("argument 'a' has invalid type"));
    }

    #[test]
    fn test_integer_satisfies_number_but_not_reverse() {
        let inputs = ToolInputs::new()
            .param("n", ToolParam::number("any number"))
            .param("i", ToolParam::integer("whole only"));

        assert!(validate_arguments(&inputs, &json!({"n": 3, "i": 3})).is_ok());
        let err = validate_arguments(&inputs, &json!({"n": 3, "i": 3.5})).unwrap_err();
        assert!(err.to_string().contains("'i'"));
    }

    #[test]
    fn test_nullable_and_default_fill_omissions() {
        let inputs = ToolInputs::new()
            .param("q", ToolParam::string("query"))
            .param("limit", ToolParam::integer("max results").with_default(json!(5)))
            .param("lang", ToolParam::string("language").nullable());

        let kwargs = validate_arguments(&inputs, &json!({"q": "rust"})).unwrap();
        assert_eq!(kwargs["limit"], json!(5));
        assert_eq!(kwargs["lang"], Value::Null);
    }

    #[test]
    fn test_null_satisfies_nullable_regardless_of_type() {
        let inputs = ToolInputs::new().param("n", ToolParam::integer("count").nullable());
        assert!(validate_arguments(&inputs, &json!({"n": null})).is_ok());
    }

    #[test]
    fn test_union_membership() {
        let inputs = ToolInputs::new().param(
            "v",
            ToolParam::union(vec![ParamType::String, ParamType::Integer], "either"),
        );
        assert!(validate_arguments(&inputs, &json!({"v": "s"})).is_ok());
        assert!(validate_arguments(&inputs, &json!({"v": 3})).is_ok());
        assert!(validate_arguments(&inputs, &json!({"v": true})).is_err());
    }

    #[test]
    fn test_any_matches_everything() {
        let inputs = ToolInputs::new().param("v", ToolParam::new(ParamType::Any, "whatever"));
        for value in [json!(1), json!("s"), json!([1]), json!({"k": 1}), json!(true)] {
            assert!(validate_arguments(&inputs, &json!({ "v": value })).is_ok());
        }
    }

    #[test]
    fn test_single_positional_mapping_promotes() {
        let promoted =
            validate_arguments(&add_inputs(), &json!({"kwargs": {"a": 1, "b": 2}})).unwrap();
        assert_eq!(promoted["a"], json!(1));
        assert_eq!(promoted["b"], json!(2));
    }

    #[test]
    fn test_bare_value_binds_single_parameter() {
        let inputs = ToolInputs::new().param("answer", ToolParam::new(ParamType::Any, "value"));
        let kwargs = validate_arguments(&inputs, &json!(42)).unwrap();
        assert_eq!(kwargs["answer"], json!(42));
    }

    #[test]
    fn test_json_schema_projection() {
        let inputs = ToolInputs::new()
            .param("q", ToolParam::string("query"))
            .param("v", ToolParam::new(ParamType::Any, "anything"))
            .param("limit", ToolParam::integer("max").with_default(json!(5)));

        let schema = inputs_to_json_schema(&inputs);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["q"]["type"], "string");
        // `any` is rewritten to string for the structured channel.
        assert_eq!(schema["properties"]["v"]["type"], "string");
        assert_eq!(schema["required"], json!(["q", "v"]));
    }

    #[test]
    fn test_openai_descriptor_shape() {
        let definition = ToolDefinition {
            name: "add".to_owned(),
            description: "Adds numbers".to_owned(),
            parameters: inputs_to_json_schema(&add_inputs()),
        };
        let descriptor = definition.to_openai_schema();
        assert_eq!(descriptor["type"], "function");
        assert_eq!(descriptor["function"]["name"], "add");
        assert!(descriptor["function"]["parameters"]["properties"]["a"].is_object());
    }

    #[test]
    fn test_code_signature_rendering() {
        let signature = to_code_signature(
            "add",
            "Adds two numbers.",
            &add_inputs(),
            ParamType::Number,
        );
        assert!(signature.starts_with("add(a: number, b: number) -> number"));
        assert!(signature.contains("Adds two numbers."));
        assert!(signature.contains("a: First operand"));
    }
}
