//! Runtime values for the sandbox language.

use serde_json::Value as Json;

use super::InterpreterError;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The null value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map preserving insertion order.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Name of this value's type, for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Truthiness: null, false, zero, and empty containers are falsy.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(entries) => !entries.is_empty(),
        }
    }

    /// Numeric view, when this is an int or float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Convert to a JSON value (the tool-call boundary format).
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::Str(s) => Json::String(s.clone()),
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Convert from a JSON value.
    #[must_use]
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Json::String(s) => Self::Str(s.clone()),
            Json::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Json::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Representation used inside containers: strings are quoted.
    fn repr(&self) -> String {
        match self {
            Self::Str(s) => format!("\"{s}\""),
            other => other.to_string(),
        }
    }

    /// Look up a map entry.
    #[must_use]
    pub fn map_get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Index into a list or string, supporting negative indices.
    ///
    /// # Errors
    ///
    /// Out-of-range indices and non-indexable types.
    pub fn index(&self, index: &Value) -> Result<Value, InterpreterError> {
        match (self, index) {
            (Self::List(items), Self::Int(i)) => {
                let idx = normalize_index(*i, items.len())?;
                Ok(items[idx].clone())
            }
            (Self::Str(s), Self::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = normalize_index(*i, chars.len())?;
                Ok(Self::Str(chars[idx].to_string()))
            }
            (Self::Map(_), Self::Str(key)) => self.map_get(key).cloned().ok_or_else(|| {
                InterpreterError::Value(format!("key \"{key}\" not found in map"))
            }),
            (container, idx) => Err(InterpreterError::Type(format!(
                "cannot index {} with {}",
                container.type_name(),
                idx.type_name()
            ))),
        }
    }
}

fn normalize_index(index: i64, len: usize) -> Result<usize, InterpreterError> {
    let len_i = len as i64;
    let resolved = if index < 0 { len_i + index } else { index };
    if resolved < 0 || resolved >= len_i {
        return Err(InterpreterError::Value(format!(
            "index {index} out of range for length {len}"
        )));
    }
    Ok(resolved as usize)
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&item.repr())?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "\"{key}\": {}", value.repr())?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let json = json!({"a": 1, "b": [true, null, 2.5], "c": "text"});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(!Value::List(Vec::new()).truthy());
        assert!(Value::Int(3).truthy());
        assert!(Value::Str("x".to_owned()).truthy());
    }

    #[test]
    fn test_negative_indexing() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(list.index(&Value::Int(-1)).unwrap(), Value::Int(3));
        assert!(list.index(&Value::Int(3)).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(4).to_string(), "4");
        assert_eq!(Value::Float(4.0).to_string(), "4.0");
        assert_eq!(Value::Str("hi".to_owned()).to_string(), "hi");
        assert_eq!(
            Value::List(vec![Value::Str("a".to_owned()), Value::Int(1)]).to_string(),
            "[\"a\", 1]"
        );
    }
}
