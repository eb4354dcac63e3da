//! Typed value carriers for the tool boundary.
//!
//! Text, image, and audio payloads survive round-trips through the model's
//! text channel by travelling inside a small tagged union: raw bytes in
//! memory, base64 at the wire boundary. Wrappers are created when a tool
//! returns and unwrapped before the next tool is invoked.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A text value crossing the tool boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentText(pub String);

impl AgentText {
    /// The raw text payload.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An image value crossing the tool boundary. Stored as raw bytes; base64
/// only at the wire boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentImage {
    /// Raw encoded image bytes (PNG unless noted otherwise).
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    /// File extension describing the encoding.
    #[serde(default = "default_image_ext")]
    pub extension: String,
}

fn default_image_ext() -> String {
    "png".to_owned()
}

impl AgentImage {
    /// Create an image wrapper from raw bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            extension: default_image_ext(),
        }
    }

    /// Create an image wrapper from a base64 payload.
    ///
    /// # Errors
    ///
    /// Returns the decode error for malformed base64.
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        Ok(Self::new(STANDARD.decode(encoded)?))
    }

    /// The raw byte payload.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }

    /// Base64 serialization for the wire boundary.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// An audio value crossing the tool boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAudio {
    /// Raw encoded audio bytes.
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    /// File extension describing the encoding.
    #[serde(default = "default_audio_ext")]
    pub extension: String,
}

fn default_audio_ext() -> String {
    "mp3".to_owned()
}

impl AgentAudio {
    /// Create an audio wrapper from raw bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            extension: default_audio_ext(),
        }
    }

    /// The raw byte payload.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }

    /// Base64 serialization for the wire boundary.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// Tagged union of every value that can cross the tool boundary.
///
/// Plain JSON data travels as [`AgentValue::Json`]; the typed wrappers mark
/// payloads that need special handling when projected into messages or
/// stored in agent state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum AgentValue {
    /// A text wrapper.
    Text(AgentText),
    /// An image wrapper.
    Image(AgentImage),
    /// An audio wrapper.
    Audio(AgentAudio),
    /// Ordinary JSON data, passed through unchanged.
    Json(Value),
}

impl AgentValue {
    /// Create a text value.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(AgentText(text.into()))
    }

    /// Create an image value from raw bytes.
    #[must_use]
    pub fn image(bytes: Vec<u8>) -> Self {
        Self::Image(AgentImage::new(bytes))
    }

    /// Create an audio value from raw bytes.
    #[must_use]
    pub fn audio(bytes: Vec<u8>) -> Self {
        Self::Audio(AgentAudio::new(bytes))
    }

    /// Whether this value is an image or audio payload.
    #[must_use]
    pub const fn is_media(&self) -> bool {
        matches!(self, Self::Image(_) | Self::Audio(_))
    }

    /// Unwrap to the raw JSON payload the tool boundary normalization pass
    /// hands to `forward`: text becomes a JSON string, media becomes its
    /// base64 string, JSON passes through.
    #[must_use]
    pub fn unwrap_raw(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.0.clone()),
            Self::Image(image) => Value::String(image.to_base64()),
            Self::Audio(audio) => Value::String(audio.to_base64()),
            Self::Json(value) => value.clone(),
        }
    }

    /// Serialized form used in observation text: the text itself, a compact
    /// JSON rendering, or a placeholder naming the media kind.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Text(text) => text.0.clone(),
            Self::Image(image) => format!("<image ({} bytes)>", image.bytes.len()),
            Self::Audio(audio) => format!("<audio ({} bytes)>", audio.bytes.len()),
            Self::Json(Value::String(s)) => s.clone(),
            Self::Json(value) => value.to_string(),
        }
    }

    /// The JSON payload, when this value is not a media wrapper.
    #[must_use]
    pub fn as_json(&self) -> Option<Value> {
        match self {
            Self::Text(text) => Some(Value::String(text.0.clone())),
            Self::Json(value) => Some(value.clone()),
            Self::Image(_) | Self::Audio(_) => None,
        }
    }
}

impl From<Value> for AgentValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_base64_round_trip() {
        let image = AgentImage::new(vec![1, 2, 3, 255]);
        let decoded = AgentImage::from_base64(&image.to_base64()).unwrap();
        assert_eq!(decoded.raw(), image.raw());
    }

    #[test]
    fn test_wire_serialization_uses_base64() {
        let value = AgentValue::image(vec![0, 159, 146, 150]);
        let wire = serde_json::to_value(&value).unwrap();
        assert_eq!(wire["kind"], "image");
        assert!(wire["value"]["bytes"].is_string());

        let back: AgentValue = serde_json::from_value(wire).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_unwrap_raw() {
        assert_eq!(
            AgentValue::text("hi").unwrap_raw(),
            Value::String("hi".to_owned())
        );
        assert_eq!(
            AgentValue::Json(serde_json::json!({"a": 1})).unwrap_raw(),
            serde_json::json!({"a": 1})
        );
    }

    #[test]
    fn test_display_string() {
        assert_eq!(AgentValue::text("hello").to_display_string(), "hello");
        assert_eq!(
            AgentValue::Json(serde_json::json!(42)).to_display_string(),
            "42"
        );
        assert!(AgentValue::image(vec![0; 10])
            .to_display_string()
            .contains("10 bytes"));
    }
}
