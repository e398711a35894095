//! Wire schema for capture uploads and status replies.
//!
//! ARCHITECTURE
//! ============
//! A capture device streams fragments over a WebSocket. Each fragment is a
//! JSON record with PascalCase keys (the client serializes its structs
//! verbatim). This module is the single owner of that schema: it decodes
//! inbound payloads into typed records and encodes the status reply.
//!
//! DESIGN
//! ======
//! - Every field is optional on the wire. Absent or `null` sequences decode
//!   as empty so older and newer clients keep working.
//! - Frames, intrinsics and extrinsics are open records. Only `Image` is
//!   typed at decode time; the pose and camera fields are read through
//!   accessors that yield `None` on an unexpected shape instead of rejecting
//!   the fragment. An extrinsic may be any JSON value.
//! - Decoding is two-stage. Bytes that are not JSON are `Malformed`; JSON whose
//!   shape contradicts the schema (non-object top level, non-array sequences,
//!   a frame that is not a record or whose `Image` is not a byte array) is a
//!   `SchemaViolation`. Both are dropped by the connection handler without a
//!   reply.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code attached to structured log lines.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

/// Error returned by [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not well-formed JSON.
    #[error("malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The payload is JSON but does not have the shape of a fragment.
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

impl ErrorCode for DecodeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "E_MALFORMED",
            Self::SchemaViolation(_) => "E_SCHEMA",
        }
    }
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// Two-component vector as serialized by the capture client (`{x, y}`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

/// Three-component vector (`{x, y, z}`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Rotation quaternion (`{x, y, z, w}`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

// =============================================================================
// FRAGMENT
// =============================================================================

/// One image capture plus its metadata. Only `Image` is typed; every other
/// key is kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaptureDeviceFrame {
    /// Encoded image bytes (JPEG/PNG); never decoded here.
    #[serde(default, deserialize_with = "null_as_default")]
    pub image: Vec<u8>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CaptureDeviceFrame {
    /// `Dimensions` as `{x, y}`; `None` when absent or shaped differently.
    #[must_use]
    pub fn dimensions(&self) -> Option<Vec2> {
        view(self.extra.get("Dimensions"))
    }
}

/// Camera intrinsics record, kept as sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intrinsic(pub Value);

impl Intrinsic {
    #[must_use]
    pub fn focal_length(&self) -> Option<Vec2> {
        view(self.0.get("FocalLength"))
    }

    #[must_use]
    pub fn principal_point(&self) -> Option<Vec2> {
        view(self.0.get("PrincipalPoint"))
    }
}

/// Camera pose for one captured frame, kept as sent. Any JSON value is a
/// valid element; the typed accessors only read what they recognise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extrinsic(pub Value);

impl Extrinsic {
    #[must_use]
    pub fn camera_position(&self) -> Option<Vec3> {
        view(self.0.get("CameraPosition"))
    }

    #[must_use]
    pub fn camera_rotation(&self) -> Option<Quat> {
        view(self.0.get("CameraRotation"))
    }
}

/// Typed view of an optional sub-value. A shape mismatch is `None`, not an
/// error: the record itself stays valid.
fn view<T: DeserializeOwned>(value: Option<&Value>) -> Option<T> {
    value.and_then(|v| T::deserialize(v).ok())
}

/// One decoded unit of capture data. Immutable once decoded and handed by
/// value to exactly one processor invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Fragment {
    /// Reconstruction model the client wants (e.g. `NeuralRecon`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub frames: Vec<CaptureDeviceFrame>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub intrinsics: Vec<Intrinsic>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub extrinsics: Vec<Extrinsic>,
}

/// Counts describing a fragment, for logs and the diagnostic history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub frames: usize,
    pub intrinsics: usize,
    pub extrinsics: usize,
    pub image_bytes: usize,
}

impl Fragment {
    #[must_use]
    pub fn summary(&self) -> FragmentSummary {
        FragmentSummary {
            model_name: self.model_name.clone(),
            frames: self.frames.len(),
            intrinsics: self.intrinsics.len(),
            extrinsics: self.extrinsics.len(),
            image_bytes: self.frames.iter().map(|f| f.image.len()).sum(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// RESULT
// =============================================================================

/// Outcome discriminant carried in the `Status` field of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failure => "Failure",
        }
    }
}

/// Output of processing one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessResult {
    pub status: Status,
}

impl ProcessResult {
    #[must_use]
    pub fn success() -> Self {
        Self { status: Status::Success }
    }

    #[must_use]
    pub fn failure() -> Self {
        Self { status: Status::Failure }
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Decode one inbound message payload (text or binary) into a [`Fragment`].
///
/// # Errors
///
/// [`DecodeError::Malformed`] if the bytes are not JSON,
/// [`DecodeError::SchemaViolation`] if the JSON is not a fragment record.
pub fn decode(bytes: &[u8]) -> Result<Fragment, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
    if !value.is_object() {
        return Err(DecodeError::SchemaViolation(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::SchemaViolation(e.to_string()))
}

/// Encode a reply. Total: every result has a wire form.
#[must_use]
pub fn encode(result: &ProcessResult) -> String {
    serde_json::json!({ "Status": result.status.as_str() }).to_string()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[path = "fragment_test.rs"]
mod tests;
