//! Newline-delimited JSON codec for [`Envelope`]s.
//!
//! Wire format:
//! ```text
//! {"type":"<TYPE>", ...fields}\n
//! ```
//! One UTF-8 line per envelope.  A line never contains a raw newline because
//! JSON escapes newlines inside strings, so line framing alone is enough to
//! find record boundaries.

use serde_json::Value;
use thiserror::Error;

use crate::protocol::messages::{Envelope, EnvelopeKind, MAX_ENVELOPE_LEN, TYPE_FIELD};

/// Errors that can occur during envelope encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line was empty or contained only whitespace.
    #[error("empty envelope line")]
    Empty,

    /// The line was not valid JSON, or a known type had missing/ill-typed fields.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON object had no string `type` field.
    #[error("envelope has no \"type\" discriminator")]
    MissingType,

    /// The envelope could not be represented on the wire.
    #[error("cannot encode envelope: {0}")]
    Encode(String),

    /// The line is longer than [`MAX_ENVELOPE_LEN`].
    #[error("envelope exceeds {limit} bytes")]
    TooLong { limit: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] as a single JSON object without the trailing newline.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if a float field is not finite (JSON has
/// no representation for NaN or infinity).
///
/// # Examples
///
/// ```rust
/// use rcpc_core::{decode_envelope, encode_envelope, Envelope};
///
/// let text = encode_envelope(&Envelope::PlayPause).unwrap();
/// assert_eq!(text, r#"{"type":"ACTION_PLAY_PAUSE"}"#);
/// assert_eq!(decode_envelope(&text).unwrap(), Envelope::PlayPause);
/// ```
pub fn encode_envelope(envelope: &Envelope) -> Result<String, ProtocolError> {
    if let Envelope::Unknown { kind, fields } = envelope {
        let mut object = fields.clone();
        object.insert(TYPE_FIELD.to_string(), Value::String(kind.clone()));
        return Ok(Value::Object(object).to_string());
    }

    let value = serde_json::to_value(envelope).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    if contains_null(&value) {
        return Err(ProtocolError::Encode(format!(
            "{} carries a non-finite number",
            envelope.kind()
        )));
    }
    Ok(value.to_string())
}

/// Encodes an [`Envelope`] followed by `\n`, ready to write to the stream.
///
/// # Errors
///
/// See [`encode_envelope`].
pub fn encode_line(envelope: &Envelope) -> Result<String, ProtocolError> {
    let mut line = encode_envelope(envelope)?;
    line.push('\n');
    Ok(line)
}

/// Decodes one [`Envelope`] from a single line.
///
/// A trailing `\n` or `\r\n` is tolerated.  A well-formed object whose `type`
/// is outside the vocabulary decodes to [`Envelope::Unknown`] with its other
/// members kept in `fields`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the line is empty, longer than
/// [`MAX_ENVELOPE_LEN`], is not a JSON object with a string `type`, or is a
/// known type with missing or ill-typed fields.
pub fn decode_envelope(line: &str) -> Result<Envelope, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    if line.len() > MAX_ENVELOPE_LEN {
        return Err(ProtocolError::TooLong {
            limit: MAX_ENVELOPE_LEN,
        });
    }

    let value: Value = serde_json::from_str(line)?;
    let kind = value
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    if EnvelopeKind::from_wire(kind).is_none() {
        tracing::debug!("passing through unrecognised envelope type {kind:?}");
        let kind = kind.to_string();
        let mut fields = match value {
            Value::Object(map) => map,
            _ => return Err(ProtocolError::MissingType),
        };
        fields.remove(TYPE_FIELD);
        return Ok(Envelope::Unknown { kind, fields });
    }

    Ok(serde_json::from_value(value)?)
}

/// `serde_json::to_value` maps non-finite floats to `null`; none of our
/// fields are nullable, so a `null` means a value was lost.
fn contains_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.values().any(contains_null),
        Value::Array(items) => items.iter().any(contains_null),
        _ => false,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
