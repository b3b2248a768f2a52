//! Image extraction from `generateContent` responses.
//!
//! The API has shipped two field-naming conventions for inline data
//! (`inline_data`/`inlineData`, `mime_type`/`mimeType`). Extraction looks
//! each field up through an ordered list of known names instead of
//! branching at every call site. A response without usable image data is
//! an [`ErrorKind::EmptyResult`](genbatch_core::failure::ErrorKind) failure.

use serde_json::Value;

use crate::error::GenerationError;

/// Known names of the inline data field, in priority order.
const INLINE_DATA_FIELDS: &[&str] = &["inline_data", "inlineData"];

/// Known names of the MIME type field, in priority order.
const MIME_TYPE_FIELDS: &[&str] = &["mime_type", "mimeType"];

/// Known names of the finish reason field, in priority order.
const FINISH_REASON_FIELDS: &[&str] = &["finishReason", "finish_reason"];

/// Known names of the prompt feedback field, in priority order.
const PROMPT_FEEDBACK_FIELDS: &[&str] = &["promptFeedback", "prompt_feedback"];

/// MIME type assumed when the part omits one.
const DEFAULT_MIME_TYPE: &str = "image/png";

/// Base64 image payload and its MIME type, as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub data: String,
    pub mime_type: String,
}

/// Look up the first present field among `names`.
fn field<'v>(value: &'v Value, names: &[&str]) -> Option<&'v Value> {
    names.iter().find_map(|name| value.get(*name))
}

/// Inline image carried by `part` under any known field name. A name whose
/// value has no data does not hide a later one that does.
fn inline_image(part: &Value) -> Option<ExtractedImage> {
    INLINE_DATA_FIELDS.iter().find_map(|name| {
        let inline = part.get(*name)?;
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())?;
        let mime_type = field(inline, MIME_TYPE_FIELDS)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MIME_TYPE);
        Some(ExtractedImage {
            data: data.to_owned(),
            mime_type: mime_type.to_owned(),
        })
    })
}

/// Return the first inline image of the first candidate that has one.
pub fn extract_image(response: &Value) -> Result<ExtractedImage, GenerationError> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| GenerationError::empty_result(describe_empty(response, "no candidates")))?;

    for candidate in candidates {
        let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        else {
            continue;
        };

        if let Some(image) = parts.iter().find_map(inline_image) {
            return Ok(image);
        }
    }

    Err(GenerationError::empty_result(describe_empty(
        response,
        "no inline image data in response",
    )))
}

/// Build an explanatory message from finish reasons, block reasons and
/// any text the model returned instead of an image.
fn describe_empty(response: &Value, base: &str) -> String {
    let mut message = base.to_owned();

    if let Some(reason) = field(response, PROMPT_FEEDBACK_FIELDS)
        .and_then(|f| f.get("blockReason"))
        .and_then(Value::as_str)
    {
        message.push_str(&format!("; prompt blocked: {reason}"));
    }

    let first = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first());

    if let Some(candidate) = first {
        if let Some(reason) = field(candidate, FINISH_REASON_FIELDS).and_then(Value::as_str) {
            message.push_str(&format!("; finish reason: {reason}"));
        }

        let text: Vec<&str> = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        if !text.is_empty() {
            message.push_str(&format!("; model text: {}", text.join(" ")));
        }
    }

    message
}
