use serde_json::Value;

use super::services::GenerationParams;
use crate::error::JobError;

pub const MAX_TARGET_WORD_COUNT: u64 = 20_000;

/// Extract generation parameters from a queue entry payload.
/// Structural problems are reported as `JobError::Validation`.
pub fn parse_params(payload: &Value) -> Result<GenerationParams, JobError> {
    let Some(obj) = payload.as_object() else {
        return Err(JobError::Validation("payload must be a JSON object".into()));
    };

    let topic = match obj.get("topic") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) => {
            return Err(JobError::Validation("topic must not be empty".into()));
        }
        Some(_) => return Err(JobError::Validation("topic must be a string".into())),
        None => return Err(JobError::Validation("missing required field: topic".into())),
    };

    let target_word_count = match obj.get("target_word_count") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) | None => {
                return Err(JobError::Validation(
                    "target_word_count must be a positive integer".into(),
                ));
            }
            Some(n) if n > MAX_TARGET_WORD_COUNT => {
                return Err(JobError::Validation(format!(
                    "target_word_count exceeds {MAX_TARGET_WORD_COUNT}"
                )));
            }
            Some(n) => Some(n as u32),
        },
        Some(_) => {
            return Err(JobError::Validation(
                "target_word_count must be a positive integer".into(),
            ));
        }
    };

    let keywords = match obj.get("keywords") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|k| {
                k.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| JobError::Validation("keywords must be strings".into()))
            })
            .filter(|k| !matches!(k, Ok(s) if s.is_empty()))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(JobError::Validation("keywords must be an array".into()));
        }
    };

    Ok(GenerationParams {
        topic,
        target_word_count,
        keywords,
        tone: optional_string(obj.get("tone")),
        language: optional_string(obj.get("language")),
    })
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Whether `actual` is within `tolerance` (a fraction) of `target`.
pub fn within_tolerance(actual: usize, target: u32, tolerance: f64) -> bool {
    let target = f64::from(target);
    let deviation = (actual as f64 - target).abs();
    deviation <= target * tolerance
}
