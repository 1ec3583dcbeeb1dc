//! Turning model output into classifications.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;

use crate::analyze::classifier::BatchOutcome;
use crate::analyze::prompt::batch_key;
use crate::analyze::types::{Classification, MALFORMED_IN_BATCH, NOT_IN_BATCH, UNPARSEABLE_RESPONSE};
use crate::error::ClassifyError;

fn json_fence() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("valid regex"))
}

fn any_fence() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)```").expect("valid regex"))
}

/// Try, in order: the whole content, a ```json fence, any fence.
pub fn extract_json(content: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(content.trim()) {
        return Some(v);
    }
    for re in [json_fence(), any_fence()] {
        if let Some(inner) = re.captures(content).and_then(|c| c.get(1)) {
            if let Ok(v) = serde_json::from_str::<Value>(inner.as_str().trim()) {
                return Some(v);
            }
        }
    }
    None
}

/// Single-report content. Never fails: anything unusable becomes the default.
pub fn parse_single(content: &str) -> Classification {
    extract_json(content)
        .as_ref()
        .and_then(Classification::from_value)
        .unwrap_or_else(|| Classification::fallback(UNPARSEABLE_RESPONSE))
}

/// Batch content for `n` reports keyed `report_1..report_n`.
///
/// Fails only when no JSON object can be found at all; missing or malformed
/// entries are defaulted individually.
pub fn parse_batch(content: &str, n: usize) -> Result<BatchOutcome, ClassifyError> {
    let value = extract_json(content)
        .ok_or_else(|| ClassifyError::Unparseable("batch response is not JSON".into()))?;
    let Value::Object(map) = value else {
        return Err(ClassifyError::Unparseable(
            "batch response is not a JSON object".into(),
        ));
    };

    let mut classifications = Vec::with_capacity(n);
    let mut defaulted = Vec::new();
    for i in 0..n {
        let c = match map.get(&batch_key(i + 1)) {
            None => {
                defaulted.push(i);
                Classification::fallback(NOT_IN_BATCH)
            }
            Some(v) => match Classification::from_value(v) {
                Some(c) => c,
                None => {
                    defaulted.push(i);
                    Classification::fallback(MALFORMED_IN_BATCH)
                }
            },
        };
        classifications.push(c);
    }

    Ok(if defaulted.is_empty() {
        BatchOutcome::FullyClassified(classifications)
    } else {
        BatchOutcome::PartialWithFallback {
            classifications,
            defaulted,
        }
    })
}
