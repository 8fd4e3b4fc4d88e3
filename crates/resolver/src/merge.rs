//! Field-level merge of a stored override onto a lower-precedence config.
//!
//! A field is taken from the override only when the override supplies a
//! value; otherwise the base value is kept. `model` always comes from the
//! override. Stored numbers are coerced through [`coerce_number`], so the
//! merge never has to know which storage class a value arrived in.

use parley_core::generation::{ConfigOverride, GenerationConfig, StoredNumber};
use tracing::warn;

/// Convert a stored numeric value to a plain `f64`.
///
/// Values that do not parse, or are not finite, are logged and dropped.
pub fn coerce_number(field: &str, value: &StoredNumber) -> Option<f64> {
    let parsed = match value {
        StoredNumber::Integer(v) => Some(*v as f64),
        StoredNumber::Float(v) => Some(*v),
        StoredNumber::Decimal(text) => text.trim().parse::<f64>().ok(),
    };

    match parsed {
        Some(v) if v.is_finite() => Some(v),
        _ => {
            warn!(field, value = ?value, "Ignoring non-numeric stored value");
            None
        }
    }
}

fn float(field: &str, value: &Option<StoredNumber>) -> Option<f64> {
    value.as_ref().and_then(|v| coerce_number(field, v))
}

fn unsigned(field: &str, value: &Option<StoredNumber>) -> Option<u32> {
    let v = float(field, value)?;
    if v < 0.0 || v > u32::MAX as f64 {
        warn!(field, value = v, "Ignoring out-of-range stored value");
        return None;
    }
    Some(v.round() as u32)
}

fn signed(field: &str, value: &Option<StoredNumber>) -> Option<i64> {
    // Integers bypass the f64 path so large seeds keep full precision.
    if let Some(StoredNumber::Integer(v)) = value {
        return Some(*v);
    }
    float(field, value).map(|v| v.round() as i64)
}

/// Overlay `over` onto `base`.
pub fn apply_override(base: &GenerationConfig, over: &ConfigOverride) -> GenerationConfig {
    GenerationConfig {
        model: over.model.clone(),
        vision_model: over.vision_model.clone().or_else(|| base.vision_model.clone()),
        temperature: float("temperature", &over.temperature).or(base.temperature),
        top_p: float("top_p", &over.top_p).or(base.top_p),
        top_k: unsigned("top_k", &over.top_k).or(base.top_k),
        frequency_penalty: float("frequency_penalty", &over.frequency_penalty)
            .or(base.frequency_penalty),
        presence_penalty: float("presence_penalty", &over.presence_penalty)
            .or(base.presence_penalty),
        repetition_penalty: float("repetition_penalty", &over.repetition_penalty)
            .or(base.repetition_penalty),
        min_p: float("min_p", &over.min_p).or(base.min_p),
        top_a: float("top_a", &over.top_a).or(base.top_a),
        seed: signed("seed", &over.seed).or(base.seed),
        max_tokens: unsigned("max_tokens", &over.max_tokens).or(base.max_tokens),
        stop: over.stop.clone().unwrap_or_else(|| base.stop.clone()),
        logit_bias: over.logit_bias.clone().or_else(|| base.logit_bias.clone()),
        response_format: over
            .response_format
            .clone()
            .or_else(|| base.response_format.clone()),
        show_thinking: over.show_thinking.unwrap_or(base.show_thinking),
        reasoning_effort: over
            .reasoning_effort
            .clone()
            .or_else(|| base.reasoning_effort.clone()),
        provider_routing: over
            .provider_routing
            .clone()
            .or_else(|| base.provider_routing.clone()),
        memory_score_threshold: float("memory_score_threshold", &over.memory_score_threshold)
            .or(base.memory_score_threshold),
        memory_limit: unsigned("memory_limit", &over.memory_limit).or(base.memory_limit),
        context_window: unsigned("context_window", &over.context_window)
            .filter(|w| *w > 0)
            .unwrap_or(base.context_window),
    }
}
