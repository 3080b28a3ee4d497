//! Model pricing table.
//!
//! Prices are USD per 1M tokens as `(input, output)`. OpenRouter-style ids
//! such as `openai/gpt-4o-mini` are matched on the part after the vendor slash.

/// Price applied to models missing from the table.
pub const DEFAULT_PRICING: (f64, f64) = (1.0, 2.0);

/// Look up known pricing for a model id. Returns None for unknown models.
pub fn model_pricing(model: &str) -> Option<(f64, f64)> {
    let lowered = model.to_lowercase();
    let normalized = lowered.rsplit('/').next().unwrap_or(&lowered);

    // More specific prefixes before less specific ones
    if normalized.starts_with("tongyi-deepresearch") {
        return Some((0.50, 0.50));
    }
    if normalized.starts_with("gpt-4o-mini") {
        return Some((0.15, 0.60));
    }
    if normalized.starts_with("gpt-4o") {
        return Some((2.50, 10.0));
    }
    if normalized.starts_with("gpt-4.1-mini") {
        return Some((0.40, 1.60));
    }
    if normalized.starts_with("gpt-4.1") {
        return Some((2.00, 8.00));
    }
    if normalized.starts_with("claude-3.5-sonnet") || normalized.starts_with("claude-3-5-sonnet") {
        return Some((3.0, 15.0));
    }
    if normalized.starts_with("claude-3.5-haiku") || normalized.starts_with("claude-3-5-haiku") {
        return Some((0.80, 4.0));
    }
    if normalized.starts_with("gemini-2.0-flash") {
        return Some((0.10, 0.40));
    }
    if normalized.starts_with("deepseek-chat") {
        return Some((0.27, 1.10));
    }
    None
}

/// Resolve pricing for a model, honoring explicit overrides.
///
/// Each override replaces only its own side of the pair.
pub fn resolve_pricing(
    model: &str,
    input_override: Option<f64>,
    output_override: Option<f64>,
) -> (f64, f64) {
    let (input, output) = model_pricing(model).unwrap_or(DEFAULT_PRICING);
    (
        input_override.unwrap_or(input),
        output_override.unwrap_or(output),
    )
}
