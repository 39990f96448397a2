//! Model-aware cost estimation for provider calls.
//!
//! Prices are USD per million tokens. Model names are matched by substring
//! against the table in order, so more specific names come first.

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// Cost per million input tokens (USD).
    pub input: f64,
    /// Cost per million output tokens (USD).
    pub output: f64,
}

/// Known model pricing table (costs in USD per million tokens).
const PRICING_TABLE: &[(&str, ModelPricing)] = &[
    ("gpt-4o-mini", ModelPricing { input: 0.15, output: 0.60 }),
    ("gpt-4o", ModelPricing { input: 2.50, output: 10.0 }),
    ("gpt-4-turbo", ModelPricing { input: 10.0, output: 30.0 }),
    ("gpt-4", ModelPricing { input: 30.0, output: 60.0 }),
    ("gpt-3.5-turbo", ModelPricing { input: 0.50, output: 1.50 }),
    ("claude-3-5-haiku", ModelPricing { input: 0.80, output: 4.0 }),
    ("claude-3-haiku", ModelPricing { input: 0.25, output: 1.25 }),
    ("claude-3-5-sonnet", ModelPricing { input: 3.0, output: 15.0 }),
    ("claude-3-sonnet", ModelPricing { input: 3.0, output: 15.0 }),
    ("claude-3-opus", ModelPricing { input: 15.0, output: 75.0 }),
    ("opus", ModelPricing { input: 15.0, output: 75.0 }),
    ("sonnet", ModelPricing { input: 3.0, output: 15.0 }),
    ("haiku", ModelPricing { input: 0.80, output: 4.0 }),
];

/// Rate applied to models missing from the table.
pub const FALLBACK_PRICING: ModelPricing = ModelPricing { input: 3.0, output: 15.0 };

/// Get pricing for a model by name or alias.
pub fn get_model_pricing(model: &str) -> Option<ModelPricing> {
    let model_lower = model.to_lowercase();
    PRICING_TABLE
        .iter()
        .find(|(name, _)| model_lower.contains(name))
        .map(|(_, pricing)| *pricing)
}

/// Estimate cost in USD, using [`FALLBACK_PRICING`] for unknown models.
pub fn estimate_cost_or_fallback(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    price(get_model_pricing(model).unwrap_or(FALLBACK_PRICING), input_tokens, output_tokens)
}

fn price(pricing: ModelPricing, input_tokens: u64, output_tokens: u64) -> f64 {
    (input_tokens as f64 * pricing.input + output_tokens as f64 * pricing.output) / 1_000_000.0
}
