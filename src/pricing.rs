//! Static per-model pricing used for cost estimates.

use crate::model::{ModelInfo, ModelPricing};

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price {
    pub input: f64,
    pub output: f64,
}

const PRICES: &[(&str, &str, Price)] = &[
    ("openai/gpt-4o", "GPT-4o", Price { input: 2.50, output: 10.00 }),
    ("openai/gpt-4o-mini", "GPT-4o mini", Price { input: 0.15, output: 0.60 }),
    ("openai/gpt-4-turbo", "GPT-4 Turbo", Price { input: 10.00, output: 30.00 }),
    ("openai/gpt-3.5-turbo", "GPT-3.5 Turbo", Price { input: 0.50, output: 1.50 }),
    ("anthropic/claude-3.5-sonnet", "Claude 3.5 Sonnet", Price { input: 3.00, output: 15.00 }),
    ("anthropic/claude-3-opus", "Claude 3 Opus", Price { input: 15.00, output: 75.00 }),
    ("anthropic/claude-3-haiku", "Claude 3 Haiku", Price { input: 0.25, output: 1.25 }),
    ("google/gemini-pro-1.5", "Gemini 1.5 Pro", Price { input: 1.25, output: 5.00 }),
    ("google/gemini-flash-1.5", "Gemini 1.5 Flash", Price { input: 0.075, output: 0.30 }),
    ("meta-llama/llama-3.1-70b-instruct", "Llama 3.1 70B Instruct", Price { input: 0.35, output: 0.40 }),
];

pub fn price_of(model: &str) -> Option<Price> {
    PRICES
        .iter()
        .find(|(id, _, _)| *id == model)
        .map(|(_, _, price)| *price)
}

/// Estimated cost in USD; zero for models not in the table.
pub fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    price_of(model).map_or(0.0, |price| {
        (input_tokens as f64 * price.input + output_tokens as f64 * price.output) / 1_000_000.0
    })
}

/// Built-in model list derived from the pricing table.
pub fn builtin_models() -> Vec<ModelInfo> {
    PRICES
        .iter()
        .map(|(id, name, price)| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            pricing: Some(ModelPricing {
                prompt: (price.input / 1_000_000.0).to_string(),
                completion: (price.output / 1_000_000.0).to_string(),
            }),
            context_length: None,
        })
        .collect()
}
