//! Static per-model pricing for completion cost accounting.
//!
//! Costs are computed from the provider's reported token usage and a fixed
//! price table, so the same usage always yields the same cost. Prices are
//! USD per million tokens.

use tracing::warn;

/// Price of one million input and output tokens for a model family.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Known model prefixes with their prices.
///
/// Matched by prefix, so more specific names must come before the families
/// they extend ("gpt-4o-mini" before "gpt-4o").
const PRICING: &[(&str, ModelPricing)] = &[
    (
        "gpt-4o-mini",
        ModelPricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        },
    ),
    (
        "gpt-4o",
        ModelPricing {
            input_per_million: 2.50,
            output_per_million: 10.00,
        },
    ),
    (
        "gpt-4.1-mini",
        ModelPricing {
            input_per_million: 0.40,
            output_per_million: 1.60,
        },
    ),
    (
        "gpt-4.1",
        ModelPricing {
            input_per_million: 2.00,
            output_per_million: 8.00,
        },
    ),
];

/// Look up pricing for the first table entry whose prefix matches.
pub fn pricing_for(model: &str) -> Option<ModelPricing> {
    PRICING
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, pricing)| *pricing)
}

/// Compute the USD cost of a completion from reported token counts.
///
/// Unknown models cost 0.0 so a new model name never blocks persistence;
/// the gap is logged for the operator to extend the table.
pub fn completion_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    match pricing_for(model) {
        Some(pricing) => {
            let input = prompt_tokens as f64 * pricing.input_per_million;
            let output = completion_tokens as f64 * pricing.output_per_million;
            (input + output) / 1_000_000.0
        }
        None => {
            warn!("No pricing entry for model '{}', recording zero cost", model);
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mini_priced_below_full_model() {
        let mini = pricing_for("gpt-4o-mini").unwrap();
        let full = pricing_for("gpt-4o").unwrap();
        assert!(mini.input_per_million < full.input_per_million);
        assert!(mini.output_per_million < full.output_per_million);
    }

    #[test]
    fn test_prefix_match_covers_dated_snapshots() {
        let snapshot = pricing_for("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(snapshot.input_per_million, 0.15);
        assert_eq!(snapshot.output_per_million, 0.60);
    }

    #[test]
    fn test_completion_cost_is_deterministic() {
        // 1200 prompt tokens and 300 completion tokens on gpt-4o-mini:
        // (1200 * 0.15 + 300 * 0.60) / 1e6 = 0.00036
        let cost = completion_cost("gpt-4o-mini", 1200, 300);
        assert!((cost - 0.00036).abs() < 1e-12);
        assert_eq!(cost, completion_cost("gpt-4o-mini", 1200, 300));
    }

    #[test]
    fn test_unknown_model_costs_nothing() {
        assert_eq!(completion_cost("some-new-model", 5000, 5000), 0.0);
    }
}
