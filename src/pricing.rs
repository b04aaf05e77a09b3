//! Cost filling for events the producer logged without a cost.
//!
//! Prices come from an embedded per-token table; remote price lists are not
//! fetched. A model the table does not know keeps whatever cost it carried.

use crate::models::UsageEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Per-token prices in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
    pub cache_creation_input_token_cost: Option<f64>,
    pub cache_read_input_token_cost: Option<f64>,
}

impl ModelPricing {
    pub fn cost(&self, event: &UsageEvent) -> f64 {
        let t = &event.tokens;
        t.input_tokens as f64 * self.input_cost_per_token
            + t.output_tokens as f64 * self.output_cost_per_token
            + t.cache_creation_input_tokens as f64 * self.cache_creation_input_token_cost.unwrap_or(0.0)
            + t.cache_read_input_tokens as f64 * self.cache_read_input_token_cost.unwrap_or(0.0)
    }
}

/// Anything that can price an event
pub trait CostCalculator: Send + Sync {
    /// `None` when the model is unknown
    fn cost_for(&self, event: &UsageEvent) -> Option<f64>;
}

/// Offline price table keyed by model id, with family fallback for dated ids
#[derive(Debug, Clone)]
pub struct EmbeddedPricing {
    models: HashMap<String, ModelPricing>,
}

const OPUS: ModelPricing = ModelPricing {
    input_cost_per_token: 15e-6,
    output_cost_per_token: 75e-6,
    cache_creation_input_token_cost: Some(18.75e-6),
    cache_read_input_token_cost: Some(1.5e-6),
};
const SONNET: ModelPricing = ModelPricing {
    input_cost_per_token: 3e-6,
    output_cost_per_token: 15e-6,
    cache_creation_input_token_cost: Some(3.75e-6),
    cache_read_input_token_cost: Some(0.3e-6),
};
const HAIKU: ModelPricing = ModelPricing {
    input_cost_per_token: 0.8e-6,
    output_cost_per_token: 4e-6,
    cache_creation_input_token_cost: Some(1e-6),
    cache_read_input_token_cost: Some(0.08e-6),
};
const HAIKU_3: ModelPricing = ModelPricing {
    input_cost_per_token: 0.25e-6,
    output_cost_per_token: 1.25e-6,
    cache_creation_input_token_cost: Some(0.3e-6),
    cache_read_input_token_cost: Some(0.03e-6),
};

impl Default for EmbeddedPricing {
    fn default() -> Self {
        let models = [
            ("claude-opus-4-1-20250805", OPUS),
            ("claude-opus-4-20250514", OPUS),
            ("claude-3-opus-20240229", OPUS),
            ("claude-sonnet-4-20250514", SONNET),
            ("claude-3-7-sonnet-20250219", SONNET),
            ("claude-3-5-sonnet-20241022", SONNET),
            ("claude-3-5-sonnet-20240620", SONNET),
            ("claude-3-5-haiku-20241022", HAIKU),
            ("claude-3-haiku-20240307", HAIKU_3),
        ]
        .into_iter()
        .map(|(name, pricing)| (name.to_string(), pricing))
        .collect();

        Self { models }
    }
}

impl EmbeddedPricing {
    pub fn with_models(models: HashMap<String, ModelPricing>) -> Self {
        Self { models }
    }

    /// Exact id first, then the opus/sonnet/haiku family
    pub fn get_pricing(&self, model_name: &str) -> Option<&ModelPricing> {
        if let Some(pricing) = self.models.get(model_name) {
            return Some(pricing);
        }

        let lower = model_name.to_ascii_lowercase();
        let family = if lower.contains("opus") {
            &OPUS
        } else if lower.contains("sonnet") {
            &SONNET
        } else if lower.contains("haiku") {
            &HAIKU
        } else {
            return None;
        };
        Some(family)
    }
}

impl CostCalculator for EmbeddedPricing {
    fn cost_for(&self, event: &UsageEvent) -> Option<f64> {
        self.get_pricing(&event.model).map(|p| p.cost(event))
    }
}

/// How event costs are settled before aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostMode {
    /// Keep logged costs; calculate only where none was logged
    #[default]
    Auto,
    /// Always recalculate from tokens
    Calculate,
    /// Use logged costs as-is
    Display,
}

/// Fill event costs according to `mode`. Returns how many events changed.
pub fn fill_missing_costs(events: &mut [UsageEvent], calculator: &dyn CostCalculator, mode: CostMode) -> usize {
    if mode == CostMode::Display {
        return 0;
    }

    let mut filled = 0;
    let mut unknown = 0;
    for event in events.iter_mut() {
        if mode == CostMode::Auto && event.cost_usd > 0.0 {
            continue;
        }
        match calculator.cost_for(event) {
            Some(cost) => {
                event.cost_usd = cost;
                filled += 1;
            }
            None => unknown += 1,
        }
    }

    debug!(filled, unknown, mode = ?mode, "Settled event costs");
    filled
}
