use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};

/// USD per million tokens.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

/// Applied to any model missing from the table. This is a pricing policy
/// choice, not a measured rate.
pub const DEFAULT_PRICE: ModelPrice = ModelPrice {
    input: 1.00,
    output: 5.00,
};

const BUILTIN_PRICES: &[(&str, ModelPrice)] = &[
    (
        "claude-3-5-haiku-20241022",
        ModelPrice {
            input: 0.80,
            output: 4.00,
        },
    ),
    (
        "claude-haiku-4-5-20250414",
        ModelPrice {
            input: 1.00,
            output: 5.00,
        },
    ),
];

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    #[serde(default)]
    pub models: HashMap<String, ModelPrice>,
    #[serde(default)]
    pub default: Option<ModelPrice>,
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let configured = self
            .models
            .iter()
            .map(|(name, price)| (name.as_str(), price))
            .chain(self.default.iter().map(|price| ("default", price)));
        for (name, price) in configured {
            for value in [price.input, price.output] {
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::new(ErrorDetails::Config {
                        message: format!(
                            "`pricing.models.{name}`: prices must be finite and non-negative"
                        ),
                    }));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PricingTable {
    models: HashMap<String, ModelPrice>,
    default: ModelPrice,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new(&PricingConfig::default())
    }
}

impl PricingTable {
    /// Built-in prices, overridden entry by entry by the config.
    pub fn new(config: &PricingConfig) -> Self {
        let mut models: HashMap<String, ModelPrice> = BUILTIN_PRICES
            .iter()
            .map(|(name, price)| (name.to_string(), *price))
            .collect();
        models.extend(config.models.iter().map(|(k, v)| (k.clone(), *v)));
        Self {
            models,
            default: config.default.unwrap_or(DEFAULT_PRICE),
        }
    }

    pub fn price_for(&self, model: &str) -> ModelPrice {
        match self.models.get(model) {
            Some(price) => *price,
            None => {
                tracing::debug!("No pricing configured for model `{model}`, using default rate");
                self.default
            }
        }
    }

    /// Cost of a call in USD, rounded to 6 decimal places. Never negative.
    pub fn cost_usd(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let price = self.price_for(model);
        let raw = (input_tokens as f64 * price.input + output_tokens as f64 * price.output)
            / 1_000_000.0;
        round_usd(raw)
    }
}

pub fn round_usd(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    ((value * 1_000_000.0).round() / 1_000_000.0).max(0.0)
}
