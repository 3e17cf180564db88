#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Static per-model price table. `"default"` is used whenever the model is
/// unknown or absent from the table.
const PRICE_TABLE: &[(&str, ModelPrice)] = &[
    (
        "default",
        ModelPrice {
            input_per_million: 3.0,
            output_per_million: 15.0,
        },
    ),
    (
        "claude-opus",
        ModelPrice {
            input_per_million: 15.0,
            output_per_million: 75.0,
        },
    ),
    (
        "claude-sonnet",
        ModelPrice {
            input_per_million: 3.0,
            output_per_million: 15.0,
        },
    ),
    (
        "claude-haiku",
        ModelPrice {
            input_per_million: 0.8,
            output_per_million: 4.0,
        },
    ),
];

fn price_for(model: Option<&str>) -> ModelPrice {
    let key = model.unwrap_or("default");
    PRICE_TABLE
        .iter()
        .find(|(name, _)| *name == key)
        .or_else(|| PRICE_TABLE.iter().find(|(name, _)| *name == "default"))
        .map(|(_, price)| *price)
        .expect("default price entry must exist")
}

pub fn cost_usd(model: Option<&str>, tokens_input: u64, tokens_output: u64) -> f64 {
    let price = price_for(model);
    (tokens_input as f64 / 1_000_000.0) * price.input_per_million
        + (tokens_output as f64 / 1_000_000.0) * price.output_per_million
}
