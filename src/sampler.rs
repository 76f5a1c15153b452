//! Weighted trait selection.

use rand::Rng;

use crate::catalog::{Layer, TraitElement};
use crate::error::{EngineError, EngineResult};

/// Draws elements with probability proportional to their rarity weight.
///
/// Stateless; the only side effect is consuming the random source.
pub struct WeightedSampler;

impl WeightedSampler {
    /// Pick one element of `layer`.
    ///
    /// Walks elements in declaration order subtracting weights from a uniform
    /// draw in `[0, total)`, so ties always resolve toward the earliest element.
    pub fn sample<'a, R: Rng>(
        layer: &'a Layer,
        rng: &mut R,
    ) -> EngineResult<&'a TraitElement> {
        let total = layer.total_weight();
        if total == 0 {
            return Err(EngineError::configuration(format!(
                "layer '{}' has a total rarity weight of zero",
                layer.name
            )));
        }

        let mut remaining = rng.gen_range(0..total) as i64;
        for element in &layer.elements {
            remaining -= i64::from(element.weight);
            if remaining < 0 {
                return Ok(element);
            }
        }

        Err(EngineError::configuration(format!(
            "weighted draw ran past the last element of layer '{}'",
            layer.name
        )))
    }
}
