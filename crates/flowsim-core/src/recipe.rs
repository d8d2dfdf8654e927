//! Recipe resolution for process steps.
//!
//! A step either references a recipe or has none. Without one, the step is a
//! pass-through and never transforms material.

use crate::id::{MaterialId, RecipeId};
use crate::registry::{MaterialQty, Registry};
use serde::{Deserialize, Serialize};

/// Per-cycle inputs and outputs of a step, with duplicate materials merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRecipe {
    pub id: RecipeId,
    pub inputs: Vec<MaterialQty>,
    pub outputs: Vec<MaterialQty>,
}

impl ResolvedRecipe {
    /// Units consumed by one cycle.
    pub fn total_input(&self) -> u32 {
        self.inputs.iter().map(|i| i.quantity).sum()
    }

    /// Units produced by one cycle.
    pub fn total_output(&self) -> u32 {
        self.outputs.iter().map(|o| o.quantity).sum()
    }

    pub fn produces(&self, material: MaterialId) -> bool {
        self.outputs.iter().any(|o| o.material == material)
    }

    /// Units of `material` produced by one cycle.
    pub fn output_of(&self, material: MaterialId) -> u32 {
        self.outputs
            .iter()
            .filter(|o| o.material == material)
            .map(|o| o.quantity)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RecipeError {
    #[error("process step has no recipe")]
    NoRecipe,
    #[error("unknown recipe {0:?}")]
    UnknownRecipe(RecipeId),
}

/// Resolve a step's recipe reference. `Err(NoRecipe)` marks a pass-through step.
pub fn resolve(registry: &Registry, recipe: Option<RecipeId>) -> Result<ResolvedRecipe, RecipeError> {
    let id = recipe.ok_or(RecipeError::NoRecipe)?;
    let def = registry
        .get_recipe(id)
        .ok_or(RecipeError::UnknownRecipe(id))?;
    Ok(ResolvedRecipe {
        id,
        inputs: merge(&def.inputs),
        outputs: merge(&def.outputs),
    })
}

/// Combine repeated materials, keeping first-appearance order.
fn merge(entries: &[MaterialQty]) -> Vec<MaterialQty> {
    let mut merged: Vec<MaterialQty> = Vec::with_capacity(entries.len());
    for entry in entries {
        match merged.iter_mut().find(|m| m.material == entry.material) {
            Some(existing) => existing.quantity += entry.quantity,
            None => merged.push(*entry),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;

    fn registry() -> Registry {
        let mut b = RegistryBuilder::new();
        let ore = b.register_material("ore").unwrap();
        let coal = b.register_material("coal").unwrap();
        let ingot = b.register_material("ingot").unwrap();
        let slag = b.register_material("slag").unwrap();
        b.register_recipe(
            "smelt",
            vec![MaterialQty::new(ore, 1), MaterialQty::new(coal, 1), MaterialQty::new(ore, 1)],
            vec![MaterialQty::new(ingot, 1), MaterialQty::new(slag, 2)],
        )
        .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn resolves_and_merges_duplicates() {
        let reg = registry();
        let recipe = resolve(&reg, reg.recipe_id("smelt")).unwrap();
        assert_eq!(
            recipe.inputs,
            vec![MaterialQty::new(MaterialId(0), 2), MaterialQty::new(MaterialId(1), 1)]
        );
        assert_eq!(recipe.total_input(), 3);
        assert_eq!(recipe.total_output(), 3);
        assert!(recipe.produces(MaterialId(2)));
        assert_eq!(recipe.output_of(MaterialId(3)), 2);
    }

    #[test]
    fn missing_recipe_is_pass_through() {
        let reg = registry();
        assert_eq!(resolve(&reg, None), Err(RecipeError::NoRecipe));
    }

    #[test]
    fn unknown_recipe_is_reported() {
        let reg = registry();
        assert_eq!(
            resolve(&reg, Some(RecipeId(42))),
            Err(RecipeError::UnknownRecipe(RecipeId(42)))
        );
    }
}
