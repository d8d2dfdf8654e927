use crate::id::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A material definition in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialDef {
    pub name: String,
}

/// A quantity of one material, used for recipe inputs and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialQty {
    pub material: MaterialId,
    pub quantity: u32,
}

impl MaterialQty {
    pub fn new(material: MaterialId, quantity: u32) -> Self {
        Self { material, quantity }
    }
}

/// A recipe definition: consumed inputs and produced outputs per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeDef {
    pub name: String,
    pub inputs: Vec<MaterialQty>,
    pub outputs: Vec<MaterialQty>,
}

/// Builder for constructing an immutable Registry.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    materials: Vec<MaterialDef>,
    material_name_to_id: BTreeMap<String, MaterialId>,
    recipes: Vec<RecipeDef>,
    recipe_name_to_id: BTreeMap<String, RecipeId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a material. Names are unique.
    pub fn register_material(&mut self, name: &str) -> Result<MaterialId, RegistryError> {
        if self.material_name_to_id.contains_key(name) {
            return Err(RegistryError::DuplicateMaterial(name.to_string()));
        }
        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(MaterialDef {
            name: name.to_string(),
        });
        self.material_name_to_id.insert(name.to_string(), id);
        Ok(id)
    }

    /// Register a recipe. Names are unique.
    pub fn register_recipe(
        &mut self,
        name: &str,
        inputs: Vec<MaterialQty>,
        outputs: Vec<MaterialQty>,
    ) -> Result<RecipeId, RegistryError> {
        if self.recipe_name_to_id.contains_key(name) {
            return Err(RegistryError::DuplicateRecipe(name.to_string()));
        }
        let id = RecipeId(self.recipes.len() as u32);
        self.recipes.push(RecipeDef {
            name: name.to_string(),
            inputs,
            outputs,
        });
        self.recipe_name_to_id.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn material_id(&self, name: &str) -> Option<MaterialId> {
        self.material_name_to_id.get(name).copied()
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        self.recipe_name_to_id.get(name).copied()
    }

    /// Finalize and build the immutable registry.
    pub fn build(self) -> Result<Registry, RegistryError> {
        for recipe in &self.recipes {
            for entry in recipe.inputs.iter().chain(recipe.outputs.iter()) {
                if entry.material.0 as usize >= self.materials.len() {
                    return Err(RegistryError::InvalidMaterialRef {
                        recipe: recipe.name.clone(),
                        material: entry.material,
                    });
                }
                if entry.quantity == 0 {
                    return Err(RegistryError::ZeroQuantity(recipe.name.clone()));
                }
            }
        }

        Ok(Registry {
            materials: self.materials,
            material_name_to_id: self.material_name_to_id,
            recipes: self.recipes,
            recipe_name_to_id: self.recipe_name_to_id,
        })
    }
}

/// Immutable registry of materials and recipes. Frozen after build().
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    materials: Vec<MaterialDef>,
    material_name_to_id: BTreeMap<String, MaterialId>,
    recipes: Vec<RecipeDef>,
    recipe_name_to_id: BTreeMap<String, RecipeId>,
}

impl Registry {
    pub fn get_material(&self, id: MaterialId) -> Option<&MaterialDef> {
        self.materials.get(id.0 as usize)
    }

    pub fn get_recipe(&self, id: RecipeId) -> Option<&RecipeDef> {
        self.recipes.get(id.0 as usize)
    }

    pub fn material_id(&self, name: &str) -> Option<MaterialId> {
        self.material_name_to_id.get(name).copied()
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        self.recipe_name_to_id.get(name).copied()
    }

    pub fn material_name(&self, id: MaterialId) -> Option<&str> {
        self.get_material(id).map(|m| m.name.as_str())
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate material: {0}")]
    DuplicateMaterial(String),
    #[error("duplicate recipe: {0}")]
    DuplicateRecipe(String),
    #[error("recipe {recipe} references unknown material {material:?}")]
    InvalidMaterialRef { recipe: String, material: MaterialId },
    #[error("recipe {0} has a zero quantity entry")]
    ZeroQuantity(String),
}
