//! Plant layout: the graph description returned by `Persistence::load_graph`.
//!
//! Everything references everything else by name. [`build`] resolves the
//! names, validates the graph and produces the registry, the initial
//! simulation state and a [`NameIndex`] for callers that think in names.

use crate::config::EngineConfig;
use crate::fixed::f64_to_fixed64;
use crate::id::*;
use crate::inventory::{InventoryOwner, Lane};
use crate::model::{Location, Machine, Resource, ResourceKind, Worker, WorkerRole};
use crate::order::{OrderError, OrderSpec};
use crate::process::{ProcessStep, StepState};
use crate::registry::{MaterialQty, Registry, RegistryBuilder, RegistryError};
use crate::sensor::{Sensor, SensorKind, SensorTarget};
use crate::sim::UnitStatus;
use crate::state::SimulationState;
use crate::transport::{
    ExternalSupply, Filter, FilterMode, Supply, TransportKind, TransportStats, TransportSystem,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

// ===========================================================================
// Layout structs
// ===========================================================================

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialAmount {
    pub material: String,
    pub quantity: u32,
}

impl MaterialAmount {
    pub fn new(material: &str, quantity: u32) -> Self {
        Self {
            material: material.to_string(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeLayout {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<MaterialAmount>,
    #[serde(default)]
    pub outputs: Vec<MaterialAmount>,
}

/// Inline inventory of a step or transport, with optional initial contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLayout {
    pub limit: u32,
    #[serde(default)]
    pub input: Vec<MaterialAmount>,
    #[serde(default)]
    pub output: Vec<MaterialAmount>,
}

impl InventoryLayout {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            input: Vec::new(),
            output: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationLayout {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStepLayout {
    pub name: String,
    pub location: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_one")]
    pub input_speed: u32,
    #[serde(default = "default_one")]
    pub output_speed: u32,
    #[serde(default = "default_one")]
    pub recipe_rate: u32,
    #[serde(default = "default_one")]
    pub duration: u32,
    #[serde(default)]
    pub error_rate: f64,
    pub recipe: Option<String>,
    pub inventory: InventoryLayout,
}

impl ProcessStepLayout {
    pub fn new(name: &str, limit: u32) -> Self {
        Self {
            name: name.to_string(),
            location: None,
            active: true,
            input_speed: 1,
            output_speed: 1,
            recipe_rate: 1,
            duration: 1,
            error_rate: 0.0,
            recipe: None,
            inventory: InventoryLayout::new(limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterLayout {
    pub mode: FilterMode,
    pub materials: Vec<String>,
}

/// External supply for a transport without a start step. No limit means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyLayout {
    pub material: String,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportLayout {
    pub name: String,
    #[serde(default)]
    pub kind: TransportKind,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_one")]
    pub input_speed: u32,
    #[serde(default = "default_one")]
    pub output_speed: u32,
    #[serde(default)]
    pub min_quantity: u32,
    #[serde(default)]
    pub transport_delay: u32,
    pub start: Option<String>,
    pub end: Option<String>,
    pub filter: Option<FilterLayout>,
    pub supply: Option<SupplyLayout>,
    pub inventory: InventoryLayout,
}

impl TransportLayout {
    pub fn new(name: &str, start: Option<&str>, end: Option<&str>, limit: u32) -> Self {
        Self {
            name: name.to_string(),
            kind: TransportKind::default(),
            active: true,
            input_speed: 1,
            output_speed: 1,
            min_quantity: 0,
            transport_delay: 0,
            start: start.map(str::to_string),
            end: end.map(str::to_string),
            filter: None,
            supply: None,
            inventory: InventoryLayout::new(limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorLayout {
    pub name: String,
    pub kind: SensorKind,
    pub process_step: Option<String>,
    pub transport: Option<String>,
    pub material: Option<String>,
    #[serde(default)]
    pub sensor_delay: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLayout {
    pub name: String,
    pub material: String,
    pub quantity: u32,
    #[serde(default)]
    pub priority: i32,
    pub due_tick: Option<u64>,
    #[serde(default)]
    pub process_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineLayout {
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLayout {
    pub role: Option<String>,
}

/// A resource in the file format. Exactly one of `machine` or `worker` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLayout {
    pub name: String,
    pub location: Option<String>,
    pub process_step: Option<String>,
    pub machine: Option<MachineLayout>,
    pub worker: Option<WorkerLayout>,
}

/// The full plant graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlantLayout {
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub recipes: Vec<RecipeLayout>,
    #[serde(default)]
    pub locations: Vec<LocationLayout>,
    #[serde(default)]
    pub worker_roles: Vec<String>,
    #[serde(default)]
    pub resources: Vec<ResourceLayout>,
    #[serde(default)]
    pub process_steps: Vec<ProcessStepLayout>,
    #[serde(default)]
    pub transport_systems: Vec<TransportLayout>,
    #[serde(default)]
    pub sensors: Vec<SensorLayout>,
    #[serde(default)]
    pub orders: Vec<OrderLayout>,
}

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unresolved {kind} reference '{name}' in {context}")]
    Unresolved {
        kind: &'static str,
        name: String,
        context: String,
    },

    #[error("duplicate {kind} name '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("process step '{step}' names recipe '{recipe}', which does not exist")]
    NoRecipe { step: String, recipe: String },

    #[error("transport '{0}' has no start step and no supply")]
    MissingSupply(String),

    #[error("sensor '{0}' must target exactly one process step or transport")]
    SensorTarget(String),

    #[error("resource '{0}' must be exactly one of machine or worker")]
    ResourceKind(String),

    #[error("inventory of '{owner}' starts with {count} entries over limit {limit}")]
    InitialOverLimit { owner: String, count: u32, limit: u32 },

    #[error(
        "transport '{transport}' batches {min_quantity} units but moves at most {input_speed} per tick into a buffer of {limit}"
    )]
    BatchUnreachable {
        transport: String,
        min_quantity: u32,
        input_speed: u32,
        limit: u32,
    },

    #[error("process step '{step}' has error rate {value} outside [0, 1]")]
    ErrorRate { step: String, value: f64 },

    #[error("order '{name}': {source}")]
    Order {
        name: String,
        #[source]
        source: OrderError,
    },
}

// ===========================================================================
// Name index
// ===========================================================================

/// Name to id lookups for everything a layout declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameIndex {
    pub locations: BTreeMap<String, LocationId>,
    pub worker_roles: BTreeMap<String, WorkerRoleId>,
    pub resources: BTreeMap<String, ResourceId>,
    pub steps: BTreeMap<String, ProcessStepId>,
    pub transports: BTreeMap<String, TransportId>,
    pub sensors: BTreeMap<String, SensorId>,
    pub orders: BTreeMap<String, OrderId>,
}

impl NameIndex {
    pub fn step(&self, name: &str) -> Option<ProcessStepId> {
        self.steps.get(name).copied()
    }

    pub fn transport(&self, name: &str) -> Option<TransportId> {
        self.transports.get(name).copied()
    }

    pub fn sensor(&self, name: &str) -> Option<SensorId> {
        self.sensors.get(name).copied()
    }

    pub fn order(&self, name: &str) -> Option<OrderId> {
        self.orders.get(name).copied()
    }

    pub fn location(&self, name: &str) -> Option<LocationId> {
        self.locations.get(name).copied()
    }

    pub fn resource(&self, name: &str) -> Option<ResourceId> {
        self.resources.get(name).copied()
    }
}

// ===========================================================================
// Resolution
// ===========================================================================

fn resolve<V: Copy>(
    map: &BTreeMap<String, V>,
    name: &str,
    kind: &'static str,
    context: &str,
) -> Result<V, LayoutError> {
    map.get(name).copied().ok_or_else(|| LayoutError::Unresolved {
        kind,
        name: name.to_string(),
        context: context.to_string(),
    })
}

fn check_duplicate<V>(map: &BTreeMap<String, V>, name: &str, kind: &'static str) -> Result<(), LayoutError> {
    if map.contains_key(name) {
        Err(LayoutError::Duplicate {
            kind,
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

fn material(registry: &Registry, name: &str, context: &str) -> Result<MaterialId, LayoutError> {
    registry.material_id(name).ok_or_else(|| LayoutError::Unresolved {
        kind: "material",
        name: name.to_string(),
        context: context.to_string(),
    })
}

fn build_registry(layout: &PlantLayout) -> Result<Registry, LayoutError> {
    let mut builder = RegistryBuilder::new();
    for name in &layout.materials {
        builder.register_material(name)?;
    }
    for recipe in &layout.recipes {
        let amounts = |list: &[MaterialAmount]| -> Result<Vec<MaterialQty>, LayoutError> {
            list.iter()
                .map(|a| {
                    let id = builder.material_id(&a.material).ok_or_else(|| LayoutError::Unresolved {
                        kind: "material",
                        name: a.material.clone(),
                        context: format!("recipe '{}'", recipe.name),
                    })?;
                    Ok(MaterialQty::new(id, a.quantity))
                })
                .collect()
        };
        let inputs = amounts(&recipe.inputs)?;
        let outputs = amounts(&recipe.outputs)?;
        builder.register_recipe(&recipe.name, inputs, outputs)?;
    }
    Ok(builder.build()?)
}

/// Fill a fresh inventory with its declared initial contents.
fn stock(
    state: &mut SimulationState,
    registry: &Registry,
    inventory: InventoryId,
    spec: &InventoryLayout,
    owner: &str,
) -> Result<(), LayoutError> {
    let count: u32 = spec.input.iter().chain(&spec.output).map(|a| a.quantity).sum();
    if count > spec.limit {
        return Err(LayoutError::InitialOverLimit {
            owner: owner.to_string(),
            count,
            limit: spec.limit,
        });
    }
    let context = format!("inventory of '{owner}'");
    let lanes = [(Lane::Input, &spec.input), (Lane::Output, &spec.output)];
    for (lane, amounts) in lanes {
        for amount in amounts {
            let id = material(registry, &amount.material, &context)?;
            if let Some(inv) = state.inventories.get_mut(inventory) {
                // Limit was checked above, so this cannot overflow.
                let _ = inv.add(lane, id, amount.quantity, None, 0);
            }
        }
    }
    state.ledger.initial += u64::from(count);
    Ok(())
}

/// Resolve a layout into a registry, an initial state and a name index.
pub(crate) fn build(
    layout: &PlantLayout,
    config: &EngineConfig,
) -> Result<(Registry, SimulationState, NameIndex), LayoutError> {
    let registry = build_registry(layout)?;
    let mut state = SimulationState::new(config.log_capacity);
    let mut index = NameIndex::default();

    for location in &layout.locations {
        check_duplicate(&index.locations, &location.name, "location")?;
        let id = state.locations.insert(Location {
            name: location.name.clone(),
        });
        index.locations.insert(location.name.clone(), id);
    }
    for role in &layout.worker_roles {
        check_duplicate(&index.worker_roles, role, "worker role")?;
        let id = state.worker_roles.insert(WorkerRole { name: role.clone() });
        index.worker_roles.insert(role.clone(), id);
    }

    // -- Process steps --
    for spec in &layout.process_steps {
        check_duplicate(&index.steps, &spec.name, "process step")?;
        let context = format!("process step '{}'", spec.name);
        let location = spec
            .location
            .as_deref()
            .map(|name| resolve(&index.locations, name, "location", &context))
            .transpose()?;
        let recipe = match &spec.recipe {
            Some(name) => Some(registry.recipe_id(name).ok_or_else(|| LayoutError::NoRecipe {
                step: spec.name.clone(),
                recipe: name.clone(),
            })?),
            None => None,
        };
        if !(0.0..=1.0).contains(&spec.error_rate) {
            return Err(LayoutError::ErrorRate {
                step: spec.name.clone(),
                value: spec.error_rate,
            });
        }

        let inventories = &mut state.inventories;
        let id = state.steps.insert_with_key(|key| ProcessStep {
            name: spec.name.clone(),
            location,
            active: spec.active,
            status: UnitStatus::Idle,
            input_speed: spec.input_speed,
            output_speed: spec.output_speed,
            recipe_rate: spec.recipe_rate,
            duration: spec.duration,
            error_rate: f64_to_fixed64(spec.error_rate),
            inventory: inventories.create(InventoryOwner::ProcessStep(key), spec.inventory.limit),
            recipe,
            inbound: Vec::new(),
            outbound: Vec::new(),
        });
        state.step_states.insert(id, StepState::default());
        let inventory = state.steps[id].inventory;
        stock(&mut state, &registry, inventory, &spec.inventory, &spec.name)?;
        index.steps.insert(spec.name.clone(), id);
    }

    // -- Transport systems --
    for spec in &layout.transport_systems {
        check_duplicate(&index.transports, &spec.name, "transport")?;
        let context = format!("transport '{}'", spec.name);
        let start = spec
            .start
            .as_deref()
            .map(|name| resolve(&index.steps, name, "process step", &context))
            .transpose()?;
        let end = spec
            .end
            .as_deref()
            .map(|name| resolve(&index.steps, name, "process step", &context))
            .transpose()?;
        let supply = match (&spec.supply, start) {
            (Some(supply), _) => Some(ExternalSupply {
                material: material(&registry, &supply.material, &context)?,
                supply: match supply.limit {
                    Some(remaining) => Supply::Finite { remaining },
                    None => Supply::Unlimited,
                },
            }),
            (None, Some(_)) => None,
            (None, None) => return Err(LayoutError::MissingSupply(spec.name.clone())),
        };
        // A batch must fit in one tick's pickup, or the transport never departs.
        if spec.min_quantity > spec.input_speed || spec.min_quantity > spec.inventory.limit {
            return Err(LayoutError::BatchUnreachable {
                transport: spec.name.clone(),
                min_quantity: spec.min_quantity,
                input_speed: spec.input_speed,
                limit: spec.inventory.limit,
            });
        }
        let filter = match &spec.filter {
            Some(filter) => {
                let materials = filter
                    .materials
                    .iter()
                    .map(|m| material(&registry, m, &context))
                    .collect::<Result<Vec<_>, _>>()?;
                Some(Filter::new(filter.mode, &materials, 0))
            }
            None => None,
        };

        let inventories = &mut state.inventories;
        let id = state.transports.insert_with_key(|key| TransportSystem {
            name: spec.name.clone(),
            kind: spec.kind,
            active: spec.active,
            status: UnitStatus::Idle,
            input_speed: spec.input_speed,
            output_speed: spec.output_speed,
            min_quantity: spec.min_quantity,
            transport_delay: spec.transport_delay,
            filter,
            start,
            end,
            supply,
            inventory: inventories.create(InventoryOwner::Transport(key), spec.inventory.limit),
        });
        state.transport_stats.insert(id, TransportStats::default());
        if let Some(step) = start.and_then(|s| state.steps.get_mut(s)) {
            step.outbound.push(id);
        }
        if let Some(step) = end.and_then(|s| state.steps.get_mut(s)) {
            step.inbound.push(id);
        }
        let inventory = state.transports[id].inventory;
        stock(&mut state, &registry, inventory, &spec.inventory, &spec.name)?;
        index.transports.insert(spec.name.clone(), id);
    }

    // -- Resources --
    for spec in &layout.resources {
        check_duplicate(&index.resources, &spec.name, "resource")?;
        let context = format!("resource '{}'", spec.name);
        let kind = match (&spec.machine, &spec.worker) {
            (Some(machine), None) => ResourceKind::Machine(Machine {
                model: machine.model.clone(),
            }),
            (None, Some(worker)) => ResourceKind::Worker(Worker {
                role: worker
                    .role
                    .as_deref()
                    .map(|name| resolve(&index.worker_roles, name, "worker role", &context))
                    .transpose()?,
            }),
            _ => return Err(LayoutError::ResourceKind(spec.name.clone())),
        };
        let resource = Resource {
            name: spec.name.clone(),
            location: spec
                .location
                .as_deref()
                .map(|name| resolve(&index.locations, name, "location", &context))
                .transpose()?,
            process_step: spec
                .process_step
                .as_deref()
                .map(|name| resolve(&index.steps, name, "process step", &context))
                .transpose()?,
            kind,
        };
        let id = state.resources.insert(resource);
        index.resources.insert(spec.name.clone(), id);
    }

    // -- Sensors --
    for spec in &layout.sensors {
        check_duplicate(&index.sensors, &spec.name, "sensor")?;
        let context = format!("sensor '{}'", spec.name);
        let target = match (&spec.process_step, &spec.transport) {
            (Some(step), None) => {
                SensorTarget::ProcessStep(resolve(&index.steps, step, "process step", &context)?)
            }
            (None, Some(transport)) => {
                SensorTarget::Transport(resolve(&index.transports, transport, "transport", &context)?)
            }
            _ => return Err(LayoutError::SensorTarget(spec.name.clone())),
        };
        let mut sensor = Sensor::new(&spec.name, spec.kind, target);
        sensor.sensor_delay = spec.sensor_delay;
        sensor.material = spec
            .material
            .as_deref()
            .map(|m| material(&registry, m, &context))
            .transpose()?;
        let id = state.sensors.insert(sensor);
        index.sensors.insert(spec.name.clone(), id);
    }

    // -- Orders --
    for spec in &layout.orders {
        check_duplicate(&index.orders, &spec.name, "order")?;
        let context = format!("order '{}'", spec.name);
        let assigned_steps = spec
            .process_steps
            .iter()
            .map(|name| resolve(&index.steps, name, "process step", &context))
            .collect::<Result<Vec<_>, _>>()?;
        let order = OrderSpec {
            name: Some(spec.name.clone()),
            material: material(&registry, &spec.material, &context)?,
            quantity: spec.quantity,
            priority: spec.priority,
            due_tick: spec.due_tick,
            assigned_steps,
        };
        let id = state
            .orders
            .create(order, 0)
            .map_err(|source| LayoutError::Order {
                name: spec.name.clone(),
                source,
            })?;
        index.orders.insert(spec.name.clone(), id);
    }

    debug!(
        steps = state.steps.len(),
        transports = state.transports.len(),
        sensors = state.sensors.len(),
        orders = state.orders.len(),
        "layout resolved"
    );
    Ok((registry, state, index))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PlantLayout {
        let mut smelter = ProcessStepLayout::new("smelter", 10);
        smelter.recipe = Some("smelt".into());
        smelter.inventory.input.push(MaterialAmount::new("ore", 3));
        let mut feed = TransportLayout::new("feed", None, Some("smelter"), 5);
        feed.supply = Some(SupplyLayout {
            material: "ore".into(),
            limit: Some(20),
        });
        PlantLayout {
            materials: vec!["ore".into(), "ingot".into()],
            recipes: vec![RecipeLayout {
                name: "smelt".into(),
                inputs: vec![MaterialAmount::new("ore", 1)],
                outputs: vec![MaterialAmount::new("ingot", 1)],
            }],
            process_steps: vec![smelter],
            transport_systems: vec![feed],
            ..PlantLayout::default()
        }
    }

    #[test]
    fn builds_graph_with_links() {
        let (registry, state, index) = build(&base(), &EngineConfig::default()).unwrap();
        assert_eq!(registry.material_count(), 2);
        let smelter = index.step("smelter").unwrap();
        let feed = index.transport("feed").unwrap();
        assert_eq!(state.steps[smelter].inbound, vec![feed]);
        assert_eq!(state.transports[feed].end, Some(smelter));
        assert_eq!(state.ledger.initial, 3);
        let inv = state.inventories.snapshot(state.steps[smelter].inventory).unwrap();
        assert_eq!(inv.owner(), InventoryOwner::ProcessStep(smelter));
        assert_eq!(inv.len(), 3);
    }

    #[test]
    fn missing_recipe_is_a_load_error() {
        let mut layout = base();
        layout.process_steps[0].recipe = Some("forge".into());
        assert!(matches!(
            build(&layout, &EngineConfig::default()),
            Err(LayoutError::NoRecipe { recipe, .. }) if recipe == "forge"
        ));
    }

    #[test]
    fn transport_without_source_needs_supply() {
        let mut layout = base();
        layout.transport_systems[0].supply = None;
        assert!(matches!(
            build(&layout, &EngineConfig::default()),
            Err(LayoutError::MissingSupply(name)) if name == "feed"
        ));
    }

    #[test]
    fn unknown_step_reference() {
        let mut layout = base();
        layout.transport_systems[0].end = Some("nowhere".into());
        assert!(matches!(
            build(&layout, &EngineConfig::default()),
            Err(LayoutError::Unresolved { kind: "process step", .. })
        ));
    }

    #[test]
    fn duplicate_step_names() {
        let mut layout = base();
        layout.process_steps.push(ProcessStepLayout::new("smelter", 1));
        assert!(matches!(
            build(&layout, &EngineConfig::default()),
            Err(LayoutError::Duplicate { kind: "process step", .. })
        ));
    }

    #[test]
    fn sensor_needs_exactly_one_target() {
        let mut layout = base();
        layout.sensors.push(SensorLayout {
            name: "both".into(),
            kind: SensorKind::Status,
            process_step: Some("smelter".into()),
            transport: Some("feed".into()),
            material: None,
            sensor_delay: 0,
        });
        assert!(matches!(
            build(&layout, &EngineConfig::default()),
            Err(LayoutError::SensorTarget(_))
        ));
    }

    #[test]
    fn resource_needs_exactly_one_kind() {
        let mut layout = base();
        layout.resources.push(ResourceLayout {
            name: "ghost".into(),
            location: None,
            process_step: None,
            machine: None,
            worker: None,
        });
        assert!(matches!(
            build(&layout, &EngineConfig::default()),
            Err(LayoutError::ResourceKind(_))
        ));
    }

    #[test]
    fn initial_contents_over_limit() {
        let mut layout = base();
        layout.process_steps[0].inventory.output.push(MaterialAmount::new("ingot", 8));
        assert!(matches!(
            build(&layout, &EngineConfig::default()),
            Err(LayoutError::InitialOverLimit { count: 11, limit: 10, .. })
        ));
    }

    #[test]
    fn batch_larger_than_pickup_is_rejected() {
        let mut layout = base();
        layout.transport_systems[0].min_quantity = 3;
        assert!(matches!(
            build(&layout, &EngineConfig::default()),
            Err(LayoutError::BatchUnreachable { min_quantity: 3, input_speed: 1, .. })
        ));

        layout.transport_systems[0].input_speed = 6;
        layout.transport_systems[0].min_quantity = 6;
        assert!(matches!(
            build(&layout, &EngineConfig::default()),
            Err(LayoutError::BatchUnreachable { limit: 5, .. })
        ));

        layout.transport_systems[0].min_quantity = 5;
        assert!(build(&layout, &EngineConfig::default()).is_ok());
    }

    #[test]
    fn error_rate_out_of_range() {
        let mut layout = base();
        layout.process_steps[0].error_rate = 1.5;
        assert!(matches!(
            build(&layout, &EngineConfig::default()),
            Err(LayoutError::ErrorRate { .. })
        ));
    }

    #[test]
    fn layout_parses_from_json_with_defaults() {
        let json = r#"{
            "materials": ["ore"],
            "process_steps": [{ "name": "bin", "inventory": { "limit": 4 } }],
            "transport_systems": [{
                "name": "in", "end": "bin", "kind": "agv",
                "supply": { "material": "ore" }, "inventory": { "limit": 2 }
            }]
        }"#;
        let layout: PlantLayout = serde_json::from_str(json).unwrap();
        assert!(layout.process_steps[0].active);
        assert_eq!(layout.process_steps[0].duration, 1);
        assert_eq!(layout.transport_systems[0].kind, TransportKind::Agv);
        let (_, state, index) = build(&layout, &EngineConfig::default()).unwrap();
        let t = index.transport("in").unwrap();
        assert_eq!(
            state.transports[t].supply.as_ref().unwrap().supply,
            Supply::Unlimited
        );
    }
}
