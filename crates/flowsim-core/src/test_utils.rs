//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::fixed::Fixed64;
use crate::layout::*;
use crate::sensor::SensorKind;
use crate::sim::TickReport;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Layouts
// ===========================================================================

fn recipe(name: &str, inputs: &[(&str, u32)], outputs: &[(&str, u32)]) -> RecipeLayout {
    RecipeLayout {
        name: name.to_string(),
        inputs: inputs.iter().map(|&(m, q)| MaterialAmount::new(m, q)).collect(),
        outputs: outputs.iter().map(|&(m, q)| MaterialAmount::new(m, q)).collect(),
    }
}

fn supplied_feed(name: &str, end: &str, material: &str) -> TransportLayout {
    let mut feed = TransportLayout::new(name, None, Some(end), 4);
    feed.input_speed = 2;
    feed.output_speed = 2;
    feed.transport_delay = 1;
    feed.supply = Some(SupplyLayout {
        material: material.to_string(),
        limit: None,
    });
    feed
}

/// Unlimited ore feeding one smelter (1 ore -> 1 ingot, two ticks, two
/// cycles per start).
pub fn smelter_line() -> PlantLayout {
    let mut smelter = ProcessStepLayout::new("smelter", 20);
    smelter.input_speed = 2;
    smelter.recipe_rate = 2;
    smelter.duration = 2;
    smelter.recipe = Some("smelt".into());

    PlantLayout {
        materials: vec!["ore".into(), "ingot".into()],
        recipes: vec![recipe("smelt", &[("ore", 1)], &[("ingot", 1)])],
        process_steps: vec![smelter],
        transport_systems: vec![supplied_feed("feed", "smelter", "ore")],
        ..PlantLayout::default()
    }
}

/// Smelter feeding a press (2 ingot -> 1 plate) that exports through a sink.
pub fn press_line() -> PlantLayout {
    let mut layout = smelter_line();
    layout.materials.push("plate".into());
    layout
        .recipes
        .push(recipe("press", &[("ingot", 2)], &[("plate", 1)]));

    let mut press = ProcessStepLayout::new("press", 20);
    press.input_speed = 2;
    press.recipe = Some("press".into());
    layout.process_steps.push(press);

    let mut link = TransportLayout::new("link", Some("smelter"), Some("press"), 6);
    link.input_speed = 2;
    link.output_speed = 2;
    link.transport_delay = 1;
    layout.transport_systems.push(link);

    let mut out = TransportLayout::new("out", Some("press"), None, 6);
    out.input_speed = 2;
    out.output_speed = 2;
    layout.transport_systems.push(out);
    layout
}

/// `lines` independent copies of the press line, names suffixed with the
/// line number. Each copy is its own partition.
pub fn parallel_lines(lines: usize) -> PlantLayout {
    let base = press_line();
    let mut layout = PlantLayout {
        materials: base.materials.clone(),
        recipes: base.recipes.clone(),
        ..PlantLayout::default()
    };
    let suffix = |name: &str, i: usize| format!("{name}-{i}");
    for i in 0..lines {
        for step in &base.process_steps {
            let mut step = step.clone();
            step.name = suffix(&step.name, i);
            layout.process_steps.push(step);
        }
        for transport in &base.transport_systems {
            let mut transport = transport.clone();
            transport.name = suffix(&transport.name, i);
            transport.start = transport.start.map(|s| suffix(&s, i));
            transport.end = transport.end.map(|s| suffix(&s, i));
            layout.transport_systems.push(transport);
        }
    }
    layout
}

pub fn step_sensor(name: &str, kind: SensorKind, step: &str) -> SensorLayout {
    SensorLayout {
        name: name.to_string(),
        kind,
        process_step: Some(step.to_string()),
        transport: None,
        material: None,
        sensor_delay: 0,
    }
}

pub fn status_sensor(name: &str, step: &str) -> SensorLayout {
    step_sensor(name, SensorKind::Status, step)
}

pub fn order(name: &str, material: &str, quantity: u32, step: &str) -> OrderLayout {
    OrderLayout {
        name: name.to_string(),
        material: material.to_string(),
        quantity,
        priority: 0,
        due_tick: None,
        process_steps: vec![step.to_string()],
    }
}

// ===========================================================================
// Engine helpers
// ===========================================================================

pub fn build(layout: &PlantLayout, config: EngineConfig) -> (Engine, NameIndex) {
    Engine::from_layout(layout, config).expect("test layout builds")
}

/// Run `n` ticks, panicking on any coordinator error.
pub fn run_ticks(engine: &mut Engine, n: u64) -> Vec<TickReport> {
    (0..n)
        .map(|_| engine.step().expect("tick commits"))
        .collect()
}
