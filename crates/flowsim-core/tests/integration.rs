//! Integration tests across engine, layout, sensors, orders and queries.

use flowsim_core::config::EngineConfig;
use flowsim_core::engine::Engine;
use flowsim_core::fixed::{Fixed64, count_to_fixed64};
use flowsim_core::inventory::Lane;
use flowsim_core::layout::*;
use flowsim_core::sensor::{LogInputType, SensorKind};
use flowsim_core::sim::UnitStatus;
use flowsim_core::test_utils::*;
use flowsim_core::transport::FilterMode;

#[test]
fn press_line_exports_plates() {
    let (mut engine, names) = build(&press_line(), EngineConfig::default());
    let reports = run_ticks(&mut engine, 40);

    let out = names.transport("out").unwrap();
    let exported = engine.get_transport_stats(out).unwrap().exported;
    assert!(exported > 0, "no plates left the plant");
    assert_eq!(engine.ledger().exported, exported);

    let plate = engine.registry().material_id("plate").unwrap();
    let logged: u32 = reports
        .iter()
        .flat_map(|r| &r.log_entries)
        .filter(|e| e.input_type == LogInputType::Export)
        .filter(|e| e.material_id == Some(plate))
        .map(|e| e.value.to_num::<u32>())
        .sum();
    assert_eq!(u64::from(logged), exported);

    for report in &reports {
        assert!(report.errors.is_empty(), "tick {}: {:?}", report.tick, report.errors);
    }
    assert_eq!(engine.ledger().expected_held(), engine.held() as i64);
}

#[test]
fn sensor_delay_bounds_sampling() {
    let mut layout = smelter_line();
    let mut level = step_sensor("level", SensorKind::InventoryLevel, "smelter");
    level.sensor_delay = 3;
    layout.sensors.push(level);
    let (mut engine, names) = build(&layout, EngineConfig::default());
    let reports = run_ticks(&mut engine, 9);

    let sampled: Vec<u64> = reports
        .iter()
        .filter(|r| !r.sensor_samples.is_empty())
        .map(|r| r.tick)
        .collect();
    assert_eq!(sampled, vec![0, 3, 6]);

    let level = names.sensor("level").unwrap();
    let sensor = engine.get_sensor(level).unwrap();
    assert_eq!(sensor.last_sampled, Some(6));
}

#[test]
fn sensor_delay_command_takes_effect_next_tick() {
    let mut layout = smelter_line();
    layout.sensors.push(status_sensor("status", "smelter"));
    let (mut engine, names) = build(&layout, EngineConfig::default());
    let status = names.sensor("status").unwrap();

    let before = run_ticks(&mut engine, 2);
    assert!(before.iter().all(|r| r.sensor_samples.len() == 1));

    engine.set_sensor_delay(status, 5);
    let after = run_ticks(&mut engine, 4);
    assert!(after.iter().all(|r| r.sensor_samples.is_empty()));
    assert_eq!(engine.get_sensor(status).unwrap().sensor_delay, 5);
}

#[test]
fn throughput_windows_add_up() {
    let mut layout = smelter_line();
    layout
        .sensors
        .push(step_sensor("rate", SensorKind::Throughput, "smelter"));
    let (mut engine, names) = build(&layout, EngineConfig::default());
    let reports = run_ticks(&mut engine, 12);

    let total = reports
        .iter()
        .flat_map(|r| &r.sensor_samples)
        .fold(Fixed64::ZERO, |acc, s| acc + s.value);
    let smelter = names.step("smelter").unwrap();
    let produced = engine.get_step_state(smelter).unwrap().throughput_counter();
    assert!(produced > 0);
    assert_eq!(total, count_to_fixed64(produced));
}

#[test]
fn log_since_exports_incrementally() {
    let mut layout = smelter_line();
    layout.sensors.push(status_sensor("status", "smelter"));
    let (mut engine, _) = build(&layout, EngineConfig::default());
    run_ticks(&mut engine, 3);
    let mark = engine.log().entries().last().map(|e| e.id);
    assert!(mark.is_some());

    let reports = run_ticks(&mut engine, 2);
    let fresh: Vec<_> = reports.iter().flat_map(|r| r.log_entries.clone()).collect();
    assert_eq!(engine.log_since(mark), fresh.as_slice());
    assert!(fresh.iter().all(|e| e.created_at >= 3));
}

#[test]
fn order_traces_steps_and_transports() {
    let mut layout = press_line();
    layout.orders.push(order("ingots", "ingot", 4, "smelter"));
    let (mut engine, names) = build(&layout, EngineConfig::default());
    run_ticks(&mut engine, 25);

    let order = engine.get_order(names.order("ingots").unwrap()).unwrap();
    assert_eq!(order.produced, 4);
    let smelter = names.step("smelter").unwrap();
    let press = names.step("press").unwrap();
    let link = names.transport("link").unwrap();
    assert!(order.contributing_steps.contains(&smelter));
    assert!(order.contributing_steps.contains(&press));
    assert!(order.contributing_transports.contains(&link));
}

#[test]
fn rejecting_filter_starves_downstream() {
    let mut layout = press_line();
    let link = layout
        .transport_systems
        .iter_mut()
        .find(|t| t.name == "link")
        .unwrap();
    link.filter = Some(FilterLayout {
        mode: FilterMode::Reject,
        materials: vec!["ingot".into()],
    });
    let (mut engine, names) = build(&layout, EngineConfig::default());
    run_ticks(&mut engine, 20);

    let link = names.transport("link").unwrap();
    assert_eq!(engine.get_transport_stats(link).unwrap().picked_up, 0);
    let press = names.step("press").unwrap();
    assert_eq!(engine.get_step_state(press).unwrap().cycles_started, 0);
    assert_eq!(engine.get_step(press).unwrap().status, UnitStatus::Idle);

    let smelter = names.step("smelter").unwrap();
    let inv = engine
        .get_inventory(engine.get_step(smelter).unwrap().inventory)
        .unwrap();
    let ingot = engine.registry().material_id("ingot").unwrap();
    assert!(inv.count(Lane::Output, Some(ingot)) > 0);
}

#[test]
fn inactive_transport_moves_nothing() {
    let (mut engine, names) = build(&smelter_line(), EngineConfig::default());
    let feed = names.transport("feed").unwrap();
    engine.set_active(feed, false);
    run_ticks(&mut engine, 5);
    assert_eq!(engine.ledger().entered, 0);
    assert_eq!(engine.get_transport(feed).unwrap().status, UnitStatus::Idle);

    engine.set_active(feed, true);
    run_ticks(&mut engine, 2);
    assert!(engine.ledger().entered > 0);
}

#[test]
fn independent_lines_get_their_own_partitions() {
    let (mut engine, _) = build(&parallel_lines(4), EngineConfig::default());
    assert_eq!(engine.partitions().len(), 4);
    for part in engine.partitions() {
        assert_eq!(part.steps.len(), 2);
        assert_eq!(part.transports.len(), 3);
    }
    run_ticks(&mut engine, 20);
    assert_eq!(engine.ledger().expected_held(), engine.held() as i64);
}

#[test]
fn layout_loads_from_json() {
    let json = r#"{
        "engine": { "seed": 11 },
        "materials": ["ore", "ingot"],
        "recipes": [
            { "name": "smelt", "inputs": [{ "material": "ore", "quantity": 1 }],
              "outputs": [{ "material": "ingot", "quantity": 1 }] }
        ],
        "process_steps": [
            { "name": "smelter", "recipe": "smelt", "inventory": { "limit": 10 } }
        ],
        "transport_systems": [
            { "name": "feed", "end": "smelter", "supply": { "material": "ore" },
              "inventory": { "limit": 2 } }
        ]
    }"#;
    let layout: PlantLayout = serde_json::from_str(json).unwrap();
    let config = layout.engine.clone().unwrap();
    assert_eq!(config.seed, 11);
    let (mut engine, names) = Engine::from_layout(&layout, config).unwrap();
    run_ticks(&mut engine, 5);
    let smelter = names.step("smelter").unwrap();
    assert!(engine.get_step_state(smelter).unwrap().units_produced > 0);
}

#[test]
fn snapshots_reflect_running_plant() {
    let (mut engine, _) = build(&press_line(), EngineConfig::default());
    run_ticks(&mut engine, 10);
    let steps = engine.snapshot_all_steps();
    assert_eq!(steps.len(), 2);
    let held: u64 = steps.iter().map(|s| u64::from(s.inventory.total())).sum::<u64>()
        + engine
            .snapshot_all_transports()
            .iter()
            .map(|t| u64::from(t.in_transit))
            .sum::<u64>();
    assert_eq!(held, engine.held());
}

#[test]
fn expanding_recipe_is_not_starved_by_its_own_inputs() {
    let mut split = ProcessStepLayout::new("split", 4);
    split.recipe = Some("split".into());
    let mut feed = TransportLayout::new("feed", None, Some("split"), 4);
    feed.input_speed = 4;
    feed.output_speed = 4;
    feed.supply = Some(SupplyLayout {
        material: "ore".into(),
        limit: None,
    });
    let mut out = TransportLayout::new("out", Some("split"), None, 6);
    out.input_speed = 4;
    out.output_speed = 4;
    let layout = PlantLayout {
        materials: vec!["ore".into(), "ingot".into()],
        recipes: vec![RecipeLayout {
            name: "split".into(),
            inputs: vec![MaterialAmount::new("ore", 1)],
            outputs: vec![MaterialAmount::new("ingot", 3)],
        }],
        process_steps: vec![split],
        transport_systems: vec![feed, out],
        ..PlantLayout::default()
    };
    let (mut engine, names) = build(&layout, EngineConfig::default());
    run_ticks(&mut engine, 30);

    let split = engine.snapshot_step(names.step("split").unwrap()).unwrap();
    assert!(split.cycles_started > 0);
    assert!(split.inventory.total() <= 4);
    let out = names.transport("out").unwrap();
    assert!(engine.get_transport_stats(out).unwrap().exported > 0);
    assert_eq!(engine.ledger().expected_held(), engine.held() as i64);
}

#[test]
fn unreachable_batch_is_a_load_error() {
    let mut layout = smelter_line();
    layout.transport_systems[0].min_quantity = 5;
    assert!(matches!(
        Engine::from_layout(&layout, EngineConfig::default()),
        Err(LayoutError::BatchUnreachable { min_quantity: 5, input_speed: 2, limit: 4, .. })
    ));
}
