//! Partitioned work must give the same plant whether partitions run one after
//! another or on the rayon pool. Run with and without `--features parallel`;
//! without the feature both engines take the serial path.

use flowsim_core::config::EngineConfig;
use flowsim_core::engine::Engine;
use flowsim_core::layout::PlantLayout;
use flowsim_core::sensor::SensorKind;
use flowsim_core::test_utils::*;

fn noisy_lines(lines: usize) -> PlantLayout {
    let mut layout = parallel_lines(lines);
    for step in &mut layout.process_steps {
        step.error_rate = 0.2;
    }
    for i in 0..lines {
        let name = format!("press-{i}");
        layout
            .sensors
            .push(step_sensor(&format!("level-{i}"), SensorKind::InventoryLevel, &name));
        layout.orders.push(order(&format!("plates-{i}"), "plate", 3, &name));
    }
    layout
}

fn engine(layout: &PlantLayout, parallel: bool) -> Engine {
    let config = EngineConfig {
        parallel,
        ..EngineConfig::with_seed(42)
    };
    build(layout, config).0
}

#[test]
fn parallel_and_serial_runs_agree() {
    let layout = noisy_lines(4);
    let mut serial = engine(&layout, false);
    let mut pooled = engine(&layout, true);
    assert_eq!(serial.partitions().len(), 4);

    for _ in 0..60 {
        let a = serial.step().unwrap();
        let b = pooled.step().unwrap();
        assert_eq!(a.state_hash, b.state_hash, "tick {}", a.tick);
        assert_eq!(a.log_entries, b.log_entries, "tick {}", a.tick);
        assert_eq!(a.errors, b.errors);
    }
    assert_eq!(serial.ledger(), pooled.ledger());
    assert_eq!(serial.snapshot_all_orders(), pooled.snapshot_all_orders());
    assert!(serial.ledger().scrapped > 0, "failure draws never fired");
}

#[test]
fn partitions_do_not_leak_into_each_other() {
    // With failures off, every line sees the same inputs and must end up in
    // the same place regardless of scheduling.
    let layout = parallel_lines(4);
    let mut pooled = engine(&layout, true);
    run_ticks(&mut pooled, 40);
    let produced: Vec<u64> = pooled
        .snapshot_all_steps()
        .iter()
        .filter(|s| s.name.starts_with("press-"))
        .map(|s| s.units_produced)
        .collect();
    assert_eq!(produced.len(), 4);
    assert!(produced[0] > 0);
    assert!(produced.iter().all(|&p| p == produced[0]), "{produced:?}");
}
