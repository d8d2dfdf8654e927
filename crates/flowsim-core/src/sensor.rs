//! Sensor & Log subsystem.
//!
//! Sensors read the state of the unit they are attached to every
//! `sensor_delay` ticks. Every sample is written to the append-only
//! [`TelemetryLog`], alongside status changes, unit failures, order
//! transitions and exports recorded by the coordinator.

use crate::fixed::{Fixed64, Ticks, count_to_fixed64};
use crate::id::*;
use crate::sim::UnitStatus;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// The unit a sensor observes. Exactly one of a step or a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorTarget {
    ProcessStep(ProcessStepId),
    Transport(TransportId),
}

impl SensorTarget {
    pub fn unit(self) -> UnitId {
        match self {
            SensorTarget::ProcessStep(id) => UnitId::ProcessStep(id),
            SensorTarget::Transport(id) => UnitId::Transport(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Entries held, optionally of one material.
    InventoryLevel,
    /// Cycles in flight for a step, buffered entries for a transport.
    InTransit,
    /// Unit status code, see [`UnitStatus::code`].
    Status,
    /// Units produced, passed or delivered since the previous sample.
    Throughput,
    /// Cumulative failed cycles or unit errors.
    ErrorCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    pub kind: SensorKind,
    pub target: SensorTarget,
    pub material: Option<MaterialId>,
    /// Ticks between samples. 0 samples every tick.
    pub sensor_delay: u32,
    /// Last sampled value.
    pub value: Fixed64,
    pub last_sampled: Option<Ticks>,
    /// Counter reading at the previous sample, for windowed kinds.
    pub last_counter: u64,
}

impl Sensor {
    pub fn new(name: &str, kind: SensorKind, target: SensorTarget) -> Self {
        Self {
            name: name.to_string(),
            kind,
            target,
            material: None,
            sensor_delay: 0,
            value: Fixed64::ZERO,
            last_sampled: None,
            last_counter: 0,
        }
    }

    pub fn is_due(&self, tick: Ticks) -> bool {
        match self.last_sampled {
            None => true,
            Some(last) => tick.saturating_sub(last) >= u64::from(self.sensor_delay.max(1)),
        }
    }
}

/// Read access to unit state, implemented by the simulation state.
pub trait Probe {
    fn inventory_level(&self, target: SensorTarget, material: Option<MaterialId>) -> Option<u32>;
    fn in_transit(&self, target: SensorTarget) -> Option<u32>;
    fn status(&self, target: SensorTarget) -> Option<UnitStatus>;
    fn throughput_counter(&self, target: SensorTarget) -> Option<u64>;
    fn error_count(&self, target: SensorTarget) -> Option<u64>;
}

/// One sensor reading, produced read-only and applied by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub sensor: SensorId,
    pub value: Fixed64,
    pub counter: u64,
}

/// Read a sensor. `None` when its target no longer resolves.
pub fn sample(id: SensorId, sensor: &Sensor, probe: &impl Probe) -> Option<Sample> {
    let target = sensor.target;
    let (value, counter) = match sensor.kind {
        SensorKind::InventoryLevel => {
            let level = probe.inventory_level(target, sensor.material)?;
            (count_to_fixed64(u64::from(level)), sensor.last_counter)
        }
        SensorKind::InTransit => {
            let n = probe.in_transit(target)?;
            (count_to_fixed64(u64::from(n)), sensor.last_counter)
        }
        SensorKind::Status => {
            let status = probe.status(target)?;
            (Fixed64::from_num(status.code()), sensor.last_counter)
        }
        SensorKind::Throughput => {
            let counter = probe.throughput_counter(target)?;
            (count_to_fixed64(counter.saturating_sub(sensor.last_counter)), counter)
        }
        SensorKind::ErrorCount => {
            let errors = probe.error_count(target)?;
            (count_to_fixed64(errors), sensor.last_counter)
        }
    };
    Some(Sample {
        sensor: id,
        value,
        counter,
    })
}

// ---------------------------------------------------------------------------
// Telemetry log
// ---------------------------------------------------------------------------

/// What produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogInputType {
    Sensor(SensorKind),
    StatusChange,
    UnitFailure,
    Order,
    Export,
}

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogEntryId,
    pub input_type: LogInputType,
    pub material_id: Option<MaterialId>,
    pub material_name: Option<String>,
    pub sensor: Option<SensorId>,
    pub process_step: Option<ProcessStepId>,
    pub transport: Option<TransportId>,
    pub order: Option<OrderId>,
    pub value: Fixed64,
    pub detail: Option<String>,
    pub created_at: Ticks,
}

/// A log entry before the log assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub input_type: LogInputType,
    pub material_id: Option<MaterialId>,
    pub material_name: Option<String>,
    pub sensor: Option<SensorId>,
    pub process_step: Option<ProcessStepId>,
    pub transport: Option<TransportId>,
    pub order: Option<OrderId>,
    pub value: Fixed64,
    pub detail: Option<String>,
}

impl LogRecord {
    pub fn new(input_type: LogInputType) -> Self {
        Self {
            input_type,
            material_id: None,
            material_name: None,
            sensor: None,
            process_step: None,
            transport: None,
            order: None,
            value: Fixed64::ZERO,
            detail: None,
        }
    }

    pub fn unit(mut self, unit: UnitId) -> Self {
        match unit {
            UnitId::ProcessStep(id) => self.process_step = Some(id),
            UnitId::Transport(id) => self.transport = Some(id),
        }
        self
    }

    pub fn material(mut self, id: MaterialId, name: Option<&str>) -> Self {
        self.material_id = Some(id);
        self.material_name = name.map(str::to_string);
        self
    }

    pub fn sensor(mut self, id: SensorId) -> Self {
        self.sensor = Some(id);
        self
    }

    pub fn order(mut self, id: OrderId) -> Self {
        self.order = Some(id);
        self
    }

    pub fn value(mut self, value: Fixed64) -> Self {
        self.value = value;
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Position of a [`TelemetryLog`], taken before a tick so a rolled-back tick
/// can be undone without copying the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMark {
    next_id: u64,
    dropped: u64,
}

/// Append-only log, ordered by creation tick then id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryLog {
    entries: Vec<LogEntry>,
    next_id: u64,
    capacity: Option<usize>,
    dropped: u64,
}

impl TelemetryLog {
    pub fn with_capacity_limit(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Append a record. Returns `None` and counts a drop when the log is full.
    pub fn append(&mut self, record: LogRecord, tick: Ticks) -> Option<LogEntryId> {
        if self.capacity.is_some_and(|cap| self.entries.len() >= cap) {
            self.dropped += 1;
            return None;
        }
        let id = LogEntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(LogEntry {
            id,
            input_type: record.input_type,
            material_id: record.material_id,
            material_name: record.material_name,
            sensor: record.sensor,
            process_step: record.process_step,
            transport: record.transport,
            order: record.order,
            value: record.value,
            detail: record.detail,
            created_at: tick,
        });
        Some(id)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries with id strictly greater than `after`; all entries for `None`.
    pub fn since(&self, after: Option<LogEntryId>) -> &[LogEntry] {
        let start = match after {
            None => 0,
            Some(after) => self.entries.partition_point(|e| e.id <= after),
        };
        &self.entries[start..]
    }

    /// Id the next appended entry will receive.
    pub fn next_id(&self) -> LogEntryId {
        LogEntryId(self.next_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn mark(&self) -> LogMark {
        LogMark {
            next_id: self.next_id,
            dropped: self.dropped,
        }
    }

    /// Discard everything appended, and every drop counted, since `mark`.
    /// Only the coordinator calls this, when it rolls a tick back.
    pub(crate) fn truncate_to(&mut self, mark: LogMark) {
        let keep = self.entries.partition_point(|e| e.id.0 < mark.next_id);
        self.entries.truncate(keep);
        self.next_id = mark.next_id;
        self.dropped = mark.dropped;
    }
}
