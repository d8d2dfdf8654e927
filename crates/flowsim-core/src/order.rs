//! Order Tracker.
//!
//! Orders move `Pending -> Started -> Completed`, or to `Canceled` from
//! either live state. Transition ticks are written once and never change.

use crate::fixed::Ticks;
use crate::id::*;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Started,
    Completed,
    Canceled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Canceled)
    }
}

/// A state change produced by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderTransition {
    Started,
    Completed,
    Canceled,
}

impl OrderTransition {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderTransition::Started => "started",
            OrderTransition::Completed => "completed",
            OrderTransition::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum OrderError {
    #[error("order {order:?} is already {status:?}")]
    AlreadyTerminal { order: OrderId, status: OrderStatus },
    #[error("unknown order {0:?}")]
    UnknownOrder(OrderId),
    #[error("order quantity must be positive")]
    ZeroQuantity,
}

/// What a caller supplies to create an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub name: Option<String>,
    pub material: MaterialId,
    pub quantity: u32,
    pub priority: i32,
    pub due_tick: Option<Ticks>,
    pub assigned_steps: Vec<ProcessStepId>,
}

impl OrderSpec {
    pub fn new(material: MaterialId, quantity: u32) -> Self {
        Self {
            name: None,
            material,
            quantity,
            priority: 0,
            due_tick: None,
            assigned_steps: Vec::new(),
        }
    }

    pub fn assigned_to(mut self, step: ProcessStepId) -> Self {
        self.assigned_steps.push(step);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub name: Option<String>,
    pub material: MaterialId,
    pub quantity: u32,
    pub priority: i32,
    pub due_tick: Option<Ticks>,
    pub status: OrderStatus,
    /// Units of `material` committed on this order's behalf so far.
    pub produced: u32,
    pub created_tick: Ticks,
    pub started_tick: Option<Ticks>,
    pub completed_tick: Option<Ticks>,
    pub canceled_tick: Option<Ticks>,
    pub assigned_steps: Vec<ProcessStepId>,
    pub contributing_steps: BTreeSet<ProcessStepId>,
    pub contributing_transports: BTreeSet<TransportId>,
}

impl Order {
    fn new(spec: OrderSpec, tick: Ticks) -> Self {
        Self {
            name: spec.name,
            material: spec.material,
            quantity: spec.quantity,
            priority: spec.priority,
            due_tick: spec.due_tick,
            status: OrderStatus::Pending,
            produced: 0,
            created_tick: tick,
            started_tick: None,
            completed_tick: None,
            canceled_tick: None,
            assigned_steps: spec.assigned_steps,
            contributing_steps: BTreeSet::new(),
            contributing_transports: BTreeSet::new(),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.produced)
    }
}

/// Owns every order of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderTracker {
    orders: SlotMap<OrderId, Order>,
}

impl OrderTracker {
    pub fn create(&mut self, spec: OrderSpec, tick: Ticks) -> Result<OrderId, OrderError> {
        if spec.quantity == 0 {
            return Err(OrderError::ZeroQuantity);
        }
        Ok(self.orders.insert(Order::new(spec, tick)))
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (OrderId, &Order)> {
        self.orders.iter()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn live(&mut self, id: OrderId) -> Result<&mut Order, OrderError> {
        let order = self.orders.get_mut(id).ok_or(OrderError::UnknownOrder(id))?;
        if order.status.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                order: id,
                status: order.status,
            });
        }
        Ok(order)
    }

    /// Pending to started. A started order is left as is.
    pub fn start(&mut self, id: OrderId, tick: Ticks) -> Result<Option<OrderTransition>, OrderError> {
        let order = self.live(id)?;
        if order.status == OrderStatus::Started {
            return Ok(None);
        }
        order.status = OrderStatus::Started;
        order.started_tick = Some(tick);
        Ok(Some(OrderTransition::Started))
    }

    /// Count produced units. May start and complete the order in one call.
    pub fn record_progress(
        &mut self,
        id: OrderId,
        quantity: u32,
        tick: Ticks,
    ) -> Result<Vec<OrderTransition>, OrderError> {
        let mut transitions = Vec::new();
        if quantity == 0 {
            return Ok(transitions);
        }
        if let Some(t) = self.start(id, tick)? {
            transitions.push(t);
        }
        let order = self.live(id)?;
        order.produced = order.produced.saturating_add(quantity);
        if order.produced >= order.quantity {
            order.status = OrderStatus::Completed;
            order.completed_tick = Some(tick);
            transitions.push(OrderTransition::Completed);
        }
        Ok(transitions)
    }

    pub fn cancel(&mut self, id: OrderId, tick: Ticks) -> Result<OrderTransition, OrderError> {
        let order = self.live(id)?;
        order.status = OrderStatus::Canceled;
        order.canceled_tick = Some(tick);
        Ok(OrderTransition::Canceled)
    }

    pub fn add_contributing_step(&mut self, id: OrderId, step: ProcessStepId) {
        if let Some(order) = self.orders.get_mut(id) {
            order.contributing_steps.insert(step);
        }
    }

    pub fn add_contributing_transport(&mut self, id: OrderId, transport: TransportId) {
        if let Some(order) = self.orders.get_mut(id) {
            order.contributing_transports.insert(transport);
        }
    }

    /// The live order a step should tag untraced output with: highest
    /// priority, then earliest due tick, then lowest id.
    pub fn preferred_for(
        &self,
        step: ProcessStepId,
        produces: impl Fn(MaterialId) -> bool,
    ) -> Option<OrderId> {
        self.orders
            .iter()
            .filter(|(_, o)| {
                !o.status.is_terminal() && o.assigned_steps.contains(&step) && produces(o.material)
            })
            .min_by_key(|(id, o)| (std::cmp::Reverse(o.priority), o.due_tick.unwrap_or(Ticks::MAX), *id))
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_id() -> ProcessStepId {
        let mut steps: SlotMap<ProcessStepId, ()> = SlotMap::with_key();
        steps.insert(())
    }

    #[test]
    fn progress_starts_then_completes() {
        let mut tracker = OrderTracker::default();
        let id = tracker.create(OrderSpec::new(MaterialId(1), 5), 0).unwrap();

        let t = tracker.record_progress(id, 2, 3).unwrap();
        assert_eq!(t, vec![OrderTransition::Started]);
        assert_eq!(tracker.get(id).unwrap().started_tick, Some(3));

        let t = tracker.record_progress(id, 2, 4).unwrap();
        assert!(t.is_empty());

        let t = tracker.record_progress(id, 1, 6).unwrap();
        assert_eq!(t, vec![OrderTransition::Completed]);
        let order = tracker.get(id).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.completed_tick, Some(6));
        assert_eq!(order.started_tick, Some(3));
    }

    #[test]
    fn start_and_complete_in_one_tick() {
        let mut tracker = OrderTracker::default();
        let id = tracker.create(OrderSpec::new(MaterialId(1), 2), 0).unwrap();
        let t = tracker.record_progress(id, 3, 1).unwrap();
        assert_eq!(t, vec![OrderTransition::Started, OrderTransition::Completed]);
        let order = tracker.get(id).unwrap();
        assert_eq!(order.started_tick, order.completed_tick);
    }

    #[test]
    fn terminal_orders_reject_transitions() {
        let mut tracker = OrderTracker::default();
        let id = tracker.create(OrderSpec::new(MaterialId(1), 5), 0).unwrap();
        tracker.cancel(id, 2).unwrap();
        assert!(matches!(
            tracker.record_progress(id, 5, 3),
            Err(OrderError::AlreadyTerminal { status: OrderStatus::Canceled, .. })
        ));
        assert!(matches!(tracker.cancel(id, 4), Err(OrderError::AlreadyTerminal { .. })));
        let order = tracker.get(id).unwrap();
        assert_eq!(order.canceled_tick, Some(2));
        assert_eq!(order.completed_tick, None);
    }

    #[test]
    fn zero_quantity_rejected() {
        let mut tracker = OrderTracker::default();
        assert_eq!(
            tracker.create(OrderSpec::new(MaterialId(0), 0), 0),
            Err(OrderError::ZeroQuantity)
        );
    }

    #[test]
    fn preferred_order_by_priority_then_due() {
        let step = step_id();
        let mut tracker = OrderTracker::default();
        tracker
            .create(OrderSpec::new(MaterialId(1), 5).assigned_to(step), 0)
            .unwrap();
        let mut late = OrderSpec::new(MaterialId(1), 5).assigned_to(step).with_priority(2);
        late.due_tick = Some(50);
        let late = tracker.create(late, 0).unwrap();
        let mut soon = OrderSpec::new(MaterialId(1), 5).assigned_to(step).with_priority(2);
        soon.due_tick = Some(10);
        let soon = tracker.create(soon, 0).unwrap();

        assert_eq!(tracker.preferred_for(step, |m| m == MaterialId(1)), Some(soon));
        tracker.cancel(soon, 1).unwrap();
        assert_eq!(tracker.preferred_for(step, |m| m == MaterialId(1)), Some(late));
        assert_eq!(tracker.preferred_for(step, |m| m == MaterialId(2)), None);
    }
}
