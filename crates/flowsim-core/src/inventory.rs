//! Inventory Store: bounded, entry-level material storage.
//!
//! Every process step and transport system owns exactly one inventory. Each
//! unit of material is an individual entry carrying its arrival tick and an
//! optional order tag, so orders can be traced through the plant.
//!
//! Removal only happens through reserve-then-commit. A reservation hides its
//! entries from other reservations until it is committed or released.
//!
//! Inventories sit behind per-inventory mutexes so units in different graph
//! partitions can work on the store concurrently through `&self`.

use crate::fixed::Ticks;
use crate::id::*;
use crate::registry::MaterialQty;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// The unit that owns an inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryOwner {
    ProcessStep(ProcessStepId),
    Transport(TransportId),
}

/// Which side of a step's inventory an entry sits on. Transport buffers only
/// use `Input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lane {
    Input,
    Output,
}

/// One unit of material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub id: EntryId,
    pub material: MaterialId,
    pub lane: Lane,
    pub added_at: Ticks,
    pub order: Option<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum InventoryError {
    #[error("unknown inventory {0:?}")]
    UnknownInventory(InventoryId),
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },
    #[error("capacity exceeded: requested {requested}, free {free}")]
    CapacityExceeded { requested: u32, free: u32 },
    #[error("entry {0:?} is not reserved")]
    StaleReservation(EntryId),
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// A bounded set of entries plus capacity held for in-flight outputs.
///
/// Invariant: `len() + held() <= limit()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    owner: InventoryOwner,
    limit: u32,
    held: u32,
    entries: Vec<InventoryEntry>,
    reserved: BTreeSet<EntryId>,
    next_entry: u64,
}

impl Inventory {
    pub fn new(owner: InventoryOwner, limit: u32) -> Self {
        Self {
            owner,
            limit,
            held: 0,
            entries: Vec::new(),
            reserved: BTreeSet::new(),
            next_entry: 0,
        }
    }

    pub fn owner(&self) -> InventoryOwner {
        self.owner
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Capacity set aside for outputs of cycles still in flight.
    pub fn held(&self) -> u32 {
        self.held
    }

    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[InventoryEntry] {
        &self.entries
    }

    /// Slots left after stored entries and held capacity.
    pub fn free_capacity(&self) -> u32 {
        self.limit.saturating_sub(self.len() + self.held)
    }

    /// Entries in `lane`, optionally restricted to one material.
    pub fn count(&self, lane: Lane, material: Option<MaterialId>) -> u32 {
        self.count_where(|e| e.lane == lane && material.is_none_or(|m| e.material == m))
    }

    pub fn count_where(&self, pred: impl Fn(&InventoryEntry) -> bool) -> u32 {
        self.entries.iter().filter(|e| pred(e)).count() as u32
    }

    /// Matching entries not held by any reservation.
    pub fn available_where(&self, pred: impl Fn(&InventoryEntry) -> bool) -> u32 {
        self.entries
            .iter()
            .filter(|e| !self.reserved.contains(&e.id) && pred(e))
            .count() as u32
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    /// Oldest unreserved matching entries first, ties broken by entry id.
    fn select(&self, max: u32, pred: impl Fn(&InventoryEntry) -> bool) -> Vec<EntryId> {
        let mut candidates: Vec<&InventoryEntry> = self
            .entries
            .iter()
            .filter(|e| !self.reserved.contains(&e.id) && pred(e))
            .collect();
        candidates.sort_by_key(|e| (e.added_at, e.id));
        candidates
            .into_iter()
            .take(max as usize)
            .map(|e| e.id)
            .collect()
    }

    /// Reserve exactly `quantity` matching entries, or nothing.
    pub fn reserve_where(
        &mut self,
        quantity: u32,
        pred: impl Fn(&InventoryEntry) -> bool,
    ) -> Result<Vec<EntryId>, InventoryError> {
        let ids = self.select(quantity, pred);
        if (ids.len() as u32) < quantity {
            return Err(InventoryError::InsufficientStock {
                requested: quantity,
                available: ids.len() as u32,
            });
        }
        self.reserved.extend(ids.iter().copied());
        Ok(ids)
    }

    /// Reserve as many matching entries as exist, up to `max`.
    pub fn reserve_up_to(&mut self, max: u32, pred: impl Fn(&InventoryEntry) -> bool) -> Vec<EntryId> {
        let ids = self.select(max, pred);
        self.reserved.extend(ids.iter().copied());
        ids
    }

    /// Remove reserved entries and hand them to the caller.
    pub fn commit(&mut self, ids: &[EntryId]) -> Result<Vec<InventoryEntry>, InventoryError> {
        if let Some(stale) = ids.iter().find(|id| !self.reserved.contains(id)) {
            return Err(InventoryError::StaleReservation(*stale));
        }
        let wanted: BTreeSet<EntryId> = ids.iter().copied().collect();
        let mut removed = Vec::with_capacity(ids.len());
        self.entries.retain(|e| {
            if wanted.contains(&e.id) {
                removed.push(e.clone());
                false
            } else {
                true
            }
        });
        for id in &wanted {
            self.reserved.remove(id);
        }
        Ok(removed)
    }

    /// Return reserved entries to the available pool.
    pub fn release(&mut self, ids: &[EntryId]) {
        for id in ids {
            self.reserved.remove(id);
        }
    }

    /// Add `quantity` new entries of one material. All-or-nothing.
    pub fn add(
        &mut self,
        lane: Lane,
        material: MaterialId,
        quantity: u32,
        order: Option<OrderId>,
        tick: Ticks,
    ) -> Result<Vec<EntryId>, InventoryError> {
        self.ensure_room(quantity)?;
        Ok((0..quantity)
            .map(|_| self.push(lane, material, order, tick))
            .collect())
    }

    /// Add entries of mixed material and order tags. All-or-nothing.
    pub fn insert(
        &mut self,
        lane: Lane,
        items: &[(MaterialId, Option<OrderId>)],
        tick: Ticks,
    ) -> Result<Vec<EntryId>, InventoryError> {
        self.ensure_room(items.len() as u32)?;
        Ok(items
            .iter()
            .map(|&(material, order)| self.push(lane, material, order, tick))
            .collect())
    }

    /// Set aside capacity for outputs that will arrive later.
    pub fn hold(&mut self, quantity: u32) -> Result<(), InventoryError> {
        self.ensure_room(quantity)?;
        self.held += quantity;
        Ok(())
    }

    pub fn release_hold(&mut self, quantity: u32) {
        self.held = self.held.saturating_sub(quantity);
    }

    /// Turn held capacity into real entries.
    pub fn add_held(
        &mut self,
        lane: Lane,
        outputs: &[MaterialQty],
        order: Option<OrderId>,
        tick: Ticks,
    ) -> Result<Vec<EntryId>, InventoryError> {
        let total: u32 = outputs.iter().map(|o| o.quantity).sum();
        let from_hold = total.min(self.held);
        self.held -= from_hold;
        if let Err(e) = self.ensure_room(total) {
            self.held += from_hold;
            return Err(e);
        }
        let mut ids = Vec::with_capacity(total as usize);
        for output in outputs {
            for _ in 0..output.quantity {
                ids.push(self.push(lane, output.material, order, tick));
            }
        }
        Ok(ids)
    }

    fn ensure_room(&self, quantity: u32) -> Result<(), InventoryError> {
        let free = self.free_capacity();
        if quantity > free {
            return Err(InventoryError::CapacityExceeded {
                requested: quantity,
                free,
            });
        }
        Ok(())
    }

    fn push(&mut self, lane: Lane, material: MaterialId, order: Option<OrderId>, tick: Ticks) -> EntryId {
        let id = EntryId(self.next_entry);
        self.next_entry += 1;
        self.entries.push(InventoryEntry {
            id,
            material,
            lane,
            added_at: tick,
            order,
        });
        id
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Entries set aside in one inventory. Must be committed or released.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a reservation hides entries until it is committed or released"]
pub struct Reservation {
    inventory: InventoryId,
    entries: Vec<EntryId>,
}

impl Reservation {
    pub fn inventory(&self) -> InventoryId {
        self.inventory
    }

    pub fn entries(&self) -> &[EntryId] {
        &self.entries
    }

    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent)]
struct InventoryCell(Mutex<Inventory>);

impl InventoryCell {
    fn lock(&self) -> MutexGuard<'_, Inventory> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for InventoryCell {
    fn clone(&self) -> Self {
        InventoryCell(Mutex::new(self.lock().clone()))
    }
}

/// All inventories of a plant, keyed by InventoryId.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryStore {
    inventories: SlotMap<InventoryId, InventoryCell>,
}

impl InventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, owner: InventoryOwner, limit: u32) -> InventoryId {
        self.inventories
            .insert(InventoryCell(Mutex::new(Inventory::new(owner, limit))))
    }

    pub fn contains(&self, id: InventoryId) -> bool {
        self.inventories.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inventories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inventories.is_empty()
    }

    /// Run `f` with exclusive access to one inventory.
    pub fn with<R>(
        &self,
        id: InventoryId,
        f: impl FnOnce(&mut Inventory) -> R,
    ) -> Result<R, InventoryError> {
        let cell = self
            .inventories
            .get(id)
            .ok_or(InventoryError::UnknownInventory(id))?;
        let mut guard = cell.lock();
        Ok(f(&mut guard))
    }

    /// Direct access for setup, when no tick is running.
    pub fn get_mut(&mut self, id: InventoryId) -> Option<&mut Inventory> {
        self.inventories
            .get_mut(id)
            .map(|cell| cell.0.get_mut().unwrap_or_else(PoisonError::into_inner))
    }

    /// Owned copy of one inventory.
    pub fn snapshot(&self, id: InventoryId) -> Option<Inventory> {
        self.inventories.get(id).map(|cell| cell.lock().clone())
    }

    /// Visit every inventory in key order.
    pub fn for_each(&self, mut f: impl FnMut(InventoryId, &Inventory)) {
        for (id, cell) in &self.inventories {
            f(id, &cell.lock());
        }
    }

    pub fn reserve(
        &self,
        id: InventoryId,
        lane: Lane,
        material: MaterialId,
        quantity: u32,
    ) -> Result<Reservation, InventoryError> {
        self.reserve_where(id, quantity, |e| e.lane == lane && e.material == material)
    }

    pub fn reserve_where(
        &self,
        id: InventoryId,
        quantity: u32,
        pred: impl Fn(&InventoryEntry) -> bool,
    ) -> Result<Reservation, InventoryError> {
        let entries = self.with(id, |inv| inv.reserve_where(quantity, pred))??;
        Ok(Reservation { inventory: id, entries })
    }

    pub fn reserve_up_to(
        &self,
        id: InventoryId,
        max: u32,
        pred: impl Fn(&InventoryEntry) -> bool,
    ) -> Result<Reservation, InventoryError> {
        let entries = self.with(id, |inv| inv.reserve_up_to(max, pred))?;
        Ok(Reservation { inventory: id, entries })
    }

    pub fn commit(&self, reservation: Reservation) -> Result<Vec<InventoryEntry>, InventoryError> {
        self.with(reservation.inventory, |inv| inv.commit(&reservation.entries))?
    }

    pub fn release(&self, reservation: Reservation) -> Result<(), InventoryError> {
        self.with(reservation.inventory, |inv| inv.release(&reservation.entries))
    }

    pub fn add(
        &self,
        id: InventoryId,
        lane: Lane,
        material: MaterialId,
        quantity: u32,
        order: Option<OrderId>,
        tick: Ticks,
    ) -> Result<Vec<EntryId>, InventoryError> {
        self.with(id, |inv| inv.add(lane, material, quantity, order, tick))?
    }

    pub fn insert(
        &self,
        id: InventoryId,
        lane: Lane,
        items: &[(MaterialId, Option<OrderId>)],
        tick: Ticks,
    ) -> Result<Vec<EntryId>, InventoryError> {
        self.with(id, |inv| inv.insert(lane, items, tick))?
    }

    pub fn hold(&self, id: InventoryId, quantity: u32) -> Result<(), InventoryError> {
        self.with(id, |inv| inv.hold(quantity))?
    }

    pub fn release_hold(&self, id: InventoryId, quantity: u32) -> Result<(), InventoryError> {
        self.with(id, |inv| inv.release_hold(quantity))
    }

    pub fn add_held(
        &self,
        id: InventoryId,
        lane: Lane,
        outputs: &[MaterialQty],
        order: Option<OrderId>,
        tick: Ticks,
    ) -> Result<Vec<EntryId>, InventoryError> {
        self.with(id, |inv| inv.add_held(lane, outputs, order, tick))?
    }

    pub fn free_capacity(&self, id: InventoryId) -> Result<u32, InventoryError> {
        self.with(id, |inv| inv.free_capacity())
    }

    pub fn available_where(
        &self,
        id: InventoryId,
        pred: impl Fn(&InventoryEntry) -> bool,
    ) -> Result<u32, InventoryError> {
        self.with(id, |inv| inv.available_where(pred))
    }

    /// Total entries across every inventory.
    pub fn total_entries(&self) -> u64 {
        let mut total = 0u64;
        self.for_each(|_, inv| total += inv.len() as u64);
        total
    }
}
