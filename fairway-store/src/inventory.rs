use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fairway_core::repository::InventoryStore;
use fairway_core::StoreResult;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Occupancy of one tee time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotInventory {
    pub capacity: u32,
    pub reserved: u32,
}

impl SlotInventory {
    pub fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.reserved)
    }
}

/// In-memory tee sheet. Unknown slots start empty at `default_capacity`.
pub struct InMemoryInventory {
    slots: Mutex<HashMap<(Uuid, DateTime<Utc>), SlotInventory>>,
    default_capacity: u32,
    rejected: Mutex<HashSet<(Uuid, DateTime<Utc>)>>,
    reserve_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl InMemoryInventory {
    pub fn new(default_capacity: u32) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            default_capacity,
            rejected: Mutex::new(HashSet::new()),
            reserve_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
        }
    }

    /// Set a slot's capacity and current occupancy
    pub async fn initialize(&self, course_id: Uuid, tee_time: DateTime<Utc>, capacity: u32, reserved: u32) {
        self.slots
            .lock()
            .await
            .insert((course_id, tee_time), SlotInventory { capacity, reserved });
    }

    pub async fn slot(&self, course_id: Uuid, tee_time: DateTime<Utc>) -> SlotInventory {
        self.slots
            .lock()
            .await
            .get(&(course_id, tee_time))
            .copied()
            .unwrap_or(SlotInventory {
                capacity: self.default_capacity,
                reserved: 0,
            })
    }

    /// Make reservations on one slot fail while it still reports capacity,
    /// as if another booking took it between validation and commit.
    pub async fn reject_slot(&self, course_id: Uuid, tee_time: DateTime<Utc>) {
        self.rejected.lock().await.insert((course_id, tee_time));
    }

    pub fn reserve_calls(&self) -> usize {
        self.reserve_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventory {
    async fn available_capacity(&self, course_id: Uuid, tee_time: DateTime<Utc>) -> StoreResult<u32> {
        Ok(self.slot(course_id, tee_time).await.available())
    }

    async fn reserve_slot(&self, course_id: Uuid, tee_time: DateTime<Utc>, players: u32) -> StoreResult<bool> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        if self.rejected.lock().await.contains(&(course_id, tee_time)) {
            return Ok(false);
        }

        let mut slots = self.slots.lock().await;
        let slot = slots.entry((course_id, tee_time)).or_insert(SlotInventory {
            capacity: self.default_capacity,
            reserved: 0,
        });

        if slot.available() < players {
            return Ok(false);
        }
        slot.reserved += players;
        Ok(true)
    }

    async fn release_slot(&self, course_id: Uuid, tee_time: DateTime<Utc>, players: u32) -> StoreResult<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&(course_id, tee_time)) {
            slot.reserved = slot.reserved.saturating_sub(players);
        }
        Ok(())
    }
}
