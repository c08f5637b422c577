use std::sync::Mutex;

use tracing::error;

use super::mailbox::{Reply, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Slot {
    #[default]
    Empty,
    /// Requested, not yet available. Only used for asynchronous execution.
    Pending,
    Ready(Reply),
}

/// One slot per worker. The coordinator and the execution pool write; the
/// coordinator drains each slot into its owner's reply channel.
#[derive(Debug, Default)]
pub struct ResultTable {
    slots: Mutex<Vec<Slot>>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> WorkerId {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.push(Slot::Empty);
        slots.len() - 1
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mark_pending(&self, id: WorkerId) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(id) {
            *slot = Slot::Pending;
        }
    }

    /// Write-once: refuses to overwrite a ready result. Returns whether the
    /// value was stored.
    pub fn write(&self, id: WorkerId, reply: Reply) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get_mut(id) {
            Some(slot @ (Slot::Empty | Slot::Pending)) => {
                *slot = Slot::Ready(reply);
                true
            }
            Some(Slot::Ready(_)) => {
                error!(worker = id, "result slot written twice");
                false
            }
            None => {
                error!(worker = id, "write to unallocated result slot");
                false
            }
        }
    }

    pub fn is_pending(&self, id: WorkerId) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        matches!(slots.get(id), Some(Slot::Pending))
    }

    /// Read-and-clear. `None` while the slot is empty or still pending.
    pub fn take_ready(&self, id: WorkerId) -> Option<Reply> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.get_mut(id)?;
        match std::mem::take(slot) {
            Slot::Ready(reply) => Some(reply),
            other => {
                *slot = other;
                None
            }
        }
    }
}
