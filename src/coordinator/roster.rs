use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::mailbox::WorkerId;
use crate::state::RepairOutcome;

/// Active-worker count, the global finished flag and the per-worker output
/// slots. The only state written from more than one thread besides the
/// result table.
#[derive(Debug, Default)]
pub struct WorkerRoster {
    active: AtomicUsize,
    finished: AtomicBool,
    outputs: Mutex<Vec<Option<RepairOutcome>>>,
}

impl WorkerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker and returns the output slot index it owns.
    pub fn enlist(&self) -> WorkerId {
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.push(None);
        self.active.fetch_add(1, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
        outputs.len() - 1
    }

    /// Stores the outcome and decrements the active count. Returns true for
    /// the single call that brought the count to zero.
    pub fn retire(&self, id: WorkerId, outcome: Option<RepairOutcome>) -> bool {
        if let Some(outcome) = outcome {
            let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(slot) = outputs.get_mut(id) {
                *slot = Some(outcome);
            }
        }

        let previous = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        match previous {
            Ok(1) => {
                self.finished.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn take_outputs(&self) -> Vec<Option<RepairOutcome>> {
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn last_retirement_fires_exactly_once() {
        let roster = Arc::new(WorkerRoster::new());
        let ids: Vec<_> = (0..32).map(|_| roster.enlist()).collect();
        assert_eq!(roster.active(), 32);

        let fired: usize = ids
            .into_iter()
            .map(|id| {
                let roster = Arc::clone(&roster);
                thread::spawn(move || roster.retire(id, Some(RepairOutcome::unchanged(id.to_string()))))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        assert_eq!(fired, 1);
        assert_eq!(roster.active(), 0);
        assert!(roster.is_finished());

        let outputs = roster.take_outputs();
        assert_eq!(outputs.len(), 32);
        assert_eq!(outputs[5].as_ref().unwrap().code, "5");
    }

    #[test]
    fn over_retirement_does_not_underflow() {
        let roster = WorkerRoster::new();
        let id = roster.enlist();
        assert!(roster.retire(id, None));
        assert!(!roster.retire(id, None));
        assert_eq!(roster.active(), 0);
    }
}
