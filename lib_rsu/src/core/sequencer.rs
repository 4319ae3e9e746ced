//! # Per-EV Sequencer
//!
//! Gives each EV its own FIFO turnstile. A submit holds its EV's turn from the
//! first audit write to the last broadcast, so one vehicle's decisions reach
//! every subscriber in call order while different vehicles run concurrently.
//! Idle turnstiles are pruned when their last holder leaves, and swept on the
//! next acquire when a cancelled waiter was the last to touch them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Turnstiles = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Hands out per-EV turns.
#[derive(Debug, Default)]
pub struct EvSequencer {
    turnstiles: Turnstiles,
}

/// Held while a submit for one EV is in flight.
#[derive(Debug)]
pub struct Turn {
    ev_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    turnstiles: Turnstiles,
}

impl EvSequencer {
    /// An empty sequencer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for `ev_id`'s turn. Waiters are served in arrival order.
    pub async fn acquire(&self, ev_id: &str) -> Turn {
        let gate = {
            let mut map = self.turnstiles.lock().unwrap_or_else(|p| p.into_inner());
            // A waiter cancelled after being handed the turn leaves an entry
            // that no `Turn` will prune; only the map references it.
            map.retain(|id, gate| id == ev_id || Arc::strong_count(gate) > 1);
            Arc::clone(map.entry(ev_id.to_string()).or_default())
        };
        let guard = gate.lock_owned().await;
        Turn {
            ev_id: ev_id.to_string(),
            guard: Some(guard),
            turnstiles: Arc::clone(&self.turnstiles),
        }
    }

    /// Number of EVs with a live turnstile.
    pub fn active(&self) -> usize {
        self.turnstiles.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        // Release first so the strong count below only sees waiters.
        drop(self.guard.take());
        let mut map = self.turnstiles.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(gate) = map.get(&self.ev_id) {
            if Arc::strong_count(gate) == 1 {
                map.remove(&self.ev_id);
            }
        }
    }
}
