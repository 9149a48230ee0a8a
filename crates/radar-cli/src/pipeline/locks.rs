//! Per-key write serialization for analysis records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use radar_core::AnalysisKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Idle entries are dropped once the table grows past this size.
const PRUNE_AT: usize = 4096;

/// One async mutex per (item, product, tenant) triple.
///
/// Holding the guard spans the read-score-write sequence for that triple, so
/// two workers never interleave on the same record.
#[derive(Default)]
pub(crate) struct AnalysisLocks {
    slots: Mutex<HashMap<AnalysisKey, Arc<AsyncMutex<()>>>>,
}

impl AnalysisLocks {
    pub(crate) async fn acquire(&self, key: &AnalysisKey) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    fn slot(&self, key: &AnalysisKey) -> Arc<AsyncMutex<()>> {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slots.len() >= PRUNE_AT {
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().map_or(0, |s| s.len())
    }
}
