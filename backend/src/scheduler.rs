//! Per-page cancellable task registry.
//!
//! At most one task runs per page. Starting another for the same page aborts
//! the first, whose caller then sees `RenderCancelled`. Cancelling an absent,
//! finished or already-cancelled task does nothing.

use std::{
    collections::HashMap,
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{EditError, EditResult};

struct Slot {
    ticket: u64,
    abort: AbortHandle,
}

#[derive(Default)]
pub struct PageTaskScheduler {
    slots: Mutex<HashMap<u32, Slot>>,
    next_ticket: AtomicU64,
}

impl PageTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<T, F>(&self, page: u32, task: F) -> EditResult<T>
    where
        T: Send + 'static,
        F: Future<Output = EditResult<T>> + Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(task);
        let previous = self.slots.lock().insert(
            page,
            Slot {
                ticket,
                abort: handle.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            debug!(page, "superseding in-flight page task");
            previous.abort.abort();
        }

        let joined = handle.await;

        let superseded = {
            let mut slots = self.slots.lock();
            match slots.get(&page) {
                Some(slot) if slot.ticket == ticket => {
                    slots.remove(&page);
                    false
                }
                Some(_) => true,
                None => false,
            }
        };

        match joined {
            Ok(_) if superseded => Err(EditError::RenderCancelled(page)),
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(EditError::RenderCancelled(page)),
            Err(err) => Err(EditError::Internal(anyhow!("page {page} task failed: {err}"))),
        }
    }

    pub fn cancel(&self, page: u32) {
        if let Some(slot) = self.slots.lock().remove(&page) {
            debug!(page, "cancelling page task");
            slot.abort.abort();
        }
    }

    /// Cancel every task except the one for `keep`.
    pub fn cancel_others(&self, keep: u32) {
        let mut slots = self.slots.lock();
        slots.retain(|page, slot| {
            if *page == keep {
                true
            } else {
                slot.abort.abort();
                false
            }
        });
    }

    pub fn cancel_all(&self) {
        for (_, slot) in self.slots.lock().drain() {
            slot.abort.abort();
        }
    }

    pub fn active_pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.slots.lock().keys().copied().collect();
        pages.sort_unstable();
        pages
    }
}
