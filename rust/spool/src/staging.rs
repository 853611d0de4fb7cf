use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Items accepted by `put` in this process and not yet written to the
/// channel, shared by every clone of one queue.
///
/// The buffer is process-local. A forked child gets a copy of the parent's
/// buffer, including pending items and a feeder thread parked on its condition
/// variable that does not exist in the child. The first access from a new
/// process therefore swaps in a fresh buffer; the copied one is left alone,
/// since waking or dropping anything tied to the parent's feeder is not
/// possible from the child.
pub(crate) struct Staging<T> {
    current: Mutex<Arc<StagingBuffer<T>>>,
}

/// One process's buffer and the feeder draining it.
pub(crate) struct StagingBuffer<T> {
    owner_pid: u32,
    state: Mutex<StagingState<T>>,
    not_empty: Condvar,
}

pub(crate) struct StagingState<T> {
    pub items: VecDeque<T>,
    pub feeder: Option<JoinHandle<()>>,
    /// Set by a feeder that has stopped; nothing staged afterwards would be sent.
    pub closed: bool,
}

impl<T> Staging<T> {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Arc::new(StagingBuffer::new())),
        }
    }

    /// This process's buffer.
    pub fn buffer(&self) -> Arc<StagingBuffer<T>> {
        let mut current = self.current.lock();
        let pid = std::process::id();
        if current.owner_pid != pid {
            tracing::debug!(
                parent = current.owner_pid,
                pid,
                "replacing staging buffer inherited across fork"
            );
            let inherited = std::mem::replace(&mut *current, Arc::new(StagingBuffer::new()));
            // Still referenced by the parent's feeder.
            std::mem::forget(inherited);
        }
        current.clone()
    }
}

impl<T> StagingBuffer<T> {
    fn new() -> Self {
        Self {
            owner_pid: std::process::id(),
            state: Mutex::new(StagingState {
                items: VecDeque::new(),
                feeder: None,
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, StagingState<T>> {
        self.state.lock()
    }

    /// Wake the feeder after pushing.
    pub fn notify(&self) {
        self.not_empty.notify_one();
    }

    /// Mark the buffer closed and drop everything still staged, returning how
    /// many items were dropped.
    pub fn close(&self) -> usize {
        let stranded = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.items)
        };
        stranded.len()
    }

    /// Wait for and remove the oldest item.
    pub fn pop_blocking(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return item;
            }
            self.not_empty.wait(&mut state);
        }
    }
}
