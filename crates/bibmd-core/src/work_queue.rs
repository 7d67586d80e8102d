//! Lock-free work queue for handing units of work to pool threads

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Lock-free queue; each item is claimed by exactly one caller of [`next`](WorkQueue::next).
///
/// Items are handed out in insertion order. Once the cancel flag is raised
/// no further items are handed out, but items already claimed stay claimed.
pub struct WorkQueue<'a, S> {
    items: Vec<S>,
    cursor: AtomicUsize,
    cancel: &'a AtomicBool,
}

impl<'a, S> WorkQueue<'a, S> {
    pub fn new(items: Vec<S>, cancel: &'a AtomicBool) -> Self {
        log::debug!("{} items in work queue", items.len());
        Self {
            items,
            cursor: AtomicUsize::new(0),
            cancel,
        }
    }

    /// Claim the next item, or `None` when drained or cancelled.
    pub fn next(&self) -> Option<&S> {
        if self.cancel.load(Ordering::Relaxed) {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Number of items handed out so far.
    pub fn claimed(&self) -> usize {
        self.cursor.load(Ordering::Relaxed).min(self.items.len())
    }
}
