//! # Index Propagation Queue
//!
//! Content writes commit to the Durable Store first and publish their
//! index work here; the search index catches up asynchronously when the
//! queue is drained. Delivery is at-least-once: a task that fails mid
//! drain is pushed back to the front and retried on the next drain, and
//! re-indexing the same node twice converges to the same postings.

use crate::NodeId;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One unit of deferred index work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexTask {
    /// Re-tokenize the node's stored content (all locales) and replace
    /// its postings.
    Reindex { node: NodeId },
    /// Drop every posting for the node (content or node removed).
    Remove { node: NodeId },
}

/// FIFO task queue shared between writers and the drain loop.
#[derive(Debug, Default)]
pub struct IndexQueue {
    tasks: Mutex<VecDeque<IndexTask>>,
}

impl IndexQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task.
    pub fn enqueue(&self, task: IndexTask) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push_back(task);
        }
    }

    /// Take the next task, oldest first.
    pub fn pop(&self) -> Option<IndexTask> {
        self.tasks.lock().ok().and_then(|mut tasks| tasks.pop_front())
    }

    /// Put a failed task back at the front so it retries before newer
    /// work.
    pub fn requeue_front(&self, task: IndexTask) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push_front(task);
        }
    }

    /// Pending task count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    /// True when no work is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = IndexQueue::new();
        queue.enqueue(IndexTask::Remove { node: NodeId(1) });
        queue.enqueue(IndexTask::Remove { node: NodeId(2) });

        assert_eq!(queue.pop(), Some(IndexTask::Remove { node: NodeId(1) }));
        assert_eq!(queue.pop(), Some(IndexTask::Remove { node: NodeId(2) }));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn requeue_front_retries_before_newer_work() {
        let queue = IndexQueue::new();
        queue.enqueue(IndexTask::Remove { node: NodeId(1) });
        queue.enqueue(IndexTask::Remove { node: NodeId(2) });

        let failed = queue.pop().expect("task");
        queue.requeue_front(failed.clone());

        assert_eq!(queue.pop(), Some(failed));
    }

    #[test]
    fn len_tracks_pending_work() {
        let queue = IndexQueue::new();
        assert!(queue.is_empty());

        queue.enqueue(IndexTask::Reindex { node: NodeId(1) });
        assert_eq!(queue.len(), 1);

        let _ = queue.pop();
        assert!(queue.is_empty());
    }
}
