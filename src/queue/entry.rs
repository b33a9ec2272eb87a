/*!
 * Queue Entry Types
 * Internal heap ordering for task dispatch
 */

use super::types::Task;

/// Heap entry: lower priority value wins, ties go to submission order
///
/// The sequence number is assigned at submit time, so equal-priority tasks
/// dispatch in strict FIFO order.
#[derive(Debug)]
pub(super) struct QueueEntry {
    pub task: Task,
    pub seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.task.id == other.task.id
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap: invert so the numerically lowest
        // (priority, seq) pair surfaces first
        other
            .task
            .priority
            .cmp(&self.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TenantId;
    use std::collections::BinaryHeap;

    fn entry(priority: u8, seq: u64) -> QueueEntry {
        QueueEntry {
            task: Task::new(
                TenantId::new_v4(),
                priority,
                "build",
                serde_json::json!({}),
                3,
            ),
            seq,
        }
    }

    #[test]
    fn test_lower_priority_value_pops_first() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(5, 0));
        heap.push(entry(1, 1));
        heap.push(entry(9, 2));

        assert_eq!(heap.pop().unwrap().task.priority, 1);
        assert_eq!(heap.pop().unwrap().task.priority, 5);
        assert_eq!(heap.pop().unwrap().task.priority, 9);
    }

    #[test]
    fn test_fifo_among_equal_priority() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(5, 10));
        heap.push(entry(5, 11));
        heap.push(entry(5, 12));

        assert_eq!(heap.pop().unwrap().seq, 10);
        assert_eq!(heap.pop().unwrap().seq, 11);
        assert_eq!(heap.pop().unwrap().seq, 12);
    }
}
