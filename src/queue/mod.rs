/*!
 * Queue Module
 * Priority task queue with bounded-parallel provider dispatch
 */

mod entry;
pub mod processor;
pub mod types;

pub use processor::QueueProcessor;
pub use types::{QueueStats, Task, TaskOutcome, TaskStatus};
