/*!
 * Resource Module
 * Port, memory, cpu, and storage allocation for tenant workloads
 */

pub mod pool;
pub mod types;

pub use pool::{ResourcePool, SharedResourcePool};
pub use types::{ResourceAllocation, ResourceRequirements};
