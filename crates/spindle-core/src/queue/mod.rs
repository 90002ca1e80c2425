//! Queue module: priority ordering and retry backoff.

mod priority;
mod retry;

pub use priority::PriorityQueue;
pub use retry::RetryPolicy;
