//! Domain model (ids, priority, status, task, snapshot, events).

pub mod events;
pub mod ids;
pub mod priority;
pub mod snapshot;
pub mod status;
pub mod task;
pub mod task_type;

pub use events::TaskEvent;
pub use ids::{ParseTaskIdError, TaskId};
pub use priority::Priority;
pub use snapshot::TaskSnapshot;
pub use status::TaskStatus;
pub use task::Task;
pub use task_type::TaskType;
