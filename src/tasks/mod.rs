pub mod model;
pub mod operation;
pub mod scheduler;
pub mod store;

pub use model::{Task, TaskKind, TaskStatus};
pub use scheduler::{Scheduler, SchedulerError, StartRequest};
pub use store::{StoreError, TaskStore};
