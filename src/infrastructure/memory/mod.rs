//! Memory - 进程内状态

mod task_registry;

pub use task_registry::{RegistrySnapshot, TaskEntry, TaskRegistry};
