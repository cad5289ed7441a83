//! Task Context - 任务生命周期领域模型

mod counters;
mod outcome;
mod status;

pub use counters::TaskCounters;
pub use outcome::{DeviceOutcome, KeywordClassifier, OutcomeClass, OutcomeClassifier};
pub use status::{AggregateStatus, TaskStatus};
