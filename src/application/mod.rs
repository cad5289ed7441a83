//! Application Layer - 用例与端口

pub mod commands;
pub mod error;
pub mod ports;
pub mod queries;

pub use commands::{CancelTaskHandler, StartBatchCommand, StartBatchHandler};
pub use error::EngineError;
pub use queries::{GetRepairStatsHandler, QueryTaskStatusHandler, TaskStatusView};
