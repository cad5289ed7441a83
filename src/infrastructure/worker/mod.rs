//! Worker - 任务执行引擎

mod batch_coordinator;
mod device_workflow;
mod port_allocator;
mod rpc_repair;
mod task_state;

pub use batch_coordinator::BatchCoordinator;
pub use device_workflow::{DeviceWorkflow, WorkflowMode, WorkflowOutcome};
pub use port_allocator::{calculate_default_ports, PortAllocator, PortPair};
pub use rpc_repair::{RepairLevel, RepairStats, RpcRepairCoordinator, TcpProbe, TokioTcpProbe};
pub use task_state::{ErrorListener, ProgressListener, RetryPolicy, TaskSnapshot, TaskState};
