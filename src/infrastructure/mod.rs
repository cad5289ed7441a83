//! Infrastructure Layer - 端口的具体实现

pub mod events;
pub mod farm;
pub mod memory;
pub mod persistence;
pub mod worker;
