//! 执行上下文
//!
//! 交给正在运行的 workload 的能力集合：资源访问与生命周期钩子。

use std::collections::HashMap;
use std::sync::Arc;

use super::error::{Failure, WorkloadResult};
use super::resource::{Memory, NetworkInterface, ProcessingUnit, StorageInterface};
use super::workload::Workload;
use crate::sim::Simulator;

/// 机器的自由格式元数据。
pub type Meta = HashMap<String, serde_json::Value>;

/// 执行上下文的共享句柄。
///
/// workload 可以在 `on_start` 中克隆它，稍后（例如在定时器里）发出完成信号；
/// 自己的 `on_stop` 返回之后必须丢弃。
pub type ContextRef = Arc<dyn MachineContext>;

/// 运行中的 workload 能访问的资源与生命周期钩子。
pub trait MachineContext: Send + Sync {
    /// 宿主引擎的调度句柄。
    fn graph(&self) -> &Simulator;

    fn meta(&self) -> &Meta;

    fn cpus(&self) -> &[ProcessingUnit];

    fn memory(&self) -> &Memory;

    fn network_interfaces(&self) -> &[NetworkInterface];

    fn storage_interfaces(&self) -> &[StorageInterface];

    /// 在此上下文上运行的 workload 剩余工作的 snapshot。
    fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>>;

    /// 把共享资源计数恢复到干净状态。
    fn reset(&self);

    /// 通知运行中的 workload 已结束（`None`）或失败。
    fn shutdown(&self, cause: Option<Failure>);
}
