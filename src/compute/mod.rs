//! 计算仿真模块
//!
//! 包含 workload 抽象、顺序组合 workload（chain）、执行上下文、
//! 模拟机器与场景描述。

// 子模块声明
mod context;
mod error;
mod machine;
mod resource;
mod spec;
pub mod workload;

// 重新导出公共接口
pub use context::{ContextRef, MachineContext, Meta};
pub use error::{Failure, WorkloadError, WorkloadResult, merge_cause};
pub use machine::{MachineOutcome, MachineStatus, SimMachine, SimMachineContext};
pub use resource::{
    CpuModel, IoCounters, MachineModel, Memory, NetworkInterface, NetworkModel, ProcessingUnit,
    StorageInterface, StorageModel,
};
pub use spec::{FragmentSpec, MachineSpec, ScenarioSpec, WorkloadSpec};
pub use workload::{ChainWorkload, RuntimeWorkload, TraceFragment, TraceWorkload, Workload};
