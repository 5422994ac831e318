//! Workload 抽象
//!
//! 叶子 workload（runtime、trace）与组合 workload（chain）都实现同一个
//! [`Workload`] trait，因此 chain 可以任意嵌套。

mod chain;
mod runtime;
mod trace;

pub use chain::ChainWorkload;
pub use runtime::RuntimeWorkload;
pub use trace::{TraceFragment, TraceWorkload};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::context::ContextRef;
use super::error::{WorkloadError, WorkloadResult};
use crate::sim::{SimTime, Simulator};

/// 一个模拟计算负载。
pub trait Workload: Send + fmt::Debug {
    /// 以 `graph` 的当前时间作为整条 chain 的绝对起始时间；在任何执行开始前
    /// 调用一次。workload 可以保留这个时钟句柄，用于计算相对 offset 的位置。
    fn set_offset(&mut self, graph: &Simulator);

    /// 在给定的执行上下文上开始执行。
    fn on_start(&mut self, ctx: &ContextRef) -> WorkloadResult<()>;

    /// 在给定的执行上下文上结束执行。
    fn on_stop(&mut self, ctx: &ContextRef) -> WorkloadResult<()>;

    /// 剩余（尚未执行）工作的独立副本，与原对象不共享可变状态。
    fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>>;
}

/// 把多个 workload 串成一个顺序执行的 chain。
pub fn chain(workloads: Vec<Box<dyn Workload>>) -> ChainWorkload {
    ChainWorkload::new(workloads)
}

/// 以固定 CPU 利用率运行 `duration` 的 workload。
pub fn runtime(duration: SimTime, utilization: f64) -> Result<RuntimeWorkload, WorkloadError> {
    RuntimeWorkload::new(duration, utilization)
}

/// 按片段回放 CPU 需求的 workload。
pub fn trace(fragments: Vec<TraceFragment>) -> Result<TraceWorkload, WorkloadError> {
    TraceWorkload::new(fragments)
}

/// 叶子 workload 的定时器取消标记：`on_stop` 之后触发的定时器直接忽略。
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
