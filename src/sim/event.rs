//! 事件 trait
//!
//! 定义仿真事件接口。

use super::simulator::Simulator;

/// 事件：可被调度执行。使用 `self: Box<Self>` 以支持 move/所有权转移。
///
/// 执行时拿到的是共享的 [`Simulator`] 句柄，事件内部可以继续调度新事件。
pub trait Event: Send + 'static {
    fn execute(self: Box<Self>, sim: &Simulator);
}

/// 闭包即事件，方便叶子 workload 注册一次性定时器。
impl<F> Event for F
where
    F: FnOnce(&Simulator) + Send + 'static,
{
    fn execute(self: Box<Self>, sim: &Simulator) {
        (*self)(sim)
    }
}
