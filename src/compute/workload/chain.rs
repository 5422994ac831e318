//! 顺序组合 workload（chain）
//!
//! chain 持有一个固定顺序的子 workload 序列和当前活动下标。子 workload 看到的
//! 执行上下文是 [`TransitionContext`]：它把资源访问原样转发给真实上下文，但
//! 拦截 `shutdown`，把“我结束了”变成“停掉当前、重置资源、启动下一个”。
//! 只有序列耗尽或切换失败时，shutdown 才会转发给真实上下文。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, trace, warn};

use super::Workload;
use crate::compute::context::{ContextRef, MachineContext, Meta};
use crate::compute::error::{Failure, WorkloadError, WorkloadResult, merge_cause};
use crate::compute::resource::{Memory, NetworkInterface, ProcessingUnit, StorageInterface};
use crate::sim::Simulator;

/// 顺序执行一组 workload，对宿主表现为单个 workload。
pub struct ChainWorkload {
    state: Arc<Mutex<ChainState>>,
    active_context: Option<Arc<TransitionContext>>,
}

struct ChainState {
    // 子 workload 的回调执行期间，对应槽位被借出（None）。
    workloads: Vec<Option<Box<dyn Workload>>>,
    active: usize,
    in_callback: bool,
    // 回调期间收到的 shutdown 信号，回调返回后再处理。
    pending: Option<Option<Failure>>,
}

impl ChainWorkload {
    pub fn new(workloads: Vec<Box<dyn Workload>>) -> Self {
        Self::with_active_index(workloads, 0)
    }

    /// 从指定下标开始执行；下标超过序列长度时视为已耗尽。
    pub fn with_active_index(workloads: Vec<Box<dyn Workload>>, active: usize) -> Self {
        let active = active.min(workloads.len());
        Self {
            state: Arc::new(Mutex::new(ChainState {
                workloads: workloads.into_iter().map(Some).collect(),
                active,
                in_callback: false,
                pending: None,
            })),
            active_context: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().expect("chain state lock")
    }

    pub fn len(&self) -> usize {
        self.lock().workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_index(&self) -> usize {
        self.lock().active
    }

    pub fn is_exhausted(&self) -> bool {
        let s = self.lock();
        s.active >= s.workloads.len()
    }

    /// 是否装有活动的 transition context（启动之后、停止之前）。
    pub fn has_active_context(&self) -> bool {
        self.active_context.is_some()
    }

    /// 剩余工作：`[active..]` 逐个 snapshot，新 chain 从 0 开始。
    pub fn remaining(&self) -> WorkloadResult<ChainWorkload> {
        let s = self.lock();
        let mut workloads = Vec::with_capacity(s.workloads.len() - s.active);
        for slot in &s.workloads[s.active..] {
            let workload = slot.as_ref().ok_or(WorkloadError::Busy)?;
            workloads.push(workload.snapshot()?);
        }
        Ok(ChainWorkload::new(workloads))
    }
}

impl Workload for ChainWorkload {
    fn set_offset(&mut self, graph: &Simulator) {
        let mut s = self.lock();
        for workload in s.workloads.iter_mut().flatten() {
            workload.set_offset(graph);
        }
    }

    #[tracing::instrument(skip(self, ctx), fields(len = self.len(), active = self.active_index()))]
    fn on_start(&mut self, ctx: &ContextRef) -> WorkloadResult<()> {
        let active = {
            let s = self.lock();
            if s.active >= s.workloads.len() {
                debug!("chain 已耗尽，忽略启动");
                return Ok(());
            }
            s.active
        };

        let context = TransitionContext::new(Arc::clone(&self.state), Arc::clone(ctx));
        self.active_context = Some(Arc::clone(&context));

        match context.do_start(active) {
            StartOutcome::Running => Ok(()),
            StartOutcome::Finished(cause) => {
                context.transition(cause);
                Ok(())
            }
            StartOutcome::Failed(failure) => {
                // 补偿性 stop 已经执行过，之后宿主的 on_stop 不再重复停止。
                context.retire();
                self.active_context = None;
                debug!(error = %failure, "子 workload 启动失败");
                Err(failure)
            }
        }
    }

    #[tracing::instrument(skip(self, _ctx), fields(len = self.len(), active = self.active_index()))]
    fn on_stop(&mut self, _ctx: &ContextRef) -> WorkloadResult<()> {
        // 先清掉引用再回调，重入的 shutdown 看不到半拆除的状态。
        let context = self.active_context.take();

        let active = {
            let s = self.lock();
            if s.active >= s.workloads.len() {
                if let Some(context) = &context {
                    context.retire();
                }
                debug!("chain 已耗尽，忽略停止");
                return Ok(());
            }
            s.active
        };

        let Some(context) = context else {
            debug!("chain 尚未启动，无需停止");
            return Ok(());
        };

        let stop_error = context.do_stop(active);
        context.retire();
        match stop_error {
            None => Ok(()),
            Some(failure) => Err(failure),
        }
    }

    fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>> {
        Ok(Box::new(self.remaining()?))
    }
}

impl fmt::Debug for ChainWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_lock() {
            Ok(s) => f
                .debug_struct("ChainWorkload")
                .field("active", &s.active)
                .field("workloads", &Slots(&s.workloads))
                .finish(),
            Err(_) => f.debug_struct("ChainWorkload").finish_non_exhaustive(),
        }
    }
}

struct Slots<'a>(&'a [Option<Box<dyn Workload>>]);

impl fmt::Debug for Slots<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for slot in self.0 {
            match slot {
                Some(workload) => list.entry(workload),
                None => list.entry(&format_args!("<busy>")),
            };
        }
        list.finish()
    }
}

enum StartOutcome {
    Running,
    /// 启动成功，但在 `on_start` 内部就发出了 shutdown 信号。
    Finished(Option<Failure>),
    Failed(Failure),
}

/// 交给活动子 workload 的执行上下文，拦截 shutdown 以驱动 chain 切换。
pub(crate) struct TransitionContext {
    me: Weak<TransitionContext>,
    chain: Arc<Mutex<ChainState>>,
    ctx: ContextRef,
    retired: AtomicBool,
}

impl TransitionContext {
    fn new(chain: Arc<Mutex<ChainState>>, ctx: ContextRef) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            chain,
            ctx,
            retired: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.chain.lock().expect("chain state lock")
    }

    fn handle(&self) -> ContextRef {
        let me: Arc<TransitionContext> = self
            .me
            .upgrade()
            .expect("transition context is only reachable through an Arc");
        me
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    /// 借出槽位 `idx` 的 workload 执行一次回调，返回回调结果和期间收到的信号。
    fn call<F>(&self, idx: usize, f: F) -> (WorkloadResult<()>, Option<Option<Failure>>)
    where
        F: FnOnce(&mut Box<dyn Workload>, &ContextRef) -> WorkloadResult<()>,
    {
        let (mut workload, outer) = {
            let mut s = self.lock();
            let Some(workload) = s.workloads.get_mut(idx).and_then(Option::take) else {
                return (Err(WorkloadError::Busy.into()), None);
            };
            let outer = std::mem::replace(&mut s.in_callback, true);
            (workload, outer)
        };

        let handle = self.handle();
        let result = f(&mut workload, &handle);

        let mut s = self.lock();
        s.workloads[idx] = Some(workload);
        s.in_callback = outer;
        (result, s.pending.take())
    }

    /// 启动失败时立即对同一 workload 执行补偿性的 stop。
    fn do_start(&self, idx: usize) -> StartOutcome {
        trace!(idx, "启动子 workload");
        let (result, pending) = self.call(idx, |w, ctx| w.on_start(ctx));
        match result {
            Ok(()) => match pending {
                None => StartOutcome::Running,
                Some(cause) => StartOutcome::Finished(cause),
            },
            Err(mut failure) => {
                if let Some(stop_error) = self.do_stop(idx) {
                    failure.suppress(stop_error);
                }
                if let Some(Some(signaled)) = pending {
                    failure.suppress(signaled);
                }
                StartOutcome::Failed(failure)
            }
        }
    }

    fn do_stop(&self, idx: usize) -> Option<Failure> {
        trace!(idx, "停止子 workload");
        let (result, pending) = self.call(idx, |w, ctx| w.on_stop(ctx));
        let signaled = match pending {
            Some(Some(failure)) => Some(failure),
            Some(None) => {
                trace!(idx, "忽略停止过程中的完成信号");
                None
            }
            None => None,
        };
        merge_cause(result.err(), signaled)
    }

    /// 当前活动 workload 结束：停掉它，启动下一个；耗尽或失败时转发 shutdown。
    #[tracing::instrument(skip(self, cause), fields(failed = cause.is_some()))]
    fn transition(&self, mut cause: Option<Failure>) {
        loop {
            let (just_finished, next, len) = {
                let mut s = self.lock();
                let len = s.workloads.len();
                if s.active >= len {
                    return;
                }
                let just_finished = s.active;
                s.active += 1;
                (just_finished, s.active, len)
            };
            debug!(just_finished, next, len, "子 workload 结束");

            let stop_error = self.do_stop(just_finished);
            let stopped_cleanly = stop_error.is_none();
            cause = merge_cause(cause, stop_error);

            if stopped_cleanly && next < len {
                self.ctx.reset();
                match self.do_start(next) {
                    StartOutcome::Running => {
                        if let Some(dropped) = cause {
                            warn!(error = %dropped, next, "下一个 workload 已启动，不再转发该失败");
                        }
                        debug!(next, "🔁 切换到下一个子 workload");
                        return;
                    }
                    StartOutcome::Finished(signaled) => {
                        if let Some(dropped) = cause.take() {
                            warn!(error = %dropped, next, "下一个 workload 已启动，不再转发该失败");
                        }
                        cause = signaled;
                        continue;
                    }
                    StartOutcome::Failed(start_error) => {
                        cause = merge_cause(cause, Some(start_error));
                    }
                }
            }

            if next < len {
                // 切换失败：不再尝试后续 workload。
                self.lock().active = len;
            }
            info!(
                failed = cause.is_some(),
                exhausted = next >= len,
                "chain 结束，转发 shutdown"
            );
            self.ctx.shutdown(cause);
            return;
        }
    }
}

impl MachineContext for TransitionContext {
    fn graph(&self) -> &Simulator {
        self.ctx.graph()
    }

    fn meta(&self) -> &Meta {
        self.ctx.meta()
    }

    fn cpus(&self) -> &[ProcessingUnit] {
        self.ctx.cpus()
    }

    fn memory(&self) -> &Memory {
        self.ctx.memory()
    }

    fn network_interfaces(&self) -> &[NetworkInterface] {
        self.ctx.network_interfaces()
    }

    fn storage_interfaces(&self) -> &[StorageInterface] {
        self.ctx.storage_interfaces()
    }

    /// 只返回当前活动子 workload 的 snapshot；其余部分由 chain 自己负责。
    fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>> {
        let s = self.lock();
        match s.workloads.get(s.active) {
            None => Ok(Box::new(ChainWorkload::new(Vec::new()))),
            Some(slot) => slot.as_ref().ok_or(WorkloadError::Busy)?.snapshot(),
        }
    }

    fn reset(&self) {
        self.ctx.reset();
    }

    fn shutdown(&self, cause: Option<Failure>) {
        if self.retired.load(Ordering::SeqCst) {
            debug!("transition context 已失效，忽略 shutdown");
            return;
        }
        {
            let mut s = self.lock();
            if s.active >= s.workloads.len() {
                debug!("chain 已耗尽，忽略 shutdown");
                return;
            }
            if s.in_callback {
                let earlier = s.pending.take().flatten();
                s.pending = Some(merge_cause(earlier, cause));
                trace!(active = s.active, "回调中收到 shutdown，延后处理");
                return;
            }
        }
        self.transition(cause);
    }
}
