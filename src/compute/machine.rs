//! 模拟机器（真实执行上下文）
//!
//! `SimMachine` 持有资源与一个根 workload。根 workload 通过 `shutdown`
//! 通知结束，机器随即停止它、释放资源计数并记录结果。启动失败不会抛给调用方，
//! 而是走同一条 shutdown 路径记录为失败结果。

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, trace, warn};

use super::context::{ContextRef, MachineContext, Meta};
use super::error::{Failure, WorkloadError, WorkloadResult, merge_cause};
use super::resource::{
    MachineModel, Memory, NetworkInterface, ProcessingUnit, StorageInterface,
};
use super::workload::{ChainWorkload, Workload};
use crate::sim::{SimTime, Simulator};

/// 机器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// 一次运行的结果
#[derive(Debug, Clone, PartialEq)]
pub struct MachineOutcome {
    pub stopped_at: SimTime,
    pub failure: Option<Failure>,
}

/// 模拟机器句柄，克隆后共享同一台机器。
#[derive(Clone)]
pub struct SimMachine {
    ctx: Arc<SimMachineContext>,
}

/// 机器的执行上下文实现。
pub struct SimMachineContext {
    me: Weak<SimMachineContext>,
    graph: Simulator,
    meta: Meta,
    cpus: Vec<ProcessingUnit>,
    memory: Memory,
    network: Vec<NetworkInterface>,
    storage: Vec<StorageInterface>,
    state: Mutex<MachineState>,
}

struct MachineState {
    status: MachineStatus,
    // 回调执行期间被借出（None）。
    workload: Option<Box<dyn Workload>>,
    in_callback: bool,
    pending: Option<Option<Failure>>,
    resets: u64,
    outcome: Option<MachineOutcome>,
}

impl SimMachine {
    pub fn new(model: &MachineModel, graph: Simulator) -> Self {
        Self::with_meta(model, graph, Meta::new())
    }

    pub fn with_meta(model: &MachineModel, graph: Simulator, meta: Meta) -> Self {
        let ctx = Arc::new_cyclic(|me| SimMachineContext {
            me: me.clone(),
            graph,
            meta,
            cpus: model
                .cpus
                .iter()
                .enumerate()
                .map(|(id, m)| ProcessingUnit::new(id, m.clone()))
                .collect(),
            memory: Memory::new(model.memory_mib),
            network: model.network.iter().cloned().map(NetworkInterface::new).collect(),
            storage: model.storage.iter().cloned().map(StorageInterface::new).collect(),
            state: Mutex::new(MachineState {
                status: MachineStatus::Idle,
                workload: None,
                in_callback: false,
                pending: None,
                resets: 0,
                outcome: None,
            }),
        });
        Self { ctx }
    }

    /// 机器的执行上下文句柄。
    pub fn context(&self) -> ContextRef {
        let ctx: Arc<SimMachineContext> = Arc::clone(&self.ctx);
        ctx
    }

    pub fn status(&self) -> MachineStatus {
        self.ctx.lock().status
    }

    pub fn outcome(&self) -> Option<MachineOutcome> {
        self.ctx.lock().outcome.clone()
    }

    /// `reset()` 被调用的次数。
    pub fn resets(&self) -> u64 {
        self.ctx.lock().resets
    }

    /// 在机器上启动一个根 workload（空闲或已停止的机器都可以启动）。
    #[tracing::instrument(skip(self, workload), fields(now = ?self.ctx.graph.now()))]
    pub fn start(&self, mut workload: Box<dyn Workload>) -> Result<(), WorkloadError> {
        {
            let mut s = self.ctx.lock();
            if matches!(s.status, MachineStatus::Running | MachineStatus::Stopping) {
                return Err(WorkloadError::MachineRunning);
            }
            workload.set_offset(&self.ctx.graph);
            s.workload = Some(workload);
            s.status = MachineStatus::Running;
            s.outcome = None;
        }
        info!("▶️  机器启动 workload");

        let (result, pending) = self.ctx.call(|w, ctx| w.on_start(ctx));
        match (result, pending) {
            (Ok(()), None) => {}
            (Ok(()), Some(cause)) => self.ctx.finish(cause),
            (Err(failure), pending) => {
                warn!(error = %failure, "workload 启动失败");
                self.ctx.finish(merge_cause(Some(failure), pending.flatten()));
            }
        }
        Ok(())
    }

    /// 外部强制停止；返回本次运行的结果。
    pub fn stop(&self) -> Option<MachineOutcome> {
        self.ctx.finish(None);
        self.outcome()
    }

    /// 根 workload 剩余工作的 snapshot。
    pub fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>> {
        self.ctx.snapshot()
    }
}

impl SimMachineContext {
    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().expect("machine state lock")
    }

    fn handle(&self) -> ContextRef {
        let me: Arc<SimMachineContext> = self
            .me
            .upgrade()
            .expect("machine context is only reachable through an Arc");
        me
    }

    fn call<F>(&self, f: F) -> (WorkloadResult<()>, Option<Option<Failure>>)
    where
        F: FnOnce(&mut Box<dyn Workload>, &ContextRef) -> WorkloadResult<()>,
    {
        let (mut workload, outer) = {
            let mut s = self.lock();
            let Some(workload) = s.workload.take() else {
                return (Err(WorkloadError::Busy.into()), None);
            };
            (workload, std::mem::replace(&mut s.in_callback, true))
        };

        let handle = self.handle();
        let result = f(&mut workload, &handle);

        let mut s = self.lock();
        s.workload = Some(workload);
        s.in_callback = outer;
        (result, s.pending.take())
    }

    /// 停止根 workload 并记录结果；非运行状态下为空操作。
    fn finish(&self, cause: Option<Failure>) {
        {
            let mut s = self.lock();
            if s.status != MachineStatus::Running {
                return;
            }
            s.status = MachineStatus::Stopping;
        }

        let (result, pending) = self.call(|w, ctx| w.on_stop(ctx));
        let cause = merge_cause(cause, result.err());
        let cause = merge_cause(cause, pending.flatten());
        self.release();

        let stopped_at = self.graph.now();
        match &cause {
            None => info!(stopped_at = ?stopped_at, "✅ 机器上的 workload 完成"),
            Some(failure) => warn!(stopped_at = ?stopped_at, error = %failure, "机器因失败停止"),
        }

        let mut s = self.lock();
        s.status = MachineStatus::Stopped;
        s.outcome = Some(MachineOutcome {
            stopped_at,
            failure: cause,
        });
    }

    fn release(&self) {
        for cpu in &self.cpus {
            cpu.reset();
        }
        self.memory.reset();
        for nic in &self.network {
            nic.reset();
        }
        for disk in &self.storage {
            disk.reset();
        }
    }
}

impl MachineContext for SimMachineContext {
    fn graph(&self) -> &Simulator {
        &self.graph
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn cpus(&self) -> &[ProcessingUnit] {
        &self.cpus
    }

    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn network_interfaces(&self) -> &[NetworkInterface] {
        &self.network
    }

    fn storage_interfaces(&self) -> &[StorageInterface] {
        &self.storage
    }

    fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>> {
        let s = self.lock();
        match s.status {
            MachineStatus::Idle => Ok(Box::new(ChainWorkload::new(Vec::new()))),
            _ => s.workload.as_ref().ok_or(WorkloadError::Busy)?.snapshot(),
        }
    }

    fn reset(&self) {
        self.release();
        let mut s = self.lock();
        s.resets += 1;
        trace!(resets = s.resets, "资源计数已重置");
    }

    fn shutdown(&self, cause: Option<Failure>) {
        {
            let mut s = self.lock();
            if !matches!(s.status, MachineStatus::Running | MachineStatus::Stopping) {
                debug!(status = ?s.status, "机器未运行，忽略 shutdown");
                return;
            }
            if s.in_callback {
                let earlier = s.pending.take().flatten();
                s.pending = Some(merge_cause(earlier, cause));
                return;
            }
        }
        self.finish(cause);
    }
}
