use crate::compute::{
    ChainWorkload, ContextRef, Failure, MachineContext, Memory, Meta, NetworkInterface,
    ProcessingUnit, StorageInterface, Workload, WorkloadError, WorkloadResult,
};
use crate::sim::{SimTime, Simulator};
use std::fmt;
use std::sync::{Arc, Mutex};

pub(crate) type Log = Arc<Mutex<Vec<String>>>;

pub(crate) fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn entries(log: &Log) -> Vec<String> {
    log.lock().expect("log lock").clone()
}

fn push(log: &Log, entry: String) {
    log.lock().expect("log lock").push(entry);
}

pub(crate) fn start_error(name: &str) -> WorkloadError {
    WorkloadError::Start {
        workload: name.to_string(),
        reason: "boom".to_string(),
    }
}

pub(crate) fn stop_error(name: &str) -> WorkloadError {
    WorkloadError::Stop {
        workload: name.to_string(),
        reason: "stuck".to_string(),
    }
}

pub(crate) fn aborted(name: &str) -> WorkloadError {
    WorkloadError::Aborted {
        workload: name.to_string(),
        reason: "crashed".to_string(),
    }
}

/// 测试用句柄：代替正在运行的 `Probe` 发出信号。
#[derive(Clone, Default)]
pub(crate) struct Remote(Arc<Mutex<Option<ContextRef>>>);

impl Remote {
    pub(crate) fn context(&self) -> Option<ContextRef> {
        self.0.lock().expect("remote lock").clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.context().is_some()
    }

    pub(crate) fn shutdown(&self, cause: Option<Failure>) {
        let ctx = self.context().expect("probe is running");
        ctx.shutdown(cause);
    }
}

/// 记录生命周期调用、可按需失败的 workload。
pub(crate) struct Probe {
    name: String,
    log: Log,
    fail_start: Option<WorkloadError>,
    fail_stop: Option<WorkloadError>,
    finish_on_start: Option<Option<Failure>>,
    remote: Remote,
}

impl Probe {
    pub(crate) fn new(name: &str, log: &Log) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_start: None,
            fail_stop: None,
            finish_on_start: None,
            remote: Remote::default(),
        }
    }

    pub(crate) fn failing_start(mut self, err: WorkloadError) -> Self {
        self.fail_start = Some(err);
        self
    }

    pub(crate) fn failing_stop(mut self, err: WorkloadError) -> Self {
        self.fail_stop = Some(err);
        self
    }

    /// 在 `on_start` 内部发出 shutdown。
    pub(crate) fn finishing_on_start(mut self, cause: Option<Failure>) -> Self {
        self.finish_on_start = Some(cause);
        self
    }

    pub(crate) fn remote(&self) -> Remote {
        self.remote.clone()
    }

    pub(crate) fn boxed(self) -> Box<dyn Workload> {
        Box::new(self)
    }
}

impl Workload for Probe {
    fn set_offset(&mut self, graph: &Simulator) {
        push(&self.log, format!("{}.offset={}", self.name, graph.now().as_nanos()));
    }

    fn on_start(&mut self, ctx: &ContextRef) -> WorkloadResult<()> {
        push(&self.log, format!("{}.start", self.name));
        *self.remote.0.lock().expect("remote lock") = Some(Arc::clone(ctx));
        if let Some(cause) = self.finish_on_start.clone() {
            ctx.shutdown(cause);
        }
        match &self.fail_start {
            Some(err) => Err(err.clone().into()),
            None => Ok(()),
        }
    }

    fn on_stop(&mut self, _ctx: &ContextRef) -> WorkloadResult<()> {
        push(&self.log, format!("{}.stop", self.name));
        self.remote.0.lock().expect("remote lock").take();
        match &self.fail_stop {
            Some(err) => Err(err.clone().into()),
            None => Ok(()),
        }
    }

    fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>> {
        push(&self.log, format!("{}.snapshot", self.name));
        Ok(Box::new(Probe {
            name: self.name.clone(),
            log: Arc::clone(&self.log),
            fail_start: self.fail_start.clone(),
            fail_stop: self.fail_stop.clone(),
            finish_on_start: self.finish_on_start.clone(),
            remote: Remote::default(),
        }))
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Probe").field(&self.name).finish()
    }
}

/// 占用内存并在每个网卡和磁盘上记录流量，定时器触发后结束的 workload。
#[derive(Debug, Clone)]
pub(crate) struct IoBurst {
    pub(crate) duration: SimTime,
    pub(crate) memory_mib: u64,
    pub(crate) bytes: u64,
}

impl IoBurst {
    pub(crate) fn boxed(self) -> Box<dyn Workload> {
        Box::new(self)
    }
}

impl Workload for IoBurst {
    fn set_offset(&mut self, _graph: &Simulator) {}

    fn on_start(&mut self, ctx: &ContextRef) -> WorkloadResult<()> {
        ctx.memory().set_used(self.memory_mib);
        for nic in ctx.network_interfaces() {
            nic.record(self.bytes, self.bytes / 2);
        }
        for disk in ctx.storage_interfaces() {
            disk.record(self.bytes, self.bytes / 2);
        }
        let handle = Arc::clone(ctx);
        ctx.graph()
            .schedule_after(self.duration, move |_: &Simulator| handle.shutdown(None));
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &ContextRef) -> WorkloadResult<()> {
        Ok(())
    }

    fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>> {
        Ok(Box::new(self.clone()))
    }
}

/// 把 `reset` 与 `shutdown` 记录到共享日志的执行上下文。
pub(crate) struct Recorder {
    graph: Simulator,
    meta: Meta,
    cpus: Vec<ProcessingUnit>,
    memory: Memory,
    log: Log,
    shutdowns: Mutex<Vec<Option<Failure>>>,
}

impl Recorder {
    pub(crate) fn new(log: &Log) -> Arc<Recorder> {
        Arc::new(Recorder {
            graph: Simulator::default(),
            meta: Meta::new(),
            cpus: Vec::new(),
            memory: Memory::new(1024),
            log: Arc::clone(log),
            shutdowns: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn shutdowns(&self) -> Vec<Option<Failure>> {
        self.shutdowns.lock().expect("shutdowns lock").clone()
    }
}

pub(crate) fn context(recorder: &Arc<Recorder>) -> ContextRef {
    let ctx: Arc<Recorder> = Arc::clone(recorder);
    ctx
}

impl MachineContext for Recorder {
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
        &[]
    }

    fn storage_interfaces(&self) -> &[StorageInterface] {
        &[]
    }

    fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>> {
        Ok(Box::new(ChainWorkload::new(Vec::new())))
    }

    fn reset(&self) {
        push(&self.log, "ctx.reset".to_string());
    }

    fn shutdown(&self, cause: Option<Failure>) {
        push(&self.log, "ctx.shutdown".to_string());
        self.shutdowns.lock().expect("shutdowns lock").push(cause);
    }
}
