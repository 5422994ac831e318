//! 固定时长 workload
//!
//! 以固定利用率占用所有 CPU，运行 `duration` 后发出完成信号。

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::{CancelToken, Workload};
use crate::compute::context::ContextRef;
use crate::compute::error::{WorkloadError, WorkloadResult};
use crate::sim::{SimTime, Simulator};

pub struct RuntimeWorkload {
    duration: SimTime,
    utilization: f64,
    running: Option<Running>,
}

struct Running {
    started_at: SimTime,
    graph: Simulator,
    token: CancelToken,
}

impl RuntimeWorkload {
    /// `utilization` 必须在 (0, 1] 之间。
    pub fn new(duration: SimTime, utilization: f64) -> Result<Self, WorkloadError> {
        if !(utilization > 0.0 && utilization <= 1.0) {
            return Err(WorkloadError::InvalidSpec(format!(
                "utilization must be in (0, 1], got {utilization}"
            )));
        }
        Ok(Self {
            duration,
            utilization,
            running: None,
        })
    }

    pub fn utilization(&self) -> f64 {
        self.utilization
    }

    /// 截至当前仿真时间尚未执行的时长。
    pub fn remaining(&self) -> SimTime {
        match &self.running {
            Some(r) => {
                let elapsed = r.graph.now().saturating_sub(r.started_at);
                self.duration.saturating_sub(elapsed)
            }
            None => self.duration,
        }
    }
}

impl Workload for RuntimeWorkload {
    fn set_offset(&mut self, _graph: &Simulator) {}

    fn on_start(&mut self, ctx: &ContextRef) -> WorkloadResult<()> {
        let graph = ctx.graph().clone();
        let token = CancelToken::default();
        for cpu in ctx.cpus() {
            cpu.set_demand(cpu.capacity_mhz() * self.utilization);
        }

        self.running = Some(Running {
            started_at: graph.now(),
            graph: graph.clone(),
            token: token.clone(),
        });
        trace!(duration = ?self.duration, utilization = self.utilization, "runtime workload 启动");

        if self.duration == SimTime::ZERO {
            ctx.shutdown(None);
            return Ok(());
        }

        let handle = Arc::clone(ctx);
        graph.schedule_after(self.duration, move |_: &Simulator| {
            if !token.is_cancelled() {
                handle.shutdown(None);
            }
        });
        Ok(())
    }

    fn on_stop(&mut self, ctx: &ContextRef) -> WorkloadResult<()> {
        let remaining = self.remaining();
        if let Some(running) = self.running.take() {
            running.token.cancel();
            self.duration = remaining;
        }
        for cpu in ctx.cpus() {
            cpu.set_demand(0.0);
        }
        trace!(remaining = ?remaining, "runtime workload 停止");
        Ok(())
    }

    fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>> {
        Ok(Box::new(RuntimeWorkload {
            duration: self.remaining(),
            utilization: self.utilization,
            running: None,
        }))
    }
}

impl fmt::Debug for RuntimeWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeWorkload")
            .field("duration", &self.duration)
            .field("utilization", &self.utilization)
            .finish()
    }
}
