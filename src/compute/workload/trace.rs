//! Trace 回放 workload
//!
//! 片段时间相对于 workload 的 offset（最外层 chain 的起始时间），因此
//! 较晚启动的 trace 会跳过窗口已经过去的片段。

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::{CancelToken, Workload};
use crate::compute::context::ContextRef;
use crate::compute::error::{WorkloadError, WorkloadResult};
use crate::sim::{SimTime, Simulator};

/// `[timestamp, timestamp + duration)` 区间内恒定的 CPU 需求。
#[derive(Debug, Clone, PartialEq)]
pub struct TraceFragment {
    pub timestamp: SimTime,
    pub duration: SimTime,
    pub cpu_usage_mhz: f64,
}

impl TraceFragment {
    pub fn end(&self) -> SimTime {
        self.timestamp.saturating_add(self.duration)
    }
}

pub struct TraceWorkload {
    fragments: Arc<[TraceFragment]>,
    offset: SimTime,
    // set_offset 时拿到的时钟；未启动时也能算出回放位置。
    clock: Option<Simulator>,
    running: Option<Playback>,
    // 上次停止时到达的回放位置。
    stopped_at: Option<SimTime>,
}

struct Playback {
    graph: Simulator,
    token: CancelToken,
}

impl TraceWorkload {
    /// 片段按 timestamp 排序，且不能重叠。
    pub fn new(mut fragments: Vec<TraceFragment>) -> Result<Self, WorkloadError> {
        fragments.sort_by_key(|f| f.timestamp);
        for f in &fragments {
            if !(f.cpu_usage_mhz.is_finite() && f.cpu_usage_mhz >= 0.0) {
                return Err(WorkloadError::InvalidSpec(format!(
                    "fragment cpu usage must be a non-negative number, got {}",
                    f.cpu_usage_mhz
                )));
            }
        }
        if let Some(w) = fragments.windows(2).find(|w| w[1].timestamp < w[0].end()) {
            return Err(WorkloadError::InvalidSpec(format!(
                "trace fragments overlap at {}",
                w[1].timestamp
            )));
        }
        Ok(Self::from_fragments(fragments.into(), SimTime::ZERO))
    }

    fn from_fragments(fragments: Arc<[TraceFragment]>, offset: SimTime) -> Self {
        Self {
            fragments,
            offset,
            clock: None,
            running: None,
            stopped_at: None,
        }
    }

    pub fn fragments(&self) -> &[TraceFragment] {
        &self.fragments
    }

    pub fn offset(&self) -> SimTime {
        self.offset
    }

    /// 相对 offset 的回放位置：运行中取当前时间，停止后取停止时的位置，
    /// 尚未启动但已设置 offset 时同样按当前时间计算。
    fn position(&self) -> Option<SimTime> {
        if let Some(p) = &self.running {
            return Some(p.graph.now().saturating_sub(self.offset));
        }
        if self.stopped_at.is_some() {
            return self.stopped_at;
        }
        self.clock
            .as_ref()
            .map(|clock| clock.now().saturating_sub(self.offset))
    }
}

fn apply_demand(ctx: &ContextRef, total_mhz: f64) {
    let cpus = ctx.cpus();
    if cpus.is_empty() {
        return;
    }
    let per_cpu = total_mhz / cpus.len() as f64;
    for cpu in cpus {
        cpu.set_demand(per_cpu);
    }
}

/// 应用当前位置的需求，并调度下一次变化。
fn advance(ctx: ContextRef, fragments: Arc<[TraceFragment]>, offset: SimTime, token: CancelToken) {
    if token.is_cancelled() {
        return;
    }
    let graph = ctx.graph().clone();
    let pos = graph.now().saturating_sub(offset);

    let Some(fragment) = fragments.iter().find(|f| f.end() > pos) else {
        trace!(pos = ?pos, "trace 回放结束");
        apply_demand(&ctx, 0.0);
        ctx.shutdown(None);
        return;
    };

    let (demand, next_change) = if fragment.timestamp <= pos {
        (fragment.cpu_usage_mhz, fragment.end())
    } else {
        (0.0, fragment.timestamp)
    };
    apply_demand(&ctx, demand);
    trace!(pos = ?pos, demand, next = ?next_change, "trace 片段切换");

    graph.schedule(offset.saturating_add(next_change), move |_: &Simulator| {
        advance(ctx, fragments, offset, token)
    });
}

impl Workload for TraceWorkload {
    fn set_offset(&mut self, graph: &Simulator) {
        self.offset = graph.now();
        self.clock = Some(graph.clone());
    }

    fn on_start(&mut self, ctx: &ContextRef) -> WorkloadResult<()> {
        let token = CancelToken::default();
        self.running = Some(Playback {
            graph: ctx.graph().clone(),
            token: token.clone(),
        });
        advance(Arc::clone(ctx), Arc::clone(&self.fragments), self.offset, token);
        Ok(())
    }

    fn on_stop(&mut self, ctx: &ContextRef) -> WorkloadResult<()> {
        let pos = self.position();
        if let Some(playback) = self.running.take() {
            playback.token.cancel();
            self.stopped_at = pos;
        }
        apply_demand(ctx, 0.0);
        Ok(())
    }

    /// 片段按当前位置重新对齐：无论是否已经启动，拿到新的 offset 后都从
    /// 当前位置继续回放。
    fn snapshot(&self) -> WorkloadResult<Box<dyn Workload>> {
        let Some(pos) = self.position() else {
            return Ok(Box::new(Self::from_fragments(
                Arc::clone(&self.fragments),
                self.offset,
            )));
        };

        let fragments: Vec<TraceFragment> = self
            .fragments
            .iter()
            .filter(|f| f.end() > pos)
            .map(|f| {
                let start = f.timestamp.max(pos);
                TraceFragment {
                    timestamp: start.saturating_sub(pos),
                    duration: f.end().saturating_sub(start),
                    cpu_usage_mhz: f.cpu_usage_mhz,
                }
            })
            .collect();
        Ok(Box::new(Self::from_fragments(fragments.into(), self.offset)))
    }
}

impl fmt::Debug for TraceWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceWorkload")
            .field("fragments", &self.fragments)
            .finish()
    }
}
