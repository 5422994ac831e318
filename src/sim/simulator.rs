//! 仿真器
//!
//! 定义事件驱动仿真器，维护当前时间与事件队列。
//!
//! `Simulator` 是一个可克隆的句柄：machine context 把它作为 graph handle
//! 交给 workload，workload 在回调内部也能继续调度事件。队列锁只在入队/出队
//! 时短暂持有，执行事件时不持锁，因此事件可以重入地调度新事件。

use super::event::Event;
use super::time::SimTime;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace};

/// 事件驱动仿真器：维护当前时间与事件队列。
#[derive(Clone, Default)]
pub struct Simulator {
    queue: Arc<Mutex<EventQueue>>,
}

#[derive(Default)]
struct EventQueue {
    now: SimTime,
    next_seq: u64,
    heap: BinaryHeap<Pending>,
}

struct Pending {
    at: SimTime,
    seq: u64,
    ev: Box<dyn Event>,
}

// BinaryHeap 是 max-heap：时间小者优先，同一时刻按入队顺序。
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl Simulator {
    fn lock(&self) -> MutexGuard<'_, EventQueue> {
        self.queue.lock().expect("event queue lock")
    }

    /// 获取当前仿真时间
    pub fn now(&self) -> SimTime {
        self.lock().now
    }

    /// 队列中尚未执行的事件数
    pub fn pending(&self) -> usize {
        self.lock().heap.len()
    }

    /// 调度事件在指定时间执行；早于当前时间的请求按当前时间处理。
    #[tracing::instrument(skip(self, ev), fields(event_type = std::any::type_name::<E>(), schedule_at = ?at))]
    pub fn schedule<E: Event>(&self, at: SimTime, ev: E) {
        let mut q = self.lock();
        let at = at.max(q.now);
        let seq = q.next_seq;
        trace!(now = ?q.now, seq, "调度事件");

        q.next_seq = q.next_seq.wrapping_add(1);
        q.heap.push(Pending {
            at,
            seq,
            ev: Box::new(ev),
        });

        debug!(queue_size = q.heap.len(), "事件已加入队列");
    }

    /// 在当前时间之后 `delay` 调度事件
    pub fn schedule_after<E: Event>(&self, delay: SimTime, ev: E) {
        let at = self.now().saturating_add(delay);
        self.schedule(at, ev);
    }

    /// 取出下一个不晚于 `until` 的事件，并把时钟推进到它的时间。
    fn pop_until(&self, until: SimTime) -> Option<Pending> {
        let mut q = self.lock();
        if q.heap.peek()?.at > until {
            return None;
        }
        let item = q.heap.pop()?;
        q.now = item.at;
        Some(item)
    }

    /// 运行直到事件队列为空或到达 `until`。
    pub fn run_until(&self, until: SimTime) {
        while let Some(item) = self.pop_until(until) {
            item.ev.execute(self);
        }
        let mut q = self.lock();
        q.now = q.now.max(until);
    }

    /// 运行所有事件直到队列为空。
    #[tracing::instrument(skip(self))]
    pub fn run(&self) {
        info!("▶️  开始运行仿真");
        debug!(now = ?self.now(), queue_size = self.pending(), "初始状态");

        let mut event_count = 0u64;
        while let Some(item) = self.pop_until(SimTime::MAX) {
            event_count += 1;
            debug!(
                event_num = event_count,
                now = ?item.at,
                seq = item.seq,
                "执行事件"
            );
            item.ev.execute(self);
        }

        info!(
            total_events = event_count,
            final_time = ?self.now(),
            "✅ 仿真完成"
        );
    }
}
