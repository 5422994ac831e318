//! 机器资源
//!
//! 处理单元、内存、网卡与存储接口。每个资源都是可克隆的句柄，内部计数器
//! 由 workload 写入，由 machine context 的 `reset()` 清零。

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// CPU 型号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuModel {
    pub frequency_mhz: f64,
}

/// 网卡型号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkModel {
    pub name: String,
    pub bandwidth_mbps: f64,
}

/// 存储设备型号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageModel {
    pub name: String,
    pub capacity_gib: f64,
}

/// 整机型号
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MachineModel {
    pub cpus: Vec<CpuModel>,
    pub memory_mib: u64,
    pub network: Vec<NetworkModel>,
    pub storage: Vec<StorageModel>,
}

#[derive(Debug, Default)]
struct CpuCounters {
    demand_mhz: f64,
    usage_mhz: f64,
}

/// 处理单元：容量固定，demand/usage 可写。
#[derive(Debug, Clone)]
pub struct ProcessingUnit {
    id: usize,
    model: CpuModel,
    counters: Arc<Mutex<CpuCounters>>,
}

impl ProcessingUnit {
    pub fn new(id: usize, model: CpuModel) -> Self {
        Self {
            id,
            model,
            counters: Arc::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn capacity_mhz(&self) -> f64 {
        self.model.frequency_mhz
    }

    /// 设置需求；实际使用量不超过容量。
    pub fn set_demand(&self, mhz: f64) {
        let mut c = self.counters.lock().expect("cpu counters lock");
        c.demand_mhz = mhz.max(0.0);
        c.usage_mhz = c.demand_mhz.min(self.model.frequency_mhz);
    }

    pub fn demand_mhz(&self) -> f64 {
        self.counters.lock().expect("cpu counters lock").demand_mhz
    }

    pub fn usage_mhz(&self) -> f64 {
        self.counters.lock().expect("cpu counters lock").usage_mhz
    }

    pub(crate) fn reset(&self) {
        *self.counters.lock().expect("cpu counters lock") = CpuCounters::default();
    }
}

/// 内存：容量固定，记录当前占用。
#[derive(Debug, Clone)]
pub struct Memory {
    capacity_mib: u64,
    used_mib: Arc<Mutex<u64>>,
}

impl Memory {
    pub fn new(capacity_mib: u64) -> Self {
        Self {
            capacity_mib,
            used_mib: Arc::default(),
        }
    }

    pub fn capacity_mib(&self) -> u64 {
        self.capacity_mib
    }

    pub fn set_used(&self, mib: u64) {
        *self.used_mib.lock().expect("memory lock") = mib.min(self.capacity_mib);
    }

    pub fn used_mib(&self) -> u64 {
        *self.used_mib.lock().expect("memory lock")
    }

    pub(crate) fn reset(&self) {
        *self.used_mib.lock().expect("memory lock") = 0;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoCounters {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// 网卡
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    model: NetworkModel,
    counters: Arc<Mutex<IoCounters>>,
}

impl NetworkInterface {
    pub fn new(model: NetworkModel) -> Self {
        Self {
            model,
            counters: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.model.name
    }

    pub fn bandwidth_mbps(&self) -> f64 {
        self.model.bandwidth_mbps
    }

    pub fn record(&self, tx_bytes: u64, rx_bytes: u64) {
        let mut c = self.counters.lock().expect("nic counters lock");
        c.tx_bytes = c.tx_bytes.saturating_add(tx_bytes);
        c.rx_bytes = c.rx_bytes.saturating_add(rx_bytes);
    }

    pub fn counters(&self) -> IoCounters {
        *self.counters.lock().expect("nic counters lock")
    }

    pub(crate) fn reset(&self) {
        *self.counters.lock().expect("nic counters lock") = IoCounters::default();
    }
}

/// 存储接口；`tx` 记为写入，`rx` 记为读取。
#[derive(Debug, Clone)]
pub struct StorageInterface {
    model: StorageModel,
    counters: Arc<Mutex<IoCounters>>,
}

impl StorageInterface {
    pub fn new(model: StorageModel) -> Self {
        Self {
            model,
            counters: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.model.name
    }

    pub fn capacity_gib(&self) -> f64 {
        self.model.capacity_gib
    }

    pub fn record(&self, written_bytes: u64, read_bytes: u64) {
        let mut c = self.counters.lock().expect("storage counters lock");
        c.tx_bytes = c.tx_bytes.saturating_add(written_bytes);
        c.rx_bytes = c.rx_bytes.saturating_add(read_bytes);
    }

    pub fn counters(&self) -> IoCounters {
        *self.counters.lock().expect("storage counters lock")
    }

    pub(crate) fn reset(&self) {
        *self.counters.lock().expect("storage counters lock") = IoCounters::default();
    }
}
