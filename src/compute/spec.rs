//! 场景文件
//!
//! 一个场景 = 机器描述 + workload 树，按 `kind` 标记区分 workload 类型。

use serde::{Deserialize, Serialize};

use super::context::Meta;
use super::error::WorkloadError;
use super::resource::{CpuModel, MachineModel, NetworkModel, StorageModel};
use super::workload::{self, TraceFragment, Workload};
use crate::sim::SimTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub schema_version: u32,
    #[serde(default)]
    pub meta: Option<serde_json::Map<String, serde_json::Value>>,
    pub machine: MachineSpec,
    pub workload: WorkloadSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSpec {
    pub cpus: Vec<CpuModel>,
    /// 把唯一列出的 CPU 型号复制这么多份。
    #[serde(default)]
    pub cpu_count: Option<usize>,
    #[serde(default)]
    pub memory_mib: Option<u64>,
    #[serde(default)]
    pub network: Vec<NetworkModel>,
    #[serde(default)]
    pub storage: Vec<StorageModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkloadSpec {
    Runtime {
        duration_ms: f64,
        #[serde(default)]
        utilization: Option<f64>,
    },
    Trace {
        fragments: Vec<FragmentSpec>,
    },
    Chain {
        workloads: Vec<WorkloadSpec>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentSpec {
    pub timestamp_ms: f64,
    pub duration_ms: f64,
    pub cpu_usage_mhz: f64,
}

fn non_negative_ms(field: &str, ms: f64) -> Result<SimTime, WorkloadError> {
    if !(ms.is_finite() && ms >= 0.0) {
        return Err(WorkloadError::InvalidSpec(format!(
            "{field} must be a non-negative number of milliseconds, got {ms}"
        )));
    }
    Ok(SimTime::from_millis_f64(ms))
}

impl ScenarioSpec {
    pub fn meta(&self) -> Meta {
        self.meta
            .as_ref()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

impl MachineSpec {
    pub fn build(&self) -> Result<MachineModel, WorkloadError> {
        let cpus = match self.cpu_count {
            None => self.cpus.clone(),
            Some(n) => match self.cpus.as_slice() {
                [model] => vec![model.clone(); n],
                _ => {
                    return Err(WorkloadError::InvalidSpec(format!(
                        "cpu_count needs exactly one cpu model, got {}",
                        self.cpus.len()
                    )));
                }
            },
        };
        if cpus.is_empty() {
            return Err(WorkloadError::InvalidSpec("machine has no cpus".into()));
        }
        if let Some(cpu) = cpus.iter().find(|c| !(c.frequency_mhz > 0.0)) {
            return Err(WorkloadError::InvalidSpec(format!(
                "cpu frequency must be positive, got {}",
                cpu.frequency_mhz
            )));
        }
        Ok(MachineModel {
            cpus,
            memory_mib: self.memory_mib.unwrap_or(0),
            network: self.network.clone(),
            storage: self.storage.clone(),
        })
    }
}

impl WorkloadSpec {
    /// 构建运行时 workload 树；utilization 缺省为 1.0。
    pub fn build(&self) -> Result<Box<dyn Workload>, WorkloadError> {
        match self {
            WorkloadSpec::Runtime {
                duration_ms,
                utilization,
            } => {
                let duration = non_negative_ms("duration_ms", *duration_ms)?;
                Ok(Box::new(workload::runtime(
                    duration,
                    utilization.unwrap_or(1.0),
                )?))
            }
            WorkloadSpec::Trace { fragments } => {
                let fragments = fragments
                    .iter()
                    .map(|f| -> Result<TraceFragment, WorkloadError> {
                        Ok(TraceFragment {
                            timestamp: non_negative_ms("timestamp_ms", f.timestamp_ms)?,
                            duration: non_negative_ms("duration_ms", f.duration_ms)?,
                            cpu_usage_mhz: f.cpu_usage_mhz,
                        })
                    })
                    .collect::<Result<Vec<_>, WorkloadError>>()?;
                Ok(Box::new(workload::trace(fragments)?))
            }
            WorkloadSpec::Chain { workloads } => {
                let workloads = workloads
                    .iter()
                    .map(WorkloadSpec::build)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Box::new(workload::chain(workloads)))
            }
        }
    }
}
