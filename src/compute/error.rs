//! Workload 失败模型
//!
//! 启动/停止过程中出现的每一个错误都会被保留下来：第一个错误作为 primary，
//! 之后的错误按发生顺序挂在 `suppressed` 列表上。所有合并点统一走
//! [`Failure::merge`] / [`merge_cause`]。

use thiserror::Error;

/// 单个 workload 错误（失败分类）。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkloadError {
    /// 子 workload 启动失败。
    #[error("workload `{workload}` failed to start: {reason}")]
    Start { workload: String, reason: String },
    /// 子 workload 停止失败。
    #[error("workload `{workload}` failed to stop: {reason}")]
    Stop { workload: String, reason: String },
    /// 运行中的 workload 带着失败发出 shutdown。
    #[error("workload `{workload}` aborted: {reason}")]
    Aborted { workload: String, reason: String },
    /// workload 正处于自己的回调中，无法读取。
    #[error("workload is busy inside a lifecycle callback")]
    Busy,
    /// 机器上已经有正在运行的 workload。
    #[error("machine already runs a workload")]
    MachineRunning,
    #[error("invalid workload spec: {0}")]
    InvalidSpec(String),
}

/// 组合失败：primary 错误 + 有序的 suppressed 失败列表。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{primary}{}", suffix(.suppressed.len()))]
pub struct Failure {
    primary: WorkloadError,
    suppressed: Vec<Failure>,
}

fn suffix(n: usize) -> String {
    match n {
        0 => String::new(),
        n => format!(" (+{n} suppressed)"),
    }
}

/// `Result<T, Failure>` 的别名。
pub type WorkloadResult<T> = Result<T, Failure>;

impl Failure {
    pub fn new(primary: WorkloadError) -> Self {
        Self {
            primary,
            suppressed: Vec::new(),
        }
    }

    pub fn primary(&self) -> &WorkloadError {
        &self.primary
    }

    pub fn suppressed(&self) -> &[Failure] {
        &self.suppressed
    }

    /// 追加一个 suppressed 失败，primary 保持不变。
    pub fn suppress(&mut self, other: Failure) {
        self.suppressed.push(other);
    }

    /// 纯函数式合并：`self` 保持 primary，`secondary` 整体挂到末尾。
    pub fn merge(mut self, secondary: Failure) -> Failure {
        self.suppress(secondary);
        self
    }

    /// 深度优先展开所有错误：`(depth, error)`，primary 的 depth 为 0。
    pub fn flatten(&self) -> Vec<(usize, &WorkloadError)> {
        let mut out = Vec::new();
        self.collect(0, &mut out);
        out
    }

    fn collect<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a WorkloadError)>) {
        out.push((depth, &self.primary));
        for s in &self.suppressed {
            s.collect(depth + 1, out);
        }
    }
}

impl From<WorkloadError> for Failure {
    fn from(err: WorkloadError) -> Self {
        Failure::new(err)
    }
}

/// 合并两个可选的失败原因：`cause` 为空时取 `secondary`，否则把 `secondary`
/// 作为 suppressed 挂在 `cause` 上。
pub fn merge_cause(cause: Option<Failure>, secondary: Option<Failure>) -> Option<Failure> {
    match (cause, secondary) {
        (None, s) => s,
        (Some(c), None) => Some(c),
        (Some(c), Some(s)) => Some(c.merge(s)),
    }
}
