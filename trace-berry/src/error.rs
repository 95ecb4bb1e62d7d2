//! 运行时错误.
//!
//! 这里只包含 "致命" 的输入类错误. 回溯失败, 判别式为负等可预期的情况
//! 由各算法以状态值返回, 不会走到这里.

use std::path::PathBuf;

use ndarray_npy::ReadNpyError;
use thiserror::Error;

/// 追踪流程在 crate 边界上的错误.
#[derive(Debug, Error)]
pub enum TraceError {
    /// 底层 I/O 错误.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 读取 nii 文件错误.
    #[error("failed to read nifti volume: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// 读取 npy 文件错误.
    #[error("failed to read npy volume: {0}")]
    ReadNpy(#[from] ReadNpyError),

    /// 无法根据扩展名识别体积文件格式.
    #[error("unsupported volume format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// 没有可用的种子点.
    #[error("start points not loaded")]
    EmptySeeds,

    /// 两个体积的形状不一致. `(期望, 实际)`.
    #[error("shape mismatch: expected {0:?}, got {1:?}")]
    ShapeMismatch((usize, usize, usize), (usize, usize, usize)),

    /// 体积文件不是三维的. 附带文件头中的维数.
    #[error("expected a 3D volume, got {0} dimension(s)")]
    Dimensionality(usize),

    /// 体积为空或某一维为 0.
    #[error("empty volume")]
    EmptyVolume,

    /// SWC 文件第 `line` 行 (从 1 开始) 格式错误.
    #[error("malformed SWC record at line {line}: {content:?}")]
    MalformedSwc {
        /// 行号.
        line: usize,
        /// 原始内容.
        content: String,
    },

    /// 配置参数不合法.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    /// 配置文件解析错误.
    #[cfg(feature = "serde")]
    #[error("failed to parse config: {0}")]
    Config(#[from] serde_json::Error),
}

/// 追踪流程运行时错误.
pub type TraceResult<T> = Result<T, TraceError>;
