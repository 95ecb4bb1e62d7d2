//! 通用常量.

/// 代价场的哨兵值, 代表 "尚未到达". 不使用 `f32::INFINITY`,
/// 因为数值更新规则需要对它做平方运算.
pub const MAXVAL: f32 = 100000.0;

/// 局部通行代价 `1 / (intensity + INTENSITY_EPS)` 中的平滑项.
pub const INTENSITY_EPS: f32 = 0.001;

/// 梯度下降回溯时, 越界方向上的代价替代值.
pub const MAXDERV: f32 = 10000.0;

/// 回溯链的最大长度. 超过后放弃该候选点.
pub const TRACE_BACK_MAX_STEPS: usize = 500;

/// 梯度范数平方低于该值时, 回溯不移动.
pub const GRADIENT_EPS: f32 = 0.001;

/// 默认代价阈值. 弹出代价超过该值后停止生长.
pub const DEFAULT_COST_THRESHOLD: f32 = 1000.0;

/// 默认最短分叉长度. 短于该长度 (严格小于) 的末端分叉会被剪掉.
pub const DEFAULT_MIN_OFFSHOOT_LENGTH: f32 = 6.0;

/// 默认平滑高斯核标准差.
pub const DEFAULT_SMOOTH_SIGMA: f32 = 2.0;

/// 平滑时每个体素权重的下限.
pub const MIN_SMOOTH_WEIGHT: f32 = 0.1;

/// 默认 z 方向填充层数.
pub const DEFAULT_PAD: usize = 1;

/// 候选点检测默认使用的 LoG 尺度.
pub const DEFAULT_LOG_SCALES: [f32; 6] = [2.0, 2.8284, 4.0, 5.6569, 8.0, 11.31];

/// 转角代价的回看距离. 沿父链走出该距离后才比较方向.
pub const TURN_LOOKBACK: f32 = 6.0;

/// SWC 节点类型.
pub mod swc_type {
    /// 根节点 (种子, 通常是胞体中心).
    pub const ROOT: u8 = 1;

    /// 一般追踪点.
    pub const TRACED: u8 = 3;
}

/// 半径估计的迭代次数.
pub const RADIUS_ITERATIONS: usize = 20;

/// 半径估计的初始半径.
pub const RADIUS_INITIAL: f32 = 2.0;
