#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 在 3D 荧光显微图像上, 从种子点出发以最小代价前沿传播生长树状结构
//! (神经元, 星形胶质细胞等), 并进行剪枝, 平滑和 SWC 输出.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 所有体素索引均按照 `(z, h, w)` 模式访问, 即 (切片, 行, 列).
//!   SWC 文件和起始点文本则使用 `x y z` 顺序, 其中 `x = w`, `y = h`.
//! 2. 体积数据在 z 方向上有 `pad` 层填充. 输出前会减去该偏移.
//! 3. 越界访问属于调用方违约, 程序会直接 panic, 而不会导致内存错误.
//!
//! # 开发计划
//!
//! ### 代价场与数值更新规则 ✅
//!
//! 近似 Eikonal 方程的迎风差分更新, 判别式为负时依次退化为二邻居, 单邻居解.
//!
//! 实现位于 `trace-berry/src/field.rs`.
//!
//! ### 前沿传播 ✅
//!
//! 二叉堆 + 惰性删除的 Dijkstra 式传播. 候选点被弹出时通过梯度下降回溯连入已有的树.
//!
//! 实现位于 `trace-berry/src/propagate.rs` 和 `trace-berry/src/tree/builder.rs`.
//!
//! ### 剪枝, 抽稀, 平滑 ✅
//!
//! 1. 叶/分支分类, 短分叉去除, 重新编号. ✅
//! 2. 亮度加权的节点位置松弛. ✅
//! 3. 胞体 (soma) 内部节点清理. ✅
//!
//! 实现位于 `trace-berry/src/tree/*`.
//!
//! ### 候选点检测 ✅
//!
//! 多尺度 LoG + Hessian 特征值的斑点检测. 也可以直接从文本文件读入候选点.
//!
//! 实现位于 `trace-berry/src/candidates/*`.
//!
//! ### SWC 读写与半径估计 ✅
//!
//! 实现位于 `trace-berry/src/swc.rs`.
//!
//! ### 多体积并行追踪 ✅
//!
//! 每个追踪任务拥有独立的上下文, 借助 `rayon` 并行运行.
//!
//! 实现位于 `trace-berry/src/tracer.rs`.

/// 三维索引 `(z, h, w)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 三维浮点坐标 `(z, h, w)`.
pub type Pos3d = (f32, f32, f32);

/// 有符号三维索引. 梯度下降时会临时越界, 因此需要符号位.
type Idx3dI64 = (i64, i64, i64);

/// 体积数据与预处理.
pub mod data;

pub use data::{IntensityWindow, SomaMask, Volume};

pub mod candidates;
pub mod config;
pub mod consts;
pub mod error;
pub mod field;
pub mod propagate;
pub mod swc;
pub mod tracer;
pub mod tree;

pub use config::TraceConfig;
pub use error::{TraceError, TraceResult};

pub mod prelude;

/// `Pos3d` -> 四舍五入后的有符号索引.
#[inline]
fn round_pos((z, h, w): Pos3d) -> Idx3dI64 {
    (z.round() as i64, h.round() as i64, w.round() as i64)
}

/// `&Idx3d` -> `Pos3d`.
#[inline]
fn idx_to_pos((z, h, w): &Idx3d) -> Pos3d {
    (*z as f32, *h as f32, *w as f32)
}

/// 两个浮点坐标之间的欧氏距离.
#[inline]
fn pos_distance(a: Pos3d, b: Pos3d) -> f32 {
    let (dz, dh, dw) = (a.0 - b.0, a.1 - b.1, a.2 - b.2);
    (dz * dz + dh * dh + dw * dw).sqrt()
}
