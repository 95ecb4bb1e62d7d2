//! 多尺度 LoG + Hessian 斑点检测.
//!
//! 在每个尺度上计算尺度归一化的负 LoG 响应, 保留响应足够强且明显高于邻域的体素,
//! 以响应的 Hessian 特征值计算显著性, 再在局部窗口内做非极大值登记.
//! 各尺度共享同一张登记表, 因此较大尺度上更显著的点会清除附近较弱的点.

use ndarray::{Array3, ArrayView3};

use super::{Candidate, CandidateSource};
use crate::consts::DEFAULT_LOG_SCALES;
use crate::data::filter::laplacian_of_gaussian;
use crate::{Idx3d, TraceConfig, Volume};

/// 响应的绝对阈值 (输入强度在 `[0, 1]` 内时约为最大值的 3%).
const RESPONSE_THRESHOLD: f32 = 0.03;

/// 响应需要高于邻域对极大值均值的幅度.
const CONTRAST_THRESHOLD: f32 = 0.001;

/// 尺度归一化指数.
const SCALE_GAMMA: f32 = 1.6;

/// 距离边界少于该值的体素不参与检测.
const BORDER: usize = 2;

/// 多尺度斑点检测器.
#[derive(Debug, Clone)]
pub struct BlobDetector {
    scales: Vec<f32>,
}

impl Default for BlobDetector {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_SCALES.to_vec())
    }
}

impl BlobDetector {
    /// 以给定的 LoG 尺度 (高斯标准差) 构建检测器. 尺度按给定顺序依次处理.
    #[inline]
    pub fn new(scales: Vec<f32>) -> Self {
        Self { scales }
    }

    /// 使用配置中的尺度.
    #[inline]
    pub fn from_config(config: &TraceConfig) -> Self {
        Self::new(config.log_scales.clone())
    }

    /// 检测所用尺度.
    #[inline]
    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    /// 在 `data` 上运行全部尺度, 返回登记表. 非零体素即为候选点, 值为显著性.
    pub fn registry(&self, data: ArrayView3<f32>) -> Array3<f32> {
        let mut registry = Array3::<f32>::zeros(data.dim());
        for &sigma in self.scales.iter() {
            let count = detect_scale(data, sigma, &mut registry);
            log::debug!("scale {}: {} point(s) registered", sigma, count);
        }
        registry
    }
}

impl CandidateSource for BlobDetector {
    fn candidates(&self, volume: &Volume) -> Vec<Candidate> {
        let out: Vec<Candidate> = self
            .registry(volume.data())
            .indexed_iter()
            .filter(|(_, v)| **v > 0.0)
            .map(|(idx, v)| Candidate::new(idx, *v))
            .collect();
        log::info!("blob detector found {} candidate(s)", out.len());
        out
    }
}

/// `idx` 偏移 `(dz, dh, dw)`. 调用方需保证结果不越界.
#[inline]
fn offset((z, h, w): Idx3d, (dz, dh, dw): (isize, isize, isize)) -> Idx3d {
    (
        (z as isize + dz) as usize,
        (h as isize + dh) as usize,
        (w as isize + dw) as usize,
    )
}

/// 26 邻域中的 13 个 "正半边" 偏移. 每个偏移与其相反数构成一对.
fn half_neighbourhood() -> Vec<(isize, isize, isize)> {
    let mut out = Vec::with_capacity(13);
    for dz in -1..=1 {
        for dh in -1..=1 {
            for dw in -1..=1 {
                if (dz, dh, dw) < (0, 0, 0) {
                    out.push((dz, dh, dw));
                }
            }
        }
    }
    out
}

/// 单一尺度的检测. 返回本尺度登记成功的点数.
fn detect_scale(data: ArrayView3<f32>, sigma: f32, registry: &mut Array3<f32>) -> usize {
    let (lz, lh, lw) = data.dim();
    if lz < 2 * BORDER + 1 || lh < 2 * BORDER + 1 || lw < 2 * BORDER + 1 {
        return 0;
    }

    let norm = sigma.powf(SCALE_GAMMA);
    let mut response = laplacian_of_gaussian(data, sigma);
    response.mapv_inplace(|v| -v * norm);

    let window = ((sigma as usize) / 2).max(2);
    let pairs = half_neighbourhood();
    let mut count = 0;

    for z in BORDER..lz - BORDER {
        for h in BORDER..lh - BORDER {
            for w in BORDER..lw - BORDER {
                let idx = (z, h, w);
                let val = response[idx];
                if val <= RESPONSE_THRESHOLD {
                    continue;
                }
                let a1: f32 = pairs
                    .iter()
                    .map(|&(dz, dh, dw)| {
                        response[offset(idx, (dz, dh, dw))].max(response[offset(idx, (-dz, -dh, -dw))])
                    })
                    .sum();
                if val - a1 / 13.0 <= CONTRAST_THRESHOLD {
                    continue;
                }

                let ev = eigenvalues_3x3(hessian(&response, idx));
                let (plate, wi) = is_plate(&ev);
                if !plate {
                    continue;
                }
                let value = (ev.iter().map(|v| v.abs()).sum::<f64>() - ev[wi].abs()) as f32;
                if register_index(registry, value, idx, window) {
                    registry[idx] = value;
                    count += 1;
                }
            }
        }
    }
    count
}

/// `r` 在 `idx` 处的 Hessian (未归一化的差分). 返回
/// `[zz, hh, ww, zh, zw, hw]`. 对角项使用步长 2, 交叉项使用对角线上的四个邻居.
fn hessian(r: &Array3<f32>, idx: Idx3d) -> [f64; 6] {
    let c = 2.0 * r[idx];
    let at = |d| r[offset(idx, d)] as f64;
    let diag = |d: (isize, isize, isize)| {
        (r[offset(idx, d)] + r[offset(idx, (-d.0, -d.1, -d.2))] - c) as f64
    };
    let cross = |a: (isize, isize, isize), b: (isize, isize, isize)| {
        let pp = (a.0 + b.0, a.1 + b.1, a.2 + b.2);
        let nn = (-pp.0, -pp.1, -pp.2);
        let np = (b.0 - a.0, b.1 - a.1, b.2 - a.2);
        let pn = (-np.0, -np.1, -np.2);
        at(pp) + at(nn) - at(np) - at(pn)
    };
    let (ez, eh, ew) = ((1, 0, 0), (0, 1, 0), (0, 0, 1));
    [
        diag((2, 0, 0)),
        diag((0, 2, 0)),
        diag((0, 0, 2)),
        cross(ez, eh),
        cross(ez, ew),
        cross(eh, ew),
    ]
}

/// 3x3 实对称矩阵的特征值 (升序), 闭式解.
///
/// 输入为 `[a00, a11, a22, a01, a02, a12]`.
pub fn eigenvalues_3x3([a, d, f, b, c, e]: [f64; 6]) -> [f64; 3] {
    let p1 = b * b + c * c + e * e;
    if p1 == 0.0 {
        let mut ev = [a, d, f];
        ev.sort_by(|x, y| x.total_cmp(y));
        return ev;
    }
    let q = (a + d + f) / 3.0;
    let p2 = (a - q).powi(2) + (d - q).powi(2) + (f - q).powi(2) + 2.0 * p1;
    let p = (p2 / 6.0).sqrt();

    // B = (A - qI) / p
    let (ba, bd, bf, bb, bc, be) = ((a - q) / p, (d - q) / p, (f - q) / p, b / p, c / p, e / p);
    let det = ba * (bd * bf - be * be) - bb * (bb * bf - be * bc) + bc * (bb * be - bd * bc);
    let r = (det / 2.0).clamp(-1.0, 1.0);
    let phi = r.acos() / 3.0;

    let largest = q + 2.0 * p * phi.cos();
    let smallest = q + 2.0 * p * (phi + 2.0 * std::f64::consts::FRAC_PI_3).cos();
    let middle = 3.0 * q - largest - smallest;
    [smallest, middle, largest]
}

/// 板状结构判别. 返回 `(是否接受, 最大特征值下标)`.
///
/// # 注意
///
/// 判别条件 `(L - L2) > (L2 - L1) && (L - L2) > |L|` 目前是关闭的,
/// 所有特征值组合都被接受. 下标规则: 严格最大者优先, 并列时取 2.
pub fn is_plate(ev: &[f64; 3]) -> (bool, usize) {
    let w = if ev[0] > ev[1] && ev[0] > ev[2] {
        0
    } else if ev[1] > ev[0] && ev[1] > ev[2] {
        1
    } else {
        2
    };
    (true, w)
}

/// 在 `idx` 周围半径 `window` 的窗口内登记 `value`.
///
/// 窗口内较小的已登记值会被清零. 若窗口内存在更大的值, 返回 `false`.
/// 窗口会被限制在距边界 `BORDER` 以内的区域.
fn register_index(registry: &mut Array3<f32>, value: f32, idx: Idx3d, window: usize) -> bool {
    let (lz, lh, lw) = registry.dim();
    let range = |c: usize, len: usize| {
        let lo = c.saturating_sub(window).max(BORDER);
        let hi = (c + window).min(len - BORDER - 1);
        lo..=hi
    };
    let mut higher_present = false;
    for z in range(idx.0, lz) {
        for h in range(idx.1, lh) {
            for w in range(idx.2, lw) {
                let cur = &mut registry[(z, h, w)];
                if value > *cur {
                    *cur = 0.0;
                } else if value < *cur {
                    higher_present = true;
                }
            }
        }
    }
    !higher_present
}
