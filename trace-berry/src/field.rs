//! 累积代价场与数值更新规则.
//!
//! 代价场近似求解 Eikonal 方程 `|∇T| = P`, 其中 `P` 为局部通行代价.
//! 每个体素的新值由三个坐标轴方向上的最小邻居代价经迎风差分给出.

use std::ops::{Index, IndexMut};

use ndarray::{Array3, ArrayView3};

use crate::consts::{INTENSITY_EPS, MAXVAL};
use crate::Idx3d;

/// 局部通行代价. 强度越高, 代价越低.
#[inline]
pub fn local_penalty(intensity: f32) -> f32 {
    1.0 / (intensity + INTENSITY_EPS)
}

/// 由三个轴向邻居代价和局部代价 `p` 求解新代价.
///
/// 三个值会先升序排列. 依次尝试三邻居二次方程, 二邻居二次方程, 单邻居解:
///
/// 1. `δ3 = (Σa)² - 3(Σa² - p²)`, 若 `δ3 >= 0` 则 `A = (Σa + √δ3) / 3`;
/// 2. 若 `A <= a3`, `δ2 = (a1 + a2)² - 2(a1² + a2² - p²)`,
///   若 `δ2 >= 0` 则 `A = (a1 + a2 + √δ2) / 2`;
/// 3. 若 `A <= a2`, `A = a1 + p`.
///
/// # 注意
///
/// 判别式为负不是错误, 直接退化到下一级.
pub fn combine(a1: f32, a2: f32, a3: f32, p: f32) -> f32 {
    let mut a = [a1, a2, a3];
    a.sort_by(|x, y| x.total_cmp(y));
    let [a1, a2, a3] = a;

    let mut aa = 0.0;
    let s = a1 + a2 + a3;
    let sq = a1 * a1 + a2 * a2 + a3 * a3;
    let delta = s * s - 3.0 * (sq - p * p);
    if delta >= 0.0 {
        aa = (s + delta.sqrt()) / 3.0;
    }

    if aa <= a3 {
        aa = 0.0;
        let s = a1 + a2;
        let delta = s * s - 2.0 * (a1 * a1 + a2 * a2 - p * p);
        if delta >= 0.0 {
            aa = (s + delta.sqrt()) / 2.0;
        }
        if aa <= a2 {
            aa = a1 + p;
        }
    }
    aa
}

/// 带填充的累积代价场. 未到达的体素为 [`MAXVAL`].
///
/// 该结构只是一个稠密数组加上少量语义方法, 不记录哪些体素已经 "确定".
/// 确定状态由 [`crate::propagate`] 维护.
#[derive(Debug, Clone)]
pub struct CostField {
    data: Array3<f32>,
}

impl Index<Idx3d> for CostField {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for CostField {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl CostField {
    /// 以 `shape` 创建代价场, 全部填充 `MAXVAL`, 种子处置 0.
    ///
    /// # 注意
    ///
    /// 越界的种子会导致 panic. 调用方应事先检查.
    pub fn initialize<'a, I>(shape: Idx3d, seeds: I) -> Self
    where
        I: IntoIterator<Item = &'a Idx3d>,
    {
        let mut data = Array3::from_elem(shape, MAXVAL);
        for s in seeds.into_iter() {
            data[*s] = 0.0;
        }
        Self { data }
    }

    /// 获取数据形状大小.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 检查索引是否合法.
    #[inline]
    pub fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 越界时返回 `None`.
    #[inline]
    pub fn get(&self, idx: Idx3d) -> Option<f32> {
        self.data.get(idx).copied()
    }

    /// 三个坐标轴方向上, 两个轴向邻居中的较小代价. 越界邻居视为 `MAXVAL`.
    ///
    /// 返回值按 `(z, h, w)` 轴排列, 未排序.
    pub fn scan_neighbours(&self, (z, h, w): Idx3d) -> (f32, f32, f32) {
        let at = |idx: Idx3d| self.get(idx).unwrap_or(MAXVAL);
        let pair = |lo: Option<Idx3d>, hi: Idx3d| {
            let lo = lo.map(at).unwrap_or(MAXVAL);
            lo.min(at(hi))
        };
        (
            pair(z.checked_sub(1).map(|z| (z, h, w)), (z + 1, h, w)),
            pair(h.checked_sub(1).map(|h| (z, h, w)), (z, h + 1, w)),
            pair(w.checked_sub(1).map(|w| (z, h, w)), (z, h, w + 1)),
        )
    }

    /// 以邻居代价和局部代价 `p` 计算 `idx` 处的候选新代价.
    #[inline]
    pub fn relax(&self, idx: Idx3d, p: f32) -> f32 {
        let (a1, a2, a3) = self.scan_neighbours(idx);
        combine(a1, a2, a3, p)
    }

    /// 是否已经被到达过 (代价小于 `MAXVAL`).
    #[inline]
    pub fn is_reached(&self, idx: Idx3d) -> bool {
        self[idx] < MAXVAL
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 获得数据所有权.
    #[inline]
    pub fn into_inner(self) -> Array3<f32> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_local_penalty() {
        assert!(float_eq(local_penalty(1.0), 1.0 / 1.001));
        assert!(float_eq(local_penalty(0.0), 1000.0));
    }

    #[test]
    fn test_combine_single_neighbour() {
        // 只有一个有限邻居: 退化为 a1 + p.
        assert!(float_eq(combine(MAXVAL, 3.0, MAXVAL, 1.0), 4.0));
        assert!(float_eq(combine(0.0, MAXVAL, MAXVAL, 1.0), 1.0));
    }

    #[test]
    fn test_combine_two_and_three() {
        // 两个相等邻居: A = a + p / √2.
        let aa = combine(0.0, 0.0, MAXVAL, 1.0);
        assert!(float_eq(aa, std::f32::consts::FRAC_1_SQRT_2));

        // 三个相等邻居: A = a + p / √3.
        let aa = combine(2.0, 2.0, 2.0, 1.0);
        assert!(float_eq(aa, 2.0 + 1.0 / 3f32.sqrt()));

        // 顺序无关
        assert!(float_eq(combine(3.0, 1.0, 2.0, 0.5), combine(1.0, 2.0, 3.0, 0.5)));
    }

    #[test]
    fn test_combine_bounds() {
        let samples = [
            (0.0, 0.3, 5.0, 1.0),
            (1.0, 1.1, 1.2, 0.2),
            (4.0, 9.0, 100.0, 2.5),
            (0.0, MAXVAL, MAXVAL, 1000.0),
            (7.5, 7.5, 7.6, 0.01),
        ];
        for (a1, a2, a3, p) in samples {
            let aa = combine(a1, a2, a3, p);
            let lo = a1.min(a2).min(a3);
            assert!(aa >= lo - 1e-4, "{aa} < {lo}");
            assert!(aa <= lo + p + 1e-3, "{aa} > {lo} + {p}");
        }
    }

    #[test]
    fn test_scan_neighbours() {
        let mut f = CostField::initialize((3, 3, 3), &[(0, 1, 1)]);
        f[(1, 0, 1)] = 2.0;
        f[(1, 2, 1)] = 1.5;
        let (a, b, c) = f.scan_neighbours((1, 1, 1));
        assert!(float_eq(a, 0.0));
        assert!(float_eq(b, 1.5));
        assert!(float_eq(c, MAXVAL));

        // 边界体素: 越界一侧视为 MAXVAL.
        let (a, _, _) = f.scan_neighbours((0, 0, 0));
        assert!(float_eq(a, MAXVAL));
        assert!(f.is_reached((0, 1, 1)));
        assert!(!f.is_reached((2, 2, 2)));
    }
}
