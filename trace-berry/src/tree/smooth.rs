//! 亮度加权的节点位置松弛.

use ndarray::ArrayView3;

use super::{NodeArena, NodeId};
use crate::consts::MIN_SMOOTH_WEIGHT;
use crate::{idx_to_pos, round_pos, TraceConfig, Volume};

/// 平滑器.
///
/// 对每个既有父节点又有子节点的节点, 将其位置移到自身, 父节点和子节点体素的
/// 加权质心, 权重为高斯平滑后的强度 (下限 [`MIN_SMOOTH_WEIGHT`]), 并更新体素索引.
/// 其余节点 (根和叶) 的位置重置为其体素索引. 按编号顺序原地进行.
#[derive(Debug, Clone)]
pub struct TreeSmoother {
    sigma: f32,
}

impl TreeSmoother {
    /// 构建. `sigma` 为高斯核标准差.
    #[inline]
    pub fn new(sigma: f32) -> Self {
        Self { sigma }
    }

    /// 使用配置中的参数.
    #[inline]
    pub fn from_config(config: &TraceConfig) -> Self {
        Self::new(config.smooth_sigma)
    }

    /// 在 `volume` 上平滑.
    pub fn smooth(&self, arena: &mut NodeArena, volume: &Volume) {
        let svol = volume.smoothed(self.sigma);
        self.smooth_with(arena, svol.view());
        log::info!("interpolated {} node(s) at sigma {}", arena.len(), self.sigma);
    }

    /// 以已经平滑好的强度 `svol` 平滑.
    pub fn smooth_with(&self, arena: &mut NodeArena, svol: ArrayView3<f32>) {
        for slot in 0..arena.len() {
            let id = NodeId::from_slot(slot);
            let node = &arena[id];
            let Some(parent) = node.parent.filter(|_| !node.children.is_empty()) else {
                let pos = idx_to_pos(&node.index);
                arena[id].position = pos;
                continue;
            };

            let (mut wsum, mut z, mut h, mut w) = (0f32, 0f32, 0f32, 0f32);
            let neighbours = std::iter::once(id)
                .chain(std::iter::once(parent))
                .chain(node.children.iter().copied());
            for n in neighbours {
                let idx = arena[n].index;
                let wt = svol[idx].max(MIN_SMOOTH_WEIGHT);
                let (pz, ph, pw) = idx_to_pos(&idx);
                wsum += wt;
                z += wt * pz;
                h += wt * ph;
                w += wt * pw;
            }
            let pos = (z / wsum, h / wsum, w / wsum);
            let (rz, rh, rw) = round_pos(pos);
            let node = &mut arena[id];
            node.position = pos;
            node.index = (rz.max(0) as usize, rh.max(0) as usize, rw.max(0) as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_straight_line_is_fixed_point() {
        let mut a = NodeArena::new();
        let mut prev = a.push_root((2, 2, 0), 1);
        for w in 1..6 {
            prev = a.push_child(prev, (2, 2, w), 0.0);
        }
        let svol = Array3::<f32>::from_elem((5, 5, 8), 0.5);
        TreeSmoother::new(2.0).smooth_with(&mut a, svol.view());
        for (k, n) in a.iter().enumerate() {
            assert_eq!(n.index, (2, 2, k));
            assert!(float_eq(n.position.2, k as f32));
        }
    }

    #[test]
    fn test_kink_is_relaxed() {
        let mut a = NodeArena::new();
        let r = a.push_root((0, 0, 0), 1);
        let k = a.push_child(r, (0, 3, 1), 0.0);
        let l = a.push_child(k, (0, 0, 2), 0.0);
        // 叶节点的位置偏离了索引, 平滑后应被重置.
        a[l].position = (0.0, 0.4, 2.0);

        // 低于下限的强度使用下限作为权重.
        let svol = Array3::<f32>::zeros((1, 4, 3));
        TreeSmoother::new(2.0).smooth_with(&mut a, svol.view());

        assert!(float_eq(a[k].position.1, 1.0));
        assert!(float_eq(a[k].position.2, 1.0));
        assert_eq!(a[k].index, (0, 1, 1));
        assert_eq!(a[l].position, (0.0, 0.0, 2.0));
        assert_eq!(a[r].position, (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_bright_neighbour_attracts() {
        let mut a = NodeArena::new();
        let r = a.push_root((0, 0, 0), 1);
        let k = a.push_child(r, (0, 0, 2), 0.0);
        a.push_child(k, (0, 0, 4), 0.0);
        let mut svol = Array3::<f32>::zeros((1, 1, 5));
        svol[(0, 0, 4)] = 0.5;
        TreeSmoother::new(1.0).smooth_with(&mut a, svol.view());
        // (0.1 * 0 + 0.1 * 2 + 0.5 * 4) / 0.7
        assert!(float_eq(a[k].position.2, 2.2 / 0.7));
        assert_eq!(a[k].index, (0, 0, 3));
    }
}
