//! 体素归属表. 每个体素最多被一棵树的一个节点认领, 或者被一个候选标记占据.

use ndarray::Array3;

use super::{NodeArena, NodeId};
use crate::Idx3d;

/// 体素的归属状态.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Claim {
    /// 无人认领.
    #[default]
    Free,
    /// 尚未被吸收的候选标记, 附带从 1 开始的序号.
    Marker(u32),
    /// 已被树节点认领.
    Node(NodeId),
}

/// 稠密的体素归属表.
#[derive(Debug, Clone)]
pub struct ClaimMap {
    data: Array3<Claim>,
    markers: usize,
    total_markers: usize,
}

impl ClaimMap {
    /// 全部为 [`Claim::Free`].
    pub fn new(shape: Idx3d) -> Self {
        Self {
            data: Array3::from_elem(shape, Claim::Free),
            markers: 0,
            total_markers: 0,
        }
    }

    /// 获取 `idx` 的归属. 越界时 panic.
    #[inline]
    pub fn get(&self, idx: Idx3d) -> Claim {
        self.data[idx]
    }

    /// 若 `idx` 被节点认领, 返回该节点.
    #[inline]
    pub fn node_at(&self, idx: Idx3d) -> Option<NodeId> {
        match self.data.get(idx) {
            Some(Claim::Node(id)) => Some(*id),
            _ => None,
        }
    }

    /// `idx` 是否被节点认领. 越界返回 `false`.
    #[inline]
    pub fn is_node(&self, idx: Idx3d) -> bool {
        self.node_at(idx).is_some()
    }

    /// `idx` 是否是候选标记.
    #[inline]
    pub fn is_marker(&self, idx: Idx3d) -> bool {
        matches!(self.data[idx], Claim::Marker(_))
    }

    /// 在空闲体素上放置候选标记. 体素已被占据时返回 `false`.
    pub fn place_marker(&mut self, idx: Idx3d) -> bool {
        if self.data[idx] != Claim::Free {
            return false;
        }
        self.total_markers += 1;
        self.markers += 1;
        self.data[idx] = Claim::Marker(self.total_markers as u32);
        true
    }

    /// 移除 `idx` 上的候选标记. 不是标记时返回 `false`.
    pub fn remove_marker(&mut self, idx: Idx3d) -> bool {
        if !self.is_marker(idx) {
            return false;
        }
        self.data[idx] = Claim::Free;
        self.markers -= 1;
        true
    }

    /// 由节点认领 `idx`. 若原来是标记, 剩余标记数减一, 并返回 `true`.
    ///
    /// # 注意
    ///
    /// 不能覆盖已有的节点认领. 违反时在 debug 模式下 panic.
    pub fn claim(&mut self, idx: Idx3d, id: NodeId) -> bool {
        let was_marker = match self.data[idx] {
            Claim::Marker(_) => {
                self.markers -= 1;
                true
            }
            Claim::Free => false,
            Claim::Node(_) => {
                debug_assert!(false, "voxel {idx:?} already claimed");
                false
            }
        };
        self.data[idx] = Claim::Node(id);
        was_marker
    }

    /// 剩余未处理的候选标记数.
    #[inline]
    pub fn remaining_markers(&self) -> usize {
        self.markers
    }

    /// 曾放置的候选标记总数.
    #[inline]
    pub fn total_markers(&self) -> usize {
        self.total_markers
    }

    /// 清除所有剩余标记, 返回清除个数.
    pub fn clear_markers(&mut self) -> usize {
        let n = self.markers;
        self.data.mapv_inplace(|c| match c {
            Claim::Marker(_) => Claim::Free,
            other => other,
        });
        self.markers = 0;
        n
    }

    /// `idx` 的树编号: 节点返回其正的树编号, 标记返回 `-序号`, 空闲返回 0.
    pub fn tree_id_at(&self, idx: Idx3d, arena: &NodeArena) -> i64 {
        match self.data[idx] {
            Claim::Free => 0,
            Claim::Marker(k) => -(k as i64),
            Claim::Node(id) => arena[id].tree_id as i64,
        }
    }

    /// 按节点池当前的内容重建归属表. 标记全部丢弃.
    pub fn rebuild(&mut self, arena: &NodeArena) {
        self.data.fill(Claim::Free);
        self.markers = 0;
        for n in arena.iter() {
            self.data[n.index] = Claim::Node(n.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims() {
        let mut arena = NodeArena::new();
        let mut m = ClaimMap::new((4, 4, 4));
        assert!(m.place_marker((1, 1, 1)));
        assert!(m.place_marker((2, 2, 2)));
        assert!(!m.place_marker((2, 2, 2)));
        assert_eq!(m.remaining_markers(), 2);
        assert_eq!(m.tree_id_at((2, 2, 2), &arena), -2);

        let r = arena.push_root((1, 1, 1), 7);
        assert!(m.claim((1, 1, 1), r));
        assert_eq!(m.remaining_markers(), 1);
        assert_eq!(m.node_at((1, 1, 1)), Some(r));
        assert_eq!(m.tree_id_at((1, 1, 1), &arena), 7);
        assert_eq!(m.tree_id_at((0, 0, 0), &arena), 0);
        assert!(!m.place_marker((1, 1, 1)));

        assert!(!m.remove_marker((1, 1, 1)));
        assert!(m.remove_marker((2, 2, 2)));
        assert_eq!(m.remaining_markers(), 0);
        assert_eq!(m.total_markers(), 2);

        m.place_marker((3, 3, 3));
        assert_eq!(m.clear_markers(), 1);
        assert!(!m.is_marker((3, 3, 3)));
        assert!(!m.is_node((9, 9, 9)));
    }
}
