//! 追踪树: 节点, 节点池, 体素归属表, 以及构建/剪枝/平滑/胞体清理.
//!
//! 所有节点都存放在 [`NodeArena`] 中, 通过 [`NodeId`] 相互引用. 父指针是唯一的
//! "拥有" 方向, `children` 只是反向索引.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Index, IndexMut};

use crate::{idx_to_pos, Idx3d, Pos3d};

pub mod builder;
pub mod claim;
pub mod prune;
pub mod smooth;
pub mod soma;

pub use builder::{TraceOutcome, TreeBuilder};
pub use claim::{Claim, ClaimMap};
pub use prune::TreePruner;
pub use smooth::TreeSmoother;
pub use soma::remove_intra_soma_nodes;

/// 节点编号, 从 1 开始, 按创建顺序递增.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// 由 1 起始的编号构建. `id == 0` 时返回 `None`.
    #[inline]
    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    /// 编号数值.
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    /// 在节点池中的下标.
    #[inline]
    fn slot(self) -> usize {
        self.0 as usize - 1
    }

    #[inline]
    fn from_slot(slot: usize) -> Self {
        Self(slot as u32 + 1)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 树节点.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// 编号.
    pub id: NodeId,
    /// 父节点. `None` 表示根 (种子).
    pub parent: Option<NodeId>,
    /// 所属树编号, 从 1 开始, 与种子顺序一致.
    pub tree_id: u32,
    /// 体素索引 (填充后).
    pub index: Idx3d,
    /// 浮点位置. 平滑后可能偏离 `index`.
    pub position: Pos3d,
    /// 被认领时的累积代价.
    pub cost: f32,
    /// 叶节点标记 (剪枝时计算).
    pub is_leaf: bool,
    /// 分叉节点标记 (剪枝时计算).
    pub is_branch: bool,
    /// 剪枝时是否保留.
    pub is_active: bool,
    /// 子节点.
    pub children: Vec<NodeId>,
    /// 到父节点的路径长度, 沿剪枝前的折线测量. `None` 表示尚未剪枝过,
    /// 此时使用与父节点位置之间的欧氏距离.
    pub span: Option<f32>,
    /// 是否经过抽稀. 经过抽稀的节点再次剪枝时保持活跃.
    pub decimated: bool,
}

impl TreeNode {
    fn new(id: NodeId, parent: Option<NodeId>, tree_id: u32, index: Idx3d, cost: f32) -> Self {
        Self {
            id,
            parent,
            tree_id,
            index,
            position: idx_to_pos(&index),
            cost,
            is_leaf: false,
            is_branch: false,
            is_active: true,
            children: Vec::with_capacity(2),
            span: None,
            decimated: false,
        }
    }

    /// 是否为根.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// 节点池. 节点按编号顺序存放, `nodes[i].id == i + 1`.
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<TreeNode>,
}

impl Index<NodeId> for NodeArena {
    type Output = TreeNode;

    #[inline]
    fn index(&self, id: NodeId) -> &Self::Output {
        &self.nodes[id.slot()]
    }
}

impl IndexMut<NodeId> for NodeArena {
    #[inline]
    fn index_mut(&mut self, id: NodeId) -> &mut Self::Output {
        &mut self.nodes[id.slot()]
    }
}

impl NodeArena {
    /// 空节点池.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn next_id(&self) -> NodeId {
        NodeId::from_slot(self.nodes.len())
    }

    /// 添加根节点.
    pub fn push_root(&mut self, index: Idx3d, tree_id: u32) -> NodeId {
        let id = self.next_id();
        self.nodes.push(TreeNode::new(id, None, tree_id, index, 0.0));
        id
    }

    /// 添加 `parent` 的子节点, 树编号继承自父节点.
    ///
    /// # 注意
    ///
    /// `parent` 不存在时 panic.
    pub fn push_child(&mut self, parent: NodeId, index: Idx3d, cost: f32) -> NodeId {
        let id = self.next_id();
        let tree_id = self[parent].tree_id;
        self[parent].children.push(id);
        self.nodes.push(TreeNode::new(id, Some(parent), tree_id, index, cost));
        id
    }

    /// 以已经编号好的节点序列重建节点池, 并根据父指针重建 `children`.
    ///
    /// # 注意
    ///
    /// 调用方需保证 `nodes[i].id == i + 1`, 且父节点编号都小于子节点.
    pub(crate) fn from_nodes(mut nodes: Vec<TreeNode>) -> Self {
        debug_assert!(nodes.iter().enumerate().all(|(i, n)| n.id.slot() == i));
        nodes.iter_mut().for_each(|n| n.children.clear());
        for i in 0..nodes.len() {
            if let Some(p) = nodes[i].parent {
                let id = nodes[i].id;
                nodes[p.slot()].children.push(id);
            }
        }
        Self { nodes }
    }

    /// 取出全部节点.
    #[inline]
    pub(crate) fn into_nodes(self) -> Vec<TreeNode> {
        self.nodes
    }

    /// 越界时返回 `None`.
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.slot())
    }

    /// 节点个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 按编号顺序迭代节点.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &TreeNode> {
        self.nodes.iter()
    }

    /// 按编号顺序迭代可变节点.
    #[inline]
    pub fn iter_mut(&mut self) -> impl ExactSizeIterator<Item = &mut TreeNode> {
        self.nodes.iter_mut()
    }

    /// 所有根节点.
    pub fn roots(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter().filter(|n| n.is_root())
    }

    /// 所有出现过的树编号, 升序.
    pub fn tree_ids(&self) -> BTreeSet<u32> {
        self.nodes.iter().map(|n| n.tree_id).collect()
    }

    /// 属于 `tree_id` 的节点, 按编号顺序.
    pub fn nodes_of_tree(&self, tree_id: u32) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter().filter(move |n| n.tree_id == tree_id)
    }

    /// 从 `id` 沿父指针向上走到根. 存在环时返回 `None`.
    pub fn root_of(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = id;
        for _ in 0..=self.nodes.len() {
            match self.get(cur)?.parent {
                None => return Some(cur),
                Some(p) => cur = p,
            }
        }
        None
    }

    /// 父指针图是否无环, 且每个节点与其根的树编号一致.
    pub fn is_consistent(&self) -> bool {
        self.nodes.iter().all(|n| {
            self.root_of(n.id)
                .is_some_and(|r| self[r].tree_id == n.tree_id)
        })
    }

    /// `id` 与其父节点之间的路径长度. 根节点返回 0.
    pub fn span_of(&self, id: NodeId) -> f32 {
        let node = &self[id];
        match (node.span, node.parent) {
            (_, None) => 0.0,
            (Some(s), _) => s,
            (None, Some(p)) => crate::pos_distance(node.position, self[p].position),
        }
    }
}
