//! 剪枝与抽稀.
//!
//! 流程:
//!
//! 1. 分类: 分叉 (>= 2 个子节点), 叶 (无子节点), 根保持活跃, 其余不活跃.
//!   已经抽稀过的节点保持活跃.
//! 2. 稳定化: 父节点不活跃且没有活跃子节点的不活跃节点重新变为活跃.
//!   按编号顺序原地进行, 因此长链会被隔一取一.
//! 3. 去除短分叉: 从叶向上累积路径长度, 直到分叉或根. 长度严格小于阈值时
//!   整段失活, 分叉的剩余子分支少于两个时不再视为分叉.
//! 4. 重新编号: 活跃节点按顺序获得新的连续编号, 父节点为最近的活跃祖先.

use super::{NodeArena, NodeId, TreeNode};
use crate::{round_pos, TraceConfig};

/// 剪枝器.
#[derive(Debug, Clone)]
pub struct TreePruner {
    min_offshoot_length: f32,
}

impl TreePruner {
    /// 构建. 短于 `min_offshoot_length` (严格小于) 的末端分叉会被剪掉.
    #[inline]
    pub fn new(min_offshoot_length: f32) -> Self {
        Self {
            min_offshoot_length,
        }
    }

    /// 使用配置中的参数.
    #[inline]
    pub fn from_config(config: &TraceConfig) -> Self {
        Self::new(config.min_offshoot_length)
    }

    /// 完整的剪枝流程. 返回新的节点池.
    pub fn prune(&self, mut arena: NodeArena) -> NodeArena {
        let before = arena.len();
        classify(&mut arena);
        let removed = self.remove_offshoots(&mut arena);
        let out = renumber(arena);
        log::info!(
            "decimated tree: {} -> {} node(s), {} offshoot node(s) removed",
            before,
            out.len(),
            removed
        );
        out
    }

    /// 去除短分叉, 返回失活的节点数. 需要先调用 [`classify`].
    pub fn remove_offshoots(&self, arena: &mut NodeArena) -> usize {
        let mut pruned = vec![false; arena.len()];
        let mut removed = 0;

        for slot in 0..arena.len() {
            let leaf = NodeId::from_slot(slot);
            if !arena[leaf].is_leaf {
                continue;
            }
            let Some(first) = arena[leaf].parent else {
                continue;
            };
            if arena[first].is_root() {
                continue;
            }

            let mut d = arena.span_of(leaf);
            let mut stop = first;
            while let Some(next) = arena[stop].parent {
                if arena[stop].is_branch {
                    break;
                }
                d += arena.span_of(stop);
                stop = next;
            }
            if d >= self.min_offshoot_length {
                continue;
            }

            let mut cur = leaf;
            while cur != stop {
                arena[cur].is_active = false;
                pruned[cur.slot()] = true;
                removed += 1;
                match arena[cur].parent {
                    Some(p) => cur = p,
                    None => break,
                }
            }
            let live = arena[stop]
                .children
                .iter()
                .filter(|c| !pruned[c.slot()])
                .count();
            if live < 2 {
                arena[stop].is_branch = false;
            }
            log::debug!(
                "offshoot at node {} of length {:.3} removed (stopped at {})",
                leaf,
                d,
                stop
            );
        }
        removed
    }
}

/// 分类与稳定化.
pub fn classify(arena: &mut NodeArena) {
    for n in arena.iter_mut() {
        n.is_leaf = n.children.is_empty();
        n.is_branch = n.children.len() >= 2;
        n.is_active = n.is_leaf || n.is_branch || n.is_root() || n.decimated;
    }

    for slot in 0..arena.len() {
        let id = NodeId::from_slot(slot);
        let node = &arena[id];
        if node.is_active {
            continue;
        }
        let Some(p) = node.parent else {
            continue;
        };
        let child_active = node.children.iter().any(|c| arena[*c].is_active);
        if !arena[p].is_active && !child_active {
            arena[id].is_active = true;
        }
    }
}

/// 重新编号. 不活跃节点被丢弃, 活跃节点的父节点为最近的活跃祖先,
/// `span` 为沿途路径长度之和, `index` 为位置四舍五入的结果
/// (与 [`super::TreeSmoother`] 一致, 不截断).
pub fn renumber(arena: NodeArena) -> NodeArena {
    let spans: Vec<f32> = arena.iter().map(|n| arena.span_of(n.id)).collect();
    let nodes = arena.into_nodes();
    let mut new_id: Vec<Option<NodeId>> = vec![None; nodes.len()];
    let mut out: Vec<TreeNode> = Vec::with_capacity(nodes.len());

    for node in nodes.iter().filter(|n| n.is_active) {
        let mut acc = spans[node.id.slot()];
        let mut par = node.parent;
        while let Some(p) = par {
            let pn = &nodes[p.slot()];
            if pn.is_active {
                break;
            }
            acc += spans[p.slot()];
            par = pn.parent;
        }

        let parent = match par {
            None => None,
            Some(p) => match new_id[p.slot()] {
                Some(np) => Some(np),
                None => {
                    log::debug!("node {} dropped: parent {} was not kept", node.id, p);
                    continue;
                }
            },
        };

        let id = NodeId::from_slot(out.len());
        new_id[node.id.slot()] = Some(id);
        let (z, h, w) = round_pos(node.position);
        out.push(TreeNode {
            id,
            parent,
            index: (z.max(0) as usize, h.max(0) as usize, w.max(0) as usize),
            span: parent.map(|_| acc),
            decimated: true,
            is_active: true,
            children: Vec::new(),
            ..node.clone()
        });
    }
    NodeArena::from_nodes(out)
}
