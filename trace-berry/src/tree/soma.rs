//! 胞体内部节点清理.

use super::{NodeArena, NodeId, TreeNode};
use crate::SomaMask;

/// 去除落在胞体内的非根节点.
///
/// 父节点被去除的节点直接挂到所在树的根上, 并清除其 `span`.
/// 保留下来的节点按原顺序重新连续编号.
///
/// # 注意
///
/// `pad` 为体积在 z 方向上的填充层数, 掩膜使用未填充的坐标.
pub fn remove_intra_soma_nodes(arena: NodeArena, mask: &SomaMask, pad: usize) -> NodeArena {
    let removed: Vec<bool> = arena
        .iter()
        .map(|n| !n.is_root() && mask.contains(n.index, pad))
        .collect();
    let n_removed = removed.iter().filter(|r| **r).count();
    if n_removed == 0 {
        log::info!("no node lies inside the soma mask");
        return arena;
    }

    let roots: Vec<Option<NodeId>> = arena.iter().map(|n| arena.root_of(n.id)).collect();
    let nodes = arena.into_nodes();
    let mut new_id: Vec<Option<NodeId>> = vec![None; nodes.len()];
    let mut out: Vec<TreeNode> = Vec::with_capacity(nodes.len() - n_removed);
    let mut reattached = 0usize;

    for node in nodes.iter() {
        let slot = node.id.slot();
        if removed[slot] {
            continue;
        }
        let (parent, span) = match node.parent {
            None => (None, None),
            Some(p) if !removed[p.slot()] => (new_id[p.slot()], node.span),
            Some(_) => {
                reattached += 1;
                let root = roots[slot].and_then(|r| new_id[r.slot()]);
                (root, None)
            }
        };
        if node.parent.is_some() && parent.is_none() {
            log::debug!("node {} dropped: no surviving ancestor", node.id);
            continue;
        }

        let id = NodeId::from_slot(out.len());
        new_id[slot] = Some(id);
        out.push(TreeNode {
            id,
            parent,
            span,
            children: Vec::new(),
            ..node.clone()
        });
    }

    log::info!(
        "removed {} intra-soma node(s), {} node(s) re-attached to their root",
        n_removed,
        reattached
    );
    NodeArena::from_nodes(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_soma_nodes_are_removed() {
        let mut a = NodeArena::new();
        let r = a.push_root((3, 2, 2), 1);
        let n1 = a.push_child(r, (3, 2, 3), 1.0);
        let n2 = a.push_child(n1, (3, 2, 4), 2.0);
        let n3 = a.push_child(n2, (3, 2, 6), 3.0);
        a[n3].span = Some(2.5);
        a.push_child(n3, (3, 2, 7), 4.0);

        // pad = 1, 掩膜坐标的 z 比体积小 1.
        let mut m = Array3::<u8>::zeros((4, 4, 8));
        for w in 0..5 {
            m[(2, 2, w)] = 1;
        }
        let out = remove_intra_soma_nodes(a, &SomaMask::from_array(m), 1);

        let idx: Vec<_> = out.iter().map(|n| n.index).collect();
        assert_eq!(idx, vec![(3, 2, 2), (3, 2, 6), (3, 2, 7)]);
        let nodes: Vec<_> = out.iter().collect();
        assert!(nodes[0].is_root());
        assert_eq!(nodes[1].parent, NodeId::new(1));
        assert_eq!(nodes[1].span, None);
        assert_eq!(nodes[2].parent, NodeId::new(2));
        assert_eq!(out[NodeId::new(1).unwrap()].children.len(), 1);
        assert!(out.is_consistent());
    }

    #[test]
    fn test_outside_mask_untouched() {
        let mut a = NodeArena::new();
        let r = a.push_root((1, 0, 0), 1);
        a.push_child(r, (1, 0, 1), 1.0);
        let m = Array3::<u8>::zeros((2, 2, 2));
        let out = remove_intra_soma_nodes(a, &SomaMask::from_array(m), 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[NodeId::new(2).unwrap()].parent, Some(r));
    }
}
