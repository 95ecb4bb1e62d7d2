//! 前沿传播.
//!
//! 从所有种子同时出发, 按累积代价升序扩展体素 (带惰性删除的 Dijkstra).
//! 弹出的体素若是候选标记, 就从该处沿代价场回溯到已有的树, 并把回溯链连入树中.
//! 弹出代价超过阈值, 或所有标记都已处理后, 停止生长, 剩余的堆只做清空.

use binary_heap_plus::BinaryHeap;
use ndarray::Array3;
use ordered_float::OrderedFloat;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::candidates::Candidate;
use crate::field::{local_penalty, CostField};
use crate::tree::{ClaimMap, NodeArena, TraceOutcome, TreeBuilder};
use crate::{Idx3d, TraceConfig, TraceError, TraceResult, Volume};

/// 堆中的一项. 按代价升序, 代价相同时按索引排序, 保证结果确定.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HeapEntry {
    cost: OrderedFloat<f32>,
    index: Idx3d,
}

impl HeapEntry {
    /// 构建.
    #[inline]
    pub fn new(cost: f32, index: Idx3d) -> Self {
        Self {
            cost: OrderedFloat(cost),
            index,
        }
    }

    /// 入堆时的代价.
    #[inline]
    pub fn cost(&self) -> f32 {
        self.cost.into_inner()
    }

    /// 体素索引.
    #[inline]
    pub fn index(&self) -> Idx3d {
        self.index
    }
}

/// 体素在传播过程中的状态.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum VoxelState {
    /// 尚未入堆.
    #[default]
    Unvisited,
    /// 在堆中, 代价还可能下降.
    Active,
    /// 已经确定, 代价不再被松弛. 打开转角代价时, 回溯链上的体素仍可能被缩放.
    Settled,
}

/// 传播统计.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PropagationStats {
    /// 弹出次数.
    pub pops: usize,
    /// 过期 (被更小代价取代或已确定) 的弹出次数.
    pub stale: usize,
    /// 确定的体素数.
    pub settled: usize,
    /// 放置的候选标记数.
    pub markers: usize,
    /// 被吸收进树的标记数.
    pub absorbed: usize,
    /// 因回溯失败或停止生长而丢弃的标记数.
    pub dropped: usize,
    /// 直到结束都没有被弹出的标记数.
    pub unreached: usize,
    /// 停止生长时的弹出代价. 堆被耗尽时为 `None`.
    pub stopped_at: Option<f32>,
}

/// 一次传播的全部结果.
#[derive(Debug, Clone)]
pub struct Propagation {
    /// 累积代价场.
    pub field: CostField,
    /// 体素归属. 传播结束时不再含有标记.
    pub claims: ClaimMap,
    /// 体素状态.
    pub state: Array3<VoxelState>,
    /// 生长出的树.
    pub nodes: NodeArena,
    /// 统计.
    pub stats: PropagationStats,
}

/// 前沿传播器. 自身无状态, 可以在多个任务之间共享.
#[derive(Debug, Clone)]
pub struct FrontPropagator {
    cost_threshold: f32,
    builder: TreeBuilder,
}

impl FrontPropagator {
    /// 构建. 弹出代价严格大于 `cost_threshold` 时停止生长.
    #[inline]
    pub fn new(cost_threshold: f32, builder: TreeBuilder) -> Self {
        Self {
            cost_threshold,
            builder,
        }
    }

    /// 使用配置中的参数.
    #[inline]
    pub fn from_config(config: &TraceConfig) -> Self {
        Self::new(config.cost_threshold, TreeBuilder::from_config(config))
    }

    /// 在 `volume` 上从 `seeds` 出发传播.
    ///
    /// 第 k 个 (去重后) 种子是第 k + 1 棵树的根. 越界或重复的种子会被忽略,
    /// 没有可用种子时返回 [`TraceError::EmptySeeds`].
    /// 落在种子上或越界的候选点不会放置标记.
    pub fn propagate(
        &self,
        volume: &Volume,
        seeds: &[Idx3d],
        candidates: &[Candidate],
    ) -> TraceResult<Propagation> {
        let shape = volume.shape();
        let mut claims = ClaimMap::new(shape);
        let mut nodes = NodeArena::new();
        let mut roots = Vec::with_capacity(seeds.len());

        for &s in seeds {
            if !volume.check(&s) {
                log::warn!("seed {:?} is outside the volume {:?}, ignored", s, shape);
                continue;
            }
            if claims.is_node(s) {
                log::warn!("duplicate seed {:?} ignored", s);
                continue;
            }
            let tree_id = roots.len() as u32 + 1;
            self.builder.plant_seed(&mut nodes, &mut claims, s, tree_id);
            roots.push(s);
        }
        if roots.is_empty() {
            return Err(TraceError::EmptySeeds);
        }

        for c in candidates.iter().filter(|c| volume.check(&c.index)) {
            claims.place_marker(c.index);
        }
        let mut stats = PropagationStats {
            markers: claims.total_markers(),
            ..Default::default()
        };
        if stats.markers == 0 {
            log::warn!("no candidate marker placed, trees will only contain their roots");
        }
        log::info!(
            "propagating from {} seed(s) towards {} marker(s) in volume {:?}",
            roots.len(),
            stats.markers,
            shape
        );

        let mut field = CostField::initialize(shape, &roots);
        let mut state = Array3::from_elem(shape, VoxelState::Unvisited);
        let mut heap = BinaryHeap::new_min();
        heap.reserve(1024);
        for &s in roots.iter() {
            state[s] = VoxelState::Active;
            heap.push(HeapEntry::new(0.0, s));
        }

        let mut growing = true;
        while let Some(entry) = heap.pop() {
            stats.pops += 1;
            let (idx, cost) = (entry.index(), entry.cost());
            if cost > field[idx] || state[idx] == VoxelState::Settled {
                stats.stale += 1;
                continue;
            }

            if growing && (cost > self.cost_threshold || claims.remaining_markers() == 0) {
                growing = false;
                stats.stopped_at = Some(cost);
                let left = claims.remaining_markers();
                log::info!(
                    "growth stopped at cost {:.3}: {} of {} marker(s) left ({:.1}%)",
                    cost,
                    left,
                    stats.markers,
                    100.0 * left as f32 / stats.markers.max(1) as f32
                );
            }
            if !growing {
                if claims.remove_marker(idx) {
                    stats.dropped += 1;
                }
                continue;
            }

            if claims.is_marker(idx) {
                match self.builder.trace_back(&field, &claims, idx) {
                    TraceOutcome::Connected { anchor, chain } => {
                        let att =
                            self.builder
                                .attach(&mut nodes, &mut field, &mut claims, anchor, &chain);
                        stats.absorbed += att.absorbed;
                        for id in att.nodes {
                            let n = nodes[id].index;
                            heap.push(HeapEntry::new(field[n], n));
                        }
                    }
                    outcome => {
                        claims.remove_marker(idx);
                        stats.dropped += 1;
                        log::warn!("marker at {:?} dropped: trace-back {:?}", idx, outcome);
                    }
                }
            }

            state[idx] = VoxelState::Settled;
            stats.settled += 1;
            for n in volume.neighbours6(idx) {
                if state[n] == VoxelState::Settled || claims.is_node(n) {
                    continue;
                }
                let aa = field.relax(n, local_penalty(volume[n]));
                if field[n] > aa {
                    field[n] = aa;
                    state[n] = VoxelState::Active;
                    heap.push(HeapEntry::new(aa, n));
                }
            }
        }
        stats.unreached = claims.clear_markers();

        log::info!(
            "propagation finished: {} pop(s), {} settled, {} node(s) in {} tree(s), \
             {} absorbed, {} dropped, {} unreached",
            stats.pops,
            stats.settled,
            nodes.len(),
            roots.len(),
            stats.absorbed,
            stats.dropped,
            stats.unreached
        );
        Ok(Propagation {
            field,
            claims,
            state,
            nodes,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn volume_with_lines(shape: Idx3d, lines: &[(usize, usize)], ws: (usize, usize)) -> Volume {
        let mut data = Array3::<f32>::zeros(shape);
        for &(z, h) in lines {
            for w in ws.0..=ws.1 {
                data[(z, h, w)] = 1.0;
            }
        }
        Volume::from_array(data).unwrap()
    }

    fn check_partition(p: &Propagation) {
        assert!(p.nodes.is_consistent());
        let voxels: BTreeSet<_> = p.nodes.iter().map(|n| n.index).collect();
        assert_eq!(voxels.len(), p.nodes.len());
        for n in p.nodes.iter() {
            assert_eq!(p.claims.node_at(n.index), Some(n.id));
        }
    }

    #[test]
    fn test_heap_entry_order() {
        let mut heap = BinaryHeap::new_min();
        heap.push(HeapEntry::new(2.0, (0, 0, 0)));
        heap.push(HeapEntry::new(1.0, (0, 0, 9)));
        heap.push(HeapEntry::new(1.0, (0, 0, 1)));
        assert_eq!(heap.pop().unwrap().index(), (0, 0, 1));
        assert_eq!(heap.pop().unwrap().index(), (0, 0, 9));
        assert_eq!(heap.pop().unwrap().cost(), 2.0);
    }

    #[test]
    fn test_straight_line() {
        let v = volume_with_lines((11, 11, 21), &[(5, 5)], (5, 15));
        let c = [Candidate::new((5, 5, 15), 1.0)];
        let p = FrontPropagator::from_config(&TraceConfig::default())
            .propagate(&v, &[(5, 5, 5)], &c)
            .unwrap();

        assert_eq!(p.nodes.len(), 11);
        assert_eq!(p.stats.absorbed, 1);
        assert_eq!(p.stats.dropped, 0);
        assert_eq!(p.claims.remaining_markers(), 0);
        check_partition(&p);

        let mut line: Vec<_> = p.nodes.iter().collect();
        line.sort_by_key(|n| n.index.2);
        for (k, n) in line.iter().enumerate() {
            assert_eq!(n.index, (5, 5, 5 + k));
            assert_eq!(n.tree_id, 1);
            assert!(n.children.len() <= 1);
        }
        assert!(line.windows(2).all(|w| w[0].cost < w[1].cost));
        assert!(line[10].cost < 11.0);
        // 链上每一步恰好增加一个局部代价, 与代价场一致.
        let step = local_penalty(1.0);
        for w in line.windows(2) {
            assert!((w[1].cost - w[0].cost - step).abs() < 1e-3);
        }
        assert!(line.iter().all(|n| p.field[n.index] == n.cost));
    }

    #[test]
    fn test_two_seeds_two_trees() {
        let v = volume_with_lines((21, 21, 17), &[(5, 5), (15, 15)], (3, 13));
        let c = [
            Candidate::new((5, 5, 13), 1.0),
            Candidate::new((15, 15, 13), 1.0),
        ];
        let p = FrontPropagator::from_config(&TraceConfig::default())
            .propagate(&v, &[(5, 5, 3), (15, 15, 3)], &c)
            .unwrap();

        check_partition(&p);
        assert_eq!(p.nodes.roots().count(), 2);
        assert_eq!(p.nodes.nodes_of_tree(1).count(), 11);
        assert_eq!(p.nodes.nodes_of_tree(2).count(), 11);
        assert!(p.nodes.nodes_of_tree(1).all(|n| n.index.0 == 5 && n.index.1 == 5));
        assert!(p.nodes.nodes_of_tree(2).all(|n| n.index.0 == 15 && n.index.1 == 15));
        for n in p.nodes.iter() {
            if let Some(par) = n.parent {
                assert_eq!(p.nodes[par].tree_id, n.tree_id);
            }
        }
    }

    #[test]
    fn test_unconnectable_marker_is_dropped() {
        // 代价场几乎处处为 0, 梯度太小, 回溯原地不动直到步数耗尽.
        let v = Volume::from_array(Array3::from_elem((8, 8, 8), 1e9)).unwrap();
        let c = [Candidate::new((6, 6, 6), 1.0)];
        let p = FrontPropagator::from_config(&TraceConfig::default())
            .propagate(&v, &[(1, 1, 1)], &c)
            .unwrap();
        assert_eq!(p.nodes.len(), 1);
        assert_eq!(p.stats.dropped, 1);
        assert_eq!(p.stats.absorbed, 0);
        assert_eq!(p.claims.remaining_markers(), 0);
    }

    #[test]
    fn test_walled_marker_is_unreached() {
        // 强度为 0 的一层外壳包住 (4, 4, 15) 处的标记.
        let mut data = Array3::<f32>::ones((9, 9, 20));
        for z in 3..=5 {
            for h in 3..=5 {
                for w in 14..=16 {
                    if (z, h, w) != (4, 4, 15) {
                        data[(z, h, w)] = 0.0;
                    }
                }
            }
        }
        let v = Volume::from_array(data).unwrap();
        let c = [
            Candidate::new((4, 4, 8), 1.0),
            Candidate::new((4, 4, 15), 1.0),
        ];
        let config = TraceConfig::default().with_cost_threshold(500.0);
        let p = FrontPropagator::from_config(&config)
            .propagate(&v, &[(4, 4, 2)], &c)
            .unwrap();

        check_partition(&p);
        assert_eq!(p.stats.markers, 2);
        assert_eq!(p.stats.absorbed, 1);
        assert_eq!(p.stats.dropped, 0);
        assert_eq!(p.stats.unreached, 1);
        assert!(p.stats.stopped_at.is_some_and(|c| c > 500.0));
        assert_eq!(p.claims.remaining_markers(), 0);

        assert!(p.claims.node_at((4, 4, 8)).is_some());
        assert_eq!(p.state[(4, 4, 15)], VoxelState::Unvisited);
        assert_eq!(p.field[(4, 4, 15)], crate::consts::MAXVAL);
        let in_wall = |(z, h, w): Idx3d| {
            (3..=5).contains(&z) && (3..=5).contains(&h) && (14..=16).contains(&w)
        };
        assert!(p.nodes.iter().all(|n| !in_wall(n.index)));
        assert!(p
            .state
            .indexed_iter()
            .all(|(i, s)| !in_wall(i) || *s != VoxelState::Settled));
    }

    #[test]
    fn test_seeds_validated() {
        let v = volume_with_lines((4, 4, 4), &[], (0, 0));
        let fp = FrontPropagator::from_config(&TraceConfig::default());
        assert!(matches!(
            fp.propagate(&v, &[], &[]),
            Err(TraceError::EmptySeeds)
        ));
        assert!(matches!(
            fp.propagate(&v, &[(9, 9, 9)], &[]),
            Err(TraceError::EmptySeeds)
        ));
        let p = fp.propagate(&v, &[(1, 1, 1), (1, 1, 1), (2, 2, 2)], &[]).unwrap();
        assert_eq!(p.nodes.len(), 2);
        assert_eq!(p.nodes.tree_ids().len(), 2);
    }

    #[test]
    fn test_settled_costs_are_upwind_consistent() {
        let shape = (10, 10, 10);
        let mut seed = 12345u32;
        let data = Array3::from_shape_fn(shape, |_| {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            0.2 + 0.8 * ((seed >> 16) & 0x7fff) as f32 / 32767.0
        });
        let v = Volume::from_array(data).unwrap();
        let c = [
            Candidate::new((1, 1, 1), 1.0),
            Candidate::new((8, 8, 8), 1.0),
            Candidate::new((2, 7, 3), 1.0),
        ];
        let p = FrontPropagator::from_config(&TraceConfig::default())
            .propagate(&v, &[(5, 5, 5)], &c)
            .unwrap();
        check_partition(&p);
        assert_eq!(p.stats.absorbed + p.stats.dropped + p.stats.unreached, 3);

        assert!(p.nodes.iter().all(|n| p.field[n.index] == n.cost));

        let settled = |i: Idx3d| p.state[i] == VoxelState::Settled;
        for (idx, s) in p.state.indexed_iter() {
            if *s != VoxelState::Settled || p.claims.is_node(idx) {
                continue;
            }
            let cv = p.field[idx];
            let pv = local_penalty(v[idx]);
            for u in v.neighbours6(idx).into_iter().filter(|u| settled(*u)) {
                assert!(cv <= p.field[u] + pv + 1e-3, "{idx:?} vs {u:?}");
            }
        }
    }
}
