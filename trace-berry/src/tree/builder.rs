//! 树的构建: 种植种子, 从候选标记梯度下降回溯到已有的树, 并把回溯链变成节点.

use super::{ClaimMap, NodeArena, NodeId};
use crate::consts::{GRADIENT_EPS, MAXDERV, TURN_LOOKBACK};
use crate::field::CostField;
use crate::{idx_to_pos, round_pos, Idx3d, Idx3dI64, TraceConfig};

/// 一次回溯的结果.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceOutcome {
    /// 到达了已有树的节点 `anchor`. `chain` 从起点开始, 以 `anchor` 所在体素结束,
    /// 可能包含重复体素.
    Connected {
        /// 被连接的已有节点.
        anchor: NodeId,
        /// 回溯经过的体素.
        chain: Vec<Idx3d>,
    },
    /// 超过最大步数仍未找到树.
    Exhausted,
    /// 回溯走出了体积.
    Escaped,
}

/// 链接入树后的统计.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attachment {
    /// 新建的节点, 按创建顺序 (从靠近已有树的一端开始).
    pub nodes: Vec<NodeId>,
    /// 沿途吸收的候选标记数 (包括起点).
    pub absorbed: usize,
}

/// 树的构建器. 自身不持有任何体积数据, 所有状态都由调用方传入.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    max_steps: usize,
    turn_penalty: bool,
}

impl TreeBuilder {
    /// 构建. `max_steps` 为回溯链的最大长度.
    #[inline]
    pub fn new(max_steps: usize, turn_penalty: bool) -> Self {
        Self {
            max_steps,
            turn_penalty,
        }
    }

    /// 使用配置中的参数.
    #[inline]
    pub fn from_config(config: &TraceConfig) -> Self {
        Self::new(config.max_trace_steps, config.turn_penalty)
    }

    /// 在 `index` 处种植第 `tree_id` 棵树的根.
    ///
    /// 若该体素原本是候选标记, 标记会被替换.
    pub fn plant_seed(
        &self,
        arena: &mut NodeArena,
        claims: &mut ClaimMap,
        index: Idx3d,
        tree_id: u32,
    ) -> NodeId {
        let id = arena.push_root(index, tree_id);
        claims.claim(index, id);
        id
    }

    /// 从 `from` 开始沿代价场的负梯度方向回溯, 直到碰到已有树的节点.
    ///
    /// 每一步以当前浮点位置四舍五入后的体素为中心, 用中心差分估计梯度,
    /// 越界的一侧取 [`MAXDERV`]. 仅当梯度范数平方大于 [`GRADIENT_EPS`] 时移动:
    /// 归一化后与上一步方向相加再归一化, 沿反方向走半个体素.
    pub fn trace_back(&self, field: &CostField, claims: &ClaimMap, from: Idx3d) -> TraceOutcome {
        let mut chain = vec![from];
        if let Some(anchor) = claims.node_at(from) {
            return TraceOutcome::Connected { anchor, chain };
        }

        let (z, h, w) = idx_to_pos(&from);
        let mut p = [z, h, w];
        let mut dold = [0f32; 3];

        loop {
            let mut d = [0f32; 3];
            for (axis, di) in d.iter_mut().enumerate() {
                let mut fwd = p;
                fwd[axis] += 1.0;
                let mut bwd = p;
                bwd[axis] -= 1.0;
                *di = sample(field, fwd) - sample(field, bwd);
            }

            let norm2: f32 = d.iter().map(|v| v * v).sum();
            if norm2 > GRADIENT_EPS {
                normalize(&mut d);
                let mut sum = [d[0] + dold[0], d[1] + dold[1], d[2] + dold[2]];
                if normalize(&mut sum) {
                    d = sum;
                }
                dold = d;
                for (pi, di) in p.iter_mut().zip(d.iter()) {
                    *pi -= 0.5 * di;
                }
            }

            let Some(n) = to_index(field, p) else {
                log::debug!("trace-back from {:?} left the volume", from);
                return TraceOutcome::Escaped;
            };
            chain.push(n);
            if let Some(anchor) = claims.node_at(n) {
                return TraceOutcome::Connected { anchor, chain };
            }
            if chain.len() > self.max_steps {
                return TraceOutcome::Exhausted;
            }
        }
    }

    /// 将回溯链接到 `anchor` 上.
    ///
    /// 从靠近 `anchor` 的一端开始遍历 `chain`: 已被节点认领的体素跳过,
    /// 其余 (空闲或标记) 体素依次创建节点, 父节点为上一个新节点.
    /// 新节点的代价为该体素当前的累积代价, 打开转角代价时再乘以转角系数.
    ///
    /// # 注意
    ///
    /// 缩放后的代价会写回 `field`, 即使该体素已经确定.
    pub fn attach(
        &self,
        arena: &mut NodeArena,
        field: &mut CostField,
        claims: &mut ClaimMap,
        anchor: NodeId,
        chain: &[Idx3d],
    ) -> Attachment {
        let factor = match (self.turn_penalty, chain.first()) {
            (true, Some(&tip)) => turn_factor(arena, anchor, tip),
            _ => 1.0,
        };

        let mut out = Attachment::default();
        let mut parent = anchor;
        for &idx in chain.iter().rev() {
            if claims.is_node(idx) {
                continue;
            }
            let cost = field[idx] * factor;
            field[idx] = cost;
            let id = arena.push_child(parent, idx, cost);
            if claims.claim(idx, id) {
                out.absorbed += 1;
                log::debug!(
                    "node {} at {:?} with parent {}, cost {:.3}, {} marker(s) remaining",
                    id,
                    idx,
                    parent,
                    cost,
                    claims.remaining_markers()
                );
            }
            out.nodes.push(id);
            parent = id;
        }
        out
    }
}

/// 四舍五入后取代价, 越界返回 `MAXDERV`.
#[inline]
fn sample(field: &CostField, [z, h, w]: [f32; 3]) -> f32 {
    to_index(field, [z, h, w]).map_or(MAXDERV, |idx| field[idx])
}

#[inline]
fn to_index(field: &CostField, [z, h, w]: [f32; 3]) -> Option<Idx3d> {
    let (z, h, w): Idx3dI64 = round_pos((z, h, w));
    if z < 0 || h < 0 || w < 0 {
        return None;
    }
    let idx = (z as usize, h as usize, w as usize);
    field.check(&idx).then_some(idx)
}

/// 原地归一化. 零向量保持不变并返回 `false`.
#[inline]
fn normalize(v: &mut [f32; 3]) -> bool {
    let n = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if n > 0.0 && n.is_finite() {
        v.iter_mut().for_each(|x| *x /= n);
        true
    } else {
        false
    }
}

/// 新分支相对于 `anchor` 所在父链的转角系数.
///
/// 新分支方向为 `tip -> anchor`, 父链方向为从 `anchor` 指向第一个距离超过
/// [`TURN_LOOKBACK`] 的祖先. 设两者夹角余弦为 `c`: `c <= 0` 时为 1,
/// `c <= 0.98` 时为 `1 - c`, 否则为 0. 找不到足够远的祖先时为 0.
fn turn_factor(arena: &NodeArena, anchor: NodeId, tip: Idx3d) -> f32 {
    let base = idx_to_pos(&arena[anchor].index);
    let t = idx_to_pos(&tip);
    let mut d1 = [base.0 - t.0, base.1 - t.1, base.2 - t.2];
    if !normalize(&mut d1) {
        return 1.0;
    }

    let mut cur = Some(anchor);
    while let Some(id) = cur {
        let p = idx_to_pos(&arena[id].index);
        let mut d2 = [p.0 - base.0, p.1 - base.1, p.2 - base.2];
        if crate::pos_distance(p, base) > TURN_LOOKBACK && normalize(&mut d2) {
            let c: f32 = d1.iter().zip(d2.iter()).map(|(a, b)| a * b).sum();
            return if c <= 0.0 {
                1.0
            } else if c <= 0.98 {
                1.0 - c
            } else {
                0.0
            };
        }
        cur = arena[id].parent;
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::MAXVAL;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    /// 沿 w 轴的 V 形代价: cost = |w - w0|.
    fn vee(shape: Idx3d, w0: usize) -> CostField {
        let mut f = CostField::initialize(shape, &[]);
        for z in 0..shape.0 {
            for h in 0..shape.1 {
                for w in 0..shape.2 {
                    f[(z, h, w)] = (w as f32 - w0 as f32).abs();
                }
            }
        }
        f
    }

    #[test]
    fn test_trace_back_follows_gradient() {
        let field = vee((5, 5, 12), 2);
        let mut arena = NodeArena::new();
        let mut claims = ClaimMap::new((5, 5, 12));
        let b = TreeBuilder::new(500, false);
        let root = b.plant_seed(&mut arena, &mut claims, (2, 2, 2), 1);

        match b.trace_back(&field, &claims, (2, 2, 10)) {
            TraceOutcome::Connected { anchor, chain } => {
                assert_eq!(anchor, root);
                assert_eq!(chain.first(), Some(&(2, 2, 10)));
                assert_eq!(chain.last(), Some(&(2, 2, 2)));
                assert!(chain.iter().all(|&(z, h, _)| z == 2 && h == 2));
                // 每步半个体素
                assert_eq!(chain.len(), 17);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_trace_back_flat_field_is_exhausted() {
        let field = CostField::initialize((6, 6, 6), &[]);
        let mut arena = NodeArena::new();
        let mut claims = ClaimMap::new((6, 6, 6));
        let b = TreeBuilder::new(500, false);
        b.plant_seed(&mut arena, &mut claims, (0, 0, 0), 1);
        assert!(claims.place_marker((3, 3, 3)));
        assert_eq!(field[(3, 3, 3)], MAXVAL);
        assert_eq!(
            b.trace_back(&field, &claims, (3, 3, 3)),
            TraceOutcome::Exhausted
        );
    }

    #[test]
    fn test_trace_back_can_escape() {
        // 代价沿 w 递增且处处高于越界替代值, 回溯会从 w = 0 一侧走出体积.
        let mut field = CostField::initialize((3, 3, 8), &[]);
        for z in 0..3 {
            for h in 0..3 {
                for w in 0..8 {
                    field[(z, h, w)] = 2.0 * MAXDERV + 1000.0 * w as f32;
                }
            }
        }
        let mut arena = NodeArena::new();
        let mut claims = ClaimMap::new((3, 3, 8));
        let b = TreeBuilder::new(500, false);
        b.plant_seed(&mut arena, &mut claims, (0, 0, 7), 1);
        assert_eq!(
            b.trace_back(&field, &claims, (1, 1, 3)),
            TraceOutcome::Escaped
        );
    }

    #[test]
    fn test_attach_creates_chain() {
        let mut field = vee((3, 3, 10), 2);
        let mut arena = NodeArena::new();
        let mut claims = ClaimMap::new((3, 3, 10));
        let b = TreeBuilder::new(500, false);
        let root = b.plant_seed(&mut arena, &mut claims, (1, 1, 2), 1);
        claims.place_marker((1, 1, 7));
        claims.place_marker((1, 1, 5));

        let TraceOutcome::Connected { anchor, chain } = b.trace_back(&field, &claims, (1, 1, 7))
        else {
            panic!("trace-back failed");
        };
        let att = b.attach(&mut arena, &mut field, &mut claims, anchor, &chain);

        // 体素 3..=7 各一个节点.
        assert_eq!(att.nodes.len(), 5);
        assert_eq!(att.absorbed, 2);
        assert_eq!(claims.remaining_markers(), 0);
        assert_eq!(arena[att.nodes[0]].parent, Some(root));
        assert_eq!(arena[att.nodes[0]].index, (1, 1, 3));
        assert_eq!(arena[att.nodes[4]].index, (1, 1, 7));
        assert!(float_eq(arena[att.nodes[4]].cost, 5.0));
        assert!(att.nodes.windows(2).all(|p| arena[p[1]].parent == Some(p[0])));
        assert!(arena.is_consistent());
    }

    #[test]
    fn test_turn_penalty_rewrites_chain_costs() {
        let mut field = vee((3, 3, 10), 1);
        let mut arena = NodeArena::new();
        let mut claims = ClaimMap::new((3, 3, 10));
        let b = TreeBuilder::new(500, true);
        let root = b.plant_seed(&mut arena, &mut claims, (1, 1, 1), 1);
        let chain = [(1, 1, 5), (1, 1, 4), (1, 1, 3), (1, 1, 2), (1, 1, 1)];

        // 父链太短, 系数为 0: 节点代价和代价场都被改写.
        let att = b.attach(&mut arena, &mut field, &mut claims, root, &chain);
        assert_eq!(att.nodes.len(), 4);
        for id in att.nodes {
            let n = &arena[id];
            assert_eq!(n.cost, 0.0);
            assert_eq!(field[n.index], 0.0);
        }
        assert!(float_eq(field[(1, 1, 6)], 5.0));
    }

    #[test]
    fn test_turn_factor() {
        let mut arena = NodeArena::new();
        let mut prev = arena.push_root((0, 0, 0), 1);
        for w in 1..=10 {
            prev = arena.push_child(prev, (0, 0, w), w as f32);
        }
        // 沿原方向继续生长: 系数 0
        assert!(float_eq(turn_factor(&arena, prev, (0, 0, 12)), 0.0));
        // 垂直: 系数 1
        assert!(float_eq(turn_factor(&arena, prev, (0, 4, 10)), 1.0));
        // 折返: 系数 1
        assert!(float_eq(turn_factor(&arena, prev, (0, 0, 4)), 1.0));
        // 父链太短: 系数 0
        let short = NodeId::new(3).unwrap();
        assert!(float_eq(turn_factor(&arena, short, (0, 3, 2)), 0.0));
        // 重合: 不缩放
        assert!(float_eq(turn_factor(&arena, prev, (0, 0, 10)), 1.0));
    }
}
