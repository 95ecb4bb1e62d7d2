//! SWC 文件读写与节点半径估计.
//!
//! 每行一条记录 `id type x y z radius parent`, `#` 开头的行为注释.
//! 坐标使用 `x = w`, `y = h`, `z` 为去掉填充之后的切片序号.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use itertools::iproduct;

use crate::consts::{swc_type, RADIUS_INITIAL, RADIUS_ITERATIONS};
use crate::tree::{NodeArena, NodeId};
use crate::{pos_distance, round_pos, Pos3d, TraceError, TraceResult, Volume};

/// 一条 SWC 记录.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SwcRecord {
    /// 文件内编号, 从 1 开始.
    pub id: i64,
    /// 结构类型. 根为 1, 其余为 3.
    pub kind: u8,
    /// x 坐标 (列).
    pub x: f32,
    /// y 坐标 (行).
    pub y: f32,
    /// z 坐标 (切片, 已去掉填充).
    pub z: f32,
    /// 半径估计.
    pub radius: f32,
    /// 父节点编号, 根为 -1.
    pub parent: i64,
}

impl fmt::Display for SwcRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.3} {:.3} {:.3} {:.3} {}",
            self.id, self.kind, self.x, self.y, self.z, self.radius, self.parent
        )
    }
}

impl SwcRecord {
    /// 解析一行. `line` 为行号, 仅用于报错.
    fn parse(content: &str, line: usize) -> TraceResult<Self> {
        let malformed = || TraceError::MalformedSwc {
            line,
            content: content.to_string(),
        };
        let fields: Vec<&str> = content.split_whitespace().collect();
        let [id, kind, x, y, z, radius, parent] = fields[..] else {
            return Err(malformed());
        };
        let float = |s: &str| s.parse::<f32>().map_err(|_| malformed());
        let int = |s: &str| s.parse::<i64>().map_err(|_| malformed());
        Ok(Self {
            id: int(id)?,
            kind: kind.parse().map_err(|_| malformed())?,
            x: float(x)?,
            y: float(y)?,
            z: float(z)?,
            radius: float(radius)?,
            parent: int(parent)?,
        })
    }
}

/// 以 `pos` 为中心迭代估计管状结构的半径.
///
/// 每一轮在边长 `2 * max(2r, 5)` 的窗口内, 分别求距离小于 `r` 与不小于 `r`
/// 的体素均值, 再看壳层 `|d - r| < 0.7` 上的体素更接近哪一侧, 据此调整 `r`,
/// 单轮变化量不超过 1, 且 `r >= 1`.
///
/// # 注意
///
/// 窗口内某一侧没有体素时提前结束, 返回当前的 `r`.
pub fn estimate_radius(volume: &Volume, pos: Pos3d) -> f32 {
    let mut r = RADIUS_INITIAL;
    for _ in 0..RADIUS_ITERATIONS {
        let win = (2.0 * r).max(5.0);
        let steps = (2.0 * win).floor() as i64;
        let (mut inner, mut n_inner, mut outer, mut n_outer) = (0f32, 0usize, 0f32, 0usize);
        let mut shell = Vec::with_capacity(16 * (r * r) as usize);

        for (a, b, c) in iproduct!(0..=steps, 0..=steps, 0..=steps) {
            let m = (
                pos.0 - win + a as f32,
                pos.1 - win + b as f32,
                pos.2 - win + c as f32,
            );
            let Some(idx) = volume.check_i64(round_pos(m)) else {
                continue;
            };
            let val = volume[idx];
            let d = pos_distance(pos, m);
            if d < r {
                inner += val;
                n_inner += 1;
            } else {
                outer += val;
                n_outer += 1;
            }
            if (d - r).abs() < 0.7 {
                shell.push(val);
            }
        }

        if n_inner == 0 || n_outer == 0 || shell.is_empty() {
            break;
        }
        let (i1, i2) = (inner / n_inner as f32, outer / n_outer as f32);
        let dr = shell
            .iter()
            .map(|v| (v - i1).abs() - (v - i2).abs())
            .sum::<f32>()
            / shell.len() as f32;
        r = (r - dr.clamp(-1.0, 1.0)).max(1.0);
    }
    r
}

/// 第 `tree_id` 棵树的记录, 按节点编号顺序, 编号在树内重新从 1 开始.
///
/// 父节点不在本树中的节点 (不应出现) 挂到本树的根上.
pub fn records_for_tree(arena: &NodeArena, tree_id: u32, volume: &Volume) -> Vec<SwcRecord> {
    let pad = volume.pad() as f32;
    let local: Vec<NodeId> = arena.nodes_of_tree(tree_id).map(|n| n.id).collect();
    let local_id = |id: NodeId| local.binary_search(&id).ok().map(|k| k as i64 + 1);
    let root = arena
        .nodes_of_tree(tree_id)
        .find(|n| n.is_root())
        .and_then(|n| local_id(n.id))
        .unwrap_or(-1);

    arena
        .nodes_of_tree(tree_id)
        .enumerate()
        .map(|(k, n)| {
            let parent = match n.parent {
                None => -1,
                Some(p) => local_id(p).unwrap_or(root),
            };
            let (z, h, w) = n.position;
            SwcRecord {
                id: k as i64 + 1,
                kind: if parent == -1 {
                    swc_type::ROOT
                } else {
                    swc_type::TRACED
                },
                x: w,
                y: h,
                z: z - pad,
                radius: estimate_radius(volume, n.position),
                parent,
            }
        })
        .collect()
}

/// 写出记录, 带注释头.
pub fn write_swc<W: Write>(mut w: W, records: &[SwcRecord]) -> std::io::Result<()> {
    writeln!(w, "# trace-berry {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(w, "# id type x y z radius parent")?;
    for r in records {
        writeln!(w, "{r}")?;
    }
    w.flush()
}

/// 读取记录. 空行和注释行会被跳过, 其余格式错误的行返回
/// [`TraceError::MalformedSwc`].
pub fn read_swc<R: BufRead>(reader: R) -> TraceResult<Vec<SwcRecord>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let content = line.trim();
        if content.is_empty() || content.starts_with('#') {
            continue;
        }
        out.push(SwcRecord::parse(content, i + 1)?);
    }
    Ok(out)
}

/// 从文件读取记录.
pub fn read_swc_file<P: AsRef<Path>>(path: P) -> TraceResult<Vec<SwcRecord>> {
    read_swc(BufReader::new(File::open(path.as_ref())?))
}

/// 输出文件名. 只有一棵树时为 `<stem>.swc`, 否则为 `<stem>_<tree_id>.swc`.
pub fn swc_path(stem: &Path, tree_id: u32, n_trees: usize) -> PathBuf {
    let mut name = OsString::from(stem.as_os_str());
    if n_trees > 1 {
        name.push(format!("_{tree_id}.swc"));
    } else {
        name.push(".swc");
    }
    PathBuf::from(name)
}

/// 每棵树写一个 SWC 文件, 返回写出的文件路径.
///
/// 所有记录先写到同目录下的 `*.swc.tmp` 临时文件, 全部成功后才改名为
/// 最终文件名. 中途出错时删除已经写出的临时文件和已改名的文件,
/// 不会留下部分输出.
pub fn write_swc_files<P: AsRef<Path>>(
    stem: P,
    arena: &NodeArena,
    volume: &Volume,
) -> TraceResult<Vec<PathBuf>> {
    let stem = stem.as_ref();
    let trees = arena.tree_ids();
    let staged: Vec<(PathBuf, PathBuf, Vec<SwcRecord>)> = trees
        .iter()
        .map(|&tree_id| {
            let path = swc_path(stem, tree_id, trees.len());
            let tmp = path.with_extension("swc.tmp");
            (path, tmp, records_for_tree(arena, tree_id, volume))
        })
        .collect();

    let mut written: Vec<&Path> = Vec::with_capacity(staged.len());
    for (_, tmp, records) in staged.iter() {
        let res = File::create(tmp).and_then(|f| write_swc(BufWriter::new(f), records));
        if let Err(e) = res {
            // 可能已经创建了一半
            let _ = fs::remove_file(tmp);
            discard(&written);
            return Err(e.into());
        }
        written.push(tmp.as_path());
    }

    for (k, (path, tmp, _)) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(tmp, path) {
            let done: Vec<&Path> = staged[..k].iter().map(|(p, _, _)| p.as_path()).collect();
            discard(&done);
            discard(&written[k..]);
            return Err(e.into());
        }
    }

    for ((path, _, records), tree_id) in staged.iter().zip(trees.iter()) {
        log::info!(
            "tree {}: {} node(s) written to {}",
            tree_id,
            records.len(),
            path.display()
        );
    }
    Ok(staged.into_iter().map(|(path, _, _)| path).collect())
}

/// 尽力删除文件, 失败只记录日志.
fn discard(paths: &[&Path]) {
    for p in paths {
        if let Err(e) = fs::remove_file(p) {
            log::warn!("failed to remove {}: {}", p.display(), e);
        }
    }
}
