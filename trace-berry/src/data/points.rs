//! 起始点 / 候选点文本文件.
//!
//! 每行 `x y z` (可选第四列为显著性), 以空白或逗号分隔. `#` 开头的行为注释.
//! 坐标会四舍五入并夹紧到 (未填充的) 体积范围内, 然后在 z 方向加上填充偏移.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::candidates::Candidate;
use crate::error::TraceResult;
use crate::Idx3d;

/// 一行文本解析后的结果.
enum Parsed {
    Skip,
    Point(Idx3d, Option<f32>),
}

/// 解析一行. `extent` 为未填充的体积形状 `(z, h, w)`.
fn parse_line(line: &str, line_no: usize, extent: Idx3d, pad: usize) -> Parsed {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Parsed::Skip;
    }
    let values: Result<Vec<f32>, _> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::parse::<f32>)
        .collect();
    let values = match values {
        Ok(v) if v.len() >= 3 && v.iter().all(|x| x.is_finite()) => v,
        _ => {
            log::warn!("line {}: malformed point {:?}, skipped", line_no, line);
            return Parsed::Skip;
        }
    };
    let (x, y, z) = (values[0], values[1], values[2]);
    if x < 0.0 || y < 0.0 || z < 0.0 {
        log::warn!("line {}: negative coordinate {:?}, discarded", line_no, line);
        return Parsed::Skip;
    }

    let (lz, lh, lw) = extent;
    let round = |v: f32, len: usize| ((v + 0.5) as usize).min(len.saturating_sub(1));
    let idx = (round(z, lz) + pad, round(y, lh), round(x, lw));
    Parsed::Point(idx, values.get(3).copied())
}

/// 从 `reader` 读取起始点 (种子). 格式错误或含负坐标的行会被跳过.
pub fn parse_start_points<R: BufRead>(
    reader: R,
    extent: Idx3d,
    pad: usize,
) -> TraceResult<Vec<Idx3d>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        if let Parsed::Point(idx, _) = parse_line(&line?, i + 1, extent, pad) {
            out.push(idx);
        }
    }
    Ok(out)
}

/// 从文件读取起始点.
pub fn read_start_points<P: AsRef<Path>>(
    path: P,
    extent: Idx3d,
    pad: usize,
) -> TraceResult<Vec<Idx3d>> {
    let file = File::open(path.as_ref())?;
    parse_start_points(BufReader::new(file), extent, pad)
}

/// 从 `reader` 读取候选点. 缺省的显著性为 1.0.
pub fn parse_candidates<R: BufRead>(
    reader: R,
    extent: Idx3d,
    pad: usize,
) -> TraceResult<Vec<Candidate>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        if let Parsed::Point(index, saliency) = parse_line(&line?, i + 1, extent, pad) {
            out.push(Candidate::new(index, saliency.unwrap_or(1.0)));
        }
    }
    Ok(out)
}

/// 从文件读取候选点.
pub fn read_candidates<P: AsRef<Path>>(
    path: P,
    extent: Idx3d,
    pad: usize,
) -> TraceResult<Vec<Candidate>> {
    let file = File::open(path.as_ref())?;
    parse_candidates(BufReader::new(file), extent, pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_points() {
        let text = "# soma\n10 20 3\n\n1.4, 2.6, 0\nfoo bar baz\n-1 2 3\n500 500 500\n";
        let seeds = parse_start_points(text.as_bytes(), (10, 30, 40), 1).unwrap();
        // x -> w, y -> h, z -> z + pad
        assert_eq!(seeds, vec![(4, 20, 10), (1, 3, 1), (10, 29, 39)]);
    }

    #[test]
    fn test_parse_candidates() {
        let text = "3 4 5 0.25\n6 7 8\n";
        let c = parse_candidates(text.as_bytes(), (20, 20, 20), 0).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].index, (5, 4, 3));
        assert_eq!(c[0].saliency, 0.25);
        assert_eq!(c[1].saliency, 1.0);
    }

    #[test]
    fn test_missing_file() {
        assert!(read_start_points("/definitely/not/here.txt", (1, 1, 1), 0).is_err());
    }
}
