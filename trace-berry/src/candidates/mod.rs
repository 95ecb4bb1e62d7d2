//! 候选点: 追踪过程中需要被吸收进树的临时标记点.
//!
//! 候选点可以由 [`BlobDetector`] 在体积上检测, 也可以由外部 (例如打分分类器)
//! 给出并以 [`CandidateList`] 传入.

use crate::{Idx3d, Volume};

pub mod blob;

pub use blob::BlobDetector;

/// 一个候选点: 体素索引 (填充后) 与显著性.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Candidate {
    /// 体素索引 `(z, h, w)`.
    pub index: Idx3d,
    /// 显著性. 数值越大越 "像" 一个结构点. 仅用于排序和日志.
    pub saliency: f32,
}

impl Candidate {
    /// 构建候选点.
    #[inline]
    pub fn new(index: Idx3d, saliency: f32) -> Self {
        Self { index, saliency }
    }
}

/// 候选点来源.
pub trait CandidateSource {
    /// 在 `volume` 上生成候选点. 返回的索引必须位于 `volume` 内.
    fn candidates(&self, volume: &Volume) -> Vec<Candidate>;
}

/// 显式给出的候选点列表.
#[derive(Debug, Clone, Default)]
pub struct CandidateList {
    items: Vec<Candidate>,
}

impl CandidateList {
    /// 由候选点构建列表.
    #[inline]
    pub fn new(items: Vec<Candidate>) -> Self {
        Self { items }
    }

    /// 由裸索引构建列表, 显著性均为 1.
    pub fn from_indices<I: IntoIterator<Item = Idx3d>>(it: I) -> Self {
        Self::new(it.into_iter().map(|i| Candidate::new(i, 1.0)).collect())
    }

    /// 候选点个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<Vec<Candidate>> for CandidateList {
    fn from(items: Vec<Candidate>) -> Self {
        Self::new(items)
    }
}

impl CandidateSource for CandidateList {
    /// 越界的候选点会被丢弃.
    fn candidates(&self, volume: &Volume) -> Vec<Candidate> {
        let out: Vec<Candidate> = self
            .items
            .iter()
            .filter(|c| volume.check(&c.index))
            .copied()
            .collect();
        if out.len() < self.items.len() {
            log::warn!(
                "{} candidate(s) outside the volume were ignored",
                self.items.len() - out.len()
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_candidate_list_filters_out_of_bounds() {
        let v = Volume::from_array(Array3::zeros((4, 4, 4))).unwrap();
        let list = CandidateList::from_indices([(0, 0, 0), (3, 3, 3), (4, 0, 0)]);
        assert_eq!(list.len(), 3);
        let c = list.candidates(&v);
        assert_eq!(c.len(), 2);
        assert_eq!(c[1].index, (3, 3, 3));
    }
}
