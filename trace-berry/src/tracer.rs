//! 完整的追踪流程.
//!
//! [`Tracer`] 持有一次追踪所需的全部状态: 体积, 种子, 候选点, 胞体掩膜.
//! 代价场, 堆, 归属表和节点池都在 [`Tracer::run`] 内部创建, 互不共享,
//! 因此多个 `Tracer` 可以放心地并行运行.
//!
//! 流程: 前沿传播 -> 平滑 -> 剪枝 -> 平滑 -> (可选) 胞体清理.

use std::path::{Path, PathBuf};

use crate::candidates::{BlobDetector, Candidate, CandidateSource};
use crate::data::points;
use crate::propagate::{FrontPropagator, Propagation, PropagationStats};
use crate::tree::{remove_intra_soma_nodes, NodeArena, TreePruner, TreeSmoother};
use crate::{swc, Idx3d, SomaMask, TraceConfig, TraceError, TraceResult, Volume};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 追踪结果.
#[derive(Debug, Clone)]
pub struct TraceOutput {
    /// 剪枝平滑后的树.
    pub nodes: NodeArena,
    /// 传播统计.
    pub stats: PropagationStats,
}

/// 一次追踪的上下文.
#[derive(Debug, Clone)]
pub struct Tracer {
    config: TraceConfig,
    volume: Volume,
    seeds: Vec<Idx3d>,
    candidates: Option<Vec<Candidate>>,
    soma: Option<SomaMask>,
}

impl Tracer {
    /// 构建. `volume` 应已经预处理, `seeds` 为填充后的索引.
    ///
    /// 参数不合法, 或者没有种子时返回错误.
    pub fn new(config: TraceConfig, volume: Volume, seeds: Vec<Idx3d>) -> TraceResult<Self> {
        config.validate()?;
        if seeds.is_empty() {
            return Err(TraceError::EmptySeeds);
        }
        Ok(Self {
            config,
            volume,
            seeds,
            candidates: None,
            soma: None,
        })
    }

    /// 使用给定的候选点. 不调用时在体积上以 [`BlobDetector`] 检测.
    pub fn with_candidates(mut self, candidates: Vec<Candidate>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    /// 使用 `source` 生成候选点.
    pub fn with_candidate_source<S: CandidateSource + ?Sized>(self, source: &S) -> Self {
        let candidates = source.candidates(&self.volume);
        self.with_candidates(candidates)
    }

    /// 追踪结束后清理落在胞体内的节点. 掩膜形状需与未填充的体积一致.
    pub fn with_soma(mut self, soma: SomaMask) -> TraceResult<Self> {
        soma.check_against(&self.volume)?;
        self.soma = Some(soma);
        Ok(self)
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// 体积.
    #[inline]
    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    /// 种子.
    #[inline]
    pub fn seeds(&self) -> &[Idx3d] {
        &self.seeds
    }

    /// 只做前沿传播, 返回未经后处理的树.
    pub fn propagate(&self) -> TraceResult<Propagation> {
        let propagator = FrontPropagator::from_config(&self.config);
        match &self.candidates {
            Some(c) => propagator.propagate(&self.volume, &self.seeds, c),
            None => {
                let c = BlobDetector::from_config(&self.config).candidates(&self.volume);
                propagator.propagate(&self.volume, &self.seeds, &c)
            }
        }
    }

    /// 完整流程.
    pub fn run(&self) -> TraceResult<TraceOutput> {
        let Propagation {
            nodes: mut arena,
            stats,
            ..
        } = self.propagate()?;

        let smoother = TreeSmoother::from_config(&self.config);
        let svol = self.volume.smoothed(self.config.smooth_sigma);
        smoother.smooth_with(&mut arena, svol.view());
        let mut arena = TreePruner::from_config(&self.config).prune(arena);
        smoother.smooth_with(&mut arena, svol.view());

        if let Some(soma) = &self.soma {
            arena = remove_intra_soma_nodes(arena, soma, self.volume.pad());
        }
        log::info!(
            "traced {} node(s) in {} tree(s)",
            arena.len(),
            arena.tree_ids().len()
        );
        Ok(TraceOutput {
            nodes: arena,
            stats,
        })
    }
}

/// 一个基于文件的追踪任务.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceJob {
    /// 体积文件 (`.npy`, `.nii`, `.nii.gz`).
    pub image: PathBuf,
    /// 起始点文本文件.
    pub seeds: PathBuf,
    /// 输出文件名前缀 (不含 `.swc`).
    pub output_stem: PathBuf,
    /// 候选点文本文件. 缺省时在体积上检测.
    pub candidates: Option<PathBuf>,
    /// 胞体掩膜文件.
    pub soma: Option<PathBuf>,
    /// 参数.
    pub config: TraceConfig,
}

impl TraceJob {
    /// 以默认参数构建.
    pub fn new<P: AsRef<Path>>(image: P, seeds: P, output_stem: P) -> Self {
        Self {
            image: image.as_ref().to_path_buf(),
            seeds: seeds.as_ref().to_path_buf(),
            output_stem: output_stem.as_ref().to_path_buf(),
            candidates: None,
            soma: None,
            config: TraceConfig::default(),
        }
    }

    /// 读入全部输入, 构建 [`Tracer`].
    pub fn load(&self) -> TraceResult<Tracer> {
        self.config.validate()?;
        let pad = self.config.pad;
        let volume = Volume::open_preprocessed(&self.image, pad)?;
        let extent = volume.unpadded_shape();
        let seeds = points::read_start_points(&self.seeds, extent, pad)?;
        log::info!(
            "{}: volume {:?}, {} seed(s)",
            self.image.display(),
            extent,
            seeds.len()
        );

        let mut tracer = Tracer::new(self.config.clone(), volume, seeds)?;
        if let Some(path) = &self.candidates {
            tracer = tracer.with_candidates(points::read_candidates(path, extent, pad)?);
        }
        if let Some(path) = &self.soma {
            tracer = tracer.with_soma(SomaMask::open(path)?)?;
        }
        Ok(tracer)
    }

    /// 运行并写出 SWC 文件, 返回写出的文件.
    pub fn run(&self) -> TraceResult<Vec<PathBuf>> {
        let tracer = self.load()?;
        let out = tracer.run()?;
        swc::write_swc_files(&self.output_stem, &out.nodes, tracer.volume())
    }
}

/// 借助 `rayon` 并行运行多个任务. 结果与 `jobs` 一一对应.
#[cfg(feature = "rayon")]
pub fn trace_batch(jobs: &[TraceJob]) -> Vec<TraceResult<Vec<PathBuf>>> {
    jobs.par_iter()
        .map(|job| {
            let res = job.run();
            if let Err(e) = &res {
                log::error!("{}: {}", job.image.display(), e);
            }
            res
        })
        .collect()
}
