//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Pos3d};

pub use crate::data::points::{read_candidates, read_start_points};
pub use crate::data::{IntensityWindow, SomaMask, Volume};

pub use crate::candidates::{BlobDetector, Candidate, CandidateList, CandidateSource};
pub use crate::field::CostField;
pub use crate::propagate::{FrontPropagator, Propagation, PropagationStats};
pub use crate::tree::{NodeArena, NodeId, TreeNode, TreePruner, TreeSmoother};

pub use crate::swc::{read_swc_file, write_swc_files, SwcRecord};
pub use crate::tracer::{TraceJob, TraceOutput, Tracer};

#[cfg(feature = "rayon")]
pub use crate::tracer::trace_batch;

pub use crate::config::TraceConfig;
pub use crate::consts::{DEFAULT_COST_THRESHOLD, DEFAULT_MIN_OFFSHOOT_LENGTH, MAXVAL};
pub use crate::error::{TraceError, TraceResult};
