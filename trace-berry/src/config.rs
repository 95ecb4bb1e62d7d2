//! 追踪参数.

use crate::consts::*;
use crate::error::{TraceError, TraceResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一次追踪所需的全部参数.
///
/// 该结构是透明的. 使用 [`TraceConfig::validate`] 检查组合后的参数是否合法,
/// [`crate::tracer::Tracer`] 在构建时会自动检查.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TraceConfig {
    /// 弹出代价超过该值后停止生长.
    pub cost_threshold: f32,

    /// 短于该长度 (严格小于) 的末端分叉会被剪掉.
    pub min_offshoot_length: f32,

    /// 平滑时的高斯核标准差.
    pub smooth_sigma: f32,

    /// z 方向填充层数.
    pub pad: usize,

    /// 回溯链的最大长度.
    pub max_trace_steps: usize,

    /// 是否按照新分支与父链的转角缩放回溯链上的代价.
    ///
    /// # 注意
    ///
    /// 打开后, 回溯链上已确定体素的累积代价会被原地乘以转角系数 (`<= 1`),
    /// 之后的回溯会沿着改写后的代价场进行.
    pub turn_penalty: bool,

    /// 候选点检测使用的 LoG 尺度.
    pub log_scales: Vec<f32>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            cost_threshold: DEFAULT_COST_THRESHOLD,
            min_offshoot_length: DEFAULT_MIN_OFFSHOOT_LENGTH,
            smooth_sigma: DEFAULT_SMOOTH_SIGMA,
            pad: DEFAULT_PAD,
            max_trace_steps: TRACE_BACK_MAX_STEPS,
            turn_penalty: false,
            log_scales: DEFAULT_LOG_SCALES.to_vec(),
        }
    }
}

impl TraceConfig {
    /// 设置代价阈值.
    #[inline]
    pub fn with_cost_threshold(mut self, cost_threshold: f32) -> Self {
        self.cost_threshold = cost_threshold;
        self
    }

    /// 设置最短分叉长度.
    #[inline]
    pub fn with_min_offshoot_length(mut self, len: f32) -> Self {
        self.min_offshoot_length = len;
        self
    }

    /// 设置 z 方向填充层数.
    #[inline]
    pub fn with_pad(mut self, pad: usize) -> Self {
        self.pad = pad;
        self
    }

    /// 打开/关闭转角代价. 见 [`TraceConfig::turn_penalty`].
    ///
    /// # 注意
    ///
    /// 打开时已确定体素的代价不再保证不变.
    #[inline]
    pub fn with_turn_penalty(mut self, on: bool) -> Self {
        self.turn_penalty = on;
        self
    }

    /// 检查参数.
    pub fn validate(&self) -> TraceResult<()> {
        if !(self.cost_threshold > 0.0) {
            return Err(TraceError::InvalidConfig("cost_threshold must be positive"));
        }
        if !(self.min_offshoot_length >= 0.0) {
            return Err(TraceError::InvalidConfig(
                "min_offshoot_length must be non-negative",
            ));
        }
        if !(self.smooth_sigma > 0.0) {
            return Err(TraceError::InvalidConfig("smooth_sigma must be positive"));
        }
        if self.max_trace_steps == 0 {
            return Err(TraceError::InvalidConfig("max_trace_steps must be positive"));
        }
        if self.log_scales.iter().any(|s| !(*s > 0.0)) {
            return Err(TraceError::InvalidConfig("log scales must be positive"));
        }
        Ok(())
    }

    /// 从 JSON 文件读取参数. 缺失的字段使用默认值.
    #[cfg(feature = "serde")]
    pub fn from_json_file<P: AsRef<std::path::Path>>(path: P) -> TraceResult<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::TraceConfig;

    #[test]
    fn test_default_config_is_valid() {
        let c = TraceConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.cost_threshold, 1000.0);
        assert_eq!(c.min_offshoot_length, 6.0);
        assert_eq!(c.pad, 1);
        assert_eq!(c.log_scales.len(), 6);
    }

    #[test]
    fn test_invalid_config() {
        assert!(TraceConfig::default()
            .with_cost_threshold(0.0)
            .validate()
            .is_err());
        assert!(TraceConfig::default()
            .with_cost_threshold(f32::NAN)
            .validate()
            .is_err());
        assert!(TraceConfig::default()
            .with_min_offshoot_length(-1.0)
            .validate()
            .is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_json() {
        let c: TraceConfig = serde_json::from_str(r#"{ "cost_threshold": 250.0 }"#).unwrap();
        assert_eq!(c.cost_threshold, 250.0);
        assert_eq!(c.min_offshoot_length, 6.0);
        assert!(!c.turn_penalty);
    }
}
