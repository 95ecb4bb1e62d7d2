/// 强度窗口, 包含下限和上限.
///
/// 用于将任意范围的原始强度线性映射到 `[0, 1]`. 该窗口是只读的.
/// 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug)]
pub struct IntensityWindow {
    lower: f32,
    upper: f32,
}

impl IntensityWindow {
    /// 构建强度窗口.
    ///
    /// `lower` 和 `upper` 必须有限且 `lower <= upper`, 否则返回 `None`.
    pub fn new(lower: f32, upper: f32) -> Option<IntensityWindow> {
        if lower.is_finite() && upper.is_finite() && lower <= upper {
            Some(Self { lower, upper })
        } else {
            None
        }
    }

    /// 以数据的最小值和最大值构建窗口. 忽略非有限值.
    ///
    /// 如果不存在有限值, 则返回 `None`.
    pub fn from_data<'a, I: IntoIterator<Item = &'a f32>>(it: I) -> Option<IntensityWindow> {
        let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
        for v in it.into_iter().filter(|v| v.is_finite()) {
            lo = lo.min(*v);
            hi = hi.max(*v);
        }
        Self::new(lo, hi)
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.lower
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.upper
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.upper - self.lower
    }

    /// 求在当前窗口设置下, `v` 对应的归一化强度 (0.0 <= value <= 1.0).
    ///
    /// 非有限值映射为 0. 窗宽为 0 时所有值映射为 0.
    pub fn eval(&self, v: f32) -> f32 {
        if !v.is_finite() || self.width() <= 0.0 {
            return 0.0;
        }
        ((v - self.lower) / self.width()).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::IntensityWindow;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_window_invalid_input() {
        assert!(IntensityWindow::new(1.0, 0.0).is_none());
        assert!(IntensityWindow::new(f32::NAN, 1.0).is_none());
        assert!(IntensityWindow::from_data(&[f32::NAN]).is_none());
    }

    #[test]
    fn test_window_generic() {
        let w = IntensityWindow::from_data(&[20.0, 10.0, f32::INFINITY, 30.0]).unwrap();
        assert!(float_eq(w.lower_bound(), 10.0));
        assert!(float_eq(w.upper_bound(), 30.0));

        assert!(float_eq(w.eval(10.0), 0.0));
        assert!(float_eq(w.eval(20.0), 0.5));
        assert!(float_eq(w.eval(30.0), 1.0));
        assert!(float_eq(w.eval(-5.0), 0.0));
        assert!(float_eq(w.eval(f32::NAN), 0.0));

        // 退化窗口
        let flat = IntensityWindow::new(3.0, 3.0).unwrap();
        assert!(float_eq(flat.eval(3.0), 0.0));
    }
}
