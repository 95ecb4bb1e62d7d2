//! 三维滤波: 中值, 高斯平滑, 高斯拉普拉斯 (LoG).
//!
//! 所有滤波器在边界处采用 "复制边缘" 的方式取值, 输出形状与输入相同.

use ndarray::{Array3, ArrayView3, Zip};

use crate::Idx3d;

/// 沿某一维偏移 `d` 后夹紧到 `[0, len)`.
#[inline]
fn clamp_offset(i: usize, d: isize, len: usize) -> usize {
    (i as isize + d).clamp(0, len as isize - 1) as usize
}

/// 对 `(z, h, w)` 沿 `axis` 偏移 `d` 并夹紧.
#[inline]
fn shifted((z, h, w): Idx3d, axis: usize, d: isize, (lz, lh, lw): Idx3d) -> Idx3d {
    match axis {
        0 => (clamp_offset(z, d, lz), h, w),
        1 => (z, clamp_offset(h, d, lh), w),
        _ => (z, h, clamp_offset(w, d, lw)),
    }
}

/// 半径为 1 (3x3x3 窗口) 的中值滤波.
pub fn median3(data: ArrayView3<f32>) -> Array3<f32> {
    let shape = data.dim();
    let (lz, lh, lw) = shape;
    let mut out = Array3::<f32>::zeros(shape);

    let op = |(z, h, w): Idx3d, o: &mut f32| {
        let mut buf = [0f32; 27];
        let mut k = 0;
        for dz in -1..=1 {
            for dh in -1..=1 {
                for dw in -1..=1 {
                    buf[k] = data[(
                        clamp_offset(z, dz, lz),
                        clamp_offset(h, dh, lh),
                        clamp_offset(w, dw, lw),
                    )];
                    k += 1;
                }
            }
        }
        let (_, m, _) = buf.select_nth_unstable_by(13, |a, b| a.total_cmp(b));
        *o = *m;
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::indexed(&mut out).par_for_each(op);
        } else {
            Zip::indexed(&mut out).for_each(op);
        }
    }
    out
}

/// 归一化的一维高斯核, 半径为 `ceil(3 * sigma)`.
///
/// `sigma` 不为正时返回 `[1.0]`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    if !(sigma > 0.0) {
        return vec![1.0];
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|v| *v /= sum);
    kernel
}

/// 沿 `axis` 以奇数长度的 `kernel` 做一维卷积.
fn convolve_axis(data: ArrayView3<f32>, kernel: &[f32], axis: usize) -> Array3<f32> {
    let shape = data.dim();
    let radius = (kernel.len() / 2) as isize;
    let mut out = Array3::<f32>::zeros(shape);

    let op = |idx: Idx3d, o: &mut f32| {
        *o = kernel
            .iter()
            .enumerate()
            .map(|(k, c)| c * data[shifted(idx, axis, k as isize - radius, shape)])
            .sum();
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::indexed(&mut out).par_for_each(op);
        } else {
            Zip::indexed(&mut out).for_each(op);
        }
    }
    out
}

/// 可分离的三维高斯平滑.
pub fn gaussian_smooth(data: ArrayView3<f32>, sigma: f32) -> Array3<f32> {
    let kernel = gaussian_kernel(sigma);
    let a = convolve_axis(data, &kernel, 0);
    let b = convolve_axis(a.view(), &kernel, 1);
    convolve_axis(b.view(), &kernel, 2)
}

/// 离散拉普拉斯算子 (6 邻域二阶差分之和).
pub fn laplacian(data: ArrayView3<f32>) -> Array3<f32> {
    let shape = data.dim();
    let mut out = Array3::<f32>::zeros(shape);
    Zip::indexed(&mut out).for_each(|idx, o| {
        let c = data[idx];
        *o = (0..3)
            .map(|axis| {
                data[shifted(idx, axis, -1, shape)] + data[shifted(idx, axis, 1, shape)] - 2.0 * c
            })
            .sum();
    });
    out
}

/// 高斯拉普拉斯: 先以 `sigma` 平滑, 再求拉普拉斯.
#[inline]
pub fn laplacian_of_gaussian(data: ArrayView3<f32>, sigma: f32) -> Array3<f32> {
    laplacian(gaussian_smooth(data, sigma).view())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_gaussian_kernel() {
        let k = gaussian_kernel(2.0);
        assert_eq!(k.len(), 13);
        assert!(float_eq(k.iter().sum(), 1.0));
        assert!(float_eq(k[0], k[12]));
        assert!(k[6] > k[5]);
        assert_eq!(gaussian_kernel(0.0), vec![1.0]);
    }

    #[test]
    fn test_median_removes_spike() {
        let mut a = Array3::<f32>::from_elem((5, 5, 5), 0.5);
        a[(2, 2, 2)] = 100.0;
        let m = median3(a.view());
        assert!(float_eq(m[(2, 2, 2)], 0.5));
        assert!(float_eq(m[(0, 0, 0)], 0.5));
    }

    #[test]
    fn test_smooth_preserves_constant() {
        let a = Array3::<f32>::from_elem((4, 6, 5), 3.0);
        let s = gaussian_smooth(a.view(), 1.5);
        assert!(s.iter().all(|v| float_eq(*v, 3.0)));
        assert!(laplacian(a.view()).iter().all(|v| float_eq(*v, 0.0)));
    }

    #[test]
    fn test_log_blob_is_negative_at_center() {
        let mut a = Array3::<f32>::zeros((15, 15, 15));
        a[(7, 7, 7)] = 1.0;
        let log = laplacian_of_gaussian(a.view(), 2.0);
        assert!(log[(7, 7, 7)] < 0.0);
        assert!(log[(7, 7, 7)] < log[(7, 7, 10)]);
    }
}
