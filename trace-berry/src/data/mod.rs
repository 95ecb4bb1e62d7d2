use std::ops::Index;
use std::path::Path;

use ndarray::{s, Array3, ArrayView3, Axis};
use ndarray_npy::{read_npy, ReadNpyError};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::error::{TraceError, TraceResult};
use crate::{Idx3d, Idx3dI64};

pub mod filter;
pub mod points;
pub mod window;

pub use window::IntensityWindow;

/// 支持的体积文件格式.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum VolumeFormat {
    Npy,
    Nifti,
}

impl VolumeFormat {
    fn of(path: &Path) -> TraceResult<Self> {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if name.ends_with(".npy") {
            Ok(Self::Npy)
        } else if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Ok(Self::Nifti)
        } else {
            Err(TraceError::UnsupportedFormat(path.to_path_buf()))
        }
    }
}

/// 由 nii 文件头的 `dim` 字段得到 `(z, h, w)` 形状.
///
/// 维数必须为 3, 或者多出来的维度长度都为 1. 否则返回
/// [`TraceError::Dimensionality`].
fn nifti_shape(dim: [u16; 8]) -> TraceResult<Idx3d> {
    let ndim = dim[0] as usize;
    if !(3..=7).contains(&ndim) || dim[4..=ndim].iter().any(|&d| d != 1) {
        return Err(TraceError::Dimensionality(ndim));
    }
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = dim;
    Ok((z as usize, h as usize, w as usize))
}

/// 将 nii 文件读成 `(z, h, w)` 布局的三维数组.
fn read_nifti(path: &Path) -> TraceResult<Array3<f32>> {
    let obj = ReaderOptions::new().read_file(path)?;
    let ndim = obj.header().dim[0] as usize;
    let shape = nifti_shape(obj.header().dim)?;

    // [W, H, z] -> [z, H, W].
    // hint: nifti 数据在内存中以 W 变化最快, 因此原始缓冲区即为 (z, H, W) 的行主序.
    let data = obj.into_volume().into_ndarray::<f32>()?.into_raw_vec();
    Array3::from_shape_vec(shape, data).map_err(|_| TraceError::Dimensionality(ndim))
}

/// 读取 npy 文件. 依次尝试 `f32`, `u16`, `u8` 元素类型.
fn read_npy_f32(path: &Path) -> TraceResult<Array3<f32>> {
    match read_npy::<_, Array3<f32>>(path) {
        Ok(a) => Ok(a),
        Err(e @ ReadNpyError::Io(_)) => Err(e.into()),
        Err(first) => {
            if let Ok(a) = read_npy::<_, Array3<u16>>(path) {
                return Ok(a.mapv(f32::from));
            }
            if let Ok(a) = read_npy::<_, Array3<u8>>(path) {
                return Ok(a.mapv(f32::from));
            }
            Err(first.into())
        }
    }
}

/// 3D 荧光图像体积, 以 `(z, h, w)` 布局保存 `f32` 强度.
///
/// 在 z 方向上前后各有 `pad` 层复制得到的填充切片. 所有对外的体素索引都是
/// "填充后" 的索引, 输出 SWC 时再减去 `pad`.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
    pad: usize,
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl Volume {
    /// 直接以 `(z, h, w)` 布局的数组构建体积, 不做任何预处理, 也没有填充.
    ///
    /// 空数组返回 `Err(TraceError::EmptyVolume)`.
    pub fn from_array(data: Array3<f32>) -> TraceResult<Self> {
        if data.is_empty() {
            return Err(TraceError::EmptyVolume);
        }
        Ok(Self { data, pad: 0 })
    }

    /// 打开 `.npy`, `.nii` 或 `.nii.gz` 文件. 返回原始强度, 不做预处理.
    pub fn open<P: AsRef<Path>>(path: P) -> TraceResult<Self> {
        let path = path.as_ref();
        let data = match VolumeFormat::of(path)? {
            VolumeFormat::Npy => read_npy_f32(path)?,
            VolumeFormat::Nifti => read_nifti(path)?,
        };
        log::debug!("loaded volume {} with shape {:?}", path.display(), data.dim());
        Self::from_array(data)
    }

    /// 打开文件并执行完整的预处理: 强度归一化到 `[0, 1]`, 3x3x3 中值滤波,
    /// z 方向填充 `pad` 层.
    pub fn open_preprocessed<P: AsRef<Path>>(path: P, pad: usize) -> TraceResult<Self> {
        Ok(Self::open(path)?.preprocess(pad))
    }

    /// 完整预处理. 见 [`Volume::open_preprocessed`].
    pub fn preprocess(self, pad: usize) -> Self {
        self.rescaled().median_filtered().padded(pad)
    }

    /// 将强度按照最小值/最大值线性映射到 `[0, 1]`.
    pub fn rescaled(self) -> Self {
        let Self { mut data, pad } = self;
        match IntensityWindow::from_data(data.iter()) {
            Some(win) => data.mapv_inplace(|v| win.eval(v)),
            None => data.fill(0.0),
        }
        Self { data, pad }
    }

    /// 3x3x3 中值滤波.
    pub fn median_filtered(self) -> Self {
        let data = filter::median3(self.data.view());
        Self { data, ..self }
    }

    /// 在 z 方向前后各追加 `pad` 层, 复制首/尾切片. 填充量会累加.
    pub fn padded(self, pad: usize) -> Self {
        if pad == 0 {
            return self;
        }
        let (z, h, w) = self.data.dim();
        let mut data = Array3::<f32>::zeros((z + 2 * pad, h, w));
        data.slice_mut(s![pad..pad + z, .., ..]).assign(&self.data);
        let first = self.data.index_axis(Axis(0), 0);
        let last = self.data.index_axis(Axis(0), z - 1);
        for i in 0..pad {
            data.index_axis_mut(Axis(0), i).assign(&first);
            data.index_axis_mut(Axis(0), pad + z + i).assign(&last);
        }
        Self {
            data,
            pad: self.pad + pad,
        }
    }

    /// z 方向填充层数.
    #[inline]
    pub fn pad(&self) -> usize {
        self.pad
    }

    /// 获取数据形状大小 (含填充).
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取去掉填充后的形状大小.
    #[inline]
    pub fn unpadded_shape(&self) -> Idx3d {
        let (z, h, w) = self.shape();
        (z - 2 * self.pad, h, w)
    }

    /// 获取数据体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 检查索引是否合法.
    #[inline]
    pub fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 检查有符号索引是否合法. 合法时返回对应的无符号索引.
    #[inline]
    pub(crate) fn check_i64(&self, (z, h, w): Idx3dI64) -> Option<Idx3d> {
        if z < 0 || h < 0 || w < 0 {
            return None;
        }
        let idx = (z as usize, h as usize, w as usize);
        self.check(&idx).then_some(idx)
    }

    /// 获取 `pos` 的 6 邻域坐标.
    ///
    /// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
    pub fn neighbours6(&self, (z, h, w): Idx3d) -> Vec<Idx3d> {
        self.check_collect([
            (z.wrapping_sub(1), h, w),
            (z.saturating_add(1), h, w),
            (z, h.wrapping_sub(1), w),
            (z, h.saturating_add(1), w),
            (z, h, w.wrapping_sub(1)),
            (z, h, w.saturating_add(1)),
        ])
    }

    /// 收集不越界的索引.
    #[inline]
    fn check_collect<B: FromIterator<Idx3d>, const N: usize>(&self, data: [Idx3d; N]) -> B {
        data.into_iter().filter(|p| self.check(p)).collect()
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 以 `sigma` 高斯平滑后的强度数组.
    #[inline]
    pub fn smoothed(&self, sigma: f32) -> Array3<f32> {
        filter::gaussian_smooth(self.data.view(), sigma)
    }
}

/// 胞体 (soma) 掩膜. 非零体素属于胞体. 形状与未填充的体积一致.
#[derive(Debug, Clone)]
pub struct SomaMask {
    data: Array3<u8>,
}

impl Index<Idx3d> for SomaMask {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl SomaMask {
    /// 直接以 `(z, h, w)` 布局的数组构建掩膜.
    #[inline]
    pub fn from_array(data: Array3<u8>) -> Self {
        Self { data }
    }

    /// 打开 `.npy`, `.nii` 或 `.nii.gz` 文件. 任意非零值均视为胞体.
    pub fn open<P: AsRef<Path>>(path: P) -> TraceResult<Self> {
        let path = path.as_ref();
        let data = match VolumeFormat::of(path)? {
            VolumeFormat::Npy => read_npy_f32(path)?.mapv(|v| u8::from(v != 0.0)),
            VolumeFormat::Nifti => read_nifti(path)?.mapv(|v| u8::from(v != 0.0)),
        };
        Ok(Self { data })
    }

    /// 获取数据形状大小.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 检查掩膜是否与 `volume` (去掉填充后) 形状一致.
    pub fn check_against(&self, volume: &Volume) -> TraceResult<()> {
        let expected = volume.unpadded_shape();
        if self.shape() == expected {
            Ok(())
        } else {
            Err(TraceError::ShapeMismatch(expected, self.shape()))
        }
    }

    /// 填充后的索引 `idx` 是否落在胞体内. 越界时返回 `false`.
    pub fn contains(&self, (z, h, w): Idx3d, pad: usize) -> bool {
        let Some(z) = z.checked_sub(pad) else {
            return false;
        };
        self.data.get((z, h, w)).is_some_and(|v| *v != 0)
    }

    /// 胞体体素个数.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v != 0).count()
    }
}
