//! 对 `trace-berry::tracer` 的更一层封装. 负责输出路径和批处理清单.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use trace_berry::tracer::TraceJob;
use trace_berry::{TraceConfig, TraceResult};

/// 输出文件名后缀.
pub const OUTPUT_SUFFIX: &str = "_ANT";

/// 去掉体积文件扩展名 (`.nii.gz`, `.nii`, `.npy`) 后的文件名.
pub fn image_stem<P: AsRef<Path>>(image: P) -> String {
    let name = image
        .as_ref()
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    for ext in [".nii.gz", ".nii", ".npy"] {
        if let Some(stem) = name.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    name
}

/// 获取输出目录.
///
/// 1. 若环境变量 `$ANT_OUTPUT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `image` 所在目录.
pub fn output_dir_from_env_or<P: AsRef<Path>>(image: P) -> PathBuf {
    match env::var("ANT_OUTPUT_DIR") {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => image
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    }
}

/// 输出文件名前缀: `<dir>/<image stem>_ANT`.
pub fn output_stem_in<P: AsRef<Path>, Q: AsRef<Path>>(dir: P, image: Q) -> PathBuf {
    dir.as_ref()
        .join(format!("{}{OUTPUT_SUFFIX}", image_stem(image)))
}

/// 输出文件名前缀, 目录由 [`output_dir_from_env_or`] 决定.
#[inline]
pub fn output_stem<P: AsRef<Path>>(image: P) -> PathBuf {
    output_stem_in(output_dir_from_env_or(image.as_ref()), image)
}

/// 解析批处理清单.
///
/// 每行 `image seeds [soma]`, 以空白分隔, `#` 开头的行为注释.
/// 相对路径相对于 `base` 解析. 列数不对的行会被跳过.
pub fn parse_manifest(text: &str, base: &Path, config: &TraceConfig) -> Vec<TraceJob> {
    let resolve = |s: &str| {
        let p = Path::new(s);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base.join(p)
        }
    };

    let mut jobs = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split_whitespace().collect();
        let (image, seeds, soma) = match cols[..] {
            [image, seeds] => (image, seeds, None),
            [image, seeds, soma] => (image, seeds, Some(soma)),
            _ => {
                log::warn!("manifest line {}: expected 2 or 3 columns, skipped", i + 1);
                continue;
            }
        };
        let image = resolve(image);
        jobs.push(TraceJob {
            output_stem: output_stem(&image),
            seeds: resolve(seeds),
            soma: soma.map(resolve),
            candidates: None,
            config: config.clone(),
            image,
        });
    }
    jobs
}

/// 读取批处理清单文件.
pub fn read_manifest<P: AsRef<Path>>(path: P, config: &TraceConfig) -> TraceResult<Vec<TraceJob>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parse_manifest(&text, base, config))
}
