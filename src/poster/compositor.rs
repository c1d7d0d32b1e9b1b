//! # 图层合成模块
//!
//! ## 设计思路
//!
//! 合成器是流水线中唯一“降级而非中止”的阶段：任何转换或缩放失败都会返回未修改的底图，
//! 并记录 warn 日志，保证调用方始终有图可展示。其它阶段均为硬性中止。
//!
//! ## 实现思路
//!
//! - 覆盖层先转 RGBA，再缩放（不裁剪）到底图的精确尺寸，比例可能因此变形。
//! - 逐像素执行非预乘 alpha 的 “over” 混合，覆盖层在上。
//! - 每次调用（含降级）都计入 `invocations`。

use std::sync::atomic::{AtomicU64, Ordering};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

use super::canvas::resize_rgba;
use super::{PosterConfig, PosterError};

/// 双图层 alpha 合成器。
#[derive(Debug)]
pub struct Compositor {
    filter: FilterType,
    invocations: AtomicU64,
}

impl Compositor {
    pub fn new(filter: FilterType) -> Self {
        Self {
            filter,
            invocations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &PosterConfig) -> Self {
        Self::new(config.resize_filter)
    }

    /// 将 `overlay` 合成到 `base` 之上，输出尺寸始终等于 `base`。
    ///
    /// 失败时返回 `base` 的原样拷贝，不产生部分混合结果。
    pub fn composite(&self, base: &DynamicImage, overlay: &DynamicImage) -> DynamicImage {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        match self.try_composite(base, overlay) {
            Ok(combined) => DynamicImage::ImageRgba8(combined),
            Err(err) => {
                log::warn!("⚠️ 图层合成失败，回退为底图：{}", err);
                base.clone()
            }
        }
    }

    /// 自创建以来的合成调用次数。
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    fn try_composite(&self, base: &DynamicImage, overlay: &DynamicImage) -> Result<RgbaImage, PosterError> {
        let (width, height) = base.dimensions();
        if width == 0 || height == 0 {
            return Err(PosterError::Resize(format!("底图尺寸为空：{}x{}", width, height)));
        }

        let overlay = overlay.to_rgba8();
        let overlay = if overlay.dimensions() == (width, height) {
            overlay
        } else {
            log::debug!(
                "🧩 覆盖层缩放：{}x{} -> {}x{}",
                overlay.width(),
                overlay.height(),
                width,
                height
            );
            resize_rgba(&overlay, width, height, self.filter)?
        };

        let mut combined = base.to_rgba8();
        for (dst, src) in combined.pixels_mut().zip(overlay.pixels()) {
            *dst = alpha_over(*dst, *src);
        }

        Ok(combined)
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(FilterType::Lanczos3)
    }
}

/// 非预乘 alpha 的 Porter-Duff “over”：`src` 覆盖在 `dst` 之上。
pub(crate) fn alpha_over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let src_alpha = src[3] as f32 / 255.0;
    let dst_alpha = dst[3] as f32 / 255.0;
    let out_alpha = src_alpha + dst_alpha * (1.0 - src_alpha);

    if out_alpha <= f32::EPSILON {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for idx in 0..3 {
        let color = (src[idx] as f32 * src_alpha + dst[idx] as f32 * dst_alpha * (1.0 - src_alpha))
            / out_alpha;
        out[idx] = color.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;

    Rgba(out)
}
