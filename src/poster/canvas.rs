//! # 画布规整模块
//!
//! ## 设计思路
//!
//! 将抠图后的主体放入固定尺寸的透明画布，并以“编码后体积”作为硬性上限。
//! 体积校验直接针对内存中的 PNG 编码结果，而不是落盘文件，避免多会话共享同名文件的竞争。
//!
//! ## 实现思路
//!
//! 1. 按比例缩小主体，使宽高均不超过画布（只缩不放）
//! 2. 分配全透明 RGBA 画布，将主体居中贴入（覆盖而非混合）
//! 3. PNG 编码并度量字节数，超限直接失败，不做重压缩或重试

use fast_image_resize as fr;
use image::imageops::FilterType;
use image::{ImageBuffer, ImageFormat, Rgba, RgbaImage, imageops};
use std::io::Cursor;

use super::{CanvasSize, PosterConfig, PosterError, SubjectCanvas};

/// 主体画布规整器。
#[derive(Debug, Clone, Copy)]
pub struct CanvasNormalizer {
    canvas_size: CanvasSize,
    size_limit: u64,
    filter: FilterType,
}

impl CanvasNormalizer {
    pub fn new(canvas_size: CanvasSize, size_limit: u64, filter: FilterType) -> Self {
        Self {
            canvas_size,
            size_limit,
            filter,
        }
    }

    pub fn from_config(config: &PosterConfig) -> Self {
        Self::new(config.canvas_size, config.encoded_size_limit, config.resize_filter)
    }

    pub fn canvas_size(&self) -> CanvasSize {
        self.canvas_size
    }

    /// 执行缩放 → 居中 → 编码校验。
    ///
    /// # 示例
    /// ```rust
    /// use image::RgbaImage;
    /// use poster_studio::poster::{CanvasNormalizer, CanvasSize};
    ///
    /// let normalizer = CanvasNormalizer::new(
    ///     CanvasSize::new(64, 64),
    ///     4 * 1024 * 1024,
    ///     image::imageops::FilterType::Lanczos3,
    /// );
    /// let canvas = normalizer.normalize(RgbaImage::new(128, 32))?;
    /// assert_eq!(canvas.dimensions(), (64, 64));
    /// # Ok::<(), poster_studio::poster::PosterError>(())
    /// ```
    pub fn normalize(&self, subject: RgbaImage) -> Result<SubjectCanvas, PosterError> {
        let CanvasSize { width, height } = self.canvas_size;
        let (src_width, src_height) = subject.dimensions();

        if src_width == 0 || src_height == 0 {
            return Err(PosterError::BackgroundRemoval(format!(
                "主体尺寸为空：{}x{}",
                src_width, src_height
            )));
        }

        let (fit_width, fit_height) = fit_within(src_width, src_height, self.canvas_size);
        let resized = if (fit_width, fit_height) == (src_width, src_height) {
            subject
        } else {
            log::info!(
                "🧩 主体缩放：{}x{} -> {}x{}（filter={:?}）",
                src_width,
                src_height,
                fit_width,
                fit_height,
                self.filter
            );
            match resize_rgba(&subject, fit_width, fit_height, self.filter) {
                Ok(resized) => resized,
                Err(err) => {
                    log::warn!("⚠️ fast_image_resize 缩放失败，回退 image::resize：{}", err);
                    imageops::resize(&subject, fit_width, fit_height, self.filter)
                }
            }
        };

        let mut canvas: RgbaImage = ImageBuffer::from_pixel(width, height, Rgba([255, 255, 255, 0]));
        let offset_x = (width - fit_width) / 2;
        let offset_y = (height - fit_height) / 2;
        imageops::replace(&mut canvas, &resized, offset_x as i64, offset_y as i64);

        let mut encoded = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(|e| PosterError::Encode(e.to_string()))?;

        let encoded_len = encoded.len() as u64;
        if encoded_len > self.size_limit {
            return Err(PosterError::OversizeImage {
                size: encoded_len,
                limit: self.size_limit,
            });
        }

        log::info!(
            "🖼️ 主体画布就绪 - 画布: {}x{} 偏移: ({}, {}) 编码体积: {} bytes",
            width,
            height,
            offset_x,
            offset_y,
            encoded_len
        );

        Ok(SubjectCanvas::new(canvas, encoded))
    }
}

/// 计算等比缩小后的尺寸，宽高均不超过 `bounds`；原图已在范围内时原样返回。
pub fn fit_within(width: u32, height: u32, bounds: CanvasSize) -> (u32, u32) {
    if width <= bounds.width && height <= bounds.height {
        return (width, height);
    }

    let scale = (bounds.width as f64 / width as f64).min(bounds.height as f64 / height as f64);
    let fit_width = ((width as f64 * scale).round() as u32).clamp(1, bounds.width);
    let fit_height = ((height as f64 * scale).round() as u32).clamp(1, bounds.height);

    (fit_width, fit_height)
}

/// 使用 fast_image_resize 将 RGBA 图像缩放到精确尺寸（不保持比例）。
pub(crate) fn resize_rgba(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    filter: FilterType,
) -> Result<RgbaImage, PosterError> {
    let (src_width, src_height) = image.dimensions();
    if src_width == 0 || src_height == 0 || target_width == 0 || target_height == 0 {
        return Err(PosterError::Resize(format!(
            "尺寸为空：{}x{} -> {}x{}",
            src_width, src_height, target_width, target_height
        )));
    }

    let src_image = fr::images::Image::from_vec_u8(
        src_width,
        src_height,
        image.as_raw().clone(),
        fr::PixelType::U8x4,
    )
    .map_err(|e| PosterError::Resize(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(to_fast_filter(filter)));

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| PosterError::Resize(format!("fast_image_resize 执行失败：{}", e)))?;

    ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(target_width, target_height, dst_image.into_vec())
        .ok_or_else(|| PosterError::Resize("fast_image_resize 输出缓冲长度异常".to_string()))
}

fn to_fast_filter(filter: FilterType) -> fr::FilterType {
    match filter {
        FilterType::Nearest => fr::FilterType::Box,
        FilterType::Triangle => fr::FilterType::Bilinear,
        FilterType::CatmullRom => fr::FilterType::CatmullRom,
        FilterType::Gaussian => fr::FilterType::Mitchell,
        FilterType::Lanczos3 => fr::FilterType::Lanczos3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer(width: u32, height: u32, limit: u64) -> CanvasNormalizer {
        CanvasNormalizer::new(CanvasSize::new(width, height), limit, FilterType::Lanczos3)
    }

    fn opaque(width: u32, height: u32) -> RgbaImage {
        ImageBuffer::from_pixel(width, height, Rgba([200, 30, 30, 255]))
    }

    #[test]
    fn fit_within_preserves_aspect_and_never_upscales() {
        let bounds = CanvasSize::new(1024, 1024);

        assert_eq!(fit_within(512, 512, bounds), (512, 512));
        assert_eq!(fit_within(2048, 1024, bounds), (1024, 512));
        assert_eq!(fit_within(1000, 3000, bounds), (341, 1024));
        assert_eq!(fit_within(5000, 1, bounds), (1024, 1));
    }

    #[test]
    fn small_subject_is_centred_without_upscaling() {
        let canvas = normalizer(100, 100, 4 * 1024 * 1024)
            .normalize(opaque(40, 20))
            .expect("normalize should succeed");

        let image = canvas.image().to_rgba8();
        assert_eq!(image.dimensions(), (100, 100));
        // offset = ((100-40)/2, (100-20)/2) = (30, 40)
        assert_eq!(image.get_pixel(29, 50)[3], 0);
        assert_eq!(image.get_pixel(30, 40)[3], 255);
        assert_eq!(image.get_pixel(69, 59)[3], 255);
        assert_eq!(image.get_pixel(70, 59)[3], 0);
        assert_eq!(image.get_pixel(50, 60)[3], 0);
    }

    #[test]
    fn wide_subject_is_downscaled_to_canvas_width() {
        let canvas = normalizer(64, 64, 4 * 1024 * 1024)
            .normalize(opaque(256, 64))
            .expect("normalize should succeed");

        let image = canvas.image().to_rgba8();
        assert_eq!(image.dimensions(), (64, 64));
        // 缩放后为 64x16，垂直偏移 24。
        assert_eq!(image.get_pixel(32, 10)[3], 0);
        assert!(image.get_pixel(32, 32)[3] > 200);
    }

    #[test]
    fn encoded_bytes_match_canvas() {
        let canvas = normalizer(32, 32, 4 * 1024 * 1024)
            .normalize(opaque(10, 10))
            .expect("normalize should succeed");

        let decoded = image::load_from_memory(canvas.encoded_png()).expect("png should decode");
        assert_eq!(decoded.to_rgba8(), canvas.image().to_rgba8());
        assert_eq!(canvas.encoded_len(), canvas.encoded_png().len() as u64);
    }

    #[test]
    fn oversize_encoding_is_a_hard_stop() {
        let result = normalizer(64, 64, 16).normalize(opaque(64, 64));

        assert!(matches!(
            result,
            Err(PosterError::OversizeImage { limit: 16, .. })
        ));
    }

    #[test]
    fn resize_rgba_rejects_empty_target() {
        let result = resize_rgba(&opaque(4, 4), 0, 4, FilterType::Lanczos3);
        assert!(matches!(result, Err(PosterError::Resize(_))));
    }
}
