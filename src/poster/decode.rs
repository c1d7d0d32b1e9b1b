//! # 解码模块
//!
//! ## 设计思路
//!
//! 将“字节 → 图像”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先做签名与尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 通过文件签名（magic bytes）识别类型
//! 2. 读取 header 尺寸并按像素上限快速拒绝
//! 3. 完整解码
//!
//! 上传图的任何解码问题都归入背景移除阶段；场景图的解码问题归入场景获取阶段。

use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;

use super::{PosterConfig, PosterError, UploadedImage};

const UPLOAD_MIME_TYPES: [&str; 2] = ["image/jpeg", "image/png"];
/// 最宽的像素格式（Rgba32F）每像素字节数，用于换算解码内存上限。
const MAX_BYTES_PER_PIXEL: u64 = 16;

/// 解码上传图片，仅接受 JPEG / PNG。
pub(crate) fn decode_upload(
    upload: &UploadedImage,
    config: &PosterConfig,
) -> Result<DynamicImage, PosterError> {
    let mime = detect_image_mime(&upload.bytes).map_err(PosterError::BackgroundRemoval)?;
    if !UPLOAD_MIME_TYPES.contains(&mime) {
        return Err(PosterError::BackgroundRemoval(format!(
            "不支持的上传格式：{}（仅支持 JPEG / PNG）",
            mime
        )));
    }

    let decoded = decode_with_limits(&upload.bytes, config.max_decoded_pixels)
        .map_err(PosterError::BackgroundRemoval)?;

    let (width, height) = decoded.dimensions();
    log::info!(
        "✅ 上传图片解码成功 - 来源: {} 格式: {} 尺寸: {}x{}",
        upload.source_hint,
        mime,
        width,
        height
    );

    Ok(decoded)
}

/// 解码下载得到的场景图片。
pub(crate) fn decode_scene(bytes: &[u8], config: &PosterConfig) -> Result<DynamicImage, PosterError> {
    detect_image_mime(bytes).map_err(PosterError::Fetch)?;
    let decoded = decode_with_limits(bytes, config.max_decoded_pixels).map_err(PosterError::Fetch)?;

    let (width, height) = decoded.dimensions();
    log::info!("✅ 场景图片解码成功 - 尺寸: {}x{}", width, height);

    Ok(decoded)
}

/// 通过文件签名识别图片 MIME 类型。
pub(crate) fn detect_image_mime(bytes: &[u8]) -> Result<&'static str, String> {
    if bytes.is_empty() {
        return Err("图片内容为空".to_string());
    }

    let kind = infer::get(bytes).ok_or_else(|| "无法识别图片类型".to_string())?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(format!("文件签名不是图片类型：{}", kind.mime_type()));
    }

    Ok(kind.mime_type())
}

fn decode_with_limits(bytes: &[u8], max_pixels: u64) -> Result<DynamicImage, String> {
    let (header_width, header_height) = inspect_dimensions_from_memory(bytes)?;
    validate_pixel_limits(max_pixels, header_width, header_height)?;

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| format!("无法识别图片格式：{}", e))?;
    // 解码器内存上限跟随像素上限。
    let mut limits = image::Limits::default();
    limits.max_alloc = Some(max_pixels.saturating_mul(MAX_BYTES_PER_PIXEL));
    reader.limits(limits);

    reader.decode().map_err(|e| format!("图片解码失败：{}", e))
}

/// 仅通过内存中的图片头信息读取宽高。
fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), String> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| format!("无法识别图片格式：{}", e))?;

    reader
        .into_dimensions()
        .map_err(|e| format!("无法读取图片尺寸：{}", e))
}

fn validate_pixel_limits(max_pixels: u64, width: u32, height: u32) -> Result<(), String> {
    if width == 0 || height == 0 {
        return Err(format!("图片尺寸为空：{}x{}", width, height));
    }

    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| "图片像素数溢出".to_string())?;

    if pixels > max_pixels {
        return Err(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, max_pixels
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Luma, Rgba};

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 255) as u8, (y % 255) as u8, 90, 255])
        });
        let dyn_img = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img).to_rgb8()),
            _ => DynamicImage::ImageRgba8(img),
        };
        let mut cursor = Cursor::new(Vec::new());
        dyn_img
            .write_to(&mut cursor, format)
            .expect("failed to encode test image");
        cursor.into_inner()
    }

    #[test]
    fn decode_upload_accepts_png_and_jpeg() {
        let config = PosterConfig::default();

        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            let upload = UploadedImage::from_bytes(encode(40, 30, format));
            let decoded = decode_upload(&upload, &config).expect("decode should succeed");
            assert_eq!(decoded.dimensions(), (40, 30));
        }
    }

    #[test]
    fn decode_upload_rejects_other_image_formats() {
        let config = PosterConfig::default();
        let upload = UploadedImage::from_bytes(encode(8, 8, ImageFormat::Bmp));

        let result = decode_upload(&upload, &config);

        assert!(matches!(result, Err(PosterError::BackgroundRemoval(_))));
    }

    #[test]
    fn decode_upload_rejects_garbage_as_background_removal_error() {
        let config = PosterConfig::default();
        let upload = UploadedImage::from_bytes(b"definitely not an image".to_vec());

        let result = decode_upload(&upload, &config);

        assert!(matches!(result, Err(PosterError::BackgroundRemoval(_))));
    }

    #[test]
    fn pixel_limit_admits_camera_sized_photos() {
        let config = PosterConfig::default();

        assert!(validate_pixel_limits(config.max_decoded_pixels, 8000, 6000).is_ok());
        assert!(validate_pixel_limits(config.max_decoded_pixels, 12_000, 9_000).is_ok());
        assert!(validate_pixel_limits(config.max_decoded_pixels, 20_000, 10_000).is_err());
    }

    #[test]
    fn decode_upload_accepts_48_megapixel_jpeg_with_defaults() {
        let config = PosterConfig::default();
        let photo = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(8000, 6000, Luma([128u8])));
        let mut cursor = Cursor::new(Vec::new());
        photo
            .write_to(&mut cursor, ImageFormat::Jpeg)
            .expect("failed to encode test photo");
        let upload = UploadedImage::from_bytes(cursor.into_inner());

        let decoded = decode_upload(&upload, &config).expect("48 MP photo should decode");

        assert_eq!(decoded.dimensions(), (8000, 6000));
    }

    #[test]
    fn decode_scene_rejects_too_many_pixels() {
        let mut config = PosterConfig::default();
        config.max_decoded_pixels = 1_000;

        let result = decode_scene(&encode(64, 64, ImageFormat::Png), &config);

        assert!(matches!(result, Err(PosterError::Fetch(_))));
    }

    #[test]
    fn decode_scene_reports_truncated_payload_as_fetch_error() {
        let config = PosterConfig::default();
        let mut bytes = encode(64, 64, ImageFormat::Png);
        bytes.truncate(bytes.len() / 2);

        let result = decode_scene(&bytes, &config);

        assert!(matches!(result, Err(PosterError::Fetch(_))));
    }
}
