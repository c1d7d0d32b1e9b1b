//! # 背景移除模块
//!
//! ## 设计思路
//!
//! `BackgroundRemover` 是可替换的接缝：模型推理实现（U2Net 等）只需实现该 trait 即可接入编排器。
//! 默认提供 `ColorKeyRemover`，适用于纯色/近纯色背景的商品照片。
//!
//! ## 实现思路
//!
//! 1. 取图像四条边的像素，按通道中位数估计背景色
//! 2. 从边缘出发做 4 邻域洪泛，只穿过与背景色差值不超过容差的像素
//! 3. 被洪泛到的像素置为完全透明；与其相邻、落在羽化带内的像素获得部分透明度
//!
//! 只从边缘洪泛，保证主体内部与背景同色的区域不会被误删。

use std::collections::VecDeque;

use image::{DynamicImage, Rgba, RgbaImage};

use super::{PosterConfig, PosterError};

/// 背景移除：输出与输入同尺寸的 RGBA 图像，背景像素透明。
pub trait BackgroundRemover {
    fn remove(&self, image: &DynamicImage) -> Result<RgbaImage, PosterError>;
}

/// 基于边缘色键的背景移除器。
#[derive(Debug, Clone, Copy)]
pub struct ColorKeyRemover {
    tolerance: u8,
    feather: u8,
}

impl ColorKeyRemover {
    pub fn new(tolerance: u8, feather: u8) -> Self {
        Self { tolerance, feather }
    }

    pub fn from_config(config: &PosterConfig) -> Self {
        Self::new(config.color_key_tolerance, config.color_key_feather)
    }

    /// 用边缘像素各通道的中位数估计背景色。
    fn estimate_background(image: &RgbaImage) -> [u8; 3] {
        let (width, height) = image.dimensions();
        let mut channels: [Vec<u8>; 3] = Default::default();

        let mut push = |pixel: &Rgba<u8>| {
            for (idx, channel) in channels.iter_mut().enumerate() {
                channel.push(pixel[idx]);
            }
        };

        for x in 0..width {
            push(image.get_pixel(x, 0));
            push(image.get_pixel(x, height - 1));
        }
        for y in 1..height.saturating_sub(1) {
            push(image.get_pixel(0, y));
            push(image.get_pixel(width - 1, y));
        }

        let mut background = [0u8; 3];
        for (idx, channel) in channels.iter_mut().enumerate() {
            channel.sort_unstable();
            background[idx] = channel[channel.len() / 2];
        }
        background
    }

    fn distance(pixel: &Rgba<u8>, background: [u8; 3]) -> u8 {
        if pixel[3] == 0 {
            return 0;
        }

        (0..3)
            .map(|idx| pixel[idx].abs_diff(background[idx]))
            .max()
            .unwrap_or(0)
    }

    /// 羽化带内像素的剩余不透明度比例（0 < ratio < 1）。
    fn feather_ratio(&self, distance: u8) -> f32 {
        let over = distance.saturating_sub(self.tolerance) as f32;
        over / (self.feather as f32 + 1.0)
    }
}

impl Default for ColorKeyRemover {
    fn default() -> Self {
        Self::from_config(&PosterConfig::default())
    }
}

impl BackgroundRemover for ColorKeyRemover {
    fn remove(&self, image: &DynamicImage) -> Result<RgbaImage, PosterError> {
        let mut rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();

        if width == 0 || height == 0 {
            return Err(PosterError::BackgroundRemoval(format!(
                "图像尺寸为空：{}x{}",
                width, height
            )));
        }

        let background = Self::estimate_background(&rgba);
        let feather_limit = self.tolerance.saturating_add(self.feather);
        let index = |x: u32, y: u32| (y as usize) * (width as usize) + x as usize;

        let mut visited = vec![false; (width as usize) * (height as usize)];
        let mut queue = VecDeque::new();

        for x in 0..width {
            queue.push_back((x, 0));
            queue.push_back((x, height - 1));
        }
        for y in 0..height {
            queue.push_back((0, y));
            queue.push_back((width - 1, y));
        }

        let mut cleared: u64 = 0;
        let mut feathered: u64 = 0;

        while let Some((x, y)) = queue.pop_front() {
            let idx = index(x, y);
            if visited[idx] {
                continue;
            }

            let pixel = rgba.get_pixel(x, y);
            let distance = Self::distance(pixel, background);

            if distance > feather_limit {
                continue;
            }
            visited[idx] = true;

            if distance > self.tolerance {
                let alpha = (pixel[3] as f32 * self.feather_ratio(distance)).round() as u8;
                rgba.get_pixel_mut(x, y)[3] = alpha;
                feathered += 1;
                continue;
            }

            rgba.get_pixel_mut(x, y)[3] = 0;
            cleared += 1;

            if x > 0 {
                queue.push_back((x - 1, y));
            }
            if x + 1 < width {
                queue.push_back((x + 1, y));
            }
            if y > 0 {
                queue.push_back((x, y - 1));
            }
            if y + 1 < height {
                queue.push_back((x, y + 1));
            }
        }

        log::info!(
            "✂️ 背景移除完成 - 尺寸: {}x{} 背景色: {:?} 透明: {} 羽化: {}",
            width,
            height,
            background,
            cleared,
            feathered
        );

        Ok(rgba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer};

    /// 白底，中央 20×20 黑色方块。
    fn silhouette(width: u32, height: u32) -> DynamicImage {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let cx = width / 2;
            let cy = height / 2;
            if x.abs_diff(cx) < 10 && y.abs_diff(cy) < 10 {
                Rgba([10, 10, 10, 255])
            } else {
                Rgba([250, 251, 249, 255])
            }
        });
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn remove_keeps_dimensions_and_clears_border_background() {
        let remover = ColorKeyRemover::default();
        let input = silhouette(64, 48);

        let output = remover.remove(&input).expect("remove should succeed");

        assert_eq!(output.dimensions(), input.dimensions());
        assert_eq!(output.get_pixel(0, 0)[3], 0);
        assert_eq!(output.get_pixel(63, 47)[3], 0);
        assert_eq!(output.get_pixel(32, 24)[3], 255);
        assert_eq!(output.get_pixel(32, 24)[0], 10);
    }

    #[test]
    fn enclosed_background_coloured_region_is_preserved() {
        // 黑色圆环内部与背景同色，不应被洪泛到。
        let img = ImageBuffer::from_fn(40, 40, |x, y| {
            let ring = (10..30).contains(&x) && (10..30).contains(&y);
            let hole = (14..26).contains(&x) && (14..26).contains(&y);
            if ring && !hole {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let remover = ColorKeyRemover::new(20, 0);

        let output = remover
            .remove(&DynamicImage::ImageRgba8(img))
            .expect("remove should succeed");

        assert_eq!(output.get_pixel(2, 2)[3], 0);
        assert_eq!(output.get_pixel(20, 20)[3], 255);
    }

    #[test]
    fn feather_band_gets_partial_alpha() {
        let img = ImageBuffer::from_fn(10, 10, |x, _| {
            if x == 5 {
                Rgba([215, 215, 215, 255])
            } else if x > 5 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let remover = ColorKeyRemover::new(20, 40);

        let output = remover
            .remove(&DynamicImage::ImageRgba8(img))
            .expect("remove should succeed");

        let alpha = output.get_pixel(5, 5)[3];
        assert!(alpha > 0 && alpha < 255, "alpha = {alpha}");
    }

    #[test]
    fn remove_rejects_empty_image() {
        let remover = ColorKeyRemover::default();
        let result = remover.remove(&DynamicImage::new_rgba8(0, 0));

        assert!(matches!(result, Err(PosterError::BackgroundRemoval(_))));
    }
}
