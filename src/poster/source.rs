//! # 中间数据模型模块
//!
//! 定义流水线各阶段之间传递的数据结构。

use std::path::Path;

use image::{DynamicImage, GenericImageView, RgbaImage};

use super::{CanvasSize, GenerationQuality, PosterError};

/// 用户上传的原始图片字节。
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub(crate) bytes: Vec<u8>,
    pub(crate) source_hint: &'static str,
}

impl UploadedImage {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            source_hint: "memory",
        }
    }

    /// 从本地路径读取上传图片。
    pub fn from_file(path: impl AsRef<Path>, max_size: u64) -> Result<Self, PosterError> {
        let file_path = path.as_ref();
        log::info!("📁 开始读取上传图片 - 路径: {}", file_path.display());

        if !file_path.exists() {
            return Err(PosterError::FileSystem(format!("文件不存在：{}", file_path.display())));
        }

        let metadata = std::fs::metadata(file_path)
            .map_err(|e| PosterError::FileSystem(format!("无法读取文件信息：{}", e)))?;

        if metadata.len() > max_size {
            return Err(PosterError::InvalidFormat(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                max_size as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = std::fs::read(file_path)
            .map_err(|e| PosterError::FileSystem(format!("无法读取图片文件：{}", e)))?;

        Ok(Self {
            bytes,
            source_hint: "file",
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// 规整后的主体画布：固定尺寸、透明背景、主体居中，附带其 PNG 编码。
///
/// 编码字节即体积校验的对象，画布本身则作为后续合成的输入，两者始终一致。
#[derive(Debug, Clone)]
pub struct SubjectCanvas {
    image: DynamicImage,
    encoded_png: Vec<u8>,
}

impl SubjectCanvas {
    pub(crate) fn new(image: RgbaImage, encoded_png: Vec<u8>) -> Self {
        Self {
            image: DynamicImage::ImageRgba8(image),
            encoded_png,
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn encoded_png(&self) -> &[u8] {
        &self.encoded_png
    }

    pub fn encoded_len(&self) -> u64 {
        self.encoded_png.len() as u64
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// 场景生成请求，创建后不可变；每次请求固定生成 1 张。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    prompt: String,
    size: CanvasSize,
    quality: GenerationQuality,
}

impl GenerationRequest {
    pub const COUNT: u8 = 1;

    pub fn new(prompt: impl Into<String>, size: CanvasSize, quality: GenerationQuality) -> Self {
        Self {
            prompt: prompt.into(),
            size,
            quality,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn size(&self) -> CanvasSize {
        self.size
    }

    pub fn quality(&self) -> GenerationQuality {
        self.quality
    }

    pub fn count(&self) -> u8 {
        Self::COUNT
    }
}

/// 生成结果的可获取引用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneReference {
    /// 远端图片地址，需要再发起一次下载。
    Url(String),
    /// 接口直接内联返回的 Base64 图片。
    Base64(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub reference: SceneReference,
    /// 部分模型会改写提示词，这里仅用于日志。
    pub revised_prompt: Option<String>,
}

/// 各阶段耗时（毫秒），缓存命中时跳过的阶段记为 0。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StageTimings {
    pub remove_ms: u128,
    pub normalize_ms: u128,
    pub generate_ms: u128,
    pub fetch_ms: u128,
    pub composite_ms: u128,
    pub total_ms: u128,
}

/// 单次运行（或单次换框）的结果。
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub poster: DynamicImage,
    pub frame: String,
    /// 是否复用了缓存的主体画布与场景。
    pub cache_hit: bool,
    /// 本次调用合成器的次数。
    pub composite_calls: u8,
    pub timings: StageTimings,
}
