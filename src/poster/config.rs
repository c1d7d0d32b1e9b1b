//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `PosterConfig`，保证运行时行为可观测、可调整、可测试。
//! 其中生成质量（standard / hd）作为高层语义，直接映射到生成接口的 `quality` 参数。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用配置（1024×1024 画布、4 MB 编码上限、dall-e-3 / hd）。
//! - `GenerationQuality` 负责质量字符串解析与反向输出。
//! - `CanvasSize` 负责 `"WxH"` 尺寸字符串的解析与输出。
//! - `validate` 在流水线构建时统一做范围校验，避免运行中途才暴露配置错误。

use image::imageops::FilterType;

use super::PosterError;

/// 画布 / 生成尺寸（像素）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 输出生成接口需要的 `"WxH"` 形式。
    pub fn as_api_size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// 解析 `"1024x1024"` 形式的尺寸字符串（大小写 `x` 均可）。
    ///
    /// # 示例
    /// ```rust
    /// use poster_studio::poster::CanvasSize;
    ///
    /// let size = CanvasSize::parse("1792x1024")?;
    /// assert_eq!(size, CanvasSize::new(1792, 1024));
    /// # Ok::<(), poster_studio::poster::PosterError>(())
    /// ```
    pub fn parse(text: &str) -> Result<Self, PosterError> {
        let lowered = text.trim().to_ascii_lowercase();
        let (w, h) = lowered
            .split_once('x')
            .ok_or_else(|| PosterError::InvalidFormat(format!("尺寸格式错误：{}（示例：1024x1024）", text)))?;

        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|e| PosterError::InvalidFormat(format!("尺寸宽度无效：{}（{}）", w, e)))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|e| PosterError::InvalidFormat(format!("尺寸高度无效：{}（{}）", h, e)))?;

        Ok(Self { width, height })
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// 场景生成质量档位。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationQuality {
    Standard,
    Hd,
}

impl GenerationQuality {
    /// 从外部字符串解析质量档位。
    pub fn from_str(quality: &str) -> Result<Self, PosterError> {
        match quality.trim().to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "hd" => Ok(Self::Hd),
            other => Err(PosterError::InvalidFormat(format!(
                "未知生成质量：{}（可选：standard / hd）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Hd => "hd",
        }
    }
}

const DEFAULT_MAX_UPLOAD_SIZE: u64 = 256 * 1024 * 1024;
const DEFAULT_MAX_DECODED_PIXELS: u64 = 178_956_970;

/// 海报流水线配置。
///
/// 字段覆盖了上传解码、抠图、画布规整、场景生成与场景下载五个阶段。
#[derive(Debug, Clone)]
pub struct PosterConfig {
    /// 主体画布尺寸，同时是主体缩放的上限。
    pub canvas_size: CanvasSize,
    /// 画布 PNG 编码后允许的最大体积（字节）。
    pub encoded_size_limit: u64,
    /// 上传文件允许的最大体积（字节）。
    pub max_upload_size: u64,
    /// 解码后的像素上限（`width * height`），上传图与场景图共用。
    ///
    /// 默认值与常见解码库的“解压炸弹”阈值一致，普通相机原图（如 8000×6000）可以通过。
    pub max_decoded_pixels: u64,
    /// 画布缩放与图层缩放共用的滤镜。
    pub resize_filter: FilterType,
    /// 背景色键容差（RGB 通道最大差值）。
    pub color_key_tolerance: u8,
    /// 容差之外的羽化带宽度，带内像素按距离获得部分透明度。
    pub color_key_feather: u8,
    /// 生成接口根地址（OpenAI 兼容）。
    pub api_base_url: String,
    /// 生成模型名称。
    pub model: String,
    /// 请求生成的场景尺寸。
    pub generation_size: CanvasSize,
    pub quality: GenerationQuality,
    /// 单次 HTTP 请求总超时（秒）。
    pub request_timeout: u64,
    /// 建立连接（TCP/TLS）超时时间（秒）。
    pub connect_timeout: u64,
    /// 下载首包超时时间（毫秒）。
    pub stream_first_byte_timeout_ms: u64,
    /// 下载分块读取超时时间（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 场景图片下载允许的最大体积（字节）。
    pub max_fetch_size: u64,
    /// 场景图片下载允许的最大重定向次数。
    pub max_redirects: usize,
}

impl Default for PosterConfig {
    fn default() -> Self {
        Self {
            canvas_size: CanvasSize::new(1024, 1024),
            encoded_size_limit: 4 * 1024 * 1024,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            max_decoded_pixels: DEFAULT_MAX_DECODED_PIXELS,
            resize_filter: FilterType::Lanczos3,
            color_key_tolerance: 32,
            color_key_feather: 24,
            api_base_url: "https://api.openai.com/v1".to_string(),
            model: "dall-e-3".to_string(),
            generation_size: CanvasSize::new(1024, 1024),
            quality: GenerationQuality::Hd,
            request_timeout: 120,
            connect_timeout: 10,
            stream_first_byte_timeout_ms: 15_000,
            stream_chunk_timeout_ms: 15_000,
            max_fetch_size: 32 * 1024 * 1024,
            max_redirects: 5,
        }
    }
}

impl PosterConfig {
    /// 校验配置取值范围。
    pub fn validate(&self) -> Result<(), PosterError> {
        if self.canvas_size.is_empty() {
            return Err(PosterError::InvalidFormat("canvas_size 宽高必须大于 0".to_string()));
        }
        if self.generation_size.is_empty() {
            return Err(PosterError::InvalidFormat("generation_size 宽高必须大于 0".to_string()));
        }
        if self.encoded_size_limit == 0 {
            return Err(PosterError::InvalidFormat("encoded_size_limit 必须大于 0".to_string()));
        }
        if self.max_upload_size == 0 {
            return Err(PosterError::InvalidFormat("max_upload_size 必须大于 0".to_string()));
        }
        if self.max_decoded_pixels == 0 {
            return Err(PosterError::InvalidFormat("max_decoded_pixels 必须大于 0".to_string()));
        }
        if !(1..=600).contains(&self.request_timeout) {
            return Err(PosterError::InvalidFormat("request_timeout 必须在 1~600 秒之间".to_string()));
        }
        if !(1..=120).contains(&self.connect_timeout) {
            return Err(PosterError::InvalidFormat("connect_timeout 必须在 1~120 秒之间".to_string()));
        }
        if !(500..=120_000).contains(&self.stream_first_byte_timeout_ms) {
            return Err(PosterError::InvalidFormat(
                "stream_first_byte_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if !(500..=120_000).contains(&self.stream_chunk_timeout_ms) {
            return Err(PosterError::InvalidFormat(
                "stream_chunk_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(PosterError::InvalidFormat("model 不能为空".to_string()));
        }
        if reqwest::Url::parse(&self.api_base_url).is_err() {
            return Err(PosterError::InvalidFormat(format!(
                "api_base_url 不是合法 URL：{}",
                self.api_base_url
            )));
        }

        Ok(())
    }
}
