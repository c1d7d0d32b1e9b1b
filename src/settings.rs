//! 设置文件模块
//!
//! 设置以 JSON 文件保存，所有字段可选；缺省字段回退到 `PosterConfig::default()`。
//! API 凭据优先取设置文件，其次取环境变量 `OPENAI_API_KEY`。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::poster::{CanvasSize, GenerationQuality, PosterConfig};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_FRAMES: [&str; 3] = ["frame1.png", "frame2.png", "frame3.png"];
const DEFAULT_OUTPUT_DIR: &str = "posters";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PosterSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub canvas_width: Option<u32>,
    #[serde(default)]
    pub canvas_height: Option<u32>,
    #[serde(default)]
    pub size_limit_bytes: Option<u64>,
    /// 解码像素上限（宽 × 高）。
    #[serde(default)]
    pub max_decoded_pixels: Option<u64>,
    /// 上传文件字节上限。
    #[serde(default)]
    pub max_upload_bytes: Option<u64>,
    /// 边框文件路径，相对路径按设置文件所在目录解析。
    #[serde(default)]
    pub frames: Option<Vec<String>>,
    #[serde(default)]
    pub output_dir: Option<String>,
}

impl PosterSettings {
    /// 读取设置文件；文件不存在时返回全默认设置。
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::info!("⚙️ 未找到设置文件 {}，使用默认设置", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        serde_json::from_str::<Self>(&content)
            .map_err(|e| AppError::Settings(format!("解析设置文件失败: {}", e)))
    }

    /// 将设置覆盖到默认配置之上，并做范围校验。
    pub fn to_config(&self) -> Result<PosterConfig, AppError> {
        let mut config = PosterConfig::default();

        if let Some(url) = self.api_base_url.as_deref().filter(|v| !v.trim().is_empty()) {
            config.api_base_url = url.trim().to_string();
        }
        if let Some(model) = self.model.as_deref().filter(|v| !v.trim().is_empty()) {
            config.model = model.trim().to_string();
        }
        if let Some(quality) = self.quality.as_deref() {
            config.quality = GenerationQuality::from_str(quality)?;
        }
        if self.canvas_width.is_some() || self.canvas_height.is_some() {
            config.canvas_size = CanvasSize::new(
                self.canvas_width.unwrap_or(config.canvas_size.width),
                self.canvas_height.unwrap_or(config.canvas_size.height),
            );
        }
        if let Some(limit) = self.size_limit_bytes {
            config.encoded_size_limit = limit;
        }
        if let Some(pixels) = self.max_decoded_pixels {
            config.max_decoded_pixels = pixels;
        }
        if let Some(bytes) = self.max_upload_bytes {
            config.max_upload_size = bytes;
        }

        config.validate()?;
        Ok(config)
    }

    /// 解析 API 凭据：设置文件 → 环境变量。
    pub fn resolve_api_key(&self) -> Result<String, AppError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .or_else(|| {
                std::env::var(API_KEY_ENV)
                    .ok()
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
            })
            .ok_or_else(|| AppError::Settings(format!("缺少 API 凭据（设置 api_key 或环境变量 {}）", API_KEY_ENV)))
    }

    /// 边框路径列表；未配置时使用 `frame1.png / frame2.png / frame3.png`。
    pub fn frame_paths(&self, base_dir: &Path) -> Vec<PathBuf> {
        match self.frames.as_ref().filter(|frames| !frames.is_empty()) {
            Some(frames) => frames.iter().map(|frame| base_dir.join(frame)).collect(),
            None => DEFAULT_FRAMES.iter().map(|frame| base_dir.join(frame)).collect(),
        }
    }

    pub fn output_dir(&self, base_dir: &Path) -> PathBuf {
        match self.output_dir.as_deref().filter(|dir| !dir.trim().is_empty()) {
            Some(dir) => base_dir.join(dir),
            None => base_dir.join(DEFAULT_OUTPUT_DIR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = PosterSettings::load(Path::new("/definitely/not/here/settings.json"))
            .expect("missing file should fall back to defaults");

        assert_eq!(settings, PosterSettings::default());
        let config = settings.to_config().expect("default config should be valid");
        assert_eq!(config.canvas_size, CanvasSize::new(1024, 1024));
        assert_eq!(config.encoded_size_limit, 4 * 1024 * 1024);
    }

    #[test]
    fn fields_override_defaults() {
        let settings: PosterSettings = serde_json::from_str(
            r#"{"quality":"standard","canvas_width":512,"size_limit_bytes":1048576,"model":"gpt-image-1"}"#,
        )
        .expect("parse failed");

        let config = settings.to_config().expect("config should be valid");

        assert_eq!(config.quality, GenerationQuality::Standard);
        assert_eq!(config.canvas_size, CanvasSize::new(512, 1024));
        assert_eq!(config.encoded_size_limit, 1024 * 1024);
        assert_eq!(config.model, "gpt-image-1");
    }

    #[test]
    fn decode_limits_are_configurable() {
        let defaults = PosterSettings::default().to_config().expect("default config should be valid");
        assert!(defaults.max_decoded_pixels >= 8000 * 6000);

        let settings: PosterSettings =
            serde_json::from_str(r#"{"max_decoded_pixels":250000000,"max_upload_bytes":524288000}"#)
                .expect("parse failed");
        let config = settings.to_config().expect("config should be valid");

        assert_eq!(config.max_decoded_pixels, 250_000_000);
        assert_eq!(config.max_upload_size, 500 * 1024 * 1024);

        let zero = PosterSettings {
            max_decoded_pixels: Some(0),
            ..PosterSettings::default()
        };
        assert!(matches!(zero.to_config(), Err(AppError::Poster(_))));
    }

    #[test]
    fn unknown_quality_is_rejected() {
        let settings = PosterSettings {
            quality: Some("ultra".to_string()),
            ..PosterSettings::default()
        };

        assert!(matches!(settings.to_config(), Err(AppError::Poster(_))));
    }

    #[test]
    fn load_reports_malformed_json() {
        let path = std::env::temp_dir().join(format!("poster-settings-{}.json", std::process::id()));
        fs::write(&path, "{ not json").expect("write failed");

        let result = PosterSettings::load(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(AppError::Settings(_))));
    }

    #[test]
    fn explicit_api_key_wins_over_environment() {
        let settings = PosterSettings {
            api_key: Some("  sk-file  ".to_string()),
            ..PosterSettings::default()
        };

        assert_eq!(settings.resolve_api_key().expect("key should resolve"), "sk-file");
    }

    #[test]
    fn frame_paths_default_to_three_named_frames() {
        let base = Path::new("/assets");

        assert_eq!(
            PosterSettings::default().frame_paths(base),
            vec![
                base.join("frame1.png"),
                base.join("frame2.png"),
                base.join("frame3.png")
            ]
        );

        let custom = PosterSettings {
            frames: Some(vec!["gold.png".to_string()]),
            output_dir: Some("out".to_string()),
            ..PosterSettings::default()
        };
        assert_eq!(custom.frame_paths(base), vec![base.join("gold.png")]);
        assert_eq!(custom.output_dir(base), base.join("out"));
    }
}
