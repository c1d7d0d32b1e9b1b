//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载海报流水线中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! 前四个变体对应流水线的硬性中止阶段（背景移除 / 画布体积 / 场景生成 / 场景获取），
//! 图层合成失败不属于错误：合成器会降级返回底图并记录 warn 日志。

use super::PipelineStage;

fn mib(bytes: &u64) -> f64 {
    *bytes as f64 / 1024.0 / 1024.0
}

/// 海报流水线统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum PosterError {
    #[error("背景移除失败：{0}")]
    BackgroundRemoval(String),

    #[error("画布编码后体积过大：{:.2} MB（限制：{:.2} MB）", mib(.size), mib(.limit))]
    OversizeImage { size: u64, limit: u64 },

    #[error("画布编码失败：{0}")]
    Encode(String),

    #[error("场景生成失败：{0}")]
    Generation(String),

    #[error("场景图片获取失败：{0}")]
    Fetch(String),

    #[error("缩放失败：{0}")]
    Resize(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("未找到边框：{0}")]
    FrameNotFound(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("流水线状态错误：{0}")]
    InvalidState(String),
}

impl PosterError {
    /// 稳定的机器可读错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::BackgroundRemoval(_) => "background_removal",
            Self::OversizeImage { .. } => "oversize_image",
            Self::Encode(_) => "encode",
            Self::Generation(_) => "generation",
            Self::Fetch(_) => "fetch",
            Self::Resize(_) => "resize",
            Self::InvalidFormat(_) => "invalid_format",
            Self::FrameNotFound(_) => "frame_not_found",
            Self::FileSystem(_) => "file_system",
            Self::InvalidState(_) => "invalid_state",
        }
    }

    /// 触发该错误的流水线阶段；与阶段无关的错误（配置、输入参数）返回 `None`。
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::BackgroundRemoval(_) | Self::OversizeImage { .. } | Self::Encode(_) => {
                Some(PipelineStage::SubjectProcessing)
            }
            Self::Generation(_) => Some(PipelineStage::SceneRequesting),
            Self::Fetch(_) => Some(PipelineStage::SceneFetching),
            _ => None,
        }
    }
}

/// 对外暴露的失败报告（错误码 + 阶段 + 原始描述）。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PipelineFailure {
    pub code: &'static str,
    pub stage: Option<&'static str>,
    pub message: String,
}

impl From<&PosterError> for PipelineFailure {
    fn from(error: &PosterError) -> Self {
        Self {
            code: error.code(),
            stage: error.stage().map(PipelineStage::as_str),
            message: error.to_string(),
        }
    }
}
