//! # 边框资源模块
//!
//! 边框在进程启动时一次性加载，之后只读共享（`Arc<FrameSet>`），按名称选择。
//! 名称取文件名去掉扩展名，例如 `frame2.png` 对应 `frame2`；查询时两种写法都可以。

use std::path::Path;

use image::DynamicImage;

use super::PosterError;

/// 单个命名边框。
#[derive(Debug, Clone)]
pub struct Frame {
    name: String,
    image: DynamicImage,
}

impl Frame {
    pub fn new(name: impl Into<String>, image: DynamicImage) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

/// 固定的命名边框集合。
#[derive(Debug, Clone)]
pub struct FrameSet {
    frames: Vec<Frame>,
}

impl FrameSet {
    /// 从路径列表加载边框。
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, PosterError> {
        let mut frames = Vec::with_capacity(paths.len());

        for path in paths {
            let path = path.as_ref();
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| PosterError::FileSystem(format!("边框文件名无效：{}", path.display())))?;

            let image = image::open(path)
                .map_err(|e| PosterError::FileSystem(format!("无法加载边框 {}：{}", path.display(), e)))?;

            log::info!(
                "🖼️ 已加载边框 {} - {}x{}",
                name,
                image.width(),
                image.height()
            );
            frames.push(Frame::new(name, image));
        }

        Self::from_frames(frames)
    }

    /// 由内存中的边框构建集合，名称不可为空且不可重复。
    pub fn from_frames(frames: Vec<Frame>) -> Result<Self, PosterError> {
        if frames.is_empty() {
            return Err(PosterError::InvalidFormat("边框集合不能为空".to_string()));
        }

        for (idx, frame) in frames.iter().enumerate() {
            if frame.name.trim().is_empty() {
                return Err(PosterError::InvalidFormat("边框名称不能为空".to_string()));
            }
            if frames[..idx].iter().any(|other| other.name == frame.name) {
                return Err(PosterError::InvalidFormat(format!("边框名称重复：{}", frame.name)));
            }
        }

        Ok(Self { frames })
    }

    /// 按名称查找边框，兼容带扩展名的写法。
    pub fn get(&self, name: &str) -> Result<&Frame, PosterError> {
        let trimmed = name.trim();
        let stem = Path::new(trimmed)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(trimmed);

        self.frames
            .iter()
            .find(|frame| frame.name == trimmed)
            .or_else(|| self.frames.iter().find(|frame| frame.name == stem))
            .ok_or_else(|| {
                PosterError::FrameNotFound(format!("{}（可选：{}）", name, self.names().join(" / ")))
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.frames.iter().map(|frame| frame.name.as_str()).collect()
    }

    /// 默认边框为集合中的第一个。
    pub fn default_frame(&self) -> &Frame {
        &self.frames[0]
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
