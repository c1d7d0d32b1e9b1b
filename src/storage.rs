//! 海报输出目录管理模块
//!
//! # 设计思路
//!
//! 统一管理生成海报的持久化存储路径，并在目录不存在时自动创建。
//!
//! # 实现思路
//!
//! - 目录不存在时自动 `create_dir_all`，避免上层判断。
//! - 文件名使用本地时间戳（精确到纳秒），同一目录下连续保存不会互相覆盖。
//! - 所有可能失败的操作均返回 `Result`，不使用 `expect()` / `unwrap()`。

use chrono::Local;
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// 输出目录信息
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub path: String,
    pub total_size: u64,
    pub file_count: u64,
}

/// 确保输出目录存在并返回其路径
///
/// # 返回
/// - `Ok(PathBuf)` — 可用的输出目录
/// - `Err(AppError::Storage)` — 无法创建目录
pub fn resolve_output_dir(dir: &Path) -> Result<PathBuf, AppError> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .map_err(|e| AppError::Storage(format!("创建输出目录 '{}' 失败: {}", dir.display(), e)))?;
    }
    Ok(dir.to_path_buf())
}

/// 以 PNG 保存海报，返回写入的文件路径。
///
/// `label` 会作为文件名的一部分（例如边框名），便于区分同一次运行的多张输出。
pub fn save_poster(dir: &Path, poster: &DynamicImage, label: &str) -> Result<PathBuf, AppError> {
    let dir = resolve_output_dir(dir)?;
    let timestamp = Local::now().format("%Y%m%d%H%M%S%f");
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let file_name = if label.is_empty() {
        format!("poster_{}.png", timestamp)
    } else {
        format!("poster_{}_{}.png", timestamp, label)
    };
    let file_path = dir.join(file_name);

    poster
        .save_with_format(&file_path, ImageFormat::Png)
        .map_err(|e| AppError::Storage(format!("保存海报失败: {}", e)))?;

    log::info!("💾 海报已保存: {}", file_path.display());
    Ok(file_path)
}

/// 获取输出目录信息（路径 + 占用大小 + 文件数）
pub fn output_dir_info(dir: &Path) -> Result<StorageInfo, AppError> {
    let dir = resolve_output_dir(dir)?;
    let mut total_size: u64 = 0;
    let mut file_count: u64 = 0;

    if let Ok(entries) = fs::read_dir(&dir) {
        for entry in entries.flatten() {
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    total_size += metadata.len();
                    file_count += 1;
                }
            }
        }
    }

    Ok(StorageInfo {
        path: dir.to_string_lossy().to_string(),
        total_size,
        file_count,
    })
}
