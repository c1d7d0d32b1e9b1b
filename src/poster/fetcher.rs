//! # 场景获取模块
//!
//! ## 设计思路
//!
//! 将生成结果引用（URL / 内联 Base64）统一转换为原始图片字节，并在“尽可能早”的阶段执行输入校验。
//! 目标是尽快失败，减少不必要内存与 CPU 消耗。所有错误统一映射为 `PosterError::Fetch`。
//!
//! ## 实现思路
//!
//! - URL：协议校验 + 状态码 + 内容类型 + 体积校验 + 流式下载（首包 / 分块超时）+ 签名探测。
//! - Base64：格式解析 + 解码前体积估算 + 解码后签名校验。
//! - 不做自动重试，失败由用户重新触发。

use base64::{Engine as _, engine::general_purpose};
use std::future::Future;
use std::time::Duration;

use super::decode::detect_image_mime;
use super::{PosterConfig, PosterError, SceneReference};

const STREAM_SIGNATURE_SNIFF_BYTES: usize = 4096;
const BUFFER_INITIAL_CAPACITY: usize = 256 * 1024;

/// 场景图片获取抽象。
pub trait SceneFetcher {
    fn fetch(&self, reference: &SceneReference) -> impl Future<Output = Result<Vec<u8>, PosterError>> + Send;
}

/// 基于 reqwest 的场景获取器。
#[derive(Debug, Clone)]
pub struct HttpSceneFetcher {
    client: reqwest::Client,
    max_size: u64,
    first_byte_timeout: Duration,
    chunk_timeout: Duration,
}

impl HttpSceneFetcher {
    pub fn new(config: &PosterConfig) -> Result<Self, PosterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| PosterError::InvalidFormat(format!("无法创建 HTTP 客户端：{}", e)))?;

        Ok(Self {
            client,
            max_size: config.max_fetch_size,
            first_byte_timeout: Duration::from_millis(config.stream_first_byte_timeout_ms),
            chunk_timeout: Duration::from_millis(config.stream_chunk_timeout_ms),
        })
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>, PosterError> {
        log::info!("🌐 开始下载场景图片 - URL: {}", redact_url_for_log(url));

        let parsed = reqwest::Url::parse(url)
            .map_err(|e| PosterError::Fetch(format!("URL 格式错误：{}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PosterError::Fetch(format!("不支持的协议：{}", parsed.scheme())));
        }

        let mut response = self
            .client
            .get(parsed)
            .header(reqwest::header::ACCEPT, "image/png,image/webp,image/jpeg,image/*;q=0.8")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PosterError::Fetch("下载请求超时".to_string())
                } else {
                    PosterError::Fetch(format!("无法连接图片地址：{}", e.without_url()))
                }
            })?;

        if !response.status().is_success() {
            return Err(PosterError::Fetch(format!(
                "HTTP {}: {}",
                response.status().as_u16(),
                status_message(response.status().as_u16())
            )));
        }

        if let Some(ct) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            if let Ok(ct_str) = ct.to_str() {
                if !is_image_content_type(ct_str) {
                    return Err(PosterError::Fetch(format!("不是图片类型：{}", ct_str)));
                }
            }
        }

        let total_len = response.content_length();
        if let Some(size) = total_len {
            if size > self.max_size {
                return Err(PosterError::Fetch(format!(
                    "文件过大：{:.2} MB（限制：{:.2} MB）",
                    size as f64 / 1024.0 / 1024.0,
                    self.max_size as f64 / 1024.0 / 1024.0
                )));
            }
        }

        let initial_capacity = total_len
            .map(|len| len.min(self.max_size).min(usize::MAX as u64) as usize)
            .filter(|len| *len > 0)
            .unwrap_or(BUFFER_INITIAL_CAPACITY);
        let mut buffer = Vec::with_capacity(initial_capacity);
        let mut total: u64 = 0;
        let mut signature_validated = false;
        let mut received_first_chunk = false;

        loop {
            let read_timeout = if received_first_chunk {
                self.chunk_timeout
            } else {
                self.first_byte_timeout
            };

            let next_chunk = tokio::time::timeout(read_timeout, response.chunk())
                .await
                .map_err(|_| {
                    if received_first_chunk {
                        PosterError::Fetch("下载数据流读取超时".to_string())
                    } else {
                        PosterError::Fetch("下载首包超时".to_string())
                    }
                })?;

            let Some(chunk) = next_chunk
                .map_err(|e| PosterError::Fetch(format!("下载失败：{}", e.without_url())))?
            else {
                break;
            };

            received_first_chunk = true;
            total = total.saturating_add(chunk.len() as u64);
            if total > self.max_size {
                return Err(PosterError::Fetch("下载后文件超过大小限制".to_string()));
            }
            buffer.extend_from_slice(&chunk);

            if !signature_validated {
                signature_validated = validate_stream_signature_sniff(&buffer, STREAM_SIGNATURE_SNIFF_BYTES)?;
            }
        }

        if !signature_validated {
            detect_image_mime(&buffer).map_err(PosterError::Fetch)?;
        }

        log::debug!("✅ 下载完成 - {} bytes", total);
        Ok(buffer)
    }

    fn fetch_inline(&self, data: &str) -> Result<Vec<u8>, PosterError> {
        log::info!("📝 开始解析内联 base64 场景图片");

        let bytes = parse_base64_with_limit(data, self.max_size)?;
        detect_image_mime(&bytes).map_err(PosterError::Fetch)?;

        Ok(bytes)
    }
}

impl SceneFetcher for HttpSceneFetcher {
    async fn fetch(&self, reference: &SceneReference) -> Result<Vec<u8>, PosterError> {
        match reference {
            SceneReference::Url(url) => self.fetch_url(url).await,
            SceneReference::Base64(data) => self.fetch_inline(data),
        }
    }
}

/// 解析 Base64（兼容 `data:image/...;base64,` 前缀），解码前按长度估算体积。
pub(crate) fn parse_base64_with_limit(data: &str, max_size: u64) -> Result<Vec<u8>, PosterError> {
    let payload = match data.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    let estimated = (payload.len() as u64 / 4).saturating_mul(3);
    if estimated > max_size {
        return Err(PosterError::Fetch(format!(
            "Base64 解码后体积过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            max_size as f64 / 1024.0 / 1024.0
        )));
    }

    general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| PosterError::Fetch(format!("Base64 解码失败：{}", e)))
}

/// 流式下载阶段的签名探测：尽早识别并拒绝非图片内容。
///
/// 返回值：
/// - `Ok(true)`：已识别为图片，可视为完成签名校验
/// - `Ok(false)`：当前字节不足以判断，继续下载
/// - `Err(...)`：已识别为非图片，或达到探测上限仍无法识别
fn validate_stream_signature_sniff(bytes: &[u8], sniff_limit: usize) -> Result<bool, PosterError> {
    if bytes.is_empty() {
        return Ok(false);
    }

    if let Some(kind) = infer::get(bytes) {
        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(PosterError::Fetch(format!(
                "下载内容不是图片类型：{}",
                kind.mime_type()
            )));
        }
        return Ok(true);
    }

    if bytes.len() >= sniff_limit {
        return Err(PosterError::Fetch(format!(
            "下载前 {} 字节内无法识别图片类型",
            sniff_limit
        )));
    }

    Ok(false)
}

fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|base| base.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false)
}

fn status_message(code: u16) -> &'static str {
    match code {
        404 => "未找到",
        403 => "访问被拒绝（链接可能已过期）",
        500..=599 => "服务器错误",
        _ => "请求失败",
    }
}

/// 去掉查询串与片段，避免签名参数进入日志。
pub(crate) fn redact_url_for_log(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return "<invalid-url>".to_string();
    };

    let host = parsed.host_str().unwrap_or("<unknown-host>");
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();

    format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path())
}
