//! # 场景生成模块
//!
//! ## 设计思路
//!
//! `SceneGenerator` 只负责“提示词 → 可获取引用”，不负责下载；下载由 `SceneFetcher` 完成，
//! 两者可独立失败，错误分别归入生成阶段与获取阶段。
//!
//! ## 实现思路
//!
//! - 默认实现对接 OpenAI 兼容的 `POST {base}/images/generations`。
//! - 每次缓存未命中只发一次请求（`n = 1`），失败不自动重试。
//! - 空提示词原样发送，由接口决定是否接受。
//! - 响应优先取 `data[0].url`，其次取内联的 `data[0].b64_json`。

use std::future::Future;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, GenerationResult, PosterConfig, PosterError, SceneReference};

/// 文生图接口抽象。
pub trait SceneGenerator {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<GenerationResult, PosterError>> + Send;
}

#[derive(Debug, Serialize)]
struct ImagesGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    quality: &'a str,
    size: String,
}

#[derive(Debug, Deserialize)]
struct ImagesGenerateResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// OpenAI 兼容的场景生成器。
#[derive(Clone)]
pub struct OpenAiSceneGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiSceneGenerator {
    /// 使用已解析好的 API 凭据创建生成器。
    pub fn new(api_key: impl Into<String>, config: &PosterConfig) -> Result<Self, PosterError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(PosterError::InvalidFormat("API 凭据不能为空".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .build()
            .map_err(|e| PosterError::InvalidFormat(format!("无法创建 HTTP 客户端：{}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.base_url)
    }

    /// 尽量从错误响应体中提取接口给出的原因。
    fn api_error_message(body: &[u8]) -> String {
        if let Ok(parsed) = serde_json::from_slice::<ApiErrorBody>(body) {
            return parsed.error.message;
        }

        let text = String::from_utf8_lossy(body);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            "接口未返回错误详情".to_string()
        } else {
            trimmed.chars().take(300).collect()
        }
    }

    fn parse_response(body: &[u8]) -> Result<GenerationResult, PosterError> {
        let parsed: ImagesGenerateResponse = serde_json::from_slice(body)
            .map_err(|e| PosterError::Generation(format!("响应解析失败：{}", e)))?;

        let first = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| PosterError::Generation("响应中没有生成结果".to_string()))?;

        let reference = match (first.url, first.b64_json) {
            (Some(url), _) if !url.trim().is_empty() => SceneReference::Url(url),
            (_, Some(b64)) if !b64.trim().is_empty() => SceneReference::Base64(b64),
            _ => {
                return Err(PosterError::Generation(
                    "响应缺少 url 与 b64_json".to_string(),
                ));
            }
        };

        Ok(GenerationResult {
            reference,
            revised_prompt: first.revised_prompt,
        })
    }
}

impl SceneGenerator for OpenAiSceneGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, PosterError> {
        let payload = ImagesGenerateRequest {
            model: &self.model,
            prompt: request.prompt(),
            n: request.count(),
            quality: request.quality().as_str(),
            size: request.size().as_api_size(),
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| PosterError::Generation(format!("请求序列化失败：{}", e)))?;

        log::info!(
            "🎨 发起场景生成请求 - model={} size={} quality={} prompt_chars={}",
            payload.model,
            payload.size,
            payload.quality,
            request.prompt().chars().count()
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PosterError::Generation("生成请求超时".to_string())
                } else {
                    PosterError::Generation(format!("请求发送失败：{}", e.without_url()))
                }
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PosterError::Generation(format!("读取响应失败：{}", e.without_url())))?;

        if !status.is_success() {
            return Err(PosterError::Generation(format!(
                "HTTP {}: {}",
                status.as_u16(),
                Self::api_error_message(&body)
            )));
        }

        let result = Self::parse_response(&body)?;
        if let Some(revised) = result.revised_prompt.as_deref() {
            log::debug!("📝 接口改写后的提示词：{}", revised);
        }
        log::info!(
            "✅ 场景生成完成 - 引用类型: {}",
            match result.reference {
                SceneReference::Url(_) => "url",
                SceneReference::Base64(_) => "b64_json",
            }
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poster::{CanvasSize, GenerationQuality};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// 启动一次性 HTTP 服务，返回 (base_url, 收到的请求文本)。
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
        let addr = listener.local_addr().expect("read local addr failed");

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept failed");

            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).expect("read request failed");
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .and_then(|v| v.trim().parse::<usize>().ok())
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream
                .write_all(response.as_bytes())
                .expect("write response failed");
            stream.flush().expect("flush failed");

            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://127.0.0.1:{}/v1", addr.port()), server)
    }

    fn generator_for(base_url: String) -> OpenAiSceneGenerator {
        let mut config = PosterConfig::default();
        config.api_base_url = base_url;
        OpenAiSceneGenerator::new("sk-test", &config).expect("generator init failed")
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest::new(prompt, CanvasSize::new(1024, 1024), GenerationQuality::Hd)
    }

    #[tokio::test]
    async fn generate_sends_single_image_request_and_returns_url() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"created":1,"data":[{"url":"https://images.example.com/scene.png?sig=abc","revised_prompt":"a sunset beach"}]}"#,
        );

        let result = generator_for(base_url)
            .generate(&request("sunset beach"))
            .await
            .expect("generate should succeed");
        let raw_request = server.join().expect("server thread failed");

        assert_eq!(
            result.reference,
            SceneReference::Url("https://images.example.com/scene.png?sig=abc".to_string())
        );
        assert_eq!(result.revised_prompt.as_deref(), Some("a sunset beach"));
        assert!(raw_request.starts_with("POST /v1/images/generations"));
        assert!(raw_request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(raw_request.contains(r#""n":1"#));
        assert!(raw_request.contains(r#""size":"1024x1024""#));
        assert!(raw_request.contains(r#""quality":"hd""#));
        assert!(raw_request.contains(r#""model":"dall-e-3""#));
    }

    #[tokio::test]
    async fn generate_accepts_inline_base64_and_empty_prompt() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"data":[{"b64_json":"iVBORw0KGgo="}]}"#,
        );

        let result = generator_for(base_url)
            .generate(&request(""))
            .await
            .expect("empty prompt should be sent as-is");
        let raw_request = server.join().expect("server thread failed");

        assert_eq!(result.reference, SceneReference::Base64("iVBORw0KGgo=".to_string()));
        assert!(raw_request.contains(r#""prompt":"""#));
    }

    #[tokio::test]
    async fn generate_surfaces_api_error_message() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 400 Bad Request",
            r#"{"error":{"message":"Your request was rejected by the safety system.","type":"invalid_request_error"}}"#,
        );

        let result = generator_for(base_url).generate(&request("bad")).await;
        server.join().expect("server thread failed");

        match result {
            Err(PosterError::Generation(message)) => {
                assert!(message.contains("HTTP 400"));
                assert!(message.contains("safety system"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn generate_reports_unreachable_endpoint_as_generation_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind failed");
        let port = listener.local_addr().expect("addr failed").port();
        drop(listener);

        let result = generator_for(format!("http://127.0.0.1:{}/v1", port))
            .generate(&request("sunset beach"))
            .await;

        assert!(matches!(result, Err(PosterError::Generation(_))));
    }

    #[test]
    fn parse_response_rejects_empty_data() {
        let result = OpenAiSceneGenerator::parse_response(br#"{"data":[]}"#);
        assert!(matches!(result, Err(PosterError::Generation(_))));

        let result = OpenAiSceneGenerator::parse_response(br#"{"data":[{}]}"#);
        assert!(matches!(result, Err(PosterError::Generation(_))));
    }

    #[test]
    fn new_rejects_blank_credential() {
        let result = OpenAiSceneGenerator::new("  ", &PosterConfig::default());
        assert!(matches!(result, Err(PosterError::InvalidFormat(_))));
    }
}
