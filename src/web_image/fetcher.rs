//! # 原始字节获取模块
//!
//! ## 设计思路
//!
//! 统一处理不同来源（URL / Data URL / 本地文件 / 嵌入资源）的原始字节获取，
//! 并在“尽可能早”的阶段执行体积校验，尽快失败，减少不必要的内存消耗。
//!
//! ## 实现思路
//!
//! - URL：`http://` / `https://`（大小写不敏感）走 HTTP GET，流式读取 + 首包/分块超时。
//! - Data URL：本地 Base64 解码，不产生 I/O。
//! - 文件：路径存在即读取全部字节。
//! - 其他：视为 `assembly:resourcePath` 嵌入资源定位符。
//!
//! 获取本身不可中断：取消只在缓存层丢弃结果，这里不感知 `FetchHandle`。

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;

use super::resources::ResourceRegistry;
use super::source::{PayloadOrigin, RawPayload, SourceKey, SourceKind};
use super::{ImageConfig, ImageError};

const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;

/// 原始字节获取器。
///
/// 持有复用的 HTTP 客户端与嵌入资源注册表，可在多个任务间共享。
pub struct RawFetcher {
    client: reqwest::Client,
    resources: Arc<ResourceRegistry>,
    config: ImageConfig,
}

impl RawFetcher {
    pub fn new(config: ImageConfig, resources: Arc<ResourceRegistry>) -> Result<Self, ImageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .build()
            .map_err(|e| ImageError::Network(format!("无法创建 HTTP 客户端：{}", e)))?;

        Ok(Self {
            client,
            resources,
            config,
        })
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    /// 按来源获取原始字节。
    pub async fn fetch(&self, key: &SourceKey) -> Result<RawPayload, ImageError> {
        match key.kind() {
            SourceKind::Network => self.fetch_url(key.as_str()).await,
            SourceKind::DataUrl => self.fetch_data_url(key.as_str()),
            SourceKind::Local => match tokio::fs::metadata(key.as_str()).await {
                Ok(metadata) if metadata.is_file() => {
                    self.fetch_file(key.as_str(), metadata.len()).await
                }
                _ => self.fetch_resource(key.as_str()),
            },
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<RawPayload, ImageError> {
        log::info!("🌐 开始下载图片 - URL: {}", redact_url_for_log(url));

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Network(format!(
                "HTTP {}: {}（{}）",
                status.as_u16(),
                status_message(status.as_u16()),
                redact_url_for_log(url)
            )));
        }

        let content_length = response.content_length();
        if let Some(size) = content_length {
            if size > self.config.max_file_size {
                return Err(too_large("文件过大", size, self.config.max_file_size));
            }
        }

        let initial_capacity = content_length
            .map(|len| len.min(self.config.max_file_size) as usize)
            .filter(|len| *len > 0)
            .unwrap_or(BUFFER_INITIAL_CAPACITY);
        let mut buffer = Vec::with_capacity(initial_capacity);
        let mut response = response;
        let mut received_first_chunk = false;

        loop {
            let read_timeout = if received_first_chunk {
                Duration::from_millis(self.config.stream_chunk_timeout_ms)
            } else {
                Duration::from_millis(self.config.stream_first_byte_timeout_ms)
            };

            let next_chunk = tokio::time::timeout(read_timeout, response.chunk())
                .await
                .map_err(|_| {
                    if received_first_chunk {
                        ImageError::Timeout("下载数据流读取超时".to_string())
                    } else {
                        ImageError::Timeout("下载首包超时".to_string())
                    }
                })?;

            let Some(chunk) =
                next_chunk.map_err(|e| ImageError::Network(format!("下载失败：{}", e)))?
            else {
                break;
            };

            received_first_chunk = true;

            if (buffer.len() + chunk.len()) as u64 > self.config.max_file_size {
                return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
            }
            buffer.extend_from_slice(&chunk);
        }

        log::debug!("✅ 下载完成 - {} bytes", buffer.len());

        Ok(RawPayload {
            bytes: Bytes::from(buffer),
            content_length,
            origin: PayloadOrigin::Network,
        })
    }

    fn fetch_data_url(&self, data: &str) -> Result<RawPayload, ImageError> {
        log::debug!("📝 开始解析 data URL");

        let marker = data
            .find(";base64,")
            .ok_or_else(|| ImageError::Decode("data URL 缺少 base64 标记".to_string()))?;
        let encoded = data[marker + 8..].trim();

        let estimated = (encoded.len() as u64).div_ceil(4).saturating_mul(3);
        if estimated > self.config.max_file_size {
            return Err(too_large(
                "Base64 预计解码体积过大",
                estimated,
                self.config.max_file_size,
            ));
        }

        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ImageError::Decode(format!("Base64 解码失败：{}", e)))?;

        Ok(RawPayload {
            bytes: Bytes::from(bytes),
            content_length: None,
            origin: PayloadOrigin::DataUrl,
        })
    }

    async fn fetch_file(&self, path: &str, size: u64) -> Result<RawPayload, ImageError> {
        log::info!("📁 开始读取本地图片 - 路径: {}", path);

        if size > self.config.max_file_size {
            return Err(too_large("文件过大", size, self.config.max_file_size));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ImageError::Io(format!("无法读取图片文件 {}：{}", path, e)))?;

        Ok(RawPayload {
            bytes: Bytes::from(bytes),
            content_length: Some(size),
            origin: PayloadOrigin::File,
        })
    }

    fn fetch_resource(&self, locator: &str) -> Result<RawPayload, ImageError> {
        log::info!("📦 读取嵌入资源 - {}", locator);

        let bytes = self
            .resources
            .resolve(locator, self.config.default_resource_assembly.as_deref())?;

        if bytes.len() as u64 > self.config.max_file_size {
            return Err(too_large(
                "嵌入资源过大",
                bytes.len() as u64,
                self.config.max_file_size,
            ));
        }

        Ok(RawPayload {
            content_length: Some(bytes.len() as u64),
            bytes,
            origin: PayloadOrigin::Resource,
        })
    }

    /// 统一映射 reqwest 错误到业务错误。
    fn map_reqwest_error(&self, e: reqwest::Error, url: &str) -> ImageError {
        let redacted = redact_url_for_log(url);
        let err_msg = e.to_string().replace(url, &redacted);

        if e.is_timeout() {
            ImageError::Timeout(format!("下载超时（{}秒）：{}", self.config.download_timeout, redacted))
        } else if e.is_connect() {
            ImageError::Network(format!("无法连接：{}", err_msg))
        } else {
            ImageError::Network(format!("请求失败：{}", err_msg))
        }
    }
}

fn too_large(what: &str, size: u64, limit: u64) -> ImageError {
    ImageError::ResourceLimit(format!(
        "{}：{:.2} MB（限制：{:.2} MB）",
        what,
        size as f64 / 1024.0 / 1024.0,
        limit as f64 / 1024.0 / 1024.0
    ))
}

/// 日志里只保留协议、主机、端口与路径，去掉查询串与片段。
pub(crate) fn redact_url_for_log(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return "<invalid-url>".to_string();
    };

    let host = parsed.host_str().unwrap_or("<unknown-host>");
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();

    format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path())
}

/// 常见 HTTP 状态码文案。
fn status_message(code: u16) -> &'static str {
    match code {
        404 => "未找到",
        403 => "访问被拒绝",
        500..=599 => "服务器错误",
        _ => "请求失败",
    }
}
