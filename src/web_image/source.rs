//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入”与“流水线中间结果”解耦：
//! - `SourceKey` 表示规范化后的来源，同时是缓存键
//! - `RawPayload` 表示已获取但未解码的字节
//! - `FetchHandle` 表示单次请求的取消令牌（只抑制回调，不中断底层获取）

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

use super::ImageError;
use super::fetcher::redact_url_for_log;

/// 来源类别（按字符串形态判断，文件/资源的区分延迟到获取阶段）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// `http://` / `https://`（大小写不敏感）。
    Network,
    /// `data:image/...;base64,...`。
    DataUrl,
    /// 文件路径，或 `assembly:resourcePath` 嵌入资源定位符。
    Local,
}

/// 规范化来源标识，缓存身份。
///
/// 相等的 `SourceKey` 必须解析到同一个缓存的 `PlayableImage`。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    key: Arc<str>,
    kind: SourceKind,
}

impl SourceKey {
    /// 解析并规范化来源。
    ///
    /// 网络地址经 URL 解析后输出（协议与主机小写化），其他来源仅去除首尾空白。
    ///
    /// # 示例
    /// ```rust
    /// use web_image::{SourceKey, SourceKind};
    ///
    /// let key = SourceKey::parse("  HTTPS://Example.com/a.png ")?;
    /// assert_eq!(key.as_str(), "https://example.com/a.png");
    /// assert_eq!(key.kind(), SourceKind::Network);
    /// # Ok::<(), web_image::ImageError>(())
    /// ```
    pub fn parse(raw: &str) -> Result<Self, ImageError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ImageError::Configuration("图片来源不能为空".to_string()));
        }

        if is_network_source(trimmed) {
            let normalized = reqwest::Url::parse(trimmed)
                .map(|url| url.to_string())
                .unwrap_or_else(|_| trimmed.to_string());
            return Ok(Self {
                key: Arc::from(normalized),
                kind: SourceKind::Network,
            });
        }

        let kind = if is_data_url(trimmed) {
            SourceKind::DataUrl
        } else {
            SourceKind::Local
        };

        Ok(Self {
            key: Arc::from(trimmed),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SourceKind::Network => f.write_str(&redact_url_for_log(&self.key)),
            SourceKind::DataUrl => write!(f, "<data-url {} bytes>", self.key.len()),
            SourceKind::Local => f.write_str(&self.key),
        }
    }
}

fn is_network_source(text: &str) -> bool {
    starts_with_ignore_case(text, "http://") || starts_with_ignore_case(text, "https://")
}

fn is_data_url(text: &str) -> bool {
    starts_with_ignore_case(text, "data:")
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// 原始字节实际来自哪里（用于日志与诊断）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadOrigin {
    Network,
    DataUrl,
    File,
    Resource,
}

impl PayloadOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::DataUrl => "data-url",
            Self::File => "file",
            Self::Resource => "resource",
        }
    }
}

/// 获取阶段输出：不可变原始字节与来源元数据，解码后即丢弃。
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub bytes: Bytes,
    /// 响应头声明的长度（仅网络来源可能有）。
    pub content_length: Option<u64>,
    pub origin: PayloadOrigin,
}

impl RawPayload {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// 单次请求的取消令牌，只能取消一次。
///
/// 克隆共享同一个标志。取消只抑制该请求的回调投递，
/// 不会中断同一来源上被其他请求共享的获取任务。
#[derive(Debug, Clone, Default)]
pub struct FetchHandle {
    cancelled: Arc<AtomicBool>,
}

impl FetchHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取消；仅首次调用返回 `true`。
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 两个句柄是否指向同一次请求。
    pub fn same_request(&self, other: &FetchHandle) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}
