//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载“获取 → 解码 → 上传”链路中的所有错误来源。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! 失败回调只接收字符串原因（`onFailure(reason)`），
//! 因此 `From<ImageError> for String` 是链路边界上的唯一转换点。

/// 图片链路统一错误类型。
#[derive(Debug, Clone, thiserror::Error)]
pub enum ImageError {
    /// 传输失败或非 2xx 响应。
    #[error("网络错误：{0}")]
    Network(String),

    /// 本地文件或嵌入资源不存在。
    #[error("资源不存在：{0}")]
    NotFound(String),

    /// 本地读取失败。
    #[error("读取错误：{0}")]
    Io(String),

    /// 字节无法解码为图片（损坏、空载荷、不支持的编码）。
    #[error("解码错误：{0}")]
    Decode(String),

    /// 调用方参数非法（空来源、配置越界）。
    #[error("配置错误：{0}")]
    Configuration(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    /// 宿主 GPU 表面创建或上传失败。
    #[error("表面错误：{0}")]
    Surface(String),
}

impl ImageError {
    /// 稳定错误码，供日志与宿主侧分支使用。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "E_NETWORK",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Io(_) => "E_IO",
            Self::Decode(_) => "E_DECODE",
            Self::Configuration(_) => "E_CONFIG",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            Self::Surface(_) => "E_SURFACE",
        }
    }

    /// 出错所在阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Network(_) | Self::NotFound(_) | Self::Io(_) | Self::Timeout(_) => "fetch",
            Self::Decode(_) | Self::ResourceLimit(_) => "decode",
            Self::Surface(_) => "upload",
            Self::Configuration(_) => "config",
        }
    }
}

impl From<ImageError> for String {
    /// 失败回调使用的原因文本。
    fn from(error: ImageError) -> Self {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_report_fetch_stage() {
        for err in [
            ImageError::Network("x".into()),
            ImageError::NotFound("x".into()),
            ImageError::Io("x".into()),
            ImageError::Timeout("x".into()),
        ] {
            assert_eq!(err.stage(), "fetch");
        }
        assert_eq!(ImageError::Decode("x".into()).stage(), "decode");
        assert_eq!(ImageError::Configuration("x".into()).code(), "E_CONFIG");
    }

    #[test]
    fn reason_text_is_never_empty() {
        let reason: String = ImageError::Decode(String::new()).into();
        assert!(!reason.is_empty());
    }
}
