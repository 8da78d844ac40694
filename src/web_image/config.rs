//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ImageConfig`，保证运行时行为可观测、可调整、可测试。
//! 字段覆盖下载、解码、纹理尺寸与缓存容量四个方面。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的配置。
//! - 支持从 JSON 读取（缺省字段回落到默认值），便于宿主随插件配置一起下发。
//! - `validate` 在构建缓存前做范围检查，越界直接返回 `Configuration` 错误。

use std::num::NonZeroUsize;
use std::path::Path;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use super::ImageError;

/// 静态图降采样滤镜。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    pub(crate) fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }

    pub(crate) fn to_fast_filter(self) -> fast_image_resize::FilterType {
        match self {
            Self::Nearest => fast_image_resize::FilterType::Box,
            Self::Triangle => fast_image_resize::FilterType::Bilinear,
            Self::CatmullRom => fast_image_resize::FilterType::CatmullRom,
            Self::Lanczos3 => fast_image_resize::FilterType::Lanczos3,
        }
    }
}

/// 图片获取与解码配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// 下载/读取原始字节时允许的最大体积（字节）。
    pub max_file_size: u64,
    /// 网络请求总超时（秒）。
    pub download_timeout: u64,
    /// 建立连接（TCP/TLS）超时（秒）。
    pub connect_timeout: u64,
    /// 下载首包超时（毫秒）。
    pub stream_first_byte_timeout_ms: u64,
    /// 下载分块读取超时（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 解码后的像素上限（`width * height`），动图按画布计算。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（字节）。
    pub max_decoded_bytes: u64,
    /// 静态图上传前的单边最大尺寸，超出则等比降采样。
    pub max_texture_dimension: u32,
    /// 降采样滤镜。
    pub resize_filter: ResizeFilter,
    /// 裸资源路径（不含 `assembly:` 前缀）默认解析到的程序集。
    ///
    /// 为空时取路径首个 `.` 之前的部分作为程序集名。
    pub default_resource_assembly: Option<String>,
    /// 缓存条目上限；`None` 表示进程生命周期内永不淘汰。
    pub cache_capacity: Option<NonZeroUsize>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            download_timeout: 30,
            connect_timeout: 8,
            stream_first_byte_timeout_ms: 10_000,
            stream_chunk_timeout_ms: 15_000,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
            max_texture_dimension: 4096,
            resize_filter: ResizeFilter::Triangle,
            default_resource_assembly: None,
            cache_capacity: None,
        }
    }
}

impl ImageConfig {
    /// 从 JSON 文本解析配置，缺省字段使用默认值。
    ///
    /// # 示例
    /// ```rust
    /// use web_image::ImageConfig;
    ///
    /// let config = ImageConfig::from_json_str(r#"{ "max_texture_dimension": 2048 }"#)?;
    /// assert_eq!(config.max_texture_dimension, 2048);
    /// # Ok::<(), web_image::ImageError>(())
    /// ```
    pub fn from_json_str(text: &str) -> Result<Self, ImageError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ImageError::Configuration(format!("解析配置失败：{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件读取配置。
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ImageError::Configuration(format!("无法读取配置文件 {}：{}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// 范围检查。
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.max_file_size == 0 {
            return Err(ImageError::Configuration("max_file_size 不能为 0".to_string()));
        }
        if !(1..=600).contains(&self.download_timeout) {
            return Err(ImageError::Configuration(
                "download_timeout 必须在 1~600 秒之间".to_string(),
            ));
        }
        if !(1..=120).contains(&self.connect_timeout) {
            return Err(ImageError::Configuration(
                "connect_timeout 必须在 1~120 秒之间".to_string(),
            ));
        }
        if !(500..=120_000).contains(&self.stream_first_byte_timeout_ms) {
            return Err(ImageError::Configuration(
                "stream_first_byte_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if !(500..=120_000).contains(&self.stream_chunk_timeout_ms) {
            return Err(ImageError::Configuration(
                "stream_chunk_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if self.max_decoded_pixels == 0 {
            return Err(ImageError::Configuration("max_decoded_pixels 不能为 0".to_string()));
        }
        if self.max_decoded_bytes < 1024 * 1024 {
            return Err(ImageError::Configuration(
                "max_decoded_bytes 不能小于 1MB".to_string(),
            ));
        }
        if !(16..=16_384).contains(&self.max_texture_dimension) {
            return Err(ImageError::Configuration(
                "max_texture_dimension 必须在 16~16384 之间".to_string(),
            ));
        }
        if let Some(assembly) = &self.default_resource_assembly {
            if assembly.trim().is_empty() || assembly.contains(':') {
                return Err(ImageError::Configuration(format!(
                    "default_resource_assembly 无效：{:?}",
                    assembly
                )));
            }
        }

        Ok(())
    }
}
