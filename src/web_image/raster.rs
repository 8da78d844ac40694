//! # 静态位图解码
//!
//! ## 设计思路
//!
//! 将“字节 → 图像 → 表面像素”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先做尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 猜测格式并读取 header 尺寸
//! 2. 按像素/内存上限快速拒绝
//! 3. 完整解码
//! 4. 超过纹理单边上限时降采样
//! 5. 垂直翻转（表面行 0 在底部）+ RGBA → BGRA

use fast_image_resize as fr;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba, RgbaImage};
use std::io::Cursor;

use super::config::ResizeFilter;
use super::{ImageConfig, ImageError};

/// 静态图解码结果：表面布局（BGRA、自下而上）的像素。
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// 将压缩位图字节解码为表面像素。
pub(crate) fn decode(bytes: &[u8], config: &ImageConfig) -> Result<RasterImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::Decode("图片内容为空".to_string()));
    }

    let format = image::guess_format(bytes)
        .map_err(|e| ImageError::Decode(format!("不支持的图片格式：{}", e)))?;

    let (header_width, header_height) = inspect_dimensions_from_memory(bytes)?;
    validate_pixel_limits(config, header_width, header_height)?;
    validate_decoded_memory_limits(config, header_width, header_height)?;

    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::Decode(format!("图片解码失败：{}", e)))?;

    let (raw_width, raw_height) = decoded.dimensions();
    validate_pixel_limits(config, raw_width, raw_height)?;

    let rgba = maybe_downscale(decoded, config.max_texture_dimension, config.resize_filter)?;
    let (width, height) = rgba.dimensions();

    log::info!(
        "✅ 静态图解码成功 - 格式: {:?} 原始尺寸: {}x{} 输出尺寸: {}x{}",
        format,
        raw_width,
        raw_height,
        width,
        height
    );

    Ok(RasterImage {
        width,
        height,
        pixels: to_surface_layout(rgba),
    })
}

/// 仅通过内存中的图片头信息读取宽高。
fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::Decode(format!("无法识别图片格式：{}", e)))?
        .into_dimensions()
        .map_err(|e| ImageError::Decode(format!("无法读取图片尺寸：{}", e)))
}

fn validate_pixel_limits(config: &ImageConfig, width: u32, height: u32) -> Result<(), ImageError> {
    let pixels = width as u64 * height as u64;

    if pixels > config.max_decoded_pixels {
        return Err(ImageError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    Ok(())
}

fn validate_decoded_memory_limits(
    config: &ImageConfig,
    width: u32,
    height: u32,
) -> Result<(), ImageError> {
    let estimated = width as u64 * height as u64 * 4;

    if estimated > config.max_decoded_bytes {
        return Err(ImageError::ResourceLimit(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            config.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

/// 单边超过纹理上限时等比缩小，否则原样转为 RGBA。
fn maybe_downscale(
    image: DynamicImage,
    max_dimension: u32,
    filter: ResizeFilter,
) -> Result<RgbaImage, ImageError> {
    let (width, height) = image.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return Ok(image.into_rgba8());
    }

    let scale = (max_dimension as f64 / width as f64).min(max_dimension as f64 / height as f64);
    let target_width = ((width as f64 * scale).floor() as u32).clamp(1, max_dimension);
    let target_height = ((height as f64 * scale).floor() as u32).clamp(1, max_dimension);

    log::info!(
        "🧩 纹理降采样：{}x{} -> {}x{}（filter={:?}）",
        width,
        height,
        target_width,
        target_height,
        filter
    );

    match resize_with_fast_image_resize(&image, target_width, target_height, filter) {
        Ok(resized) => Ok(resized),
        Err(err) => {
            log::warn!("⚠️ fast_image_resize 降采样失败，回退 image::resize_exact：{}", err);
            Ok(image
                .resize_exact(target_width, target_height, filter.to_image_filter())
                .into_rgba8())
        }
    }
}

fn resize_with_fast_image_resize(
    image: &DynamicImage,
    target_width: u32,
    target_height: u32,
    filter: ResizeFilter,
) -> Result<RgbaImage, ImageError> {
    let src = image.to_rgba8();
    let (src_width, src_height) = src.dimensions();

    let src_image =
        fr::images::Image::from_vec_u8(src_width, src_height, src.into_raw(), fr::PixelType::U8x4)
            .map_err(|e| ImageError::Decode(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(filter.to_fast_filter()));

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| ImageError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

    ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(target_width, target_height, dst_image.into_vec())
        .ok_or_else(|| ImageError::Decode("fast_image_resize 输出缓冲长度异常".to_string()))
}

/// 垂直翻转并把 RGBA 重排为 BGRA。
fn to_surface_layout(mut rgba: RgbaImage) -> Vec<u8> {
    image::imageops::flip_vertical_in_place(&mut rgba);
    let mut pixels = rgba.into_raw();
    for pixel in pixels.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
    pixels
}
