//! # 格式分类与解码入口
//!
//! 先按 GIF 魔数探测动图，解析失败（头损坏、变体不支持等）回退静态位图解码。
//! 解码结果是纯 CPU 数据（`Send`），可在后台线程产生，再交给渲染线程创建表面。

use std::io::Read;

use super::gif::{self, AnimationData};
use super::raster::{self, RasterImage};
use super::{ImageConfig, ImageError};

/// 解码产物：在解码时一次性确定动图/静态，后续不再分派。
#[derive(Debug, Clone)]
pub enum DecodedImage {
    Static(RasterImage),
    Animated(AnimationData),
}

impl DecodedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Static(image) => (image.width, image.height),
            Self::Animated(animation) => (animation.width, animation.height),
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, Self::Animated(_))
    }

    pub fn frame_count(&self) -> usize {
        match self {
            Self::Static(_) => 1,
            Self::Animated(animation) => animation.frames.len(),
        }
    }
}

/// 字节数组解码入口。
pub fn decode_bytes(bytes: &[u8], config: &ImageConfig) -> Result<DecodedImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::Decode("图片内容为空".to_string()));
    }

    if gif::is_gif(bytes) {
        match gif::decode(bytes, config) {
            Ok(animation) => return Ok(DecodedImage::Animated(animation)),
            Err(err @ ImageError::ResourceLimit(_)) => return Err(err),
            Err(err) => {
                log::warn!("⚠️ GIF 解析失败，回退静态解码：{}", err);
            }
        }
    }

    raster::decode(bytes, config).map(DecodedImage::Static)
}

/// 流解码入口：读完整个流后按字节解码。
pub fn decode_reader(mut reader: impl Read, config: &ImageConfig) -> Result<DecodedImage, ImageError> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| ImageError::Io(format!("读取图片流失败：{}", e)))?;

    if bytes.len() as u64 > config.max_file_size {
        return Err(ImageError::ResourceLimit(format!(
            "图片流过大：{:.2} MB（限制：{:.2} MB）",
            bytes.len() as f64 / 1024.0 / 1024.0,
            config.max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    decode_bytes(&bytes, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web_image::gif::test_support::{FrameSpec, GifBuilder};
    use crate::web_image::raster::test_support::create_png_bytes;
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, Frame, ImageBuffer, Rgba};
    use std::io::Cursor;
    use std::time::Duration;

    fn encode_gif_with_image_crate() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder.set_repeat(Repeat::Infinite).expect("set repeat failed");
            let frames = [([255, 0, 0, 255], 100), ([0, 0, 255, 255], 200)].map(|(color, ms)| {
                let buffer = ImageBuffer::from_pixel(6, 4, Rgba(color));
                Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(ms, 1))
            });
            encoder.encode_frames(frames).expect("encode gif failed");
        }
        buf
    }

    #[test]
    fn png_without_gif_magic_decodes_as_static() {
        let decoded = decode_bytes(&create_png_bytes(5, 7), &ImageConfig::default())
            .expect("decode failed");

        assert!(!decoded.is_animated());
        assert_eq!(decoded.dimensions(), (5, 7));
        assert_eq!(decoded.frame_count(), 1);
    }

    #[test]
    fn gif_from_image_encoder_decodes_as_animation() {
        let decoded = decode_bytes(&encode_gif_with_image_crate(), &ImageConfig::default())
            .expect("decode failed");

        let DecodedImage::Animated(animation) = decoded else {
            panic!("expected animated image");
        };
        assert_eq!((animation.width, animation.height), (6, 4));
        assert_eq!(animation.frames.len(), 2);
        assert_eq!(animation.frames[0].duration, Duration::from_millis(100));
        assert_eq!(animation.frames[1].duration, Duration::from_millis(200));
        for frame in &animation.frames {
            assert_eq!(frame.indices.len(), (frame.width * frame.height) as usize);
        }
    }

    #[test]
    fn hand_built_gif_decodes_as_animation() {
        let bytes = GifBuilder::new(2, 2)
            .global_palette(&[[0, 0, 0], [255, 255, 255]])
            .frame(FrameSpec::full(2, 2, 1, 4))
            .build();

        let decoded = decode_bytes(&bytes, &ImageConfig::default()).expect("decode failed");
        assert!(decoded.is_animated());
        assert_eq!(decoded.frame_count(), 1);
    }

    #[test]
    fn malformed_payloads_are_decode_errors() {
        let config = ImageConfig::default();

        assert!(matches!(decode_bytes(&[], &config), Err(ImageError::Decode(_))));
        assert!(matches!(decode_bytes(&[0xDE, 0xAD, 0xBE, 0xEF], &config), Err(ImageError::Decode(_))));
        // 有 GIF 魔数但逻辑屏幕描述符被截断：GIF 与静态回退都失败
        assert!(matches!(decode_bytes(b"GIF89a\x01", &config), Err(ImageError::Decode(_))));
    }

    #[test]
    fn gif_resource_limit_is_not_masked_by_fallback() {
        let bytes = GifBuilder::new(64, 64)
            .global_palette(&[[0, 0, 0], [255, 255, 255]])
            .frame(FrameSpec::full(64, 64, 1, 4))
            .build();
        let mut config = ImageConfig::default();
        config.max_decoded_pixels = 100;

        assert!(matches!(decode_bytes(&bytes, &config), Err(ImageError::ResourceLimit(_))));
    }

    #[test]
    fn reader_entry_point_matches_bytes_entry_point() {
        let png = create_png_bytes(4, 3);
        let decoded = decode_reader(Cursor::new(png), &ImageConfig::default()).expect("decode failed");
        assert_eq!(decoded.dimensions(), (4, 3));
    }

    #[test]
    fn reader_rejects_streams_over_file_size_limit() {
        let png = create_png_bytes(32, 32);
        let mut config = ImageConfig::default();
        config.max_file_size = 16;

        assert!(matches!(
            decode_reader(Cursor::new(png), &config),
            Err(ImageError::ResourceLimit(_))
        ));
    }
}
