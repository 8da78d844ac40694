//! # GIF 拆帧
//!
//! ## 设计思路
//!
//! 只做“拆帧”，不做合成：每帧保留调色板索引形式的局部增量、所在矩形、
//! 时长与处置方式，合成交给 `playable` 在渲染线程按需完成。
//! 这样解码可以放在后台线程执行，且解码产物是纯数据（`Send`）。
//!
//! ## 实现思路
//!
//! 1. `gif` crate 以索引模式读取（`ColorOutput::Indexed`），容器解析、LZW 与去隔行都由它完成
//! 2. 读完逻辑屏幕后先做像素/内存预估检查
//! 3. 逐帧映射为 `DecodedFrame`，帧无局部调色板时回退全局调色板
//! 4. 已解出至少一帧后遇到截断，保留已解出的帧

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use gif::{ColorOutput, DecodeOptions, DisposalMethod};

use super::{ImageConfig, ImageError};

/// RGB 调色板，全局调色板在帧之间共享。
pub type Palette = Arc<[[u8; 3]]>;

/// 绘制下一帧之前如何处理本帧占用的区域。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// 保留（含未指定）。
    Keep,
    /// 将本帧矩形清为背景（透明）。
    RestoreBackground,
    /// 恢复到绘制本帧之前的画布。
    RestorePrevious,
}

impl From<DisposalMethod> for Disposal {
    fn from(method: DisposalMethod) -> Self {
        match method {
            DisposalMethod::Background => Self::RestoreBackground,
            DisposalMethod::Previous => Self::RestorePrevious,
            _ => Self::Keep,
        }
    }
}

/// 单帧：相对画布的调色板索引增量，解码后不可变。
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    /// 行优先、自上而下的调色板索引，长度应为 `width * height`。
    pub indices: Vec<u8>,
    pub palette: Palette,
    pub transparent: Option<u8>,
    pub duration: Duration,
    pub disposal: Disposal,
}

/// 动图解码结果。
#[derive(Debug, Clone)]
pub struct AnimationData {
    pub width: u32,
    pub height: u32,
    pub frames: Vec<DecodedFrame>,
}

/// 通过文件签名探测是否为 GIF。
pub(crate) fn is_gif(bytes: &[u8]) -> bool {
    infer::image::is_gif(bytes)
}

/// 解析 GIF 字节为帧序列。
pub(crate) fn decode(bytes: &[u8], config: &ImageConfig) -> Result<AnimationData, ImageError> {
    let mut options = DecodeOptions::new();
    options.set_color_output(ColorOutput::Indexed);
    let mut decoder = options
        .read_info(Cursor::new(bytes))
        .map_err(|e| ImageError::Decode(format!("GIF 头解析失败：{}", e)))?;

    let width = u32::from(decoder.width());
    let height = u32::from(decoder.height());
    if width == 0 || height == 0 {
        return Err(ImageError::Decode(format!("GIF 画布尺寸非法：{}x{}", width, height)));
    }

    let canvas_pixels = width as u64 * height as u64;
    if canvas_pixels > config.max_decoded_pixels {
        return Err(ImageError::ResourceLimit(format!(
            "GIF 画布像素过大：{} 像素（限制：{} 像素）",
            canvas_pixels, config.max_decoded_pixels
        )));
    }

    // 画布 + 处置快照各一份 BGRA
    let mut decoded_bytes = canvas_pixels * 4 * 2;
    check_memory(decoded_bytes, config)?;

    let global_palette = decoder.global_palette().map(to_palette);

    let mut frames = Vec::new();
    loop {
        let frame = match decoder.read_next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) if !frames.is_empty() => {
                log::warn!("⚠️ GIF 数据截断或损坏，保留已解出的 {} 帧：{}", frames.len(), err);
                break;
            }
            Err(err) => return Err(ImageError::Decode(format!("GIF 帧解析失败：{}", err))),
        };

        let palette = frame
            .palette
            .as_deref()
            .map(to_palette)
            .or_else(|| global_palette.clone())
            .ok_or_else(|| ImageError::Decode("GIF 帧缺少调色板".to_string()))?;

        decoded_bytes = decoded_bytes.saturating_add(frame.buffer.len() as u64);
        check_memory(decoded_bytes, config)?;

        frames.push(DecodedFrame {
            left: u32::from(frame.left),
            top: u32::from(frame.top),
            width: u32::from(frame.width),
            height: u32::from(frame.height),
            indices: frame.buffer.to_vec(),
            palette,
            transparent: frame.transparent,
            duration: Duration::from_millis(u64::from(frame.delay) * 10),
            disposal: frame.dispose.into(),
        });
    }

    log::debug!("🎞️ GIF 解析完成 - {}x{} 共 {} 帧", width, height, frames.len());

    Ok(AnimationData {
        width,
        height,
        frames,
    })
}

fn to_palette(rgb: &[u8]) -> Palette {
    rgb.chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect::<Vec<_>>()
        .into()
}

fn check_memory(estimated: u64, config: &ImageConfig) -> Result<(), ImageError> {
    if estimated > config.max_decoded_bytes {
        return Err(ImageError::ResourceLimit(format!(
            "GIF 解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            config.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::{FrameSpec, GifBuilder};
    use super::*;
    use image::codecs::gif::{GifDecoder, GifEncoder};
    use image::{AnimationDecoder, Delay, Frame, ImageBuffer, Rgba};

    const PALETTE: [[u8; 3]; 4] = [[0, 0, 0], [255, 0, 0], [0, 255, 0], [0, 0, 255]];

    #[test]
    fn parses_frames_with_timing_and_disposal() {
        let mut second = FrameSpec::full(2, 2, 2, 25);
        second.left = 1;
        second.top = 1;
        second.disposal = 2;
        second.transparent = Some(0);

        let bytes = GifBuilder::new(4, 4)
            .global_palette(&PALETTE)
            .frame(FrameSpec::full(4, 4, 1, 10))
            .frame(second)
            .build();

        assert!(is_gif(&bytes));
        let anim = decode(&bytes, &ImageConfig::default()).expect("decode failed");

        assert_eq!((anim.width, anim.height), (4, 4));
        assert_eq!(anim.frames.len(), 2);
        assert_eq!(anim.frames[0].duration, Duration::from_millis(100));
        assert_eq!(anim.frames[0].disposal, Disposal::Keep);
        assert_eq!(anim.frames[0].indices, vec![1; 16]);

        let frame = &anim.frames[1];
        assert_eq!((frame.left, frame.top, frame.width, frame.height), (1, 1, 2, 2));
        assert_eq!(frame.duration, Duration::from_millis(250));
        assert_eq!(frame.disposal, Disposal::RestoreBackground);
        assert_eq!(frame.transparent, Some(0));
        assert_eq!(frame.palette[2], [0, 255, 0]);
    }

    #[test]
    fn local_palette_overrides_global() {
        let mut spec = FrameSpec::full(1, 1, 0, 5);
        spec.local_palette = Some(vec![[9, 8, 7], [1, 2, 3]]);

        let bytes = GifBuilder::new(1, 1).global_palette(&PALETTE).frame(spec).build();
        let anim = decode(&bytes, &ImageConfig::default()).expect("decode failed");

        assert_eq!(anim.frames[0].palette[0], [9, 8, 7]);
        assert_eq!(anim.frames[0].palette[1], [1, 2, 3]);
    }

    #[test]
    fn interlaced_rows_are_restored_top_down() {
        let (width, height) = (2u16, 10u16);
        let indices: Vec<u8> = (0..height).flat_map(|row| [row as u8, row as u8]).collect();
        let mut spec = FrameSpec::full(width, height, 0, 0);
        spec.indices = indices.clone();
        spec.interlaced = true;

        let palette: Vec<[u8; 3]> = (0..16).map(|i| [i, i, i]).collect();
        let bytes = GifBuilder::new(width, height).global_palette(&palette).frame(spec).build();
        let anim = decode(&bytes, &ImageConfig::default()).expect("decode failed");

        assert_eq!(anim.frames[0].indices, indices);
    }

    #[test]
    fn truncated_stream_keeps_decoded_frames() {
        let mut bytes = GifBuilder::new(2, 2)
            .global_palette(&PALETTE)
            .frame(FrameSpec::full(2, 2, 1, 10))
            .build();
        // 去掉结束符，接一个只有开头的图像描述符
        bytes.pop();
        bytes.extend_from_slice(&[0x2C, 0, 0]);

        let anim = decode(&bytes, &ImageConfig::default()).expect("decode failed");
        assert_eq!(anim.frames.len(), 1);
    }

    #[test]
    fn gif_without_frames_is_empty_sequence() {
        let bytes = GifBuilder::new(2, 2).global_palette(&PALETTE).build();
        let anim = decode(&bytes, &ImageConfig::default()).expect("decode failed");
        assert!(anim.frames.is_empty());
    }

    #[test]
    fn rejects_bad_header_and_zero_canvas() {
        assert!(matches!(
            decode(b"GIF88a\x01\x00\x01\x00\x00\x00\x00", &ImageConfig::default()),
            Err(ImageError::Decode(_))
        ));
        assert!(matches!(
            decode(b"GIF89a\x00\x00\x04\x00\x00\x00\x00\x3B", &ImageConfig::default()),
            Err(ImageError::Decode(_))
        ));
    }

    #[test]
    fn frame_without_any_palette_is_decode_error() {
        // 1x1 画布，无全局/局部调色板，LZW 最小码长 2：清除码、索引 0、结束码
        let bytes: &[u8] = &[
            b'G', b'I', b'F', b'8', b'9', b'a', 1, 0, 1, 0, 0, 0, 0, //
            0x2C, 0, 0, 0, 0, 1, 0, 1, 0, 0, //
            2, 2, 0x44, 0x01, 0, //
            0x3B,
        ];
        assert!(matches!(
            decode(bytes, &ImageConfig::default()),
            Err(ImageError::Decode(_))
        ));
    }

    #[test]
    fn oversized_canvas_hits_pixel_limit() {
        let mut config = ImageConfig::default();
        config.max_decoded_pixels = 100;

        let bytes = GifBuilder::new(20, 20).global_palette(&PALETTE).build();
        assert!(matches!(decode(&bytes, &config), Err(ImageError::ResourceLimit(_))));
    }

    #[test]
    fn frames_beyond_memory_budget_hit_resource_limit() {
        let mut config = ImageConfig::default();
        // 画布与快照 2 * 4 * 4 * 4 = 128 字节，再放不下第二帧的 16 个索引
        config.max_decoded_bytes = 128 + 16;

        let bytes = GifBuilder::new(4, 4)
            .global_palette(&PALETTE)
            .frame(FrameSpec::full(4, 4, 1, 10))
            .frame(FrameSpec::full(4, 4, 2, 10))
            .build();
        assert!(matches!(decode(&bytes, &config), Err(ImageError::ResourceLimit(_))));
    }

    #[test]
    fn unknown_extensions_are_skipped() {
        let bytes = GifBuilder::new(1, 1)
            .global_palette(&PALETTE)
            .extension(0xFF, b"abc")
            .frame(FrameSpec::full(1, 1, 3, 1))
            .build();

        let anim = decode(&bytes, &ImageConfig::default()).expect("decode failed");
        assert_eq!(anim.frames.len(), 1);
        assert_eq!(anim.frames[0].indices, vec![3]);
    }

    #[test]
    fn noisy_frame_indices_match_image_crate_pixels() {
        let (width, height) = (173u32, 131u32);
        let mut seed = 0x2545_F491u32;
        let noise = ImageBuffer::from_fn(width, height, |_, _| {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let v = seed >> 8;
            Rgba([(v & 0x7F) as u8 * 2, ((v >> 7) & 0x3) as u8 * 85, ((v >> 9) & 0x1) as u8 * 255, 255])
        });

        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder
                .encode_frames([Frame::from_parts(noise, 0, 0, Delay::from_numer_denom_ms(80, 1))])
                .expect("encode gif failed");
        }

        let anim = decode(&bytes, &ImageConfig::default()).expect("decode failed");
        let frame = &anim.frames[0];
        assert_eq!((frame.width, frame.height), (width, height));

        let reference = GifDecoder::new(std::io::Cursor::new(&bytes))
            .expect("open reference decoder failed")
            .into_frames()
            .collect_frames()
            .expect("reference decode failed");
        let expected = reference[0].buffer();

        let mut mismatches = 0;
        for (i, &index) in frame.indices.iter().enumerate() {
            if frame.transparent == Some(index) {
                continue;
            }
            let rgb = frame.palette[index as usize];
            let x = i as u32 % width;
            let y = i as u32 / width;
            let px = expected.get_pixel(x, y);
            if rgb != [px[0], px[1], px[2]] {
                mismatches += 1;
            }
        }
        assert_eq!(mismatches, 0);
    }
}
