//! # 可播放图片
//!
//! ## 设计思路
//!
//! `PlayableImage` 是解码后可直接显示的单元：静态图持有一张表面；动图持有不可变的帧序列
//! 与一份可变播放状态（当前帧、累计时间、画布像素、表面）。
//! 播放状态只在渲染/更新线程的 `advance` 中修改，用 `Mutex` 包裹以便实例在多个绑定间共享。
//!
//! ## 合成
//!
//! 进入第 *i* 帧时合成一次（不是每个 tick 都合成）：
//! 1. 按上一帧的处置方式处理画布（保留 / 清除其矩形为透明背景 / 恢复到绘制它之前的快照）
//! 2. 若本帧处置方式为“恢复上一帧”，先保存快照
//! 3. 用本帧调色板与透明索引把增量画到画布
//! 4. 整幅上传到表面
//!
//! 画布直接以表面布局（BGRA、行 0 在底部）保存，上传时无需再转换。
//!
//! ## 计时
//!
//! `advance(elapsed)` 累加时间；累计值跨过当前帧时长时扣除该时长并进入下一帧（到末尾回绕到 0）。
//! 一次调用可跨过多帧，每个进入的帧各合成一次；超过整圈的部分按总时长取模直接跳过。
//! 总时长为 0 的序列每次调用前进一帧。

use std::io::Read;
use std::sync::Mutex;
use std::time::Duration;

use super::decode::{self, DecodedImage};
use super::gif::{AnimationData, DecodedFrame, Disposal};
use super::raster::RasterImage;
use super::surface::{Surface, SurfaceHost, SurfaceId};
use super::{ImageConfig, ImageError};

/// 解码后的可显示图片。
pub enum PlayableImage {
    Static(StaticImage),
    Animated(AnimatedImage),
}

impl std::fmt::Debug for PlayableImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (width, height) = self.dimensions();
        f.debug_struct("PlayableImage")
            .field("animated", &self.is_animated())
            .field("width", &width)
            .field("height", &height)
            .field("frames", &self.frame_count())
            .field("surface", &self.surface_id())
            .finish()
    }
}

impl PlayableImage {
    /// 由解码产物创建表面。须在渲染线程调用。
    pub fn from_decoded(decoded: DecodedImage, host: &dyn SurfaceHost) -> Result<Self, ImageError> {
        match decoded {
            DecodedImage::Static(raster) => StaticImage::new(raster, host).map(Self::Static),
            DecodedImage::Animated(animation) => {
                AnimatedImage::new(animation, host).map(Self::Animated)
            }
        }
    }

    /// 字节数组入口：同步解码并创建表面。
    pub fn from_bytes(
        bytes: &[u8],
        config: &ImageConfig,
        host: &dyn SurfaceHost,
    ) -> Result<Self, ImageError> {
        Self::from_decoded(decode::decode_bytes(bytes, config)?, host)
    }

    /// 流入口：同步读取、解码并创建表面。
    pub fn from_reader(
        reader: impl Read,
        config: &ImageConfig,
        host: &dyn SurfaceHost,
    ) -> Result<Self, ImageError> {
        Self::from_decoded(decode::decode_reader(reader, config)?, host)
    }

    /// 推进播放时钟；静态图为空操作。
    pub fn advance(&self, elapsed: Duration) {
        if let Self::Animated(animated) = self {
            animated.advance(elapsed);
        }
    }

    /// 以秒（宿主帧间隔浮点数）推进；负数与非有限值按 0 处理。
    pub fn advance_secs(&self, elapsed_secs: f32) {
        self.advance(Duration::try_from_secs_f32(elapsed_secs).unwrap_or_default());
    }

    pub fn surface_id(&self) -> SurfaceId {
        match self {
            Self::Static(image) => image.surface.id(),
            Self::Animated(image) => image.surface_id,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Static(image) => (image.width, image.height),
            Self::Animated(image) => (image.width, image.height),
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, Self::Animated(_))
    }

    pub fn frame_count(&self) -> usize {
        match self {
            Self::Static(_) => 1,
            Self::Animated(image) => image.frames.len(),
        }
    }

    pub fn current_index(&self) -> usize {
        match self {
            Self::Static(_) => 0,
            Self::Animated(image) => image.current_index(),
        }
    }

    pub fn accumulated(&self) -> Duration {
        match self {
            Self::Static(_) => Duration::ZERO,
            Self::Animated(image) => image.accumulated(),
        }
    }
}

/// 静态图：单张表面。
pub struct StaticImage {
    width: u32,
    height: u32,
    surface: Box<dyn Surface>,
}

impl StaticImage {
    fn new(raster: RasterImage, host: &dyn SurfaceHost) -> Result<Self, ImageError> {
        let surface = host.create_surface(raster.width, raster.height, &raster.pixels)?;
        log::debug!(
            "🖼️ 创建静态表面 #{} - {}x{}",
            surface.id().0,
            raster.width,
            raster.height
        );
        Ok(Self {
            width: raster.width,
            height: raster.height,
            surface,
        })
    }
}

/// 动图：不可变帧序列 + 播放状态。
pub struct AnimatedImage {
    width: u32,
    height: u32,
    frames: Vec<DecodedFrame>,
    total: Duration,
    surface_id: SurfaceId,
    playback: Mutex<Playback>,
}

struct Playback {
    current: usize,
    accumulated: Duration,
    canvas: Vec<u8>,
    snapshot: Vec<u8>,
    /// 最近一次绘制的帧待应用的处置。
    pending: Option<PendingDisposal>,
    surface: Box<dyn Surface>,
}

#[derive(Clone, Copy)]
struct PendingDisposal {
    disposal: Disposal,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
}

impl AnimatedImage {
    fn new(animation: AnimationData, host: &dyn SurfaceHost) -> Result<Self, ImageError> {
        let AnimationData {
            width,
            height,
            frames,
        } = animation;

        let canvas = vec![0u8; width as usize * height as usize * 4];
        let surface = host.create_surface(width, height, &canvas)?;
        let surface_id = surface.id();
        let total: Duration = frames.iter().map(|frame| frame.duration).sum();

        let mut playback = Playback {
            current: 0,
            accumulated: Duration::ZERO,
            snapshot: canvas.clone(),
            canvas,
            pending: None,
            surface,
        };

        if let Some(first) = frames.first() {
            if let Err(err) = playback.composite(first, width, height) {
                log::warn!("⚠️ 首帧合成失败，保留透明画布：{}", err);
            }
        }

        log::debug!(
            "🎞️ 创建动图表面 #{} - {}x{} 共 {} 帧，总时长 {:?}",
            surface_id.0,
            width,
            height,
            frames.len(),
            total
        );

        Ok(Self {
            width,
            height,
            frames,
            total,
            surface_id,
            playback: Mutex::new(playback),
        })
    }

    pub fn frames(&self) -> &[DecodedFrame] {
        &self.frames
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn current_index(&self) -> usize {
        self.playback.lock().map(|state| state.current).unwrap_or(0)
    }

    pub fn accumulated(&self) -> Duration {
        self.playback
            .lock()
            .map(|state| state.accumulated)
            .unwrap_or_default()
    }

    pub fn advance(&self, elapsed: Duration) {
        let count = self.frames.len();
        if count == 0 {
            return;
        }

        let Ok(mut state) = self.playback.lock() else {
            log::error!("❌ 动图播放状态锁已中毒，跳过本次推进");
            return;
        };

        if self.total.is_zero() {
            let next = (state.current + 1) % count;
            state.enter(next, &self.frames[next], self.width, self.height);
            return;
        }

        state.accumulated = state.accumulated.saturating_add(elapsed);
        if state.accumulated >= self.total {
            let remainder = state.accumulated.as_nanos() % self.total.as_nanos();
            state.accumulated = Duration::from_nanos(remainder as u64);
        }

        for _ in 0..count {
            let duration = self.frames[state.current].duration;
            if state.accumulated < duration {
                break;
            }
            state.accumulated -= duration;

            let next = (state.current + 1) % count;
            if !state.enter(next, &self.frames[next], self.width, self.height) {
                break;
            }
        }
    }
}

impl Playback {
    /// 进入新帧并合成；失败时上传当前画布、清零累计时间并返回 `false`。
    fn enter(&mut self, index: usize, frame: &DecodedFrame, width: u32, height: u32) -> bool {
        self.current = index;
        match self.composite(frame, width, height) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("⚠️ 第 {} 帧合成失败，沿用当前画布：{}", index, err);
                self.accumulated = Duration::ZERO;
                self.upload();
                false
            }
        }
    }

    fn composite(&mut self, frame: &DecodedFrame, width: u32, height: u32) -> Result<(), ImageError> {
        self.dispose_previous(width, height);
        validate_frame(frame)?;

        if frame.disposal == Disposal::RestorePrevious {
            self.snapshot.copy_from_slice(&self.canvas);
        }

        draw_frame(&mut self.canvas, frame, width, height);
        self.pending = Some(PendingDisposal {
            disposal: frame.disposal,
            left: frame.left,
            top: frame.top,
            width: frame.width,
            height: frame.height,
        });
        self.upload();
        Ok(())
    }

    fn dispose_previous(&mut self, width: u32, height: u32) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        match pending.disposal {
            Disposal::Keep => {}
            Disposal::RestoreBackground => {
                for_each_canvas_row(&pending, width, height, |row, x_start, x_end| {
                    self.canvas[row + x_start * 4..row + x_end * 4].fill(0);
                });
            }
            Disposal::RestorePrevious => self.canvas.copy_from_slice(&self.snapshot),
        }
    }

    fn upload(&mut self) {
        if let Err(err) = self.surface.upload(&self.canvas) {
            log::warn!("⚠️ 上传动图帧失败（表面 #{}）：{}", self.surface.id().0, err);
        }
    }
}

fn validate_frame(frame: &DecodedFrame) -> Result<(), ImageError> {
    let area = frame.width as usize * frame.height as usize;
    if frame.indices.len() > area {
        return Err(ImageError::Decode(format!(
            "帧数据长度 {} 超出帧尺寸 {}x{}",
            frame.indices.len(),
            frame.width,
            frame.height
        )));
    }

    let palette_len = frame.palette.len();
    let out_of_range = frame
        .indices
        .iter()
        .find(|&&index| Some(index) != frame.transparent && index as usize >= palette_len);
    if let Some(index) = out_of_range {
        return Err(ImageError::Decode(format!(
            "调色板索引越界：{}（调色板大小 {}）",
            index, palette_len
        )));
    }

    Ok(())
}

/// 把帧增量画到画布；超出画布的部分裁掉，数据不足时只画已有部分。
fn draw_frame(canvas: &mut [u8], frame: &DecodedFrame, width: u32, height: u32) {
    let frame_width = frame.width as usize;
    if frame_width == 0 {
        return;
    }

    for (y, row_indices) in frame.indices.chunks(frame_width).enumerate() {
        let canvas_y = frame.top as usize + y;
        if canvas_y >= height as usize {
            break;
        }
        let row = (height as usize - 1 - canvas_y) * width as usize * 4;

        for (x, &index) in row_indices.iter().enumerate() {
            let canvas_x = frame.left as usize + x;
            if canvas_x >= width as usize {
                break;
            }
            if Some(index) == frame.transparent {
                continue;
            }
            let [r, g, b] = frame.palette[index as usize];
            let offset = row + canvas_x * 4;
            canvas[offset..offset + 4].copy_from_slice(&[b, g, r, 255]);
        }
    }
}

/// 遍历矩形与画布相交的每一行，回调参数为（行起始偏移, 起始列, 结束列）。
fn for_each_canvas_row(
    rect: &PendingDisposal,
    width: u32,
    height: u32,
    mut apply: impl FnMut(usize, usize, usize),
) {
    let x_start = (rect.left as usize).min(width as usize);
    let x_end = (rect.left as usize + rect.width as usize).min(width as usize);
    let y_start = (rect.top as usize).min(height as usize);
    let y_end = (rect.top as usize + rect.height as usize).min(height as usize);
    if x_start >= x_end {
        return;
    }

    for canvas_y in y_start..y_end {
        let row = (height as usize - 1 - canvas_y) * width as usize * 4;
        apply(row, x_start, x_end);
    }
}
