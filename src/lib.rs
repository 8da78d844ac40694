//! # 网络图片加载与动图播放：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              宿主（界面组件 + 渲染循环 + GPU）            │
//! │                                                          │
//! │  图片组件 ── DisplayBinding ── tick(elapsed)             │
//! │       │           │                                      │
//! │  SurfaceHost (create / upload / drop)                    │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕ set_source / on_success / on_failure / pump
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            核心 (Rust)                           │
//! │                                                          │
//! │  ┌─ cache ──────── ImageCache (单飞 + 完成回传)           │
//! │  │   └─ playable   PlayableImage (静态 / 动图播放)        │
//! │  │                                                       │
//! │  ├─ fetcher ────── HTTP / Data URL / 文件 / 嵌入资源      │
//! │  ├─ decode ─────── GIF 探测 → 静态回退                    │
//! │  │   ├─ gif        拆帧（调色板增量 + 时长 + 处置）        │
//! │  │   └─ raster     image 解码 · 降采样 · BGRA 翻转        │
//! │  └─ error/config   ImageError · ImageConfig              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`web_image`] | 图片获取、解码、缓存与动图播放的全部实现 |
//!
//! 常用类型在 crate 根部重新导出。

pub mod web_image;

pub use web_image::{
    AnimatedImage, AnimationData, CacheStats, DecodedFrame, DecodedImage, DisplayBinding,
    Disposal, FetchHandle, ImageCache, ImageConfig, ImageError, MemorySurfaceHost, PayloadOrigin,
    PlayableImage, RawFetcher, RawPayload, ResizeFilter, ResourceRegistry, SourceKey, SourceKind,
    StaticImage, Surface, SurfaceHost, SurfaceId, decode_bytes, decode_reader,
};
