//! # 网络图片模块（web_image）
//!
//! ## 设计思路
//!
//! 将“来源识别 → 原始字节获取 → 格式分类解码 → 表面创建与缓存 → 动图播放”
//! 按职责拆分为多个子模块，避免单文件膨胀与耦合。
//!
//! - `binding`：面向界面组件的薄适配（设置来源、加载状态、逐帧推进）
//! - `cache`：单飞缓存，后台任务与渲染线程之间的完成回传
//! - `playable`：可播放图片（静态 / 动图），帧合成与计时
//! - `decode`：动图探测与静态回退，字节/流两种入口
//! - `gif`：基于 gif crate 的拆帧（不合成）
//! - `raster`：静态位图解码、降采样、表面像素布局
//! - `fetcher` + `resources`：URL / Data URL / 文件 / 嵌入资源的字节获取
//! - `surface`：宿主 GPU 表面接口
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! DisplayBinding::set_source
//!    ↓
//! ImageCache::request ──命中──→ on_success（同步）
//!    ↓ 未命中 / 已有同源任务则挂上去
//! tokio 任务：RawFetcher::fetch → spawn_blocking(decode_bytes)
//!    ↓ 完成结果入队
//! ImageCache::pump（渲染线程）
//!    ├─ PlayableImage::from_decoded（创建表面）
//!    ├─ 写入缓存
//!    └─ 通知未取消的监听者
//!    ↓
//! DisplayBinding::tick → PlayableImage::advance
//! ```

mod binding;
mod cache;
mod config;
mod decode;
mod error;
mod fetcher;
mod gif;
mod playable;
mod raster;
mod resources;
mod source;
mod surface;

pub use binding::DisplayBinding;
pub use cache::{CacheStats, ImageCache};
pub use config::{ImageConfig, ResizeFilter};
pub use decode::{DecodedImage, decode_bytes, decode_reader};
pub use error::ImageError;
pub use fetcher::RawFetcher;
pub use self::gif::{AnimationData, DecodedFrame, Disposal, Palette};
pub use playable::{AnimatedImage, PlayableImage, StaticImage};
pub use raster::RasterImage;
pub use resources::ResourceRegistry;
pub use source::{FetchHandle, PayloadOrigin, RawPayload, SourceKey, SourceKind};
pub use surface::{MemorySurface, MemorySurfaceHost, Surface, SurfaceHost, SurfaceId};
