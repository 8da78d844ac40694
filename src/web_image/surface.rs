//! # 宿主 GPU 表面接口
//!
//! 核心只依赖三个宿主能力：按宽高与像素创建表面、向已有表面上传像素、释放表面。
//! 释放对应 `Drop`。
//!
//! 像素约定：BGRA8（内存字节序 B、G、R、A），行 0 为图像最底部一行。
//! 解码侧负责翻转与通道重排，宿主直接整块上传即可。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::ImageError;

/// 宿主分配的表面标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// 可显示表面（纹理/精灵等）。
pub trait Surface: Send + Sync {
    fn id(&self) -> SurfaceId;

    /// 上传整幅像素，长度为 `width * height * 4`。
    fn upload(&mut self, pixels: &[u8]) -> Result<(), ImageError>;
}

/// 宿主窗口/GPU 层。
pub trait SurfaceHost: Send + Sync {
    fn create_surface(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Box<dyn Surface>, ImageError>;
}

/// 纯内存宿主：无 GPU 环境（测试、诊断工具）下使用。
///
/// 记录创建/释放次数，并允许读取任一存活表面的最新像素。
#[derive(Debug, Default)]
pub struct MemorySurfaceHost {
    next_id: AtomicU64,
    created: AtomicUsize,
    disposed: Arc<AtomicUsize>,
    live: Mutex<HashMap<SurfaceId, Weak<Mutex<Vec<u8>>>>>,
}

impl MemorySurfaceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    /// 读取存活表面的当前像素；已释放返回 `None`。
    pub fn pixels(&self, id: SurfaceId) -> Option<Vec<u8>> {
        let live = self.live.lock().ok()?;
        let pixels = live.get(&id)?.upgrade()?;
        let guard = pixels.lock().ok()?;
        Some(guard.clone())
    }
}

impl SurfaceHost for MemorySurfaceHost {
    fn create_surface(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Box<dyn Surface>, ImageError> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(ImageError::Surface(format!(
                "像素长度 {} 与尺寸 {}x{} 不符",
                pixels.len(),
                width,
                height
            )));
        }

        let id = SurfaceId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.created.fetch_add(1, Ordering::SeqCst);

        let pixels = Arc::new(Mutex::new(pixels.to_vec()));
        if let Ok(mut live) = self.live.lock() {
            live.retain(|_, weak| weak.strong_count() > 0);
            live.insert(id, Arc::downgrade(&pixels));
        }

        Ok(Box::new(MemorySurface {
            id,
            pixels,
            uploads: 0,
            disposed: Arc::clone(&self.disposed),
        }))
    }
}

/// 内存表面。
#[derive(Debug)]
pub struct MemorySurface {
    id: SurfaceId,
    pixels: Arc<Mutex<Vec<u8>>>,
    uploads: usize,
    disposed: Arc<AtomicUsize>,
}

impl Surface for MemorySurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn upload(&mut self, pixels: &[u8]) -> Result<(), ImageError> {
        let mut guard = self
            .pixels
            .lock()
            .map_err(|_| ImageError::Surface("表面像素锁已中毒".to_string()))?;
        if guard.len() != pixels.len() {
            return Err(ImageError::Surface(format!(
                "上传长度 {} 与表面长度 {} 不符",
                pixels.len(),
                guard.len()
            )));
        }
        guard.copy_from_slice(pixels);
        self.uploads += 1;
        Ok(())
    }
}

impl Drop for MemorySurface {
    fn drop(&mut self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        log::debug!("🗑️ 释放表面 #{}（上传 {} 次）", self.id.0, self.uploads);
    }
}
